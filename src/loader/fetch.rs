use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::SystemTime;

use crate::loader::{LoadError, TemplateSource};

/// Source of template text.
pub trait TemplateFetcher: Send + Sync {
    fn fetch(&self, name: &str) -> Result<TemplateSource, LoadError>;
}

impl<T: TemplateFetcher + ?Sized> TemplateFetcher for Arc<T> {
    fn fetch(&self, name: &str) -> Result<TemplateSource, LoadError> {
        (**self).fetch(name)
    }
}

/// Templates held in memory. Adding a template stamps it with the current time.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    templates: RwLock<HashMap<String, TemplateSource>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.add(name, content);
        self
    }

    pub fn add(&self, name: impl Into<String>, content: impl Into<String>) {
        self.add_with_time(name, content, SystemTime::now());
    }

    pub fn add_with_time(
        &self,
        name: impl Into<String>,
        content: impl Into<String>,
        last_modified: SystemTime,
    ) {
        let source = TemplateSource {
            content: content.into(),
            last_modified,
        };
        self.templates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), source);
    }

    pub fn remove(&self, name: &str) -> bool {
        self.templates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }
}

impl TemplateFetcher for MemoryFetcher {
    fn fetch(&self, name: &str) -> Result<TemplateSource, LoadError> {
        self.templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| LoadError::NotFound {
                name: name.to_string(),
            })
    }
}

/// Reads templates from disk, trying each search path in order.
#[derive(Debug, Clone, Default)]
pub struct FileFetcher {
    paths: Vec<PathBuf>,
}

impl FileFetcher {
    pub fn new<P: Into<PathBuf>>(paths: impl IntoIterator<Item = P>) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn add_path(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    fn locate(&self, name: &str) -> Result<PathBuf, LoadError> {
        if Path::new(name).is_absolute() {
            return Err(LoadError::AbsolutePath {
                name: name.to_string(),
            });
        }
        if Path::new(name)
            .components()
            .any(|c| c == Component::ParentDir)
        {
            return Err(LoadError::ParentDir {
                name: name.to_string(),
            });
        }
        self.paths
            .iter()
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| LoadError::NotFound {
                name: name.to_string(),
            })
    }
}

impl TemplateFetcher for FileFetcher {
    fn fetch(&self, name: &str) -> Result<TemplateSource, LoadError> {
        let path = self.locate(name)?;
        let content = fs::read_to_string(&path).map_err(|e| LoadError::io(name, e))?;
        let last_modified = fs::metadata(&path)
            .and_then(|m| m.modified())
            .map_err(|e| LoadError::io(name, e))?;
        Ok(TemplateSource {
            content,
            last_modified,
        })
    }
}
