//! Template loading: where sources come from, where compiled bytecode is kept,
//! and the loader the VM calls for INCLUDE and WRAPPER.

pub mod cache;
pub mod fetch;

use std::sync::Arc;
use std::time::SystemTime;

use log::trace;

use crate::bytecode::ByteCode;
use crate::engine::compile_template;
use crate::error::Result;
use crate::symbol::Syntax;

pub use cache::{Cache, FileCache, MemoryCache};
pub use fetch::{FileFetcher, MemoryFetcher, TemplateFetcher};

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("template '{name}' not found")]
    NotFound { name: String },

    #[error("template '{name}': absolute paths are not allowed")]
    AbsolutePath { name: String },

    #[error("template '{name}': '..' may not leave the search path")]
    ParentDir { name: String },

    #[error("template '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("template '{name}': cannot encode bytecode: {message}")]
    Encode { name: String, message: String },

    #[error("template '{name}': cannot decode bytecode: {message}")]
    Decode { name: String, message: String },
}

impl LoadError {
    pub fn io(name: &str, source: std::io::Error) -> Self {
        LoadError::Io {
            name: name.to_string(),
            source,
        }
    }
}

/// Raw template text plus the time it last changed.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateSource {
    pub content: String,
    pub last_modified: SystemTime,
}

/// When a cached compilation may be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheStrategy {
    /// Always compile from source; the cache is never read or written.
    Never,
    /// Reuse cached bytecode unless the source changed after it was generated.
    #[default]
    Verify,
    /// Reuse cached bytecode without looking at the source.
    NoVerify,
}

/// Resolves a template name to executable bytecode.
pub trait Loader {
    fn load(&self, name: &str) -> Result<Arc<ByteCode>>;
}

/// Fetches, compiles and caches templates according to a [`CacheStrategy`].
pub struct CachedLoader {
    fetcher: Box<dyn TemplateFetcher>,
    cache: Box<dyn Cache>,
    strategy: CacheStrategy,
    syntax: Syntax,
    optimize: bool,
}

impl CachedLoader {
    pub fn new(fetcher: Box<dyn TemplateFetcher>, cache: Box<dyn Cache>) -> Self {
        Self {
            fetcher,
            cache,
            strategy: CacheStrategy::default(),
            syntax: Syntax::tterse(),
            optimize: true,
        }
    }

    pub fn with_strategy(mut self, strategy: CacheStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_syntax(mut self, syntax: Syntax) -> Self {
        self.syntax = syntax;
        self
    }

    pub fn with_optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    pub fn set_fetcher(&mut self, fetcher: Box<dyn TemplateFetcher>) {
        self.fetcher = fetcher;
    }

    pub fn set_cache(&mut self, cache: Box<dyn Cache>) {
        self.cache = cache;
    }

    pub fn strategy(&self) -> CacheStrategy {
        self.strategy
    }

    /// Drops any cached compilation of `name`.
    pub fn invalidate(&self, name: &str) {
        self.cache.delete(name);
    }

    fn cached(&self, name: &str) -> Result<Option<Arc<ByteCode>>> {
        let Some(bc) = self.cache.get(name) else {
            trace!("cache miss: '{}'", name);
            return Ok(None);
        };

        match self.strategy {
            CacheStrategy::Never => Ok(None),
            CacheStrategy::NoVerify => {
                trace!("cache hit: '{}'", name);
                Ok(Some(bc))
            }
            CacheStrategy::Verify => {
                let source = self.fetcher.fetch(name)?;
                if source.last_modified > bc.generated_at {
                    trace!("cache stale: '{}'", name);
                    self.cache.delete(name);
                    Ok(None)
                } else {
                    trace!("cache hit: '{}'", name);
                    Ok(Some(bc))
                }
            }
        }
    }
}

impl Loader for CachedLoader {
    fn load(&self, name: &str) -> Result<Arc<ByteCode>> {
        if self.strategy != CacheStrategy::Never {
            if let Some(bc) = self.cached(name)? {
                return Ok(bc);
            }
        }

        let source = self.fetcher.fetch(name)?;
        let bc = Arc::new(compile_template(
            name,
            &source.content,
            &self.syntax,
            self.optimize,
        )?);

        if self.strategy != CacheStrategy::Never {
            self.cache.set(name, Arc::clone(&bc))?;
        }
        Ok(bc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::time::Duration;

    fn loader(strategy: CacheStrategy) -> (Arc<MemoryFetcher>, CachedLoader) {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.add("a.tt", "one");
        let loader = CachedLoader::new(Box::new(Arc::clone(&fetcher)), Box::new(MemoryCache::new()))
            .with_strategy(strategy);
        (fetcher, loader)
    }

    #[test]
    fn test_no_verify_reuses_cached_bytecode() {
        let (fetcher, loader) = loader(CacheStrategy::NoVerify);
        let first = loader.load("a.tt").unwrap();
        fetcher.add("a.tt", "two");
        let second = loader.load("a.tt").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_never_always_recompiles() {
        let (_, loader) = loader(CacheStrategy::Never);
        let first = loader.load("a.tt").unwrap();
        let second = loader.load("a.tt").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_verify_recompiles_changed_source() {
        let (fetcher, loader) = loader(CacheStrategy::Verify);
        let first = loader.load("a.tt").unwrap();
        assert!(Arc::ptr_eq(&first, &loader.load("a.tt").unwrap()));

        fetcher.add_with_time(
            "a.tt",
            "two",
            first.generated_at + Duration::from_secs(60),
        );
        let second = loader.load("a.tt").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(
            second.ops.first(),
            Some(&crate::bytecode::Op::PrintRawConst("two".to_string()))
        );
    }

    #[test]
    fn test_missing_template() {
        let (_, loader) = loader(CacheStrategy::Verify);
        let err = loader.load("nope.tt").unwrap_err();
        assert!(matches!(err, Error::Load(LoadError::NotFound { .. })));
    }

    #[test]
    fn test_invalidate() {
        let (fetcher, loader) = loader(CacheStrategy::NoVerify);
        let first = loader.load("a.tt").unwrap();
        fetcher.add("a.tt", "two");
        loader.invalidate("a.tt");
        let second = loader.load("a.tt").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
