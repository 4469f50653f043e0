use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use log::{trace, warn};

use crate::bytecode::ByteCode;
use crate::loader::LoadError;
use crate::runtime::escape::uri_escape;

/// Store for compiled templates, keyed by template name.
pub trait Cache: Send + Sync {
    fn get(&self, name: &str) -> Option<Arc<ByteCode>>;
    fn set(&self, name: &str, bc: Arc<ByteCode>) -> Result<(), LoadError>;
    fn delete(&self, name: &str);
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Arc<ByteCode>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Cache for MemoryCache {
    fn get(&self, name: &str) -> Option<Arc<ByteCode>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn set(&self, name: &str, bc: Arc<ByteCode>) -> Result<(), LoadError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), bc);
        Ok(())
    }

    fn delete(&self, name: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }
}

/// One postcard file per template under `dir`.
///
/// File names are the percent-encoded template name, so `a/b.tt` and
/// `a_b.tt` never collide and nothing escapes the directory.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.kbc", uri_escape(name)))
    }
}

impl Cache for FileCache {
    fn get(&self, name: &str) -> Option<Arc<ByteCode>> {
        let path = self.path_for(name);
        let bytes = fs::read(&path).ok()?;
        match ByteCode::from_bytes(name, &bytes) {
            Ok(bc) => Some(Arc::new(bc)),
            Err(e) => {
                warn!("discarding unreadable cache file {}: {}", path.display(), e);
                let _ = fs::remove_file(&path);
                None
            }
        }
    }

    fn set(&self, name: &str, bc: Arc<ByteCode>) -> Result<(), LoadError> {
        let bytes = bc.to_bytes()?;
        fs::create_dir_all(&self.dir).map_err(|e| LoadError::io(name, e))?;
        let path = self.path_for(name);
        fs::write(&path, bytes).map_err(|e| LoadError::io(name, e))?;
        trace!("wrote {}", path.display());
        Ok(())
    }

    fn delete(&self, name: &str) {
        let _ = fs::remove_file(self.path_for(name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Op;

    fn sample() -> Arc<ByteCode> {
        let mut bc = ByteCode::new("a/b.tt");
        bc.append(Op::PrintRawConst("x".to_string()));
        bc.append(Op::End);
        Arc::new(bc)
    }

    #[test]
    fn test_memory_cache() {
        let cache = MemoryCache::new();
        assert!(cache.get("a/b.tt").is_none());
        cache.set("a/b.tt", sample()).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a/b.tt").unwrap().ops.len(), 2);
        cache.delete("a/b.tt");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_file_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path().join("nested"));
        let bc = sample();
        cache.set("a/b.tt", Arc::clone(&bc)).unwrap();

        assert_eq!(
            cache.path_for("a/b.tt"),
            dir.path().join("nested").join("a%2Fb.tt.kbc")
        );
        assert_eq!(*cache.get("a/b.tt").unwrap(), *bc);

        cache.delete("a/b.tt");
        assert!(cache.get("a/b.tt").is_none());
    }

    #[test]
    fn test_file_cache_discards_corrupt_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        fs::write(cache.path_for("x"), [0xff, 0xff, 0xff]).unwrap();
        assert!(cache.get("x").is_none());
        assert!(!cache.path_for("x").exists());
    }
}
