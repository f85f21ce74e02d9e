//! Inert storage mounted while the filesystem is locked down.

use std::sync::Arc;

use cumulus_types::{FileType, Permissions};

use super::{Capability, FileStat, FileStream, FreeSpace, OpenMode, Storage};
use crate::cache::{MetadataCache, NullCache, Watcher, WatchPolicy, next_storage_numeric_id};
use crate::error::VfsResult;

/// Storage with an empty, read-only root. Every mutation is declined.
#[derive(Debug)]
pub struct NullStorage {
    id: String,
    cache: Arc<NullCache>,
    watcher: Watcher,
}

impl Default for NullStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl NullStorage {
    pub fn new() -> Self {
        Self {
            id: format!("null::{}", uuid::Uuid::new_v4().simple()),
            cache: Arc::new(NullCache::new(next_storage_numeric_id())),
            watcher: Watcher::new(WatchPolicy::Never),
        }
    }
}

impl Storage for NullStorage {
    fn id(&self) -> &str {
        &self.id
    }

    fn cache(&self) -> Arc<dyn MetadataCache> {
        self.cache.clone()
    }

    fn watcher(&self) -> &Watcher {
        &self.watcher
    }

    fn instance_of(&self, capability: Capability) -> bool {
        capability == Capability::Null
    }

    fn stat(&self, path: &str) -> VfsResult<Option<FileStat>> {
        Ok(path.trim_matches('/').is_empty().then_some(FileStat {
            file_type: FileType::Dir,
            size: 0,
            mtime: 0,
        }))
    }

    fn read_dir(&self, path: &str) -> VfsResult<Option<Vec<String>>> {
        Ok(path.trim_matches('/').is_empty().then(Vec::new))
    }

    fn fopen(&self, _path: &str, _mode: OpenMode) -> VfsResult<Option<Box<dyn FileStream>>> {
        Ok(None)
    }

    fn mkdir(&self, _path: &str) -> VfsResult<bool> {
        Ok(false)
    }

    fn rmdir(&self, _path: &str) -> VfsResult<bool> {
        Ok(false)
    }

    fn unlink(&self, _path: &str) -> VfsResult<bool> {
        Ok(false)
    }

    fn rename(&self, _source: &str, _target: &str) -> VfsResult<bool> {
        Ok(false)
    }

    fn copy(&self, _source: &str, _target: &str) -> VfsResult<bool> {
        Ok(false)
    }

    fn touch(&self, _path: &str, _mtime: Option<i64>) -> VfsResult<bool> {
        Ok(false)
    }

    fn permissions(&self, path: &str) -> VfsResult<Permissions> {
        Ok(if path.trim_matches('/').is_empty() {
            Permissions::READ
        } else {
            Permissions::empty()
        })
    }

    fn free_space(&self, _path: &str) -> VfsResult<FreeSpace> {
        Ok(FreeSpace::Bytes(0))
    }

    fn get_etag(&self, _path: &str) -> VfsResult<Option<String>> {
        Ok(None)
    }

    fn has_updated(&self, _path: &str, _time: i64) -> VfsResult<bool> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_everything_declined() {
        let s = NullStorage::new();
        assert!(s.is_dir("").unwrap());
        assert!(!s.mkdir("a").unwrap());
        assert!(s.file_put_contents("a.txt", b"x").unwrap().is_none());
        assert_eq!(s.read_dir("").unwrap(), Some(Vec::new()));
        assert!(s.cache().get("").is_some());
        assert!(s.instance_of(Capability::Null));
    }
}
