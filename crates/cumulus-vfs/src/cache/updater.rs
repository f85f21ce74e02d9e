//! Keeps the cache in step with writes made through the facade.

use cumulus_types::{CacheUpdate, mimetype_for_name};

use super::{Propagator, ScanMode, Scanner, unix_now};
use crate::error::VfsResult;
use crate::path::{basename, is_partial_file};
use crate::storage::Storage;

pub struct Updater<'a> {
    storage: &'a dyn Storage,
    partial_extension: String,
}

impl<'a> Updater<'a> {
    pub fn new(storage: &'a dyn Storage) -> Self {
        Self {
            storage,
            partial_extension: "part".to_string(),
        }
    }

    pub fn with_partial_extension(mut self, extension: impl Into<String>) -> Self {
        self.partial_extension = extension.into();
        self
    }

    fn scanner(&self) -> Scanner<'a> {
        Scanner::new(self.storage).with_partial_extension(self.partial_extension.clone())
    }

    /// Rescan `path` after it was written and push the change upwards.
    pub fn update(&self, path: &str, time: Option<i64>) -> VfsResult<()> {
        if is_partial_file(path, &self.partial_extension) {
            return Ok(());
        }
        let cache = self.storage.cache();
        let old_size = cache.get(path).map(|e| e.size.max(0)).unwrap_or(0);
        let entry = if self.storage.is_dir(path)? {
            self.scanner().scan(path, ScanMode::Shallow)?
        } else {
            self.scanner().scan_file(path)?
        };
        let new_size = entry.map(|e| e.size.max(0)).unwrap_or(0);
        Propagator::new(self.storage).propagate_change(path, time.unwrap_or_else(unix_now), new_size - old_size)
    }

    /// Drop `path` from the cache after it was deleted.
    pub fn remove(&self, path: &str) -> VfsResult<()> {
        if is_partial_file(path, &self.partial_extension) {
            return Ok(());
        }
        let cache = self.storage.cache();
        let size = cache.get(path).map(|e| e.size.max(0)).unwrap_or(0);
        cache.remove(path);
        Propagator::new(self.storage).propagate_change(path, unix_now(), -size)
    }

    /// Carry cache rows along with a rename from `source` (possibly this
    /// same storage) into this storage. File ids survive the move.
    pub fn rename_from_storage(&self, source: &dyn Storage, source_path: &str, target_path: &str) -> VfsResult<()> {
        if is_partial_file(target_path, &self.partial_extension) {
            return Updater::new(source).remove(source_path);
        }
        let source_cache = source.cache();
        let Some(entry) = source_cache.get(source_path) else {
            return self.update(target_path, None);
        };

        let target_cache = self.storage.cache();
        if source_cache.numeric_storage_id() == target_cache.numeric_storage_id() {
            target_cache.move_entry(source_path, target_path)?;
        } else {
            target_cache.move_from_cache(source_cache.as_ref(), source_path, target_path)?;
        }
        if !entry.is_dir() {
            let mimetype = mimetype_for_name(basename(target_path));
            target_cache.put(target_path, &CacheUpdate::new().with_mimetype(mimetype))?;
        }

        let time = unix_now();
        let size = entry.size.max(0);
        Propagator::new(source).propagate_change(source_path, time, -size)?;
        Propagator::new(self.storage).propagate_change(target_path, time, size)
    }

    /// Mirror a copy from `source` into this storage's cache under fresh ids.
    pub fn copy_from_storage(&self, source: &dyn Storage, source_path: &str, target_path: &str) -> VfsResult<()> {
        let source_cache = source.cache();
        let Some(entry) = source_cache.get(source_path) else {
            return self.update(target_path, None);
        };
        self.storage
            .cache()
            .copy_from_cache(source_cache.as_ref(), &entry, target_path)?;
        Propagator::new(self.storage).propagate_change(target_path, unix_now(), entry.size.max(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn scanned() -> MemoryStorage {
        let s = MemoryStorage::new();
        s.mkdir("dir").unwrap();
        s.file_put_contents("dir/a.txt", b"abcd").unwrap();
        Scanner::new(&s).scan("", ScanMode::Recursive).unwrap();
        s
    }

    #[test]
    fn test_update_propagates_size() {
        let s = scanned();
        s.file_put_contents("dir/b.md", b"123456").unwrap();
        Updater::new(&s).update("dir/b.md", None).unwrap();
        let cache = s.cache();
        assert_eq!(cache.get("dir/b.md").unwrap().mimetype, "text/markdown");
        assert_eq!(cache.get("dir").unwrap().size, 10);
        assert_eq!(cache.get("").unwrap().size, 10);
    }

    #[test]
    fn test_remove_propagates_negative_size() {
        let s = scanned();
        s.unlink("dir/a.txt").unwrap();
        Updater::new(&s).remove("dir/a.txt").unwrap();
        assert!(!s.cache().in_cache("dir/a.txt"));
        assert_eq!(s.cache().get("").unwrap().size, 0);
    }

    #[test]
    fn test_rename_within_storage_keeps_id() {
        let s = scanned();
        let id = s.cache().get_id("dir/a.txt").unwrap();
        s.rename("dir/a.txt", "a.md").unwrap();
        Updater::new(&s).rename_from_storage(&s, "dir/a.txt", "a.md").unwrap();
        let moved = s.cache().get("a.md").unwrap();
        assert_eq!(moved.id, id);
        assert_eq!(moved.mimetype, "text/markdown");
        assert_eq!(s.cache().get("dir").unwrap().size, 0);
        assert_eq!(s.cache().get("").unwrap().size, 4);
    }

    #[test]
    fn test_rename_across_storages_keeps_id() {
        let source = scanned();
        let target = MemoryStorage::new();
        Scanner::new(&target).scan("", ScanMode::Recursive).unwrap();
        let id = source.cache().get_id("dir").unwrap();

        target.move_from_storage(&source, "dir", "moved").unwrap();
        Updater::new(&target).rename_from_storage(&source, "dir", "moved").unwrap();

        assert_eq!(target.cache().get_id("moved"), Some(id));
        assert!(target.cache().in_cache("moved/a.txt"));
        assert!(!source.cache().in_cache("dir"));
        assert_eq!(target.cache().get("").unwrap().size, 4);
        assert_eq!(source.cache().get("").unwrap().size, 0);
    }

    #[test]
    fn test_copy_assigns_fresh_ids() {
        let s = scanned();
        s.copy("dir", "dir2").unwrap();
        Updater::new(&s).copy_from_storage(&s, "dir", "dir2").unwrap();
        let cache = s.cache();
        assert_ne!(cache.get_id("dir2/a.txt"), cache.get_id("dir/a.txt"));
        assert_eq!(cache.get("").unwrap().size, 8);
    }
}
