//! Detects out-of-band changes on a storage and refreshes the cache.

use std::collections::HashSet;

use cumulus_types::CacheEntry;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::{Propagator, ScanMode, Scanner, unix_now};
use crate::error::VfsResult;
use crate::storage::Storage;

/// How often the backend is asked whether a cached node changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WatchPolicy {
    /// Trust the cache.
    Never,
    /// Check each path once per watcher lifetime.
    #[default]
    Once,
    /// Check on every access.
    Always,
}

#[derive(Debug, Default)]
pub struct Watcher {
    policy: RwLock<WatchPolicy>,
    checked: Mutex<HashSet<String>>,
}

impl Watcher {
    pub fn new(policy: WatchPolicy) -> Self {
        Self {
            policy: RwLock::new(policy),
            checked: Mutex::new(HashSet::new()),
        }
    }

    pub fn policy(&self) -> WatchPolicy {
        *self.policy.read()
    }

    pub fn set_policy(&self, policy: WatchPolicy) {
        *self.policy.write() = policy;
    }

    pub fn needs_update(&self, storage: &dyn Storage, path: &str, cached: &CacheEntry) -> VfsResult<bool> {
        match self.policy() {
            WatchPolicy::Never => Ok(false),
            WatchPolicy::Once if !self.checked.lock().insert(path.to_string()) => Ok(false),
            _ => storage.has_updated(path, cached.storage_mtime),
        }
    }

    /// Rescan a node the backend reported as changed.
    pub fn update(&self, storage: &dyn Storage, path: &str, cached: &CacheEntry) -> VfsResult<()> {
        let cache = storage.cache();
        let is_dir = storage.is_dir(path)?;
        if cached.is_dir() && !is_dir {
            // a folder was replaced by a file: its children are gone
            cache.remove(path);
        }
        let scanner = Scanner::new(storage);
        let fresh = if is_dir {
            scanner.scan(path, ScanMode::Shallow)?
        } else {
            scanner.scan_file(path)?
        };
        let diff = fresh.map(|e| e.size.max(0)).unwrap_or(0) - cached.size.max(0);
        Propagator::new(storage).propagate_change(path, unix_now(), diff)
    }

    /// `needs_update` followed by `update`. Returns whether a rescan happened.
    pub fn check_update(&self, storage: &dyn Storage, path: &str, cached: &CacheEntry) -> VfsResult<bool> {
        if self.needs_update(storage, path, cached)? {
            self.update(storage, path, cached)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn scanned(storage: &MemoryStorage, path: &str) -> CacheEntry {
        Scanner::new(storage).scan("", ScanMode::Recursive).unwrap();
        storage.cache().get(path).unwrap()
    }

    #[test]
    fn test_once_checks_a_path_only_once() {
        let s = MemoryStorage::new();
        s.file_put_contents("a.txt", b"a").unwrap();
        let cached = scanned(&s, "a.txt");
        s.set_mtime("a.txt", cached.storage_mtime + 10);
        assert!(s.watcher().needs_update(&s, "a.txt", &cached).unwrap());
        assert!(!s.watcher().needs_update(&s, "a.txt", &cached).unwrap());
    }

    #[test]
    fn test_never_and_always() {
        let s = MemoryStorage::new().with_watcher(Watcher::new(WatchPolicy::Never));
        s.file_put_contents("a.txt", b"a").unwrap();
        let cached = scanned(&s, "a.txt");
        s.set_mtime("a.txt", cached.storage_mtime + 10);
        assert!(!s.watcher().needs_update(&s, "a.txt", &cached).unwrap());

        s.watcher().set_policy(WatchPolicy::Always);
        assert!(s.watcher().needs_update(&s, "a.txt", &cached).unwrap());
        assert!(s.watcher().needs_update(&s, "a.txt", &cached).unwrap());
    }

    #[test]
    fn test_update_rescans_changed_file() {
        let s = MemoryStorage::new();
        s.file_put_contents("a.txt", b"a").unwrap();
        let cached = scanned(&s, "a.txt");
        s.file_put_contents("a.txt", b"abcdef").unwrap();
        s.set_mtime("a.txt", cached.storage_mtime + 10);

        assert!(s.watcher().check_update(&s, "a.txt", &cached).unwrap());
        let fresh = s.cache().get("a.txt").unwrap();
        assert_eq!(fresh.size, 6);
        assert_ne!(fresh.etag, cached.etag);
        assert_eq!(s.cache().get("").unwrap().size, 6);
    }
}
