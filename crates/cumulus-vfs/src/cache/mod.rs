//! Metadata cache interface and the scanner/updater/watcher/propagator helpers
//! that keep it consistent with a storage.

mod memory;
mod null;
mod propagator;
mod scanner;
mod updater;
mod watcher;

use std::time::{SystemTime, UNIX_EPOCH};

use cumulus_types::{CacheEntry, CacheUpdate, FileId, StorageNumericId};

use crate::error::VfsResult;
use crate::path::join_internal;

pub use memory::MemoryCache;
pub(crate) use memory::next_storage_numeric_id;
pub use null::NullCache;
pub use propagator::Propagator;
pub use scanner::{ScanMode, Scanner};
pub use updater::Updater;
pub use watcher::{WatchPolicy, Watcher};

/// Per-storage metadata cache keyed by internal path and by id.
///
/// Internal paths have no leading slash; the storage root is `""`.
pub trait MetadataCache: Send + Sync {
    fn numeric_storage_id(&self) -> StorageNumericId;

    fn get(&self, path: &str) -> Option<CacheEntry>;

    fn get_by_id(&self, id: FileId) -> Option<CacheEntry>;

    /// Insert or update. Missing parents are created as unscanned folders.
    fn put(&self, path: &str, update: &CacheUpdate) -> VfsResult<FileId>;

    /// Insert under a fixed id (used when adopting entries from another cache).
    fn put_with_id(&self, path: &str, id: FileId, update: &CacheUpdate) -> VfsResult<FileId>;

    /// Remove an entry and everything below it.
    fn remove(&self, path: &str);

    /// Move an entry and its descendants within this cache.
    fn move_entry(&self, source: &str, target: &str) -> VfsResult<()>;

    /// Children of a folder, sorted by name.
    fn get_folder_contents_by_id(&self, id: FileId) -> Vec<CacheEntry>;

    /// Internal path for an id.
    fn get_path_by_id(&self, id: FileId) -> Option<String>;

    /// Entries whose name matches a SQL-LIKE pattern (`%`, `_`), case-insensitive.
    fn search(&self, pattern: &str) -> Vec<CacheEntry>;

    /// Entries with the given mimetype, or mime part when no `/` is present.
    fn search_by_mime(&self, mimetype: &str) -> Vec<CacheEntry>;

    fn clear(&self);

    fn get_id(&self, path: &str) -> Option<FileId> {
        self.get(path).map(|e| e.id)
    }

    fn in_cache(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    fn get_folder_contents(&self, path: &str) -> Vec<CacheEntry> {
        self.get_id(path)
            .map(|id| self.get_folder_contents_by_id(id))
            .unwrap_or_default()
    }

    /// The entry at `path` followed by all descendants, parents first.
    fn get_subtree(&self, path: &str) -> Vec<CacheEntry> {
        let Some(root) = self.get(path) else {
            return Vec::new();
        };
        let mut out = vec![root];
        let mut idx = 0;
        while idx < out.len() {
            if out[idx].is_dir() {
                let children = self.get_folder_contents_by_id(out[idx].id);
                out.extend(children);
            }
            idx += 1;
        }
        out
    }

    /// Adopt an entry and its descendants from another cache, keeping ids.
    fn move_from_cache(&self, source: &dyn MetadataCache, source_path: &str, target_path: &str) -> VfsResult<()> {
        let subtree = source.get_subtree(source_path);
        self.remove(target_path);
        for entry in &subtree {
            let target = rebase(&entry.path, &subtree[0].path, target_path);
            self.put_with_id(&target, entry.id, &CacheUpdate::from(entry))?;
        }
        source.remove(source_path);
        Ok(())
    }

    /// Copy an entry and its descendants from another cache under fresh ids.
    fn copy_from_cache(&self, source: &dyn MetadataCache, entry: &CacheEntry, target_path: &str) -> VfsResult<FileId> {
        let root_id = self.put(target_path, &CacheUpdate::from(entry))?;
        for child in source.get_subtree(&entry.path).iter().skip(1) {
            let target = rebase(&child.path, &entry.path, target_path);
            self.put(&target, &CacheUpdate::from(child))?;
        }
        Ok(root_id)
    }
}

/// Move `path` from under `old_root` to under `new_root`.
pub(crate) fn rebase(path: &str, old_root: &str, new_root: &str) -> String {
    let rest = path.strip_prefix(old_root).unwrap_or(path).trim_start_matches('/');
    if rest.is_empty() {
        new_root.trim_matches('/').to_string()
    } else {
        join_internal(new_root, rest)
    }
}

/// SQL LIKE matching, case-insensitive.
pub(crate) fn like_match(pattern: &str, value: &str) -> bool {
    let p: Vec<char> = pattern.to_lowercase().chars().collect();
    let v: Vec<char> = value.to_lowercase().chars().collect();

    // dp[j] = pattern[..i] matches value[..j]
    let mut dp = vec![false; v.len() + 1];
    dp[0] = true;
    for pc in p {
        let mut next = vec![false; v.len() + 1];
        match pc {
            '%' => {
                let mut seen = false;
                for j in 0..=v.len() {
                    seen |= dp[j];
                    next[j] = seen;
                }
            }
            '_' => {
                for j in 1..=v.len() {
                    next[j] = dp[j - 1];
                }
            }
            c => {
                for j in 1..=v.len() {
                    next[j] = dp[j - 1] && v[j - 1] == c;
                }
            }
        }
        dp = next;
    }
    dp[v.len()]
}

/// Seconds since the epoch.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Fresh opaque etag.
pub(crate) fn new_etag() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_match() {
        assert!(like_match("%.txt", "Notes.TXT"));
        assert!(like_match("a_c", "abc"));
        assert!(!like_match("a_c", "abbc"));
        assert!(like_match("%", ""));
        assert!(like_match("%doc%", "my-document.odt"));
        assert!(!like_match("doc", "docs"));
    }

    #[test]
    fn test_rebase() {
        assert_eq!(rebase("a/b/c", "a", "x/y"), "x/y/b/c");
        assert_eq!(rebase("a", "a", "z"), "z");
        assert_eq!(rebase("a/b", "a", ""), "b");
    }
}
