//! Pushes a change up to every ancestor folder in the cache.

use cumulus_types::CacheUpdate;

use super::new_etag;
use crate::error::VfsResult;
use crate::storage::Storage;

pub struct Propagator<'a> {
    storage: &'a dyn Storage,
}

impl<'a> Propagator<'a> {
    pub fn new(storage: &'a dyn Storage) -> Self {
        Self { storage }
    }

    /// Give every ancestor of `path` a new etag, bump its mtime to at least
    /// `time`, and add `size_diff` to folders whose size is known.
    pub fn propagate_change(&self, path: &str, time: i64, size_diff: i64) -> VfsResult<()> {
        let cache = self.storage.cache();
        let mut current = path.trim_matches('/').to_string();
        while !current.is_empty() {
            current = current
                .rfind('/')
                .map(|idx| current[..idx].to_string())
                .unwrap_or_default();
            let Some(entry) = cache.get(&current) else {
                continue;
            };
            let mut update = CacheUpdate::new()
                .with_etag(new_etag())
                .with_mtime(entry.mtime.max(time));
            if size_diff != 0 && entry.size >= 0 {
                update = update.with_size((entry.size + size_diff).max(0));
            }
            cache.put(&current, &update)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ScanMode, Scanner};
    use crate::storage::MemoryStorage;

    #[test]
    fn test_propagates_to_root() {
        let s = MemoryStorage::new();
        s.mkdir("a").unwrap();
        s.mkdir("a/b").unwrap();
        s.file_put_contents("a/b/c.txt", b"123").unwrap();
        Scanner::new(&s).scan("", ScanMode::Recursive).unwrap();
        let cache = s.cache();
        let before_root = cache.get("").unwrap();
        let before_a = cache.get("a").unwrap();

        Propagator::new(&s)
            .propagate_change("a/b/c.txt", before_root.mtime + 100, 5)
            .unwrap();

        let root = cache.get("").unwrap();
        assert_ne!(root.etag, before_root.etag);
        assert_eq!(root.size, before_root.size + 5);
        assert_eq!(root.mtime, before_root.mtime + 100);
        assert_eq!(cache.get("a").unwrap().size, before_a.size + 5);
        // the node itself is untouched
        assert_eq!(cache.get("a/b/c.txt").unwrap().size, 3);
    }
}
