//! Walks a storage and writes what it finds into its metadata cache.

use std::collections::HashSet;

use cumulus_types::{CacheEntry, CacheUpdate, DIR_MIMETYPE};
use tracing::trace;

use super::new_etag;
use crate::error::VfsResult;
use crate::path::{is_partial_file, join_internal};
use crate::storage::Storage;

/// Depth of a folder scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// The folder and its direct children.
    Shallow,
    /// The whole subtree.
    Recursive,
}

pub struct Scanner<'a> {
    storage: &'a dyn Storage,
    partial_extension: String,
}

fn internal_parent(path: &str) -> Option<&str> {
    if path.is_empty() {
        None
    } else {
        Some(path.rfind('/').map(|idx| &path[..idx]).unwrap_or(""))
    }
}

impl<'a> Scanner<'a> {
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

    /// Refresh the cache row for one node. Returns the stored entry, or
    /// `None` when the node is gone (its row is dropped) or is an upload
    /// artifact.
    pub fn scan_file(&self, path: &str) -> VfsResult<Option<CacheEntry>> {
        let path = path.trim_matches('/');
        if is_partial_file(path, &self.partial_extension) {
            return Ok(None);
        }
        let cache = self.storage.cache();
        let Some(stat) = self.storage.stat(path)? else {
            cache.remove(path);
            return Ok(None);
        };

        if let Some(parent) = internal_parent(path) {
            if !cache.in_cache(parent) {
                self.scan_file(parent)?;
            }
        }

        let mut cached = cache.get(path);
        if cached.as_ref().is_some_and(|c| c.is_dir() != stat.is_dir()) {
            cache.remove(path);
            cached = None;
        }

        let mimetype = if stat.is_dir() {
            DIR_MIMETYPE.to_string()
        } else {
            self.storage
                .mime_type(path)?
                .unwrap_or_else(|| cumulus_types::mimetype_for_name(path).to_string())
        };
        let mut update = CacheUpdate::new()
            .with_mimetype(mimetype)
            .with_mtime(stat.mtime)
            .with_storage_mtime(stat.mtime)
            .with_permissions(self.storage.permissions(path)?);

        if !stat.is_dir() {
            update = update.with_size(stat.size);
        } else if cached.is_none() {
            update = update.with_size(-1);
        }

        let unchanged = cached
            .as_ref()
            .is_some_and(|c| c.storage_mtime == stat.mtime && (stat.is_dir() || c.size == stat.size));
        if !unchanged {
            let etag = self.storage.get_etag(path)?.unwrap_or_else(new_etag);
            update = update.with_etag(etag);
        }

        trace!(storage = self.storage.id(), path, unchanged, "scanned");
        cache.put(path, &update)?;
        Ok(cache.get(path))
    }

    /// Scan a node and, for folders, its children. Folder sizes are the sum
    /// of their children, or `-1` while any child size is unknown.
    pub fn scan(&self, path: &str, mode: ScanMode) -> VfsResult<Option<CacheEntry>> {
        let path = path.trim_matches('/');
        let Some(entry) = self.scan_file(path)? else {
            return Ok(None);
        };
        if !entry.is_dir() {
            return Ok(Some(entry));
        }

        let size = self.scan_children(path, mode)?;
        let cache = self.storage.cache();
        cache.put(path, &CacheUpdate::new().with_size(size))?;
        Ok(cache.get(path))
    }

    fn scan_children(&self, path: &str, mode: ScanMode) -> VfsResult<i64> {
        let cache = self.storage.cache();
        let names: Vec<String> = self
            .storage
            .read_dir(path)?
            .unwrap_or_default()
            .into_iter()
            .filter(|name| !is_partial_file(name, &self.partial_extension))
            .collect();

        let present: HashSet<&str> = names.iter().map(String::as_str).collect();
        for stale in cache.get_folder_contents(path) {
            if !present.contains(stale.name.as_str()) {
                cache.remove(&stale.path);
            }
        }

        let mut total = 0i64;
        let mut unknown = false;
        for name in &names {
            let child = join_internal(path, name);
            let entry = match mode {
                ScanMode::Recursive => self.scan(&child, mode)?,
                ScanMode::Shallow => self.scan_file(&child)?,
            };
            match entry {
                Some(e) if e.size < 0 => unknown = true,
                Some(e) => total += e.size,
                None => {}
            }
        }
        Ok(if unknown { -1 } else { total })
    }
}
