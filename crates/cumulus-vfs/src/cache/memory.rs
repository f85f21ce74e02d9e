//! In-memory metadata cache.
//!
//! Stands in for the database-backed cache. Ids come from a process-wide
//! counter so they stay unique across storages, the way an auto-increment
//! column would.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use cumulus_types::{
    CacheEntry, CacheUpdate, DIR_MIMETYPE, FileId, Permissions, StorageNumericId, mime_part,
};
use parking_lot::RwLock;

use super::{MetadataCache, like_match, new_etag, rebase};
use crate::error::{VfsError, VfsResult};
use crate::path::basename;

static NEXT_FILE_ID: AtomicI64 = AtomicI64::new(1);
static NEXT_STORAGE_ID: AtomicI64 = AtomicI64::new(1);

pub(crate) fn next_storage_numeric_id() -> StorageNumericId {
    StorageNumericId::new(NEXT_STORAGE_ID.fetch_add(1, Ordering::Relaxed))
}

fn next_file_id() -> FileId {
    FileId::new(NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed))
}

fn parent_path(path: &str) -> Option<&str> {
    if path.is_empty() {
        None
    } else {
        Some(path.rfind('/').map(|idx| &path[..idx]).unwrap_or(""))
    }
}

#[derive(Debug, Default)]
struct Entries {
    by_path: HashMap<String, CacheEntry>,
    by_id: HashMap<FileId, String>,
}

impl Entries {
    fn ensure_parents(&mut self, storage: StorageNumericId, path: &str) -> Option<FileId> {
        let parent = parent_path(path)?;
        if let Some(entry) = self.by_path.get(parent) {
            return Some(entry.id);
        }
        let grandparent = self.ensure_parents(storage, parent);
        let id = next_file_id();
        let entry = CacheEntry {
            id,
            storage,
            path: parent.to_string(),
            name: basename(parent).to_string(),
            parent: grandparent,
            mimetype: DIR_MIMETYPE.to_string(),
            size: -1,
            unencrypted_size: 0,
            mtime: 0,
            storage_mtime: 0,
            permissions: Permissions::ALL,
            etag: new_etag(),
            encrypted: false,
            encryption_version: 0,
            checksum: String::new(),
            creation_time: 0,
            upload_time: 0,
        };
        self.by_id.insert(id, parent.to_string());
        self.by_path.insert(parent.to_string(), entry);
        Some(id)
    }

    fn upsert(&mut self, storage: StorageNumericId, path: &str, id: Option<FileId>, update: &CacheUpdate) -> FileId {
        if let Some(existing) = self.by_path.get_mut(path) {
            existing.apply(update);
            return existing.id;
        }
        let parent = self.ensure_parents(storage, path);
        let id = id.unwrap_or_else(next_file_id);
        let mut entry = CacheEntry {
            id,
            storage,
            path: path.to_string(),
            name: basename(path).to_string(),
            parent,
            mimetype: DIR_MIMETYPE.to_string(),
            size: -1,
            unencrypted_size: 0,
            mtime: 0,
            storage_mtime: 0,
            permissions: Permissions::ALL,
            etag: new_etag(),
            encrypted: false,
            encryption_version: 0,
            checksum: String::new(),
            creation_time: 0,
            upload_time: 0,
        };
        entry.apply(update);
        self.by_id.insert(id, path.to_string());
        self.by_path.insert(path.to_string(), entry);
        id
    }

    fn descendants(&self, path: &str) -> Vec<String> {
        let prefix = format!("{}/", path);
        self.by_path
            .keys()
            .filter(|p| path.is_empty() && !p.is_empty() || p.starts_with(&prefix))
            .cloned()
            .collect()
    }
}

/// Metadata cache held entirely in memory.
#[derive(Debug)]
pub struct MemoryCache {
    numeric_id: StorageNumericId,
    entries: RwLock<Entries>,
}

impl MemoryCache {
    pub fn new(numeric_id: StorageNumericId) -> Self {
        Self {
            numeric_id,
            entries: RwLock::new(Entries::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn clean(path: &str) -> &str {
    path.trim_matches('/')
}

impl MetadataCache for MemoryCache {
    fn numeric_storage_id(&self) -> StorageNumericId {
        self.numeric_id
    }

    fn get(&self, path: &str) -> Option<CacheEntry> {
        self.entries.read().by_path.get(clean(path)).cloned()
    }

    fn get_by_id(&self, id: FileId) -> Option<CacheEntry> {
        let entries = self.entries.read();
        entries.by_id.get(&id).and_then(|p| entries.by_path.get(p)).cloned()
    }

    fn put(&self, path: &str, update: &CacheUpdate) -> VfsResult<FileId> {
        Ok(self.entries.write().upsert(self.numeric_id, clean(path), None, update))
    }

    fn put_with_id(&self, path: &str, id: FileId, update: &CacheUpdate) -> VfsResult<FileId> {
        let mut entries = self.entries.write();
        if let Some(owner) = entries.by_id.get(&id) {
            if owner != clean(path) {
                return Err(VfsError::other(format!("file id {} already used by {}", id, owner)));
            }
        }
        Ok(entries.upsert(self.numeric_id, clean(path), Some(id), update))
    }

    fn remove(&self, path: &str) {
        let path = clean(path);
        let mut entries = self.entries.write();
        let mut doomed = entries.descendants(path);
        doomed.push(path.to_string());
        for p in doomed {
            if let Some(entry) = entries.by_path.remove(&p) {
                entries.by_id.remove(&entry.id);
            }
        }
    }

    fn move_entry(&self, source: &str, target: &str) -> VfsResult<()> {
        let (source, target) = (clean(source), clean(target));
        if source == target {
            return Ok(());
        }
        let mut entries = self.entries.write();
        if !entries.by_path.contains_key(source) {
            return Err(VfsError::not_found(source));
        }

        // drop whatever the target overwrote
        let mut overwritten = entries.descendants(target);
        overwritten.push(target.to_string());
        for p in overwritten {
            if let Some(entry) = entries.by_path.remove(&p) {
                entries.by_id.remove(&entry.id);
            }
        }

        let new_parent = entries.ensure_parents(self.numeric_id, target);
        let mut moving = entries.descendants(source);
        moving.push(source.to_string());
        for old in moving {
            if let Some(mut entry) = entries.by_path.remove(&old) {
                let new_path = rebase(&old, source, target);
                if old == source {
                    entry.parent = new_parent;
                    entry.name = basename(&new_path).to_string();
                }
                entry.path = new_path.clone();
                entries.by_id.insert(entry.id, new_path.clone());
                entries.by_path.insert(new_path, entry);
            }
        }
        Ok(())
    }

    fn get_folder_contents_by_id(&self, id: FileId) -> Vec<CacheEntry> {
        let entries = self.entries.read();
        let mut children: Vec<CacheEntry> = entries
            .by_path
            .values()
            .filter(|e| e.parent == Some(id))
            .cloned()
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        children
    }

    fn get_path_by_id(&self, id: FileId) -> Option<String> {
        self.entries.read().by_id.get(&id).cloned()
    }

    fn search(&self, pattern: &str) -> Vec<CacheEntry> {
        let mut hits: Vec<CacheEntry> = self
            .entries
            .read()
            .by_path
            .values()
            .filter(|e| !e.path.is_empty() && like_match(pattern, &e.name))
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.path.cmp(&b.path));
        hits
    }

    fn search_by_mime(&self, mimetype: &str) -> Vec<CacheEntry> {
        let full = mimetype.contains('/');
        let mut hits: Vec<CacheEntry> = self
            .entries
            .read()
            .by_path
            .values()
            .filter(|e| {
                !e.path.is_empty()
                    && if full {
                        e.mimetype == mimetype
                    } else {
                        mime_part(&e.mimetype) == mimetype
                    }
            })
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.path.cmp(&b.path));
        hits
    }

    fn clear(&self) {
        let mut entries = self.entries.write();
        entries.by_path.clear();
        entries.by_id.clear();
    }
}
