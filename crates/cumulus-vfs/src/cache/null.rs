//! Cache for inert storages: a read-only root and nothing else.

use cumulus_types::{CacheEntry, CacheUpdate, DIR_MIMETYPE, FileId, Permissions, StorageNumericId};

use super::MetadataCache;
use crate::error::{VfsError, VfsResult};

#[derive(Debug)]
pub struct NullCache {
    numeric_id: StorageNumericId,
}

impl NullCache {
    pub fn new(numeric_id: StorageNumericId) -> Self {
        Self { numeric_id }
    }

    fn root(&self) -> CacheEntry {
        CacheEntry {
            id: FileId::new(-1),
            storage: self.numeric_id,
            path: String::new(),
            name: String::new(),
            parent: None,
            mimetype: DIR_MIMETYPE.to_string(),
            size: 0,
            unencrypted_size: 0,
            mtime: 0,
            storage_mtime: 0,
            permissions: Permissions::READ,
            etag: String::new(),
            encrypted: false,
            encryption_version: 0,
            checksum: String::new(),
            creation_time: 0,
            upload_time: 0,
        }
    }
}

impl MetadataCache for NullCache {
    fn numeric_storage_id(&self) -> StorageNumericId {
        self.numeric_id
    }

    fn get(&self, path: &str) -> Option<CacheEntry> {
        path.trim_matches('/').is_empty().then(|| self.root())
    }

    fn get_by_id(&self, _id: FileId) -> Option<CacheEntry> {
        None
    }

    fn put(&self, path: &str, _update: &CacheUpdate) -> VfsResult<FileId> {
        Err(VfsError::forbidden(format!("null cache is read-only: {}", path)))
    }

    fn put_with_id(&self, path: &str, _id: FileId, update: &CacheUpdate) -> VfsResult<FileId> {
        self.put(path, update)
    }

    fn remove(&self, _path: &str) {}

    fn move_entry(&self, source: &str, _target: &str) -> VfsResult<()> {
        Err(VfsError::forbidden(format!("null cache is read-only: {}", source)))
    }

    fn get_folder_contents_by_id(&self, _id: FileId) -> Vec<CacheEntry> {
        Vec::new()
    }

    fn get_path_by_id(&self, _id: FileId) -> Option<String> {
        None
    }

    fn search(&self, _pattern: &str) -> Vec<CacheEntry> {
        Vec::new()
    }

    fn search_by_mime(&self, _mimetype: &str) -> Vec<CacheEntry> {
        Vec::new()
    }

    fn clear(&self) {}
}
