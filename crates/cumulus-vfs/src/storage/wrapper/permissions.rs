//! Permission masking, used for sharing policy and read-only mounts.

use std::sync::Arc;

use cumulus_types::{CacheEntry, CacheUpdate, FileId, Permissions, StorageNumericId};

use super::{Op, StorageLayer, same_parent};
use crate::cache::MetadataCache;
use crate::error::VfsResult;
use crate::storage::{Capability, Storage};

/// Strips permission bits and declines the writes they would have allowed.
#[derive(Debug, Clone, Copy)]
pub struct PermissionsMask {
    mask: Permissions,
    capability: Capability,
}

impl PermissionsMask {
    pub fn new(mask: Permissions) -> Self {
        Self {
            mask,
            capability: Capability::PermissionsMask,
        }
    }

    /// Everything except `READ` and `SHARE` is masked.
    pub fn read_only() -> Self {
        Self {
            mask: Permissions::READ | Permissions::SHARE,
            capability: Capability::ReadOnly,
        }
    }

    pub fn without_sharing() -> Self {
        Self::new(Permissions::ALL - Permissions::SHARE)
    }

    pub fn mask(&self) -> Permissions {
        self.mask
    }

    fn allows(&self, needed: Permissions) -> bool {
        self.mask.contains(needed)
    }

    fn create_or_update(&self, inner: &dyn Storage, path: &str) -> VfsResult<bool> {
        Ok(if inner.file_exists(path)? {
            self.allows(Permissions::UPDATE)
        } else {
            self.allows(Permissions::CREATE)
        })
    }
}

impl StorageLayer for PermissionsMask {
    fn name(&self) -> &'static str {
        "permissions_mask"
    }

    fn capability(&self) -> Capability {
        self.capability
    }

    fn admit(&self, inner: &dyn Storage, op: Op<'_>) -> VfsResult<bool> {
        match op {
            Op::Read(_) => Ok(true),
            Op::Mkdir(_) => Ok(self.allows(Permissions::CREATE)),
            Op::Delete(_) => Ok(self.allows(Permissions::DELETE)),
            Op::Write { path, .. } | Op::Touch(path) => self.create_or_update(inner, path),
            Op::Copy { target, .. } => self.create_or_update(inner, target),
            Op::Rename { source, target } if same_parent(source, target) => Ok(self.allows(Permissions::UPDATE)),
            Op::Rename { .. } => Ok(self.allows(Permissions::DELETE)),
        }
    }

    fn mask_permissions(&self, permissions: Permissions) -> Permissions {
        permissions & self.mask
    }

    fn cache(&self, inner: &dyn Storage) -> Arc<dyn MetadataCache> {
        Arc::new(MaskedCache::new(inner.cache(), self.mask))
    }
}

/// Cache view that applies a permission mask to every entry it returns.
pub struct MaskedCache {
    inner: Arc<dyn MetadataCache>,
    mask: Permissions,
}

impl MaskedCache {
    pub fn new(inner: Arc<dyn MetadataCache>, mask: Permissions) -> Self {
        Self { inner, mask }
    }

    fn masked(&self, mut entry: CacheEntry) -> CacheEntry {
        entry.permissions &= self.mask;
        entry
    }
}

impl MetadataCache for MaskedCache {
    fn numeric_storage_id(&self) -> StorageNumericId {
        self.inner.numeric_storage_id()
    }

    fn get(&self, path: &str) -> Option<CacheEntry> {
        self.inner.get(path).map(|e| self.masked(e))
    }

    fn get_by_id(&self, id: FileId) -> Option<CacheEntry> {
        self.inner.get_by_id(id).map(|e| self.masked(e))
    }

    fn put(&self, path: &str, update: &CacheUpdate) -> VfsResult<FileId> {
        self.inner.put(path, update)
    }

    fn put_with_id(&self, path: &str, id: FileId, update: &CacheUpdate) -> VfsResult<FileId> {
        self.inner.put_with_id(path, id, update)
    }

    fn remove(&self, path: &str) {
        self.inner.remove(path)
    }

    fn move_entry(&self, source: &str, target: &str) -> VfsResult<()> {
        self.inner.move_entry(source, target)
    }

    fn get_folder_contents_by_id(&self, id: FileId) -> Vec<CacheEntry> {
        self.inner
            .get_folder_contents_by_id(id)
            .into_iter()
            .map(|e| self.masked(e))
            .collect()
    }

    fn get_path_by_id(&self, id: FileId) -> Option<String> {
        self.inner.get_path_by_id(id)
    }

    fn search(&self, pattern: &str) -> Vec<CacheEntry> {
        self.inner.search(pattern).into_iter().map(|e| self.masked(e)).collect()
    }

    fn search_by_mime(&self, mimetype: &str) -> Vec<CacheEntry> {
        self.inner
            .search_by_mime(mimetype)
            .into_iter()
            .map(|e| self.masked(e))
            .collect()
    }

    fn clear(&self) {
        self.inner.clear()
    }
}
