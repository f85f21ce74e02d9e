//! Storage decorators.
//!
//! A [`StorageLayer`] supplies a few hooks and [`Wrapped`] turns it into a
//! full [`Storage`] around an inner one. Layers are stacked once, when a
//! mount is attached, by the wrapper pipeline.

mod availability;
mod encoding;
mod permissions;
mod quota;

use std::path::PathBuf;
use std::sync::Arc;

use cumulus_types::{LockType, Permissions, StorageNumericId};

use super::{Capability, FileStat, FileStream, FreeSpace, HashAlgorithm, OpenMode, Storage};
use crate::cache::{MetadataCache, Watcher};
use crate::error::{VfsError, VfsResult};
use crate::lock::LockingProvider;
use crate::path::FilenameValidator;

pub use availability::Availability;
pub use encoding::EncodingCompat;
pub use permissions::{MaskedCache, PermissionsMask};
pub use quota::Quota;

/// The operation a layer is asked to admit. Paths are as the caller passed
/// them, before any layer path mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op<'a> {
    Read(&'a str),
    /// Content write into `path`; `size` is known for whole-buffer writes.
    Write { path: &'a str, size: Option<i64> },
    Mkdir(&'a str),
    Delete(&'a str),
    Rename { source: &'a str, target: &'a str },
    Copy { source: &'a str, target: &'a str },
    Touch(&'a str),
}

impl Op<'_> {
    pub fn is_read(&self) -> bool {
        matches!(self, Op::Read(_))
    }
}

/// Value a wrapper hands back when a layer declines an operation.
pub trait Declined {
    fn declined() -> Self;
}

impl Declined for bool {
    fn declined() -> Self {
        false
    }
}

impl<T> Declined for Option<T> {
    fn declined() -> Self {
        None
    }
}

impl Declined for () {
    fn declined() -> Self {}
}

/// Hooks a decorator can override. Every default passes straight through.
pub trait StorageLayer: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn capability(&self) -> Capability;

    /// Admit (`Ok(true)`), decline (`Ok(false)`) or fail an operation before
    /// it reaches the inner storage.
    fn admit(&self, _inner: &dyn Storage, _op: Op<'_>) -> VfsResult<bool> {
        Ok(true)
    }

    /// Observe a failure coming back from the inner storage.
    fn on_error(&self, _inner: &dyn Storage, _error: &VfsError) {}

    /// Rewrite a path before it is handed to the inner storage.
    fn map_path(&self, _inner: &dyn Storage, path: &str) -> VfsResult<String> {
        Ok(path.to_string())
    }

    fn mask_permissions(&self, permissions: Permissions) -> Permissions {
        permissions
    }

    fn cache(&self, inner: &dyn Storage) -> Arc<dyn MetadataCache> {
        inner.cache()
    }

    fn free_space(&self, inner: &dyn Storage, path: &str) -> VfsResult<FreeSpace> {
        inner.free_space(path)
    }

    fn set_quota_enabled(&self, inner: &dyn Storage, enabled: bool) {
        inner.set_quota_enabled(enabled)
    }
}

/// A storage decorated by one layer.
pub struct Wrapped<L> {
    inner: Arc<dyn Storage>,
    layer: L,
}

impl<L: StorageLayer> Wrapped<L> {
    pub fn new(inner: Arc<dyn Storage>, layer: L) -> Self {
        Self { inner, layer }
    }

    pub fn inner(&self) -> &Arc<dyn Storage> {
        &self.inner
    }

    pub fn layer(&self) -> &L {
        &self.layer
    }

    fn map(&self, path: &str) -> VfsResult<String> {
        self.layer.map_path(self.inner.as_ref(), path)
    }

    fn guarded<T: Declined>(&self, op: Op<'_>, call: impl FnOnce(&dyn Storage) -> VfsResult<T>) -> VfsResult<T> {
        if !self.layer.admit(self.inner.as_ref(), op)? {
            tracing::trace!(layer = self.layer.name(), ?op, "declined");
            return Ok(T::declined());
        }
        let result = call(self.inner.as_ref());
        if let Err(e) = &result {
            self.layer.on_error(self.inner.as_ref(), e);
        }
        result
    }
}

impl<L: StorageLayer> std::fmt::Debug for Wrapped<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wrapped")
            .field("layer", &self.layer.name())
            .field("inner", &self.inner.id())
            .finish()
    }
}

impl<L: StorageLayer> Storage for Wrapped<L> {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn cache(&self) -> Arc<dyn MetadataCache> {
        self.layer.cache(self.inner.as_ref())
    }

    fn watcher(&self) -> &Watcher {
        self.inner.watcher()
    }

    fn instance_of(&self, capability: Capability) -> bool {
        capability == self.layer.capability() || self.inner.instance_of(capability)
    }

    fn numeric_id(&self) -> StorageNumericId {
        self.inner.numeric_id()
    }

    fn is_local(&self) -> bool {
        self.inner.is_local()
    }

    fn local_file(&self, path: &str) -> VfsResult<Option<PathBuf>> {
        self.guarded(Op::Read(path), |s| s.local_file(&self.map(path)?))
    }

    fn stat(&self, path: &str) -> VfsResult<Option<FileStat>> {
        self.guarded(Op::Read(path), |s| s.stat(&self.map(path)?))
    }

    fn read_dir(&self, path: &str) -> VfsResult<Option<Vec<String>>> {
        self.guarded(Op::Read(path), |s| s.read_dir(&self.map(path)?))
    }

    fn fopen(&self, path: &str, mode: OpenMode) -> VfsResult<Option<Box<dyn FileStream>>> {
        let op = if mode.is_write() {
            Op::Write { path, size: None }
        } else {
            Op::Read(path)
        };
        self.guarded(op, |s| s.fopen(&self.map(path)?, mode))
    }

    fn file_get_contents(&self, path: &str) -> VfsResult<Option<Vec<u8>>> {
        self.guarded(Op::Read(path), |s| s.file_get_contents(&self.map(path)?))
    }

    fn file_put_contents(&self, path: &str, data: &[u8]) -> VfsResult<Option<u64>> {
        let op = Op::Write {
            path,
            size: Some(data.len() as i64),
        };
        self.guarded(op, |s| s.file_put_contents(&self.map(path)?, data))
    }

    fn mkdir(&self, path: &str) -> VfsResult<bool> {
        self.guarded(Op::Mkdir(path), |s| s.mkdir(&self.map(path)?))
    }

    fn rmdir(&self, path: &str) -> VfsResult<bool> {
        self.guarded(Op::Delete(path), |s| s.rmdir(&self.map(path)?))
    }

    fn unlink(&self, path: &str) -> VfsResult<bool> {
        self.guarded(Op::Delete(path), |s| s.unlink(&self.map(path)?))
    }

    fn rename(&self, source: &str, target: &str) -> VfsResult<bool> {
        self.guarded(Op::Rename { source, target }, |s| {
            s.rename(&self.map(source)?, &self.map(target)?)
        })
    }

    fn copy(&self, source: &str, target: &str) -> VfsResult<bool> {
        self.guarded(Op::Copy { source, target }, |s| {
            s.copy(&self.map(source)?, &self.map(target)?)
        })
    }

    fn touch(&self, path: &str, mtime: Option<i64>) -> VfsResult<bool> {
        self.guarded(Op::Touch(path), |s| s.touch(&self.map(path)?, mtime))
    }

    fn mime_type(&self, path: &str) -> VfsResult<Option<String>> {
        self.guarded(Op::Read(path), |s| s.mime_type(&self.map(path)?))
    }

    fn permissions(&self, path: &str) -> VfsResult<Permissions> {
        let permissions = self.guarded(Op::Read(path), |s| s.permissions(&self.map(path)?).map(Some))?;
        Ok(self
            .layer
            .mask_permissions(permissions.unwrap_or_else(Permissions::empty)))
    }

    fn hash(&self, algorithm: HashAlgorithm, path: &str) -> VfsResult<Option<String>> {
        self.guarded(Op::Read(path), |s| s.hash(algorithm, &self.map(path)?))
    }

    fn free_space(&self, path: &str) -> VfsResult<FreeSpace> {
        let mapped = self.map(path)?;
        let space = self.guarded(Op::Read(path), |s| self.layer.free_space(s, &mapped).map(Some))?;
        Ok(space.unwrap_or(FreeSpace::Unknown))
    }

    fn get_owner(&self, path: &str) -> VfsResult<Option<String>> {
        self.guarded(Op::Read(path), |s| s.get_owner(&self.map(path)?))
    }

    fn get_etag(&self, path: &str) -> VfsResult<Option<String>> {
        self.guarded(Op::Read(path), |s| s.get_etag(&self.map(path)?))
    }

    fn has_updated(&self, path: &str, time: i64) -> VfsResult<bool> {
        self.guarded(Op::Read(path), |s| s.has_updated(&self.map(path)?, time))
    }

    fn copy_from_storage(&self, source: &dyn Storage, source_path: &str, target_path: &str) -> VfsResult<bool> {
        let op = Op::Write {
            path: target_path,
            size: file_size(source, source_path)?,
        };
        self.guarded(op, |s| s.copy_from_storage(source, source_path, &self.map(target_path)?))
    }

    fn move_from_storage(&self, source: &dyn Storage, source_path: &str, target_path: &str) -> VfsResult<bool> {
        if source.id() == self.id() {
            return self.rename(source_path, target_path);
        }
        let op = Op::Write {
            path: target_path,
            size: file_size(source, source_path)?,
        };
        self.guarded(op, |s| s.move_from_storage(source, source_path, &self.map(target_path)?))
    }

    fn set_quota_enabled(&self, enabled: bool) {
        self.layer.set_quota_enabled(self.inner.as_ref(), enabled)
    }

    fn verify_path(&self, path: &str, file_name: &str, validator: &FilenameValidator) -> VfsResult<()> {
        self.inner.verify_path(path, file_name, validator)
    }

    fn acquire_lock(&self, path: &str, lock_type: LockType, provider: &dyn LockingProvider) -> VfsResult<()> {
        self.inner.acquire_lock(path, lock_type, provider)
    }

    fn change_lock(&self, path: &str, lock_type: LockType, provider: &dyn LockingProvider) -> VfsResult<()> {
        self.inner.change_lock(path, lock_type, provider)
    }

    fn release_lock(&self, path: &str, lock_type: LockType, provider: &dyn LockingProvider) {
        self.inner.release_lock(path, lock_type, provider)
    }
}

/// Size of a file; `None` for folders and missing nodes.
pub(crate) fn file_size(storage: &dyn Storage, path: &str) -> VfsResult<Option<i64>> {
    Ok(storage.stat(path)?.filter(|s| !s.is_dir()).map(|s| s.size))
}

/// Parent of a storage-internal path (`""` for top-level names).
pub(crate) fn internal_dirname(path: &str) -> &str {
    let path = path.trim_matches('/');
    path.rfind('/').map(|idx| &path[..idx]).unwrap_or("")
}

/// Whether two internal paths share a parent folder.
pub(crate) fn same_parent(a: &str, b: &str) -> bool {
    internal_dirname(a) == internal_dirname(b)
}
