//! Path locking for a view.
//!
//! A lock on a path covers the path itself plus a shared lock on every
//! ancestor inside the view root. Locks are taken nearest-first (self, then
//! parents upward) and released in the mirror order. A failure part way
//! rolls back whatever was already taken.

use std::sync::Arc;

use cumulus_types::LockType;
use tracing::warn;

use super::LockingProvider;
use crate::error::{VfsError, VfsResult};
use crate::mount::{MountManager, MountPoint};
use crate::path::{dirname, join, parents};

/// Locks absolute paths on behalf of one view.
#[derive(Clone)]
pub struct LockCoordinator {
    mounts: Arc<MountManager>,
    provider: Arc<dyn LockingProvider>,
    root: String,
}

impl std::fmt::Debug for LockCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockCoordinator")
            .field("root", &self.root)
            .field("noop", &self.provider.is_noop())
            .finish()
    }
}

/// Whether an absolute path takes part in locking.
///
/// Inside a user's `files` tree only entries below `/<user>/files` are
/// locked; app data is never locked.
pub fn should_lock_file(path: &str) -> bool {
    let segments: Vec<&str> = path.split('/').collect();
    if segments.len() > 2 {
        return segments[2] == "files" && segments.len() > 3;
    }
    !path.starts_with("/appdata_")
}

impl LockCoordinator {
    pub fn new(mounts: Arc<MountManager>, provider: Arc<dyn LockingProvider>, root: impl Into<String>) -> Self {
        Self {
            mounts,
            provider,
            root: root.into(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.provider.is_noop()
    }

    pub fn provider(&self) -> &Arc<dyn LockingProvider> {
        &self.provider
    }

    /// The mount holding the lock for `path`. With `use_parent_mount`, a
    /// mount root is locked as an entry of the mount containing it.
    pub fn get_mount_for_lock(&self, path: &str, use_parent_mount: bool) -> Arc<MountPoint> {
        let mount = self.mounts.find(path);
        if use_parent_mount && mount.get_internal_path(path).is_empty() && path != "/" {
            return self.mounts.find(dirname(path));
        }
        mount
    }

    /// Ancestors of `path` inside the view root, nearest first.
    fn ancestors(&self, path: &str) -> Vec<String> {
        let Some(relative) = path.strip_prefix(self.root.trim_end_matches('/')) else {
            return Vec::new();
        };
        // `/alice/filesx` is not below `/alice/files`
        if !relative.is_empty() && !relative.starts_with('/') {
            return Vec::new();
        }
        let mut out: Vec<String> = parents(relative).iter().map(|p| join(&self.root, p)).collect();
        out.reverse();
        out
    }

    // ========================================================================
    // Single path
    // ========================================================================

    /// Lock one path. `Ok(false)` when the path is not lockable.
    pub fn lock_path(&self, path: &str, lock_type: LockType, lock_mount_point: bool) -> VfsResult<bool> {
        if self.provider.is_noop() || !should_lock_file(path) {
            return Ok(false);
        }
        let mount = self.get_mount_for_lock(path, lock_mount_point);
        let internal = mount.get_internal_path(path);
        match mount.storage().acquire_lock(&internal, lock_type, self.provider.as_ref()) {
            Ok(()) => Ok(true),
            Err(e) if e.is_locked() => {
                warn!(path, %lock_type, mount = %mount, "lock conflict");
                Err(VfsError::locked(path, lock_type))
            }
            Err(e) => Err(e),
        }
    }

    pub fn change_path(&self, path: &str, lock_type: LockType, lock_mount_point: bool) -> VfsResult<bool> {
        if self.provider.is_noop() || !should_lock_file(path) {
            return Ok(false);
        }
        let mount = self.get_mount_for_lock(path, lock_mount_point);
        let internal = mount.get_internal_path(path);
        match mount.storage().change_lock(&internal, lock_type, self.provider.as_ref()) {
            Ok(()) => Ok(true),
            Err(e) if e.is_locked() => {
                warn!(path, %lock_type, mount = %mount, "lock change refused");
                Err(VfsError::locked(path, lock_type))
            }
            Err(e) => Err(e),
        }
    }

    pub fn unlock_path(&self, path: &str, lock_type: LockType, lock_mount_point: bool) -> bool {
        if self.provider.is_noop() || !should_lock_file(path) {
            return false;
        }
        let mount = self.get_mount_for_lock(path, lock_mount_point);
        let internal = mount.get_internal_path(path);
        mount.storage().release_lock(&internal, lock_type, self.provider.as_ref());
        true
    }

    // ========================================================================
    // Path plus ancestors
    // ========================================================================

    /// Lock `path` with `lock_type` and its ancestors shared.
    pub fn lock_file(&self, path: &str, lock_type: LockType, lock_mount_point: bool) -> VfsResult<bool> {
        if self.provider.is_noop() || !should_lock_file(path) {
            return Ok(false);
        }
        self.lock_path(path, lock_type, lock_mount_point)?;

        let mut taken: Vec<String> = Vec::new();
        for parent in self.ancestors(path) {
            match self.lock_path(&parent, LockType::Shared, false) {
                Ok(true) => taken.push(parent),
                Ok(false) => {}
                Err(e) => {
                    for held in taken.iter().rev() {
                        self.unlock_path(held, LockType::Shared, false);
                    }
                    self.unlock_path(path, lock_type, lock_mount_point);
                    return Err(e);
                }
            }
        }
        Ok(true)
    }

    /// Convert the lock on `path`; ancestors keep their shared locks.
    pub fn change_lock(&self, path: &str, lock_type: LockType, lock_mount_point: bool) -> VfsResult<bool> {
        self.change_path(path, lock_type, lock_mount_point)
    }

    /// Release what [`lock_file`](Self::lock_file) took, farthest ancestor
    /// first.
    pub fn unlock_file(&self, path: &str, lock_type: LockType, lock_mount_point: bool) -> bool {
        if self.provider.is_noop() || !should_lock_file(path) {
            return false;
        }
        for parent in self.ancestors(path).iter().rev() {
            self.unlock_path(parent, LockType::Shared, false);
        }
        self.unlock_path(path, lock_type, lock_mount_point)
    }

    /// [`lock_file`](Self::lock_file) bound to a guard that unlocks on drop.
    pub fn guard(&self, path: &str, lock_type: LockType, lock_mount_point: bool) -> VfsResult<PathLockGuard> {
        let held = self.lock_file(path, lock_type, lock_mount_point)?;
        Ok(PathLockGuard {
            coordinator: self.clone(),
            path: path.to_string(),
            lock_type,
            lock_mount_point,
            held,
        })
    }
}

/// A held path lock. Dropping it releases the lock in its current type.
#[derive(Debug)]
pub struct PathLockGuard {
    coordinator: LockCoordinator,
    path: String,
    lock_type: LockType,
    lock_mount_point: bool,
    held: bool,
}

impl PathLockGuard {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn lock_type(&self) -> LockType {
        self.lock_type
    }

    /// Convert the held lock. On failure the guard keeps the old type.
    pub fn change(&mut self, lock_type: LockType) -> VfsResult<()> {
        if self.held && self.lock_type != lock_type {
            self.coordinator.change_lock(&self.path, lock_type, self.lock_mount_point)?;
        }
        self.lock_type = lock_type;
        Ok(())
    }

    pub fn release(mut self) {
        self.unlock();
    }

    fn unlock(&mut self) {
        if std::mem::take(&mut self.held) {
            self.coordinator.unlock_file(&self.path, self.lock_type, self.lock_mount_point);
        }
    }
}

impl Drop for PathLockGuard {
    fn drop(&mut self) {
        self.unlock();
    }
}
