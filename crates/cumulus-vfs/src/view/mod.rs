//! The per-root filesystem facade.
//!
//! A [`View`] takes paths relative to its root, makes sure the mounts that
//! cover them are set up, resolves them to a storage and an internal path,
//! and runs each mutation through the same sequence: validate, lock shared,
//! pre-hooks (which can veto), upgrade to exclusive, call the storage,
//! update the cache, downgrade, post-hooks, unlock.
//!
//! Backend refusals come back as `Ok(false)` / `Ok(None)`; validation,
//! lock conflicts and lookups that must succeed come back as errors.

mod info;
mod rename;
mod stream;

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cumulus_types::{CacheUpdate, FileType, LockType};
use tracing::{debug, info};

pub use info::IncludeMounts;
pub use stream::ViewFile;

use crate::cache::{Updater, unix_now};
use crate::context::ContextState;
use crate::error::{InvalidPathReason, VfsError, VfsResult};
use crate::hooks::{FileSignal, HookDecision, HookEvent, MountSignal};
use crate::lock::{LockCoordinator, PathLockGuard};
use crate::mount::MountPoint;
use crate::path::{basename, dirname, is_partial_file, is_valid_path, join};
use crate::storage::wrapper::Declined;
use crate::storage::{FileStat, FreeSpace, HashAlgorithm, OpenMode, Storage, check_name};

/// Storage results that can report whether the backend went along.
pub(crate) trait Outcome: Declined {
    fn succeeded(&self) -> bool;
}

impl Outcome for bool {
    fn succeeded(&self) -> bool {
        *self
    }
}

impl<T> Outcome for Option<T> {
    fn succeeded(&self) -> bool {
        self.is_some()
    }
}

/// Cache maintenance after a successful storage call.
#[derive(Debug, Clone, Copy)]
pub(crate) enum CacheEffect {
    None,
    Write(Option<i64>),
    Remove,
}

pub struct View {
    state: Arc<ContextState>,
    root: String,
    locks: LockCoordinator,
    update_cache: AtomicBool,
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View").field("root", &self.root).finish()
    }
}

fn clean_root(root: &str) -> String {
    let root = root.trim_end_matches('/');
    if root.is_empty() {
        "/".to_string()
    } else if root.starts_with('/') {
        root.to_string()
    } else {
        format!("/{}", root)
    }
}

impl View {
    pub(crate) fn new(state: Arc<ContextState>, root: &str) -> Self {
        let root = clean_root(root);
        let locks = LockCoordinator::new(state.mounts.clone(), state.locking.clone(), root.clone());
        Self {
            state,
            root,
            locks,
            update_cache: AtomicBool::new(true),
        }
    }

    // ========================================================================
    // Roots and path translation
    // ========================================================================

    pub fn get_root(&self) -> &str {
        &self.root
    }

    /// Re-root the view.
    pub fn chroot(&mut self, root: &str) {
        self.root = clean_root(root);
        self.locks = LockCoordinator::new(self.state.mounts.clone(), self.state.locking.clone(), self.root.clone());
    }

    fn assert_path_length(&self, path: &str) -> VfsResult<()> {
        if path.len() > self.state.config.effective_max_path_length() {
            return Err(VfsError::invalid_path(path, InvalidPathReason::PathTooLong));
        }
        Ok(())
    }

    /// Absolute path for a view path, without normalization.
    pub fn get_absolute_path(&self, path: &str) -> VfsResult<String> {
        self.assert_path_length(path)?;
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        Ok(join(&self.root, &path))
    }

    /// View path for an absolute path, or `None` outside the root.
    pub fn get_relative_path(&self, path: &str) -> Option<String> {
        let path = self.state.normalizer.normalize(path);
        if self.root == "/" {
            return Some(path);
        }
        if path == self.root {
            return Some("/".to_string());
        }
        path.strip_prefix(&format!("{}/", self.root))
            .map(|rest| format!("/{}", rest))
    }

    /// Normalized absolute path, rejecting `..` traversal.
    fn absolute(&self, path: &str) -> VfsResult<String> {
        if !is_valid_path(path) {
            return Err(VfsError::invalid_path(path, InvalidPathReason::Traversal));
        }
        let absolute = self.get_absolute_path(path)?;
        Ok(self.state.normalizer.normalize(&absolute))
    }

    /// [`absolute`](Self::absolute) plus the forbidden-name check.
    fn checked(&self, path: &str) -> VfsResult<String> {
        let absolute = self.absolute(path)?;
        if self.state.validator.is_forbidden(basename(&absolute)) {
            return Err(VfsError::invalid_path(path, InvalidPathReason::ReservedWord));
        }
        Ok(absolute)
    }

    fn relative_or_err(&self, absolute: &str) -> VfsResult<String> {
        self.get_relative_path(absolute)
            .ok_or_else(|| VfsError::path_escapes_root(absolute))
    }

    /// Mount owning an absolute path, set up on demand.
    pub(crate) fn mount_for(&self, absolute: &str) -> VfsResult<Arc<MountPoint>> {
        self.state.setup.setup_for_path(absolute, false)?;
        Ok(self.state.mounts.find(absolute))
    }

    /// Mounts below an absolute path, their providers set up on demand.
    pub(crate) fn mounts_in(&self, absolute: &str) -> VfsResult<Vec<Arc<MountPoint>>> {
        self.state.setup.setup_for_path(absolute, true)?;
        Ok(self.state.mounts.find_in(absolute))
    }

    fn resolve_absolute(&self, absolute: &str) -> VfsResult<(Arc<dyn Storage>, String)> {
        let mount = self.mount_for(absolute)?;
        Ok((mount.storage(), mount.get_internal_path(absolute)))
    }

    /// Storage and internal path for a view path.
    pub fn resolve_path(&self, path: &str) -> VfsResult<(Arc<dyn Storage>, String)> {
        let absolute = self.absolute(path)?;
        self.resolve_absolute(&absolute)
    }

    pub fn get_mount(&self, path: &str) -> VfsResult<Arc<MountPoint>> {
        let absolute = self.absolute(path)?;
        self.mount_for(&absolute)
    }

    pub fn get_mount_point(&self, path: &str) -> VfsResult<String> {
        Ok(self.get_mount(path)?.mount_point())
    }

    /// Local filesystem path backing `path`, for storages that have one.
    pub fn get_local_file(&self, path: &str) -> VfsResult<Option<PathBuf>> {
        let (storage, internal) = self.resolve_path(path)?;
        storage.local_file(&internal)
    }

    /// `/<user>/files/a/b` → `a/b`.
    pub fn get_path_relative_to_files(&self, absolute: &str) -> VfsResult<String> {
        let mut parts = absolute.trim_matches('/').splitn(3, '/');
        let _user = parts.next();
        if parts.next() != Some("files") {
            return Err(VfsError::not_found(format!("{} is not under the files folder", absolute)));
        }
        Ok(parts.next().unwrap_or_default().to_string())
    }

    // ========================================================================
    // Hooks
    // ========================================================================

    fn partial_extension(&self) -> &str {
        &self.state.config.part_file_extension
    }

    /// Hooks fire only for views inside the default view and never for
    /// partial files.
    pub(crate) fn should_emit_hooks(&self, path: &str) -> bool {
        if !path.is_empty() && is_partial_file(path, self.partial_extension()) {
            return false;
        }
        let Some(default_root) = self.state.default_root() else {
            return false;
        };
        if self.root == default_root {
            return true;
        }
        let Ok(full) = self.absolute(path) else {
            return false;
        };
        full == default_root || full.starts_with(&format!("{}/", default_root.trim_end_matches('/')))
    }

    /// `path` as seen from the default view.
    pub(crate) fn hook_path(&self, path: &str) -> String {
        let Some(default_root) = self.state.default_root() else {
            return path.to_string();
        };
        let Ok(full) = self.absolute(path) else {
            return path.to_string();
        };
        if default_root == "/" {
            return full;
        }
        if full == default_root {
            return "/".to_string();
        }
        full.strip_prefix(&format!("{}/", default_root))
            .map(|rest| format!("/{}", rest))
            .unwrap_or(full)
    }

    pub(crate) fn emit(&self, event: HookEvent) -> bool {
        self.state.hooks.emit(&event) != HookDecision::Veto
    }

    /// Run pre-signals; `false` when any listener vetoed.
    pub(crate) fn run_pre_hooks(&self, hooks: &[FileSignal], path: &str) -> bool {
        if !self.should_emit_hooks(path) {
            return true;
        }
        let hook_path = self.hook_path(path);
        let mut run = true;
        for signal in hooks {
            run &= self.emit(HookEvent::file(*signal, hook_path.clone()));
        }
        run
    }

    pub(crate) fn run_post_hooks(&self, hooks: &[FileSignal], path: &str) {
        if !self.should_emit_hooks(path) {
            return;
        }
        let hook_path = self.hook_path(path);
        for signal in hooks.iter().filter_map(|s| s.post()) {
            self.emit(HookEvent::file(signal, hook_path.clone()));
        }
    }

    pub(crate) fn file_hooks(exists: bool) -> [FileSignal; 2] {
        if exists {
            [FileSignal::Update, FileSignal::Write]
        } else {
            [FileSignal::Create, FileSignal::Write]
        }
    }

    // ========================================================================
    // Locks
    // ========================================================================

    pub fn should_lock_file(&self, path: &str) -> VfsResult<bool> {
        Ok(crate::lock::should_lock_file(&self.absolute(path)?))
    }

    /// Lock `path` and share-lock its ancestors inside the view.
    /// `lock_mount_point` locks a mount root as an entry of its parent mount.
    pub fn lock_file(&self, path: &str, lock_type: LockType, lock_mount_point: bool) -> VfsResult<bool> {
        let absolute = self.lockable(path)?;
        self.locks.lock_file(&absolute, lock_type, lock_mount_point)
    }

    pub fn unlock_file(&self, path: &str, lock_type: LockType, lock_mount_point: bool) -> VfsResult<bool> {
        let absolute = self.lockable(path)?;
        Ok(self.locks.unlock_file(&absolute, lock_type, lock_mount_point))
    }

    pub fn change_lock(&self, path: &str, lock_type: LockType, lock_mount_point: bool) -> VfsResult<bool> {
        let absolute = self.lockable(path)?;
        self.locks.change_lock(&absolute, lock_type, lock_mount_point)
    }

    /// Absolute path with its mounts set up, so lock keys come from the
    /// storage that will serve the path.
    fn lockable(&self, path: &str) -> VfsResult<String> {
        let absolute = self.absolute(path)?;
        self.state.setup.setup_for_path(&absolute, false)?;
        Ok(absolute)
    }

    pub(crate) fn lock_guard(&self, absolute: &str, lock_type: LockType, lock_mount_point: bool) -> VfsResult<PathLockGuard> {
        self.state.setup.setup_for_path(absolute, false)?;
        self.locks.guard(absolute, lock_type, lock_mount_point)
    }

    /// Validate a new name for `path`. With `readonly` only the forbidden
    /// list is consulted.
    pub fn verify_path(&self, path: &str, file_name: &str, readonly: bool) -> VfsResult<()> {
        let dir = if path.is_empty() { "/" } else { path };
        if !is_valid_path(dir) {
            return Err(VfsError::invalid_path(path, InvalidPathReason::Traversal));
        }
        if readonly {
            if self.state.validator.is_forbidden(file_name) {
                return Err(VfsError::invalid_path(file_name, InvalidPathReason::ReservedWord));
            }
            return Ok(());
        }
        let (storage, internal) = self.resolve_path(dir)?;
        storage.verify_path(&internal, file_name, &self.state.validator)
    }

    // ========================================================================
    // Cache maintenance
    // ========================================================================

    pub fn disable_cache_update(&self) {
        self.update_cache.store(false, Ordering::SeqCst);
    }

    pub fn enable_cache_update(&self) {
        self.update_cache.store(true, Ordering::SeqCst);
    }

    fn updater<'a>(&self, storage: &'a dyn Storage) -> Updater<'a> {
        Updater::new(storage).with_partial_extension(self.partial_extension())
    }

    pub(crate) fn write_update(&self, storage: &dyn Storage, internal: &str, time: Option<i64>) -> VfsResult<()> {
        if self.update_cache.load(Ordering::SeqCst) {
            self.updater(storage).update(internal, time)?;
        }
        Ok(())
    }

    pub(crate) fn remove_update(&self, storage: &dyn Storage, internal: &str) -> VfsResult<()> {
        if self.update_cache.load(Ordering::SeqCst) {
            self.updater(storage).remove(internal)?;
        }
        Ok(())
    }

    pub(crate) fn rename_update(
        &self,
        source: &dyn Storage,
        target: &dyn Storage,
        source_internal: &str,
        target_internal: &str,
    ) -> VfsResult<()> {
        if self.update_cache.load(Ordering::SeqCst) {
            self.updater(target).rename_from_storage(source, source_internal, target_internal)?;
        }
        Ok(())
    }

    pub(crate) fn copy_update(
        &self,
        source: &dyn Storage,
        target: &dyn Storage,
        source_internal: &str,
        target_internal: &str,
    ) -> VfsResult<()> {
        if self.update_cache.load(Ordering::SeqCst) {
            self.updater(target).copy_from_storage(source, source_internal, target_internal)?;
        }
        Ok(())
    }

    fn apply_effect(&self, effect: CacheEffect, storage: &dyn Storage, internal: &str) -> VfsResult<()> {
        match effect {
            CacheEffect::None => Ok(()),
            CacheEffect::Write(time) => self.write_update(storage, internal, time),
            CacheEffect::Remove => self.remove_update(storage, internal),
        }
    }

    // ========================================================================
    // Operation template
    // ========================================================================

    /// Run one storage call on an already validated absolute path.
    fn basic_operation_at<T: Outcome>(
        &self,
        absolute: &str,
        hooks: &[FileSignal],
        effect: CacheEffect,
        op: impl FnOnce(&dyn Storage, &str) -> VfsResult<T>,
    ) -> VfsResult<T> {
        let path = self.relative_or_err(absolute)?;
        let writes = hooks.iter().any(|h| {
            matches!(
                h,
                FileSignal::Create | FileSignal::Write | FileSignal::Update | FileSignal::Delete | FileSignal::Touch
            )
        });
        let reads = hooks.contains(&FileSignal::Read);

        let mut guard = if writes || reads {
            Some(self.lock_guard(absolute, LockType::Shared, false)?)
        } else {
            None
        };

        let (storage, internal) = self.resolve_absolute(absolute)?;
        if hooks.contains(&FileSignal::Create) {
            check_name(storage.as_ref(), &internal, &self.state.validator)?;
        }

        if !self.run_pre_hooks(hooks, &path) {
            debug!(path, ?hooks, "operation vetoed");
            return Ok(T::declined());
        }

        if writes {
            if let Some(guard) = guard.as_mut() {
                guard.change(LockType::Exclusive)?;
            }
        }

        let result = op(storage.as_ref(), &internal)?;

        if result.succeeded() {
            self.apply_effect(effect, storage.as_ref(), &internal)?;
        }
        if writes {
            if let Some(guard) = guard.as_mut() {
                guard.change(LockType::Shared)?;
            }
        }
        if result.succeeded() {
            self.run_post_hooks(hooks, &path);
        }
        drop(guard);
        Ok(result)
    }

    fn basic_operation<T: Outcome>(
        &self,
        path: &str,
        hooks: &[FileSignal],
        effect: CacheEffect,
        op: impl FnOnce(&dyn Storage, &str) -> VfsResult<T>,
    ) -> VfsResult<T> {
        let absolute = self.checked(path)?;
        self.basic_operation_at(&absolute, hooks, effect, op)
    }

    /// Unlocked, hook-free storage query.
    fn query<T>(&self, path: &str, op: impl FnOnce(&dyn Storage, &str) -> VfsResult<T>) -> VfsResult<T> {
        let (storage, internal) = self.resolve_path(path)?;
        op(storage.as_ref(), &internal)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn is_dir(&self, path: &str) -> VfsResult<bool> {
        if path.trim_matches('/').is_empty() {
            return Ok(true);
        }
        self.query(path, |s, p| s.is_dir(p))
    }

    pub fn is_file(&self, path: &str) -> VfsResult<bool> {
        self.query(path, |s, p| s.is_file(p))
    }

    pub fn file_exists(&self, path: &str) -> VfsResult<bool> {
        if path.trim_matches('/').is_empty() {
            return Ok(true);
        }
        self.query(path, |s, p| s.file_exists(p))
    }

    pub fn filesize(&self, path: &str) -> VfsResult<Option<i64>> {
        self.query(path, |s, p| s.filesize(p))
    }

    pub fn filemtime(&self, path: &str) -> VfsResult<Option<i64>> {
        self.query(path, |s, p| s.filemtime(p))
    }

    pub fn filetype(&self, path: &str) -> VfsResult<Option<FileType>> {
        self.query(path, |s, p| s.filetype(p))
    }

    pub fn stat(&self, path: &str) -> VfsResult<Option<FileStat>> {
        self.query(path, |s, p| s.stat(p))
    }

    pub fn get_mime_type(&self, path: &str) -> VfsResult<Option<String>> {
        self.query(path, |s, p| s.mime_type(p))
    }

    pub fn hash(&self, algorithm: HashAlgorithm, path: &str) -> VfsResult<Option<String>> {
        let absolute = self.absolute(path)?;
        let relative = self.relative_or_err(&absolute)?;
        if self.should_emit_hooks(&relative) {
            self.emit(HookEvent::file(FileSignal::Read, self.hook_path(&relative)));
        }
        let (storage, internal) = self.resolve_absolute(&absolute)?;
        storage.hash(algorithm, &internal)
    }

    pub fn free_space(&self, path: &str) -> VfsResult<FreeSpace> {
        self.query(path, |s, p| s.free_space(p))
    }

    pub fn has_updated(&self, path: &str, time: i64) -> VfsResult<bool> {
        self.query(path, |s, p| s.has_updated(p, time))
    }

    pub fn is_creatable(&self, path: &str) -> VfsResult<bool> {
        self.query(path, |s, p| s.is_creatable(p))
    }

    pub fn is_readable(&self, path: &str) -> VfsResult<bool> {
        self.query(path, |s, p| s.is_readable(p))
    }

    pub fn is_updatable(&self, path: &str) -> VfsResult<bool> {
        self.query(path, |s, p| s.is_updatable(p))
    }

    pub fn is_deletable(&self, path: &str) -> VfsResult<bool> {
        let absolute = self.absolute(path)?;
        let mount = self.mount_for(&absolute)?;
        let internal = mount.get_internal_path(&absolute);
        if internal.is_empty() {
            return Ok(mount.is_moveable());
        }
        mount.storage().is_deletable(&internal)
    }

    pub fn is_sharable(&self, path: &str) -> VfsResult<bool> {
        self.query(path, |s, p| s.is_sharable(p))
    }

    #[tracing::instrument(skip(self), name = "view.read_dir")]
    pub fn read_dir(&self, path: &str) -> VfsResult<Option<Vec<String>>> {
        self.basic_operation(path, &[FileSignal::Read], CacheEffect::None, |s, p| s.read_dir(p))
    }

    // ========================================================================
    // Content
    // ========================================================================

    #[tracing::instrument(skip(self), name = "view.file_get_contents")]
    pub fn file_get_contents(&self, path: &str) -> VfsResult<Option<Vec<u8>>> {
        self.basic_operation(path, &[FileSignal::Read], CacheEffect::None, |s, p| s.file_get_contents(p))
    }

    #[tracing::instrument(skip(self, data), name = "view.file_put_contents")]
    pub fn file_put_contents(&self, path: &str, data: &[u8]) -> VfsResult<Option<u64>> {
        let absolute = self.checked(path)?;
        let exists = self.file_exists(path)?;
        self.basic_operation_at(&absolute, &Self::file_hooks(exists), CacheEffect::Write(None), |s, p| {
            s.file_put_contents(p, data)
        })
    }

    /// Write a stream into `path` under an exclusive lock.
    #[tracing::instrument(skip(self, data), name = "view.file_put_stream")]
    pub fn file_put_stream(&self, path: &str, data: &mut dyn Read) -> VfsResult<Option<u64>> {
        let absolute = self.checked(path)?;
        let relative = self.relative_or_err(&absolute)?;
        let mut guard = self.lock_guard(&absolute, LockType::Shared, false)?;
        let exists = self.file_exists(path)?;
        let hooks = Self::file_hooks(exists);

        let (storage, internal) = self.resolve_absolute(&absolute)?;
        if !exists {
            check_name(storage.as_ref(), &internal, &self.state.validator)?;
        }
        if !self.run_pre_hooks(&hooks, &relative) {
            return Ok(None);
        }
        guard.change(LockType::Exclusive)?;

        let Some(mut target) = storage.fopen(&internal, OpenMode::Write { read: false })? else {
            return Ok(None);
        };
        let written = std::io::copy(data, &mut target)?;
        target.flush()?;
        drop(target);

        self.write_update(storage.as_ref(), &internal, None)?;
        guard.change(LockType::Shared)?;
        self.run_post_hooks(&hooks, &relative);
        Ok(Some(written))
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    #[tracing::instrument(skip(self), name = "view.mkdir")]
    pub fn mkdir(&self, path: &str) -> VfsResult<bool> {
        self.basic_operation(
            path,
            &[FileSignal::Create, FileSignal::Write],
            CacheEffect::Write(None),
            |s, p| s.mkdir(p),
        )
    }

    /// Remove a directory tree. A moveable mount root is unmounted instead.
    #[tracing::instrument(skip(self), name = "view.rmdir")]
    pub fn rmdir(&self, path: &str) -> VfsResult<bool> {
        if path.trim_matches('/').is_empty() {
            return Ok(false);
        }
        let absolute = self.checked(path)?;
        let mount = self.mount_for(&absolute)?;
        let internal = mount.get_internal_path(&absolute);
        if internal.is_empty() {
            return self.remove_mount(&mount, &absolute);
        }

        let result = if self.is_dir(path)? {
            self.basic_operation_at(&absolute, &[FileSignal::Delete], CacheEffect::Remove, |s, p| s.rmdir(p))?
        } else {
            false
        };
        self.clear_ghost(result, path, &mount, &internal)?;
        Ok(result)
    }

    /// Remove a file or directory. On a moveable mount root this unmounts;
    /// on any other mount root it empties the storage.
    #[tracing::instrument(skip(self), name = "view.unlink")]
    pub fn unlink(&self, path: &str) -> VfsResult<bool> {
        if path.trim_matches('/').is_empty() {
            return Ok(false);
        }
        let absolute = self.checked(path)?;
        let mount = self.mount_for(&absolute)?;
        let internal = mount.get_internal_path(&absolute);
        if internal.is_empty() {
            if mount.is_moveable() {
                return self.remove_mount(&mount, &absolute);
            }
            return self.empty_mount_root(path, &mount);
        }

        let result = if self.is_dir(path)? {
            self.basic_operation_at(&absolute, &[FileSignal::Delete], CacheEffect::Remove, |s, p| s.rmdir(p))?
        } else {
            self.basic_operation_at(&absolute, &[FileSignal::Delete], CacheEffect::Remove, |s, p| s.unlink(p))?
        };
        self.clear_ghost(result, path, &mount, &internal)?;
        Ok(result)
    }

    pub fn delete_all(&self, path: &str) -> VfsResult<bool> {
        self.rmdir(path)
    }

    /// A failed delete of something that is gone anyway drops its cache row.
    fn clear_ghost(&self, result: bool, path: &str, mount: &MountPoint, internal: &str) -> VfsResult<()> {
        if !result && !self.file_exists(path)? {
            self.updater(mount.storage().as_ref()).remove(internal)?;
        }
        Ok(())
    }

    fn empty_mount_root(&self, path: &str, mount: &MountPoint) -> VfsResult<bool> {
        let names = mount.storage().read_dir("")?.unwrap_or_default();
        let mut all = true;
        for name in names {
            all &= self.unlink(&join(path, &name))?;
        }
        Ok(all)
    }

    fn remove_mount(&self, mount: &Arc<MountPoint>, absolute: &str) -> VfsResult<bool> {
        let Some(lifecycle) = mount.lifecycle() else {
            return Ok(false);
        };
        let relative = self.relative_or_err(absolute)?;
        let emit = self.should_emit_hooks(&relative);
        let hook_path = self.hook_path(&relative);
        if emit
            && !self.emit(HookEvent::Mount {
                signal: MountSignal::Umount,
                path: hook_path.clone(),
            })
        {
            return Ok(false);
        }
        let removed = lifecycle.remove_mount(mount)?;
        if removed {
            self.state.mounts.remove_mount(&mount.mount_point());
            info!(mount = %mount, "mount removed");
            if emit {
                self.emit(HookEvent::Mount {
                    signal: MountSignal::PostUmount,
                    path: hook_path,
                });
            }
        }
        Ok(removed)
    }

    /// Set the mtime (default now), creating the file when missing. A
    /// backend that refuses gets the mtime written into the cache instead.
    #[tracing::instrument(skip(self), name = "view.touch")]
    pub fn touch(&self, path: &str, mtime: Option<i64>) -> VfsResult<bool> {
        let absolute = self.checked(path)?;
        let exists = self.file_exists(path)?;
        let hooks: &[FileSignal] = if exists {
            &[FileSignal::Touch]
        } else {
            &[FileSignal::Create, FileSignal::Write]
        };
        let mtime = mtime.unwrap_or_else(unix_now);

        let result = match self.basic_operation_at(&absolute, hooks, CacheEffect::Write(Some(mtime)), |s, p| {
            s.touch(p, Some(mtime))
        }) {
            Ok(result) => result,
            Err(e) if e.is_storage_error() => {
                info!(path, error = %e, "setting the modified time failed");
                false
            }
            Err(e) => return Err(e),
        };

        if !result {
            if !self.file_exists(path)? {
                return Ok(false);
            }
            self.put_file_info(path, &CacheUpdate::new().with_mtime(mtime))?;
        }
        Ok(true)
    }

    /// Create every missing ancestor directory of `path`. `false` when one
    /// of them exists as a file.
    pub fn create_parent_directories(&self, path: &str) -> VfsResult<bool> {
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let mut current = String::new();
        for part in parts.iter().take(parts.len().saturating_sub(1)) {
            current.push('/');
            current.push_str(part);
            if self.is_file(&current)? {
                return Ok(false);
            }
            if !self.file_exists(&current)? {
                self.mkdir(&current)?;
            }
        }
        Ok(true)
    }

    // ========================================================================
    // Temporary files
    // ========================================================================

    /// Copy `path` into a temporary file on local disk.
    pub fn to_tmp_file(&self, path: &str) -> VfsResult<Option<tempfile::NamedTempFile>> {
        let Some(mut source) = self.fopen(path, "r")? else {
            return Ok(None);
        };
        let extension = basename(path).rsplit_once('.').map(|(_, ext)| format!(".{}", ext));
        let mut tmp = tempfile::Builder::new()
            .suffix(extension.as_deref().unwrap_or_default())
            .tempfile()?;
        std::io::copy(&mut source, tmp.as_file_mut())?;
        Ok(Some(tmp))
    }

    /// Stream a temporary file into `path`, creating its parents. The
    /// temporary file is removed afterwards.
    pub fn from_tmp_file(&self, tmp: tempfile::NamedTempFile, path: &str) -> VfsResult<Option<u64>> {
        let absolute = self.absolute(path)?;
        let dir = dirname(&absolute).to_string();
        let parent = self.relative_or_err(&dir)?;
        if !self.file_exists(&parent)? && !self.create_parent_directories(path)? {
            return Ok(None);
        }
        let mut source = tmp.reopen()?;
        let written = self.file_put_stream(path, &mut source)?;
        tmp.close()?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VfsConfig;
    use crate::context::FileSystemContext;
    use crate::setup::MemoryUserManager;

    fn view() -> (FileSystemContext, Arc<View>) {
        let ctx = FileSystemContext::builder(VfsConfig::default())
            .with_users(Arc::new(MemoryUserManager::with_users(["alice"])))
            .build();
        let view = ctx.init("alice", "/alice/files").unwrap();
        (ctx, view)
    }

    #[test]
    fn test_relative_and_absolute() {
        let (_ctx, view) = view();
        assert_eq!(view.get_absolute_path("a/b").unwrap(), "/alice/files/a/b");
        assert_eq!(view.get_relative_path("/alice/files/a").unwrap(), "/a");
        assert_eq!(view.get_relative_path("/alice/files").unwrap(), "/");
        assert!(view.get_relative_path("/alice/filesx").is_none());
    }

    #[test]
    fn test_traversal_rejected() {
        let (_ctx, view) = view();
        let err = view.file_get_contents("/a/../../bob/x").unwrap_err();
        assert_eq!(err.invalid_path_reason(), Some(InvalidPathReason::Traversal));
    }

    #[test]
    fn test_path_relative_to_files() {
        let (_ctx, view) = view();
        assert_eq!(view.get_path_relative_to_files("/alice/files/a/b").unwrap(), "a/b");
        assert_eq!(view.get_path_relative_to_files("/alice/files").unwrap(), "");
        assert!(view.get_path_relative_to_files("/alice/cache/x").is_err());
    }

    #[test]
    fn test_write_read_delete() {
        let (_ctx, view) = view();
        assert_eq!(view.file_put_contents("/a.txt", b"hello").unwrap(), Some(5));
        assert_eq!(view.file_get_contents("/a.txt").unwrap().unwrap(), b"hello");
        assert_eq!(view.filesize("/a.txt").unwrap(), Some(5));
        assert!(view.unlink("/a.txt").unwrap());
        assert!(!view.file_exists("/a.txt").unwrap());
    }

    #[test]
    fn test_create_parent_directories() {
        let (_ctx, view) = view();
        assert!(view.create_parent_directories("/x/y/z.txt").unwrap());
        assert!(view.is_dir("/x/y").unwrap());
        assert!(!view.file_exists("/x/y/z.txt").unwrap());

        view.file_put_contents("/f", b"1").unwrap();
        assert!(!view.create_parent_directories("/f/g/h").unwrap());
    }

    #[test]
    fn test_tmp_file_round_trip() {
        let (_ctx, view) = view();
        view.file_put_contents("/src.txt", b"payload").unwrap();
        let tmp = view.to_tmp_file("/src.txt").unwrap().unwrap();
        assert_eq!(view.from_tmp_file(tmp, "/deep/dir/dst.txt").unwrap(), Some(7));
        assert_eq!(view.file_get_contents("/deep/dir/dst.txt").unwrap().unwrap(), b"payload");
    }

    #[test]
    fn test_touch_creates_and_sets_mtime() {
        let (_ctx, view) = view();
        assert!(view.touch("/t.txt", Some(1000)).unwrap());
        assert_eq!(view.filemtime("/t.txt").unwrap(), Some(1000));
    }
}
