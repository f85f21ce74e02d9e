//! Rename and copy, including moves across storages and moves of whole
//! mounts.

use std::sync::Arc;

use cumulus_types::LockType;
use tracing::{debug, info};

use super::View;
use crate::error::{InvalidPathReason, VfsError, VfsResult};
use crate::hooks::{FileSignal, HookEvent, MoveSignal};
use crate::mount::{MountKind, MountPoint};
use crate::path::{dirname, is_partial_file};
use crate::storage::check_name;

/// What hooks a rename announces.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RenameHooks {
    /// A partial upload becoming its final file: a write on the target.
    Upload(Vec<FileSignal>),
    /// A plain move.
    Move,
    /// Nothing to announce.
    Silent,
}

/// Refuse moves that would carry mounts somewhere they can't live.
pub(crate) fn validate_mount_move(
    moved: &[Arc<MountPoint>],
    source_parent: &MountPoint,
    target_mount: &MountPoint,
    target_is_shared: bool,
) -> VfsResult<()> {
    for mount in moved {
        if !mount.is_moveable() {
            return Err(VfsError::forbidden(format!("storage at {} cannot be moved", mount)));
        }
        if source_parent.mount_point() != target_mount.mount_point() {
            return Err(VfsError::forbidden(format!(
                "moving storage {} into another storage is not allowed",
                mount
            )));
        }
        if target_is_shared {
            return Err(VfsError::forbidden(format!(
                "moving storage {} into a shared folder is not allowed",
                mount
            )));
        }
    }
    Ok(())
}

impl View {
    /// Whether an absolute target lies in something its owner shares.
    fn target_is_shared(&self, absolute: &str, target_mount: &MountPoint) -> bool {
        if target_mount.kind() == MountKind::Shared {
            return true;
        }
        let Some(shares) = self.state.shares.as_ref() else {
            return false;
        };
        let Some(owner) = absolute.trim_start_matches('/').split('/').next() else {
            return false;
        };
        shares.is_shared(owner, absolute)
    }

    fn emit_move(&self, signal: MoveSignal, source: &str, target: &str) -> bool {
        self.emit(HookEvent::moved(signal, self.hook_path(source), self.hook_path(target)))
    }

    /// Move `source` to `target`. A mount root is moved as a mount; folders
    /// that hold mounts carry them along.
    #[tracing::instrument(skip(self), name = "view.rename")]
    pub fn rename(&self, source: &str, target: &str) -> VfsResult<bool> {
        let abs_source = self.absolute(source)?;
        let abs_target = self.checked(target)?;
        if abs_target.starts_with(&format!("{}/", abs_source.trim_end_matches('/'))) {
            return Err(VfsError::invalid_path(target, InvalidPathReason::MoveIntoSelf));
        }
        let source = self.relative_or_err(&abs_source)?;
        let target = self.relative_or_err(&abs_target)?;

        let target_mount = self.mount_for(&abs_target)?;
        let target_internal = target_mount.get_internal_path(&abs_target);
        let target_storage = target_mount.storage();
        check_name(target_storage.as_ref(), &target_internal, &self.state.validator)?;

        let part = self.partial_extension().to_string();
        let source_partial = is_partial_file(&source, &part);
        let target_partial = is_partial_file(&target, &part);

        let mut source_guard = self.lock_guard(&abs_source, LockType::Shared, true)?;
        let mut target_guard = self.lock_guard(&abs_target, LockType::Shared, true)?;

        let emit = self.should_emit_hooks(&source) || self.should_emit_hooks(&target);
        let hooks = if target_partial || !emit {
            RenameHooks::Silent
        } else if source_partial {
            RenameHooks::Upload(Self::file_hooks(self.file_exists(&target)?).to_vec())
        } else {
            RenameHooks::Move
        };

        let run = match &hooks {
            RenameHooks::Upload(signals) => self.run_pre_hooks(signals, &target),
            RenameHooks::Move => self.emit_move(MoveSignal::Rename, &source, &target),
            RenameHooks::Silent => true,
        };
        if !run {
            debug!(source, target, "rename vetoed");
            return Ok(false);
        }

        source_guard.change(LockType::Exclusive)?;
        target_guard.change(LockType::Exclusive)?;

        let source_mount = self.mount_for(&abs_source)?;
        let source_internal = source_mount.get_internal_path(&abs_source);
        let source_storage = source_mount.storage();
        let moved_mounts = self.state.mounts.find_in(&abs_source);
        let target_shared = self.target_is_shared(&abs_target, &target_mount);

        let result = if source_internal.is_empty() {
            let source_parent = self.mount_for(dirname(&abs_source))?;
            validate_mount_move(
                std::slice::from_ref(&source_mount),
                &source_parent,
                &target_mount,
                target_shared,
            )?;
            self.move_mount(&source_mount, &abs_target)?
        } else {
            validate_mount_move(&moved_mounts, &source_mount, &target_mount, target_shared)?;
            let moved = if Arc::ptr_eq(&source_mount, &target_mount) || source_storage.id() == target_storage.id() {
                target_storage.rename(&source_internal, &target_internal)?
            } else {
                target_storage.move_from_storage(source_storage.as_ref(), &source_internal, &target_internal)?
            };
            if moved {
                for mount in &moved_mounts {
                    let rest = mount.mount_point();
                    let suffix = rest.strip_prefix(abs_source.as_str()).unwrap_or_default();
                    self.move_mount(mount, &format!("{}{}", abs_target, suffix))?;
                }
            }
            moved
        };

        if result {
            if source_partial && !target_partial {
                self.write_update(target_storage.as_ref(), &target_internal, None)?;
            } else if !source_internal.is_empty() {
                self.rename_update(source_storage.as_ref(), target_storage.as_ref(), &source_internal, &target_internal)?;
            }
        } else if !source_internal.is_empty()
            && !target_storage.file_exists(&target_internal)?
            && target_storage.cache().in_cache(&target_internal)
        {
            // a failed single-file move may leave a stale row behind
            self.remove_update(target_storage.as_ref(), &target_internal)?;
        }

        source_guard.change(LockType::Shared)?;
        target_guard.change(LockType::Shared)?;

        if result {
            match &hooks {
                RenameHooks::Upload(signals) => self.run_post_hooks(signals, &target),
                RenameHooks::Move => {
                    self.emit_move(MoveSignal::PostRename, &source, &target);
                }
                RenameHooks::Silent => {}
            }
        }
        drop(target_guard);
        drop(source_guard);
        Ok(result)
    }

    /// Ask the mount's owner to persist the new prefix, then re-register it.
    fn move_mount(&self, mount: &Arc<MountPoint>, target: &str) -> VfsResult<bool> {
        let Some(lifecycle) = mount.lifecycle() else {
            return Ok(false);
        };
        if !lifecycle.move_mount(mount, target)? {
            return Ok(false);
        }
        let from = mount.mount_point();
        self.state.mounts.move_mount(mount, target);
        info!(from, to = target, "mount moved");
        Ok(true)
    }

    /// Copy `source` to `target`, across storages when needed.
    #[tracing::instrument(skip(self), name = "view.copy")]
    pub fn copy(&self, source: &str, target: &str) -> VfsResult<bool> {
        let abs_source = self.absolute(source)?;
        let abs_target = self.checked(target)?;
        let source = self.relative_or_err(&abs_source)?;
        let target = self.relative_or_err(&abs_target)?;

        let mut target_guard = self.lock_guard(&abs_target, LockType::Shared, false)?;
        let source_guard = self.lock_guard(&abs_source, LockType::Shared, false)?;

        let target_mount = self.mount_for(&abs_target)?;
        let target_internal = target_mount.get_internal_path(&abs_target);
        let target_storage = target_mount.storage();
        check_name(target_storage.as_ref(), &target_internal, &self.state.validator)?;

        let emit = self.should_emit_hooks(&source) || self.should_emit_hooks(&target);
        let signals = Self::file_hooks(self.file_exists(&target)?);
        if emit {
            let mut run = self.emit_move(MoveSignal::Copy, &source, &target);
            run &= self.run_pre_hooks(&signals, &target);
            if !run {
                debug!(source, target, "copy vetoed");
                return Ok(false);
            }
        }

        target_guard.change(LockType::Exclusive)?;

        let source_mount = self.mount_for(&abs_source)?;
        let source_internal = source_mount.get_internal_path(&abs_source);
        let source_storage = source_mount.storage();

        let result = if Arc::ptr_eq(&source_mount, &target_mount) {
            target_storage.copy(&source_internal, &target_internal)?
        } else {
            target_storage.copy_from_storage(source_storage.as_ref(), &source_internal, &target_internal)?
        };
        if result {
            self.copy_update(source_storage.as_ref(), target_storage.as_ref(), &source_internal, &target_internal)?;
        }

        target_guard.change(LockType::Shared)?;
        if result && emit {
            self.emit_move(MoveSignal::PostCopy, &source, &target);
            self.run_post_hooks(&signals, &target);
        }
        drop(source_guard);
        drop(target_guard);
        Ok(result)
    }
}
