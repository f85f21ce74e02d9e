//! Integration tests for path locking through a view.

use std::sync::Arc;

use cumulus_vfs::lock::storage_lock_key;
use cumulus_vfs::mount::MountPoint;
use cumulus_vfs::{
    FileSystemContext, LockType, MemoryLockingProvider, MemoryStorage, MemoryUserManager, MountLifecycle, VfsConfig,
    VfsError, VfsResult, View,
};

fn setup(config: VfsConfig) -> (FileSystemContext, Arc<View>, Arc<MemoryLockingProvider>) {
    cumulus_telemetry::init_test_tracing();
    let locks = Arc::new(MemoryLockingProvider::new());
    let ctx = FileSystemContext::builder(config)
        .with_users(Arc::new(MemoryUserManager::with_users(["alice"])))
        .with_locking(locks.clone())
        .build();
    let view = ctx.init("alice", "/alice/files").unwrap();
    (ctx, view, locks)
}

struct Keep;

impl MountLifecycle for Keep {
    fn move_mount(&self, _mount: &MountPoint, _target: &str) -> VfsResult<bool> {
        Ok(true)
    }

    fn remove_mount(&self, _mount: &MountPoint) -> VfsResult<bool> {
        Ok(true)
    }
}

// ============================================================================
// Conflicts
// ============================================================================

#[test]
fn test_exclusive_lock_conflicts() {
    let (_ctx, view, locks) = setup(VfsConfig::default());

    assert!(view.lock_file("/doc.txt", LockType::Exclusive, false).unwrap());
    match view.lock_file("/doc.txt", LockType::Shared, false) {
        Err(VfsError::Locked { path, lock_type }) => {
            assert_eq!(path, "/alice/files/doc.txt");
            assert_eq!(lock_type, LockType::Shared);
        }
        other => panic!("expected a lock conflict, got {other:?}"),
    }

    assert!(view.unlock_file("/doc.txt", LockType::Exclusive, false).unwrap());
    assert!(view.lock_file("/doc.txt", LockType::Shared, false).unwrap());
    assert!(view.lock_file("/doc.txt", LockType::Shared, false).unwrap());
    view.unlock_file("/doc.txt", LockType::Shared, false).unwrap();
    view.unlock_file("/doc.txt", LockType::Shared, false).unwrap();
    assert_eq!(locks.held_locks(), 0);
}

#[test]
fn test_first_mutation_after_init_resolves_mounts_before_locking() {
    let (ctx, view, locks) = setup(VfsConfig::default());

    assert!(view.mkdir("/newdir").unwrap());
    assert_eq!(locks.held_locks(), 0);
    let stats = locks.stats();
    assert!(stats.acquired > 0);
    assert_eq!(stats.acquired, stats.released);
    assert_eq!(stats.conflicts, 0);
    assert_eq!(ctx.find_mount("/alice/files/newdir").unwrap().mount_point(), "/alice");

    // explicit locking as the first call keys on the home storage too
    let (_ctx, view, locks) = setup(VfsConfig::default());
    assert!(view.lock_file("/other.txt", LockType::Exclusive, false).unwrap());
    let key = storage_lock_key("home::alice", "files/other.txt");
    assert!(locks.is_locked(&key, LockType::Exclusive));
    view.unlock_file("/other.txt", LockType::Exclusive, false).unwrap();
    assert_eq!(locks.held_locks(), 0);
}

#[test]
fn test_ancestors_are_share_locked() {
    let (_ctx, view, locks) = setup(VfsConfig::default());

    view.lock_file("/a/b/c.txt", LockType::Exclusive, false).unwrap();
    assert_eq!(locks.held_locks(), 3);

    // siblings can still be read and written
    assert!(view.lock_file("/a/other.txt", LockType::Exclusive, false).unwrap());
    view.unlock_file("/a/other.txt", LockType::Exclusive, false).unwrap();

    // but a parent cannot be taken exclusively
    assert!(view.lock_file("/a", LockType::Exclusive, false).unwrap_err().is_locked());
    assert_eq!(locks.held_locks(), 3);

    view.unlock_file("/a/b/c.txt", LockType::Exclusive, false).unwrap();
    assert_eq!(locks.held_locks(), 0);
    let stats = locks.stats();
    assert_eq!(stats.acquired, stats.released);
}

#[test]
fn test_upgrade_refused_while_shared_elsewhere() {
    let (_ctx, view, locks) = setup(VfsConfig::default());

    view.lock_file("/doc.txt", LockType::Shared, false).unwrap();
    view.lock_file("/doc.txt", LockType::Shared, false).unwrap();
    assert!(view.change_lock("/doc.txt", LockType::Exclusive, false).unwrap_err().is_locked());

    view.unlock_file("/doc.txt", LockType::Shared, false).unwrap();
    assert!(view.change_lock("/doc.txt", LockType::Exclusive, false).unwrap());
    assert!(view.change_lock("/doc.txt", LockType::Shared, false).unwrap());
    view.unlock_file("/doc.txt", LockType::Shared, false).unwrap();
    assert_eq!(locks.held_locks(), 0);
}

#[test]
fn test_open_writer_blocks_readers() {
    let (_ctx, view, locks) = setup(VfsConfig::default());
    view.file_put_contents("/doc.txt", b"v1").unwrap();

    let writer = view.fopen("/doc.txt", "w").unwrap().unwrap();
    assert!(view.file_get_contents("/doc.txt").unwrap_err().is_locked());
    writer.close().unwrap();

    assert!(view.file_get_contents("/doc.txt").unwrap().is_some());
    assert_eq!(locks.held_locks(), 0);
}

// ============================================================================
// Mount roots
// ============================================================================

#[test]
fn test_mount_root_lock_survives_a_move() {
    let (ctx, view, locks) = setup(VfsConfig::default());
    let share = ctx.mounts().add_mount(
        MountPoint::new("/alice/files/share", Arc::new(MemoryStorage::new())).with_lifecycle(Arc::new(Keep)),
    );

    assert!(view.lock_file("/share", LockType::Exclusive, true).unwrap());
    let home_key = storage_lock_key("home::alice", "files/share");
    assert!(locks.is_locked(&home_key, LockType::Exclusive));

    // the mount moves away; the lock key was taken in the parent mount
    ctx.mounts().move_mount(&share, "/alice/files/elsewhere");
    view.unlock_file("/share", LockType::Exclusive, true).unwrap();
    assert_eq!(locks.held_locks(), 0);
}

// ============================================================================
// Lock scope
// ============================================================================

#[test]
fn test_disabled_locking_is_a_noop() {
    let (_ctx, view, locks) = setup(VfsConfig::default().with_file_locking(false));
    // an explicit provider still wins over the config switch
    assert!(view.lock_file("/doc.txt", LockType::Exclusive, false).unwrap());
    view.unlock_file("/doc.txt", LockType::Exclusive, false).unwrap();
    assert_eq!(locks.held_locks(), 0);

    let ctx = FileSystemContext::builder(VfsConfig::default().with_file_locking(false))
        .with_users(Arc::new(MemoryUserManager::with_users(["alice"])))
        .build();
    let view = ctx.init("alice", "/alice/files").unwrap();
    assert!(!view.lock_file("/doc.txt", LockType::Exclusive, false).unwrap());
    assert!(!view.lock_file("/doc.txt", LockType::Exclusive, false).unwrap());
    assert_eq!(view.file_put_contents("/doc.txt", b"x").unwrap(), Some(1));
}

#[test]
fn test_only_user_files_are_locked() {
    let (ctx, view, _locks) = setup(VfsConfig::default());
    assert!(view.should_lock_file("/doc.txt").unwrap());
    assert!(!view.should_lock_file("/").unwrap());

    let user_root = ctx.view("/alice");
    assert!(!user_root.should_lock_file("/cache/thumb.png").unwrap());
    assert!(user_root.should_lock_file("/files/doc.txt").unwrap());

    let global = ctx.view("/");
    assert!(!global.should_lock_file("/appdata_oc1/preview/1.png").unwrap());
    assert!(!user_root.lock_file("/cache/thumb.png", LockType::Exclusive, false).unwrap());
}
