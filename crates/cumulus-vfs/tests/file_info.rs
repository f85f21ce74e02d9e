//! Integration tests for metadata aggregation over nested mounts.

use std::sync::Arc;

use md5::{Digest, Md5};

use cumulus_vfs::cache::{ScanMode, Scanner};
use cumulus_vfs::mount::{MountKind, MountPoint};
use cumulus_vfs::{FileSystemContext, IncludeMounts, MemoryStorage, MemoryUserManager, Storage, VfsConfig, View};

/// A scanned memory storage holding one file of `size` bytes.
fn scanned_storage(id: &str, size: usize) -> MemoryStorage {
    let storage = MemoryStorage::with_id(id);
    storage.file_put_contents("data.bin", &vec![7u8; size]).unwrap();
    Scanner::new(&storage).scan("", ScanMode::Recursive).unwrap();
    storage
}

/// alice with 100 bytes at home and 30 bytes in an external mount.
fn setup() -> (FileSystemContext, Arc<View>, Arc<MountPoint>) {
    cumulus_telemetry::init_test_tracing();
    let ctx = FileSystemContext::builder(VfsConfig::default())
        .with_users(Arc::new(MemoryUserManager::with_users(["alice"])))
        .build();
    let view = ctx.init("alice", "/alice/files").unwrap();
    view.file_put_contents("/big.bin", &[1u8; 100]).unwrap();
    let ext = ctx.mounts().add_mount(
        MountPoint::new("/alice/files/ext", Arc::new(scanned_storage("memory::ext", 30))).with_kind(MountKind::External),
    );
    (ctx, view, ext)
}

// ============================================================================
// Size and etag
// ============================================================================

#[test]
fn test_folder_size_includes_mounts() {
    let (_ctx, view, _ext) = setup();

    let all = view.get_file_info("/", IncludeMounts::All).unwrap().unwrap();
    assert_eq!(all.get_size(true), 130);
    assert_eq!(all.get_size(false), 100);
    assert_eq!(all.sub_mounts().len(), 1);

    let own = view.get_file_info("/", IncludeMounts::None).unwrap().unwrap();
    assert_eq!(own.get_size(true), 100);
    assert!(own.sub_mounts().is_empty());
}

#[test]
fn test_folder_etag_digests_mount_roots() {
    let (_ctx, view, ext) = setup();

    let info = view.get_file_info("/", IncludeMounts::All).unwrap().unwrap();
    let root = ext.storage().cache().get("").unwrap();
    let combined = format!(
        "{}::/ext/{}{}",
        info.entry().etag,
        root.etag,
        root.permissions.bits()
    );
    assert_eq!(info.get_etag(), hex::encode(Md5::digest(combined.as_bytes())));

    let plain = view.get_file_info("/", IncludeMounts::None).unwrap().unwrap();
    assert_eq!(plain.get_etag(), plain.entry().etag);
}

#[test]
fn test_writes_inside_a_mount_change_the_parent_etag() {
    let (_ctx, view, _ext) = setup();
    let before = view.get_file_info("/", IncludeMounts::All).unwrap().unwrap();
    let before_etag = before.get_etag();

    view.file_put_contents("/ext/new.txt", b"12345").unwrap();

    // totals were folded on first query and do not see the write
    assert_eq!(before.get_etag(), before_etag);
    assert_eq!(before.get_size(true), 130);

    let after = view.get_file_info("/", IncludeMounts::All).unwrap().unwrap();
    assert_ne!(after.get_etag(), before_etag);
    assert_eq!(after.get_size(true), 135);
    // the home folder itself did not change
    assert_eq!(before.entry().etag, after.entry().etag);
}

#[test]
fn test_external_only_skips_received_shares() {
    let (ctx, view, _ext) = setup();
    ctx.mounts().add_mount(
        MountPoint::new("/alice/files/inbox", Arc::new(scanned_storage("memory::inbox", 7))).with_kind(MountKind::Shared),
    );

    let all = view.get_file_info("/", IncludeMounts::All).unwrap().unwrap();
    assert_eq!(all.get_size(true), 137);
    let external = view.get_file_info("/", IncludeMounts::ExternalOnly).unwrap().unwrap();
    assert_eq!(external.get_size(true), 130);
}

// ============================================================================
// Listings
// ============================================================================

#[test]
fn test_listing_shows_mount_roots() {
    let (_ctx, view, _ext) = setup();

    let contents = view.get_directory_content("/", None).unwrap();
    let ext = contents.iter().find(|info| info.name() == "ext").unwrap();
    assert_eq!(ext.get_size(true), 30);
    assert!(ext.is_mount_root());
    assert!(ext.is_dir());
    assert!(!ext.is_deletable());
    assert_eq!(ext.path(), "/alice/files/ext");

    let big = contents.iter().find(|info| info.name() == "big.bin").unwrap();
    assert_eq!(big.get_size(true), 100);
    assert_eq!(big.owner(), Some("alice"));
}

#[test]
fn test_mount_root_info() {
    let (_ctx, view, ext) = setup();

    let info = view.get_file_info("/ext", IncludeMounts::All).unwrap().unwrap();
    assert_eq!(info.name(), "ext");
    assert_eq!(info.get_size(true), 30);
    assert_eq!(info.storage().id(), ext.storage().id());
    assert!(info.is_mount_root());

    let inside = view.get_file_info("/ext/data.bin", IncludeMounts::All).unwrap().unwrap();
    assert_eq!(inside.internal_path(), "data.bin");
    assert_eq!(inside.get_size(true), 30);
}

#[test]
fn test_owner_and_etag_lookups() {
    let (_ctx, view, _ext) = setup();
    assert_eq!(view.get_owner("/big.bin").unwrap(), "alice");
    assert!(view.get_owner("/missing.bin").is_err());

    assert!(view.get_etag("/big.bin").unwrap().is_some());
    assert!(view.get_etag("/missing.bin").unwrap().is_none());
}
