//! Integration tests for mount resolution and path handling.
//!
//! Longest-prefix routing, the inert fallback root, path normalization and
//! traversal rejection, through the manager and through a view.

use std::sync::Arc;

use cumulus_vfs::mount::{MountKind, MountManager, MountPoint};
use cumulus_vfs::path::{is_valid_path, normalize_path};
use cumulus_vfs::{FileSystemContext, InvalidPathReason, MemoryStorage, MemoryUserManager, Storage, VfsConfig};

fn mount(prefix: &str, id: &str) -> MountPoint {
    MountPoint::new(prefix, Arc::new(MemoryStorage::with_id(id)))
}

// ============================================================================
// Longest prefix
// ============================================================================

#[test]
fn test_longest_prefix_wins() {
    let mounts = MountManager::default();
    mounts.add_mount(mount("/", "memory::root"));
    mounts.add_mount(mount("/alice", "memory::alice"));
    mounts.add_mount(mount("/alice/files/ext", "memory::ext"));

    assert_eq!(mounts.find("/alice/files/ext/a/b.txt").mount_point(), "/alice/files/ext");
    assert_eq!(mounts.find("/alice/files/ext").mount_point(), "/alice/files/ext");
    assert_eq!(mounts.find("/alice/files/extra").mount_point(), "/alice");
    assert_eq!(mounts.find("/alice").mount_point(), "/alice");
    assert_eq!(mounts.find("/bob/files").mount_point(), "/");
}

#[test]
fn test_internal_paths() {
    let mounts = MountManager::default();
    mounts.add_mount(mount("/alice", "memory::alice"));
    let found = mounts.find("/alice/files/a/b.txt");
    assert_eq!(found.get_internal_path("/alice/files/a/b.txt"), "files/a/b.txt");
    assert_eq!(found.get_internal_path("/alice"), "");
    assert_eq!(found.get_internal_path("/alice/"), "");
}

#[test]
fn test_fallback_root_is_inert() {
    let mounts = MountManager::default();
    let found = mounts.find("/nobody/files/x");
    assert_eq!(found.mount_point(), "/");
    assert_eq!(found.kind(), MountKind::Null);
    assert!(!found.storage().file_exists("nobody/files/x").unwrap());
}

#[test]
fn test_find_in_is_strict() {
    let mounts = MountManager::default();
    mounts.add_mount(mount("/alice", "memory::alice"));
    mounts.add_mount(mount("/alice/files/a", "memory::a"));
    mounts.add_mount(mount("/alice/files/a/b", "memory::b"));
    mounts.add_mount(mount("/alice/files/ab", "memory::ab"));

    let nested: Vec<String> = mounts.find_in("/alice/files/a").iter().map(|m| m.mount_point()).collect();
    assert_eq!(nested, vec!["/alice/files/a/b".to_string()]);
    assert_eq!(mounts.find_in("/alice/files").len(), 3);
}

#[test]
fn test_removed_mount_stops_routing() {
    let mounts = MountManager::default();
    mounts.add_mount(mount("/alice", "memory::alice"));
    mounts.add_mount(mount("/alice/files/ext", "memory::ext"));
    assert_eq!(mounts.find("/alice/files/ext/x").mount_point(), "/alice/files/ext");

    assert!(mounts.remove_mount("/alice/files/ext").is_some());
    assert_eq!(mounts.find("/alice/files/ext/x").mount_point(), "/alice");
}

#[test]
fn test_moved_mount_routes_at_new_prefix() {
    let mounts = MountManager::default();
    mounts.add_mount(mount("/alice", "memory::alice"));
    let ext = mounts.add_mount(mount("/alice/files/ext", "memory::ext"));
    mounts.move_mount(&ext, "/alice/files/renamed");

    assert_eq!(mounts.find("/alice/files/renamed/x").mount_point(), "/alice/files/renamed");
    assert_eq!(mounts.find("/alice/files/ext/x").mount_point(), "/alice");
}

// ============================================================================
// Normalization and traversal
// ============================================================================

#[test]
fn test_normalize_is_idempotent() {
    let samples = [
        "",
        "/",
        "a/b",
        "//a///b/",
        "/a/./b/.",
        "\\a\\b",
        "/caf\u{0065}\u{0301}/x",
        "/a/../b",
    ];
    for sample in samples {
        for strip in [true, false] {
            for keep in [true, false] {
                let once = normalize_path(sample, strip, keep);
                assert_eq!(normalize_path(&once, strip, keep), once, "{sample:?}");
            }
        }
    }
}

#[test]
fn test_normalize_shapes() {
    assert_eq!(normalize_path("", true, false), "/");
    assert_eq!(normalize_path("a//b/./c/", true, false), "/a/b/c");
    assert_eq!(normalize_path("a/b/", false, false), "/a/b/");
    assert_eq!(normalize_path("/caf\u{0065}\u{0301}", true, false), "/caf\u{00e9}");
    assert_eq!(normalize_path("/caf\u{0065}\u{0301}", true, true), "/caf\u{0065}\u{0301}");
}

#[test]
fn test_traversal_detection() {
    assert!(is_valid_path("/a/b"));
    assert!(is_valid_path("/a..b/c"));
    assert!(!is_valid_path("/a/../b"));
    assert!(!is_valid_path("/a/.."));
    assert!(!is_valid_path("..\\etc"));
}

#[test]
fn test_view_rejects_traversal_before_resolving() {
    let ctx = FileSystemContext::builder(VfsConfig::default())
        .with_users(Arc::new(MemoryUserManager::with_users(["alice", "bob"])))
        .build();
    let view = ctx.init("alice", "/alice/files").unwrap();

    for path in ["/../../bob/files/x", "/a/../../bob", "/.."] {
        let err = view.file_get_contents(path).unwrap_err();
        assert_eq!(err.invalid_path_reason(), Some(InvalidPathReason::Traversal), "{path}");
    }
    // bob was never set up
    assert!(ctx.mounts().get("/bob").is_none());
}

#[test]
fn test_view_paths_resolve_through_setup() {
    let ctx = FileSystemContext::builder(VfsConfig::default())
        .with_users(Arc::new(MemoryUserManager::with_users(["alice"])))
        .build();
    let view = ctx.init("alice", "/alice/files").unwrap();

    let (storage, internal) = view.resolve_path("/docs/a.txt").unwrap();
    assert_eq!(internal, "files/docs/a.txt");
    assert_eq!(storage.id(), "home::alice");
    assert_eq!(view.get_mount_point("/docs").unwrap(), "/alice");
}
