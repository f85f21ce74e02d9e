//! Integration tests for lazy mount setup.
//!
//! Full and partial setup, idempotence, lifecycle hooks, lockdown and
//! invalidation, driven through a `FileSystemContext`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use cumulus_vfs::hooks::HookDecision;
use cumulus_vfs::mount::{
    CachedMountInfo, MemoryUserMountCache, MountKind, MountPoint, MountProvider, MountProviderArgs,
    PartialMountProvider,
};
use cumulus_vfs::setup::{MemorySetupCache, SetupCache, SetupStage, User};
use cumulus_vfs::{
    FileSystemContext, MemoryStorage, MemoryUserManager, MountInvalidation, VfsConfig, VfsError, VfsResult,
};

/// Full provider mounting one memory storage at `/<uid>/files/<id>`.
struct Counting {
    id: &'static str,
    calls: AtomicUsize,
}

impl Counting {
    fn new(id: &'static str) -> Arc<Self> {
        Arc::new(Self {
            id,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MountProvider for Counting {
    fn id(&self) -> &str {
        self.id
    }

    fn get_mounts_for_user(&self, user: &User) -> VfsResult<Vec<MountPoint>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![MountPoint::new(
            &format!("/{}/files/{}", user.uid(), self.id),
            Arc::new(MemoryStorage::new()),
        )])
    }
}

/// Provider that can also resolve single cached mounts.
struct Partial {
    full_calls: AtomicUsize,
    path_calls: AtomicUsize,
}

impl MountProvider for Partial {
    fn id(&self) -> &str {
        "ext"
    }

    fn get_mounts_for_user(&self, user: &User) -> VfsResult<Vec<MountPoint>> {
        self.full_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![MountPoint::new(
            &format!("/{}/files/ext", user.uid()),
            Arc::new(MemoryStorage::new()),
        )])
    }

    fn as_partial(&self) -> Option<&dyn PartialMountProvider> {
        Some(self)
    }
}

impl PartialMountProvider for Partial {
    fn get_mounts_for_path(
        &self,
        _path: &str,
        _for_children: bool,
        args: &[MountProviderArgs],
    ) -> VfsResult<Vec<MountPoint>> {
        self.path_calls.fetch_add(1, Ordering::SeqCst);
        Ok(args
            .iter()
            .map(|arg| MountPoint::new(&arg.mount_info.mount_point, Arc::new(MemoryStorage::new())))
            .collect())
    }
}

fn users() -> Arc<MemoryUserManager> {
    cumulus_telemetry::init_test_tracing();
    Arc::new(MemoryUserManager::with_users(["alice", "bob"]))
}

fn cached(mount_point: &str, provider: &str) -> CachedMountInfo {
    CachedMountInfo {
        user: "alice".to_string(),
        mount_point: mount_point.to_string(),
        root_id: None,
        provider: provider.to_string(),
    }
}

// ============================================================================
// Full setup
// ============================================================================

#[test]
fn test_setup_is_idempotent() {
    let provider = Counting::new("ext");
    let ctx = FileSystemContext::builder(VfsConfig::default())
        .with_users(users())
        .with_provider(provider.clone())
        .build();

    ctx.setup().setup_for_uid("alice").unwrap();
    let mounts_after_first = ctx.mounts().len();
    ctx.setup().setup_for_uid("alice").unwrap();
    ctx.find_mount("/alice/files/ext/x").unwrap();
    ctx.find_mounts_in("/alice/files").unwrap();

    assert_eq!(provider.calls(), 1);
    assert_eq!(ctx.mounts().len(), mounts_after_first);
    assert_eq!(ctx.setup().state("alice").stage, SetupStage::Full);
}

#[test]
fn test_first_touch_sets_up_the_owner_only() {
    let ctx = FileSystemContext::builder(VfsConfig::default()).with_users(users()).build();

    assert_eq!(ctx.find_mount("/bob/files/x").unwrap().mount_point(), "/bob");
    assert!(ctx.setup().is_setup_complete(&User::new("bob")));
    assert!(!ctx.setup().is_setup_started(&User::new("alice")));
    assert!(ctx.mounts().get("/alice").is_none());
}

#[test]
fn test_home_gets_a_files_folder() {
    let ctx = FileSystemContext::builder(VfsConfig::default()).with_users(users()).build();
    let mount = ctx.find_mount("/alice/files").unwrap();
    assert_eq!(mount.kind(), MountKind::Home);
    assert!(mount.storage().is_dir("files").unwrap());
    assert!(mount.storage().cache().in_cache("files"));
}

#[test]
fn test_unknown_uid_is_an_error() {
    let ctx = FileSystemContext::builder(VfsConfig::default()).with_users(users()).build();
    assert!(matches!(ctx.setup().setup_for_uid("mallory"), Err(VfsError::NoUser(_))));
    assert!(matches!(ctx.init("mallory", "/mallory/files"), Err(VfsError::NoUser(_))));
}

// ============================================================================
// Partial setup
// ============================================================================

#[test]
fn test_partial_provider_resolves_only_the_touched_mount() {
    let mount_cache = Arc::new(MemoryUserMountCache::new());
    mount_cache.insert(cached("/alice/files/ext", "ext"));
    let setup_cache = Arc::new(MemorySetupCache::new());
    setup_cache.mark_setup("alice");
    let provider = Arc::new(Partial {
        full_calls: AtomicUsize::new(0),
        path_calls: AtomicUsize::new(0),
    });

    let ctx = FileSystemContext::builder(VfsConfig::default())
        .with_users(users())
        .with_mount_cache(mount_cache)
        .with_setup_cache(setup_cache)
        .with_provider(provider.clone())
        .build();

    let mount = ctx.find_mount("/alice/files/ext/doc.txt").unwrap();
    assert_eq!(mount.mount_point(), "/alice/files/ext");
    assert_eq!(provider.path_calls.load(Ordering::SeqCst), 1);
    assert_eq!(provider.full_calls.load(Ordering::SeqCst), 0);
    assert_eq!(ctx.setup().state("alice").stage, SetupStage::Partial);

    // already set up for this path
    ctx.find_mount("/alice/files/ext/doc.txt").unwrap();
    assert_eq!(provider.path_calls.load(Ordering::SeqCst), 1);

    // a full setup replaces the partial mount instead of duplicating it
    ctx.setup().setup_for_uid("alice").unwrap();
    assert_eq!(provider.full_calls.load(Ordering::SeqCst), 1);
    assert_eq!(ctx.setup().state("alice").stage, SetupStage::Full);
    let ext_mounts = ctx
        .mounts()
        .get_all()
        .into_iter()
        .filter(|m| m.mount_point() == "/alice/files/ext")
        .count();
    assert_eq!(ext_mounts, 1);
}

#[test]
fn test_untagged_cached_mount_forces_full_setup() {
    let mount_cache = Arc::new(MemoryUserMountCache::new());
    mount_cache.insert(cached("/alice/files/legacy", ""));
    let setup_cache = Arc::new(MemorySetupCache::new());
    setup_cache.mark_setup("alice");
    let provider = Counting::new("legacy");

    let ctx = FileSystemContext::builder(VfsConfig::default())
        .with_users(users())
        .with_mount_cache(mount_cache)
        .with_setup_cache(setup_cache)
        .with_provider(provider.clone())
        .build();

    let mount = ctx.find_mount("/alice/files/legacy/x").unwrap();
    assert_eq!(mount.mount_point(), "/alice/files/legacy");
    assert_eq!(provider.calls(), 1);
    assert_eq!(ctx.setup().state("alice").stage, SetupStage::Full);
}

#[test]
fn test_cache_miss_falls_back_to_full_setup() {
    let setup_cache = Arc::new(MemorySetupCache::new());
    setup_cache.mark_setup("alice");
    let provider = Counting::new("ext");

    // recently set up, but nothing in the mount cache
    let ctx = FileSystemContext::builder(VfsConfig::default())
        .with_users(users())
        .with_setup_cache(setup_cache)
        .with_provider(provider.clone())
        .build();

    ctx.find_mount("/alice/files/anything").unwrap();
    assert_eq!(provider.calls(), 1);
    assert!(ctx.setup().is_setup_complete(&User::new("alice")));
}

// ============================================================================
// Hooks, lockdown, invalidation, teardown
// ============================================================================

#[test]
fn test_lifecycle_events_in_order() {
    let ctx = FileSystemContext::builder(VfsConfig::default()).with_users(users()).build();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    ctx.hooks().subscribe("lifecycle.>", move |event: &cumulus_vfs::HookEvent| {
        sink.lock().push(event.subject());
        HookDecision::Continue
    });

    ctx.find_mount("/alice/files/x").unwrap();
    ctx.tear_down();

    assert_eq!(
        *seen.lock(),
        vec![
            "lifecycle.pre_setup".to_string(),
            "lifecycle.setup".to_string(),
            "lifecycle.post_init_mount_points".to_string(),
            "lifecycle.torn_down".to_string(),
        ]
    );
}

#[test]
fn test_lockdown_serves_null_storage() {
    let ctx = FileSystemContext::builder(VfsConfig::default().with_lockdown(true))
        .with_users(users())
        .build();
    let view = ctx.init("alice", "/alice/files").unwrap();

    assert_eq!(view.get_mount("/").unwrap().kind(), MountKind::Null);
    assert!(view.file_put_contents("/a.txt", b"x").unwrap().is_none());
    assert!(!view.mkdir("/dir").unwrap());
    assert!(!view.file_exists("/a.txt").unwrap());
}

#[test]
fn test_invalidation_drops_the_recent_setup_marker() {
    let setup_cache = Arc::new(MemorySetupCache::new());
    let ctx = FileSystemContext::builder(VfsConfig::default())
        .with_users(users())
        .with_setup_cache(setup_cache.clone())
        .build();

    ctx.setup().setup_for_uid("alice").unwrap();
    ctx.setup().setup_for_uid("bob").unwrap();
    assert!(setup_cache.was_recently_setup("alice"));

    ctx.handle_event(&MountInvalidation::ShareCreated {
        shared_with: "alice".to_string(),
    });
    assert!(!setup_cache.was_recently_setup("alice"));
    assert!(setup_cache.was_recently_setup("bob"));

    ctx.handle_event(&MountInvalidation::GroupMembershipChanged);
    assert!(!setup_cache.was_recently_setup("bob"));
}

#[test]
fn test_tear_down_allows_a_fresh_setup() {
    let provider = Counting::new("ext");
    let ctx = FileSystemContext::builder(VfsConfig::default())
        .with_users(users())
        .with_provider(provider.clone())
        .build();

    ctx.init("alice", "/alice/files").unwrap();
    ctx.find_mount("/alice/files/x").unwrap();
    ctx.tear_down();
    assert!(ctx.mounts().is_empty());
    assert!(ctx.get_view().is_none());

    ctx.setup().setup_for_uid("alice").unwrap();
    assert_eq!(provider.calls(), 2);
    assert!(ctx.mounts().get("/alice/files/ext").is_some());
}
