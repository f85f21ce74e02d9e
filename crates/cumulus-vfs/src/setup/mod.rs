//! Lazy, staged mount setup.
//!
//! Mounts are attached per user on demand. Touching a path only runs the
//! provider that owns it (per the user mount cache); asking for a user's
//! full view runs every provider once. State is kept per user in a single
//! [`UserSetupState`] record and only moves forward until
//! [`SetupManager::tear_down`].

mod cache;
mod state;
mod users;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tracing::{debug, info, warn};

pub use cache::{MemorySetupCache, SetupCache};
pub use state::{SetupLevel, SetupStage, UserSetupState};
pub use users::{MemoryUserManager, User, UserManager};

use crate::cache::{ScanMode, Scanner};
use crate::config::VfsConfig;
use crate::error::{VfsError, VfsResult};
use crate::hooks::{HookBus, HookEvent, LifecycleEvent};
use crate::mount::{
    CachedMountInfo, HOME_PROVIDER_ID, MountKind, MountManager, MountPoint, MountProvider, MountProviderArgs,
    MountProviderCollection, UserMountCache, builtin_wrappers, tag,
};
use crate::storage::NullStorage;

/// Events that can change a user's mount set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountInvalidation {
    UserAdded(String),
    UserRemoved(String),
    ShareCreated { shared_with: String },
    /// One user, or everyone with `None`.
    Invalidate(Option<String>),
    GroupMembershipChanged,
}

pub struct SetupManager {
    config: Arc<VfsConfig>,
    mounts: Arc<MountManager>,
    providers: Arc<MountProviderCollection>,
    users: Arc<dyn UserManager>,
    mount_cache: Arc<dyn UserMountCache>,
    setup_cache: Arc<dyn SetupCache>,
    hooks: Arc<HookBus>,
    session_user: RwLock<Option<User>>,
    states: Mutex<HashMap<String, UserSetupState>>,
    /// Serializes setup; re-entered when a path setup escalates.
    setup_lock: ReentrantMutex<()>,
    builtins_registered: AtomicBool,
    root_setup_done: AtomicBool,
}

impl std::fmt::Debug for SetupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetupManager")
            .field("users", &self.states.lock().keys().cloned().collect::<Vec<_>>())
            .finish()
    }
}

impl SetupManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<VfsConfig>,
        mounts: Arc<MountManager>,
        providers: Arc<MountProviderCollection>,
        users: Arc<dyn UserManager>,
        mount_cache: Arc<dyn UserMountCache>,
        setup_cache: Arc<dyn SetupCache>,
        hooks: Arc<HookBus>,
    ) -> Self {
        Self {
            config,
            mounts,
            providers,
            users,
            mount_cache,
            setup_cache,
            hooks,
            session_user: RwLock::new(None),
            states: Mutex::new(HashMap::new()),
            setup_lock: ReentrantMutex::new(()),
            builtins_registered: AtomicBool::new(false),
            root_setup_done: AtomicBool::new(false),
        }
    }

    pub fn set_session_user(&self, user: Option<User>) {
        *self.session_user.write() = user;
    }

    pub fn session_user(&self) -> Option<User> {
        self.session_user.read().clone()
    }

    pub fn get_user(&self, uid: &str) -> Option<User> {
        self.users.get(uid)
    }

    pub fn providers(&self) -> &Arc<MountProviderCollection> {
        &self.providers
    }

    /// Snapshot of a user's state.
    pub fn state(&self, uid: &str) -> UserSetupState {
        self.states.lock().get(uid).cloned().unwrap_or_default()
    }

    fn update_state<R>(&self, uid: &str, f: impl FnOnce(&mut UserSetupState) -> R) -> R {
        let mut states = self.states.lock();
        f(states.entry(uid.to_string()).or_default())
    }

    pub fn is_setup_started(&self, user: &User) -> bool {
        self.state(user.uid()).is_started()
    }

    pub fn is_setup_complete(&self, user: &User) -> bool {
        self.state(user.uid()).is_complete()
    }

    /// The user whose mounts cover `path`, if any.
    ///
    /// Group folders, app data, the external-storage root and paths with
    /// fewer than two segments are not user-scoped; the latter resolve to
    /// the session user.
    pub fn get_user_for_path(&self, path: &str) -> Option<User> {
        if path.starts_with("/__groupfolders") {
            return None;
        }
        if path.matches('/').count() < 2 {
            return self.session_user();
        }
        if path.starts_with(&format!("/appdata_{}", self.config.instance_id)) || path.starts_with("/files_external/") {
            return None;
        }
        let uid = path.trim_start_matches('/').split('/').next().unwrap_or_default();
        self.users.get(uid)
    }

    // ========================================================================
    // Builtins, root and one-time setup
    // ========================================================================

    fn setup_builtin_wrappers(&self) {
        if self.builtins_registered.swap(true, Ordering::SeqCst) {
            return;
        }
        for (name, wrapper) in builtin_wrappers(self.config.sharing_disabled) {
            self.mounts.add_storage_wrapper(name, wrapper);
        }
    }

    /// Attach the root-provider mounts. Runs once per setup lifetime.
    pub fn setup_root(&self) -> VfsResult<()> {
        let _guard = self.setup_lock.lock();
        if self.root_setup_done.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.setup_builtin_wrappers();
        for mount in self.providers.get_root_mounts()? {
            self.mounts.add_mount(mount.with_kind(MountKind::Root));
        }
        debug!("root mounts set up");
        Ok(())
    }

    fn one_time_user_setup(&self, user: &User) -> VfsResult<()> {
        let uid = user.uid();
        if self.state(uid).is_started() {
            return Ok(());
        }
        self.update_state(uid, |s| s.advance(SetupStage::OneTimeDone));
        self.setup_root()?;

        let previous = self.mounts.pipeline().set_log_warning(false);
        self.hooks.emit(&HookEvent::Lifecycle(LifecycleEvent::PreSetup {
            user: uid.to_string(),
        }));
        self.mounts.pipeline().set_log_warning(previous);

        if self.config.lockdown {
            for prefix in [format!("/{}", uid), user.files_root()] {
                let mount = MountPoint::new(&prefix, Arc::new(NullStorage::new())).with_kind(MountKind::Null);
                self.mounts.add_mount(mount);
            }
            self.update_state(uid, |s| s.advance(SetupStage::Full));
            info!(user = uid, "filesystem locked down, null mounts attached");
            return Ok(());
        }

        let home = self.mounts.add_mount(self.providers.get_home_mount_for_user(user)?);
        let storage = home.storage();
        if !storage.cache().in_cache("") || !storage.is_dir("files")? {
            storage.set_quota_enabled(false);
            let created = storage.is_dir("files")? || storage.mkdir("files")?;
            storage.set_quota_enabled(true);
            if !created {
                warn!(user = uid, mount = %home, "could not create files folder");
            }
            Scanner::new(storage.as_ref())
                .with_partial_extension(self.config.part_file_extension.clone())
                .scan("", ScanMode::Recursive)?;
        }

        self.hooks.emit(&HookEvent::Lifecycle(LifecycleEvent::Setup {
            user: uid.to_string(),
            user_dir: user.files_root(),
        }));
        debug!(user = uid, "one-time setup done");
        Ok(())
    }

    // ========================================================================
    // Full setup
    // ========================================================================

    /// Run every provider that has not run yet for `uid`.
    pub fn setup_for_uid(&self, uid: &str) -> VfsResult<()> {
        let user = self.get_user(uid).ok_or_else(|| VfsError::no_user(uid))?;
        self.setup_for_user(&user)
    }

    pub fn setup_for_user(&self, user: &User) -> VfsResult<()> {
        let _guard = self.setup_lock.lock();
        let uid = user.uid();
        if self.is_setup_complete(user) {
            return Ok(());
        }

        self.drop_partial_mounts(user);
        self.one_time_user_setup(user)?;
        if self.is_setup_complete(user) {
            // lockdown finished the job
            return Ok(());
        }

        let already = self.state(uid).providers_run;
        let pending: Vec<String> = self
            .providers
            .providers()
            .iter()
            .map(|p| p.id().to_string())
            .filter(|id| !already.contains(id))
            .collect();
        let new_mounts = self.providers.get_mounts_from_providers(user, &pending)?;
        for mount in new_mounts {
            self.mounts.add_mount(mount);
        }

        self.update_state(uid, |s| {
            s.providers_run.extend(pending.iter().cloned());
            s.advance(SetupStage::Full);
        });
        self.mount_cache.register_mounts(user, &self.user_mounts(user), None);
        self.setup_cache.mark_setup(uid);
        debug!(user = uid, providers = pending.len(), "full setup done");

        self.hooks.emit(&HookEvent::Lifecycle(LifecycleEvent::PostInitMountPoints {
            user: uid.to_string(),
        }));
        Ok(())
    }

    fn drop_partial_mounts(&self, user: &User) {
        let prefixes = self.update_state(user.uid(), |s| std::mem::take(&mut s.partial_mounts));
        for prefix in &prefixes {
            self.mounts.remove_mount(prefix);
        }
        if !prefixes.is_empty() {
            debug!(user = user.uid(), dropped = prefixes.len(), "dropped partial mounts");
        }
    }

    /// Attached mounts belonging to a user's tree.
    fn user_mounts(&self, user: &User) -> Vec<Arc<MountPoint>> {
        let root = format!("/{}", user.uid());
        self.mounts
            .get_all()
            .into_iter()
            .filter(|m| m.mount_point() == root || m.mount_point().starts_with(&format!("{}/", root)))
            .collect()
    }

    fn full_setup_required(&self, user: &User) -> bool {
        if let Some(required) = self.state(user.uid()).full_setup_required {
            return required;
        }
        let required = !self.setup_cache.was_recently_setup(user.uid());
        self.update_state(user.uid(), |s| s.full_setup_required = Some(required));
        required
    }

    // ========================================================================
    // Path and provider setup
    // ========================================================================

    /// Make sure the mounts covering `path` (and, with `include_children`,
    /// the mounts nested below it) are attached.
    pub fn setup_for_path(&self, path: &str, include_children: bool) -> VfsResult<()> {
        let Some(user) = self.get_user_for_path(path) else {
            return self.setup_root();
        };
        let _guard = self.setup_lock.lock();
        let uid = user.uid();
        let path = path.trim_end_matches('/');

        if self.is_setup_complete(&user) {
            return Ok(());
        }
        if self.full_setup_required(&user) {
            return self.setup_for_user(&user);
        }
        if include_children && path == user.files_root() {
            return self.setup_for_user(&user);
        }
        if self.state(uid).is_path_setup(path, include_children) {
            return Ok(());
        }

        let cached = match self.mount_cache.get_mount_for_path(&user, path) {
            Ok(cached) => cached,
            Err(_) => return self.setup_for_user(&user),
        };
        self.one_time_user_setup(&user)?;

        let mut wanted: Vec<CachedMountInfo> = Vec::new();
        if !self.state(uid).provider_ran(&cached.provider) {
            wanted.push(cached);
        }
        if include_children {
            wanted.extend(self.mount_cache.get_mounts_in_path(&user, path));
        }
        if wanted.iter().any(|m| m.provider.is_empty()) {
            debug!(user = uid, path, "cached mount without provider tag, running full setup");
            return self.setup_for_user(&user);
        }

        // group by provider, keeping first-seen order
        let mut by_provider: Vec<(String, Vec<CachedMountInfo>)> = Vec::new();
        for info in wanted {
            if info.provider == HOME_PROVIDER_ID || self.state(uid).provider_ran(&info.provider) {
                continue;
            }
            match by_provider.iter_mut().find(|(p, _)| *p == info.provider) {
                Some((_, infos)) => infos.push(info),
                None => by_provider.push((info.provider.clone(), vec![info])),
            }
        }

        let mut full_mounts = Vec::new();
        let mut full_providers = Vec::new();
        for (provider_id, infos) in by_provider {
            let Some(provider) = self.providers.get_provider(&provider_id) else {
                warn!(user = uid, provider = %provider_id, "cached mount from unknown provider");
                continue;
            };
            if let Some(partial) = provider.as_partial() {
                let args = self.provider_args(infos);
                for mount in partial.get_mounts_for_path(path, include_children, &args)? {
                    let mount = self.mounts.add_mount(tag(mount, &provider_id));
                    self.update_state(uid, |s| s.partial_mounts.push(mount.mount_point()));
                }
            } else {
                for mount in provider.get_mounts_for_user(&user)? {
                    full_mounts.push(self.mounts.add_mount(tag(mount, &provider_id)));
                }
                self.update_state(uid, |s| {
                    s.providers_run.insert(provider_id.clone());
                });
                full_providers.push(provider_id);
            }
        }

        if !full_providers.is_empty() {
            self.mount_cache.register_mounts(&user, &full_mounts, Some(&full_providers));
        }
        self.update_state(uid, |s| {
            s.advance(SetupStage::Partial);
            s.mark_path(path, include_children);
        });
        debug!(user = uid, path, include_children, "path setup done");
        Ok(())
    }

    /// Pair cached records with their root entries, looked up in one pass
    /// over the attached storages.
    fn provider_args(&self, infos: Vec<CachedMountInfo>) -> Vec<MountProviderArgs> {
        let wanted: HashSet<_> = infos.iter().filter_map(|i| i.root_id).collect();
        let mut found = HashMap::new();
        if !wanted.is_empty() {
            for mount in self.mounts.get_all() {
                let cache = mount.storage().cache();
                for id in &wanted {
                    if let Some(entry) = cache.get_by_id(*id) {
                        found.insert(*id, entry);
                    }
                }
            }
        }
        infos
            .into_iter()
            .map(|info| MountProviderArgs {
                root_entry: info.root_id.and_then(|id| found.get(&id).cloned()),
                mount_info: info,
            })
            .collect()
    }

    /// Run the named providers for the user owning `path`. Home providers
    /// are implicit and skipped.
    pub fn setup_for_provider(&self, path: &str, provider_ids: &[&str]) -> VfsResult<()> {
        let Some(user) = self.get_user_for_path(path) else {
            return self.setup_root();
        };
        let _guard = self.setup_lock.lock();
        let uid = user.uid();
        if self.is_setup_complete(&user) {
            return Ok(());
        }
        self.one_time_user_setup(&user)?;

        let state = self.state(uid);
        let pending: Vec<String> = provider_ids
            .iter()
            .filter(|id| **id != HOME_PROVIDER_ID && !state.provider_ran(id))
            .map(|id| id.to_string())
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        let mut attached = Vec::new();
        for mount in self.providers.get_mounts_from_providers(&user, &pending)? {
            attached.push(self.mounts.add_mount(mount));
        }
        self.update_state(uid, |s| {
            s.providers_run.extend(pending.iter().cloned());
            s.advance(SetupStage::Partial);
        });
        self.mount_cache.register_mounts(&user, &attached, Some(&pending));
        debug!(user = uid, providers = ?pending, "provider setup done");
        Ok(())
    }

    /// Register a provider. Users whose setup already started get its
    /// mounts right away.
    pub fn register_provider(&self, provider: Arc<dyn MountProvider>) -> VfsResult<()> {
        let _guard = self.setup_lock.lock();
        self.providers.register_provider(provider.clone());
        let started: Vec<String> = self
            .states
            .lock()
            .iter()
            .filter(|(_, s)| s.is_started())
            .map(|(uid, _)| uid.clone())
            .collect();
        for uid in started {
            let Some(user) = self.users.get(&uid) else {
                continue;
            };
            for mount in provider.get_mounts_for_user(&user)? {
                self.mounts.add_mount(tag(mount, provider.id()));
            }
            self.update_state(&uid, |s| {
                s.providers_run.insert(provider.id().to_string());
            });
        }
        Ok(())
    }

    // ========================================================================
    // Invalidation and teardown
    // ========================================================================

    pub fn handle_event(&self, event: &MountInvalidation) {
        match event {
            MountInvalidation::UserAdded(uid)
            | MountInvalidation::UserRemoved(uid)
            | MountInvalidation::ShareCreated { shared_with: uid }
            | MountInvalidation::Invalidate(Some(uid)) => self.setup_cache.invalidate(uid),
            MountInvalidation::Invalidate(None) | MountInvalidation::GroupMembershipChanged => self.setup_cache.clear(),
        }
        debug!(?event, "setup cache invalidated");
    }

    /// Forget all setup state and detach every mount.
    pub fn tear_down(&self) {
        let _guard = self.setup_lock.lock();
        self.states.lock().clear();
        self.mounts.clear();
        self.root_setup_done.store(false, Ordering::SeqCst);
        self.hooks.emit(&HookEvent::Lifecycle(LifecycleEvent::TornDown));
        debug!("setup torn down");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::mount::{MemoryHomeProvider, MemoryUserMountCache};
    use crate::storage::MemoryStorage;

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

    fn manager(config: VfsConfig) -> (SetupManager, Arc<MountManager>) {
        let mounts = Arc::new(MountManager::default());
        let providers = Arc::new(MountProviderCollection::new());
        providers.register_home_provider(Arc::new(MemoryHomeProvider::new()));
        let setup = SetupManager::new(
            Arc::new(config),
            mounts.clone(),
            providers,
            Arc::new(MemoryUserManager::with_users(["alice", "bob"])),
            Arc::new(MemoryUserMountCache::new()),
            Arc::new(MemorySetupCache::new()),
            Arc::new(HookBus::new()),
        );
        (setup, mounts)
    }

    #[test]
    fn test_user_for_path() {
        let (setup, _) = manager(VfsConfig::default().with_instance_id("ocabc"));
        assert_eq!(setup.get_user_for_path("/alice/files/x").unwrap().uid(), "alice");
        assert!(setup.get_user_for_path("/__groupfolders/1").is_none());
        assert!(setup.get_user_for_path("/appdata_ocabc/preview").is_none());
        assert!(setup.get_user_for_path("/files_external/x").is_none());
        assert!(setup.get_user_for_path("/nobody/files").is_none());
        assert!(setup.get_user_for_path("/alice").is_none());

        setup.set_session_user(Some(User::new("bob")));
        assert_eq!(setup.get_user_for_path("/alice").unwrap().uid(), "bob");
    }

    #[test]
    fn test_setup_for_user_runs_providers_once() {
        let (setup, mounts) = manager(VfsConfig::default());
        let provider = Counting::new("ext");
        setup.providers().register_provider(provider.clone());

        setup.setup_for_uid("alice").unwrap();
        setup.setup_for_uid("alice").unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(setup.state("alice").stage, SetupStage::Full);
        assert!(mounts.get("/alice").is_some());
        assert!(mounts.get("/alice/files/ext").is_some());
        assert!(mounts.find("/alice/files").storage().is_dir("files").unwrap());
    }

    #[test]
    fn test_unknown_user_is_an_error() {
        let (setup, _) = manager(VfsConfig::default());
        assert!(matches!(setup.setup_for_uid("mallory"), Err(VfsError::NoUser(_))));
    }

    #[test]
    fn test_lockdown_uses_null_mounts() {
        let (setup, mounts) = manager(VfsConfig::default().with_lockdown(true));
        setup.setup_for_uid("alice").unwrap();
        assert_eq!(mounts.find("/alice/files/x").kind(), MountKind::Null);
        assert!(setup.is_setup_complete(&User::new("alice")));
    }

    #[test]
    fn test_tear_down_resets() {
        let (setup, mounts) = manager(VfsConfig::default());
        setup.setup_for_uid("alice").unwrap();
        setup.tear_down();
        assert!(mounts.is_empty());
        assert_eq!(setup.state("alice").stage, SetupStage::NotStarted);
    }

    #[test]
    fn test_late_provider_mounts_for_started_users() {
        let (setup, mounts) = manager(VfsConfig::default());
        setup.setup_for_uid("alice").unwrap();
        let provider = Counting::new("late");
        setup.register_provider(provider.clone()).unwrap();
        assert!(mounts.get("/alice/files/late").is_some());
        assert!(mounts.get("/bob/files/late").is_none());
        assert!(setup.state("alice").provider_ran("late"));
    }
}
