//! The filesystem context: one explicit owner for everything a session
//! shares (mounts, setup state, hooks, locking).
//!
//! ```ignore
//! let ctx = FileSystemContext::builder(VfsConfig::default())
//!     .with_users(Arc::new(MemoryUserManager::with_users(["alice"])))
//!     .build();
//! let view = ctx.init("alice", "/alice/files")?;
//! view.file_put_contents("/hello.txt", b"hi")?;
//! ```

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::info;

use crate::config::VfsConfig;
use crate::error::{VfsError, VfsResult};
use crate::hooks::HookBus;
use crate::lock::{LockingProvider, MemoryLockingProvider, NoopLockingProvider};
use crate::mount::{
    HomeMountProvider, MemoryHomeProvider, MemoryUserMountCache, MountManager, MountPoint, MountProvider,
    MountProviderCollection, RootMountProvider, StorageWrapper, StorageWrapperPipeline, UserMountCache,
};
use crate::path::{FilenameValidator, PathNormalizer};
use crate::setup::{MemorySetupCache, MemoryUserManager, MountInvalidation, SetupCache, SetupManager, UserManager};
use crate::view::View;

/// Which paths a user has shared with others.
pub trait ShareLookup: Send + Sync {
    /// Absolute paths of every node `owner` shares.
    fn shared_paths(&self, owner: &str) -> Vec<String>;

    /// Whether `path` is shared by `owner` or lies inside something that is.
    fn is_shared(&self, owner: &str, path: &str) -> bool {
        self.shared_paths(owner)
            .iter()
            .any(|shared| path == shared || path.starts_with(&format!("{}/", shared)))
    }
}

#[derive(Debug, Default)]
pub struct MemoryShareLookup {
    shares: DashMap<String, Vec<String>>,
}

impl MemoryShareLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn share(&self, owner: &str, path: impl Into<String>) {
        self.shares.entry(owner.to_string()).or_default().push(path.into());
    }
}

impl ShareLookup for MemoryShareLookup {
    fn shared_paths(&self, owner: &str) -> Vec<String> {
        self.shares.get(owner).map(|s| s.clone()).unwrap_or_default()
    }
}

/// State shared by the context and every view it creates.
pub(crate) struct ContextState {
    pub(crate) config: Arc<VfsConfig>,
    pub(crate) mounts: Arc<MountManager>,
    pub(crate) setup: Arc<SetupManager>,
    pub(crate) hooks: Arc<HookBus>,
    pub(crate) locking: Arc<dyn LockingProvider>,
    pub(crate) normalizer: PathNormalizer,
    pub(crate) validator: FilenameValidator,
    pub(crate) shares: Option<Arc<dyn ShareLookup>>,
    /// Root of the default view; hooks fire only for views at or below it.
    pub(crate) default_root: RwLock<Option<String>>,
}

impl ContextState {
    pub(crate) fn default_root(&self) -> Option<String> {
        self.default_root.read().clone()
    }
}

// ============================================================================
// Builder
// ============================================================================

pub struct FileSystemContextBuilder {
    config: VfsConfig,
    users: Option<Arc<dyn UserManager>>,
    mount_cache: Option<Arc<dyn UserMountCache>>,
    setup_cache: Option<Arc<dyn SetupCache>>,
    locking: Option<Arc<dyn LockingProvider>>,
    shares: Option<Arc<dyn ShareLookup>>,
    providers: Vec<Arc<dyn MountProvider>>,
    home_providers: Vec<Arc<dyn HomeMountProvider>>,
    root_providers: Vec<Arc<dyn RootMountProvider>>,
}

impl FileSystemContextBuilder {
    pub fn new(config: VfsConfig) -> Self {
        Self {
            config,
            users: None,
            mount_cache: None,
            setup_cache: None,
            locking: None,
            shares: None,
            providers: Vec::new(),
            home_providers: Vec::new(),
            root_providers: Vec::new(),
        }
    }

    pub fn with_users(mut self, users: Arc<dyn UserManager>) -> Self {
        self.users = Some(users);
        self
    }

    pub fn with_mount_cache(mut self, cache: Arc<dyn UserMountCache>) -> Self {
        self.mount_cache = Some(cache);
        self
    }

    pub fn with_setup_cache(mut self, cache: Arc<dyn SetupCache>) -> Self {
        self.setup_cache = Some(cache);
        self
    }

    pub fn with_locking(mut self, provider: Arc<dyn LockingProvider>) -> Self {
        self.locking = Some(provider);
        self
    }

    pub fn with_share_lookup(mut self, shares: Arc<dyn ShareLookup>) -> Self {
        self.shares = Some(shares);
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn MountProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_home_provider(mut self, provider: Arc<dyn HomeMountProvider>) -> Self {
        self.home_providers.push(provider);
        self
    }

    pub fn with_root_provider(mut self, provider: Arc<dyn RootMountProvider>) -> Self {
        self.root_providers.push(provider);
        self
    }

    pub fn build(self) -> FileSystemContext {
        let config = Arc::new(self.config);

        let locking = self.locking.unwrap_or_else(|| -> Arc<dyn LockingProvider> {
            if config.file_locking {
                Arc::new(MemoryLockingProvider::new())
            } else {
                Arc::new(NoopLockingProvider)
            }
        });

        let providers = Arc::new(MountProviderCollection::new());
        if self.home_providers.is_empty() {
            providers.register_home_provider(Arc::new(MemoryHomeProvider::new()));
        }
        for provider in self.home_providers {
            providers.register_home_provider(provider);
        }
        for provider in self.root_providers {
            providers.register_root_provider(provider);
        }
        for provider in self.providers {
            providers.register_provider(provider);
        }

        let pipeline = Arc::new(StorageWrapperPipeline::new());
        let mounts =
            Arc::new(MountManager::new(pipeline).with_default_watch_policy(config.filesystem_check_changes));
        let hooks = Arc::new(HookBus::new());

        let setup = Arc::new(SetupManager::new(
            config.clone(),
            mounts.clone(),
            providers,
            self.users.unwrap_or_else(|| Arc::new(MemoryUserManager::new())),
            self.mount_cache.unwrap_or_else(|| Arc::new(MemoryUserMountCache::new())),
            self.setup_cache
                .unwrap_or_else(|| Arc::new(MemorySetupCache::with_ttl(config.mount_cache_duration()))),
            hooks.clone(),
        ));

        let state = ContextState {
            normalizer: PathNormalizer::new(config.path_cache_size),
            validator: FilenameValidator::new(&config),
            config,
            mounts,
            setup,
            hooks,
            locking,
            shares: self.shares,
            default_root: RwLock::new(None),
        };

        FileSystemContext {
            state: Arc::new(state),
            default_view: RwLock::new(None),
        }
    }
}

// ============================================================================
// Context
// ============================================================================

pub struct FileSystemContext {
    state: Arc<ContextState>,
    default_view: RwLock<Option<Arc<View>>>,
}

impl std::fmt::Debug for FileSystemContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSystemContext")
            .field("default_root", &self.state.default_root())
            .field("mounts", &self.state.mounts.len())
            .finish()
    }
}

impl FileSystemContext {
    pub fn builder(config: VfsConfig) -> FileSystemContextBuilder {
        FileSystemContextBuilder::new(config)
    }

    /// Start a session for `uid` rooted at `root` and return its default
    /// view. Mounts are set up lazily as paths are touched.
    pub fn init(&self, uid: &str, root: &str) -> VfsResult<Arc<View>> {
        let user = self
            .state
            .setup
            .get_user(uid)
            .ok_or_else(|| VfsError::no_user(uid))?;
        self.state.setup.set_session_user(Some(user));

        let view = Arc::new(View::new(self.state.clone(), root));
        *self.state.default_root.write() = Some(view.get_root().to_string());
        *self.default_view.write() = Some(view.clone());
        info!(user = uid, root = view.get_root(), "filesystem initialised");
        Ok(view)
    }

    pub fn get_view(&self) -> Option<Arc<View>> {
        self.default_view.read().clone()
    }

    /// An additional view rooted elsewhere. Hooks only fire for it when it
    /// lies inside the default view.
    pub fn view(&self, root: &str) -> View {
        View::new(self.state.clone(), root)
    }

    /// Drop every mount and all setup state; the default view goes away.
    pub fn tear_down(&self) {
        self.state.setup.tear_down();
        self.state.setup.set_session_user(None);
        *self.state.default_root.write() = None;
        *self.default_view.write() = None;
    }

    /// Register a storage wrapper. Registering after mounts exist re-wraps
    /// them and logs a warning.
    pub fn add_storage_wrapper(&self, name: &str, wrapper: StorageWrapper) -> bool {
        self.state.mounts.add_storage_wrapper(name, wrapper)
    }

    /// The mount owning `path`, after making sure it is set up.
    pub fn find_mount(&self, path: &str) -> VfsResult<Arc<MountPoint>> {
        self.state.setup.setup_for_path(path, false)?;
        Ok(self.state.mounts.find(path))
    }

    /// Mounts nested below `path`, after setting up its children.
    pub fn find_mounts_in(&self, path: &str) -> VfsResult<Vec<Arc<MountPoint>>> {
        self.state.setup.setup_for_path(path, true)?;
        Ok(self.state.mounts.find_in(path))
    }

    pub fn handle_event(&self, event: &MountInvalidation) {
        self.state.setup.handle_event(event);
    }

    pub fn normalize_path(&self, path: &str) -> String {
        self.state.normalizer.normalize(path)
    }

    pub fn config(&self) -> &Arc<VfsConfig> {
        &self.state.config
    }

    pub fn mounts(&self) -> &Arc<MountManager> {
        &self.state.mounts
    }

    pub fn setup(&self) -> &Arc<SetupManager> {
        &self.state.setup
    }

    pub fn hooks(&self) -> &Arc<HookBus> {
        &self.state.hooks
    }

    pub fn locking(&self) -> &Arc<dyn LockingProvider> {
        &self.state.locking
    }

    pub fn validator(&self) -> &FilenameValidator {
        &self.state.validator
    }
}
