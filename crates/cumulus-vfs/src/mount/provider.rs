//! Mount providers: where a user's mounts come from.

use std::sync::Arc;

use cumulus_types::CacheEntry;
use dashmap::DashMap;
use parking_lot::RwLock;

use super::{CachedMountInfo, MountKind, MountPoint};
use crate::error::{VfsError, VfsResult};
use crate::setup::User;
use crate::storage::{LocalStorage, MemoryStorage, Storage};

/// Produces the mounts of one kind for a user. The `id` is the provider
/// tag recorded in the user mount cache.
pub trait MountProvider: Send + Sync {
    fn id(&self) -> &str;

    fn get_mounts_for_user(&self, user: &User) -> VfsResult<Vec<MountPoint>>;

    /// Providers that can resolve single paths return themselves here.
    fn as_partial(&self) -> Option<&dyn PartialMountProvider> {
        None
    }
}

/// Arguments for resolving one cached mount without enumerating them all.
#[derive(Debug, Clone)]
pub struct MountProviderArgs {
    pub mount_info: CachedMountInfo,
    /// Cache entry of the mount root, when it could be looked up.
    pub root_entry: Option<CacheEntry>,
}

pub trait PartialMountProvider: MountProvider {
    /// Mounts for `path` (and, with `for_children`, below it), given the
    /// cached mount records that point there.
    fn get_mounts_for_path(&self, path: &str, for_children: bool, args: &[MountProviderArgs]) -> VfsResult<Vec<MountPoint>>;
}

pub trait HomeMountProvider: Send + Sync {
    fn get_home_mount_for_user(&self, user: &User) -> VfsResult<Option<MountPoint>>;
}

pub trait RootMountProvider: Send + Sync {
    fn get_root_mounts(&self) -> VfsResult<Vec<MountPoint>>;
}

/// Every registered provider.
#[derive(Default)]
pub struct MountProviderCollection {
    providers: RwLock<Vec<Arc<dyn MountProvider>>>,
    home_providers: RwLock<Vec<Arc<dyn HomeMountProvider>>>,
    root_providers: RwLock<Vec<Arc<dyn RootMountProvider>>>,
}

impl MountProviderCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_provider(&self, provider: Arc<dyn MountProvider>) {
        self.providers.write().push(provider);
    }

    /// Home providers are consulted newest first.
    pub fn register_home_provider(&self, provider: Arc<dyn HomeMountProvider>) {
        self.home_providers.write().insert(0, provider);
    }

    pub fn register_root_provider(&self, provider: Arc<dyn RootMountProvider>) {
        self.root_providers.write().push(provider);
    }

    pub fn providers(&self) -> Vec<Arc<dyn MountProvider>> {
        self.providers.read().clone()
    }

    pub fn get_provider(&self, id: &str) -> Option<Arc<dyn MountProvider>> {
        self.providers.read().iter().find(|p| p.id() == id).cloned()
    }

    pub fn get_home_mount_for_user(&self, user: &User) -> VfsResult<MountPoint> {
        for provider in self.home_providers.read().iter() {
            if let Some(mount) = provider.get_home_mount_for_user(user)? {
                return Ok(mount.with_kind(MountKind::Home));
            }
        }
        Err(VfsError::Config(format!("no home storage available for {}", user.uid())))
    }

    pub fn get_root_mounts(&self) -> VfsResult<Vec<MountPoint>> {
        let mut mounts = Vec::new();
        for provider in self.root_providers.read().iter() {
            mounts.extend(provider.get_root_mounts()?);
        }
        Ok(mounts)
    }

    /// Mounts from the listed providers, each tagged with its provider id.
    pub fn get_mounts_from_providers(&self, user: &User, ids: &[String]) -> VfsResult<Vec<MountPoint>> {
        let mut mounts = Vec::new();
        for provider in self.providers() {
            if !ids.iter().any(|id| id == provider.id()) {
                continue;
            }
            for mount in provider.get_mounts_for_user(user)? {
                mounts.push(tag(mount, provider.id()));
            }
        }
        Ok(mounts)
    }
}

impl std::fmt::Debug for MountProviderCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountProviderCollection")
            .field("providers", &self.providers.read().iter().map(|p| p.id().to_string()).collect::<Vec<_>>())
            .field("home_providers", &self.home_providers.read().len())
            .field("root_providers", &self.root_providers.read().len())
            .finish()
    }
}

/// Fill in the provider tag when the provider left it empty.
pub(crate) fn tag(mount: MountPoint, provider: &str) -> MountPoint {
    if mount.provider().is_empty() {
        mount.with_provider(provider)
    } else {
        mount
    }
}

// ============================================================================
// Reference home providers
// ============================================================================

pub const HOME_PROVIDER_ID: &str = "home";

/// One in-memory storage per user, created on first request and reused.
#[derive(Default)]
pub struct MemoryHomeProvider {
    storages: DashMap<String, Arc<dyn Storage>>,
}

impl MemoryHomeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn storage_for(&self, uid: &str) -> Arc<dyn Storage> {
        self.storages
            .entry(uid.to_string())
            .or_insert_with(|| -> Arc<dyn Storage> {
                Arc::new(MemoryStorage::with_id(format!("home::{}", uid)).with_owner(uid))
            })
            .clone()
    }
}

impl HomeMountProvider for MemoryHomeProvider {
    fn get_home_mount_for_user(&self, user: &User) -> VfsResult<Option<MountPoint>> {
        let mount = MountPoint::new(&format!("/{}", user.uid()), self.storage_for(user.uid()))
            .with_provider(HOME_PROVIDER_ID);
        Ok(Some(mount))
    }
}

/// `<data_dir>/<uid>` on the local disk.
pub struct LocalHomeProvider {
    data_dir: std::path::PathBuf,
    storages: DashMap<String, Arc<dyn Storage>>,
}

impl std::fmt::Debug for LocalHomeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalHomeProvider")
            .field("data_dir", &self.data_dir)
            .field("users", &self.storages.len())
            .finish()
    }
}

impl LocalHomeProvider {
    pub fn new(data_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            storages: DashMap::new(),
        }
    }
}

impl HomeMountProvider for LocalHomeProvider {
    fn get_home_mount_for_user(&self, user: &User) -> VfsResult<Option<MountPoint>> {
        let storage = match self.storages.get(user.uid()) {
            Some(s) => s.clone(),
            None => {
                let storage: Arc<dyn Storage> =
                    Arc::new(LocalStorage::new(self.data_dir.join(user.uid()))?.with_owner(user.uid()));
                self.storages.insert(user.uid().to_string(), storage.clone());
                storage
            }
        };
        Ok(Some(
            MountPoint::new(&format!("/{}", user.uid()), storage).with_provider(HOME_PROVIDER_ID),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    impl MountProvider for Fixed {
        fn id(&self) -> &str {
            "fixed"
        }

        fn get_mounts_for_user(&self, user: &User) -> VfsResult<Vec<MountPoint>> {
            Ok(vec![MountPoint::new(
                &format!("/{}/files/fixed", user.uid()),
                Arc::new(MemoryStorage::new()),
            )])
        }
    }

    #[test]
    fn test_collection_tags_mounts() {
        let collection = MountProviderCollection::new();
        collection.register_provider(Arc::new(Fixed));
        let user = User::new("alice");
        let mounts = collection
            .get_mounts_from_providers(&user, &["fixed".to_string()])
            .unwrap();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].provider(), "fixed");
        assert!(collection.get_mounts_from_providers(&user, &[]).unwrap().is_empty());
        assert!(collection.get_provider("fixed").is_some());
    }

    #[test]
    fn test_home_provider_reuses_storage() {
        let collection = MountProviderCollection::new();
        assert!(collection.get_home_mount_for_user(&User::new("bob")).is_err());

        let provider = Arc::new(MemoryHomeProvider::new());
        collection.register_home_provider(provider.clone());
        let first = collection.get_home_mount_for_user(&User::new("bob")).unwrap();
        let second = collection.get_home_mount_for_user(&User::new("bob")).unwrap();
        assert_eq!(first.mount_point(), "/bob");
        assert_eq!(first.kind(), MountKind::Home);
        assert_eq!(first.storage_id(), second.storage_id());
    }

    #[test]
    fn test_local_home_provider() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalHomeProvider::new(dir.path());
        let mount = provider.get_home_mount_for_user(&User::new("carol")).unwrap().unwrap();
        assert!(mount.storage().is_local());
        assert!(dir.path().join("carol").is_dir());

        let debug = format!("{:?}", provider);
        assert!(debug.contains("LocalHomeProvider"));
        assert!(debug.contains("users: 1"));
    }
}
