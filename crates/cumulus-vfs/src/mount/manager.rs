//! Registry of attached mounts with longest-prefix lookup.

use std::sync::Arc;

use cumulus_types::StorageNumericId;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use super::mount_point::clean_prefix;
use super::{MountKind, MountPoint, StorageWrapper, StorageWrapperPipeline};
use crate::cache::WatchPolicy;
use crate::storage::NullStorage;

pub struct MountManager {
    /// Keyed by prefix; insertion order is attach order.
    mounts: RwLock<IndexMap<String, Arc<MountPoint>>>,
    /// Bounded LRU of lookups. Cleared under the `mounts` write lock and
    /// filled under its read lock, so it never outlives a mutation.
    path_cache: Mutex<IndexMap<String, Arc<MountPoint>>>,
    lookup_capacity: usize,
    pipeline: Arc<StorageWrapperPipeline>,
    default_watch_policy: Option<WatchPolicy>,
    fallback: Arc<MountPoint>,
}

impl Default for MountManager {
    fn default() -> Self {
        Self::new(Arc::new(StorageWrapperPipeline::new()))
    }
}

impl MountManager {
    pub const DEFAULT_LOOKUP_CAPACITY: usize = 1024;

    pub fn new(pipeline: Arc<StorageWrapperPipeline>) -> Self {
        let fallback = MountPoint::new("/", Arc::new(NullStorage::new())).with_kind(MountKind::Null);
        Self {
            mounts: RwLock::new(IndexMap::new()),
            path_cache: Mutex::new(IndexMap::new()),
            lookup_capacity: Self::DEFAULT_LOOKUP_CAPACITY,
            pipeline,
            default_watch_policy: None,
            fallback: Arc::new(fallback),
        }
    }

    /// Watcher policy given to attached storages whose mount options do not
    /// choose one.
    pub fn with_default_watch_policy(mut self, policy: WatchPolicy) -> Self {
        self.default_watch_policy = Some(policy);
        self
    }

    /// Number of memoized lookups kept.
    pub fn with_lookup_capacity(mut self, capacity: usize) -> Self {
        self.lookup_capacity = capacity.max(1);
        self
    }

    pub fn cached_lookups(&self) -> usize {
        self.path_cache.lock().len()
    }

    pub fn pipeline(&self) -> &Arc<StorageWrapperPipeline> {
        &self.pipeline
    }

    /// Callers hold the `mounts` write lock.
    fn invalidate(&self) {
        self.path_cache.lock().clear();
    }

    /// Attach a mount, replacing any mount with the same prefix. The wrapper
    /// pipeline runs here, once.
    pub fn add_mount(&self, mount: impl Into<Arc<MountPoint>>) -> Arc<MountPoint> {
        let mount: Arc<MountPoint> = mount.into();
        self.pipeline.wrap(&mount);
        if mount.kind() != MountKind::Null {
            if let Some(policy) = mount.options().filesystem_check_changes.or(self.default_watch_policy) {
                mount.storage().watcher().set_policy(policy);
            }
        }

        let prefix = mount.mount_point();
        {
            let mut mounts = self.mounts.write();
            // re-adding moves the prefix to the back: most recent wins
            mounts.shift_remove(&prefix);
            mounts.insert(prefix.clone(), mount.clone());
            self.invalidate();
        }
        debug!(mount = %mount, "mount added");
        mount
    }

    /// Detach by exact prefix.
    pub fn remove_mount(&self, prefix: &str) -> Option<Arc<MountPoint>> {
        let mut mounts = self.mounts.write();
        let removed = mounts.shift_remove(&clean_prefix(prefix));
        if removed.is_some() {
            self.invalidate();
        }
        drop(mounts);
        if removed.is_some() {
            debug!(prefix, "mount removed");
        }
        removed
    }

    /// Re-key a mount under a new prefix without touching its storage.
    pub fn move_mount(&self, mount: &Arc<MountPoint>, target: &str) {
        let mut mounts = self.mounts.write();
        mounts.shift_remove(&mount.mount_point());
        mount.set_mount_point(target);
        mounts.insert(mount.mount_point(), mount.clone());
        self.invalidate();
    }

    /// Detach every mount matching `predicate`.
    pub fn remove_where(&self, predicate: impl Fn(&MountPoint) -> bool) -> usize {
        let mut mounts = self.mounts.write();
        let before = mounts.len();
        mounts.retain(|_, m| !predicate(m));
        let removed = before - mounts.len();
        if removed > 0 {
            self.invalidate();
        }
        removed
    }

    pub fn clear(&self) {
        let mut mounts = self.mounts.write();
        mounts.clear();
        self.invalidate();
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.mounts.read().len()
    }

    /// The mount owning `path`: longest matching prefix, falling back to the
    /// root mount and, with nothing mounted at all, to an inert root.
    pub fn find(&self, path: &str) -> Arc<MountPoint> {
        let path = clean_prefix(path);
        let mounts = self.mounts.read();
        {
            let mut cache = self.path_cache.lock();
            if let Some(idx) = cache.get_index_of(&path) {
                let last = cache.len() - 1;
                cache.move_index(idx, last);
                return cache[last].clone();
            }
        }

        let mut current = path.as_str();
        let found = loop {
            if let Some(mount) = mounts.get(current) {
                break Some(mount.clone());
            }
            if current == "/" {
                break None;
            }
            current = match current.rfind('/') {
                Some(0) | None => "/",
                Some(idx) => &current[..idx],
            };
        };

        match found {
            Some(mount) => {
                let mut cache = self.path_cache.lock();
                if cache.len() >= self.lookup_capacity {
                    cache.shift_remove_index(0);
                }
                cache.insert(path, mount.clone());
                mount
            }
            None => self.fallback.clone(),
        }
    }

    /// Mount registered at exactly `prefix`.
    pub fn get(&self, prefix: &str) -> Option<Arc<MountPoint>> {
        self.mounts.read().get(&clean_prefix(prefix)).cloned()
    }

    /// Mounts strictly below `path`, in attach order.
    pub fn find_in(&self, path: &str) -> Vec<Arc<MountPoint>> {
        let path = clean_prefix(path);
        let needle = if path == "/" { "/".to_string() } else { format!("{}/", path) };
        self.mounts
            .read()
            .iter()
            .filter(|(prefix, _)| prefix.starts_with(&needle) && prefix.len() > needle.len())
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn find_by_storage_id(&self, storage_id: &str) -> Vec<Arc<MountPoint>> {
        self.mounts
            .read()
            .values()
            .filter(|m| m.storage_id() == storage_id)
            .cloned()
            .collect()
    }

    pub fn find_by_numeric_id(&self, id: StorageNumericId) -> Vec<Arc<MountPoint>> {
        self.mounts
            .read()
            .values()
            .filter(|m| m.numeric_storage_id() == id)
            .cloned()
            .collect()
    }

    /// Every mount, in attach order.
    pub fn get_all(&self) -> Vec<Arc<MountPoint>> {
        self.mounts.read().values().cloned().collect()
    }

    /// Register a wrapper and apply it to the mounts already attached.
    pub fn add_storage_wrapper(&self, name: &str, wrapper: StorageWrapper) -> bool {
        if !self.pipeline.register(name, wrapper) {
            return false;
        }
        let mounts = self.get_all();
        if !mounts.is_empty() {
            if self.pipeline.logs_warnings() {
                warn!(
                    wrapper = name,
                    mounts = mounts.len(),
                    "storage wrapper registered after mounts were set up"
                );
            }
            for mount in &mounts {
                self.pipeline.wrap(mount);
            }
        }
        true
    }
}

impl std::fmt::Debug for MountManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountManager")
            .field("mounts", &self.mounts.read().keys().collect::<Vec<_>>())
            .finish()
    }
}
