//! Ordered, named storage decorators applied when a mount is attached.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::{MountKind, MountPoint};
use crate::storage::wrapper::{Availability, EncodingCompat, PermissionsMask, Quota, Wrapped};
use crate::storage::{Capability, Storage};

/// `(wrapper name, storage, mount) -> storage`. Return the input unchanged
/// to pass.
pub type StorageWrapper = Arc<dyn Fn(&str, Arc<dyn Storage>, &MountPoint) -> Arc<dyn Storage> + Send + Sync>;

pub struct StorageWrapperPipeline {
    wrappers: RwLock<IndexMap<String, StorageWrapper>>,
    log_warning: AtomicBool,
}

impl Default for StorageWrapperPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageWrapperPipeline {
    pub fn new() -> Self {
        Self {
            wrappers: RwLock::new(IndexMap::new()),
            log_warning: AtomicBool::new(true),
        }
    }

    /// Add a wrapper at the end of the chain. Returns `false` if the name
    /// is already taken; the existing wrapper stays.
    pub fn register(&self, name: &str, wrapper: StorageWrapper) -> bool {
        let mut wrappers = self.wrappers.write();
        if wrappers.contains_key(name) {
            return false;
        }
        wrappers.insert(name.to_string(), wrapper);
        true
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.wrappers.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.wrappers.read().keys().cloned().collect()
    }

    /// Whether late registrations are logged.
    pub fn logs_warnings(&self) -> bool {
        self.log_warning.load(Ordering::Relaxed)
    }

    /// Returns the previous setting.
    pub fn set_log_warning(&self, enabled: bool) -> bool {
        self.log_warning.swap(enabled, Ordering::Relaxed)
    }

    /// Apply, in order, every registered wrapper this mount has not seen yet.
    pub fn wrap(&self, mount: &MountPoint) {
        let wrappers: Vec<(String, StorageWrapper)> = self
            .wrappers
            .read()
            .iter()
            .map(|(name, w)| (name.clone(), w.clone()))
            .collect();
        for (name, wrapper) in wrappers {
            if mount.has_wrapper(&name) {
                continue;
            }
            let wrapped = wrapper(&name, mount.storage(), mount);
            mount.replace_storage(wrapped, &name);
        }
    }
}

impl std::fmt::Debug for StorageWrapperPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageWrapperPipeline")
            .field("wrappers", &self.names())
            .finish()
    }
}

// ============================================================================
// Builtin wrappers
// ============================================================================

pub const WRAPPER_SHARING_PERMISSIONS: &str = "sharing_permissions";
pub const WRAPPER_AVAILABILITY: &str = "availability";
pub const WRAPPER_ENCODING: &str = "encoding";
pub const WRAPPER_QUOTA: &str = "quota";
pub const WRAPPER_READONLY: &str = "readonly";

/// The builtin chain, in application order.
pub fn builtin_wrappers(sharing_disabled: bool) -> Vec<(&'static str, StorageWrapper)> {
    let sharing: StorageWrapper = Arc::new(move |_, storage, mount| {
        if sharing_disabled || !mount.options().enable_sharing {
            Arc::new(Wrapped::new(storage, PermissionsMask::without_sharing()))
        } else {
            storage
        }
    });
    let availability: StorageWrapper = Arc::new(|_, storage, mount| {
        if storage.is_local() || mount.kind() == MountKind::Null || storage.instance_of(Capability::Null) {
            storage
        } else {
            Arc::new(Wrapped::new(storage, Availability::new()))
        }
    });
    let encoding: StorageWrapper = Arc::new(|_, storage, mount| {
        if mount.options().encoding_compatibility {
            Arc::new(Wrapped::new(storage, EncodingCompat::new()))
        } else {
            storage
        }
    });
    let quota: StorageWrapper = Arc::new(|_, storage, mount| match mount.options().quota {
        Some(bytes) if bytes >= 0 => Arc::new(Wrapped::new(storage, Quota::new(bytes))),
        _ => storage,
    });
    let readonly: StorageWrapper = Arc::new(|_, storage, mount| {
        if mount.options().read_only {
            Arc::new(Wrapped::new(storage, PermissionsMask::read_only()))
        } else {
            storage
        }
    });

    vec![
        (WRAPPER_SHARING_PERMISSIONS, sharing),
        (WRAPPER_AVAILABILITY, availability),
        (WRAPPER_ENCODING, encoding),
        (WRAPPER_QUOTA, quota),
        (WRAPPER_READONLY, readonly),
    ]
}
