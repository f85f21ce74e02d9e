//! A namespace prefix bound to a storage.

use std::fmt;
use std::sync::Arc;

use cumulus_types::{FileId, StorageNumericId};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::cache::WatchPolicy;
use crate::error::VfsResult;
use crate::storage::Storage;

/// Per-mount options, as stored alongside a mount configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountOptions {
    pub read_only: bool,
    pub encoding_compatibility: bool,
    pub enable_sharing: bool,
    /// Byte quota; `None` means unlimited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota: Option<i64>,
    /// Overrides the configured watcher policy for this mount.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesystem_check_changes: Option<WatchPolicy>,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            encoding_compatibility: false,
            enable_sharing: true,
            quota: None,
            filesystem_check_changes: None,
        }
    }
}

impl MountOptions {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }

    pub fn with_quota(mut self, quota: i64) -> Self {
        self.quota = Some(quota);
        self
    }

    pub fn with_sharing(mut self, enabled: bool) -> Self {
        self.enable_sharing = enabled;
        self
    }

    pub fn with_encoding_compatibility(mut self, enabled: bool) -> Self {
        self.encoding_compatibility = enabled;
        self
    }

    pub fn with_watch_policy(mut self, policy: WatchPolicy) -> Self {
        self.filesystem_check_changes = Some(policy);
        self
    }
}

/// What a mount is for. Drives wrapper selection and move rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MountKind {
    Root,
    Home,
    Regular,
    External,
    /// A share received from another user.
    Shared,
    /// Inert placeholder used under lockdown.
    Null,
}

/// Handler for mounts that can be relocated or removed without touching
/// their storage (accepted shares, for instance).
pub trait MountLifecycle: Send + Sync {
    /// Persist a new prefix. Returning `false` vetoes the move.
    fn move_mount(&self, mount: &MountPoint, target: &str) -> VfsResult<bool>;

    /// Forget the mount (unshare from self). Returning `false` keeps it.
    fn remove_mount(&self, mount: &MountPoint) -> VfsResult<bool>;
}

pub struct MountPoint {
    prefix: RwLock<String>,
    raw_storage: Arc<dyn Storage>,
    storage: RwLock<Arc<dyn Storage>>,
    applied_wrappers: Mutex<Vec<String>>,
    options: MountOptions,
    kind: MountKind,
    provider: String,
    lifecycle: Option<Arc<dyn MountLifecycle>>,
}

/// `/a/b/` and `a/b` both become `/a/b`; the root stays `/`.
pub(crate) fn clean_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", trimmed)
    }
}

impl MountPoint {
    pub fn new(prefix: &str, storage: Arc<dyn Storage>) -> Self {
        Self {
            prefix: RwLock::new(clean_prefix(prefix)),
            raw_storage: storage.clone(),
            storage: RwLock::new(storage),
            applied_wrappers: Mutex::new(Vec::new()),
            options: MountOptions::default(),
            kind: MountKind::Regular,
            provider: String::new(),
            lifecycle: None,
        }
    }

    pub fn with_options(mut self, options: MountOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_kind(mut self, kind: MountKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    /// Make the mount moveable through the given handler.
    pub fn with_lifecycle(mut self, lifecycle: Arc<dyn MountLifecycle>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    /// Normalized prefix, e.g. `/alice/files/ext`.
    pub fn mount_point(&self) -> String {
        self.prefix.read().clone()
    }

    pub(crate) fn set_mount_point(&self, prefix: &str) {
        *self.prefix.write() = clean_prefix(prefix);
    }

    /// Storage with the wrapper pipeline applied.
    pub fn storage(&self) -> Arc<dyn Storage> {
        self.storage.read().clone()
    }

    /// Storage as the provider handed it over.
    pub fn raw_storage(&self) -> &Arc<dyn Storage> {
        &self.raw_storage
    }

    pub(crate) fn replace_storage(&self, storage: Arc<dyn Storage>, wrapper: &str) {
        *self.storage.write() = storage;
        self.applied_wrappers.lock().push(wrapper.to_string());
    }

    pub fn applied_wrappers(&self) -> Vec<String> {
        self.applied_wrappers.lock().clone()
    }

    pub(crate) fn has_wrapper(&self, name: &str) -> bool {
        self.applied_wrappers.lock().iter().any(|w| w == name)
    }

    pub fn storage_id(&self) -> String {
        self.raw_storage.id().to_string()
    }

    pub fn numeric_storage_id(&self) -> StorageNumericId {
        self.raw_storage.numeric_id()
    }

    /// Cache id of the storage root, if it was scanned.
    pub fn storage_root_id(&self) -> Option<FileId> {
        self.raw_storage.cache().get_id("")
    }

    pub fn options(&self) -> &MountOptions {
        &self.options
    }

    pub fn kind(&self) -> MountKind {
        self.kind
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn is_moveable(&self) -> bool {
        self.lifecycle.is_some()
    }

    pub fn lifecycle(&self) -> Option<&Arc<dyn MountLifecycle>> {
        self.lifecycle.as_ref()
    }

    /// Storage-internal path for an absolute path inside this mount.
    pub fn get_internal_path(&self, path: &str) -> String {
        let prefix = self.prefix.read();
        let path = path.trim_end_matches('/');
        let rest = if prefix.as_str() == "/" {
            path
        } else {
            path.strip_prefix(prefix.as_str()).unwrap_or(path)
        };
        rest.trim_matches('/').to_string()
    }

    /// Whether `path` lies in this mount's subtree (the root included).
    pub fn contains(&self, path: &str) -> bool {
        let prefix = self.prefix.read();
        prefix.as_str() == "/" || path == prefix.as_str() || path.starts_with(&format!("{}/", prefix))
    }
}

impl fmt::Debug for MountPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountPoint")
            .field("prefix", &*self.prefix.read())
            .field("storage", &self.raw_storage.id())
            .field("kind", &self.kind)
            .field("provider", &self.provider)
            .field("moveable", &self.is_moveable())
            .finish()
    }
}

impl fmt::Display for MountPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.prefix.read(), self.raw_storage.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_prefix_is_cleaned() {
        let mp = MountPoint::new("alice/files/", Arc::new(MemoryStorage::new()));
        assert_eq!(mp.mount_point(), "/alice/files");
        assert_eq!(clean_prefix(""), "/");
        assert_eq!(clean_prefix("//"), "/");
    }

    #[test]
    fn test_internal_path() {
        let mp = MountPoint::new("/alice/files", Arc::new(MemoryStorage::new()));
        assert_eq!(mp.get_internal_path("/alice/files"), "");
        assert_eq!(mp.get_internal_path("/alice/files/a/b.txt"), "a/b.txt");
        let root = MountPoint::new("/", Arc::new(MemoryStorage::new()));
        assert_eq!(root.get_internal_path("/x/y"), "x/y");
    }

    #[test]
    fn test_contains() {
        let mp = MountPoint::new("/alice/files", Arc::new(MemoryStorage::new()));
        assert!(mp.contains("/alice/files"));
        assert!(mp.contains("/alice/files/x"));
        assert!(!mp.contains("/alice/filesystem"));
    }

    #[test]
    fn test_options_serde_defaults() {
        let opts: MountOptions = toml::from_str("read_only = true\nfilesystem_check_changes = \"never\"").unwrap();
        assert!(opts.read_only);
        assert!(opts.enable_sharing);
        assert_eq!(opts.filesystem_check_changes, Some(WatchPolicy::Never));
        assert_eq!(opts.quota, None);
    }
}
