//! Filesystem configuration.
//!
//! Loaded from TOML; every field is optional and falls back to the defaults
//! below.
//!
//! ```toml
//! instance_id = "oc7f3a91c2d4"
//! mount_cache_duration_secs = 300
//! forbidden_filenames = [".htaccess", "desktop.ini"]
//! file_locking = true
//! filesystem_check_changes = "once"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::WatchPolicy;
use crate::error::{VfsError, VfsResult};

/// Longest absolute path the platform accepts.
pub const PLATFORM_MAX_PATH: usize = 4096;

/// Longest path the metadata cache can store.
pub const CACHE_MAX_PATH: usize = 4000;

/// Filesystem configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VfsConfig {
    /// Names the `/appdata_<instance_id>` tree, which is never user-scoped.
    pub instance_id: String,

    /// How long a completed full setup is trusted. `0` disables the cache.
    pub mount_cache_duration_secs: u64,

    /// File names that can never be created (case-insensitive).
    pub forbidden_filenames: Vec<String>,

    /// Characters rejected in file names, in addition to `/` and `\0`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub forbidden_characters: Vec<char>,

    pub max_filename_length: usize,

    /// Clamped to [`PLATFORM_MAX_PATH`].
    pub max_path_length: usize,

    /// Entries kept in the path normalization cache.
    pub path_cache_size: usize,

    /// When false the no-op locking provider is used.
    pub file_locking: bool,

    /// Strip the SHARE permission from every listing.
    pub sharing_disabled: bool,

    /// Deny filesystem access: users get inert null storages.
    pub lockdown: bool,

    /// Extension of in-progress upload files.
    pub part_file_extension: String,

    /// Default watcher policy for mounts that don't set one.
    pub filesystem_check_changes: WatchPolicy,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            instance_id: generate_instance_id(),
            mount_cache_duration_secs: 300,
            forbidden_filenames: vec![".htaccess".to_string()],
            forbidden_characters: Vec::new(),
            max_filename_length: 250,
            max_path_length: CACHE_MAX_PATH,
            path_cache_size: 2048,
            file_locking: true,
            sharing_disabled: false,
            lockdown: false,
            part_file_extension: "part".to_string(),
            filesystem_check_changes: WatchPolicy::Once,
        }
    }
}

fn generate_instance_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("oc{}", &hex[..10])
}

impl VfsConfig {
    /// Parse from a TOML document.
    pub fn from_toml_str(s: &str) -> VfsResult<Self> {
        toml::from_str(s).map_err(|e| VfsError::Config(e.to_string()))
    }

    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> VfsResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text).map_err(|e| match e {
            VfsError::Config(msg) => VfsError::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = id.into();
        self
    }

    pub fn with_mount_cache_duration(mut self, duration: Duration) -> Self {
        self.mount_cache_duration_secs = duration.as_secs();
        self
    }

    pub fn with_forbidden_filenames(mut self, names: Vec<String>) -> Self {
        self.forbidden_filenames = names;
        self
    }

    pub fn with_file_locking(mut self, enabled: bool) -> Self {
        self.file_locking = enabled;
        self
    }

    pub fn with_sharing_disabled(mut self, disabled: bool) -> Self {
        self.sharing_disabled = disabled;
        self
    }

    pub fn with_lockdown(mut self, lockdown: bool) -> Self {
        self.lockdown = lockdown;
        self
    }

    pub fn with_watch_policy(mut self, policy: WatchPolicy) -> Self {
        self.filesystem_check_changes = policy;
        self
    }

    /// Effective maximum absolute path length.
    pub fn effective_max_path_length(&self) -> usize {
        self.max_path_length.min(PLATFORM_MAX_PATH)
    }

    pub fn mount_cache_duration(&self) -> Duration {
        Duration::from_secs(self.mount_cache_duration_secs)
    }
}
