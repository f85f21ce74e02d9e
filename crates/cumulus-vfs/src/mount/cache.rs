//! Last known mount layout per user.
//!
//! Lazy path setup reads it to learn which provider owns a path without
//! asking every provider.

use std::sync::Arc;

use cumulus_types::FileId;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::MountPoint;
use crate::error::{VfsError, VfsResult};
use crate::setup::User;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedMountInfo {
    pub user: String,
    pub mount_point: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_id: Option<FileId>,
    /// Provider tag; empty when the mount was registered without one.
    #[serde(default)]
    pub provider: String,
}

impl CachedMountInfo {
    pub fn from_mount(user: &User, mount: &MountPoint) -> Self {
        Self {
            user: user.uid().to_string(),
            mount_point: mount.mount_point(),
            root_id: mount.storage_root_id(),
            provider: mount.provider().to_string(),
        }
    }

    fn covers(&self, path: &str) -> bool {
        path == self.mount_point || path.starts_with(&format!("{}/", self.mount_point.trim_end_matches('/')))
    }
}

pub trait UserMountCache: Send + Sync {
    /// Record the mounts of a user. With `providers`, only records from
    /// those providers are replaced; otherwise the whole set is.
    fn register_mounts(&self, user: &User, mounts: &[Arc<MountPoint>], providers: Option<&[String]>);

    fn get_mounts_for_user(&self, user: &User) -> Vec<CachedMountInfo>;

    /// The cached mount owning `path` (longest prefix).
    fn get_mount_for_path(&self, user: &User, path: &str) -> VfsResult<CachedMountInfo> {
        self.get_mounts_for_user(user)
            .into_iter()
            .filter(|m| m.covers(path))
            .max_by_key(|m| m.mount_point.len())
            .ok_or_else(|| VfsError::not_found(format!("no cached mount for {}", path)))
    }

    /// Cached mounts strictly below `path`.
    fn get_mounts_in_path(&self, user: &User, path: &str) -> Vec<CachedMountInfo> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        self.get_mounts_for_user(user)
            .into_iter()
            .filter(|m| m.mount_point.starts_with(&prefix))
            .collect()
    }

    fn remove_user(&self, uid: &str);
}

#[derive(Debug, Default)]
pub struct MemoryUserMountCache {
    mounts: DashMap<String, Vec<CachedMountInfo>>,
}

impl MemoryUserMountCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store records as-is (e.g. a layout loaded from elsewhere).
    pub fn insert(&self, info: CachedMountInfo) {
        let mut entry = self.mounts.entry(info.user.clone()).or_default();
        entry.retain(|m| m.mount_point != info.mount_point);
        entry.push(info);
    }
}

impl UserMountCache for MemoryUserMountCache {
    fn register_mounts(&self, user: &User, mounts: &[Arc<MountPoint>], providers: Option<&[String]>) {
        let fresh: Vec<CachedMountInfo> = mounts
            .iter()
            .filter(|m| providers.is_none_or(|ids| ids.iter().any(|id| id == m.provider())))
            .map(|m| CachedMountInfo::from_mount(user, m))
            .collect();

        let mut entry = self.mounts.entry(user.uid().to_string()).or_default();
        match providers {
            Some(ids) => entry.retain(|m| !ids.iter().any(|id| *id == m.provider)),
            None => entry.clear(),
        }
        entry.extend(fresh);
    }

    fn get_mounts_for_user(&self, user: &User) -> Vec<CachedMountInfo> {
        self.mounts.get(user.uid()).map(|m| m.clone()).unwrap_or_default()
    }

    fn remove_user(&self, uid: &str) {
        self.mounts.remove(uid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn mount(prefix: &str, provider: &str) -> Arc<MountPoint> {
        Arc::new(MountPoint::new(prefix, Arc::new(MemoryStorage::new())).with_provider(provider))
    }

    #[test]
    fn test_longest_cached_mount_for_path() {
        let cache = MemoryUserMountCache::new();
        let user = User::new("u");
        cache.register_mounts(
            &user,
            &[mount("/u", "home"), mount("/u/files/ext", "external")],
            None,
        );
        assert_eq!(cache.get_mount_for_path(&user, "/u/files/ext/a").unwrap().provider, "external");
        assert_eq!(cache.get_mount_for_path(&user, "/u/files/extra").unwrap().provider, "home");
        assert!(cache.get_mount_for_path(&user, "/other").is_err());
        assert_eq!(cache.get_mounts_in_path(&user, "/u/files").len(), 1);
    }

    #[test]
    fn test_register_for_providers_keeps_others() {
        let cache = MemoryUserMountCache::new();
        let user = User::new("u");
        cache.register_mounts(&user, &[mount("/u", "home"), mount("/u/files/a", "a")], None);
        cache.register_mounts(&user, &[mount("/u/files/b", "a")], Some(&["a".to_string()]));

        let points: Vec<String> = cache
            .get_mounts_for_user(&user)
            .into_iter()
            .map(|m| m.mount_point)
            .collect();
        assert_eq!(points, vec!["/u", "/u/files/b"]);
    }

    #[test]
    fn test_serde_roundtrip_of_record() {
        let info = CachedMountInfo {
            user: "u".into(),
            mount_point: "/u/files/x".into(),
            root_id: Some(FileId::new(7)),
            provider: "p".into(),
        };
        let json = serde_json::to_string(&info).unwrap();
        assert_eq!(serde_json::from_str::<CachedMountInfo>(&json).unwrap(), info);
    }
}
