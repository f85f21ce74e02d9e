//! File metadata as the facade hands it out.
//!
//! A [`FileInfo`] wraps one cache record plus the mount it came from. For
//! folders with storages mounted inside them, size and etag fold in the
//! roots of those storages. The fold runs once per instance, on first use.

use std::sync::{Arc, OnceLock};

use cumulus_types::{CacheEntry, FileId, FileType, Permissions, StorageNumericId};
use md5::{Digest, Md5};

use crate::mount::MountPoint;
use crate::storage::{Capability, Storage};

/// Root metadata of a storage mounted below a folder.
#[derive(Debug, Clone)]
struct SubEntry {
    /// Mount point relative to the folder, with a leading slash.
    relative: String,
    size: i64,
    mtime: i64,
    etag: String,
    permissions: Permissions,
}

#[derive(Debug, Clone)]
struct Totals {
    size: i64,
    mtime: i64,
    child_etags: Vec<String>,
}

/// Metadata for one node.
///
/// Sub-mount totals are folded once, on the first size, etag or mtime
/// query, and reflect the mounted storages as they were at that moment.
/// Later writes inside those storages need a fresh `FileInfo`.
#[derive(Clone)]
pub struct FileInfo {
    path: String,
    storage: Arc<dyn Storage>,
    internal_path: String,
    data: CacheEntry,
    mount: Arc<MountPoint>,
    owner: Option<String>,
    sub_mounts: Vec<Arc<MountPoint>>,
    sub_entries: Vec<SubEntry>,
    totals: OnceLock<Totals>,
}

impl std::fmt::Debug for FileInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileInfo")
            .field("path", &self.path)
            .field("internal_path", &self.internal_path)
            .field("storage", &self.storage.id())
            .field("id", &self.data.id)
            .field("sub_mounts", &self.sub_mounts.len())
            .finish()
    }
}

impl FileInfo {
    pub fn new(
        path: impl Into<String>,
        storage: Arc<dyn Storage>,
        internal_path: impl Into<String>,
        data: CacheEntry,
        mount: Arc<MountPoint>,
    ) -> Self {
        Self {
            path: path.into(),
            storage,
            internal_path: internal_path.into(),
            data,
            mount,
            owner: None,
            sub_mounts: Vec::new(),
            sub_entries: Vec::new(),
            totals: OnceLock::new(),
        }
    }

    pub fn with_owner(mut self, owner: Option<String>) -> Self {
        self.owner = owner;
        self
    }

    // ========================================================================
    // Plain accessors
    // ========================================================================

    /// Absolute path.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn internal_path(&self) -> &str {
        &self.internal_path
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn mount(&self) -> &Arc<MountPoint> {
        &self.mount
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// The underlying cache record, without sub-mount folding.
    pub fn entry(&self) -> &CacheEntry {
        &self.data
    }

    pub fn id(&self) -> FileId {
        self.data.id
    }

    pub fn parent_id(&self) -> Option<FileId> {
        self.data.parent
    }

    pub fn storage_numeric_id(&self) -> StorageNumericId {
        self.data.storage
    }

    pub fn name(&self) -> &str {
        &self.data.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.data.name = name.into();
    }

    pub fn mimetype(&self) -> &str {
        &self.data.mimetype
    }

    pub fn mime_part(&self) -> &str {
        self.data.mime_part()
    }

    pub fn file_type(&self) -> FileType {
        self.data.file_type()
    }

    pub fn is_dir(&self) -> bool {
        self.data.is_dir()
    }

    pub fn is_encrypted(&self) -> bool {
        self.data.encrypted
    }

    pub fn encryption_version(&self) -> u32 {
        self.data.encryption_version
    }

    pub fn checksum(&self) -> &str {
        &self.data.checksum
    }

    pub fn creation_time(&self) -> i64 {
        self.data.creation_time
    }

    pub fn upload_time(&self) -> i64 {
        self.data.upload_time
    }

    pub fn permissions(&self) -> Permissions {
        self.data.permissions
    }

    pub fn set_permissions(&mut self, permissions: Permissions) {
        self.data.permissions = permissions;
    }

    pub fn is_readable(&self) -> bool {
        self.data.permissions.contains(Permissions::READ)
    }

    pub fn is_updateable(&self) -> bool {
        self.data.permissions.contains(Permissions::UPDATE)
    }

    pub fn is_creatable(&self) -> bool {
        self.data.permissions.contains(Permissions::CREATE)
    }

    pub fn is_deletable(&self) -> bool {
        self.data.permissions.contains(Permissions::DELETE)
    }

    pub fn is_shareable(&self) -> bool {
        self.data.permissions.contains(Permissions::SHARE)
    }

    /// Whether this node is the root of its mount.
    pub fn is_mount_root(&self) -> bool {
        self.internal_path.is_empty()
    }

    pub fn is_shared(&self) -> bool {
        self.storage.instance_of(Capability::Shared)
    }

    pub fn is_local(&self) -> bool {
        self.storage.is_local()
    }

    // ========================================================================
    // Sub-mount aggregation
    // ========================================================================

    /// Storages mounted inside this folder. Their roots are folded in on
    /// the first size / etag / mtime query.
    pub fn set_sub_mounts(&mut self, mounts: Vec<Arc<MountPoint>>) {
        self.sub_mounts = mounts;
        self.totals = OnceLock::new();
    }

    pub fn sub_mounts(&self) -> &[Arc<MountPoint>] {
        &self.sub_mounts
    }

    /// Fold in the root record of a storage mounted at `mount_point`
    /// (absolute, or relative to this folder).
    pub fn add_sub_entry(&mut self, entry: &CacheEntry, mount_point: &str) {
        self.sub_entries.push(SubEntry {
            relative: self.relative_to_self(mount_point),
            size: entry.size,
            mtime: entry.mtime,
            etag: entry.etag.clone(),
            permissions: entry.permissions,
        });
        self.totals = OnceLock::new();
    }

    fn relative_to_self(&self, mount_point: &str) -> String {
        let own = self.path.trim_end_matches('/');
        let rest = if !own.is_empty() && mount_point.starts_with(&format!("{}/", own)) {
            &mount_point[own.len()..]
        } else {
            mount_point
        };
        format!("/{}", rest.trim_matches('/'))
    }

    fn totals(&self) -> &Totals {
        self.totals.get_or_init(|| {
            let mut totals = Totals {
                size: self.data.size,
                mtime: self.data.mtime,
                child_etags: Vec::new(),
            };
            let mounted = self.sub_mounts.iter().filter_map(|mount| {
                let root = mount.storage().cache().get("")?;
                Some(SubEntry {
                    relative: self.relative_to_self(&mount.mount_point()),
                    size: root.size,
                    mtime: root.mtime,
                    etag: root.etag,
                    permissions: root.permissions,
                })
            });
            for sub in self.sub_entries.iter().cloned().chain(mounted) {
                if sub.size > 0 {
                    totals.size = totals.size.max(0) + sub.size;
                }
                totals.mtime = totals.mtime.max(sub.mtime);
                if !sub.etag.is_empty() {
                    totals
                        .child_etags
                        .push(format!("{}/{}{}", sub.relative, sub.etag, sub.permissions.bits()));
                }
            }
            totals
        })
    }

    /// Size; with `include_mounts`, plus the roots of nested mounts.
    pub fn get_size(&self, include_mounts: bool) -> i64 {
        if !include_mounts {
            return self.data.size;
        }
        if self.data.encrypted && self.data.unencrypted_size > 0 && self.sub_mounts.is_empty() {
            return self.data.unencrypted_size;
        }
        self.totals().size
    }

    pub fn get_mtime(&self) -> i64 {
        self.totals().mtime
    }

    /// Own etag, or a digest over it and every nested mount root's
    /// `relative/etag` plus permissions.
    pub fn get_etag(&self) -> String {
        let totals = self.totals();
        if totals.child_etags.is_empty() {
            return self.data.etag.clone();
        }
        let combined = format!("{}::{}", self.data.etag, totals.child_etags.join("::"));
        hex::encode(Md5::digest(combined.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn entry(size: i64, etag: &str, permissions: Permissions) -> CacheEntry {
        CacheEntry {
            id: FileId::new(1),
            storage: StorageNumericId::new(1),
            path: "files".into(),
            name: "files".into(),
            parent: None,
            mimetype: cumulus_types::DIR_MIMETYPE.into(),
            size,
            unencrypted_size: 0,
            mtime: 10,
            storage_mtime: 10,
            permissions,
            etag: etag.into(),
            encrypted: false,
            encryption_version: 0,
            checksum: String::new(),
            creation_time: 0,
            upload_time: 0,
        }
    }

    fn folder(size: i64, etag: &str) -> FileInfo {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mount = Arc::new(MountPoint::new("/u", storage.clone()));
        FileInfo::new("/u/files", storage, "files", entry(size, etag, Permissions::ALL), mount)
    }

    fn md5_hex(s: &str) -> String {
        hex::encode(Md5::digest(s.as_bytes()))
    }

    #[test]
    fn test_etag_without_mounts_is_own() {
        assert_eq!(folder(100, "A").get_etag(), "A");
    }

    #[test]
    fn test_etag_combines_sub_entry() {
        let perms = Permissions::READ | Permissions::UPDATE;
        let mut info = folder(100, "A");
        info.add_sub_entry(&entry(10, "B", perms), "/u/files/sub");
        let expected = md5_hex(&format!("A::/sub/B{}", perms.bits()));
        assert_eq!(info.get_etag(), expected);
        assert_eq!(info.get_etag(), expected);
    }

    #[test]
    fn test_etag_changes_with_each_part() {
        let base = {
            let mut info = folder(100, "A");
            info.add_sub_entry(&entry(10, "B", Permissions::READ), "/u/files/sub");
            info.get_etag()
        };
        for (etag, perms, at) in [
            ("C", Permissions::READ, "/u/files/sub"),
            ("B", Permissions::ALL, "/u/files/sub"),
            ("B", Permissions::READ, "/u/files/other"),
        ] {
            let mut info = folder(100, "A");
            info.add_sub_entry(&entry(10, etag, perms), at);
            assert_ne!(info.get_etag(), base);
        }
    }

    #[test]
    fn test_size_aggregation() {
        let mut info = folder(100, "A");
        info.add_sub_entry(&entry(10, "B", Permissions::READ), "/u/files/a");
        info.add_sub_entry(&entry(20, "C", Permissions::READ), "/u/files/b");
        assert_eq!(info.get_size(true), 130);
        assert_eq!(info.get_size(false), 100);
    }

    #[test]
    fn test_sub_mounts_are_folded_lazily() {
        let inner = MemoryStorage::new();
        inner.file_put_contents("a.txt", b"12345").unwrap();
        crate::cache::Scanner::new(&inner).scan("", crate::cache::ScanMode::Recursive).unwrap();
        let sub = Arc::new(MountPoint::new("/u/files/ext", Arc::new(inner)));

        let mut info = folder(100, "A");
        info.set_sub_mounts(vec![sub]);
        assert_eq!(info.get_size(true), 105);
        assert_ne!(info.get_etag(), "A");
    }
}
