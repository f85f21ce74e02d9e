//! Metadata queries: file info, directory listings, search and id lookup.

use std::sync::Arc;

use cumulus_types::{CacheEntry, CacheUpdate, FileId, LockType, Permissions, StorageNumericId};
use tracing::{debug, warn};

use super::View;
use crate::cache::{MetadataCache, ScanMode, Scanner};
use crate::error::{VfsError, VfsResult};
use crate::file_info::FileInfo;
use crate::mount::{MountKind, MountPoint};
use crate::path::{basename, is_partial_file, join, join_internal};
use crate::storage::Storage;

/// Which nested mounts a folder's [`FileInfo`] folds in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IncludeMounts {
    /// Only the folder's own storage.
    None,
    /// Every mount below the folder.
    #[default]
    All,
    /// Mounts below the folder except received shares.
    ExternalOnly,
}

impl View {
    fn scanner<'a>(&self, storage: &'a dyn Storage) -> Scanner<'a> {
        Scanner::new(storage).with_partial_extension(self.partial_extension())
    }

    /// Cache record for an internal path, scanning or refreshing it first
    /// when needed.
    fn cache_entry(&self, storage: &dyn Storage, internal: &str, absolute: &str) -> VfsResult<Option<CacheEntry>> {
        let cache = storage.cache();
        match cache.get(internal) {
            Some(entry) if entry.size >= 0 => {
                if !storage.watcher().needs_update(storage, internal, &entry)? {
                    return Ok(Some(entry));
                }
                match self.lock_guard(absolute, LockType::Shared, false) {
                    Ok(guard) => {
                        storage.watcher().update(storage, internal, &entry)?;
                        drop(guard);
                    }
                    Err(e) if e.is_locked() => {
                        debug!(path = absolute, "locked, serving cached metadata");
                        return Ok(Some(entry));
                    }
                    Err(e) => return Err(e),
                }
                Ok(cache.get(internal))
            }
            _ => {
                if !storage.file_exists(internal)? {
                    return Ok(None);
                }
                self.scanner(storage).scan(internal, ScanMode::Shallow)?;
                Ok(cache.get(internal))
            }
        }
    }

    /// Metadata for `path`. `Ok(None)` when nothing is there; partial
    /// upload paths are an error instead.
    #[tracing::instrument(skip(self), name = "view.get_file_info")]
    pub fn get_file_info(&self, path: &str, include_mounts: IncludeMounts) -> VfsResult<Option<FileInfo>> {
        let absolute = self.absolute(path)?;
        let relative = self.relative_or_err(&absolute)?;
        let mount = self.mount_for(&absolute)?;
        let internal = mount.get_internal_path(&absolute);
        let storage = mount.storage();

        let Some(mut data) = self.cache_entry(storage.as_ref(), &internal, &absolute)? else {
            if is_partial_file(&relative, self.partial_extension()) {
                return Err(VfsError::not_found(absolute));
            }
            return Ok(None);
        };

        if internal.is_empty() {
            if mount.is_moveable() {
                data.permissions |= Permissions::DELETE | Permissions::UPDATE;
            }
            data.name = basename(&absolute).to_string();
        }
        let owner = storage.get_owner(&internal)?;
        let is_dir = data.is_dir();
        let mut info = FileInfo::new(absolute, storage, internal, data, mount).with_owner(owner);

        if is_dir && include_mounts != IncludeMounts::None {
            self.add_sub_mounts(&mut info, include_mounts == IncludeMounts::ExternalOnly)?;
        }
        Ok(Some(info))
    }

    fn add_sub_mounts(&self, info: &mut FileInfo, external_only: bool) -> VfsResult<()> {
        let mut mounts = self.mounts_in(info.path())?;
        if external_only {
            mounts.retain(|m| m.kind() != MountKind::Shared);
        }
        info.set_sub_mounts(mounts);
        Ok(())
    }

    /// Children of `dir`, with the roots of mounts inside it spliced in.
    /// `mime_filter` matches the full mimetype when it contains `/`,
    /// otherwise the part before it.
    #[tracing::instrument(skip(self), name = "view.get_directory_content")]
    pub fn get_directory_content(&self, dir: &str, mime_filter: Option<&str>) -> VfsResult<Vec<FileInfo>> {
        let absolute = self.absolute(dir)?;
        let mount = self.mount_for(&absolute)?;
        let internal = mount.get_internal_path(&absolute);
        let storage = mount.storage();

        let Some(folder) = self.cache_entry(storage.as_ref(), &internal, &absolute)? else {
            return Ok(Vec::new());
        };
        if !folder.permissions.contains(Permissions::READ) {
            return Ok(Vec::new());
        }
        let sharing = !self.state.config.sharing_disabled;

        let cache = storage.cache();
        let mut contents = Vec::new();
        for mut child in cache.get_folder_contents_by_id(folder.id) {
            if !sharing {
                child.permissions.remove(Permissions::SHARE);
            }
            let child_internal = join_internal(&internal, &child.name);
            let owner = storage.get_owner(&child_internal)?;
            contents.push(
                FileInfo::new(join(&absolute, &child.name), storage.clone(), child_internal, child, mount.clone())
                    .with_owner(owner),
            );
        }

        let mut sub_mounts = self.mounts_in(&absolute)?;
        sub_mounts.sort_by_key(|m| m.mount_point());
        let prefix = format!("{}/", absolute.trim_end_matches('/'));

        for sub in sub_mounts {
            let sub_storage = sub.storage();
            let root = match sub_storage.cache().get("") {
                Some(root) => Some(root),
                None => match self.scanner(sub_storage.as_ref()).scan_file("") {
                    Ok(root) => root,
                    Err(e) if e.is_storage_error() => {
                        warn!(mount = %sub, error = %e, "storage not available, skipping mount");
                        continue;
                    }
                    Err(e) => return Err(e),
                },
            };
            let Some(mut root) = root else {
                continue;
            };
            let mount_point = sub.mount_point();
            let Some(relative) = mount_point.strip_prefix(&prefix) else {
                continue;
            };

            if let Some((first, _)) = relative.split_once('/') {
                let position = match contents.iter().position(|info| info.name() == first) {
                    Some(position) => position,
                    None => match self.create_mount_parent(storage.as_ref(), &internal, first)? {
                        Some(entry) => {
                            let child_internal = join_internal(&internal, first);
                            contents.push(FileInfo::new(
                                join(&absolute, first),
                                storage.clone(),
                                child_internal,
                                entry,
                                mount.clone(),
                            ));
                            contents.len() - 1
                        }
                        None => {
                            warn!(mount = %sub, folder = first, "can't create folder for nested mount");
                            continue;
                        }
                    },
                };
                contents[position].add_sub_entry(&root, &mount_point);
            } else {
                root.name = relative.to_string();
                if sub.is_moveable() {
                    root.permissions |= Permissions::UPDATE | Permissions::DELETE;
                } else {
                    root.permissions.remove(Permissions::UPDATE | Permissions::DELETE);
                }
                if !sharing {
                    root.permissions.remove(Permissions::SHARE);
                }
                let owner = sub_storage.get_owner("")?;
                contents.retain(|info| info.name() != relative);
                contents.push(FileInfo::new(mount_point.clone(), sub_storage, "", root, sub.clone()).with_owner(owner));
            }
        }

        if let Some(filter) = mime_filter {
            contents.retain(|info| {
                if filter.contains('/') {
                    info.mimetype() == filter
                } else {
                    info.mime_part() == filter
                }
            });
        }
        Ok(contents)
    }

    /// Folder a deeper mount hangs below, created if it is missing.
    fn create_mount_parent(&self, storage: &dyn Storage, internal: &str, name: &str) -> VfsResult<Option<CacheEntry>> {
        let path = join_internal(internal, name);
        storage.set_quota_enabled(false);
        let made = storage.mkdir(&path);
        storage.set_quota_enabled(true);
        match made {
            Ok(true) => {
                self.write_update(storage, &path, None)?;
                Ok(storage.cache().get(&path))
            }
            Ok(false) => Ok(None),
            Err(e) if e.is_storage_error() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write fields straight into the cache record for `path`, scanning it
    /// first if needed. `Ok(None)` when the node isn't there.
    pub fn put_file_info(&self, path: &str, update: &CacheUpdate) -> VfsResult<Option<FileId>> {
        let (storage, internal) = self.resolve_path(path)?;
        let cache = storage.cache();
        if !cache.in_cache(&internal) {
            if storage.file_exists(&internal)? {
                self.scanner(storage.as_ref()).scan(&internal, ScanMode::Shallow)?;
            }
            if !cache.in_cache(&internal) {
                return Ok(None);
            }
        }
        Ok(Some(cache.put(&internal, update)?))
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// Case-insensitive substring search on file names.
    pub fn search(&self, query: &str) -> VfsResult<Vec<FileInfo>> {
        let pattern = format!("%{}%", query);
        self.search_common(|cache| cache.search(&pattern))
    }

    /// Search with a raw `%` / `_` pattern.
    pub fn search_raw(&self, pattern: &str) -> VfsResult<Vec<FileInfo>> {
        self.search_common(|cache| cache.search(pattern))
    }

    pub fn search_by_mime(&self, mimetype: &str) -> VfsResult<Vec<FileInfo>> {
        self.search_common(|cache| cache.search_by_mime(mimetype))
    }

    fn search_common(&self, op: impl Fn(&dyn MetadataCache) -> Vec<CacheEntry>) -> VfsResult<Vec<FileInfo>> {
        let mut mounts = vec![self.mount_for(&self.root)?];
        mounts.extend(self.mounts_in(&self.root)?);

        let mut results = Vec::new();
        for mount in mounts {
            let storage = mount.storage();
            let cache = storage.cache();
            for entry in op(cache.as_ref()) {
                let absolute = join(&mount.mount_point(), &entry.path);
                if self.get_relative_path(&absolute).is_none() {
                    continue;
                }
                let internal = entry.path.clone();
                let owner = storage.get_owner(&internal)?;
                results.push(FileInfo::new(absolute, storage.clone(), internal, entry, mount.clone()).with_owner(owner));
            }
        }
        Ok(results)
    }

    // ========================================================================
    // Owner, etag, id lookup
    // ========================================================================

    pub fn get_owner(&self, path: &str) -> VfsResult<String> {
        let info = self
            .get_file_info(path, IncludeMounts::None)?
            .ok_or_else(|| VfsError::not_found(path))?;
        info.owner()
            .map(str::to_string)
            .ok_or_else(|| VfsError::not_found(format!("no owner for {}", path)))
    }

    pub fn get_etag(&self, path: &str) -> VfsResult<Option<String>> {
        let (storage, internal) = self.resolve_path(path)?;
        storage.get_etag(&internal)
    }

    /// View path of a file id. Own mounts win over received shares; with
    /// `storage` only that storage is consulted.
    pub fn get_path(&self, id: FileId, storage: Option<StorageNumericId>) -> VfsResult<String> {
        let mut mounts: Vec<Arc<MountPoint>> = self.mounts_in(&self.root)?;
        mounts.push(self.mount_for(&self.root)?);
        mounts.reverse();
        mounts.sort_by_key(|m| m.kind() == MountKind::Shared);
        if let Some(filter) = storage {
            mounts.retain(|m| m.numeric_storage_id() == filter);
        }

        for mount in mounts {
            let Some(internal) = mount.storage().cache().get_path_by_id(id) else {
                continue;
            };
            let absolute = join(&mount.mount_point(), &internal);
            if let Some(relative) = self.get_relative_path(&absolute) {
                return Ok(relative);
            }
        }
        Err(VfsError::not_found(format!("file id {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VfsConfig;
    use crate::context::FileSystemContext;
    use crate::setup::MemoryUserManager;
    use crate::storage::MemoryStorage;

    fn view() -> (FileSystemContext, Arc<View>) {
        let ctx = FileSystemContext::builder(VfsConfig::default())
            .with_users(Arc::new(MemoryUserManager::with_users(["alice"])))
            .build();
        let view = ctx.init("alice", "/alice/files").unwrap();
        (ctx, view)
    }

    #[test]
    fn test_file_info_basics() {
        let (_ctx, view) = view();
        view.file_put_contents("/doc.txt", b"hello").unwrap();
        let info = view.get_file_info("/doc.txt", IncludeMounts::All).unwrap().unwrap();
        assert_eq!(info.name(), "doc.txt");
        assert_eq!(info.get_size(true), 5);
        assert_eq!(info.mimetype(), "text/plain");
        assert!(view.get_file_info("/missing", IncludeMounts::All).unwrap().is_none());
    }

    #[test]
    fn test_partial_file_info_is_not_found() {
        let (_ctx, view) = view();
        let err = view.get_file_info("/upload.txt.part", IncludeMounts::All).unwrap_err();
        assert!(matches!(err, VfsError::NotFound(_)));
    }

    #[test]
    fn test_directory_content_with_nested_mounts() {
        let (ctx, view) = view();
        view.mkdir("/dir").unwrap();
        view.file_put_contents("/dir/a.txt", b"a").unwrap();

        let direct = MemoryStorage::with_id("memory::direct");
        direct.file_put_contents("x.bin", b"1234").unwrap();
        ctx.mounts().add_mount(MountPoint::new("/alice/files/dir/ext", Arc::new(direct)));
        ctx.mounts().add_mount(MountPoint::new(
            "/alice/files/dir/deep/inner",
            Arc::new(MemoryStorage::with_id("memory::inner")),
        ));

        let names: Vec<String> = view
            .get_directory_content("/dir", None)
            .unwrap()
            .iter()
            .map(|info| info.name().to_string())
            .collect();
        assert!(names.contains(&"a.txt".to_string()));
        assert!(names.contains(&"ext".to_string()));
        assert!(names.contains(&"deep".to_string()));
        assert!(view.is_dir("/dir/deep").unwrap());

        let ext = view
            .get_directory_content("/dir", None)
            .unwrap()
            .into_iter()
            .find(|info| info.name() == "ext")
            .unwrap();
        assert!(!ext.is_deletable());
        assert!(!ext.is_updateable());
    }

    #[test]
    fn test_mime_filter() {
        let (_ctx, view) = view();
        view.file_put_contents("/a.txt", b"a").unwrap();
        view.file_put_contents("/b.png", b"b").unwrap();
        let text = view.get_directory_content("/", Some("text")).unwrap();
        assert_eq!(text.len(), 1);
        let png = view.get_directory_content("/", Some("image/png")).unwrap();
        assert_eq!(png[0].name(), "b.png");
    }

    #[test]
    fn test_search_and_get_path() {
        let (_ctx, view) = view();
        view.mkdir("/reports").unwrap();
        view.file_put_contents("/reports/q1.txt", b"1").unwrap();
        let hits = view.search("q1").unwrap();
        assert_eq!(hits.len(), 1);
        let id = hits[0].id();
        assert_eq!(view.get_path(id, None).unwrap(), "/reports/q1.txt");
        assert!(view.get_path(FileId::new(999_999), None).is_err());
    }

    #[test]
    fn test_put_file_info() {
        let (_ctx, view) = view();
        view.file_put_contents("/m.txt", b"m").unwrap();
        assert!(view.put_file_info("/m.txt", &CacheUpdate::new().with_mtime(42)).unwrap().is_some());
        let info = view.get_file_info("/m.txt", IncludeMounts::None).unwrap().unwrap();
        assert_eq!(info.get_mtime(), 42);
        assert!(view.put_file_info("/none.txt", &CacheUpdate::new()).unwrap().is_none());
    }
}
