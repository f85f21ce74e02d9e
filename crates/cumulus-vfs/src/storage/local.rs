//! Local filesystem storage.
//!
//! All operations are relative to `root`. Path security is enforced:
//! attempts to escape the root via `..` or symlinks are rejected.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use cumulus_types::FileType;

use super::{Capability, FileStat, FileStream, OpenMode, Storage};
use crate::cache::{MemoryCache, MetadataCache, Watcher, next_storage_numeric_id};
use crate::error::{VfsError, VfsResult};

/// Map "not found"-style failures to `None`, everything else to an error.
fn soft<T>(result: io::Result<T>) -> VfsResult<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::AlreadyExists) => Ok(None),
        Err(e) => Err(VfsError::Io(e)),
    }
}

fn to_unix(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Storage backed by a directory on the local disk.
#[derive(Debug)]
pub struct LocalStorage {
    id: String,
    root: PathBuf,
    cache: Arc<MemoryCache>,
    watcher: Watcher,
    owner: Option<String>,
}

impl LocalStorage {
    /// Create a storage rooted at `root`, creating the directory if needed.
    ///
    /// The root is canonicalized so symlinked temp dirs (macOS `/tmp`) still
    /// pass the escape check.
    pub fn new(root: impl Into<PathBuf>) -> VfsResult<Self> {
        let root: PathBuf = root.into();
        fs::create_dir_all(&root)?;
        let root = dunce::canonicalize(&root)?;
        Ok(Self {
            id: format!("local::{}/", root.display()),
            root,
            cache: Arc::new(MemoryCache::new(next_storage_numeric_id())),
            watcher: Watcher::default(),
            owner: None,
        })
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_watcher(mut self, watcher: Watcher) -> Self {
        self.watcher = watcher;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an internal path to a real path under the root.
    fn resolve(&self, path: &str) -> VfsResult<PathBuf> {
        let path = path.trim_matches('/');
        if path.is_empty() {
            return Ok(self.root.clone());
        }
        let full = self.root.join(path);

        // Canonicalize the deepest existing ancestor to catch symlink escapes
        let mut existing = full.as_path();
        let mut rest = Vec::new();
        while !existing.exists() {
            let (Some(parent), Some(name)) = (existing.parent(), existing.file_name()) else {
                break;
            };
            rest.push(name.to_os_string());
            existing = parent;
        }
        let mut canonical = dunce::canonicalize(existing).unwrap_or_else(|_| existing.to_path_buf());
        for name in rest.into_iter().rev() {
            if name == ".." {
                return Err(VfsError::path_escapes_root(path));
            }
            canonical.push(name);
        }

        if !canonical.starts_with(&self.root) {
            return Err(VfsError::path_escapes_root(format!(
                "{} is not under {}",
                canonical.display(),
                self.root.display()
            )));
        }
        Ok(canonical)
    }
}

impl Storage for LocalStorage {
    fn id(&self) -> &str {
        &self.id
    }

    fn cache(&self) -> Arc<dyn MetadataCache> {
        self.cache.clone()
    }

    fn watcher(&self) -> &Watcher {
        &self.watcher
    }

    fn instance_of(&self, capability: Capability) -> bool {
        matches!(capability, Capability::Local | Capability::Locking)
    }

    fn is_local(&self) -> bool {
        true
    }

    fn local_file(&self, path: &str) -> VfsResult<Option<PathBuf>> {
        Ok(Some(self.resolve(path)?))
    }

    fn stat(&self, path: &str) -> VfsResult<Option<FileStat>> {
        let full = self.resolve(path)?;
        Ok(soft(fs::metadata(&full))?.map(|meta| FileStat {
            file_type: if meta.is_dir() { FileType::Dir } else { FileType::File },
            size: if meta.is_dir() { 0 } else { meta.len() as i64 },
            mtime: meta.modified().map(to_unix).unwrap_or(0),
        }))
    }

    fn read_dir(&self, path: &str) -> VfsResult<Option<Vec<String>>> {
        let full = self.resolve(path)?;
        if !full.is_dir() {
            return Ok(None);
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&full)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(Some(names))
    }

    fn fopen(&self, path: &str, mode: OpenMode) -> VfsResult<Option<Box<dyn FileStream>>> {
        let full = self.resolve(path)?;
        if full.is_dir() {
            return Ok(None);
        }
        let mut options = fs::OpenOptions::new();
        match mode {
            OpenMode::Read => options.read(true),
            OpenMode::ReadWrite => options.read(true).write(true),
            OpenMode::Write { read } => options.read(read).write(true).create(true).truncate(true),
            OpenMode::Append { read } => options.read(read).append(true).create(true),
            OpenMode::CreateNew { read } => options.read(read).write(true).create_new(true),
            OpenMode::Create { read } => options.read(read).write(true).create(true),
        };
        Ok(soft(options.open(&full))?.map(|file| Box::new(file) as Box<dyn FileStream>))
    }

    fn mkdir(&self, path: &str) -> VfsResult<bool> {
        let full = self.resolve(path)?;
        Ok(soft(fs::create_dir(&full))?.is_some())
    }

    fn rmdir(&self, path: &str) -> VfsResult<bool> {
        if path.trim_matches('/').is_empty() {
            return Ok(false);
        }
        let full = self.resolve(path)?;
        if !full.is_dir() {
            return Ok(false);
        }
        Ok(soft(fs::remove_dir_all(&full))?.is_some())
    }

    fn unlink(&self, path: &str) -> VfsResult<bool> {
        let full = self.resolve(path)?;
        if full.is_dir() {
            return self.rmdir(path);
        }
        Ok(soft(fs::remove_file(&full))?.is_some())
    }

    fn rename(&self, source: &str, target: &str) -> VfsResult<bool> {
        let from = self.resolve(source)?;
        let to = self.resolve(target)?;
        if to.starts_with(&from) && to != from {
            return Ok(false);
        }
        if from.is_dir() && to.is_dir() {
            fs::remove_dir_all(&to)?;
        }
        Ok(soft(fs::rename(&from, &to))?.is_some())
    }

    fn copy(&self, source: &str, target: &str) -> VfsResult<bool> {
        let from = self.resolve(source)?;
        if from.is_dir() {
            return super::copy_tree(self, source, self, target);
        }
        let to = self.resolve(target)?;
        Ok(soft(fs::copy(&from, &to))?.is_some())
    }

    fn touch(&self, path: &str, mtime: Option<i64>) -> VfsResult<bool> {
        let full = self.resolve(path)?;
        if !full.exists() && soft(fs::File::create(&full))?.is_none() {
            return Ok(false);
        }
        let time = match mtime {
            Some(secs) => UNIX_EPOCH + Duration::from_secs(secs.max(0) as u64),
            None => SystemTime::now(),
        };
        let file = fs::File::open(&full)?;
        file.set_modified(time)?;
        Ok(true)
    }

    fn get_owner(&self, _path: &str) -> VfsResult<Option<String>> {
        Ok(self.owner.clone())
    }
}
