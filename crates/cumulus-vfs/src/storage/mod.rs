//! Storage capability interface.
//!
//! A storage is addressed by internal paths: no leading slash, `""` for its
//! root. Calls return `Ok(false)` / `Ok(None)` when the backend declines an
//! operation and `Err` only for unexpected failures.

mod local;
mod memory;
mod null;
pub mod wrapper;

use std::io::{Read, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use cumulus_types::{DIR_MIMETYPE, FileType, LockType, Permissions, StorageNumericId, mimetype_for_name};
use md5::Md5;
use sha2::{Digest, Sha256};
use strum::{Display, EnumString};

use crate::cache::{MetadataCache, Watcher, new_etag};
use crate::error::{InvalidPathReason, VfsError, VfsResult};
use crate::lock::{LockingProvider, storage_lock_key};
use crate::path::{FilenameValidator, basename, join_internal};

pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use null::NullStorage;

/// Capabilities a storage (or one of its wrappers) can advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Capability {
    Local,
    Home,
    Shared,
    Null,
    Locking,
    PermissionsMask,
    Availability,
    Encoding,
    Quota,
    ReadOnly,
}

/// Result of `stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub file_type: FileType,
    pub size: i64,
    pub mtime: i64,
}

impl FileStat {
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Dir
    }
}

/// Free space report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeSpace {
    Unknown,
    Unlimited,
    Bytes(i64),
}

impl FreeSpace {
    /// Sentinel integers used by clients: `-2` unknown, `-3` unlimited.
    pub fn as_legacy(&self) -> i64 {
        match self {
            FreeSpace::Unknown => -2,
            FreeSpace::Unlimited => -3,
            FreeSpace::Bytes(n) => *n,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum HashAlgorithm {
    Md5,
    Sha256,
}

/// `fopen` mode. `b` and `t` flags are accepted and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// `r`
    Read,
    /// `r+`
    ReadWrite,
    /// `w` / `w+`: truncate or create.
    Write { read: bool },
    /// `a` / `a+`: append, create if missing.
    Append { read: bool },
    /// `x` / `x+`: create, fail if it exists.
    CreateNew { read: bool },
    /// `c` / `c+`: create if missing, never truncate.
    Create { read: bool },
}

impl OpenMode {
    pub fn is_write(&self) -> bool {
        !matches!(self, OpenMode::Read)
    }

    pub fn is_readable(&self) -> bool {
        match self {
            OpenMode::Read | OpenMode::ReadWrite => true,
            OpenMode::Write { read }
            | OpenMode::Append { read }
            | OpenMode::CreateNew { read }
            | OpenMode::Create { read } => *read,
        }
    }
}

impl FromStr for OpenMode {
    type Err = VfsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned: String = s.chars().filter(|c| *c != 'b' && *c != 't').collect();
        let mode = match cleaned.as_str() {
            "r" => OpenMode::Read,
            "r+" => OpenMode::ReadWrite,
            "w" => OpenMode::Write { read: false },
            "w+" => OpenMode::Write { read: true },
            "a" => OpenMode::Append { read: false },
            "a+" => OpenMode::Append { read: true },
            "x" => OpenMode::CreateNew { read: false },
            "x+" => OpenMode::CreateNew { read: true },
            "c" => OpenMode::Create { read: false },
            "c+" => OpenMode::Create { read: true },
            _ => return Err(VfsError::other(format!("invalid fopen mode {:?}", s))),
        };
        Ok(mode)
    }
}

/// Byte stream returned by `fopen`.
pub trait FileStream: Read + Write + Send {}

impl<T: Read + Write + Send> FileStream for T {}

pub trait Storage: Send + Sync {
    /// Stable string id, e.g. `local::/srv/data/alice/`.
    fn id(&self) -> &str;

    fn cache(&self) -> Arc<dyn MetadataCache>;

    fn watcher(&self) -> &Watcher;

    fn instance_of(&self, capability: Capability) -> bool;

    fn stat(&self, path: &str) -> VfsResult<Option<FileStat>>;

    /// Names of the direct children of a directory.
    fn read_dir(&self, path: &str) -> VfsResult<Option<Vec<String>>>;

    fn fopen(&self, path: &str, mode: OpenMode) -> VfsResult<Option<Box<dyn FileStream>>>;

    fn mkdir(&self, path: &str) -> VfsResult<bool>;

    /// Remove a directory and everything in it.
    fn rmdir(&self, path: &str) -> VfsResult<bool>;

    fn unlink(&self, path: &str) -> VfsResult<bool>;

    fn rename(&self, source: &str, target: &str) -> VfsResult<bool>;

    fn copy(&self, source: &str, target: &str) -> VfsResult<bool>;

    /// Set the mtime (now when `None`), creating an empty file if missing.
    fn touch(&self, path: &str, mtime: Option<i64>) -> VfsResult<bool>;

    // ========================================================================
    // Derived
    // ========================================================================

    fn numeric_id(&self) -> StorageNumericId {
        self.cache().numeric_storage_id()
    }

    fn is_local(&self) -> bool {
        false
    }

    /// A real filesystem path for the node, if the backend has one.
    fn local_file(&self, _path: &str) -> VfsResult<Option<PathBuf>> {
        Ok(None)
    }

    fn filetype(&self, path: &str) -> VfsResult<Option<FileType>> {
        Ok(self.stat(path)?.map(|s| s.file_type))
    }

    fn is_dir(&self, path: &str) -> VfsResult<bool> {
        Ok(self.filetype(path)? == Some(FileType::Dir))
    }

    fn is_file(&self, path: &str) -> VfsResult<bool> {
        Ok(self.filetype(path)? == Some(FileType::File))
    }

    fn file_exists(&self, path: &str) -> VfsResult<bool> {
        Ok(self.stat(path)?.is_some())
    }

    fn filesize(&self, path: &str) -> VfsResult<Option<i64>> {
        Ok(self.stat(path)?.map(|s| s.size))
    }

    fn filemtime(&self, path: &str) -> VfsResult<Option<i64>> {
        Ok(self.stat(path)?.map(|s| s.mtime))
    }

    fn mime_type(&self, path: &str) -> VfsResult<Option<String>> {
        Ok(self.stat(path)?.map(|s| {
            if s.is_dir() {
                DIR_MIMETYPE.to_string()
            } else {
                mimetype_for_name(basename(path)).to_string()
            }
        }))
    }

    fn permissions(&self, path: &str) -> VfsResult<Permissions> {
        Ok(match self.stat(path)? {
            Some(stat) if stat.is_dir() => Permissions::ALL,
            Some(_) => Permissions::ALL.for_file(),
            None => Permissions::empty(),
        })
    }

    fn is_readable(&self, path: &str) -> VfsResult<bool> {
        Ok(self.permissions(path)?.contains(Permissions::READ))
    }

    fn is_updatable(&self, path: &str) -> VfsResult<bool> {
        Ok(self.permissions(path)?.contains(Permissions::UPDATE))
    }

    fn is_creatable(&self, path: &str) -> VfsResult<bool> {
        Ok(self.permissions(path)?.contains(Permissions::CREATE))
    }

    fn is_deletable(&self, path: &str) -> VfsResult<bool> {
        Ok(self.permissions(path)?.contains(Permissions::DELETE))
    }

    fn is_sharable(&self, path: &str) -> VfsResult<bool> {
        Ok(self.permissions(path)?.contains(Permissions::SHARE))
    }

    fn file_get_contents(&self, path: &str) -> VfsResult<Option<Vec<u8>>> {
        let Some(mut stream) = self.fopen(path, OpenMode::Read)? else {
            return Ok(None);
        };
        let mut data = Vec::new();
        stream.read_to_end(&mut data)?;
        Ok(Some(data))
    }

    fn file_put_contents(&self, path: &str, data: &[u8]) -> VfsResult<Option<u64>> {
        let Some(mut stream) = self.fopen(path, OpenMode::Write { read: false })? else {
            return Ok(None);
        };
        stream.write_all(data)?;
        stream.flush()?;
        Ok(Some(data.len() as u64))
    }

    fn hash(&self, algorithm: HashAlgorithm, path: &str) -> VfsResult<Option<String>> {
        let Some(data) = self.file_get_contents(path)? else {
            return Ok(None);
        };
        Ok(Some(match algorithm {
            HashAlgorithm::Md5 => hex::encode(Md5::digest(&data)),
            HashAlgorithm::Sha256 => hex::encode(Sha256::digest(&data)),
        }))
    }

    fn free_space(&self, _path: &str) -> VfsResult<FreeSpace> {
        Ok(FreeSpace::Unknown)
    }

    fn get_owner(&self, _path: &str) -> VfsResult<Option<String>> {
        Ok(None)
    }

    fn get_etag(&self, path: &str) -> VfsResult<Option<String>> {
        Ok(self.stat(path)?.map(|_| new_etag()))
    }

    /// Whether the node changed on the backend since `time`.
    fn has_updated(&self, path: &str, time: i64) -> VfsResult<bool> {
        Ok(self.filemtime(path)?.is_some_and(|mtime| mtime > time))
    }

    fn copy_from_storage(&self, source: &dyn Storage, source_path: &str, target_path: &str) -> VfsResult<bool> {
        copy_tree(source, source_path, self, target_path)
    }

    fn move_from_storage(&self, source: &dyn Storage, source_path: &str, target_path: &str) -> VfsResult<bool> {
        if source.id() == self.id() {
            return self.rename(source_path, target_path);
        }
        if !self.copy_from_storage(source, source_path, target_path)? {
            return Ok(false);
        }
        if source.is_dir(source_path)? {
            source.rmdir(source_path)
        } else {
            source.unlink(source_path)
        }
    }

    /// Temporarily lift quota enforcement (used when creating structural folders).
    fn set_quota_enabled(&self, _enabled: bool) {}

    fn verify_path(&self, _path: &str, file_name: &str, validator: &FilenameValidator) -> VfsResult<()> {
        validator.validate(file_name)
    }

    fn acquire_lock(&self, path: &str, lock_type: LockType, provider: &dyn LockingProvider) -> VfsResult<()> {
        provider.acquire_lock(&storage_lock_key(self.id(), path), lock_type)
    }

    fn change_lock(&self, path: &str, lock_type: LockType, provider: &dyn LockingProvider) -> VfsResult<()> {
        provider.change_lock(&storage_lock_key(self.id(), path), lock_type)
    }

    fn release_lock(&self, path: &str, lock_type: LockType, provider: &dyn LockingProvider) {
        provider.release_lock(&storage_lock_key(self.id(), path), lock_type)
    }
}

/// Recursive copy between any two storages through `fopen` / `mkdir`.
pub fn copy_tree<T: Storage + ?Sized>(
    source: &dyn Storage,
    source_path: &str,
    target: &T,
    target_path: &str,
) -> VfsResult<bool> {
    let Some(stat) = source.stat(source_path)? else {
        return Ok(false);
    };

    if stat.is_dir() {
        if !target.is_dir(target_path)? && !target.mkdir(target_path)? {
            return Ok(false);
        }
        for name in source.read_dir(source_path)?.unwrap_or_default() {
            let ok = copy_tree(
                source,
                &join_internal(source_path, &name),
                target,
                &join_internal(target_path, &name),
            )?;
            if !ok {
                return Ok(false);
            }
        }
        return Ok(true);
    }

    let Some(mut input) = source.fopen(source_path, OpenMode::Read)? else {
        return Ok(false);
    };
    let Some(mut output) = target.fopen(target_path, OpenMode::Write { read: false })? else {
        return Ok(false);
    };
    std::io::copy(&mut input, &mut output)?;
    output.flush()?;
    Ok(true)
}

/// Reject a file name through the storage before touching it.
pub(crate) fn check_name(storage: &dyn Storage, path: &str, validator: &FilenameValidator) -> VfsResult<()> {
    let name = basename(path);
    if name.is_empty() {
        return Err(VfsError::invalid_path(path, InvalidPathReason::EmptyName));
    }
    storage.verify_path(path, name, validator)
}
