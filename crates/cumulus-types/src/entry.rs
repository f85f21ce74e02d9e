//! Metadata-cache records.
//!
//! [`CacheEntry`] is a full row as the cache hands it out. [`CacheUpdate`] is
//! the partial form scanners and the facade write back: only `Some` fields are
//! applied.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::ids::{FileId, StorageNumericId};
use crate::mime::{DIR_MIMETYPE, mime_part};
use crate::permissions::Permissions;

/// Node kind.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FileType {
    File,
    Dir,
}

/// One metadata-cache record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: FileId,
    pub storage: StorageNumericId,
    /// Storage-internal path, no leading slash, `""` for the storage root.
    pub path: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<FileId>,
    pub mimetype: String,
    /// `-1` while unknown (folder not fully scanned).
    pub size: i64,
    #[serde(default)]
    pub unencrypted_size: i64,
    pub mtime: i64,
    pub storage_mtime: i64,
    pub permissions: Permissions,
    pub etag: String,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub encryption_version: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
    #[serde(default)]
    pub creation_time: i64,
    #[serde(default)]
    pub upload_time: i64,
}

impl CacheEntry {
    pub fn is_dir(&self) -> bool {
        self.mimetype == DIR_MIMETYPE
    }

    pub fn file_type(&self) -> FileType {
        if self.is_dir() { FileType::Dir } else { FileType::File }
    }

    pub fn mime_part(&self) -> &str {
        mime_part(&self.mimetype)
    }

    /// Apply the `Some` fields of an update in place.
    pub fn apply(&mut self, update: &CacheUpdate) {
        if let Some(v) = &update.mimetype {
            self.mimetype = v.clone();
        }
        if let Some(v) = update.size {
            self.size = v;
        }
        if let Some(v) = update.unencrypted_size {
            self.unencrypted_size = v;
        }
        if let Some(v) = update.mtime {
            self.mtime = v;
        }
        if let Some(v) = update.storage_mtime {
            self.storage_mtime = v;
        }
        if let Some(v) = update.permissions {
            self.permissions = v;
        }
        if let Some(v) = &update.etag {
            self.etag = v.clone();
        }
        if let Some(v) = update.encrypted {
            self.encrypted = v;
        }
        if let Some(v) = update.encryption_version {
            self.encryption_version = v;
        }
        if let Some(v) = &update.checksum {
            self.checksum = v.clone();
        }
        if let Some(v) = update.creation_time {
            self.creation_time = v;
        }
        if let Some(v) = update.upload_time {
            self.upload_time = v;
        }
    }
}

/// Partial cache record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unencrypted_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtime: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_mtime: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Permissions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_version: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_time: Option<i64>,
}

impl CacheUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mimetype(mut self, mimetype: impl Into<String>) -> Self {
        self.mimetype = Some(mimetype.into());
        self
    }

    pub fn with_size(mut self, size: i64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_mtime(mut self, mtime: i64) -> Self {
        self.mtime = Some(mtime);
        self
    }

    pub fn with_storage_mtime(mut self, mtime: i64) -> Self {
        self.storage_mtime = Some(mtime);
        self
    }

    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl From<&CacheEntry> for CacheUpdate {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            mimetype: Some(entry.mimetype.clone()),
            size: Some(entry.size),
            unencrypted_size: Some(entry.unencrypted_size),
            mtime: Some(entry.mtime),
            storage_mtime: Some(entry.storage_mtime),
            permissions: Some(entry.permissions),
            etag: Some(entry.etag.clone()),
            encrypted: Some(entry.encrypted),
            encryption_version: Some(entry.encryption_version),
            checksum: Some(entry.checksum.clone()),
            creation_time: Some(entry.creation_time),
            upload_time: Some(entry.upload_time),
        }
    }
}
