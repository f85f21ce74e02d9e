//! VFS error types.
//!
//! Structural failures (validation, locking, lookup) are errors. A backend
//! declining an operation is not: storage calls report that as `Ok(false)` or
//! `Ok(None)` and the facade passes it through unchanged.

use std::io;

use cumulus_types::LockType;
use strum::Display;
use thiserror::Error;

/// Why a path or file name was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum InvalidPathReason {
    /// Empty file name.
    EmptyName,
    /// Name is on the forbidden-name list.
    ReservedWord,
    /// File name exceeds the configured maximum.
    NameTooLong,
    /// Name contains a forbidden character.
    InvalidCharacter(char),
    /// Name is `.` or `..`.
    DotName,
    /// Path contains a `..` segment.
    Traversal,
    /// Absolute path exceeds the configured maximum.
    PathTooLong,
    /// Rename target is inside the source.
    MoveIntoSelf,
}

/// VFS error type.
#[derive(Debug, Error)]
pub enum VfsError {
    /// Path or name failed validation.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath {
        path: String,
        reason: InvalidPathReason,
    },

    /// File, cache entry, or id not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A conflicting lock is held.
    #[error("{path} is locked ({lock_type} requested)")]
    Locked { path: String, lock_type: LockType },

    /// A user id did not resolve to a user.
    #[error("no such user: {0}")]
    NoUser(String),

    /// Operation not allowed on this node (e.g. moving a mount into a share).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Backend unreachable; callers listing directories skip the mount.
    #[error("storage not available: {0}")]
    StorageNotAvailable(String),

    /// Backend misconfigured or corrupt.
    #[error("storage invalid: {0}")]
    StorageInvalid(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Path escapes the storage root (security violation).
    #[error("path escapes root: {0}")]
    PathEscapesRoot(String),

    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl VfsError {
    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>, reason: InvalidPathReason) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason,
        }
    }

    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create a Locked error.
    pub fn locked(path: impl Into<String>, lock_type: LockType) -> Self {
        Self::Locked {
            path: path.into(),
            lock_type,
        }
    }

    /// Create a NoUser error.
    pub fn no_user(uid: impl Into<String>) -> Self {
        Self::NoUser(uid.into())
    }

    /// Create a Forbidden error.
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    /// Create a StorageNotAvailable error.
    pub fn storage_not_available(msg: impl Into<String>) -> Self {
        Self::StorageNotAvailable(msg.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    /// Create a PathEscapesRoot error.
    pub fn path_escapes_root(path: impl Into<String>) -> Self {
        Self::PathEscapesRoot(path.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// The rejection reason, for InvalidPath errors.
    pub fn invalid_path_reason(&self) -> Option<InvalidPathReason> {
        match self {
            Self::InvalidPath { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Backend failures that directory listings and size aggregation swallow.
    pub fn is_storage_error(&self) -> bool {
        matches!(
            self,
            Self::StorageNotAvailable(_) | Self::StorageInvalid(_) | Self::Io(_)
        )
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked { .. })
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::InvalidPath { .. } => io::Error::new(io::ErrorKind::InvalidInput, e.to_string()),
            VfsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            VfsError::Locked { .. } => io::Error::new(io::ErrorKind::WouldBlock, e.to_string()),
            VfsError::NoUser(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            VfsError::Forbidden(msg) | VfsError::PermissionDenied(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            VfsError::PathEscapesRoot(msg) => io::Error::new(io::ErrorKind::PermissionDenied, msg),
            VfsError::AlreadyExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            VfsError::Io(e) => e,
            VfsError::StorageNotAvailable(msg)
            | VfsError::StorageInvalid(msg)
            | VfsError::Config(msg)
            | VfsError::Other(msg) => io::Error::other(msg),
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;
