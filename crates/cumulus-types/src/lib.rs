//! Shared metadata, permission, and lock types for cumulus.
//!
//! This crate has **no internal cumulus dependencies**: a pure leaf crate that
//! the VFS core and any host integration build on.
//!
//! # Key Types
//!
//! |----------------------|--------------------------------------------------|
//! | Type                 | Purpose                                          |
//! |----------------------|--------------------------------------------------|
//! | [`FileId`]           | Metadata-cache row id, unique across storages    |
//! | [`StorageNumericId`] | Numeric id of a storage's metadata cache         |
//! | [`Permissions`]      | READ / UPDATE / CREATE / DELETE / SHARE bitmask  |
//! | [`CacheEntry`]       | One metadata-cache record                        |
//! | [`CacheUpdate`]      | Partial record used to insert or patch an entry  |
//! | [`LockType`]         | Shared or exclusive lock                         |
//! |----------------------|--------------------------------------------------|

pub mod entry;
pub mod ids;
pub mod lock;
pub mod mime;
pub mod permissions;

pub use entry::{CacheEntry, CacheUpdate, FileType};
pub use ids::{FileId, StorageNumericId};
pub use lock::LockType;
pub use mime::{DIR_MIMETYPE, mime_part, mimetype_for_name};
pub use permissions::Permissions;
