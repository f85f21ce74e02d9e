//! # cumulus-vfs
//!
//! Multi-tenant virtual filesystem core for cumulus.
//!
//! One global namespace (`/<user>/files/...`, `/appdata_<instance>/...`) is
//! routed onto many storages:
//! - [`mount::MountManager`] maps absolute paths onto mounts by longest prefix
//! - [`setup::SetupManager`] populates the mounts for a user lazily, the
//!   first time one of their paths is touched
//! - [`mount::StorageWrapperPipeline`] decorates every storage as it is
//!   mounted (sharing mask, availability, encoding, quota, read-only)
//! - [`View`] is the facade: path validation, locking, hooks and cache
//!   upkeep around each storage call
//! - [`lock::LockCoordinator`] locks a path and its ancestors so concurrent
//!   writers never see each other's half-done work
//! - [`FileInfo`] hands out metadata, folding in nested mounts
//!
//! Everything hangs off a [`FileSystemContext`]:
//!
//! ```ignore
//! let ctx = FileSystemContext::builder(VfsConfig::default())
//!     .with_users(Arc::new(MemoryUserManager::with_users(["alice"])))
//!     .build();
//! let view = ctx.init("alice", "/alice/files")?;
//! view.file_put_contents("/notes.txt", b"hello")?;
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod file_info;
pub mod hooks;
pub mod lock;
pub mod mount;
pub mod path;
pub mod setup;
pub mod storage;
pub mod view;

pub use config::VfsConfig;
pub use context::{FileSystemContext, FileSystemContextBuilder, MemoryShareLookup, ShareLookup};
pub use error::{InvalidPathReason, VfsError, VfsResult};
pub use file_info::FileInfo;
pub use hooks::{FileSignal, HookBus, HookDecision, HookEvent, HookListener, LifecycleEvent, MountSignal, MoveSignal};
pub use lock::{LockCoordinator, LockingProvider, MemoryLockingProvider, NoopLockingProvider};
pub use mount::{MountKind, MountLifecycle, MountManager, MountOptions, MountPoint, MountProvider};
pub use setup::{MemoryUserManager, MountInvalidation, SetupManager, User, UserManager};
pub use storage::{LocalStorage, MemoryStorage, NullStorage, OpenMode, Storage};
pub use view::{IncludeMounts, View, ViewFile};

pub use cumulus_types::{CacheEntry, CacheUpdate, FileId, LockType, Permissions, StorageNumericId};
