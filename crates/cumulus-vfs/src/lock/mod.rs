//! Locking providers and the per-view lock coordinator.

mod coordinator;
mod provider;

pub use coordinator::{LockCoordinator, PathLockGuard, should_lock_file};
pub use provider::{
    LockStats, LockingProvider, MemoryLockingProvider, NoopLockingProvider, storage_lock_key,
};
