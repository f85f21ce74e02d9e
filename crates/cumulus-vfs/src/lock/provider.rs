//! Lock providers.
//!
//! Keys are opaque strings built by [`storage_lock_key`]. A provider fails
//! fast with [`VfsError::Locked`]; retries are the caller's business.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use cumulus_types::LockType;
use md5::{Digest, Md5};
use parking_lot::Mutex;

use crate::error::{VfsError, VfsResult};

/// Lock key for a storage-internal path.
pub fn storage_lock_key(storage_id: &str, internal_path: &str) -> String {
    let digest = Md5::digest(format!("{}::{}", storage_id, internal_path.trim_matches('/')));
    format!("files/{}", hex::encode(digest))
}

pub trait LockingProvider: Send + Sync {
    fn acquire_lock(&self, key: &str, lock_type: LockType) -> VfsResult<()>;

    /// Convert a held lock. Upgrading fails while other shared holders exist.
    fn change_lock(&self, key: &str, target: LockType) -> VfsResult<()>;

    fn release_lock(&self, key: &str, lock_type: LockType);

    /// A no-op provider lets callers skip lock bookkeeping entirely.
    fn is_noop(&self) -> bool {
        false
    }
}

/// Provider used when file locking is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLockingProvider;

impl LockingProvider for NoopLockingProvider {
    fn acquire_lock(&self, _key: &str, _lock_type: LockType) -> VfsResult<()> {
        Ok(())
    }

    fn change_lock(&self, _key: &str, _target: LockType) -> VfsResult<()> {
        Ok(())
    }

    fn release_lock(&self, _key: &str, _lock_type: LockType) {}

    fn is_noop(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockState {
    Shared(u32),
    Exclusive,
}

/// Call counters, mostly for tests asserting balanced lock usage.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LockStats {
    pub acquired: u64,
    pub released: u64,
    pub changed: u64,
    pub conflicts: u64,
}

/// In-process lock table.
#[derive(Debug, Default)]
pub struct MemoryLockingProvider {
    locks: Mutex<HashMap<String, LockState>>,
    acquired: AtomicU64,
    released: AtomicU64,
    changed: AtomicU64,
    conflicts: AtomicU64,
}

impl MemoryLockingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently holding any lock.
    pub fn held_locks(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_locked(&self, key: &str, lock_type: LockType) -> bool {
        match (self.locks.lock().get(key), lock_type) {
            (Some(LockState::Exclusive), LockType::Exclusive) => true,
            (Some(LockState::Shared(_)), LockType::Shared) => true,
            _ => false,
        }
    }

    pub fn stats(&self) -> LockStats {
        LockStats {
            acquired: self.acquired.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            changed: self.changed.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
        }
    }

    fn conflict(&self, key: &str, lock_type: LockType) -> VfsError {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(key, %lock_type, "lock conflict");
        VfsError::locked(key, lock_type)
    }
}

impl LockingProvider for MemoryLockingProvider {
    fn acquire_lock(&self, key: &str, lock_type: LockType) -> VfsResult<()> {
        let mut locks = self.locks.lock();
        let next = match (locks.get(key).copied(), lock_type) {
            (None, LockType::Shared) => LockState::Shared(1),
            (Some(LockState::Shared(n)), LockType::Shared) => LockState::Shared(n + 1),
            (None, LockType::Exclusive) => LockState::Exclusive,
            _ => return Err(self.conflict(key, lock_type)),
        };
        locks.insert(key.to_string(), next);
        self.acquired.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn change_lock(&self, key: &str, target: LockType) -> VfsResult<()> {
        let mut locks = self.locks.lock();
        let next = match (locks.get(key).copied(), target) {
            (Some(LockState::Shared(1)), LockType::Exclusive) => LockState::Exclusive,
            (Some(LockState::Exclusive), LockType::Shared) => LockState::Shared(1),
            _ => return Err(self.conflict(key, target)),
        };
        locks.insert(key.to_string(), next);
        self.changed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn release_lock(&self, key: &str, lock_type: LockType) {
        let mut locks = self.locks.lock();
        match (locks.get(key).copied(), lock_type) {
            (Some(LockState::Shared(n)), LockType::Shared) if n > 1 => {
                locks.insert(key.to_string(), LockState::Shared(n - 1));
            }
            (Some(LockState::Shared(_)), LockType::Shared)
            | (Some(LockState::Exclusive), LockType::Exclusive) => {
                locks.remove(key);
            }
            (state, _) => {
                tracing::warn!(key, %lock_type, ?state, "releasing a lock that is not held");
                return;
            }
        }
        self.released.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_stable_and_trimmed() {
        let a = storage_lock_key("local::/data/u/", "files/doc.txt");
        let b = storage_lock_key("local::/data/u/", "/files/doc.txt/");
        assert_eq!(a, b);
        assert!(a.starts_with("files/"));
        assert_eq!(a.len(), "files/".len() + 32);
        assert_ne!(a, storage_lock_key("other", "files/doc.txt"));
    }

    #[test]
    fn test_shared_locks_stack() {
        let p = MemoryLockingProvider::new();
        p.acquire_lock("k", LockType::Shared).unwrap();
        p.acquire_lock("k", LockType::Shared).unwrap();
        assert!(p.acquire_lock("k", LockType::Exclusive).unwrap_err().is_locked());
        p.release_lock("k", LockType::Shared);
        assert!(p.is_locked("k", LockType::Shared));
        p.release_lock("k", LockType::Shared);
        assert_eq!(p.held_locks(), 0);
    }

    #[test]
    fn test_upgrade_requires_sole_holder() {
        let p = MemoryLockingProvider::new();
        p.acquire_lock("k", LockType::Shared).unwrap();
        p.acquire_lock("k", LockType::Shared).unwrap();
        assert!(p.change_lock("k", LockType::Exclusive).is_err());
        p.release_lock("k", LockType::Shared);
        p.change_lock("k", LockType::Exclusive).unwrap();
        assert!(p.acquire_lock("k", LockType::Shared).is_err());
        p.change_lock("k", LockType::Shared).unwrap();
        p.release_lock("k", LockType::Shared);
        assert_eq!(p.held_locks(), 0);

        let stats = p.stats();
        assert_eq!(stats.acquired, 2);
        assert_eq!(stats.released, 2);
        assert_eq!(stats.changed, 2);
        assert_eq!(stats.conflicts, 2);
    }

    #[test]
    fn test_noop_provider() {
        let p = NoopLockingProvider;
        assert!(p.is_noop());
        p.acquire_lock("k", LockType::Exclusive).unwrap();
        p.acquire_lock("k", LockType::Exclusive).unwrap();
    }
}
