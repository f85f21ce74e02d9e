//! Byte quota enforced against the cached size of the storage root.

use std::sync::atomic::{AtomicBool, Ordering};

use super::{Op, StorageLayer, file_size};
use crate::error::VfsResult;
use crate::storage::{Capability, FreeSpace, Storage};

pub struct Quota {
    quota: i64,
    enabled: AtomicBool,
}

impl Quota {
    pub fn new(quota: i64) -> Self {
        Self {
            quota,
            enabled: AtomicBool::new(true),
        }
    }

    pub fn quota(&self) -> i64 {
        self.quota
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn used(&self, inner: &dyn Storage) -> i64 {
        inner.cache().get("").map(|e| e.size.max(0)).unwrap_or(0)
    }

    fn free(&self, inner: &dyn Storage, path: &str) -> VfsResult<FreeSpace> {
        if !self.is_enabled() {
            return inner.free_space(path);
        }
        let free = (self.quota - self.used(inner)).max(0);
        Ok(match inner.free_space(path)? {
            FreeSpace::Bytes(backend) => FreeSpace::Bytes(backend.min(free)),
            _ => FreeSpace::Bytes(free),
        })
    }

    fn fits(&self, inner: &dyn Storage, needed: Option<i64>) -> VfsResult<bool> {
        if !self.is_enabled() {
            return Ok(true);
        }
        let FreeSpace::Bytes(free) = self.free(inner, "")? else {
            return Ok(true);
        };
        Ok(match needed {
            Some(n) => n <= free,
            None => free > 0,
        })
    }
}

impl StorageLayer for Quota {
    fn name(&self) -> &'static str {
        "quota"
    }

    fn capability(&self) -> Capability {
        Capability::Quota
    }

    fn admit(&self, inner: &dyn Storage, op: Op<'_>) -> VfsResult<bool> {
        match op {
            Op::Write { path, size } => {
                // overwriting frees the old content first
                let existing = file_size(inner, path)?.unwrap_or(0);
                self.fits(inner, size.map(|n| n - existing))
            }
            Op::Copy { source, .. } => {
                let size = file_size(inner, source)?;
                self.fits(inner, size)
            }
            Op::Mkdir(_) => self.fits(inner, None),
            _ => Ok(true),
        }
    }

    fn free_space(&self, inner: &dyn Storage, path: &str) -> VfsResult<FreeSpace> {
        self.free(inner, path)
    }

    fn set_quota_enabled(&self, inner: &dyn Storage, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        inner.set_quota_enabled(enabled);
    }
}
