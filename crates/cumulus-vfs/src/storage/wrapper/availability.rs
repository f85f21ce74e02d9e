//! Short-circuits a backend that recently reported itself unavailable.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{Op, StorageLayer};
use crate::error::{VfsError, VfsResult};
use crate::storage::{Capability, Storage};

pub struct Availability {
    recheck_after: Duration,
    unavailable_until: Mutex<Option<Instant>>,
}

impl Default for Availability {
    fn default() -> Self {
        Self::new()
    }
}

impl Availability {
    /// How long a backend stays marked unavailable before it is tried again.
    pub const DEFAULT_RECHECK: Duration = Duration::from_secs(600);

    pub fn new() -> Self {
        Self::with_recheck(Self::DEFAULT_RECHECK)
    }

    pub fn with_recheck(recheck_after: Duration) -> Self {
        Self {
            recheck_after,
            unavailable_until: Mutex::new(None),
        }
    }

    pub fn is_available(&self) -> bool {
        match *self.unavailable_until.lock() {
            Some(until) => Instant::now() >= until,
            None => true,
        }
    }

    pub fn mark_unavailable(&self) {
        *self.unavailable_until.lock() = Some(Instant::now() + self.recheck_after);
    }
}

impl StorageLayer for Availability {
    fn name(&self) -> &'static str {
        "availability"
    }

    fn capability(&self) -> Capability {
        Capability::Availability
    }

    fn admit(&self, inner: &dyn Storage, _op: Op<'_>) -> VfsResult<bool> {
        let mut until = self.unavailable_until.lock();
        match *until {
            Some(t) if Instant::now() < t => Err(VfsError::storage_not_available(inner.id())),
            Some(_) => {
                // recheck due: let this call probe the backend
                *until = None;
                Ok(true)
            }
            None => Ok(true),
        }
    }

    fn on_error(&self, inner: &dyn Storage, error: &VfsError) {
        if matches!(error, VfsError::StorageNotAvailable(_)) {
            tracing::warn!(storage = inner.id(), %error, "storage marked unavailable");
            self.mark_unavailable();
        }
    }
}
