//! "Fully set up recently" marker per user.
//!
//! While a user's marker is fresh, path setup can trust the user mount
//! cache instead of enumerating every provider.

use std::time::{Duration, Instant};

use dashmap::DashMap;

pub trait SetupCache: Send + Sync {
    fn was_recently_setup(&self, uid: &str) -> bool;

    fn mark_setup(&self, uid: &str);

    fn invalidate(&self, uid: &str);

    fn clear(&self);
}

#[derive(Debug)]
pub struct MemorySetupCache {
    entries: DashMap<String, Instant>,
    ttl: Duration,
}

impl Default for MemorySetupCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySetupCache {
    /// Default TTL: 5 minutes.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

    pub fn new() -> Self {
        Self::with_ttl(Self::DEFAULT_TTL)
    }

    /// A zero TTL disables the cache: every check misses.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl SetupCache for MemorySetupCache {
    fn was_recently_setup(&self, uid: &str) -> bool {
        self.entries
            .get(uid)
            .is_some_and(|at| at.elapsed() < self.ttl)
    }

    fn mark_setup(&self, uid: &str) {
        if !self.ttl.is_zero() {
            self.entries.insert(uid.to_string(), Instant::now());
        }
    }

    fn invalidate(&self, uid: &str) {
        self.entries.remove(uid);
    }

    fn clear(&self) {
        self.entries.clear();
    }
}
