//! Typed numeric identifiers for metadata-cache rows and storages.
//!
//! Both wrap an `i64` so they stay compatible with auto-increment columns in a
//! persisted cache. They are opaque to callers: arithmetic on them is
//! meaningless, only equality, ordering, and display.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A metadata-cache entry id. Unique across every storage in a deployment.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(i64);

/// The numeric id of a storage's metadata cache.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageNumericId(i64);

// ── Shared behavior ─────────────────────────────────────────────────────────

macro_rules! impl_numeric_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// Wrap a raw id.
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// The raw integer.
            pub const fn get(&self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.0)
            }
        }

        impl From<i64> for $T {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl From<$T> for i64 {
            fn from(id: $T) -> i64 {
                id.0
            }
        }
    };
}

impl_numeric_id!(FileId, "FileId");
impl_numeric_id!(StorageNumericId, "StorageNumericId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_debug() {
        let id = FileId::new(42);
        assert_eq!(id.to_string(), "42");
        assert_eq!(format!("{:?}", id), "FileId(42)");
        assert_eq!(format!("{:?}", StorageNumericId::new(7)), "StorageNumericId(7)");
    }

    #[test]
    fn test_serde_transparent() {
        let json = serde_json::to_string(&FileId::new(9)).unwrap();
        assert_eq!(json, "9");
        let back: FileId = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get(), 9);
    }
}
