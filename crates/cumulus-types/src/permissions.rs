//! Permission bitmask carried by cache entries and checked by storages.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

bitflags::bitflags! {
    /// Per-node permissions. The numeric values are stable and persisted.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct Permissions: u32 {
        const READ = 1;
        const UPDATE = 2;
        const CREATE = 4;
        const DELETE = 8;
        const SHARE = 16;
        const ALL = Self::READ.bits()
            | Self::UPDATE.bits()
            | Self::CREATE.bits()
            | Self::DELETE.bits()
            | Self::SHARE.bits();
    }
}

impl Permissions {
    /// Permissions a plain file can carry (files cannot have children).
    pub fn for_file(self) -> Self {
        self - Self::CREATE
    }
}

// Persisted as the raw integer, never as flag names.
impl Serialize for Permissions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.bits())
    }
}

impl<'de> Deserialize<'de> for Permissions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u32::deserialize(deserializer).map(Self::from_bits_truncate)
    }
}
