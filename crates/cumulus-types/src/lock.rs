//! Lock types shared by the locking provider and the facade.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lock type held on a path.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LockType {
    /// Any number of readers.
    Shared,
    /// A single writer, no readers.
    Exclusive,
}

impl LockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockType::Shared => "shared",
            LockType::Exclusive => "exclusive",
        }
    }
}
