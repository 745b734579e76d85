//! Integer identifiers for everything the type universe stores.
//!
//! Types and members reference each other by id only; the arena owned by
//! the type manager resolves ids to entities.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            pub fn value(&self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", $prefix, self.0)
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }
    };
}

define_id!(
    /// Identifier of a base type
    TypeId,
    "type"
);
define_id!(
    /// Identifier of a type member
    MemberId,
    "member"
);
define_id!(
    /// Identifier of a section
    SectionId,
    "section"
);
define_id!(
    /// Identifier of a type instance
    InstanceId,
    "instance"
);
