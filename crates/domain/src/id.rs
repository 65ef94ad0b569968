//! UUID-backed identifiers, one newtype per stored record kind.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! uuid_id {
    ($(#[doc = $doc:expr])* $name:ident) => {
        $(#[doc = $doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(uuid::Uuid);

        impl Default for $name {
            fn default() -> Self {
                Self(uuid::Uuid::new_v4())
            }
        }

        impl $name {
            /// Fresh random (v4) identifier.
            #[must_use]
            pub fn new() -> Self {
                Self::default()
            }

            /// Identifier for a UUID read back from storage.
            #[must_use]
            pub fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// The underlying UUID.
            #[must_use]
            pub fn as_uuid(self) -> uuid::Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                uuid::Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a [`QueuedAction`](crate::action::QueuedAction).
    ActionId
);

uuid_id!(
    /// Unique identifier for an [`ActionResult`](crate::result::ActionResult) row.
    ActionResultId
);

uuid_id!(
    /// Unique identifier for an [`ActionDependency`](crate::dependency::ActionDependency) edge.
    DependencyId
);

uuid_id!(
    /// Unique identifier for a [`QueueEvent`](crate::event::QueueEvent).
    EventId
);
