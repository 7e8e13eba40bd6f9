//! Identifier newtypes.
//!
//! Every record kind gets its own UUID wrapper so ids cannot be mixed up
//! across registries. Ids serialize as plain UUID strings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random id.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

define_id!(
    /// Unique identifier for an event type.
    EventTypeId
);
define_id!(
    /// Unique identifier for an event.
    EventId
);
define_id!(
    /// Unique identifier for a trigger.
    TriggerId
);
define_id!(
    /// Unique identifier for an alert.
    AlertId
);
define_id!(
    /// Unique identifier for a dispatched job.
    JobId
);

/// Namespace for ids derived from a (trigger, event) firing.
const FIRING_NAMESPACE: Uuid = Uuid::from_u128(0x6b79_726f_616c_6572_7466_6972_696e_6721);

fn firing_uuid(kind: &str, trigger_id: TriggerId, event_id: EventId) -> Uuid {
    let mut name = Vec::with_capacity(kind.len() + 32);
    name.extend_from_slice(kind.as_bytes());
    name.extend_from_slice(trigger_id.as_uuid().as_bytes());
    name.extend_from_slice(event_id.as_uuid().as_bytes());
    Uuid::new_v5(&FIRING_NAMESPACE, &name)
}

impl JobId {
    /// Deterministic job id for one firing of `trigger_id` on `event_id`.
    #[must_use]
    pub fn for_firing(trigger_id: TriggerId, event_id: EventId) -> Self {
        Self(firing_uuid("job", trigger_id, event_id))
    }
}

impl AlertId {
    /// Deterministic alert id for one firing of `trigger_id` on `event_id`.
    #[must_use]
    pub fn for_firing(trigger_id: TriggerId, event_id: EventId) -> Self {
        Self(firing_uuid("alert", trigger_id, event_id))
    }
}
