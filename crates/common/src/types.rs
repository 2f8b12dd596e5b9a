use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a UUID-backed identifier newtype.
///
/// Every identifier compares by its surrogate value only, so two handles to
/// the same booking or schedule are equal regardless of the state they carry.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for an aggregate instance (booking, schedule,
    /// recurrence group, time-off block).
    AggregateId
);

uuid_id!(
    /// Identifier of a member who books classes.
    UserId
);

uuid_id!(
    /// Identifier of a trainer who owns schedules.
    TrainerId
);

uuid_id!(
    /// Identifier of a ticket issued by the ticket ledger.
    TicketId
);

uuid_id!(
    /// Identifier of a class template in the catalog.
    TemplateId
);

/// Who triggered a state change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id")]
pub enum Actor {
    /// A member acting on their own booking.
    Member(UserId),

    /// A trainer acting on their schedules or on bookings against them.
    Trainer(TrainerId),

    /// A time or system trigger (sweepers, cascades).
    System(String),
}

impl Actor {
    /// Creates a system actor with the given component name.
    pub fn system(component: impl Into<String>) -> Self {
        Actor::System(component.into())
    }

    /// Returns true if this actor is a system trigger.
    pub fn is_system(&self) -> bool {
        matches!(self, Actor::System(_))
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::Member(id) => write!(f, "member:{id}"),
            Actor::Trainer(id) => write!(f, "trainer:{id}"),
            Actor::System(name) => write!(f, "system:{name}"),
        }
    }
}
