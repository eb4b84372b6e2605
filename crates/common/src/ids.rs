use serde::{Deserialize, Serialize};

/// Declares a stable integer identifier.
///
/// Each id is a distinct type so a `GiftId` can never be passed where a
/// `ReservationId` is expected, even though both are stored as `BIGINT`.
macro_rules! integer_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw identifier.
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// Returns the raw identifier.
            pub const fn as_i64(&self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

integer_id!(
    /// Identifier of a registry (gift list) owned by one user.
    GiftListId
);
integer_id!(
    /// Identifier of a gift within a list.
    GiftId
);
integer_id!(
    /// Identifier of an exclusive hold on gift units.
    ReservationId
);
integer_id!(
    /// Identifier of a crowdfunding campaign attached to a gift.
    GroupGiftId
);
integer_id!(
    /// Identifier of one payment toward a campaign.
    ContributionId
);
integer_id!(
    /// Identifier of a payment record.
    TransactionId
);
integer_id!(ThankYouNoteId);
integer_id!(
    /// Identifier of a site user. Authentication lives outside this engine.
    UserId
);
