//! Shared identifier types for the gift registry engine.

pub mod ids;

pub use ids::{
    ContributionId, GiftId, GiftListId, GroupGiftId, ReservationId, ThankYouNoteId,
    TransactionId, UserId,
};
