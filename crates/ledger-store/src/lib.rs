pub mod error;
pub mod memory;
pub mod money;
pub mod postgres;
pub mod record;
pub mod state;
pub mod store;
pub mod version;

pub use error::{LedgerError, Result};
pub use memory::InMemoryLedgerStore;
pub use money::{Currency, Money};
pub use postgres::PostgresLedgerStore;
pub use record::{
    Contribution, EntityKind, Gift, GiftList, GroupGift, Record, Reservation, ThankYouNote,
    Transaction, TransactionScope,
};
pub use state::{GroupGiftStatus, Outcome, ReservationStatus, TransactionStatus, Visibility};
pub use store::{LedgerStore, LedgerStoreExt, Write, WriteBatch};
pub use version::{Version, Versioned};
