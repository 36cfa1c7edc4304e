//! Persistence contract
//!
//! Cards are mutable rows (status, settings, revision count). Revisions are
//! append-only records that are never updated once written.

pub mod card_store;
pub mod revision_store;

pub use card_store::{CardStore, CardStoreStats, InMemoryCardStore};
pub use revision_store::{InMemoryRevisionStore, RevisionStore};
