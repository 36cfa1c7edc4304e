//! Revision storage
//!
//! Append-only history of sealed rate tables per card. A card id indexes a
//! list of immutable revisions; nothing in a stored revision is ever updated.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use tarifa_common::{
    CardId, ConcurrencyError, RateTable, Result, RevisionDraft, RevisionMeta,
};

/// Trait for revision storage backends
#[async_trait]
pub trait RevisionStore: Send + Sync {
    /// Seal and append a revision. Fails with a concurrency error unless
    /// `expected_number` is exactly one past the card's latest revision.
    async fn append(&self, draft: RevisionDraft, expected_number: u32) -> Result<Arc<RateTable>>;

    /// Get one revision
    async fn get(&self, card_id: CardId, number: u32) -> Option<Arc<RateTable>>;

    /// Newest revision regardless of activation time
    async fn latest(&self, card_id: CardId) -> Option<Arc<RateTable>>;

    /// Newest revision already in force at `at`
    async fn active_at(&self, card_id: CardId, at: DateTime<Utc>) -> Option<Arc<RateTable>>;

    /// Revision metadata, newest first
    async fn list(&self, card_id: CardId) -> Vec<RevisionMeta>;

    /// Number of revisions stored for a card
    async fn count(&self, card_id: CardId) -> u32;
}

/// In-memory revision store
///
/// The per-card history sits behind a DashMap entry, so the check of the
/// expected number and the push happen under one shard lock.
#[derive(Default)]
pub struct InMemoryRevisionStore {
    revisions: DashMap<CardId, Vec<Arc<RateTable>>>,
}

impl InMemoryRevisionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total revisions across all cards
    pub fn total_count(&self) -> usize {
        self.revisions.iter().map(|h| h.len()).sum()
    }
}

#[async_trait]
impl RevisionStore for InMemoryRevisionStore {
    async fn append(&self, draft: RevisionDraft, expected_number: u32) -> Result<Arc<RateTable>> {
        let card_id = draft.card_id;
        let mut history = self.revisions.entry(card_id).or_default();

        let next = history.len() as u32 + 1;
        if expected_number != next {
            return Err(ConcurrencyError::RevisionCollision {
                card_id,
                expected: expected_number,
                actual: next,
            }
            .into());
        }

        let table = Arc::new(RateTable::seal(draft, next, Utc::now()));
        history.push(table.clone());

        debug!(card = %card_id, revision = next, entries = table.entries().len(), "Appended revision");
        Ok(table)
    }

    async fn get(&self, card_id: CardId, number: u32) -> Option<Arc<RateTable>> {
        if number == 0 {
            return None;
        }
        self.revisions
            .get(&card_id)
            .and_then(|h| h.get(number as usize - 1).cloned())
    }

    async fn latest(&self, card_id: CardId) -> Option<Arc<RateTable>> {
        self.revisions.get(&card_id).and_then(|h| h.last().cloned())
    }

    async fn active_at(&self, card_id: CardId, at: DateTime<Utc>) -> Option<Arc<RateTable>> {
        self.revisions.get(&card_id).and_then(|h| {
            h.iter()
                .rev()
                .find(|table| table.is_effective_at(at))
                .cloned()
        })
    }

    async fn list(&self, card_id: CardId) -> Vec<RevisionMeta> {
        self.revisions
            .get(&card_id)
            .map(|h| h.iter().rev().map(|t| t.meta()).collect())
            .unwrap_or_default()
    }

    async fn count(&self, card_id: CardId) -> u32 {
        self.revisions
            .get(&card_id)
            .map(|h| h.len() as u32)
            .unwrap_or(0)
    }
}
