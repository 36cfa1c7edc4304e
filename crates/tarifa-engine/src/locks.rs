//! Per-card serialization
//!
//! Everything that writes a card's revisions or status runs under that card's
//! lock, so revision numbers are assigned one at a time per card. Different
//! cards never contend. Lock order is parent before dependents.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use tarifa_common::CardId;

#[derive(Default)]
pub struct CardLocks {
    locks: DashMap<CardId, Arc<Mutex<()>>>,
}

impl CardLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to one card
    pub async fn lock(&self, card_id: CardId) -> OwnedMutexGuard<()> {
        let mutex = self.locks.entry(card_id).or_default().clone();
        mutex.lock_owned().await
    }

    /// Number of cards that have ever been locked
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_card_serialized() {
        let locks = Arc::new(CardLocks::new());
        let card = CardId::new();

        let guard = locks.lock(card).await;
        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock(card).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_cards_independent() {
        let locks = CardLocks::new();
        let _a = locks.lock(CardId::new()).await;
        let _b = locks.lock(CardId::new()).await;
        assert_eq!(locks.len(), 2);
    }
}
