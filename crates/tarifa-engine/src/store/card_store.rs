//! Rate card storage
//!
//! One row per card with its current status and settings, a parent index for
//! staleness fan-out, and the current profit rule set of each customer card.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use tarifa_common::{
    CardId, CardStatus, CardType, ProfitRuleSet, RateCard, Result, TarifaError, ValidationError,
    Violation,
};

/// Trait for card storage backends
#[async_trait]
pub trait CardStore: Send + Sync {
    /// Insert a new card; codes are unique
    async fn insert(&self, card: RateCard) -> Result<()>;

    /// Get a card by id
    async fn get(&self, id: CardId) -> Option<RateCard>;

    /// Replace an existing card row
    async fn put(&self, card: RateCard) -> Result<()>;

    /// Customer cards deriving from `parent_id`
    async fn dependents_of(&self, parent_id: CardId) -> Vec<RateCard>;

    /// Every card
    async fn list(&self) -> Vec<RateCard>;

    /// Current rule set of a customer card
    async fn rule_set(&self, card_id: CardId) -> Option<Arc<ProfitRuleSet>>;

    /// Replace the rule set of a customer card
    async fn put_rule_set(&self, rule_set: ProfitRuleSet) -> Result<()>;
}

/// In-memory card store
#[derive(Default)]
pub struct InMemoryCardStore {
    /// All cards by id
    cards: DashMap<CardId, RateCard>,

    /// Unique code index
    codes: DashMap<String, CardId>,

    /// Dependent customer cards by parent carrier card
    by_parent: DashMap<CardId, Vec<CardId>>,

    /// Rule sets by customer card
    rule_sets: DashMap<CardId, Arc<ProfitRuleSet>>,
}

impl InMemoryCardStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CardStore for InMemoryCardStore {
    async fn insert(&self, card: RateCard) -> Result<()> {
        match self.codes.entry(card.code.clone()) {
            Entry::Occupied(_) => {
                return Err(ValidationError::single(Violation::new(
                    "code",
                    format!("'{}' is already in use", card.code),
                ))
                .into());
            }
            Entry::Vacant(slot) => {
                slot.insert(card.id);
            }
        }

        if let Some(parent) = card.parent_card_id {
            self.by_parent.entry(parent).or_default().push(card.id);
        }
        self.cards.insert(card.id, card);
        Ok(())
    }

    async fn get(&self, id: CardId) -> Option<RateCard> {
        self.cards.get(&id).map(|c| c.clone())
    }

    async fn put(&self, card: RateCard) -> Result<()> {
        match self.cards.get_mut(&card.id) {
            Some(mut existing) => {
                *existing = card;
                Ok(())
            }
            None => Err(TarifaError::card_not_found(card.id)),
        }
    }

    async fn dependents_of(&self, parent_id: CardId) -> Vec<RateCard> {
        self.by_parent
            .get(&parent_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.cards.get(id).map(|c| c.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn list(&self) -> Vec<RateCard> {
        self.cards.iter().map(|c| c.clone()).collect()
    }

    async fn rule_set(&self, card_id: CardId) -> Option<Arc<ProfitRuleSet>> {
        self.rule_sets.get(&card_id).map(|r| r.clone())
    }

    async fn put_rule_set(&self, rule_set: ProfitRuleSet) -> Result<()> {
        if !self.cards.contains_key(&rule_set.card_id) {
            return Err(TarifaError::card_not_found(rule_set.card_id));
        }
        self.rule_sets.insert(rule_set.card_id, Arc::new(rule_set));
        Ok(())
    }
}

/// Statistics about the card store
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CardStoreStats {
    pub total_cards: usize,
    pub carrier_cards: usize,
    pub customer_cards: usize,
    pub stale_cards: usize,
    pub inactive_cards: usize,
}

impl InMemoryCardStore {
    /// Get statistics about the store
    pub fn stats(&self) -> CardStoreStats {
        let mut stats = CardStoreStats::default();
        for card in self.cards.iter() {
            stats.total_cards += 1;
            match card.card_type {
                CardType::Carrier => stats.carrier_cards += 1,
                CardType::Customer => stats.customer_cards += 1,
            }
            match card.status {
                CardStatus::Stale => stats.stale_cards += 1,
                CardStatus::Inactive => stats.inactive_cards += 1,
                CardStatus::Active => {}
            }
        }
        stats
    }
}
