//! Staleness tracking
//!
//! State machine over card status:
//!
//! ```text
//!            parent published / rules or settings changed
//!   active ─────────────────────────────────────────────▶ stale
//!     ▲  ◀──────────────── successful derivation ─────────  │
//!     │                                                     │
//!     └── reactivate ── inactive ◀── deactivate ────────────┘ (and from active)
//! ```
//!
//! Inactive cards ignore staleness events and cannot be derived. Marking an
//! already-stale card stale is a no-op, so a fan-out can be replayed safely.

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use tarifa_common::{
    CardId, CardStatus, PreconditionError, RateCard, RateTable, Result,
};

use crate::locks::CardLocks;
use crate::store::CardStore;

/// Something that happened to a card or its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardEvent {
    /// Parent carrier card published (or restored) a revision
    ParentPublished,
    /// A scheduled parent revision came into force
    ParentActivated,
    /// The card's profit rule set was replaced
    RulesChanged,
    /// Precision or assurance settings changed
    SettingsChanged,
    /// Derivation committed a new revision
    Derived,
    /// Administrator disabled the card
    Deactivated,
    /// Administrator re-enabled the card
    Reactivated,
}

impl CardEvent {
    fn invalidates(&self) -> bool {
        matches!(
            self,
            CardEvent::ParentPublished
                | CardEvent::ParentActivated
                | CardEvent::RulesChanged
                | CardEvent::SettingsChanged
        )
    }
}

impl fmt::Display for CardEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CardEvent::ParentPublished => "parent_published",
            CardEvent::ParentActivated => "parent_activated",
            CardEvent::RulesChanged => "rules_changed",
            CardEvent::SettingsChanged => "settings_changed",
            CardEvent::Derived => "derived",
            CardEvent::Deactivated => "deactivated",
            CardEvent::Reactivated => "reactivated",
        };
        f.write_str(name)
    }
}

/// Outcome of applying an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Changed { from: CardStatus, to: CardStatus },
    Unchanged(CardStatus),
}

impl Transition {
    pub fn status(&self) -> CardStatus {
        match self {
            Transition::Changed { to, .. } => *to,
            Transition::Unchanged(status) => *status,
        }
    }

    pub fn is_changed(&self) -> bool {
        matches!(self, Transition::Changed { .. })
    }
}

/// The transition table
pub fn next_status(
    card_id: CardId,
    from: CardStatus,
    event: CardEvent,
) -> std::result::Result<Transition, PreconditionError> {
    use CardStatus::*;

    let to = match (from, event) {
        (Inactive, CardEvent::Derived) => return Err(PreconditionError::CardInactive { card_id }),
        (Inactive, e) if e.invalidates() => Inactive,
        (Active, e) if e.invalidates() => Stale,
        (Stale, e) if e.invalidates() => Stale,
        (Active | Stale, CardEvent::Derived) => Active,
        (Active | Stale, CardEvent::Deactivated) => Inactive,
        (Inactive, CardEvent::Deactivated) => Inactive,
        (Inactive, CardEvent::Reactivated) => Active,
        (Active | Stale, CardEvent::Reactivated) => from,
        (_, e) => {
            return Err(PreconditionError::InvalidTransition {
                card_id,
                from,
                event: e.to_string(),
            })
        }
    };

    Ok(if to == from {
        Transition::Unchanged(from)
    } else {
        Transition::Changed { from, to }
    })
}

/// Why an active customer card no longer matches its inputs, if it doesn't.
///
/// `latest_own` is the card's newest revision, `parent_active` the parent's
/// revision in force now, `rule_set_version` the current rules version.
pub fn detect_staleness(
    card: &RateCard,
    latest_own: Option<&RateTable>,
    parent_active: Option<&RateTable>,
    rule_set_version: Option<u32>,
) -> Option<CardEvent> {
    if !card.is_customer() {
        return None;
    }
    let parent_active = parent_active?;

    let Some(provenance) = latest_own.and_then(|t| t.source().baseline()) else {
        // Never derived, and there is something to derive from.
        return Some(CardEvent::ParentPublished);
    };

    if Some(provenance.parent_card_id) != card.parent_card_id
        || provenance.parent_revision != parent_active.number()
    {
        Some(CardEvent::ParentActivated)
    } else if Some(provenance.rule_set_version) != rule_set_version {
        Some(CardEvent::RulesChanged)
    } else if provenance.settings_version != card.settings_version {
        Some(CardEvent::SettingsChanged)
    } else {
        None
    }
}

/// Summary of one fan-out pass
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct FanOutReport {
    pub marked_stale: Vec<CardId>,
    pub already_stale: Vec<CardId>,
    pub skipped_inactive: Vec<CardId>,
    pub failed: Vec<(CardId, String)>,
}

/// Applies state machine events to stored cards
pub struct StalenessTracker {
    cards: Arc<dyn CardStore>,
    locks: Arc<CardLocks>,
}

impl StalenessTracker {
    pub fn new(cards: Arc<dyn CardStore>, locks: Arc<CardLocks>) -> Self {
        Self { cards, locks }
    }

    /// Apply an event to a card the caller has already locked
    pub async fn apply(&self, card: &mut RateCard, event: CardEvent) -> Result<Transition> {
        let transition = next_status(card.id, card.status, event)?;
        if let Transition::Changed { from, to } = transition {
            card.status = to;
            card.touch();
            self.cards.put(card.clone()).await?;
            info!(card = %card.id, code = %card.code, %from, %to, %event, "Card status changed");
        }
        Ok(transition)
    }

    /// Send an invalidating event to every dependent of `parent_id`.
    ///
    /// Each dependent is locked and updated on its own; a failure on one card
    /// is recorded and does not stop the others.
    pub async fn fan_out(&self, parent_id: CardId, event: CardEvent) -> FanOutReport {
        let mut report = FanOutReport::default();

        for dependent in self.cards.dependents_of(parent_id).await {
            let _guard = self.locks.lock(dependent.id).await;

            // Re-read under the lock
            let Some(mut card) = self.cards.get(dependent.id).await else {
                continue;
            };

            match self.apply(&mut card, event).await {
                Ok(Transition::Changed { .. }) => report.marked_stale.push(card.id),
                Ok(Transition::Unchanged(CardStatus::Inactive)) => {
                    report.skipped_inactive.push(card.id)
                }
                Ok(Transition::Unchanged(_)) => report.already_stale.push(card.id),
                Err(err) => {
                    warn!(card = %card.id, error = %err, "Fan-out update failed");
                    report.failed.push((card.id, err.to_string()));
                }
            }
        }

        info!(
            parent = %parent_id,
            %event,
            marked = report.marked_stale.len(),
            already = report.already_stale.len(),
            inactive = report.skipped_inactive.len(),
            "Staleness fan-out complete"
        );
        report
    }
}
