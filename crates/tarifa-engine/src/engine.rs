//! Rate engine facade
//!
//! The operations the billing application calls:
//! - Card administration: create, activate/deactivate, rules, settings
//! - Carrier revision publishing with staleness fan-out
//! - Customer card derivation, one card or every stale card
//! - Rate lookup against the active revision
//! - Revision history and rollback
//!
//! Writes to a card run under that card's lock. A carrier publish holds the
//! carrier's lock while it takes each dependent's lock for the fan-out, so a
//! derivation racing a publish is either seen by the fan-out or sees the new
//! revision itself.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use tarifa_common::{
    validate_entries, BillingPrecision, CardId, CardStatus, CardType, ConfigurationError,
    DependencyError, DerivationProvenance, NewRateCard, PreconditionError, ProfitAssurance,
    ProfitRule, ProfitRuleSet, RateCard, RateEntry, RateTable, Result, RevisionDraft, RevisionId,
    RevisionMeta, RevisionSource, RuleProblem, TarifaError, ValidationError, Violation,
};

use crate::derivation::{run_bounded, DerivationPipeline, DerivationSettings, RebuildReport};
use crate::locks::CardLocks;
use crate::lookup::{LookupMatch, RateLookupCache};
use crate::metrics::EngineMetrics;
use crate::rules::{assurance_conflicts, validate_rule_set_for, RuleResolver};
use crate::staleness::{detect_staleness, next_status, CardEvent, FanOutReport, StalenessTracker, Transition};
use crate::store::{CardStore, InMemoryCardStore, InMemoryRevisionStore, RevisionStore};
use crate::EngineConfig;

/// Polled by list views
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardStatusView {
    pub card_id: CardId,
    pub status: CardStatus,
    pub revision_count: u32,
    pub last_updated: DateTime<Utc>,
}

/// Partial update of a card's derivation settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CardSettingsUpdate {
    #[serde(default)]
    pub precision: Option<u32>,
    #[serde(default)]
    pub profit_assurance: Option<ProfitAssurance>,
}

/// Rate card derivation and profit rule engine
#[derive(Clone)]
pub struct RateEngine {
    cards: Arc<dyn CardStore>,
    revisions: Arc<dyn RevisionStore>,
    locks: Arc<CardLocks>,
    tracker: Arc<StalenessTracker>,
    cache: Arc<RateLookupCache>,
    metrics: EngineMetrics,
    config: EngineConfig,
}

impl RateEngine {
    pub fn new(
        cards: Arc<dyn CardStore>,
        revisions: Arc<dyn RevisionStore>,
        config: EngineConfig,
    ) -> Result<Self> {
        let metrics = EngineMetrics::new()
            .map_err(|e| TarifaError::Internal(format!("Failed to create metrics: {}", e)))?;
        let locks = Arc::new(CardLocks::new());

        Ok(Self {
            tracker: Arc::new(StalenessTracker::new(cards.clone(), locks.clone())),
            cache: Arc::new(RateLookupCache::new(config.lookup_cache_capacity)),
            cards,
            revisions,
            locks,
            metrics,
            config,
        })
    }

    /// Engine over fresh in-memory stores
    pub fn in_memory(config: EngineConfig) -> Result<Self> {
        Self::new(
            Arc::new(InMemoryCardStore::new()),
            Arc::new(InMemoryRevisionStore::new()),
            config,
        )
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Cards
    // ------------------------------------------------------------------

    /// Create a carrier or customer card.
    ///
    /// A customer card whose parent already has an active revision starts
    /// out stale, since it has nothing derived yet.
    #[instrument(skip(self, request), fields(code = %request.code, card_type = %request.card_type))]
    pub async fn create_card(&self, request: NewRateCard) -> Result<RateCard> {
        let precision = request.validate()?;

        let Some(parent_id) = request.parent_card_id else {
            let card = request.into_card(precision);
            self.cards.insert(card.clone()).await?;
            info!(card_id = %card.id, code = %card.code, "Created card");
            return Ok(card);
        };

        // Hold the parent so a concurrent publish cannot slip past this card
        let _parent_guard = self.locks.lock(parent_id).await;

        let mut card = request.into_card(precision);
        let parent = self.cards.get(parent_id).await.ok_or(DependencyError::ParentMissing {
            card_id: card.id,
            parent_id,
        })?;

        if !parent.is_carrier() {
            return Err(ValidationError::single(Violation::new(
                "parent_card_id",
                format!("card {} is not a carrier card", parent_id),
            ))
            .into());
        }
        if parent.currency != card.currency || parent.direction != card.direction {
            return Err(DependencyError::ParentMismatch {
                parent_id,
                currency: card.currency.clone(),
                direction: card.direction.to_string(),
            }
            .into());
        }

        if self.revisions.active_at(parent_id, Utc::now()).await.is_some() {
            card.status = CardStatus::Stale;
        }

        self.cards.insert(card.clone()).await?;
        info!(card_id = %card.id, code = %card.code, parent = %parent_id, status = %card.status, "Created customer card");
        Ok(card)
    }

    pub async fn card(&self, card_id: CardId) -> Result<RateCard> {
        self.cards
            .get(card_id)
            .await
            .ok_or_else(|| TarifaError::card_not_found(card_id))
    }

    pub async fn list_cards(&self) -> Vec<RateCard> {
        self.cards.list().await
    }

    /// Administrator enable/disable.
    ///
    /// A customer card that is re-enabled while out of date with its parent,
    /// rules or settings goes straight to stale.
    #[instrument(skip(self), fields(card_id = %card_id))]
    pub async fn set_card_active(&self, card_id: CardId, active: bool) -> Result<RateCard> {
        let _guard = self.locks.lock(card_id).await;
        let mut card = self.card(card_id).await?;

        let event = if active {
            CardEvent::Reactivated
        } else {
            CardEvent::Deactivated
        };
        let transition = self.tracker.apply(&mut card, event).await?;

        if active && transition.is_changed() {
            if let Some(cause) = self.staleness_cause(&card, Utc::now()).await {
                self.tracker.apply(&mut card, cause).await?;
                self.metrics.cards_marked_stale.inc();
            }
        }

        Ok(card)
    }

    /// Replace a customer card's profit rules with a new versioned set
    #[instrument(skip(self, rules), fields(card_id = %card_id, rules = rules.len()))]
    pub async fn set_profit_rules(&self, card_id: CardId, rules: Vec<ProfitRule>) -> Result<Arc<ProfitRuleSet>> {
        let _guard = self.locks.lock(card_id).await;
        let mut card = self.card(card_id).await?;
        if !card.is_customer() {
            return Err(PreconditionError::WrongCardType {
                card_id,
                expected: CardType::Customer,
            }
            .into());
        }

        validate_rule_set_for(&rules, &card.profit_assurance)?;

        let version = self
            .cards
            .rule_set(card_id)
            .await
            .map_or(1, |current| current.version + 1);
        self.cards
            .put_rule_set(ProfitRuleSet::new(card_id, version, rules))
            .await?;

        if self.tracker.apply(&mut card, CardEvent::RulesChanged).await?.is_changed() {
            self.metrics.cards_marked_stale.inc();
        }

        info!(version, "Profit rules replaced");
        self.cards
            .rule_set(card_id)
            .await
            .ok_or_else(|| TarifaError::Internal(format!("rule set of {} vanished after write", card_id)))
    }

    pub async fn rule_set(&self, card_id: CardId) -> Option<Arc<ProfitRuleSet>> {
        self.cards.rule_set(card_id).await
    }

    /// Change precision and/or profit assurance.
    ///
    /// Turning assurance on is refused while the card's rules still carry a
    /// negative percentage outside the exempt prefixes.
    #[instrument(skip(self, update), fields(card_id = %card_id))]
    pub async fn update_card_settings(&self, card_id: CardId, update: CardSettingsUpdate) -> Result<RateCard> {
        let _guard = self.locks.lock(card_id).await;
        let mut card = self.card(card_id).await?;

        let mut errors = ValidationError::new();
        let precision = match update.precision.map(BillingPrecision::new) {
            Some(Ok(p)) => Some(p),
            Some(Err(violation)) => {
                errors.push(violation);
                None
            }
            None => None,
        };
        if let Some(assurance) = &update.profit_assurance {
            for (i, prefix) in assurance.exempt_prefixes.iter().enumerate() {
                if !tarifa_common::is_digit_string(prefix) {
                    errors.push(
                        Violation::new("exempt_prefixes", "must be digits only")
                            .at(i)
                            .for_prefix(prefix.clone()),
                    );
                }
            }
        }
        errors.into_result()?;

        if let (Some(assurance), Some(rule_set)) =
            (&update.profit_assurance, self.cards.rule_set(card_id).await)
        {
            let problems = assurance_conflicts(&rule_set.rules, assurance);
            if !problems.is_empty() {
                return Err(ConfigurationError { problems }.into());
            }
        }

        if let Some(precision) = precision {
            card.precision = precision;
        }
        if let Some(assurance) = update.profit_assurance {
            card.profit_assurance = assurance;
        }
        card.settings_version += 1;
        card.touch();
        self.cards.put(card.clone()).await?;

        if card.is_customer()
            && self.tracker.apply(&mut card, CardEvent::SettingsChanged).await?.is_changed()
        {
            self.metrics.cards_marked_stale.inc();
        }

        info!(settings_version = card.settings_version, "Card settings updated");
        Ok(card)
    }

    pub async fn get_card_status(&self, card_id: CardId) -> Result<CardStatusView> {
        let card = self.card(card_id).await?;
        Ok(CardStatusView {
            card_id,
            status: card.status,
            revision_count: card.revision_count,
            last_updated: card.updated_at,
        })
    }

    // ------------------------------------------------------------------
    // Revisions
    // ------------------------------------------------------------------

    /// Append an uploaded revision to a carrier card.
    ///
    /// Dependents are marked stale right away when the revision is in force
    /// immediately; a future-dated one is picked up by [`Self::sweep_activations`].
    #[instrument(skip(self, entries), fields(card_id = %card_id, entries = entries.len()))]
    pub async fn publish_carrier_revision(
        &self,
        card_id: CardId,
        entries: Vec<RateEntry>,
        effective_at: Option<DateTime<Utc>>,
    ) -> Result<RevisionId> {
        validate_entries(&entries)?;

        let _guard = self.locks.lock(card_id).await;
        let mut card = self.card(card_id).await?;
        if !card.is_carrier() {
            return Err(PreconditionError::WrongCardType {
                card_id,
                expected: CardType::Carrier,
            }
            .into());
        }
        if card.is_inactive() {
            return Err(PreconditionError::CardInactive { card_id }.into());
        }

        let table = self
            .revisions
            .append(
                RevisionDraft::upload(card_id, entries, effective_at),
                card.revision_count + 1,
            )
            .await?;
        card.revision_count = table.number();
        card.touch();
        self.cards.put(card).await?;

        self.metrics.revisions_published.inc();
        info!(revision = table.number(), digest = %table.digest(), ?effective_at, "Published carrier revision");

        if table.is_effective_at(Utc::now()) {
            self.fan_out(card_id, CardEvent::ParentPublished).await;
        }
        Ok(table.id())
    }

    /// Re-derive one customer card from its parent's active revision
    #[instrument(skip(self), fields(card_id = %card_id))]
    pub async fn derive_customer_card(&self, card_id: CardId) -> Result<RevisionId> {
        let started = Instant::now();
        let result = self.derive_locked(card_id).await;

        let outcome = if result.is_ok() { "ok" } else { "failed" };
        self.metrics.derivations_total.with_label_values(&[outcome]).inc();
        self.metrics
            .derivation_duration_seconds
            .observe(started.elapsed().as_secs_f64());

        if let Err(err) = &result {
            debug!(error = %err, "Derivation rejected");
        }
        result
    }

    async fn derive_locked(&self, card_id: CardId) -> Result<RevisionId> {
        let _guard = self.locks.lock(card_id).await;
        let mut card = self.card(card_id).await?;

        if !card.is_customer() {
            return Err(PreconditionError::WrongCardType {
                card_id,
                expected: CardType::Customer,
            }
            .into());
        }
        let transition = next_status(card_id, card.status, CardEvent::Derived)?;

        let parent_id = card.parent_card_id.ok_or(DependencyError::NoParent { card_id })?;
        if self.cards.get(parent_id).await.is_none() {
            return Err(DependencyError::ParentMissing { card_id, parent_id }.into());
        }
        let parent = self
            .revisions
            .active_at(parent_id, Utc::now())
            .await
            .ok_or(DependencyError::NoActiveParentRevision { parent_id })?;

        let rule_set = self
            .cards
            .rule_set(card_id)
            .await
            .ok_or_else(|| ConfigurationError::single(RuleProblem::MissingCatchAll))?;
        let resolver = RuleResolver::compile(&rule_set)?;

        let derived = DerivationPipeline::new(&resolver, DerivationSettings::from(&card)).derive(&parent)?;
        let blocked = derived.assurance_blocked.len();

        let provenance = DerivationProvenance {
            parent_card_id: parent_id,
            parent_revision: parent.number(),
            rule_set_version: rule_set.version,
            settings_version: card.settings_version,
        };
        let table = self
            .revisions
            .append(
                RevisionDraft {
                    card_id,
                    entries: derived.entries,
                    effective_at: None,
                    source: RevisionSource::Derived(provenance),
                },
                card.revision_count + 1,
            )
            .await?;

        card.revision_count = table.number();
        card.status = transition.status();
        card.touch();
        self.cards.put(card).await?;

        self.metrics.entries_blocked.inc_by(blocked as u64);
        if blocked > 0 {
            warn!(blocked, prefixes = ?derived.assurance_blocked, "Profit assurance blocked entries");
        }
        info!(
            revision = table.number(),
            parent_revision = parent.number(),
            rule_set_version = rule_set.version,
            entries = table.entries().len(),
            "Derived customer revision"
        );
        Ok(table.id())
    }

    /// Derive every stale customer card on the worker pool
    #[instrument(skip(self))]
    pub async fn rebuild_stale_cards(&self) -> RebuildReport {
        let stale: Vec<CardId> = self
            .cards
            .list()
            .await
            .into_iter()
            .filter(|c| c.is_customer() && c.status == CardStatus::Stale)
            .map(|c| c.id)
            .collect();

        let report = if stale.is_empty() {
            RebuildReport::default()
        } else {
            info!(cards = stale.len(), "Rebuilding stale cards");
            run_bounded(stale, self.config.max_parallel_derivations, |card_id| {
                let engine = self.clone();
                async move { engine.derive_customer_card(card_id).await }
            })
            .await
        };

        let remaining = self
            .cards
            .list()
            .await
            .iter()
            .filter(|c| c.status == CardStatus::Stale)
            .count();
        self.metrics.stale_cards.set(remaining as i64);
        report
    }

    /// Mark customer cards stale whose parent's revision in force at `at` is
    /// no longer the one they were derived from
    #[instrument(skip(self))]
    pub async fn sweep_activations(&self, at: DateTime<Utc>) -> FanOutReport {
        let mut report = FanOutReport::default();

        for candidate in self.cards.list().await {
            if !candidate.is_customer() || candidate.status != CardStatus::Active {
                continue;
            }

            let _guard = self.locks.lock(candidate.id).await;
            let Some(mut card) = self.cards.get(candidate.id).await else {
                continue;
            };
            if card.status != CardStatus::Active {
                continue;
            }

            let Some(cause) = self.staleness_cause(&card, at).await else {
                continue;
            };
            match self.tracker.apply(&mut card, cause).await {
                Ok(Transition::Changed { .. }) => {
                    self.metrics.cards_marked_stale.inc();
                    report.marked_stale.push(card.id);
                }
                Ok(_) => report.already_stale.push(card.id),
                Err(err) => report.failed.push((card.id, err.to_string())),
            }
        }

        if !report.marked_stale.is_empty() {
            info!(marked = report.marked_stale.len(), "Scheduled activations made cards stale");
        }
        report
    }

    /// Price a dialed number against the card's active revision.
    ///
    /// `Ok(None)` when nothing matches, the longest match is blocked, or the
    /// card has no revision in force yet.
    #[instrument(skip(self), fields(card_id = %card_id))]
    pub async fn rate_lookup(&self, card_id: CardId, number: &str) -> Result<Option<LookupMatch>> {
        let card = self.card(card_id).await?;
        if card.is_inactive() {
            return Err(PreconditionError::CardInactive { card_id }.into());
        }

        let Some(table) = self.revisions.active_at(card_id, Utc::now()).await else {
            self.metrics.lookups_total.with_label_values(&["no_revision"]).inc();
            return Ok(None);
        };

        let compiled = self.cache.get_or_compile(&table)?;
        let tech_prefix = card.tech_prefix.as_deref().filter(|_| card.is_carrier());
        let found = compiled.lookup(number, tech_prefix);

        let label = if found.is_some() { "hit" } else { "miss" };
        self.metrics.lookups_total.with_label_values(&[label]).inc();
        debug!(revision = table.number(), result = label, "Rate lookup");
        Ok(found)
    }

    /// Revision metadata, newest first
    pub async fn list_revisions(&self, card_id: CardId) -> Result<Vec<RevisionMeta>> {
        self.card(card_id).await?;
        Ok(self.revisions.list(card_id).await)
    }

    pub async fn get_revision(&self, card_id: CardId, number: u32) -> Result<Arc<RateTable>> {
        self.revisions
            .get(card_id, number)
            .await
            .ok_or_else(|| TarifaError::NotFound(format!("revision {} of card {}", number, card_id)))
    }

    /// Revision in force on a card now
    pub async fn active_revision(&self, card_id: CardId) -> Option<Arc<RateTable>> {
        self.revisions.active_at(card_id, Utc::now()).await
    }

    /// Append a copy of revision `number` as the card's newest revision.
    ///
    /// On a carrier card this counts as a publish for its dependents. On a
    /// customer card the copy is recorded against the parent revision, rules
    /// and settings in force now, so only a later change to one of those
    /// makes the card stale again.
    #[instrument(skip(self), fields(card_id = %card_id))]
    pub async fn rollback(&self, card_id: CardId, number: u32) -> Result<RevisionId> {
        let _guard = self.locks.lock(card_id).await;
        let mut card = self.card(card_id).await?;
        if card.is_inactive() {
            return Err(PreconditionError::CardInactive { card_id }.into());
        }

        let source = self
            .revisions
            .get(card_id, number)
            .await
            .ok_or(PreconditionError::UnknownRevision { card_id, number })?;
        let baseline = self.current_inputs(&card).await;

        let table = self
            .revisions
            .append(
                RevisionDraft {
                    card_id,
                    entries: source.entries().to_vec(),
                    effective_at: None,
                    source: RevisionSource::Restored {
                        restored_from: number,
                        provenance: source.source().provenance().copied(),
                        baseline,
                    },
                },
                card.revision_count + 1,
            )
            .await?;

        card.revision_count = table.number();
        card.touch();
        let is_carrier = card.is_carrier();
        self.cards.put(card).await?;

        self.metrics.rollbacks_total.inc();
        info!(restored_from = number, revision = table.number(), "Rolled back revision");

        if is_carrier {
            self.fan_out(card_id, CardEvent::ParentPublished).await;
        }
        Ok(table.id())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn fan_out(&self, parent_id: CardId, event: CardEvent) -> FanOutReport {
        let report = self.tracker.fan_out(parent_id, event).await;
        self.metrics
            .cards_marked_stale
            .inc_by(report.marked_stale.len() as u64);
        report
    }

    /// Derivation inputs in force for a customer card right now
    async fn current_inputs(&self, card: &RateCard) -> Option<DerivationProvenance> {
        let parent_card_id = card.parent_card_id.filter(|_| card.is_customer())?;
        let parent = self.revisions.active_at(parent_card_id, Utc::now()).await?;
        let rule_set = self.cards.rule_set(card.id).await?;

        Some(DerivationProvenance {
            parent_card_id,
            parent_revision: parent.number(),
            rule_set_version: rule_set.version,
            settings_version: card.settings_version,
        })
    }

    async fn staleness_cause(&self, card: &RateCard, at: DateTime<Utc>) -> Option<CardEvent> {
        let parent_id = card.parent_card_id?;
        let latest_own = self.revisions.latest(card.id).await;
        let parent_active = self.revisions.active_at(parent_id, at).await;
        let rule_set_version = self.cards.rule_set(card.id).await.map(|s| s.version);

        detect_staleness(card, latest_own.as_deref(), parent_active.as_deref(), rule_set_version)
    }
}
