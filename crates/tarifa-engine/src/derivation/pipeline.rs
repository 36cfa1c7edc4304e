//! Derivation pipeline
//!
//! Turns one parent (carrier) revision into the entry set of a customer
//! revision:
//!
//! ```text
//! for each parent entry:
//!     rule       = longest-prefix rule for entry.prefix
//!     rate, fee  = apply rule margin (percentage or fixed, by apply-to)
//!     rate, fee  = round half-up to card precision
//!     increment, minimum duration carried through unchanged
//!     status     = blocked if parent blocked, or assurance says no profit
//! ```
//!
//! This is a pure function of its inputs. It either yields a complete entry
//! set or fails; there is no partial output.

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use tracing::{debug, instrument};

use tarifa_common::{
    ApplyTo, BillingPrecision, ConfigurationError, EntryStatus, ProfitAssurance, ProfitRule,
    ProfitType, RateCard, RateEntry, RateTable,
};

use crate::prefix::PrefixIndex;
use crate::rules::RuleResolver;

/// Card-level inputs to a derivation
#[derive(Debug, Clone, PartialEq)]
pub struct DerivationSettings {
    pub precision: BillingPrecision,
    pub profit_assurance: ProfitAssurance,
}

impl From<&RateCard> for DerivationSettings {
    fn from(card: &RateCard) -> Self {
        Self {
            precision: card.precision,
            profit_assurance: card.profit_assurance.clone(),
        }
    }
}

/// Output of one derivation
#[derive(Debug, Clone)]
pub struct DerivedTable {
    /// Entries for the new revision, in parent order
    pub entries: Vec<RateEntry>,
    /// Prefixes blocked by profit assurance
    pub assurance_blocked: Vec<String>,
    /// Entries already blocked in the parent
    pub inherited_blocked: usize,
}

impl DerivedTable {
    pub fn blocked_count(&self) -> usize {
        self.assurance_blocked.len() + self.inherited_blocked
    }
}

/// Applies one card's rules and settings to parent revisions
pub struct DerivationPipeline<'a> {
    resolver: &'a RuleResolver,
    settings: DerivationSettings,
    exemptions: Option<PrefixIndex<()>>,
}

impl<'a> DerivationPipeline<'a> {
    pub fn new(resolver: &'a RuleResolver, settings: DerivationSettings) -> Self {
        // Card validation guarantees digit-only exemptions; the set dedups them.
        let unique: BTreeSet<&str> = settings
            .profit_assurance
            .exempt_prefixes
            .iter()
            .map(String::as_str)
            .filter(|p| p.bytes().all(|b| b.is_ascii_digit()))
            .collect();
        let exemptions = PrefixIndex::build(unique.into_iter().map(|p| (p, ()))).ok();

        Self {
            resolver,
            settings,
            exemptions,
        }
    }

    /// Derive a full entry set from a parent revision
    #[instrument(skip(self, parent), fields(parent = %parent.id(), entries = parent.entries().len()))]
    pub fn derive(&self, parent: &RateTable) -> Result<DerivedTable, ConfigurationError> {
        let mut entries = Vec::with_capacity(parent.entries().len());
        let mut assurance_blocked = Vec::new();
        let mut inherited_blocked = 0usize;
        let mut problems = Vec::new();

        for cost in parent.entries() {
            match self.derive_entry(cost) {
                Ok(derived) => {
                    if cost.status == EntryStatus::Blocked {
                        inherited_blocked += 1;
                    } else if derived.status == EntryStatus::Blocked {
                        assurance_blocked.push(derived.prefix.clone());
                    }
                    entries.push(derived);
                }
                Err(err) => problems.extend(err.problems),
            }
        }

        if !problems.is_empty() {
            return Err(ConfigurationError { problems });
        }

        debug!(
            derived = entries.len(),
            blocked = assurance_blocked.len(),
            inherited_blocked,
            "Derived entry set"
        );

        Ok(DerivedTable {
            entries,
            assurance_blocked,
            inherited_blocked,
        })
    }

    /// Derive one customer entry from one cost entry
    pub fn derive_entry(&self, cost: &RateEntry) -> Result<RateEntry, ConfigurationError> {
        let rule = self.resolver.resolve(&cost.prefix)?;
        let (rate, fee) = apply_margin(rule, cost.rate, cost.connection_fee);

        let precision = self.settings.precision;
        let rate = precision.round(rate);
        let connection_fee = precision.round(fee);

        let status = if cost.status == EntryStatus::Blocked {
            EntryStatus::Blocked
        } else if self.assurance_applies(&cost.prefix) && !is_profitable(cost, rate, connection_fee) {
            EntryStatus::Blocked
        } else {
            EntryStatus::Active
        };

        Ok(RateEntry {
            prefix: cost.prefix.clone(),
            destination: cost.destination.clone(),
            rate,
            connection_fee,
            billing_increment: cost.billing_increment,
            minimum_duration: cost.minimum_duration,
            status,
        })
    }

    fn assurance_applies(&self, prefix: &str) -> bool {
        self.settings.profit_assurance.enabled
            && !self.exemptions.as_ref().map_or(false, |e| e.covers(prefix))
    }
}

/// Apply a rule's margin to a per-minute rate and connection fee.
///
/// | type       | all         | perMinute | setup |
/// |------------|-------------|-----------|-------|
/// | percentage | rate + fee  | rate      | fee   |
/// | fixed      | rate        | rate      | fee   |
///
/// Results never go below zero.
pub fn apply_margin(rule: &ProfitRule, rate: Decimal, fee: Decimal) -> (Decimal, Decimal) {
    let (on_rate, on_fee) = match (rule.profit_type, rule.apply_to) {
        (ProfitType::Percentage, ApplyTo::All) => (true, true),
        (ProfitType::Fixed, ApplyTo::All) => (true, false),
        (_, ApplyTo::PerMinute) => (true, false),
        (_, ApplyTo::Setup) => (false, true),
    };

    let adjust = |value: Decimal| {
        let adjusted = match rule.profit_type {
            ProfitType::Percentage => value * (Decimal::ONE + rule.value),
            ProfitType::Fixed => value + rule.value,
        };
        adjusted.max(Decimal::ZERO)
    };

    (
        if on_rate { adjust(rate) } else { rate },
        if on_fee { adjust(fee) } else { fee },
    )
}

/// A derived entry earns money when neither charge is below cost and at
/// least one is strictly above it.
pub fn is_profitable(cost: &RateEntry, rate: Decimal, connection_fee: Decimal) -> bool {
    let rate_margin = rate - cost.rate;
    let fee_margin = connection_fee - cost.connection_fee;
    rate_margin >= Decimal::ZERO
        && fee_margin >= Decimal::ZERO
        && (rate_margin > Decimal::ZERO || fee_margin > Decimal::ZERO)
}
