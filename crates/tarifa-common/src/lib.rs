//! # Tarifa Common
//!
//! Shared types and errors for the Tarifa rate card engine.
//!
//! ## Core Types
//!
//! - [`RateCard`]: carrier (cost) or customer (sell) card identity and settings
//! - [`RateEntry`]: one prefix-priced destination inside a revision
//! - [`RateTable`]: an immutable, numbered revision of a card's entries
//! - [`ProfitRule`]/[`ProfitRuleSet`]: prefix-keyed margins for customer cards
//! - [`BillingPrecision`]: per-card decimal precision with round-half-up
//!
//! ## Errors
//!
//! [`TarifaError`] wraps the engine taxonomy: validation, configuration,
//! dependency, precondition and concurrency failures. Validation and
//! configuration errors enumerate every offending record.

pub mod error;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{
    ConcurrencyError, ConfigurationError, DependencyError, PreconditionError, Result,
    RuleProblem, TarifaError, ValidationError, Violation,
};
pub use types::{
    ids::{CardId, RevisionId},
    precision::{round_half_up, BillingPrecision},
    profit_rule::{ApplyTo, ProfitRule, ProfitRuleSet, ProfitType, RuleStatus},
    rate_card::{CardStatus, CardType, Direction, NewRateCard, ProfitAssurance, RateCard},
    rate_entry::{EntryStatus, RateEntry},
    rate_table::{
        validate_entries, DerivationProvenance, RateTable, RevisionDraft, RevisionMeta,
        RevisionSource,
    },
};

/// Tarifa version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Longest dialing prefix accepted in a rate entry
pub const MAX_PREFIX_LEN: usize = 15;

/// Match prefix of the catch-all profit rule
pub const CATCH_ALL_PREFIX: &str = "";

/// Billing increment used when an upload does not specify one (seconds)
pub const DEFAULT_BILLING_INCREMENT_SECS: u32 = 60;

/// Precision used when a card does not specify one
pub const DEFAULT_PRECISION: u32 = 4;

/// Returns true if `s` is non-empty and made only of ASCII digits
pub fn is_digit_string(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}
