//! # Tarifa Engine
//!
//! Rate card derivation and profit rule engine.
//!
//! Carrier cards hold cost rates uploaded as immutable revisions. Customer
//! cards derive from one carrier card by applying prefix-matched profit
//! rules, rounding to the card's precision and blocking unprofitable
//! destinations. A new carrier revision makes its customer cards stale
//! until they are derived again.
//!
//! ## Modules
//!
//! - [`prefix`]: digit trie for longest-prefix-match
//! - [`store`]: card rows and append-only revision history
//! - [`rules`]: profit rule validation and resolution
//! - [`derivation`]: the derivation pipeline and the rebuild worker pool
//! - [`staleness`]: card status state machine and fan-out
//! - [`lookup`]: compiled rate tables for rating numbers
//! - [`engine`]: the [`RateEngine`] facade tying it together

pub mod derivation;
pub mod engine;
pub mod locks;
pub mod lookup;
pub mod metrics;
pub mod prefix;
pub mod rules;
pub mod staleness;
pub mod store;

pub use derivation::{DerivationPipeline, DerivationSettings, DerivedTable, RebuildReport};
pub use engine::{CardSettingsUpdate, CardStatusView, RateEngine};
pub use lookup::{CompiledRateTable, LookupMatch, RateLookupCache};
pub use metrics::EngineMetrics;
pub use prefix::PrefixIndex;
pub use rules::{assurance_conflicts, validate_rule_set, validate_rule_set_for, RuleResolver};
pub use staleness::{CardEvent, FanOutReport};
pub use store::{CardStore, InMemoryCardStore, InMemoryRevisionStore, RevisionStore};

/// Default width of the rebuild worker pool
pub const DEFAULT_MAX_PARALLEL_DERIVATIONS: usize = 4;

/// Default number of compiled rate tables kept for lookups
pub const DEFAULT_LOOKUP_CACHE_CAPACITY: usize = 256;

/// Engine tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub max_parallel_derivations: usize,
    pub lookup_cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_derivations: DEFAULT_MAX_PARALLEL_DERIVATIONS,
            lookup_cache_capacity: DEFAULT_LOOKUP_CACHE_CAPACITY,
        }
    }
}
