//! Error types for the Tarifa engine
//!
//! Provides a unified error type and the rate card error taxonomy.

use serde::Serialize;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::types::ids::CardId;
use crate::types::rate_card::{CardStatus, CardType};

/// Result type alias using TarifaError
pub type Result<T> = std::result::Result<T, TarifaError>;

/// Unified error type for Tarifa operations
#[derive(Debug, Error)]
pub enum TarifaError {
    // Malformed input, rejected before any write
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    // Broken profit rule set
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    // Parent card or revision absent
    #[error("Dependency error: {0}")]
    Dependency(#[from] DependencyError),

    // Operation not allowed in the card's current state
    #[error("Precondition failed: {0}")]
    Precondition(#[from] PreconditionError),

    // Revision number collision
    #[error("Concurrency error: {0}")]
    Concurrency(#[from] ConcurrencyError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration loading error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TarifaError {
    /// Card lookup failure
    pub fn card_not_found(card_id: CardId) -> Self {
        TarifaError::NotFound(format!("rate card {}", card_id))
    }

    /// Stable machine-readable code for API consumers
    pub fn code(&self) -> &'static str {
        match self {
            TarifaError::Validation(_) => "VALIDATION_ERROR",
            TarifaError::Configuration(_) => "CONFIGURATION_ERROR",
            TarifaError::Dependency(_) => "DEPENDENCY_ERROR",
            TarifaError::Precondition(_) => "PRECONDITION_ERROR",
            TarifaError::Concurrency(_) => "CONCURRENCY_ERROR",
            TarifaError::NotFound(_) => "NOT_FOUND",
            TarifaError::Storage(_) => "STORAGE_ERROR",
            TarifaError::Config(_) => "CONFIG_ERROR",
            TarifaError::Serialization(_) => "SERIALIZATION_ERROR",
            TarifaError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether retrying after the precondition is met can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TarifaError::Dependency(_) | TarifaError::Precondition(_) | TarifaError::Concurrency(_)
        )
    }
}

/// A single offending record in a bulk input
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// Position of the record in the submitted batch, if it has one
    pub index: Option<usize>,
    /// Prefix of the record, when known
    pub prefix: Option<String>,
    /// Offending field
    pub field: String,
    /// What is wrong with it
    pub reason: String,
}

impl Violation {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            index: None,
            prefix: None,
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn at(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    pub fn for_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(index) = self.index {
            write!(f, "#{} ", index)?;
        }
        if let Some(prefix) = &self.prefix {
            write!(f, "prefix '{}' ", prefix)?;
        }
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Input validation failure listing every violation
#[derive(Debug, Clone, Default, PartialEq, Eq, Error, Serialize)]
#[error("{} violation(s): {}", .violations.len(), join_display(.violations))]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

impl ValidationError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(violation: Violation) -> Self {
        Self {
            violations: vec![violation],
        }
    }

    pub fn push(&mut self, violation: Violation) {
        self.violations.push(violation);
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    /// `Ok(())` when nothing was recorded
    pub fn into_result(self) -> std::result::Result<(), ValidationError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

/// One problem with a profit rule set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleProblem {
    /// No active rule with an empty match prefix
    MissingCatchAll,
    /// Two or more active rules share a match prefix
    DuplicateMatchPrefix { prefix: String, rule_ids: Vec<Uuid> },
    /// A rule is malformed on its own
    InvalidRule { rule_id: Uuid, reason: String },
    /// Resolution found no rule for a destination
    NoMatchingRule { prefix: String },
}

impl fmt::Display for RuleProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleProblem::MissingCatchAll => write!(f, "no active catch-all rule"),
            RuleProblem::DuplicateMatchPrefix { prefix, rule_ids } => write!(
                f,
                "{} active rules share match prefix '{}'",
                rule_ids.len(),
                prefix
            ),
            RuleProblem::InvalidRule { rule_id, reason } => {
                write!(f, "rule {}: {}", rule_id, reason)
            }
            RuleProblem::NoMatchingRule { prefix } => {
                write!(f, "no rule matches prefix '{}'", prefix)
            }
        }
    }
}

/// Profit rule set failure listing every problem
#[derive(Debug, Clone, Default, PartialEq, Eq, Error, Serialize)]
#[error("{} problem(s): {}", .problems.len(), join_display(.problems))]
pub struct ConfigurationError {
    pub problems: Vec<RuleProblem>,
}

impl ConfigurationError {
    pub fn single(problem: RuleProblem) -> Self {
        Self {
            problems: vec![problem],
        }
    }

    pub fn contains(&self, problem: &RuleProblem) -> bool {
        self.problems.contains(problem)
    }
}

/// Parent card or revision missing at derivation time
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
    #[error("customer card {card_id} has no parent carrier card")]
    NoParent { card_id: CardId },

    #[error("parent card {parent_id} of {card_id} does not exist")]
    ParentMissing { card_id: CardId, parent_id: CardId },

    #[error("parent card {parent_id} has no active revision")]
    NoActiveParentRevision { parent_id: CardId },

    #[error("parent card {parent_id} must be a carrier card with currency {currency} and direction {direction}")]
    ParentMismatch {
        parent_id: CardId,
        currency: String,
        direction: String,
    },
}

/// Operation attempted on a card in the wrong state or of the wrong type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreconditionError {
    #[error("card {card_id} is inactive")]
    CardInactive { card_id: CardId },

    #[error("card {card_id} is not a {expected} card")]
    WrongCardType { card_id: CardId, expected: CardType },

    #[error("card {card_id} cannot take '{event}' while {from}")]
    InvalidTransition {
        card_id: CardId,
        from: CardStatus,
        event: String,
    },

    #[error("revision {number} of card {card_id} does not exist")]
    UnknownRevision { card_id: CardId, number: u32 },
}

/// Revision-number collision
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConcurrencyError {
    #[error("card {card_id} expected next revision {expected}, store is at {actual}")]
    RevisionCollision {
        card_id: CardId,
        expected: u32,
        actual: u32,
    },
}

fn join_display<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<serde_json::Error> for TarifaError {
    fn from(err: serde_json::Error) -> Self {
        TarifaError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for TarifaError {
    fn from(err: std::io::Error) -> Self {
        TarifaError::Storage(err.to_string())
    }
}

impl From<anyhow::Error> for TarifaError {
    fn from(err: anyhow::Error) -> Self {
        TarifaError::Internal(err.to_string())
    }
}
