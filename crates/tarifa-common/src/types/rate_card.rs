//! Rate card identity, settings and status
//!
//! A carrier card holds the cost rates paid to a supplier. A customer card
//! holds sell rates derived from exactly one carrier card through its profit
//! rules. Cards never store entries directly; entries live in revisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ValidationError, Violation};
use crate::types::ids::CardId;
use crate::types::precision::BillingPrecision;

/// Which side of the business a card prices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardType {
    /// Sell rates charged to a customer
    Customer,
    /// Cost rates paid to a supplier
    Carrier,
}

impl fmt::Display for CardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardType::Customer => write!(f, "customer"),
            CardType::Carrier => write!(f, "carrier"),
        }
    }
}

/// Traffic direction a card applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Termination,
    Origination,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Termination => write!(f, "termination"),
            Direction::Origination => write!(f, "origination"),
        }
    }
}

/// Lifecycle status tracked by the staleness state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardStatus {
    /// Rates reflect the latest parent revision and rule set
    Active,
    /// Parent or rules changed since the last derivation
    Stale,
    /// Disabled by an administrator
    Inactive,
}

impl fmt::Display for CardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardStatus::Active => write!(f, "active"),
            CardStatus::Stale => write!(f, "stale"),
            CardStatus::Inactive => write!(f, "inactive"),
        }
    }
}

/// Fail-closed margin policy for customer cards
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfitAssurance {
    /// Block entries that would not exceed cost
    pub enabled: bool,
    /// Prefixes (and everything below them) exempt from blocking
    #[serde(default)]
    pub exempt_prefixes: Vec<String>,
}

impl ProfitAssurance {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            exempt_prefixes: Vec::new(),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn with_exemption(mut self, prefix: impl Into<String>) -> Self {
        self.exempt_prefixes.push(prefix.into());
        self
    }
}

/// A rate card row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateCard {
    pub id: CardId,
    /// Unique human-facing code
    pub code: String,
    pub card_type: CardType,
    /// ISO currency code
    pub currency: String,
    pub direction: Direction,
    pub precision: BillingPrecision,
    /// Carrier card this customer card derives from
    pub parent_card_id: Option<CardId>,
    /// Digits a carrier expects in front of the dialed number
    pub tech_prefix: Option<String>,
    pub profit_assurance: ProfitAssurance,
    pub status: CardStatus,
    /// Number of revisions written for this card
    pub revision_count: u32,
    /// Bumped whenever precision or assurance settings change
    pub settings_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RateCard {
    #[inline]
    pub fn is_customer(&self) -> bool {
        self.card_type == CardType::Customer
    }

    #[inline]
    pub fn is_carrier(&self) -> bool {
        self.card_type == CardType::Carrier
    }

    #[inline]
    pub fn is_inactive(&self) -> bool {
        self.status == CardStatus::Inactive
    }

    /// Update the modification timestamp
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Request to create a card
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRateCard {
    pub code: String,
    pub card_type: CardType,
    pub currency: String,
    pub direction: Direction,
    #[serde(default = "default_precision")]
    pub precision: u32,
    #[serde(default)]
    pub parent_card_id: Option<CardId>,
    #[serde(default)]
    pub tech_prefix: Option<String>,
    #[serde(default)]
    pub profit_assurance: ProfitAssurance,
}

fn default_precision() -> u32 {
    crate::DEFAULT_PRECISION
}

impl NewRateCard {
    /// A carrier (cost) card
    pub fn carrier(code: impl Into<String>, currency: impl Into<String>, direction: Direction) -> Self {
        Self {
            code: code.into(),
            card_type: CardType::Carrier,
            currency: currency.into(),
            direction,
            precision: crate::DEFAULT_PRECISION,
            parent_card_id: None,
            tech_prefix: None,
            profit_assurance: ProfitAssurance::disabled(),
        }
    }

    /// A customer (sell) card derived from `parent`
    pub fn customer(
        code: impl Into<String>,
        currency: impl Into<String>,
        direction: Direction,
        parent: CardId,
    ) -> Self {
        Self {
            code: code.into(),
            card_type: CardType::Customer,
            currency: currency.into(),
            direction,
            precision: crate::DEFAULT_PRECISION,
            parent_card_id: Some(parent),
            tech_prefix: None,
            profit_assurance: ProfitAssurance::disabled(),
        }
    }

    pub fn with_precision(mut self, digits: u32) -> Self {
        self.precision = digits;
        self
    }

    pub fn with_tech_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.tech_prefix = Some(prefix.into());
        self
    }

    pub fn with_profit_assurance(mut self, assurance: ProfitAssurance) -> Self {
        self.profit_assurance = assurance;
        self
    }

    /// Checks that do not need other cards. Parent existence and
    /// compatibility are checked by the card store.
    pub fn validate(&self) -> Result<BillingPrecision, ValidationError> {
        let mut errors = ValidationError::new();

        if self.code.trim().is_empty() {
            errors.push(Violation::new("code", "must not be empty"));
        }
        if self.currency.len() != 3 || !self.currency.bytes().all(|b| b.is_ascii_uppercase()) {
            errors.push(Violation::new(
                "currency",
                format!("'{}' is not a three-letter currency code", self.currency),
            ));
        }

        let precision = BillingPrecision::new(self.precision);
        if let Err(violation) = &precision {
            errors.push(violation.clone());
        }

        match self.card_type {
            CardType::Carrier => {
                if self.parent_card_id.is_some() {
                    errors.push(Violation::new("parent_card_id", "carrier cards never have a parent"));
                }
                if let Some(tech) = &self.tech_prefix {
                    if !crate::is_digit_string(tech) {
                        errors.push(Violation::new(
                            "tech_prefix",
                            format!("'{}' must be digits only", tech),
                        ));
                    }
                }
            }
            CardType::Customer => {
                if self.tech_prefix.is_some() {
                    errors.push(Violation::new("tech_prefix", "only carrier cards carry a tech prefix"));
                }
            }
        }

        for prefix in &self.profit_assurance.exempt_prefixes {
            if !crate::is_digit_string(prefix) {
                errors.push(
                    Violation::new("profit_assurance.exempt_prefixes", "must be digits only")
                        .for_prefix(prefix.clone()),
                );
            }
        }

        errors.into_result()?;
        precision.map_err(ValidationError::single)
    }

    /// Build the card row once validation passed
    pub fn into_card(self, precision: BillingPrecision) -> RateCard {
        let now = Utc::now();
        RateCard {
            id: CardId::new(),
            code: self.code,
            card_type: self.card_type,
            currency: self.currency,
            direction: self.direction,
            precision,
            parent_card_id: self.parent_card_id,
            tech_prefix: self.tech_prefix,
            profit_assurance: self.profit_assurance,
            status: CardStatus::Active,
            revision_count: 0,
            settings_version: 1,
            created_at: now,
            updated_at: now,
        }
    }
}
