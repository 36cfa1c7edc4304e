//! Billing precision and round-half-up
//!
//! Every card prices to a fixed number of decimal digits (2 to 6).
//! Derived rates and connection fees are rounded half away from zero,
//! which for the non-negative amounts on a rate card is round-half-up.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Violation;

/// Decimal digits a card prices to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct BillingPrecision(u32);

impl BillingPrecision {
    pub const MIN: u32 = 2;
    pub const MAX: u32 = 6;

    pub fn new(digits: u32) -> Result<Self, Violation> {
        if (Self::MIN..=Self::MAX).contains(&digits) {
            Ok(Self(digits))
        } else {
            Err(Violation::new(
                "precision",
                format!(
                    "must be between {} and {} digits, got {}",
                    Self::MIN,
                    Self::MAX,
                    digits
                ),
            ))
        }
    }

    #[inline]
    pub fn digits(&self) -> u32 {
        self.0
    }

    /// Round a value to this precision
    #[inline]
    pub fn round(&self, value: Decimal) -> Decimal {
        round_half_up(value, self.0)
    }
}

impl Default for BillingPrecision {
    fn default() -> Self {
        Self(crate::DEFAULT_PRECISION)
    }
}

impl TryFrom<u32> for BillingPrecision {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        BillingPrecision::new(value).map_err(|v| v.reason)
    }
}

impl From<BillingPrecision> for u32 {
    fn from(value: BillingPrecision) -> Self {
        value.0
    }
}

impl fmt::Display for BillingPrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} digits", self.0)
    }
}

/// Round half away from zero to `dp` decimal places
pub fn round_half_up(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
}
