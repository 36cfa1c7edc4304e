//! Rate entries: one priced destination prefix

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Whether an entry may be used for routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    #[default]
    Active,
    /// Excluded from routing until a human intervenes
    Blocked,
}

/// A priced destination prefix
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateEntry {
    /// Digits, 1 to 15 characters
    pub prefix: String,
    /// Destination label, e.g. "United Kingdom - Mobile"
    pub destination: String,
    /// Cost per minute
    pub rate: Decimal,
    /// One-time charge per call
    #[serde(default)]
    pub connection_fee: Decimal,
    /// Billing increment in seconds
    #[serde(default = "default_increment")]
    pub billing_increment: u32,
    /// Minimum billed duration in seconds
    #[serde(default)]
    pub minimum_duration: u32,
    #[serde(default)]
    pub status: EntryStatus,
}

fn default_increment() -> u32 {
    crate::DEFAULT_BILLING_INCREMENT_SECS
}

impl RateEntry {
    pub fn new(prefix: impl Into<String>, destination: impl Into<String>, rate: Decimal) -> Self {
        Self {
            prefix: prefix.into(),
            destination: destination.into(),
            rate,
            connection_fee: Decimal::ZERO,
            billing_increment: crate::DEFAULT_BILLING_INCREMENT_SECS,
            minimum_duration: 0,
            status: EntryStatus::Active,
        }
    }

    pub fn with_connection_fee(mut self, fee: Decimal) -> Self {
        self.connection_fee = fee;
        self
    }

    /// Set billing increment and minimum duration, e.g. 60/60 or 1/1
    pub fn with_billing(mut self, increment: u32, minimum: u32) -> Self {
        self.billing_increment = increment;
        self.minimum_duration = minimum;
        self
    }

    pub fn blocked(mut self) -> Self {
        self.status = EntryStatus::Blocked;
        self
    }

    #[inline]
    pub fn is_routable(&self) -> bool {
        self.status == EntryStatus::Active
    }

    /// Canonical one-line form used for revision digests
    pub(crate) fn canonical_line(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}\n",
            self.prefix,
            self.destination,
            self.rate.normalize(),
            self.connection_fee.normalize(),
            self.billing_increment,
            self.minimum_duration,
            match self.status {
                EntryStatus::Active => "active",
                EntryStatus::Blocked => "blocked",
            }
        )
    }
}
