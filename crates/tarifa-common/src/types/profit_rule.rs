//! Profit rules for customer cards
//!
//! A rule adds margin to every destination whose prefix starts with the
//! rule's match prefix. The empty match prefix is the catch-all.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::ids::CardId;

/// How the profit value is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfitType {
    /// Multiplier, 0.15 means +15%
    Percentage,
    /// Absolute amount in the card currency
    Fixed,
}

/// Which charge the margin lands on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApplyTo {
    All,
    /// Connection fee only
    Setup,
    /// Per-minute rate only
    PerMinute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    #[default]
    Active,
    Inactive,
}

/// A prefix-keyed margin rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfitRule {
    #[serde(default = "Uuid::now_v7")]
    pub id: Uuid,
    /// Digits; empty matches every destination
    #[serde(default)]
    pub match_prefix: String,
    pub profit_type: ProfitType,
    pub value: Decimal,
    pub apply_to: ApplyTo,
    #[serde(default)]
    pub status: RuleStatus,
}

impl ProfitRule {
    pub fn percentage(match_prefix: impl Into<String>, value: Decimal) -> Self {
        Self::new(match_prefix, ProfitType::Percentage, value)
    }

    pub fn fixed(match_prefix: impl Into<String>, value: Decimal) -> Self {
        Self::new(match_prefix, ProfitType::Fixed, value)
    }

    fn new(match_prefix: impl Into<String>, profit_type: ProfitType, value: Decimal) -> Self {
        Self {
            id: Uuid::now_v7(),
            match_prefix: match_prefix.into(),
            profit_type,
            value,
            apply_to: ApplyTo::All,
            status: RuleStatus::Active,
        }
    }

    pub fn applied_to(mut self, apply_to: ApplyTo) -> Self {
        self.apply_to = apply_to;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.status = RuleStatus::Inactive;
        self
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.status == RuleStatus::Active
    }

    #[inline]
    pub fn is_catch_all(&self) -> bool {
        self.match_prefix == crate::CATCH_ALL_PREFIX
    }
}

/// Versioned snapshot of a card's rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfitRuleSet {
    pub card_id: CardId,
    /// Starts at 1, bumped on every replacement
    pub version: u32,
    pub rules: Vec<ProfitRule>,
    pub updated_at: DateTime<Utc>,
}

impl ProfitRuleSet {
    pub fn new(card_id: CardId, version: u32, rules: Vec<ProfitRule>) -> Self {
        Self {
            card_id,
            version,
            rules,
            updated_at: Utc::now(),
        }
    }

    pub fn active_rules(&self) -> impl Iterator<Item = &ProfitRule> {
        self.rules.iter().filter(|r| r.is_active())
    }

    pub fn has_active_rules(&self) -> bool {
        self.rules.iter().any(ProfitRule::is_active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_rule_json_shape() {
        let rule: ProfitRule = serde_json::from_str(
            r#"{"match_prefix":"44","profit_type":"fixed","value":"0.005","apply_to":"perMinute"}"#,
        )
        .unwrap();
        assert_eq!(rule.apply_to, ApplyTo::PerMinute);
        assert_eq!(rule.value, dec!(0.005));
        assert!(rule.is_active());
        assert!(!rule.is_catch_all());
    }

    #[test]
    fn test_active_rules_filter() {
        let set = ProfitRuleSet::new(
            CardId::new(),
            1,
            vec![
                ProfitRule::percentage("", dec!(0.10)),
                ProfitRule::fixed("44", dec!(0.005)).inactive(),
            ],
        );
        assert_eq!(set.active_rules().count(), 1);
        assert!(set.has_active_rules());
    }
}
