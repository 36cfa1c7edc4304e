//! Profit rule validation and resolution
//!
//! Active rules are compiled into a [`PrefixIndex`] keyed by match prefix.
//! Resolution is longest-prefix-match; the catch-all guarantees a hit.
//! Two active rules with the same match prefix have no defined precedence,
//! so such a set is rejected instead of picking one.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

use tarifa_common::{
    ConfigurationError, ProfitAssurance, ProfitRule, ProfitRuleSet, ProfitType, RuleProblem,
    MAX_PREFIX_LEN,
};

use crate::prefix::{PrefixError, PrefixIndex};

/// Check a rule set before it is stored or used.
///
/// Reports every problem found.
pub fn validate_rule_set(rules: &[ProfitRule]) -> Result<(), ConfigurationError> {
    let mut problems = Vec::new();

    for rule in rules {
        if rule.match_prefix.len() > MAX_PREFIX_LEN
            || !rule.match_prefix.bytes().all(|b| b.is_ascii_digit())
        {
            problems.push(RuleProblem::InvalidRule {
                rule_id: rule.id,
                reason: format!(
                    "match prefix '{}' must be empty or up to {} digits",
                    rule.match_prefix, MAX_PREFIX_LEN
                ),
            });
        }
        if rule.profit_type == ProfitType::Percentage && rule.value <= Decimal::NEGATIVE_ONE {
            problems.push(RuleProblem::InvalidRule {
                rule_id: rule.id,
                reason: format!("percentage {} would price at or below zero", rule.value),
            });
        }
    }

    let mut by_prefix: BTreeMap<&str, Vec<Uuid>> = BTreeMap::new();
    for rule in rules.iter().filter(|r| r.is_active()) {
        by_prefix.entry(rule.match_prefix.as_str()).or_default().push(rule.id);
    }

    if !by_prefix.contains_key(tarifa_common::CATCH_ALL_PREFIX) {
        problems.push(RuleProblem::MissingCatchAll);
    }

    for (prefix, rule_ids) in by_prefix {
        if rule_ids.len() > 1 {
            problems.push(RuleProblem::DuplicateMatchPrefix {
                prefix: prefix.to_string(),
                rule_ids,
            });
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ConfigurationError { problems })
    }
}

/// Active percentage rules that discount below cost on a card whose profit
/// assurance is on.
///
/// A negative percentage is only allowed with assurance off, or when every
/// destination the rule can match sits under an exempt prefix.
pub fn assurance_conflicts(rules: &[ProfitRule], assurance: &ProfitAssurance) -> Vec<RuleProblem> {
    if !assurance.enabled {
        return Vec::new();
    }

    rules
        .iter()
        .filter(|r| r.is_active() && r.profit_type == ProfitType::Percentage && r.value < Decimal::ZERO)
        .filter(|r| {
            !assurance
                .exempt_prefixes
                .iter()
                .any(|exempt| r.match_prefix.starts_with(exempt.as_str()))
        })
        .map(|r| RuleProblem::InvalidRule {
            rule_id: r.id,
            reason: format!(
                "negative percentage {} on '{}' needs profit assurance disabled for that prefix",
                r.value, r.match_prefix
            ),
        })
        .collect()
}

/// [`validate_rule_set`] plus the card's profit assurance policy
pub fn validate_rule_set_for(rules: &[ProfitRule], assurance: &ProfitAssurance) -> Result<(), ConfigurationError> {
    let mut problems = validate_rule_set(rules).err().map_or_else(Vec::new, |e| e.problems);
    problems.extend(assurance_conflicts(rules, assurance));

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ConfigurationError { problems })
    }
}

/// Compiled, read-only view of a card's active rules
#[derive(Debug, Clone)]
pub struct RuleResolver {
    index: PrefixIndex<ProfitRule>,
    version: u32,
}

impl RuleResolver {
    /// Validate and compile a stored rule set
    pub fn compile(rule_set: &ProfitRuleSet) -> Result<Self, ConfigurationError> {
        let mut resolver = Self::from_rules(&rule_set.rules)?;
        resolver.version = rule_set.version;
        Ok(resolver)
    }

    /// Validate and compile a bare list of rules
    pub fn from_rules(rules: &[ProfitRule]) -> Result<Self, ConfigurationError> {
        validate_rule_set(rules)?;

        let active = rules
            .iter()
            .filter(|r| r.is_active())
            .map(|r| (r.match_prefix.clone(), r.clone()));

        let index = PrefixIndex::build(active).map_err(|err| ConfigurationError {
            problems: err
                .0
                .into_iter()
                .map(|e| match e {
                    PrefixError::Duplicate(prefix) => RuleProblem::DuplicateMatchPrefix {
                        prefix,
                        rule_ids: Vec::new(),
                    },
                    PrefixError::NonDigit(prefix) => RuleProblem::InvalidRule {
                        rule_id: Uuid::nil(),
                        reason: format!("match prefix '{}' is not numeric", prefix),
                    },
                })
                .collect(),
        })?;

        debug!(rules = index.len(), "Compiled profit rules");
        Ok(Self { index, version: 0 })
    }

    /// The most specific active rule for a destination prefix
    pub fn resolve(&self, destination_prefix: &str) -> Result<&ProfitRule, ConfigurationError> {
        self.index
            .longest_match(destination_prefix)
            .map(|(_, rule)| rule)
            .ok_or_else(|| {
                ConfigurationError::single(RuleProblem::NoMatchingRule {
                    prefix: destination_prefix.to_string(),
                })
            })
    }

    /// Version of the rule set this was compiled from
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Number of active rules
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
