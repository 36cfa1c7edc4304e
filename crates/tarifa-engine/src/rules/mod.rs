//! Profit rules
//!
//! Provides rule set validation and longest-prefix rule resolution.

pub mod resolver;

pub use resolver::{assurance_conflicts, validate_rule_set, validate_rule_set_for, RuleResolver};
