//! Core data types for rate cards

pub mod ids;
pub mod precision;
pub mod profit_rule;
pub mod rate_card;
pub mod rate_entry;
pub mod rate_table;
