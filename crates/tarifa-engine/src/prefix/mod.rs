//! Prefix matching
//!
//! Longest-prefix-match is used for two things: finding the rate entry for a
//! dialed number and finding the profit rule for a destination prefix.

pub mod index;

pub use index::{PrefixBuildError, PrefixError, PrefixIndex};

/// Strip whitespace and a leading `+` from a dialed number
pub fn normalize_number(number: &str) -> &str {
    let trimmed = number.trim();
    trimmed.strip_prefix('+').unwrap_or(trimmed)
}
