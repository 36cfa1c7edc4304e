//! Rate table revisions
//!
//! A revision is sealed once: the store assigns its number, the entries are
//! sorted by prefix and a blake3 digest is taken over their canonical form.
//! Fields are private and only readable through accessors, so a revision a
//! caller holds can never change under it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{ValidationError, Violation};
use crate::types::ids::{CardId, RevisionId};
use crate::types::rate_entry::{EntryStatus, RateEntry};

/// What a derived revision was computed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivationProvenance {
    pub parent_card_id: CardId,
    pub parent_revision: u32,
    pub rule_set_version: u32,
    pub settings_version: u32,
}

/// How a revision came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RevisionSource {
    /// Direct upload to a carrier card
    Upload,
    /// Output of the derivation pipeline
    Derived(DerivationProvenance),
    /// Copy of an earlier revision of the same card
    Restored {
        restored_from: u32,
        /// Inputs the restored entries were originally derived from
        provenance: Option<DerivationProvenance>,
        /// Inputs in force when the rollback happened
        #[serde(default)]
        baseline: Option<DerivationProvenance>,
    },
}

impl RevisionSource {
    /// Derivation inputs, if this revision (or the one it restores) was derived
    pub fn provenance(&self) -> Option<&DerivationProvenance> {
        match self {
            RevisionSource::Upload => None,
            RevisionSource::Derived(p) => Some(p),
            RevisionSource::Restored { provenance, .. } => provenance.as_ref(),
        }
    }

    /// Inputs a later change is measured against.
    ///
    /// A restored revision is current as of its rollback, not as of the
    /// derivation it copies.
    pub fn baseline(&self) -> Option<&DerivationProvenance> {
        match self {
            RevisionSource::Restored {
                baseline: Some(b), ..
            } => Some(b),
            other => other.provenance(),
        }
    }
}

/// Unsealed revision handed to the store
#[derive(Debug, Clone)]
pub struct RevisionDraft {
    pub card_id: CardId,
    pub entries: Vec<RateEntry>,
    pub effective_at: Option<DateTime<Utc>>,
    pub source: RevisionSource,
}

impl RevisionDraft {
    pub fn upload(card_id: CardId, entries: Vec<RateEntry>, effective_at: Option<DateTime<Utc>>) -> Self {
        Self {
            card_id,
            entries,
            effective_at,
            source: RevisionSource::Upload,
        }
    }
}

/// Immutable revision of a card's entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateTable {
    card_id: CardId,
    number: u32,
    created_at: DateTime<Utc>,
    effective_at: Option<DateTime<Utc>>,
    source: RevisionSource,
    digest: String,
    entries: Vec<RateEntry>,
}

/// Revision metadata without the entry set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionMeta {
    pub card_id: CardId,
    pub number: u32,
    pub created_at: DateTime<Utc>,
    pub effective_at: Option<DateTime<Utc>>,
    pub source: RevisionSource,
    pub digest: String,
    pub entry_count: usize,
    pub blocked_count: usize,
}

impl RateTable {
    /// Seal a draft under the given revision number
    pub fn seal(draft: RevisionDraft, number: u32, created_at: DateTime<Utc>) -> Self {
        let mut entries = draft.entries;
        entries.sort_by(|a, b| a.prefix.cmp(&b.prefix));

        let mut hasher = blake3::Hasher::new();
        for entry in &entries {
            hasher.update(entry.canonical_line().as_bytes());
        }

        Self {
            card_id: draft.card_id,
            number,
            created_at,
            effective_at: draft.effective_at,
            source: draft.source,
            digest: hasher.finalize().to_hex().to_string(),
            entries,
        }
    }

    pub fn id(&self) -> RevisionId {
        RevisionId::new(self.card_id, self.number)
    }

    pub fn card_id(&self) -> CardId {
        self.card_id
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn effective_at(&self) -> Option<DateTime<Utc>> {
        self.effective_at
    }

    pub fn source(&self) -> &RevisionSource {
        &self.source
    }

    /// Hex blake3 digest of the canonical entry set
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Entries sorted by prefix
    pub fn entries(&self) -> &[RateEntry] {
        &self.entries
    }

    pub fn entry(&self, prefix: &str) -> Option<&RateEntry> {
        self.entries
            .binary_search_by(|e| e.prefix.as_str().cmp(prefix))
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Whether this revision is in force at `at`
    pub fn is_effective_at(&self, at: DateTime<Utc>) -> bool {
        self.effective_at.map_or(true, |t| t <= at)
    }

    pub fn blocked_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status == EntryStatus::Blocked)
            .count()
    }

    pub fn meta(&self) -> RevisionMeta {
        RevisionMeta {
            card_id: self.card_id,
            number: self.number,
            created_at: self.created_at,
            effective_at: self.effective_at,
            source: self.source,
            digest: self.digest.clone(),
            entry_count: self.entries.len(),
            blocked_count: self.blocked_count(),
        }
    }
}

/// Validate a batch of entries for a new revision.
///
/// Every offending entry is reported, not just the first.
pub fn validate_entries(entries: &[RateEntry]) -> Result<(), ValidationError> {
    let mut errors = ValidationError::new();

    if entries.is_empty() {
        errors.push(Violation::new("entries", "a revision needs at least one entry"));
    }

    let mut first_seen: HashMap<&str, usize> = HashMap::with_capacity(entries.len());

    for (i, entry) in entries.iter().enumerate() {
        let violation = |field: &str, reason: String| {
            Violation::new(field, reason)
                .at(i)
                .for_prefix(entry.prefix.clone())
        };

        if !crate::is_digit_string(&entry.prefix) || entry.prefix.len() > crate::MAX_PREFIX_LEN {
            errors.push(violation(
                "prefix",
                format!("must be 1 to {} digits", crate::MAX_PREFIX_LEN),
            ));
        }
        if entry.rate < Decimal::ZERO {
            errors.push(violation("rate", format!("{} is negative", entry.rate)));
        }
        if entry.connection_fee < Decimal::ZERO {
            errors.push(violation(
                "connection_fee",
                format!("{} is negative", entry.connection_fee),
            ));
        }
        if entry.billing_increment == 0 {
            errors.push(violation("billing_increment", "must be greater than zero".to_string()));
        }

        if let Some(first) = first_seen.get(entry.prefix.as_str()) {
            errors.push(violation(
                "prefix",
                format!("duplicates entry #{}", first),
            ));
        } else {
            first_seen.insert(entry.prefix.as_str(), i);
        }
    }

    errors.into_result()
}
