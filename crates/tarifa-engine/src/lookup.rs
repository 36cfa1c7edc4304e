//! Rate lookup
//!
//! A revision's entries are compiled into a [`PrefixIndex`] the first time a
//! number is rated against it. Compiled tables are keyed by revision id, and
//! revisions never change, so a cached table never needs invalidation; a new
//! revision simply gets a new key.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use tarifa_common::{is_digit_string, CardId, RateEntry, RateTable, RevisionId, TarifaError};

use crate::prefix::{normalize_number, PrefixIndex};

/// Result of rating one number
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LookupMatch {
    pub revision: RevisionId,
    /// Number after normalization and tech prefix stripping
    pub number: String,
    pub entry: RateEntry,
}

/// One revision ready for longest-prefix-match
#[derive(Debug)]
pub struct CompiledRateTable {
    revision: RevisionId,
    index: PrefixIndex<RateEntry>,
}

impl CompiledRateTable {
    pub fn compile(table: &RateTable) -> Result<Self, TarifaError> {
        let index = PrefixIndex::build(
            table
                .entries()
                .iter()
                .map(|entry| (entry.prefix.clone(), entry.clone())),
        )
        .map_err(|err| {
            TarifaError::Internal(format!("revision {} has unusable prefixes: {}", table.id(), err))
        })?;

        Ok(Self {
            revision: table.id(),
            index,
        })
    }

    pub fn revision(&self) -> RevisionId {
        self.revision
    }

    /// Longest matching entry, or None if nothing matches or the match is
    /// blocked. A blocked entry is never replaced by a shorter prefix.
    ///
    /// A number with anything but digits left after normalization matches
    /// nothing, rather than being rated on its leading digits.
    pub fn lookup(&self, number: &str, tech_prefix: Option<&str>) -> Option<LookupMatch> {
        let number = normalize_number(number);
        let number = tech_prefix
            .and_then(|tp| number.strip_prefix(tp))
            .unwrap_or(number);
        if !is_digit_string(number) {
            debug!(number, "Malformed number not rated");
            return None;
        }

        let (_, entry) = self.index.longest_match(number)?;
        if !entry.is_routable() {
            return None;
        }

        Some(LookupMatch {
            revision: self.revision,
            number: number.to_string(),
            entry: entry.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// Bounded cache of compiled tables
pub struct RateLookupCache {
    tables: DashMap<RevisionId, Arc<CompiledRateTable>>,
    max_entries: usize,
}

impl RateLookupCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            tables: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    /// Compiled form of `table`, building it on a miss
    pub fn get_or_compile(&self, table: &RateTable) -> Result<Arc<CompiledRateTable>, TarifaError> {
        let id = table.id();
        if let Some(hit) = self.tables.get(&id) {
            return Ok(hit.clone());
        }

        let compiled = Arc::new(CompiledRateTable::compile(table)?);
        self.evict_if_full();
        self.tables.insert(id, compiled.clone());
        debug!(revision = %id, entries = compiled.len(), "Compiled rate table");
        Ok(compiled)
    }

    /// Drop the oldest revisions of each card first, then anything else
    fn evict_if_full(&self) {
        if self.tables.len() < self.max_entries {
            return;
        }

        let mut newest: HashMap<CardId, u32> = HashMap::new();
        for id in self.tables.iter().map(|e| *e.key()) {
            let n = newest.entry(id.card_id).or_insert(id.number);
            *n = (*n).max(id.number);
        }
        self.tables
            .retain(|id, _| newest.get(&id.card_id).map_or(true, |n| *n == id.number));

        if self.tables.len() >= self.max_entries {
            let victim = self.tables.iter().next().map(|e| *e.key());
            if let Some(victim) = victim {
                self.tables.remove(&victim);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn clear(&self) {
        self.tables.clear();
    }
}
