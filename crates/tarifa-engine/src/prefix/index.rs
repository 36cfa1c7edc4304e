//! Digit trie for longest-prefix-match
//!
//! Nodes live in a flat arena and point at children by index, one slot per
//! decimal digit. Building is O(total prefix length); a lookup walks at most
//! `input.len()` nodes and remembers the deepest node that carries a value.
//!
//! The empty prefix is a valid key and matches every input.

use thiserror::Error;

/// Slot value meaning "no child". The root is never anyone's child.
const NO_CHILD: u32 = 0;

/// Why a prefix was refused at build time
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrefixError {
    #[error("duplicate prefix '{0}'")]
    Duplicate(String),

    #[error("prefix '{0}' contains a non-digit character")]
    NonDigit(String),
}

/// Every prefix refused while building one index
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} prefix(es) rejected", .0.len())]
pub struct PrefixBuildError(pub Vec<PrefixError>);

#[derive(Debug, Clone)]
struct Node {
    children: [u32; 10],
    value: Option<u32>,
}

impl Node {
    fn empty() -> Self {
        Self {
            children: [NO_CHILD; 10],
            value: None,
        }
    }
}

/// Immutable longest-prefix-match index over digit strings
#[derive(Debug, Clone)]
pub struct PrefixIndex<T> {
    nodes: Vec<Node>,
    values: Vec<(String, T)>,
}

impl<T> PrefixIndex<T> {
    /// Build from (prefix, value) pairs. Duplicate and non-digit prefixes are
    /// all collected before failing.
    pub fn build<I, S>(items: I) -> Result<Self, PrefixBuildError>
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
    {
        let mut index = Self {
            nodes: vec![Node::empty()],
            values: Vec::new(),
        };
        let mut errors = Vec::new();

        for (prefix, value) in items {
            let prefix = prefix.into();
            if !prefix.bytes().all(|b| b.is_ascii_digit()) {
                errors.push(PrefixError::NonDigit(prefix));
                continue;
            }

            let mut node = 0usize;
            for digit in prefix.bytes().map(|b| (b - b'0') as usize) {
                let child = index.nodes[node].children[digit];
                node = if child == NO_CHILD {
                    index.nodes.push(Node::empty());
                    let created = (index.nodes.len() - 1) as u32;
                    index.nodes[node].children[digit] = created;
                    created as usize
                } else {
                    child as usize
                };
            }

            if index.nodes[node].value.is_some() {
                errors.push(PrefixError::Duplicate(prefix));
                continue;
            }
            index.nodes[node].value = Some(index.values.len() as u32);
            index.values.push((prefix, value));
        }

        if errors.is_empty() {
            Ok(index)
        } else {
            Err(PrefixBuildError(errors))
        }
    }

    /// The longest indexed prefix of `input`, with its value.
    ///
    /// Matching stops at the first non-digit character of `input`.
    pub fn longest_match(&self, input: &str) -> Option<(&str, &T)> {
        let mut best = self.nodes[0].value;
        let mut node = 0usize;

        for b in input.bytes() {
            if !b.is_ascii_digit() {
                break;
            }
            let child = self.nodes[node].children[(b - b'0') as usize];
            if child == NO_CHILD {
                break;
            }
            node = child as usize;
            if let Some(v) = self.nodes[node].value {
                best = Some(v);
            }
        }

        best.map(|v| {
            let (prefix, value) = &self.values[v as usize];
            (prefix.as_str(), value)
        })
    }

    /// Exact lookup
    pub fn get(&self, prefix: &str) -> Option<&T> {
        let mut node = 0usize;
        for b in prefix.bytes() {
            if !b.is_ascii_digit() {
                return None;
            }
            let child = self.nodes[node].children[(b - b'0') as usize];
            if child == NO_CHILD {
                return None;
            }
            node = child as usize;
        }
        self.nodes[node]
            .value
            .map(|v| &self.values[v as usize].1)
    }

    /// Whether any indexed prefix is a prefix of `input`
    pub fn covers(&self, input: &str) -> bool {
        self.longest_match(input).is_some()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.values.iter().map(|(p, v)| (p.as_str(), v))
    }
}
