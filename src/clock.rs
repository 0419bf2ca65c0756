//! Vector clocks for tracking causality between client edits.
//!
//! Each client carries a counter per client identifier; comparing two
//! clocks yields a partial causal order without any central clock. The
//! mapping is sparse: a missing key reads as zero and is never
//! materialized by reads, so clocks stay small even with client churn.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::ClientId;

/// Causal relation between two vector clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Causality {
    /// Every entry of the left clock is `<=` the right, and they differ.
    Before,
    /// Every entry of the right clock is `<=` the left, and they differ.
    After,
    /// All entries match.
    Equal,
    /// Neither dominates the other.
    Concurrent,
}

/// Sparse vector clock over client identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    entries: BTreeMap<ClientId, u64>,
}

impl VectorClock {
    /// Create an empty clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a counter. Missing keys read as zero without being inserted.
    pub fn get(&self, client: &str) -> u64 {
        self.entries.get(client).copied().unwrap_or(0)
    }

    /// Raise this client's counter by one, returning the new value.
    pub fn increment(&mut self, client: &str) -> u64 {
        let entry = self.entries.entry(client.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Return a copy with the given client's counter raised by one.
    pub fn incremented(&self, client: &str) -> Self {
        let mut next = self.clone();
        next.increment(client);
        next
    }

    /// Pointwise maximum of two clocks.
    pub fn merge(&mut self, other: &VectorClock) {
        for (client, &count) in &other.entries {
            let entry = self.entries.entry(client.clone()).or_insert(0);
            *entry = (*entry).max(count);
        }
    }

    /// Compare two clocks over the union of their keys.
    ///
    /// Early-exits to [`Causality::Concurrent`] as soon as both a
    /// dominating and a dominated entry have been seen.
    pub fn compare(&self, other: &VectorClock) -> Causality {
        let mut self_ahead = false;
        let mut other_ahead = false;

        for (client, &count) in &self.entries {
            let theirs = other.get(client);
            if count > theirs {
                self_ahead = true;
            } else if count < theirs {
                other_ahead = true;
            }
            if self_ahead && other_ahead {
                return Causality::Concurrent;
            }
        }
        for (client, &count) in &other.entries {
            if !self.entries.contains_key(client) && count > 0 {
                other_ahead = true;
                if self_ahead {
                    return Causality::Concurrent;
                }
            }
        }

        match (self_ahead, other_ahead) {
            (false, false) => Causality::Equal,
            (false, true) => Causality::Before,
            (true, false) => Causality::After,
            (true, true) => Causality::Concurrent,
        }
    }

    /// Check if self happened strictly before other.
    pub fn happened_before(&self, other: &VectorClock) -> bool {
        self.compare(other) == Causality::Before
    }

    /// Check if two clocks are concurrent.
    pub fn concurrent_with(&self, other: &VectorClock) -> bool {
        self.compare(other) == Causality::Concurrent
    }

    /// Number of materialized entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entry has been materialized.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(ClientId, u64)> for VectorClock {
    fn from_iter<I: IntoIterator<Item = (ClientId, u64)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().filter(|(_, n)| *n > 0).collect(),
        }
    }
}
