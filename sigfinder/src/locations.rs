use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Resolved addresses by signature key. Zero means the signature did not match.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationTable {
    entries: BTreeMap<String, u32>,
}

impl LocationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, key: impl Into<String>, address: u32) {
        self.entries.insert(key.into(), address);
    }

    /// Resolved value of `key`, `None` if the key was never resolved
    pub fn get(&self, key: &str) -> Option<u32> {
        self.entries.get(key).copied()
    }

    /// Resolved value of `key`, 0 if unknown or not found
    pub fn address(&self, key: &str) -> u32 {
        self.get(key).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries with a non-zero address
    pub fn found(&self) -> usize {
        self.entries.values().filter(|a| **a != 0).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }
}
