//! Slot catalog: the static, ordered list of trackable `domain-slot` pairs.
//!
//! The catalog order is the iteration order used everywhere a per-slot
//! quantity is produced (operation scores, update-slot gathering, belief
//! state rendering), so it must match the order used by feature extraction.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DstError, DstResult};

/// A single `domain-slot` identifier such as `restaurant-area`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SlotId {
    domain: String,
    name: String,
}

impl SlotId {
    /// Parse a `domain-slot` string. The domain is everything before the
    /// first `-`; the slot name may itself contain `-`.
    pub fn parse(raw: &str) -> DstResult<Self> {
        let (domain, name) = raw.split_once('-').ok_or_else(|| DstError::InvalidSlot {
            slot: raw.to_string(),
            reason: "expected 'domain-slot'".to_string(),
        })?;

        if domain.trim().is_empty() || name.trim().is_empty() {
            return Err(DstError::InvalidSlot {
                slot: raw.to_string(),
                reason: "domain and slot name must be non-empty".to_string(),
            });
        }

        Ok(Self {
            domain: domain.to_string(),
            name: name.to_string(),
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Render a `domain-slot-value` entry for this slot.
    pub fn with_value(&self, value: &str) -> String {
        format!("{}-{}-{}", self.domain, self.name, value)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.domain, self.name)
    }
}

impl TryFrom<String> for SlotId {
    type Error = DstError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SlotId> for String {
    fn from(value: SlotId) -> Self {
        value.to_string()
    }
}

/// Ordered catalog of slots plus the derived domain index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotCatalog {
    slots: Vec<SlotId>,
    domains: Vec<String>,
}

impl SlotCatalog {
    /// Build a catalog from `domain-slot` strings, preserving order.
    ///
    /// Domains are indexed in order of first appearance.
    pub fn new<S: AsRef<str>>(entries: &[S]) -> DstResult<Self> {
        let mut seen = HashSet::with_capacity(entries.len());
        let mut slots = Vec::with_capacity(entries.len());
        let mut domains: Vec<String> = Vec::new();

        for entry in entries {
            let slot = SlotId::parse(entry.as_ref())?;
            if !seen.insert(slot.clone()) {
                return Err(DstError::DuplicateSlot {
                    slot: slot.to_string(),
                });
            }
            if !domains.iter().any(|d| d == slot.domain()) {
                domains.push(slot.domain().to_string());
            }
            slots.push(slot);
        }

        Ok(Self { slots, domains })
    }

    /// Load a catalog persisted as a JSON array of `domain-slot` strings.
    pub fn load(path: &Path) -> DstResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let entries: Vec<String> = serde_json::from_str(&content)?;
        Self::new(&entries)
    }

    /// Persist the catalog as a pretty-printed JSON array.
    pub fn save(&self, path: &Path) -> DstResult<()> {
        let entries: Vec<String> = self.slots.iter().map(ToString::to_string).collect();
        std::fs::write(path, serde_json::to_string_pretty(&entries)?)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[SlotId] {
        &self.slots
    }

    pub fn get(&self, index: usize) -> Option<&SlotId> {
        self.slots.get(index)
    }

    pub fn index_of(&self, slot: &SlotId) -> Option<usize> {
        self.slots.iter().position(|s| s == slot)
    }

    /// Domains in order of first appearance; position is the domain id.
    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    pub fn domain_id(&self, domain: &str) -> Option<usize> {
        self.domains.iter().position(|d| d == domain)
    }
}
