//! A rule paired with its success counter.

use serde::{Deserialize, Deserializer, Serialize};

use crate::rule::Rule;

/// Unit of priority inside a [`PriorityList`](super::PriorityList).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub(crate) rule: Rule,
    #[serde(deserialize_with = "positive_weight")]
    pub(crate) weight: u32,
}

impl CacheEntry {
    /// Wrap a rule with the given starting weight (clamped to at least 1).
    pub fn new(rule: Rule, weight: u32) -> Self {
        Self {
            rule,
            weight: weight.max(1),
        }
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Credit one successful use.
    pub fn increment(&mut self) -> u32 {
        self.weight = self.weight.saturating_add(1);
        self.weight
    }

    /// Remove one credit, never going below 1.
    pub fn decrement(&mut self) -> u32 {
        self.weight = self.weight.saturating_sub(1).max(1);
        self.weight
    }
}

fn positive_weight<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let weight = u32::deserialize(deserializer)?;
    if weight == 0 {
        return Err(serde::de::Error::custom("weight must be at least 1"));
    }
    Ok(weight)
}
