//! Rules of one document label, grouped by field.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::priority::PriorityList;
use crate::rule::{ExtractionOutcome, Rule};

/// Field name to [`PriorityList`] for a single label.
///
/// Fields are created lazily; looking up an unknown field is simply a miss.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleCache {
    fields: BTreeMap<String, PriorityList>,
}

impl RuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the field's rules against `text`, crediting at most one.
    pub fn try_extract(&mut self, field: &str, text: &str) -> ExtractionOutcome {
        let list = self.fields.entry(field.to_string()).or_default();
        let outcome = list.try_extract(text);
        debug!(field, hit = outcome.is_hit(), "Cache lookup");
        outcome
    }

    /// Append a rule to the field's list with weight 1.
    pub fn add_rule(&mut self, field: &str, rule: Rule) {
        debug!(field, rule = %rule, "Learning rule");
        self.fields.entry(field.to_string()).or_default().add_rule(rule);
    }

    /// Fields known to this cache, in name order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn get(&self, field: &str) -> Option<&PriorityList> {
        self.fields.get(field)
    }

    pub(crate) fn get_mut_or_default(&mut self, field: &str) -> &mut PriorityList {
        self.fields.entry(field.to_string()).or_default()
    }

    /// Total number of rules across all fields.
    pub fn rule_count(&self) -> usize {
        self.fields.values().map(PriorityList::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rule_count() == 0
    }
}
