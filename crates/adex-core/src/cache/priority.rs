//! Per-field rule list kept in descending weight order.
//!
//! Entries live in a dense arena and are chained through `prev`/`next`
//! indices, so moving an entry is a local splice rather than a re-sort.
//! Entries are never removed, which keeps plain indices stable.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;

use super::entry::CacheEntry;
use crate::rule::{ExtractionOutcome, Rule};

#[derive(Debug, Clone)]
struct Slot {
    entry: CacheEntry,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Ordered rules for one (label, field) pair.
///
/// Weights are non-increasing from head to tail. Entries of equal weight keep
/// their insertion order, because an entry only moves past neighbours whose
/// weight is strictly smaller.
#[derive(Debug, Clone, Default)]
pub struct PriorityList {
    slots: Vec<Slot>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl PriorityList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Append a freshly learned rule at the tail with weight 1.
    pub fn add_rule(&mut self, rule: Rule) {
        self.add_rule_with_weight(rule, 1);
    }

    /// Append a rule at the tail with an explicit weight.
    ///
    /// Order is taken as given; nothing is re-sorted. This is what loading a
    /// persisted list relies on to keep tie order across runs.
    pub fn add_rule_with_weight(&mut self, rule: Rule, weight: u32) {
        self.push_entry(CacheEntry::new(rule, weight));
    }

    /// Try rules head to tail; credit and promote the first that fires and
    /// validates.
    pub fn try_extract(&mut self, text: &str) -> ExtractionOutcome {
        let mut cursor = self.head;

        while let Some(idx) = cursor {
            let next = self.slots[idx].next;

            if let Some(outcome) = self.slots[idx].entry.rule.extract(text) {
                let weight = self.slots[idx].entry.increment();
                debug!(
                    kind = self.slots[idx].entry.rule.kind().as_str(),
                    weight, "Cached rule matched"
                );
                self.promote(idx);
                return outcome;
            }

            cursor = next;
        }

        debug!("No cached rule matched for this field");
        ExtractionOutcome::NoMatch
    }

    /// Take one credit from the entry at `position` (head is 0) and move it
    /// toward the tail past heavier successors. Returns the new weight.
    pub fn penalize(&mut self, position: usize) -> Option<u32> {
        let idx = self.index_at(position)?;
        let weight = self.slots[idx].entry.decrement();
        self.demote(idx);
        Some(weight)
    }

    /// Whether an identical rule is already present.
    pub fn contains(&self, rule: &Rule) -> bool {
        self.iter().any(|entry| entry.rule() == rule)
    }

    /// Weights head to tail.
    pub fn weights(&self) -> Vec<u32> {
        self.iter().map(CacheEntry::weight).collect()
    }

    /// Entries head to tail (highest priority first).
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }

    /// Insert after every entry whose weight is greater or equal, keeping
    /// the ordering invariant. Used when merging registries.
    pub(crate) fn insert_ordered(&mut self, entry: CacheEntry) {
        let mut after = None;
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            if self.slots[idx].entry.weight < entry.weight {
                break;
            }
            after = Some(idx);
            cursor = self.slots[idx].next;
        }

        let idx = self.alloc(entry);
        self.link_after(idx, after);
    }

    fn push_entry(&mut self, entry: CacheEntry) {
        debug!(
            kind = entry.rule.kind().as_str(),
            weight = entry.weight,
            total = self.slots.len() + 1,
            "Added rule to cache"
        );
        let idx = self.alloc(entry);
        self.link_after(idx, self.tail);
    }

    fn alloc(&mut self, entry: CacheEntry) -> usize {
        self.slots.push(Slot {
            entry,
            prev: None,
            next: None,
        });
        self.slots.len() - 1
    }

    fn index_at(&self, position: usize) -> Option<usize> {
        let mut cursor = self.head;
        for _ in 0..position {
            cursor = self.slots[cursor?].next;
        }
        cursor
    }

    /// Splice an unlinked slot after `after`, or at the head when `None`.
    fn link_after(&mut self, idx: usize, after: Option<usize>) {
        let next = match after {
            Some(a) => self.slots[a].next,
            None => self.head,
        };

        self.slots[idx].prev = after;
        self.slots[idx].next = next;

        match after {
            Some(a) => self.slots[a].next = Some(idx),
            None => self.head = Some(idx),
        }
        match next {
            Some(n) => self.slots[n].prev = Some(idx),
            None => self.tail = Some(idx),
        }
    }

    /// Bubble toward the head while the predecessor is strictly lighter.
    fn promote(&mut self, idx: usize) {
        let mut moved = 0usize;
        while let Some(prev) = self.slots[idx].prev {
            if self.slots[prev].entry.weight >= self.slots[idx].entry.weight {
                break;
            }
            self.swap_with_prev(idx);
            moved += 1;
        }

        if moved > 0 {
            debug!(
                weight = self.slots[idx].entry.weight,
                positions = moved,
                "Rule promoted"
            );
        }
    }

    /// Sink toward the tail while the successor is strictly heavier.
    fn demote(&mut self, idx: usize) {
        while let Some(next) = self.slots[idx].next {
            if self.slots[next].entry.weight <= self.slots[idx].entry.weight {
                break;
            }
            self.swap_with_prev(next);
        }
    }

    /// Exchange `idx` with its predecessor: `a, p, idx, b` becomes `a, idx, p, b`.
    fn swap_with_prev(&mut self, idx: usize) {
        let Some(prev) = self.slots[idx].prev else {
            return;
        };
        let before = self.slots[prev].prev;
        let after = self.slots[idx].next;

        match before {
            Some(b) => self.slots[b].next = Some(idx),
            None => self.head = Some(idx),
        }
        self.slots[idx].prev = before;
        self.slots[idx].next = Some(prev);
        self.slots[prev].prev = Some(idx);
        self.slots[prev].next = after;
        match after {
            Some(a) => self.slots[a].prev = Some(prev),
            None => self.tail = Some(prev),
        }
    }
}

/// Head-to-tail iterator over a [`PriorityList`].
pub struct Iter<'a> {
    list: &'a PriorityList,
    cursor: Option<usize>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a CacheEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let slot = &self.list.slots[self.cursor?];
        self.cursor = slot.next;
        Some(&slot.entry)
    }
}

impl<'a> IntoIterator for &'a PriorityList {
    type Item = &'a CacheEntry;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<CacheEntry> for PriorityList {
    fn from_iter<I: IntoIterator<Item = CacheEntry>>(iter: I) -> Self {
        let mut list = Self::new();
        for entry in iter {
            list.push_entry(entry);
        }
        list
    }
}

impl PartialEq for PriorityList {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl Eq for PriorityList {}

impl Serialize for PriorityList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for PriorityList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = Vec::<CacheEntry>::deserialize(deserializer)?;
        Ok(entries.into_iter().collect())
    }
}
