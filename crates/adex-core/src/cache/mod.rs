//! Adaptive rule cache.
//!
//! A [`CacheRegistry`] maps document labels to [`RuleCache`]s, which map
//! field names to [`PriorityList`]s of weighted rules. A rule that works gets
//! its weight bumped and moves ahead of lighter rules, so the rules that keep
//! working are tried first.

mod entry;
mod priority;
mod registry;
mod rule_cache;

pub use entry::CacheEntry;
pub use priority::{Iter, PriorityList};
pub use registry::CacheRegistry;
pub use rule_cache::RuleCache;
