//! Label to [`RuleCache`] map and its on-disk form.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::entry::CacheEntry;
use super::rule_cache::RuleCache;
use crate::error::PersistenceError;

/// All learned rules, keyed by document label.
///
/// Mutating methods take `&mut self`, so a registry shared between tasks has
/// to be wrapped in a lock by its owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheRegistry {
    labels: BTreeMap<String, RuleCache>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The label's cache, created empty on first use.
    pub fn get_or_create(&mut self, label: &str) -> &mut RuleCache {
        self.labels.entry(label.to_string()).or_insert_with(|| {
            debug!(label, "Created rule cache");
            RuleCache::new()
        })
    }

    pub fn get(&self, label: &str) -> Option<&RuleCache> {
        self.labels.get(label)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.labels.keys().map(String::as_str)
    }

    /// Total number of rules across all labels.
    pub fn rule_count(&self) -> usize {
        self.labels.values().map(RuleCache::rule_count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Merge rules from another registry.
    ///
    /// Rules already present are skipped. New ones go after every entry of
    /// greater or equal weight. Returns how many rules were added.
    pub fn absorb(&mut self, other: CacheRegistry) -> usize {
        let mut added = 0;

        for (label, cache) in other.labels {
            let target = self.get_or_create(&label);
            for field in cache.fields() {
                let Some(incoming) = cache.get(field) else {
                    continue;
                };
                let list = target.get_mut_or_default(field);
                for entry in incoming {
                    if list.contains(entry.rule()) {
                        continue;
                    }
                    list.insert_ordered(CacheEntry::new(entry.rule().clone(), entry.weight()));
                    added += 1;
                }
            }
        }

        info!(added, "Merged rule store");
        added
    }

    /// Pretty-printed JSON, as written by [`CacheRegistry::save`].
    pub fn to_json(&self) -> Result<String, PersistenceError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse the JSON form. Per-field order is taken from the arrays as given.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Write the registry to `path`, replacing any previous store atomically.
    ///
    /// The data goes to a temporary file in the same directory first, so a
    /// failed save leaves the old store untouched.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PersistenceError> {
        let path = path.as_ref();
        let json = self.to_json()?;

        let parent = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;

        let mut tmp =
            tempfile::NamedTempFile::new_in(parent).map_err(|e| PersistenceError::io(parent, e))?;
        tmp.write_all(json.as_bytes())
            .and_then(|()| tmp.write_all(b"\n"))
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| PersistenceError::io(tmp.path(), e))?;
        tmp.persist(path)
            .map_err(|e| PersistenceError::io(path, e.error))?;

        info!(
            path = %path.display(),
            labels = self.labels.len(),
            rules = self.rule_count(),
            "Saved rule store"
        );
        Ok(())
    }

    /// Read a registry written by [`CacheRegistry::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| PersistenceError::io(path, e))?;
        let registry = Self::from_json(&raw).map_err(|source| PersistenceError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        info!(
            path = %path.display(),
            labels = registry.labels.len(),
            rules = registry.rule_count(),
            "Loaded rule store"
        );
        Ok(registry)
    }

    /// Like [`CacheRegistry::load`], but a missing file yields an empty registry.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "No rule store yet, starting empty");
            return Ok(Self::new());
        }
        Self::load(path)
    }
}
