//! Persisted classifier decisions
//!
//! Keyed by (repo, filter kind, model tuple, sha). Accepts and rejects
//! are both stored, so a decision is computed at most once per key.

use super::FilterKind;
use crate::model::RepoId;
use crate::persist::{read_json, write_json_atomic};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub fn decision_key(repo: &RepoId, kind: FilterKind, models: &str, sha: &str) -> String {
    format!("{}|{}|{}|{}", repo, kind, models, sha)
}

#[derive(Debug, Clone, Default)]
pub struct DecisionCache {
    path: Option<PathBuf>,
    entries: BTreeMap<String, bool>,
}

impl DecisionCache {
    /// Load from `path`; a missing file starts empty, malformed JSON is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let entries = read_json::<BTreeMap<String, bool>>(path)
            .with_context(|| format!("Failed to load classifier cache {}", path.display()))?
            .unwrap_or_default();
        tracing::debug!("Loaded {} classifier decisions from {}", entries.len(), path.display());
        Ok(Self {
            path: Some(path.to_path_buf()),
            entries,
        })
    }

    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<bool> {
        self.entries.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a decision and write the file (last writer wins per key).
    pub fn insert(&mut self, key: String, accepted: bool) -> Result<()> {
        self.entries.insert(key, accepted);
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut merged = read_json::<BTreeMap<String, bool>>(path)
            .ok()
            .flatten()
            .unwrap_or_default();
        merged.extend(self.entries.iter().map(|(k, v)| (k.clone(), *v)));
        write_json_atomic(path, &merged)?;
        self.entries = merged;
        Ok(())
    }
}
