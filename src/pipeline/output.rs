//! Accepted-pairs ledger
//!
//! Rewrites are sort + dedup + union: the same (repo, new, old) triple
//! appears once, and its pull-request lists are merged.

use super::input::parse_commit_line;
use crate::model::CommitPair;
use crate::persist::write_atomic;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// The four-field line a pair is written as.
pub fn format_pair(pair: &CommitPair) -> String {
    format!(
        "{} | {} | {} | [{}]",
        pair.repo,
        pair.new_sha,
        pair.old_sha,
        pair.pr_shas.join(", ")
    )
}

/// Merge `incoming` into `existing`, sorted by key, PR lists unioned.
pub fn merge_pairs(existing: Vec<CommitPair>, incoming: &[CommitPair]) -> Vec<CommitPair> {
    let mut merged: BTreeMap<(String, String, String), CommitPair> = BTreeMap::new();
    for pair in existing.into_iter().chain(incoming.iter().cloned()) {
        let key = (pair.repo.to_string(), pair.new_sha.clone(), pair.old_sha.clone());
        match merged.get_mut(&key) {
            Some(known) => {
                for sha in pair.pr_shas {
                    if !known.pr_shas.contains(&sha) {
                        known.pr_shas.push(sha);
                    }
                }
            }
            None => {
                merged.insert(key, pair);
            }
        }
    }
    merged.into_values().collect()
}

/// `accepted_pairs.txt` in the output directory.
#[derive(Debug, Clone)]
pub struct PairLedger {
    path: PathBuf,
}

impl PairLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current contents; unreadable lines are dropped with a warning.
    pub fn read(&self) -> Result<Vec<CommitPair>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()))
            }
        };
        let mut pairs = Vec::new();
        for line in text.lines() {
            match parse_commit_line(line) {
                Ok(Some(pair)) => pairs.push(pair),
                Ok(None) => {}
                Err(e) => tracing::warn!("Dropping ledger line '{}': {}", line, e),
            }
        }
        Ok(pairs)
    }

    /// Merge `pairs` into the ledger and rewrite it. Returns the line count.
    pub fn append(&self, pairs: &[CommitPair]) -> Result<usize> {
        let merged = merge_pairs(self.read()?, pairs);
        let mut body = merged.iter().map(format_pair).collect::<Vec<_>>().join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        write_atomic(&self.path, body.as_bytes())?;
        Ok(merged.len())
    }
}
