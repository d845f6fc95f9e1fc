//! Keyword strategy: no LLM, message patterns only

use super::files::passes_file_filter;
use super::{CommitFilter, FilterKind};
use crate::model::{CommitInfo, RepoId};
use anyhow::Result;
use regex::Regex;
use std::sync::OnceLock;

fn positive() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:optimi[sz](?:e|es|ed|ing|ation|ations)|speed(?:s|ed)?[- ]?up|faster|perf(?:ormance)?|latency|throughput|hot[- ]?path|fast[- ]?path|vectori[sz]e[sd]?|simd|reduce[sd]?\s+(?:allocations?|copies|copying|overhead|contention)|avoid(?:s|ed)?\s+(?:unnecessary\s+)?(?:copy|copies|allocations?|locking))\b",
        )
        .expect("performance keyword regex")
    })
}

fn negative() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*revert\b|\bperf(?:ormance)?\s+(?:regression|test)s?\b")
            .expect("negative keyword regex")
    })
}

/// Accepts commits whose message mentions a speedup.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordFilter;

impl KeywordFilter {
    pub fn matches(message: &str) -> bool {
        positive().is_match(message) && !negative().is_match(message)
    }
}

impl CommitFilter for KeywordFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::Keyword
    }

    fn model_tuple(&self) -> String {
        String::new()
    }

    fn accepts(&self, _repo: &RepoId, commit: &CommitInfo) -> Result<bool> {
        Ok(passes_file_filter(&commit.files) && Self::matches(&commit.message))
    }
}
