// Commit classification: is this commit plausibly a runtime speedup?
//
// Three interchangeable strategies share the `CommitFilter` interface:
// - keyword: message patterns, no LLM
// - llm: message / per-file / full-diff cascade
// - issue: closed-issue confirmation, then the cascade
//
// Every strategy first applies the file filter (C++ sources only, no
// tests, no vendored code). `Classifier` wraps a strategy with the
// persisted decision cache.

pub mod cache;
pub mod cascade;
pub mod files;
mod keyword;
pub mod references;

pub use cache::{decision_key, DecisionCache};
pub use cascade::{Asker, IssueFilter, IssueLinkage, LlmCascade, LlmFilter};
pub use files::passes_file_filter;
pub use keyword::KeywordFilter;
pub use references::{parse_references, RefKind, Reference};

use crate::error::PipelineError;
use crate::llm::ChatEndpoint;
use crate::model::{CommitInfo, RepoId};
use crate::source::CommitSource;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Which classification strategy runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Keyword,
    Llm,
    Issue,
}

impl FilterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Llm => "llm",
            Self::Issue => "issue",
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyword" | "simple" => Ok(Self::Keyword),
            "llm" => Ok(Self::Llm),
            "issue" => Ok(Self::Issue),
            other => Err(PipelineError::config(format!(
                "Invalid filter kind '{}' (expected keyword, llm or issue)",
                other
            ))),
        }
    }
}

/// One decision operation, several strategies.
pub trait CommitFilter: Send + Sync {
    fn kind(&self) -> FilterKind;

    /// Models consulted, part of the cache key.
    fn model_tuple(&self) -> String;

    fn accepts(&self, repo: &RepoId, commit: &CommitInfo) -> Result<bool>;
}

/// Build the strategy for `kind`. LLM strategies need a chat endpoint.
pub fn build_filter<'a>(
    kind: FilterKind,
    chat: Option<&'a dyn ChatEndpoint>,
    source: &'a dyn CommitSource,
    models: &[String],
    timeout: Duration,
) -> Result<Box<dyn CommitFilter + 'a>> {
    if kind == FilterKind::Keyword {
        return Ok(Box::new(KeywordFilter));
    }
    let chat = chat.ok_or_else(|| {
        PipelineError::config(format!("The '{}' filter needs an LLM endpoint", kind))
    })?;
    let asker = || Asker::new(chat, models.to_vec(), timeout);
    let filter: Box<dyn CommitFilter + 'a> = match kind {
        FilterKind::Issue => Box::new(IssueFilter::new(source, asker(), asker())),
        _ => Box::new(LlmFilter::new(asker())),
    };
    Ok(filter)
}

/// A strategy behind the decision cache.
pub struct Classifier<'a> {
    filter: Box<dyn CommitFilter + 'a>,
    cache: DecisionCache,
}

impl<'a> Classifier<'a> {
    pub fn new(filter: Box<dyn CommitFilter + 'a>, cache: DecisionCache) -> Self {
        Self { filter, cache }
    }

    pub fn kind(&self) -> FilterKind {
        self.filter.kind()
    }

    pub fn model_tuple(&self) -> String {
        self.filter.model_tuple()
    }

    pub fn cache(&self) -> &DecisionCache {
        &self.cache
    }

    /// Cached decision, computing and storing it on a miss.
    pub fn classify(&mut self, repo: &RepoId, commit: &CommitInfo) -> Result<bool> {
        let key = decision_key(repo, self.filter.kind(), &self.filter.model_tuple(), &commit.sha);
        if let Some(decision) = self.cache.get(&key) {
            tracing::trace!("Classifier cache hit for {}", key);
            return Ok(decision);
        }
        let accepted = self.filter.accepts(repo, commit)?;
        tracing::info!(
            "{}@{} {} by {} filter: {}",
            repo,
            &commit.sha[..commit.sha.len().min(12)],
            if accepted { "accepted" } else { "rejected" },
            self.filter.kind(),
            commit.summary()
        );
        self.cache.insert(key, accepted)?;
        Ok(accepted)
    }
}
