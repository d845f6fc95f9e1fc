//! Core data model: repositories, commits, commit pairs, test invocations
//! and timing vectors.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Repository identity (`owner/name`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RepoId {
    pub owner: String,
    pub name: String,
}

impl RepoId {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// `owner_name`, used for per-repo file names.
    pub fn slug(&self) -> String {
        format!("{}_{}", self.owner, self.name)
    }

    /// Clone URL on the hosting service.
    pub fn clone_url(&self) -> String {
        format!("https://github.com/{}/{}.git", self.owner, self.name)
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepoId {
    type Err = anyhow::Error;

    /// Accepts `owner/name`, `https://host/owner/name` and `.git` suffixed URLs.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim().trim_end_matches('/');
        let path = match trimmed.find("://") {
            Some(idx) => {
                let rest = &trimmed[idx + 3..];
                match rest.find('/') {
                    Some(slash) => &rest[slash + 1..],
                    None => bail!("Repository URL has no path: {}", s),
                }
            }
            None => trimmed,
        };
        let path = path.strip_suffix(".git").unwrap_or(path);
        let mut parts = path.split('/').filter(|p| !p.is_empty());
        match (parts.next(), parts.next(), parts.next()) {
            (Some(owner), Some(name), None) => Ok(Self::new(owner, name)),
            _ => bail!("Invalid repository identifier: {}", s),
        }
    }
}

/// One file touched by a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    /// added, modified, removed, renamed
    pub status: String,
    pub additions: u32,
    pub deletions: u32,
    /// Unified patch text; absent for binary files.
    pub patch: Option<String>,
}

/// Commit metadata as seen by the classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub parents: Vec<String>,
    /// Author time, seconds since epoch
    pub timestamp: i64,
    pub message: String,
    pub files: Vec<FileChange>,
}

impl CommitInfo {
    /// The parent used for pairing. Merge commits pair with their first parent.
    pub fn designated_parent(&self) -> Option<&str> {
        self.parents.first().map(String::as_str)
    }

    /// First line of the commit message.
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }
}

/// A (new, old) revision pair to benchmark against each other.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommitPair {
    pub repo: RepoId,
    pub new_sha: String,
    pub old_sha: String,
    /// Linear history of the originating pull request, if any.
    #[serde(default)]
    pub pr_shas: Vec<String>,
}

impl CommitPair {
    pub fn new(repo: RepoId, new_sha: impl Into<String>, old_sha: impl Into<String>) -> Self {
        Self {
            repo,
            new_sha: new_sha.into(),
            old_sha: old_sha.into(),
            pr_shas: Vec::new(),
        }
    }

    /// Identity used for dedup: the PR list is not part of it.
    pub fn key(&self) -> (&RepoId, &str, &str) {
        (&self.repo, &self.new_sha, &self.old_sha)
    }

    pub fn short_sha(&self) -> &str {
        &self.new_sha[..self.new_sha.len().min(12)]
    }
}

impl fmt::Display for CommitPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repo, self.short_sha())
    }
}

/// Unit-test frameworks the discovery and timing parsers understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Framework {
    Gtest,
    Catch,
    Doctest,
    Boost,
    Qt,
    GenericCtest,
}

impl Framework {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gtest => "gtest",
            Self::Catch => "catch",
            Self::Doctest => "doctest",
            Self::Boost => "boost",
            Self::Qt => "qt",
            Self::GenericCtest => "generic-ctest",
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete command that runs exactly one test (or, for generic-ctest, the suite).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestInvocation {
    pub executable: String,
    pub framework: Framework,
    pub test_name: String,
    pub argv: Vec<String>,
    /// Directory the command runs in
    pub workdir: String,
}

impl TestInvocation {
    /// Key comparable across the new and old trees: executable file name plus test name.
    pub fn pairing_key(&self) -> String {
        let exe = self
            .executable
            .rsplit('/')
            .next()
            .unwrap_or(&self.executable);
        format!("{}::{}", exe, self.test_name)
    }

    /// Serialized argv, the key of the unit-test map.
    pub fn argv_key(&self) -> String {
        self.argv.join(" ")
    }
}

/// Per-test measurements: framework-reported and wall-clock seconds.
///
/// `parsed[i] == 0.0` means the framework output was not parseable and
/// `wallclock[i]` stands in for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingVector {
    pub parsed: Vec<f64>,
    pub wallclock: Vec<f64>,
}

impl TimingVector {
    pub fn with_len(len: usize) -> Self {
        Self {
            parsed: vec![0.0; len],
            wallclock: vec![0.0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.parsed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsed.is_empty()
    }

    pub fn record(&mut self, slot: usize, parsed: f64, wallclock: f64) {
        self.parsed[slot] = parsed;
        self.wallclock[slot] = wallclock;
    }

    /// Parsed time where available, wall-clock otherwise.
    pub fn effective(&self) -> Vec<f64> {
        self.parsed
            .iter()
            .zip(&self.wallclock)
            .map(|(&p, &w)| if p > 0.0 { p } else { w })
            .collect()
    }

    /// Effective times with the warmup prefix removed.
    pub fn measured(&self, warmup: usize) -> Vec<f64> {
        self.effective().into_iter().skip(warmup).collect()
    }
}
