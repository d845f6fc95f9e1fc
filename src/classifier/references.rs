//! Issue and pull-request references in commit messages

use crate::model::RepoId;
use regex::Regex;
use std::sync::OnceLock;

/// How a number was referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RefKind {
    /// `fixes #N`, `closes owner/repo#N`, `resolves <issue url>`
    Closing,
    /// `(#N)` squash-merge suffixes, `Merge pull request #N`, PR URLs
    PullRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Reference {
    pub kind: RefKind,
    /// Other repository, when the reference is cross-repo
    pub repo: Option<RepoId>,
    pub number: u64,
}

impl Reference {
    /// Whether this points into `repo` (same-repo references have no repo).
    pub fn targets(&self, repo: &RepoId) -> bool {
        self.repo.as_ref().map_or(true, |r| r == repo)
    }
}

fn closing_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:close[sd]?|fix(?:e[sd])?|resolve[sd]?)\b:?\s+(?:(?:([\w.-]+)/([\w.-]+))?#(\d+)|https?://github\.com/([\w.-]+)/([\w.-]+)/(?:issues|pull)/(\d+))",
        )
        .expect("closing reference regex")
    })
}

fn pull_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\(#(\d+)\)|merge pull request #(\d+)|https?://github\.com/([\w.-]+)/([\w.-]+)/pull/(\d+)",
        )
        .expect("pull reference regex")
    })
}

/// All references in `message`, closing ones first, without duplicates.
pub fn parse_references(message: &str) -> Vec<Reference> {
    let mut refs = Vec::new();
    for caps in closing_re().captures_iter(message) {
        let (owner, name, number) = if caps.get(3).is_some() {
            (caps.get(1), caps.get(2), caps.get(3))
        } else {
            (caps.get(4), caps.get(5), caps.get(6))
        };
        let Some(number) = number.and_then(|n| n.as_str().parse().ok()) else {
            continue;
        };
        let repo = owner
            .zip(name)
            .map(|(o, n)| RepoId::new(o.as_str(), n.as_str()));
        refs.push(Reference {
            kind: RefKind::Closing,
            repo,
            number,
        });
    }
    for caps in pull_re().captures_iter(message) {
        let number = caps
            .get(1)
            .or_else(|| caps.get(2))
            .or_else(|| caps.get(5))
            .and_then(|n| n.as_str().parse().ok());
        let Some(number) = number else {
            continue;
        };
        let repo = caps
            .get(3)
            .zip(caps.get(4))
            .map(|(o, n)| RepoId::new(o.as_str(), n.as_str()));
        let reference = Reference {
            kind: RefKind::PullRequest,
            repo,
            number,
        };
        let already = refs
            .iter()
            .any(|r| r.number == reference.number && r.repo == reference.repo);
        if !already {
            refs.push(reference);
        }
    }
    refs
}
