//! Repository hosting API: pull requests, issues and their links
//!
//! The classifier needs issue text for the issue-linkage stage and the
//! coordinator needs the pull request a commit came from. Both go through
//! [`CommitSource`]; [`GitHubSource`] is the REST implementation with
//! rate-limit aware retries.

use crate::error::PipelineError;
use crate::model::RepoId;
use anyhow::{Context, Result};
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;

const API_ROOT: &str = "https://api.github.com";
const MAX_ATTEMPTS: u32 = 5;
const MAX_WAIT: Duration = Duration::from_secs(60);

/// An issue (or pull request viewed as an issue).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueInfo {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub is_pull_request: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestInfo {
    pub number: u64,
    pub body: String,
    pub merged: bool,
    pub head_sha: String,
    pub base_sha: String,
    pub merge_commit_sha: Option<String>,
}

pub trait CommitSource: Send + Sync {
    /// `None` when the number does not exist.
    fn issue(&self, repo: &RepoId, number: u64) -> Result<Option<IssueInfo>>;

    fn pull_request(&self, repo: &RepoId, number: u64) -> Result<Option<PullRequestInfo>>;

    /// Commits of a pull request, oldest first.
    fn pull_request_commits(&self, repo: &RepoId, number: u64) -> Result<Vec<String>>;

    /// Issue numbers linked to a pull request through its timeline.
    fn linked_issues(&self, repo: &RepoId, number: u64) -> Result<BTreeSet<u64>>;

    /// Pull requests that contain `sha`.
    fn pulls_for_commit(&self, repo: &RepoId, sha: &str) -> Result<Vec<PullRequestInfo>>;
}

#[derive(Deserialize)]
struct IssueJson {
    number: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

impl From<IssueJson> for IssueInfo {
    fn from(json: IssueJson) -> Self {
        Self {
            number: json.number,
            title: json.title,
            body: json.body.unwrap_or_default(),
            is_pull_request: json.pull_request.is_some(),
        }
    }
}

#[derive(Deserialize)]
struct RefJson {
    sha: String,
}

#[derive(Deserialize)]
struct PullJson {
    number: u64,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    merged_at: Option<String>,
    head: RefJson,
    base: RefJson,
    #[serde(default)]
    merge_commit_sha: Option<String>,
}

impl From<PullJson> for PullRequestInfo {
    fn from(json: PullJson) -> Self {
        Self {
            number: json.number,
            body: json.body.unwrap_or_default(),
            merged: json.merged_at.is_some(),
            head_sha: json.head.sha,
            base_sha: json.base.sha,
            merge_commit_sha: json.merge_commit_sha,
        }
    }
}

#[derive(Deserialize)]
struct TimelineEvent {
    #[serde(default)]
    event: String,
    #[serde(default)]
    source: Option<TimelineSource>,
}

#[derive(Deserialize)]
struct TimelineSource {
    #[serde(default)]
    issue: Option<IssueJson>,
}

/// Issue numbers from timeline events that link a non-PR issue.
fn timeline_issue_numbers(events: Vec<TimelineEvent>) -> BTreeSet<u64> {
    events
        .into_iter()
        .filter(|e| e.event == "cross-referenced" || e.event == "connected")
        .filter_map(|e| e.source?.issue)
        .filter(|issue| issue.pull_request.is_none())
        .map(|issue| issue.number)
        .collect()
}

/// GitHub REST client.
pub struct GitHubSource {
    client: Client,
    api_root: String,
}

impl GitHubSource {
    pub fn new(token: &str) -> Result<Self> {
        Self::with_api_root(token, API_ROOT)
    }

    pub fn with_api_root(token: &str, api_root: &str) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            format!("Bearer {}", token)
                .parse()
                .context("Invalid GitHub token")?,
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/vnd.github+json"),
        );
        let client = Client::builder()
            .user_agent(concat!("perfminer/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_root: api_root.trim_end_matches('/').to_string(),
        })
    }

    /// GET with retries on rate limits, 5xx and connection errors.
    /// A 404 yields `Ok(None)`.
    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let url = format!("{}{}", self.api_root, path);
        let mut last_error = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            match self.client.get(&url).send() {
                Ok(response) if response.status() == StatusCode::NOT_FOUND => return Ok(None),
                Ok(response) if response.status().is_success() => {
                    let value = response
                        .json::<T>()
                        .with_context(|| format!("Malformed response from {}", url))?;
                    return Ok(Some(value));
                }
                Ok(response) => {
                    let status = response.status();
                    match retry_wait(&response, attempt) {
                        Some(wait) => {
                            tracing::warn!(
                                "GitHub {} for {} (attempt {}/{}), waiting {:?}",
                                status,
                                path,
                                attempt,
                                MAX_ATTEMPTS,
                                wait
                            );
                            last_error = format!("HTTP {}", status);
                            std::thread::sleep(wait);
                        }
                        None => anyhow::bail!("GitHub request {} failed: HTTP {}", path, status),
                    }
                }
                Err(e) => {
                    let wait = backoff(attempt);
                    tracing::warn!("GitHub request {} failed: {} (retry in {:?})", path, e, wait);
                    last_error = e.to_string();
                    std::thread::sleep(wait);
                }
            }
        }
        Err(PipelineError::transient(format!(
            "GitHub request {} failed after {} attempts: {}",
            path, MAX_ATTEMPTS, last_error
        ))
        .into())
    }

    /// Follow `?page=N` until a short page.
    fn get_paged<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let sep = if path.contains('?') { '&' } else { '?' };
        for page in 1..=20 {
            let page_items: Vec<T> = self
                .get(&format!("{}{}per_page=100&page={}", path, sep, page))?
                .unwrap_or_default();
            let done = page_items.len() < 100;
            items.extend(page_items);
            if done {
                break;
            }
        }
        Ok(items)
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt)).min(MAX_WAIT)
}

/// How long to wait before retrying, or `None` when the status is final.
fn retry_wait(response: &Response, attempt: u32) -> Option<Duration> {
    let status = response.status();
    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    };
    let rate_limited = status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && header("x-ratelimit-remaining") == Some(0));
    if rate_limited {
        let wait = header("retry-after")
            .map(Duration::from_secs)
            .or_else(|| {
                let reset = header("x-ratelimit-reset")?;
                let now = u64::try_from(chrono::Utc::now().timestamp()).ok()?;
                Some(Duration::from_secs(reset.saturating_sub(now) + 1))
            })
            .unwrap_or_else(|| backoff(attempt));
        return Some(wait.min(MAX_WAIT));
    }
    status.is_server_error().then(|| backoff(attempt))
}

impl CommitSource for GitHubSource {
    fn issue(&self, repo: &RepoId, number: u64) -> Result<Option<IssueInfo>> {
        let json: Option<IssueJson> = self.get(&format!("/repos/{}/issues/{}", repo, number))?;
        Ok(json.map(IssueInfo::from))
    }

    fn pull_request(&self, repo: &RepoId, number: u64) -> Result<Option<PullRequestInfo>> {
        let json: Option<PullJson> = self.get(&format!("/repos/{}/pulls/{}", repo, number))?;
        Ok(json.map(PullRequestInfo::from))
    }

    fn pull_request_commits(&self, repo: &RepoId, number: u64) -> Result<Vec<String>> {
        let commits: Vec<RefJson> =
            self.get_paged(&format!("/repos/{}/pulls/{}/commits", repo, number))?;
        Ok(commits.into_iter().map(|c| c.sha).collect())
    }

    fn linked_issues(&self, repo: &RepoId, number: u64) -> Result<BTreeSet<u64>> {
        let events: Vec<TimelineEvent> =
            self.get_paged(&format!("/repos/{}/issues/{}/timeline", repo, number))?;
        Ok(timeline_issue_numbers(events))
    }

    fn pulls_for_commit(&self, repo: &RepoId, sha: &str) -> Result<Vec<PullRequestInfo>> {
        let pulls: Option<Vec<PullJson>> =
            self.get(&format!("/repos/{}/commits/{}/pulls", repo, sha))?;
        Ok(pulls
            .unwrap_or_default()
            .into_iter()
            .map(PullRequestInfo::from)
            .collect())
    }
}

/// In-memory source for unit tests.
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeSource {
        pub issues: BTreeMap<u64, IssueInfo>,
        pub pulls: BTreeMap<u64, PullRequestInfo>,
        pub pull_commits: BTreeMap<u64, Vec<String>>,
        pub timeline: BTreeMap<u64, BTreeSet<u64>>,
        pub commit_pulls: BTreeMap<String, Vec<u64>>,
        pub requests: Mutex<usize>,
    }

    impl FakeSource {
        pub fn with_issue(mut self, number: u64, title: &str, body: &str, is_pr: bool) -> Self {
            self.issues.insert(
                number,
                IssueInfo {
                    number,
                    title: title.to_string(),
                    body: body.to_string(),
                    is_pull_request: is_pr,
                },
            );
            self
        }

        fn hit(&self) {
            if let Ok(mut n) = self.requests.lock() {
                *n += 1;
            }
        }
    }

    impl CommitSource for FakeSource {
        fn issue(&self, _repo: &RepoId, number: u64) -> Result<Option<IssueInfo>> {
            self.hit();
            Ok(self.issues.get(&number).cloned())
        }

        fn pull_request(&self, _repo: &RepoId, number: u64) -> Result<Option<PullRequestInfo>> {
            self.hit();
            Ok(self.pulls.get(&number).cloned())
        }

        fn pull_request_commits(&self, _repo: &RepoId, number: u64) -> Result<Vec<String>> {
            self.hit();
            Ok(self.pull_commits.get(&number).cloned().unwrap_or_default())
        }

        fn linked_issues(&self, _repo: &RepoId, number: u64) -> Result<BTreeSet<u64>> {
            self.hit();
            Ok(self.timeline.get(&number).cloned().unwrap_or_default())
        }

        fn pulls_for_commit(&self, _repo: &RepoId, sha: &str) -> Result<Vec<PullRequestInfo>> {
            self.hit();
            Ok(self
                .commit_pulls
                .get(sha)
                .into_iter()
                .flatten()
                .filter_map(|n| self.pulls.get(n).cloned())
                .collect())
        }
    }
}
