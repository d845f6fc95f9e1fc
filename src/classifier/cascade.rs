//! LLM cascade and issue linkage
//!
//! Stage 1 asks about the message. "yes" goes to Stage 2 (full diff),
//! "maybe" goes to Stage 1.5 (one question per file), "no" rejects.
//! The issue-linkage check accepts when a closed issue is confirmed as a
//! runtime performance problem by two model calls.

use super::files::passes_file_filter;
use super::references::{parse_references, RefKind};
use super::{CommitFilter, FilterKind};
use crate::error::PipelineError;
use crate::llm::{parse_answer, Answer, ChatEndpoint};
use crate::model::{CommitInfo, FileChange, RepoId};
use crate::source::CommitSource;
use anyhow::Result;
use std::collections::BTreeSet;
use std::time::Duration;

/// Patch text sent to the model is cut to this many bytes.
pub const DIFF_LIMIT: usize = 8 * 1024;

/// Calls per question before a timed-out endpoint gives up.
const TIMEOUT_ATTEMPTS: u32 = 2;

/// Cut `text` to at most `limit` bytes on a char boundary.
pub fn truncate_utf8(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

const ANSWER_FORMAT: &str =
    "Respond with a JSON object of the form {\"answer\": \"yes\"} where the answer is \"yes\", \"no\" or \"maybe\".";

fn message_prompt(commit: &CommitInfo) -> String {
    format!(
        "You are reviewing commits of a C++ project.\n\
         Does the following commit message indicate that the change improves runtime performance \
         (faster execution, lower latency, fewer allocations), as opposed to a bug fix, refactoring, \
         build change or documentation?\n\n\
         Commit message:\n{}\n\n{}",
        commit.message.trim(),
        ANSWER_FORMAT
    )
}

fn file_prompt(commit: &CommitInfo, file: &FileChange) -> String {
    format!(
        "Commit message:\n{}\n\n\
         Does this diff of {} improve runtime performance?\n\n```diff\n{}\n```\n\n{}",
        commit.message.trim(),
        file.path,
        truncate_utf8(file.patch.as_deref().unwrap_or(""), DIFF_LIMIT),
        ANSWER_FORMAT
    )
}

fn full_diff_prompt(commit: &CommitInfo) -> String {
    let diff: String = commit
        .files
        .iter()
        .filter_map(|f| f.patch.as_deref().map(|p| format!("--- {}\n{}\n", f.path, p)))
        .collect();
    format!(
        "Commit message:\n{}\n\n\
         Verify: does this change improve the runtime performance of the code, in a way \
         that the project's own tests could measure?\n\n```diff\n{}\n```\n\n{}",
        commit.message.trim(),
        truncate_utf8(&diff, DIFF_LIMIT),
        ANSWER_FORMAT
    )
}

fn issue_prompt(title: &str, body: &str) -> String {
    format!(
        "Is the following issue report about a runtime performance problem \
         (slowness, high CPU usage, excessive memory allocation, latency)?\n\n\
         Title: {}\n\n{}\n\n{}",
        title.trim(),
        truncate_utf8(body.trim(), DIFF_LIMIT),
        ANSWER_FORMAT
    )
}

/// Model calls shared by the cascade and the issue check.
pub struct Asker<'a> {
    chat: &'a dyn ChatEndpoint,
    models: Vec<String>,
    timeout: Duration,
}

impl<'a> Asker<'a> {
    pub fn new(chat: &'a dyn ChatEndpoint, models: Vec<String>, timeout: Duration) -> Self {
        Self {
            chat,
            models,
            timeout,
        }
    }

    /// Model for the early stages.
    pub fn primary(&self) -> &str {
        self.models.first().map(String::as_str).unwrap_or_default()
    }

    /// Model for verification; the primary one when only one is configured.
    pub fn verifier(&self) -> &str {
        self.models
            .get(1)
            .map(String::as_str)
            .unwrap_or_else(|| self.primary())
    }

    pub fn model_tuple(&self) -> String {
        self.models.join(",")
    }

    /// An unparseable answer counts as "no". A call that keeps timing out
    /// is a transient error, never a decision.
    pub fn ask(&self, model: &str, prompt: &str) -> Result<Answer> {
        for attempt in 1..=TIMEOUT_ATTEMPTS {
            let Some(reply) = self.chat.chat(model, prompt, self.timeout)? else {
                tracing::debug!("{} timed out (attempt {}/{})", model, attempt, TIMEOUT_ATTEMPTS);
                continue;
            };
            let answer = parse_answer(&reply);
            if answer.is_none() {
                tracing::debug!("No usable answer from {}; treating as no", model);
            }
            return Ok(answer.unwrap_or(Answer::No));
        }
        Err(PipelineError::transient(format!(
            "{} did not answer within {:?} after {} attempts",
            model, self.timeout, TIMEOUT_ATTEMPTS
        ))
        .into())
    }
}

/// The three-stage message / per-file / full-diff cascade.
pub struct LlmCascade<'a> {
    asker: Asker<'a>,
}

impl<'a> LlmCascade<'a> {
    pub fn new(asker: Asker<'a>) -> Self {
        Self { asker }
    }

    pub fn evaluate(&self, commit: &CommitInfo) -> Result<bool> {
        let stage1 = self.asker.ask(self.asker.primary(), &message_prompt(commit))?;
        tracing::debug!("{}: stage 1 answered {:?}", commit.sha, stage1);
        match stage1 {
            Answer::No => Ok(false),
            Answer::Yes => self.verify_full_diff(commit),
            Answer::Maybe => self.per_file(commit),
        }
    }

    /// Stage 1.5: accept on the first file the model says yes to.
    fn per_file(&self, commit: &CommitInfo) -> Result<bool> {
        for file in commit.files.iter().filter(|f| f.patch.is_some()) {
            if self.asker.ask(self.asker.primary(), &file_prompt(commit, file))? == Answer::Yes {
                tracing::debug!("{}: stage 1.5 accepted {}", commit.sha, file.path);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Stage 2.
    fn verify_full_diff(&self, commit: &CommitInfo) -> Result<bool> {
        let answer = self
            .asker
            .ask(self.asker.verifier(), &full_diff_prompt(commit))?;
        tracing::debug!("{}: stage 2 answered {:?}", commit.sha, answer);
        Ok(answer == Answer::Yes)
    }
}

/// Confirms closed issues as performance problems.
pub struct IssueLinkage<'a> {
    source: &'a dyn CommitSource,
    asker: Asker<'a>,
}

impl<'a> IssueLinkage<'a> {
    pub fn new(source: &'a dyn CommitSource, asker: Asker<'a>) -> Self {
        Self { source, asker }
    }

    /// Issues closed by the commit directly or by a pull request it references.
    pub fn closed_issues(&self, repo: &RepoId, commit: &CommitInfo) -> Result<BTreeSet<u64>> {
        let mut issues = BTreeSet::new();
        for reference in parse_references(&commit.message) {
            if !reference.targets(repo) {
                continue;
            }
            let is_pull = match reference.kind {
                RefKind::PullRequest => true,
                RefKind::Closing => match self.source.issue(repo, reference.number)? {
                    Some(issue) if issue.is_pull_request => true,
                    Some(_) => {
                        issues.insert(reference.number);
                        false
                    }
                    None => false,
                },
            };
            if is_pull {
                issues.extend(self.issues_closed_by_pull(repo, reference.number)?);
            }
        }
        Ok(issues)
    }

    fn issues_closed_by_pull(&self, repo: &RepoId, number: u64) -> Result<BTreeSet<u64>> {
        let mut issues = self.source.linked_issues(repo, number)?;
        if let Some(pr) = self.source.pull_request(repo, number)? {
            issues.extend(
                parse_references(&pr.body)
                    .into_iter()
                    .filter(|r| r.kind == RefKind::Closing && r.targets(repo))
                    .map(|r| r.number),
            );
        }
        Ok(issues)
    }

    /// True when some closed issue is confirmed by both models.
    pub fn confirms(&self, repo: &RepoId, commit: &CommitInfo) -> Result<bool> {
        for number in self.closed_issues(repo, commit)? {
            let Some(issue) = self.source.issue(repo, number)? else {
                continue;
            };
            if issue.is_pull_request {
                continue;
            }
            let prompt = issue_prompt(&issue.title, &issue.body);
            let first = self.asker.ask(self.asker.primary(), &prompt)?;
            if first != Answer::Yes {
                continue;
            }
            if self.asker.ask(self.asker.verifier(), &prompt)? == Answer::Yes {
                tracing::info!("{}: linked performance issue #{}", commit.sha, number);
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Cascade only.
pub struct LlmFilter<'a> {
    cascade: LlmCascade<'a>,
    models: String,
}

impl<'a> LlmFilter<'a> {
    pub fn new(asker: Asker<'a>) -> Self {
        let models = asker.model_tuple();
        Self {
            cascade: LlmCascade::new(asker),
            models,
        }
    }
}

impl CommitFilter for LlmFilter<'_> {
    fn kind(&self) -> FilterKind {
        FilterKind::Llm
    }

    fn model_tuple(&self) -> String {
        self.models.clone()
    }

    fn accepts(&self, _repo: &RepoId, commit: &CommitInfo) -> Result<bool> {
        if !passes_file_filter(&commit.files) {
            return Ok(false);
        }
        self.cascade.evaluate(commit)
    }
}

/// Issue linkage first, then the cascade.
pub struct IssueFilter<'a> {
    linkage: IssueLinkage<'a>,
    cascade: LlmCascade<'a>,
    models: String,
}

impl<'a> IssueFilter<'a> {
    pub fn new(source: &'a dyn CommitSource, linkage: Asker<'a>, cascade: Asker<'a>) -> Self {
        let models = linkage.model_tuple();
        Self {
            linkage: IssueLinkage::new(source, linkage),
            cascade: LlmCascade::new(cascade),
            models,
        }
    }
}

impl CommitFilter for IssueFilter<'_> {
    fn kind(&self) -> FilterKind {
        FilterKind::Issue
    }

    fn model_tuple(&self) -> String {
        self.models.clone()
    }

    fn accepts(&self, repo: &RepoId, commit: &CommitInfo) -> Result<bool> {
        if !passes_file_filter(&commit.files) {
            return Ok(false);
        }
        if self.linkage.confirms(repo, commit)? {
            return Ok(true);
        }
        self.cascade.evaluate(commit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_on_char_boundary() {
        let text = "aé".repeat(10);
        let cut = truncate_utf8(&text, 4);
        assert!(cut.len() <= 4);
        assert_eq!(cut, "aéa");
        assert_eq!(truncate_utf8("short", DIFF_LIMIT), "short");
    }
}
