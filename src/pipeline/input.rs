//! Input lists: repositories and commit pairs
//!
//! Repository lists take one identifier per line (`owner/name` or a URL),
//! pipe tables whose first field is the repository URL, and two-field
//! lines whose first field is a file name of the form `owner_repo_*.txt`.
//! Commit lists take `owner/name | new_sha | old_sha | [pr_sha, ...]`.

use crate::error::PipelineError;
use crate::model::{CommitPair, RepoId};
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

fn is_comment(line: &str) -> bool {
    line.is_empty() || line.starts_with('#') || line.starts_with("//")
}

/// `owner_repo_whatever.txt` -> `owner/repo`.
fn repo_from_filename(field: &str) -> Option<RepoId> {
    let file = field.rsplit('/').next()?.trim();
    let stem = file.strip_suffix(".txt")?;
    let (owner, rest) = stem.split_once('_')?;
    let name = match rest.rfind('_') {
        Some(idx) => &rest[..idx],
        None => rest,
    };
    if owner.is_empty() || name.is_empty() {
        return None;
    }
    Some(RepoId::new(owner, name))
}

/// One repository from one line, or `None` for headers, separators and noise.
pub fn parse_repo_line(line: &str) -> Option<RepoId> {
    let line = line.trim();
    if is_comment(line) {
        return None;
    }
    if !line.contains('|') {
        return line.parse().ok();
    }
    let fields: Vec<&str> = line
        .trim_matches('|')
        .split('|')
        .map(str::trim)
        .collect();
    let first = fields.first().copied().unwrap_or_default();
    if first.is_empty() || first.chars().all(|c| c == '-' || c == ':') {
        return None;
    }
    if fields.len() == 2 {
        if let Some(repo) = repo_from_filename(first) {
            return Some(repo);
        }
    }
    first.parse().ok()
}

/// Every repository in `text`, deduplicated, in first-seen order.
pub fn parse_repo_list(text: &str) -> Vec<RepoId> {
    let mut seen = BTreeSet::new();
    let mut repos = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        match parse_repo_line(line) {
            Some(repo) => {
                if seen.insert(repo.clone()) {
                    repos.push(repo);
                }
            }
            None if !is_comment(line.trim()) => {
                tracing::debug!("Ignoring repository line {}: {}", lineno + 1, line.trim());
            }
            None => {}
        }
    }
    repos
}

pub fn read_repo_list(path: &Path) -> Result<Vec<RepoId>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read repository list {}", path.display()))?;
    Ok(parse_repo_list(&text))
}

fn is_sha(value: &str) -> bool {
    (7..=40).contains(&value.len()) && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// `[a, b, c]` -> shas; an empty list or an absent field is empty.
fn parse_sha_list(field: &str) -> Option<Vec<String>> {
    let inner = field.trim().strip_prefix('[')?.strip_suffix(']')?;
    let mut shas = Vec::new();
    for item in inner.split(',') {
        let item = item.trim().trim_matches(|c| c == '\'' || c == '"');
        if item.is_empty() {
            continue;
        }
        if !is_sha(item) {
            return None;
        }
        shas.push(item.to_string());
    }
    Some(shas)
}

/// Parse one commit line. `Ok(None)` for blank and comment lines.
pub fn parse_commit_line(line: &str) -> Result<Option<CommitPair>, PipelineError> {
    let line = line.trim();
    if is_comment(line) {
        return Ok(None);
    }
    let fields: Vec<&str> = line.split('|').map(str::trim).collect();
    if !(3..=4).contains(&fields.len()) {
        return Err(PipelineError::config(format!(
            "expected 'repo | new_sha | old_sha | [pr_shas]', got {} field(s)",
            fields.len()
        )));
    }
    let repo: RepoId = fields[0]
        .parse()
        .map_err(|e| PipelineError::config(format!("{}", e)))?;
    let (new_sha, old_sha) = (fields[1], fields[2]);
    for sha in [new_sha, old_sha] {
        if !is_sha(sha) {
            return Err(PipelineError::config(format!("invalid commit hash '{}'", sha)));
        }
    }
    let pr_shas = match fields.get(3) {
        Some(field) if !field.is_empty() => parse_sha_list(field).ok_or_else(|| {
            PipelineError::config(format!("invalid pull-request list '{}'", field))
        })?,
        _ => Vec::new(),
    };
    let mut pair = CommitPair::new(repo, new_sha.to_lowercase(), old_sha.to_lowercase());
    pair.pr_shas = pr_shas.into_iter().map(|s| s.to_lowercase()).collect();
    Ok(Some(pair))
}

/// Every pair in `text`. A malformed line is a configuration error.
pub fn parse_commit_list(text: &str) -> Result<Vec<CommitPair>> {
    let mut pairs = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let parsed = parse_commit_line(line)
            .with_context(|| format!("Malformed commit line {}: {}", lineno + 1, line.trim()))?;
        pairs.extend(parsed);
    }
    Ok(pairs)
}

pub fn read_commit_list(path: &Path) -> Result<Vec<CommitPair>> {
    let text = fs::read_to_string(path)
        .map_err(|e| PipelineError::config(format!("cannot read {}: {}", path.display(), e)))?;
    parse_commit_list(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_line_forms() {
        assert_eq!(parse_repo_line("fmtlib/fmt"), Some(RepoId::new("fmtlib", "fmt")));
        assert_eq!(
            parse_repo_line("https://github.com/google/benchmark"),
            Some(RepoId::new("google", "benchmark"))
        );
        assert_eq!(
            parse_repo_line("| https://github.com/a/b | 1200 | C++ |"),
            Some(RepoId::new("a", "b"))
        );
        assert_eq!(
            parse_repo_line("abseil_abseil-cpp_commits.txt | 42"),
            Some(RepoId::new("abseil", "abseil-cpp"))
        );
        assert_eq!(parse_repo_line("| Repository | Stars |"), None);
        assert_eq!(parse_repo_line("|---|---|"), None);
        assert_eq!(parse_repo_line("# comment"), None);
    }

    #[test]
    fn test_repo_list_dedupes() {
        let repos = parse_repo_list("a/b\nhttps://github.com/a/b\n\nc/d\n");
        assert_eq!(repos, vec![RepoId::new("a", "b"), RepoId::new("c", "d")]);
    }

    #[test]
    fn test_commit_line() {
        let pair = parse_commit_line("a/b | abcdef1 | 1234567 | [aaaaaaa, bbbbbbb]")
            .unwrap()
            .unwrap();
        assert_eq!(pair.repo, RepoId::new("a", "b"));
        assert_eq!(pair.new_sha, "abcdef1");
        assert_eq!(pair.old_sha, "1234567");
        assert_eq!(pair.pr_shas, vec!["aaaaaaa", "bbbbbbb"]);

        let empty = parse_commit_line("a/b | abcdef1 | 1234567 | []").unwrap().unwrap();
        assert!(empty.pr_shas.is_empty());
        let three = parse_commit_line("a/b | ABCDEF1 | 1234567").unwrap().unwrap();
        assert_eq!(three.new_sha, "abcdef1");
    }

    #[test]
    fn test_malformed_commit_lines() {
        assert!(parse_commit_line("a/b | abcdef1").is_err());
        assert!(parse_commit_line("a/b | not-a-sha | 1234567 | []").is_err());
        assert!(parse_commit_line("a/b | abcdef1 | 1234567 | [zz]").is_err());
        assert!(parse_commit_line("a/b | abcdef1 | 1234567 | aaaaaaa").is_err());
        assert!(parse_commit_list("a/b | abcdef1 | 1234567 | []\nbroken").is_err());
        assert_eq!(parse_commit_line("  # note").unwrap(), None);
    }
}
