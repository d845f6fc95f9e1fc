//! Source checkout and commit metadata through libgit2
//!
//! Each repository is cloned once into a mirror directory. Commit
//! metadata is read from the mirror; working trees for the new and old
//! revisions are local clones of it, checked out detached.

use crate::error::PipelineError;
use crate::model::{CommitInfo, FileChange, RepoId};
use anyhow::{Context, Result};
use git2::{build::CheckoutBuilder, Delta, DiffOptions, Oid, Patch, Repository, Sort};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait VcsClient: Send + Sync {
    /// Check out `sha` of `repo` into `dest`, replacing whatever is there.
    fn materialize(&self, repo: &RepoId, sha: &str, dest: &Path) -> Result<()>;

    fn commit_info(&self, repo: &RepoId, sha: &str) -> Result<CommitInfo>;

    /// First-parent history of the default branch, newest first.
    fn history(&self, repo: &RepoId, max: usize) -> Result<Vec<CommitInfo>>;

    fn merge_base(&self, repo: &RepoId, a: &str, b: &str) -> Result<Option<String>>;
}

pub struct GitClient {
    mirror_root: PathBuf,
    /// Clone source prefix; the hosting service when unset
    remote_base: Option<String>,
    lock: Mutex<()>,
}

impl GitClient {
    pub fn new(mirror_root: impl Into<PathBuf>) -> Self {
        Self {
            mirror_root: mirror_root.into(),
            remote_base: None,
            lock: Mutex::new(()),
        }
    }

    /// Clone from `<base>/<owner>/<name>` instead of the hosting service.
    pub fn with_remote_base(mut self, base: impl Into<String>) -> Self {
        self.remote_base = Some(base.into());
        self
    }

    fn url(&self, repo: &RepoId) -> String {
        match &self.remote_base {
            Some(base) => format!("{}/{}/{}", base.trim_end_matches('/'), repo.owner, repo.name),
            None => repo.clone_url(),
        }
    }

    pub fn mirror_path(&self, repo: &RepoId) -> PathBuf {
        self.mirror_root.join(repo.slug())
    }

    /// Open the mirror, cloning it first if needed.
    pub fn mirror(&self, repo: &RepoId) -> Result<Repository> {
        let _guard = self.lock.lock().map_err(|_| anyhow::anyhow!("mirror lock poisoned"))?;
        let path = self.mirror_path(repo);
        if path.join(".git").exists() {
            return Repository::open(&path)
                .with_context(|| format!("Failed to open mirror {}", path.display()));
        }
        tracing::info!("Cloning {} into {}", repo, path.display());
        Repository::clone(&self.url(repo), &path).map_err(|e| {
            PipelineError::candidate(format!("clone of {} failed: {}", repo, e)).into()
        })
    }

    /// Make sure `sha` is present in the mirror, fetching when it is not.
    fn ensure_commit(&self, repo: &RepoId, mirror: &Repository, sha: &str) -> Result<Oid> {
        let oid = Oid::from_str(sha).with_context(|| format!("Invalid sha: {}", sha))?;
        if mirror.find_commit(oid).is_ok() {
            return Ok(oid);
        }
        let _guard = self.lock.lock().map_err(|_| anyhow::anyhow!("mirror lock poisoned"))?;
        let mut remote = mirror.find_remote("origin")?;
        tracing::debug!("Fetching {} for {}", sha, repo);
        let refspecs = ["+refs/heads/*:refs/remotes/origin/*", "+refs/tags/*:refs/tags/*"];
        if let Err(e) = remote.fetch(&refspecs, None, None) {
            tracing::warn!("Fetch of {} failed: {}", repo, e);
        }
        if mirror.find_commit(oid).is_err() {
            // Hosting services serve reachable commits by id
            remote.fetch(&[sha], None, None).map_err(|e| {
                PipelineError::candidate(format!("{} not found in {}: {}", sha, repo, e))
            })?;
        }
        mirror
            .find_commit(oid)
            .map(|c| c.id())
            .map_err(|e| PipelineError::candidate(format!("{} not in {}: {}", sha, repo, e)).into())
    }
}

fn delta_status(delta: Delta) -> &'static str {
    match delta {
        Delta::Added | Delta::Copied => "added",
        Delta::Deleted => "removed",
        Delta::Renamed => "renamed",
        _ => "modified",
    }
}

/// Metadata and per-file patches of `commit` against its first parent.
pub fn read_commit(repo: &Repository, oid: Oid) -> Result<CommitInfo> {
    let commit = repo.find_commit(oid)?;
    let tree = commit.tree()?;
    let parent_tree = match commit.parent(0) {
        Ok(parent) => Some(parent.tree()?),
        Err(_) => None,
    };
    let mut opts = DiffOptions::new();
    opts.context_lines(3);
    let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut opts))?;

    let mut files = Vec::new();
    for idx in 0..diff.deltas().len() {
        let Some(delta) = diff.get_delta(idx) else {
            continue;
        };
        let path = delta
            .new_file()
            .path()
            .or_else(|| delta.old_file().path())
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (patch, additions, deletions) = match Patch::from_diff(&diff, idx)? {
            Some(mut patch) if !delta.flags().is_binary() => {
                let (_, adds, dels) = patch.line_stats()?;
                let text = patch.to_buf()?.as_str().map(str::to_string);
                (text, adds as u32, dels as u32)
            }
            _ => (None, 0, 0),
        };
        files.push(FileChange {
            path,
            status: delta_status(delta.status()).to_string(),
            additions,
            deletions,
            patch,
        });
    }

    let timestamp = commit.author().when().seconds();
    let parents = commit.parent_ids().map(|p| p.to_string()).collect();
    let message = commit.message().unwrap_or_default().to_string();
    Ok(CommitInfo {
        sha: oid.to_string(),
        parents,
        timestamp,
        message,
        files,
    })
}

impl VcsClient for GitClient {
    fn materialize(&self, repo: &RepoId, sha: &str, dest: &Path) -> Result<()> {
        let mirror = self.mirror(repo)?;
        self.ensure_commit(repo, &mirror, sha)?;
        if dest.exists() {
            std::fs::remove_dir_all(dest)
                .with_context(|| format!("Failed to clear {}", dest.display()))?;
        }
        let mirror_path = self.mirror_path(repo);
        let tree = Repository::clone(&mirror_path.to_string_lossy(), dest)
            .with_context(|| format!("Failed to clone mirror into {}", dest.display()))?;
        let oid = Oid::from_str(sha)?;
        let commit = tree.find_commit(oid)?;
        tree.checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().force()))?;
        tree.set_head_detached(oid)?;

        // Submodules are best effort; the build loop can retry them
        match tree.submodules() {
            Ok(mut subs) => {
                for sub in subs.iter_mut() {
                    if let Err(e) = sub.update(true, None) {
                        tracing::warn!("Submodule {:?} of {} not updated: {}", sub.name(), repo, e);
                    }
                }
            }
            Err(e) => tracing::debug!("No submodules for {}: {}", repo, e),
        }
        tracing::debug!("Materialized {}@{} at {}", repo, sha, dest.display());
        Ok(())
    }

    fn commit_info(&self, repo: &RepoId, sha: &str) -> Result<CommitInfo> {
        let mirror = self.mirror(repo)?;
        let oid = self.ensure_commit(repo, &mirror, sha)?;
        read_commit(&mirror, oid)
    }

    fn history(&self, repo: &RepoId, max: usize) -> Result<Vec<CommitInfo>> {
        let mirror = self.mirror(repo)?;
        let mut walk = mirror.revwalk()?;
        walk.push_head()?;
        walk.simplify_first_parent()?;
        walk.set_sorting(Sort::TOPOLOGICAL)?;
        let mut commits = Vec::new();
        for oid in walk.take(max) {
            commits.push(read_commit(&mirror, oid?)?);
        }
        Ok(commits)
    }

    fn merge_base(&self, repo: &RepoId, a: &str, b: &str) -> Result<Option<String>> {
        let mirror = self.mirror(repo)?;
        let a = self.ensure_commit(repo, &mirror, a)?;
        let b = self.ensure_commit(repo, &mirror, b)?;
        match mirror.merge_base(a, b) {
            Ok(oid) => Ok(Some(oid.to_string())),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
