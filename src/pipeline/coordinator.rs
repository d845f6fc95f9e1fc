//! Pipeline coordinator
//!
//! Classification, dedup, resume and the image policy run on the calling
//! thread. Accepted candidates go to a rayon pool with one thread per
//! cpuset; outcomes come back over a crossbeam channel and only this
//! thread writes the shared output files.

use super::artifact::ImagePolicy;
use super::output::{merge_pairs, PairLedger};
use super::record::{Provenance, ResultStore};
use super::worker::{Candidate, PairOutcome, Worker, WorkerEnv};
use crate::classifier::{build_filter, parse_references, Classifier, DecisionCache, RefKind};
use crate::config::PipelineConfig;
use crate::cpus::worker_cpusets;
use crate::error::PipelineError;
use crate::llm::ChatEndpoint;
use crate::model::{CommitInfo, CommitPair, RepoId};
use crate::remediation::FlagResolver;
use crate::sandbox::ContainerHost;
use crate::source::CommitSource;
use crate::vcs::VcsClient;
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// External systems the pipeline talks to.
pub struct Collaborators<'a> {
    pub host: Arc<dyn ContainerHost>,
    pub vcs: &'a dyn VcsClient,
    pub source: &'a dyn CommitSource,
    pub chat: Option<&'a dyn ChatEndpoint>,
}

/// Per-run counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub candidates: usize,
    pub rejected: usize,
    pub accepted: usize,
    /// A result record exists for the pair
    pub already_done: usize,
    pub image_exists: usize,
    pub measured: usize,
    pub confirmed: usize,
    pub skipped: usize,
    pub abandoned: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} candidate(s): {} rejected, {} accepted ({} done before, {} with images), \
             {} measured, {} confirmed, {} skipped, {} abandoned",
            self.candidates,
            self.rejected,
            self.accepted,
            self.already_done,
            self.image_exists,
            self.measured,
            self.confirmed,
            self.skipped,
            self.abandoned
        )
    }
}

pub struct Coordinator<'a> {
    config: PipelineConfig,
    collab: Collaborators<'a>,
    classifier: Classifier<'a>,
    flags: FlagResolver,
    images: ImagePolicy,
    ledger: PairLedger,
    store: ResultStore,
    output_dir: PathBuf,
    cpusets: Vec<String>,
    dry_run: bool,
}

impl<'a> Coordinator<'a> {
    /// Relative cache paths are resolved against `output_dir`.
    pub fn new(
        mut config: PipelineConfig,
        output_dir: &Path,
        collab: Collaborators<'a>,
        images: ImagePolicy,
    ) -> Result<Self> {
        config.validate().map_err(PipelineError::config)?;
        for path in [&mut config.dependency_cache, &mut config.classifier_cache] {
            if path.is_relative() {
                *path = output_dir.join(&*path);
            }
        }
        fs::create_dir_all(output_dir)
            .map_err(|e| PipelineError::config(format!("cannot create {}: {}", output_dir.display(), e)))?;
        fs::create_dir_all(&config.work_dir).map_err(|e| {
            PipelineError::config(format!("cannot create {}: {}", config.work_dir.display(), e))
        })?;

        let filter = build_filter(
            config.filter_kind,
            collab.chat,
            collab.source,
            &config.models,
            Duration::from_secs(config.llm_timeout_secs),
        )?;
        let classifier = Classifier::new(filter, DecisionCache::load(&config.classifier_cache)?);
        let flags = FlagResolver::new(config.remediation_rules.clone())
            .map_err(|e| PipelineError::config(format!("invalid remediation table: {:#}", e)))?;
        let cpusets = worker_cpusets(
            config.cpuset_cpus.as_deref(),
            config.cpus_per_job,
            config.max_parallel_jobs,
        )?;
        tracing::info!("{} worker(s): cpusets {:?}", cpusets.len(), cpusets);

        Ok(Self {
            ledger: PairLedger::new(output_dir.join("accepted_pairs.txt")),
            store: ResultStore::new(output_dir.join("results")),
            output_dir: output_dir.to_path_buf(),
            config,
            collab,
            classifier,
            flags,
            images,
            cpusets,
            dry_run: false,
        })
    }

    /// Classify and record accepted pairs, but measure nothing.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn cpusets(&self) -> &[String] {
        &self.cpusets
    }

    pub fn ledger(&self) -> &PairLedger {
        &self.ledger
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Walk each repository's first-parent history and evaluate every
    /// non-merge commit against its parent.
    pub fn run_repos(&mut self, repos: &[RepoId]) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut pairs = Vec::new();
        for repo in repos {
            let history = match self.collab.vcs.history(repo, self.config.max_commits_per_repo) {
                Ok(history) => history,
                Err(e) => {
                    tracing::warn!("Skipping repository {}: {:#}", repo, e);
                    continue;
                }
            };
            let before = pairs.len();
            for commit in history {
                if commit.parents.len() != 1 {
                    continue;
                }
                let pair = CommitPair::new(repo.clone(), commit.sha.clone(), commit.parents[0].clone());
                pairs.push((pair, commit));
            }
            tracing::info!("{}: {} candidate commit(s)", repo, pairs.len() - before);
        }
        let candidates = self.select(pairs, true, &mut summary)?;
        self.dispatch(candidates, &mut summary)?;
        tracing::info!("{}", summary);
        Ok(summary)
    }

    /// Evaluate explicit (repo, new, old) triples.
    pub fn run_commits(&mut self, pairs: Vec<CommitPair>) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut resolved = Vec::new();
        for pair in merge_pairs(Vec::new(), &pairs) {
            match self.collab.vcs.commit_info(&pair.repo, &pair.new_sha) {
                Ok(commit) => resolved.push((pair, commit)),
                Err(e) => {
                    summary.candidates += 1;
                    summary.skipped += 1;
                    tracing::warn!("Skipping {}: {:#}", pair, e);
                }
            }
        }
        let candidates = self.select(resolved, false, &mut summary)?;
        self.dispatch(candidates, &mut summary)?;
        tracing::info!("{}", summary);
        Ok(summary)
    }

    /// Classify, dedup and apply the image policy.
    fn select(
        &mut self,
        pairs: Vec<(CommitPair, CommitInfo)>,
        refine: bool,
        summary: &mut RunSummary,
    ) -> Result<Vec<Candidate>> {
        let mut accepted_pairs = Vec::new();
        let mut candidates = Vec::new();
        for (pair, commit) in pairs {
            summary.candidates += 1;
            match self.classifier.classify(&pair.repo, &commit) {
                Ok(true) => {}
                Ok(false) => {
                    summary.rejected += 1;
                    continue;
                }
                Err(e) => {
                    if PipelineError::classify(&e).is_some_and(PipelineError::is_fatal) {
                        return Err(e);
                    }
                    tracing::warn!("Could not classify {}: {:#}", pair, e);
                    summary.skipped += 1;
                    continue;
                }
            }
            summary.accepted += 1;
            let pair = if refine && pair.pr_shas.is_empty() {
                self.refine_with_pull_request(pair)
            } else {
                pair
            };
            accepted_pairs.push(pair.clone());

            if !self.config.force && self.store.contains(&pair)? {
                tracing::info!("{}: already evaluated", pair);
                summary.already_done += 1;
                continue;
            }
            if let Some(reason) = self.images.skip_reason(&pair)? {
                tracing::info!("{}: {}", pair, reason);
                summary.image_exists += 1;
                continue;
            }
            candidates.push(Candidate {
                provenance: self.provenance(&commit),
                pair,
                commit,
            });
        }
        if !accepted_pairs.is_empty() {
            let lines = self.ledger.append(&accepted_pairs)?;
            tracing::debug!("{} holds {} pair(s)", self.ledger.path().display(), lines);
        }
        Ok(candidates)
    }

    fn provenance(&self, commit: &CommitInfo) -> Provenance {
        let mut issues = BTreeSet::new();
        let mut pulls = BTreeSet::new();
        for reference in parse_references(&commit.message) {
            match reference.kind {
                RefKind::Closing => issues.insert(reference.number),
                RefKind::PullRequest => pulls.insert(reference.number),
            };
        }
        Provenance {
            filter_kind: self.classifier.kind().to_string(),
            models: self.classifier.model_tuple(),
            issues: issues.into_iter().collect(),
            pull_requests: pulls.into_iter().collect(),
        }
    }

    /// When the commit is the merge result of a pull request, pair it with
    /// the merge-base of the PR and carry the PR's commits along.
    fn refine_with_pull_request(&self, mut pair: CommitPair) -> CommitPair {
        let pulls = match self.collab.source.pulls_for_commit(&pair.repo, &pair.new_sha) {
            Ok(pulls) => pulls,
            Err(e) => {
                tracing::debug!("No pull-request lookup for {}: {:#}", pair, e);
                return pair;
            }
        };
        let Some(pr) = pulls
            .into_iter()
            .find(|p| p.merged && p.merge_commit_sha.as_deref() == Some(pair.new_sha.as_str()))
        else {
            return pair;
        };
        match self.collab.vcs.merge_base(&pair.repo, &pr.head_sha, &pr.base_sha) {
            Ok(Some(base)) => pair.old_sha = base,
            Ok(None) => return pair,
            Err(e) => {
                tracing::debug!("No merge-base for #{} of {}: {:#}", pr.number, pair.repo, e);
                return pair;
            }
        }
        pair.pr_shas = self
            .collab
            .source
            .pull_request_commits(&pair.repo, pr.number)
            .unwrap_or_default();
        tracing::info!("{}: paired with merge-base {} of #{}", pair, pair.old_sha, pr.number);
        pair
    }

    fn progress_bar(len: usize) -> ProgressBar {
        let bar = ProgressBar::new(len as u64);
        if let Ok(style) =
            ProgressStyle::with_template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
        {
            bar.set_style(style);
        }
        bar
    }

    fn dispatch(&self, candidates: Vec<Candidate>, summary: &mut RunSummary) -> Result<()> {
        if candidates.is_empty() {
            return Ok(());
        }
        if self.dry_run {
            for candidate in &candidates {
                tracing::info!("Dry run: would evaluate {}", candidate.pair);
            }
            return Ok(());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.cpusets.len())
            .thread_name(|i| format!("perfminer-worker-{}", i))
            .build()
            .context("Failed to build worker pool")?;
        let env = WorkerEnv {
            config: &self.config,
            host: self.collab.host.clone(),
            vcs: self.collab.vcs,
            chat: self.collab.chat,
            flags: &self.flags,
            images: &self.images,
            tarball_dir: self
                .config
                .export_tarball
                .then(|| self.output_dir.join("images")),
        };
        let progress = Self::progress_bar(candidates.len());
        let (tx, rx) = crossbeam::channel::unbounded::<(CommitPair, PairOutcome)>();
        let cpusets = &self.cpusets;
        let env = &env;
        let pool = &pool;

        std::thread::scope(|threads| {
            threads.spawn(move || {
                pool.scope(|s| {
                    for candidate in candidates {
                        let tx = tx.clone();
                        s.spawn(move |_| {
                            let slot = rayon::current_thread_index().unwrap_or(0);
                            let worker = Worker::new(env, slot, cpusets.get(slot).cloned());
                            let outcome = worker.evaluate(&candidate);
                            if tx.send((candidate.pair, outcome)).is_err() {
                                tracing::error!("Coordinator stopped listening");
                            }
                        });
                    }
                });
            });

            for (pair, outcome) in rx.iter() {
                self.handle(&pair, outcome, summary);
                progress.set_message(pair.to_string());
                progress.inc(1);
            }
        });
        progress.finish_with_message("done");
        Ok(())
    }

    fn handle(&self, pair: &CommitPair, outcome: PairOutcome, summary: &mut RunSummary) {
        match outcome {
            PairOutcome::Measured(record) => {
                summary.measured += 1;
                if record.significant {
                    summary.confirmed += 1;
                }
                tracing::info!(
                    "{}: {} (aggregate p={:.3e}, change {:+.1}%)",
                    pair,
                    if record.significant {
                        "confirmed improvement"
                    } else {
                        "no significant improvement"
                    },
                    record.aggregate.paired_p,
                    record.overall_change * 100.0
                );
                if let Err(e) = self.store.upsert(&record) {
                    tracing::error!("Could not persist result for {}: {:#}", pair, e);
                }
            }
            PairOutcome::Skipped(reason) => {
                summary.skipped += 1;
                tracing::info!("{}: skipped ({})", pair, reason);
            }
            PairOutcome::Abandoned(reason) => {
                summary.abandoned += 1;
                tracing::info!("{}: abandoned ({})", pair, reason);
            }
        }
    }
}
