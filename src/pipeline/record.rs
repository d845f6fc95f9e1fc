//! Result records and the per-repository results store

use crate::model::{CommitInfo, CommitPair, Framework, RepoId, TimingVector};
use crate::persist::{read_json, write_json_atomic};
use crate::runner::PairedRun;
use crate::significance::{
    AcceptanceCriteria, ComparisonStats, ImprovementAssessment, ImprovementVerdict,
};
use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitMeta {
    pub message: String,
    pub authored_at: Option<DateTime<Utc>>,
    pub files: Vec<String>,
    pub additions: u32,
    pub deletions: u32,
}

impl From<&CommitInfo> for CommitMeta {
    fn from(commit: &CommitInfo) -> Self {
        Self {
            message: commit.message.clone(),
            authored_at: Utc.timestamp_opt(commit.timestamp, 0).single(),
            files: commit.files.iter().map(|f| f.path.clone()).collect(),
            additions: commit.files.iter().map(|f| f.additions).sum(),
            deletions: commit.files.iter().map(|f| f.deletions).sum(),
        }
    }
}

/// One test's vectors and, unless filtered as noise, its comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestBreakdown {
    pub name: String,
    pub framework: Framework,
    pub stats: Option<ComparisonStats>,
    pub filtered: bool,
    pub new: TimingVector,
    pub old: TimingVector,
}

/// Commands that reproduce one side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SideCommands {
    pub build: Vec<String>,
    pub test: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub repo: RepoId,
    pub new_sha: String,
    pub old_sha: String,
    #[serde(default)]
    pub pr_shas: Vec<String>,
    pub recorded_at: DateTime<Utc>,
    pub commit: CommitMeta,
    pub filter_kind: String,
    pub models: String,

    pub framework: Framework,
    pub generic_fallback: bool,
    pub warmup: usize,
    pub repeats: usize,

    pub significant: bool,
    pub criteria: AcceptanceCriteria,
    pub verdict: ImprovementVerdict,
    /// Per-repeat sums across all tests: p-values, Cohen's d, CIs
    pub aggregate: ComparisonStats,
    pub overall_change: f64,
    pub aggregate_new: TimingVector,
    pub aggregate_old: TimingVector,
    pub tests: Vec<TestBreakdown>,

    pub new_commands: SideCommands,
    pub old_commands: SideCommands,
    pub issues: Vec<u64>,
    pub pull_requests: Vec<u64>,
    pub image: Option<String>,
}

/// Where a record's classification came from.
#[derive(Debug, Clone, Default)]
pub struct Provenance {
    pub filter_kind: String,
    pub models: String,
    pub issues: Vec<u64>,
    pub pull_requests: Vec<u64>,
}

impl ResultRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pair: &CommitPair,
        commit: &CommitInfo,
        provenance: Provenance,
        framework: Framework,
        run: &PairedRun,
        assessment: &ImprovementAssessment,
        warmup: usize,
        new_commands: SideCommands,
        old_commands: SideCommands,
    ) -> Self {
        let (aggregate_new, aggregate_old) = run.aggregate();
        let tests = run
            .measurements
            .iter()
            .map(|m| TestBreakdown {
                name: m.key.clone(),
                framework: m.framework,
                stats: assessment.per_test.get(&m.key).cloned(),
                filtered: assessment.filtered_tests.contains(&m.key),
                new: m.new.clone(),
                old: m.old.clone(),
            })
            .collect();
        Self {
            repo: pair.repo.clone(),
            new_sha: pair.new_sha.clone(),
            old_sha: pair.old_sha.clone(),
            pr_shas: pair.pr_shas.clone(),
            recorded_at: Utc::now(),
            commit: CommitMeta::from(commit),
            filter_kind: provenance.filter_kind,
            models: provenance.models,
            framework,
            generic_fallback: run.generic_fallback,
            warmup,
            repeats: aggregate_new.len().saturating_sub(warmup),
            significant: assessment.is_significant(),
            criteria: assessment.criteria,
            verdict: assessment.verdict.clone(),
            aggregate: assessment.aggregate.clone(),
            overall_change: assessment.overall_change,
            aggregate_new,
            aggregate_old,
            tests,
            new_commands,
            old_commands,
            issues: provenance.issues,
            pull_requests: provenance.pull_requests,
            image: None,
        }
    }

    pub fn matches(&self, pair: &CommitPair) -> bool {
        self.repo == pair.repo && self.new_sha == pair.new_sha && self.old_sha == pair.old_sha
    }
}

/// `<dir>/<owner>_<name>.json`, each a JSON array merged by `new_sha`.
#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, repo: &RepoId) -> PathBuf {
        self.dir.join(format!("{}.json", repo.slug()))
    }

    pub fn load(&self, repo: &RepoId) -> Result<Vec<ResultRecord>> {
        Ok(read_json(&self.path_for(repo))?.unwrap_or_default())
    }

    /// A record for this exact pair exists already.
    pub fn contains(&self, pair: &CommitPair) -> Result<bool> {
        Ok(self.load(&pair.repo)?.iter().any(|r| r.matches(pair)))
    }

    /// Insert or replace the record with the same `new_sha`.
    pub fn upsert(&self, record: &ResultRecord) -> Result<PathBuf> {
        let path = self.path_for(&record.repo);
        let mut records = self.load(&record.repo)?;
        records.retain(|r| r.new_sha != record.new_sha);
        records.push(record.clone());
        records.sort_by(|a, b| a.new_sha.cmp(&b.new_sha));
        write_json_atomic(&path, &records)?;
        Ok(path)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
