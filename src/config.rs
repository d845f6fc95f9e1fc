//! Pipeline configuration and credentials
//!
//! Every knob has a default so a bare run works; a TOML file and CLI
//! flags layer on top (see `cli::Cli::apply_overrides`).

use crate::classifier::FilterKind;
use crate::deps::InstallMethod;
use crate::remediation::{default_rules, RemediationRule};
use crate::significance::SignificanceConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// All recognized pipeline options.
///
/// # Example
/// ```
/// use perfminer::config::PipelineConfig;
///
/// let config = PipelineConfig::default();
/// assert_eq!(config.commit_test_times, 10);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Leading measurements discarded per test
    pub warmup: usize,
    /// Retained measurements per test
    pub commit_test_times: usize,
    /// Required relative speedup `m`; comparisons use `c = 1 - m`
    pub min_exec_time_improvement: f64,
    /// Significance level (alpha)
    pub min_p_value: f64,
    /// Floor on the overall relative change while still accepting
    pub overall_decline_limit: f64,
    /// Measurements at or below this many seconds are noise
    pub noise_floor_secs: f64,

    /// Build parallelism inside one sandbox
    pub jobs: usize,
    /// Upper bound on concurrent workers
    pub max_parallel_jobs: usize,
    /// CPUs pinned to each worker
    pub cpus_per_job: usize,
    /// Explicit CPU list ("0-7,12"); defaults to the process affinity mask
    pub cpuset_cpus: Option<String>,
    pub mem_limit: Option<String>,
    pub memswap_limit: Option<String>,
    pub cpu_quota: Option<u64>,
    pub cpu_period: Option<u64>,

    /// Base C++ toolchain image
    pub base_image: String,
    /// Bind-mount target of the worker directory inside the sandbox
    pub mount_target: String,
    /// In-image staging root for sources, logs and scripts
    pub docker_test_dir: String,
    /// Host directory holding per-worker scratch space
    pub work_dir: PathBuf,

    /// Skip repositories whose tests cannot be enumerated individually
    pub no_list_testing: bool,
    /// Configure/build attempt budget
    pub max_build_attempts: usize,
    /// Per-test time budget in seconds
    pub test_timeout_secs: u64,
    /// Deadline for a single LLM call in seconds
    pub llm_timeout_secs: u64,
    /// Repository mode: commits examined per repository
    pub max_commits_per_repo: usize,

    pub filter_kind: FilterKind,
    /// Models consulted by the classifier, in cascade order
    pub models: Vec<String>,
    pub llm_base_url: String,

    pub package_manager: InstallMethod,
    pub vcpkg_root: String,

    pub dependency_cache: PathBuf,
    pub classifier_cache: PathBuf,

    /// Regenerate images that already exist
    pub force: bool,
    /// Also `docker save` committed images
    pub export_tarball: bool,

    #[serde(rename = "remediation")]
    pub remediation_rules: Vec<RemediationRule>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            warmup: 2,
            commit_test_times: 10,
            min_exec_time_improvement: 0.05,
            min_p_value: 0.05,
            overall_decline_limit: 0.0,
            noise_floor_secs: 0.005,
            jobs: 4,
            max_parallel_jobs: 4,
            cpus_per_job: 2,
            cpuset_cpus: None,
            mem_limit: Some("16g".to_string()),
            memswap_limit: Some("16g".to_string()),
            cpu_quota: None,
            cpu_period: None,
            base_image: "perfminer/cpp-base:latest".to_string(),
            mount_target: "/workspace".to_string(),
            docker_test_dir: "/test_workspace".to_string(),
            work_dir: std::env::temp_dir().join("perfminer"),
            no_list_testing: false,
            max_build_attempts: 10,
            test_timeout_secs: 600,
            llm_timeout_secs: 120,
            max_commits_per_repo: 500,
            filter_kind: FilterKind::Llm,
            models: vec!["gpt-4o-mini".to_string(), "gpt-4o".to_string()],
            llm_base_url: "https://api.openai.com/v1".to_string(),
            package_manager: InstallMethod::Apt,
            vcpkg_root: "/opt/vcpkg".to_string(),
            dependency_cache: PathBuf::from("cache/dependencies.json"),
            classifier_cache: PathBuf::from("cache/classifier.json"),
            force: false,
            export_tarball: false,
            remediation_rules: default_rules(),
        }
    }
}

impl PipelineConfig {
    /// Load from a TOML file; absent keys keep their defaults.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read config file: {}", path.as_ref().display())
        })?;
        toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")
    }

    /// The significance thresholds handed to the statistics engine.
    pub fn significance(&self) -> SignificanceConfig {
        SignificanceConfig {
            significance_level: self.min_p_value,
            min_improvement: self.min_exec_time_improvement,
            overall_decline_limit: self.overall_decline_limit,
            noise_floor_secs: self.noise_floor_secs,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !(self.min_p_value > 0.0 && self.min_p_value <= 1.0) {
            return Err(format!(
                "min_p_value must be in (0, 1], got {}",
                self.min_p_value
            ));
        }
        if !(0.0..1.0).contains(&self.min_exec_time_improvement) {
            return Err(format!(
                "min_exec_time_improvement must be in [0, 1), got {}",
                self.min_exec_time_improvement
            ));
        }
        if self.commit_test_times < 1 {
            return Err("commit_test_times must be >= 1".to_string());
        }
        if self.cpus_per_job < 1 {
            return Err("cpus_per_job must be >= 1".to_string());
        }
        if self.max_parallel_jobs < 1 {
            return Err("max_parallel_jobs must be >= 1".to_string());
        }
        if self.jobs < 1 {
            return Err("jobs must be >= 1".to_string());
        }
        if self.max_build_attempts < 1 {
            return Err("max_build_attempts must be >= 1".to_string());
        }
        if self.docker_test_dir.trim_end_matches('/') == self.mount_target.trim_end_matches('/') {
            return Err(format!(
                "docker_test_dir must differ from the mount target ({})",
                self.mount_target
            ));
        }
        if !self.docker_test_dir.starts_with('/') || !self.mount_target.starts_with('/') {
            return Err("docker_test_dir and mount_target must be absolute paths".to_string());
        }
        if self.models.is_empty() && self.filter_kind != FilterKind::Keyword {
            return Err("at least one model is required for LLM filtering".to_string());
        }
        Ok(())
    }
}

/// Credentials read from the environment.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub github_token: String,
    pub llm_api_key: Option<String>,
    pub llm_base_url: Option<String>,
    pub dockerhub_user: Option<String>,
    pub dockerhub_repo: Option<String>,
}

impl Credentials {
    /// Read credentials; the LLM key is only required when an LLM filter runs.
    pub fn from_env(filter_kind: FilterKind) -> Result<Self, String> {
        let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        let github_token = non_empty("GITHUB_ACCESS_TOKEN")
            .ok_or_else(|| "GITHUB_ACCESS_TOKEN is not set".to_string())?;
        let llm_api_key = non_empty("LLM_API_KEY");
        if llm_api_key.is_none() && filter_kind != FilterKind::Keyword {
            return Err(format!(
                "LLM_API_KEY is required for the '{}' filter",
                filter_kind
            ));
        }

        Ok(Self {
            github_token,
            llm_api_key,
            llm_base_url: non_empty("LLM_BASE_URL"),
            dockerhub_user: non_empty("DOCKERHUB_USER"),
            dockerhub_repo: non_empty("DOCKERHUB_REPO"),
        })
    }

    /// Image repository prefix: `user/repo` when both are configured.
    pub fn image_prefix(&self) -> String {
        match (&self.dockerhub_user, &self.dockerhub_repo) {
            (Some(user), Some(repo)) => format!("{}/{}", user, repo),
            _ => "perfminer".to_string(),
        }
    }
}
