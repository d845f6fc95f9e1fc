//! CLI argument parsing for perfminer

use crate::classifier::FilterKind;
use crate::config::PipelineConfig;
use crate::deps::InstallMethod;
use clap::{ArgGroup, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "perfminer")]
#[command(version)]
#[command(
    about = "Mine C++ repositories for performance-improving commits and verify them with paired benchmarks",
    long_about = None
)]
#[command(group(ArgGroup::new("input").required(true).args(["repos", "commits"])))]
pub struct Cli {
    /// Repository list: one `owner/name` or URL per line
    #[arg(long, value_name = "FILE")]
    pub repos: Option<PathBuf>,

    /// Commit pairs: `owner/name | new_sha | old_sha | [pr_shas]` per line
    #[arg(long, value_name = "FILE")]
    pub commits: Option<PathBuf>,

    /// Output directory for results, ledger and caches
    #[arg(short, long, value_name = "DIR", default_value = "perfminer-out")]
    pub output: PathBuf,

    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Commit filter strategy (keyword, llm or issue)
    #[arg(long, value_name = "KIND")]
    pub filter: Option<FilterKind>,

    /// Regenerate images and results that already exist
    #[arg(long)]
    pub force: bool,

    /// Classify and record accepted pairs without building anything
    #[arg(long)]
    pub dry_run: bool,

    /// Enable debug tracing output
    #[arg(long)]
    pub debug: bool,

    /// Leading measurements discarded per test
    #[arg(long, value_name = "N")]
    pub warmup: Option<usize>,

    /// Retained measurements per test
    #[arg(long, value_name = "N")]
    pub commit_test_times: Option<usize>,

    /// Required relative speedup (0.05 = 5%)
    #[arg(long, value_name = "FRACTION")]
    pub min_exec_time_improvement: Option<f64>,

    /// Significance level
    #[arg(long, value_name = "ALPHA")]
    pub min_p_value: Option<f64>,

    /// Lowest overall relative change still accepted when tests regress
    #[arg(long, value_name = "FRACTION", allow_hyphen_values = true)]
    pub overall_decline_limit: Option<f64>,

    /// Build parallelism inside one sandbox
    #[arg(short, long, value_name = "N")]
    pub jobs: Option<usize>,

    #[arg(long, value_name = "N")]
    pub max_parallel_jobs: Option<usize>,

    #[arg(long, value_name = "N")]
    pub cpus_per_job: Option<usize>,

    /// CPUs to distribute over workers, e.g. "0-15"
    #[arg(long, value_name = "LIST")]
    pub cpuset_cpus: Option<String>,

    #[arg(long, value_name = "SIZE")]
    pub mem_limit: Option<String>,

    #[arg(long, value_name = "SIZE")]
    pub memswap_limit: Option<String>,

    #[arg(long, value_name = "MICROSECONDS")]
    pub cpu_quota: Option<u64>,

    #[arg(long, value_name = "MICROSECONDS")]
    pub cpu_period: Option<u64>,

    /// Staging root inside the image
    #[arg(long, value_name = "PATH")]
    pub docker_test_dir: Option<String>,

    /// Base toolchain image
    #[arg(long, value_name = "IMAGE")]
    pub base_image: Option<String>,

    /// Host scratch directory for worker checkouts
    #[arg(long, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// Package manager used inside the sandbox (apt or vcpkg)
    #[arg(long, value_name = "METHOD")]
    pub package_manager: Option<InstallMethod>,

    /// Skip repositories whose tests cannot be listed individually
    #[arg(long)]
    pub no_list_testing: bool,

    /// Also save committed images as tarballs under <output>/images
    #[arg(long)]
    pub export_tarball: bool,
}

impl Cli {
    /// Command-line values win over the config file.
    pub fn apply_overrides(&self, config: &mut PipelineConfig) {
        if let Some(kind) = self.filter {
            config.filter_kind = kind;
        }
        if let Some(v) = self.warmup {
            config.warmup = v;
        }
        if let Some(v) = self.commit_test_times {
            config.commit_test_times = v;
        }
        if let Some(v) = self.min_exec_time_improvement {
            config.min_exec_time_improvement = v;
        }
        if let Some(v) = self.min_p_value {
            config.min_p_value = v;
        }
        if let Some(v) = self.overall_decline_limit {
            config.overall_decline_limit = v;
        }
        if let Some(v) = self.jobs {
            config.jobs = v;
        }
        if let Some(v) = self.max_parallel_jobs {
            config.max_parallel_jobs = v;
        }
        if let Some(v) = self.cpus_per_job {
            config.cpus_per_job = v;
        }
        if let Some(v) = &self.cpuset_cpus {
            config.cpuset_cpus = Some(v.clone());
        }
        if let Some(v) = &self.mem_limit {
            config.mem_limit = Some(v.clone());
        }
        if let Some(v) = &self.memswap_limit {
            config.memswap_limit = Some(v.clone());
        }
        if let Some(v) = self.cpu_quota {
            config.cpu_quota = Some(v);
        }
        if let Some(v) = self.cpu_period {
            config.cpu_period = Some(v);
        }
        if let Some(v) = &self.docker_test_dir {
            config.docker_test_dir = v.clone();
        }
        if let Some(v) = &self.base_image {
            config.base_image = v.clone();
        }
        if let Some(v) = &self.work_dir {
            config.work_dir = v.clone();
        }
        if let Some(v) = self.package_manager {
            config.package_manager = v;
        }
        config.no_list_testing |= self.no_list_testing;
        config.export_tarball |= self.export_tarball;
        config.force |= self.force;
    }
}
