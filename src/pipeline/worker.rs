//! One commit pair, end to end
//!
//! checkout -> build metadata -> sandbox -> configure/build (both sides)
//! -> test discovery -> paired runs -> statistics -> record (+ image)
//!
//! Each worker owns its scratch directory, its container and its cpuset.
//! Failures never escape: they become a skipped or abandoned outcome.

use super::artifact::{tarball_path, test_command, ArtifactBundle, ArtifactLogs, ImagePolicy};
use super::record::{Provenance, ResultRecord, SideCommands};
use crate::buildmeta::BuildMeta;
use crate::config::PipelineConfig;
use crate::deps::{DependencyCache, DependencyResolver};
use crate::discovery::{DiscoveredTests, TestDiscovery};
use crate::error::PipelineError;
use crate::llm::ChatEndpoint;
use crate::model::{CommitInfo, CommitPair, Framework};
use crate::orchestrator::{BuildOrchestrator, BuildOutcome, BuildSettings};
use crate::remediation::FlagResolver;
use crate::runner::{PairedRun, PairedRunner, RunnerSettings, Side};
use crate::sandbox::{shell_quote, ContainerHost, Sandbox, SandboxSpec};
use crate::significance::assess_improvement;
use crate::vcs::VcsClient;
use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Collaborators shared by every worker.
pub struct WorkerEnv<'a> {
    pub config: &'a PipelineConfig,
    pub host: Arc<dyn ContainerHost>,
    pub vcs: &'a dyn VcsClient,
    pub chat: Option<&'a dyn ChatEndpoint>,
    pub flags: &'a FlagResolver,
    pub images: &'a ImagePolicy,
    /// Where exported image tarballs go, when exporting
    pub tarball_dir: Option<PathBuf>,
}

/// A classified pair ready for measurement.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub pair: CommitPair,
    pub commit: CommitInfo,
    pub provenance: Provenance,
}

#[derive(Debug, Clone)]
pub enum PairOutcome {
    /// Measured; the record says whether it was significant
    Measured(Box<ResultRecord>),
    /// Candidate-level or transient failure
    Skipped(String),
    /// Pairing invariants broken
    Abandoned(String),
}

pub struct Worker<'a> {
    env: &'a WorkerEnv<'a>,
    slot: usize,
    cpuset: Option<String>,
}

impl<'a> Worker<'a> {
    pub fn new(env: &'a WorkerEnv<'a>, slot: usize, cpuset: Option<String>) -> Self {
        Self { env, slot, cpuset }
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.env.config.work_dir.join(format!("worker-{}", self.slot))
    }

    fn container_name(&self) -> String {
        format!("perfminer-{}-w{}", std::process::id(), self.slot)
    }

    pub fn evaluate(&self, candidate: &Candidate) -> PairOutcome {
        let span = tracing::info_span!(
            "pair",
            repo = %candidate.pair.repo,
            sha = %candidate.pair.short_sha()
        );
        let _enter = span.enter();

        match self.try_evaluate(candidate) {
            Ok(record) => PairOutcome::Measured(Box::new(record)),
            Err(e) => match PipelineError::classify(&e) {
                Some(PipelineError::Assertion(_)) => {
                    tracing::error!("Abandoned {}: {:#}", candidate.pair, e);
                    PairOutcome::Abandoned(format!("{:#}", e))
                }
                _ => {
                    tracing::warn!("Skipped {}: {:#}", candidate.pair, e);
                    PairOutcome::Skipped(format!("{:#}", e))
                }
            },
        }
    }

    fn try_evaluate(&self, candidate: &Candidate) -> Result<ResultRecord> {
        let config = self.env.config;
        let pair = &candidate.pair;
        let scratch = self.scratch_dir();
        fs::create_dir_all(&scratch)
            .with_context(|| format!("Failed to create {}", scratch.display()))?;

        let new_host = scratch.join("new");
        let old_host = scratch.join("old");
        self.env.vcs.materialize(&pair.repo, &pair.new_sha, &new_host)?;
        self.env.vcs.materialize(&pair.repo, &pair.old_sha, &old_host)?;

        let meta = BuildMeta::analyze(&new_host)?;
        if !meta.has_root() {
            return Err(PipelineError::candidate("no CMakeLists.txt at the repository root").into());
        }
        if !meta.declares_tests() {
            return Err(PipelineError::candidate("the build declares no tests").into());
        }
        let framework = meta.framework().unwrap_or(Framework::GenericCtest);
        if framework == Framework::GenericCtest && config.no_list_testing {
            return Err(PipelineError::candidate("no unit-test framework to list tests with").into());
        }
        tracing::info!(
            "{}: framework {}, {} test flag(s), {} dependencies",
            pair,
            framework,
            meta.test_flags().len(),
            meta.dependencies().len()
        );

        let mut sandbox = Sandbox::start(self.env.host.clone(), self.sandbox_spec(&scratch))?;
        let workspace = format!("{}/workspace", sandbox.test_dir().trim_end_matches('/'));
        let new_src = format!("{}/new", workspace);
        let old_src = format!("{}/old", workspace);
        self.stage_sources(&sandbox, &new_src, &old_src)?;

        let mut logs = ArtifactLogs::default();
        logs.note("pair", &format!("{} new={} old={}", pair.repo, pair.new_sha, pair.old_sha));

        let cache = DependencyCache::load(&config.dependency_cache)?;
        let mut resolver = DependencyResolver::new(cache, config.package_manager)
            .with_vcpkg_root(&config.vcpkg_root);
        if let Some(chat) = self.env.chat {
            let model = config.models.first().map(String::as_str).unwrap_or_default();
            resolver = resolver.with_llm(chat, model, Duration::from_secs(config.llm_timeout_secs));
        }
        let settings = BuildSettings {
            jobs: config.jobs,
            max_attempts: config.max_build_attempts,
            package_manager: config.package_manager,
            vcpkg_root: config.vcpkg_root.clone(),
        };
        let test_flags = meta.test_flags();

        let mut build = |src: &str, side: Side, logs: &mut ArtifactLogs| -> Result<BuildOutcome> {
            let outcome = BuildOrchestrator::new(&sandbox, self.env.flags, &mut resolver, settings.clone())
                .run(src, &test_flags, meta.dependencies())?;
            logs.config.push_str(&outcome.config_log);
            logs.build.push_str(&outcome.build_log);
            logs.note(&format!("{} configure", side.label()), &outcome.config_log);
            logs.note(&format!("{} build", side.label()), &outcome.build_log);
            if outcome.success {
                return Ok(outcome);
            }
            Err(PipelineError::candidate(format!(
                "{} build failed: {}",
                side.label(),
                outcome.failure.as_deref().unwrap_or("unknown failure")
            ))
            .into())
        };
        let new_build = build(&new_src, Side::New, &mut logs)?;
        let old_build = build(&old_src, Side::Old, &mut logs)?;

        let new_ctest = ctest_dir(&new_build.build_dir, &meta);
        let old_ctest = ctest_dir(&old_build.build_dir, &meta);
        let discovery = TestDiscovery::new(&sandbox, Duration::from_secs(config.test_timeout_secs));
        let new_tests = self.discover(&discovery, framework, &new_ctest)?;
        let old_tests = self.discover(&discovery, framework, &old_ctest)?;
        tracing::info!("{}: {} test invocation(s)", pair, new_tests.len());

        let run_settings = RunnerSettings {
            warmup: config.warmup,
            repeats: config.commit_test_times,
            timeout: Duration::from_secs(config.test_timeout_secs),
        };
        let run = PairedRunner::new(&sandbox, run_settings, StdRng::from_entropy())
            .run(&new_tests, &old_tests, &new_ctest, &old_ctest)?;
        logs.test.push_str(&run.log);
        logs.note("tests", &run.log);

        let assessment = assess_improvement(&run.vectors(config.warmup), &config.significance())?;
        let report = assessment.to_report_string();
        tracing::info!("{}:\n{}", pair, report);
        logs.note("assessment", &report);

        let new_commands = SideCommands {
            build: new_build.build_commands.clone(),
            test: test_lines(&run, &new_tests, &new_ctest, Side::New),
        };
        let old_commands = SideCommands {
            build: old_build.build_commands.clone(),
            test: test_lines(&run, &old_tests, &old_ctest, Side::Old),
        };
        let mut record = ResultRecord::new(
            pair,
            &candidate.commit,
            candidate.provenance.clone(),
            if run.generic_fallback {
                Framework::GenericCtest
            } else {
                framework
            },
            &run,
            &assessment,
            config.warmup,
            new_commands,
            old_commands,
        );

        if record.significant {
            let image = self.env.images.image_for(pair);
            record.image = Some(image.clone());
            let bundle = ArtifactBundle {
                new_build: record.new_commands.build.clone(),
                old_build: record.old_commands.build.clone(),
                new_test: record.new_commands.test.clone(),
                old_test: record.old_commands.test.clone(),
                logs,
                results_json: serde_json::to_string_pretty(&record)?,
            };
            bundle.stage(&sandbox, &scratch.join("artifact"))?;
            let tarball = self
                .env
                .tarball_dir
                .as_deref()
                .map(|dir| tarball_path(dir, pair));
            if let Some(dir) = self.env.tarball_dir.as_deref() {
                fs::create_dir_all(dir)?;
            }
            sandbox.commit(&image, tarball.as_deref())?;
            tracing::info!("{}: writes image {}", pair, image);
        }

        sandbox.stop()?;
        Ok(record)
    }

    fn sandbox_spec(&self, scratch: &Path) -> SandboxSpec {
        let config = self.env.config;
        SandboxSpec {
            image: config.base_image.clone(),
            name: self.container_name(),
            mount_host: scratch.to_path_buf(),
            mount_target: config.mount_target.clone(),
            test_dir: config.docker_test_dir.clone(),
            cpuset: self.cpuset.clone(),
            mem_limit: config.mem_limit.clone(),
            memswap_limit: config.memswap_limit.clone(),
            cpu_quota: config.cpu_quota,
            cpu_period: config.cpu_period,
        }
    }

    /// Copy both checkouts from the bind mount into the image filesystem.
    fn stage_sources(&self, sandbox: &Sandbox, new_src: &str, old_src: &str) -> Result<()> {
        let mount = sandbox.mount_target().trim_end_matches('/');
        let script = format!(
            "rm -rf {new} {old} && cp -a {mount}/new {new} && cp -a {mount}/old {old}",
            new = shell_quote(new_src),
            old = shell_quote(old_src),
            mount = shell_quote(mount),
        );
        let result = sandbox.shell(&script, None, None)?;
        if !result.success() {
            return Err(PipelineError::candidate(format!(
                "failed to stage sources: {}",
                result.stderr.trim()
            ))
            .into());
        }
        Ok(())
    }

    fn discover(
        &self,
        discovery: &TestDiscovery<'_>,
        framework: Framework,
        ctest_dir: &str,
    ) -> Result<DiscoveredTests> {
        let found = discovery.discover(framework, ctest_dir)?;
        if !found.is_empty() {
            return Ok(found);
        }
        if self.env.config.no_list_testing {
            return Err(PipelineError::candidate(format!(
                "no {} test could be listed under {}",
                framework, ctest_dir
            ))
            .into());
        }
        tracing::warn!("No {} tests listed under {}; using ctest", framework, ctest_dir);
        Ok(DiscoveredTests::generic(ctest_dir))
    }
}

/// The build directory mirror of the shallowest `enable_testing()` site.
pub fn ctest_dir(build_dir: &str, meta: &BuildMeta) -> String {
    match meta.enable_testing_dirs().into_iter().next() {
        Some(rel) if !rel.as_os_str().is_empty() => {
            format!("{}/{}", build_dir.trim_end_matches('/'), rel.to_string_lossy())
        }
        _ => build_dir.to_string(),
    }
}

/// One reproducible command line per measured test.
fn test_lines(run: &PairedRun, tests: &DiscoveredTests, ctest_dir: &str, side: Side) -> Vec<String> {
    run.measurements
        .iter()
        .map(|m| {
            let argv = match side {
                Side::New => &m.new_argv,
                Side::Old => &m.old_argv,
            };
            let workdir = tests
                .lookup(argv)
                .map(|inv| inv.workdir.as_str())
                .unwrap_or(ctest_dir);
            test_command(argv, workdir)
        })
        .collect()
}
