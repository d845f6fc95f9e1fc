// Iterative configure/build loop
//
// CONFIGURE -> BUILD -> DONE, with failures routed through DIAGNOSE:
// - new missing dependencies: resolve (cache, then LLM) and install
// - new flag remediations from the remediation table
// - nothing new and build-metadata dependencies not tried yet: seed from them
// - otherwise: fail
//
// The loop reaches a fixed point because every diagnosis only grows the
// cumulative sets; an iteration that adds nothing ends it.

use crate::buildmeta::flag_value;
use crate::deps::{find_missing, DependencyResolver, InstallMethod};
use crate::remediation::{FlagResolver, Remediations};
use crate::sandbox::{ExecResult, Sandbox};
use anyhow::Result;
use std::collections::BTreeSet;

pub const BUILD_DIR: &str = "build";

/// Knobs of the retry loop.
#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub jobs: usize,
    pub max_attempts: usize,
    pub package_manager: InstallMethod,
    pub vcpkg_root: String,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            jobs: 4,
            max_attempts: 10,
            package_manager: InstallMethod::Apt,
            vcpkg_root: "/opt/vcpkg".to_string(),
        }
    }
}

/// Live state of the retry loop.
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    /// `-D<flag>=ON|OFF` from the test-enabling options
    pub configure_flags: Vec<String>,
    pub remediations: Remediations,
    /// Extra configure flags contributed by dependency mappings
    pub dependency_flags: BTreeSet<String>,
    pub test_flags: BTreeSet<String>,
    /// Every missing dependency seen so far
    pub missing: BTreeSet<String>,
    /// Dependencies nothing could be installed for
    pub unresolved: BTreeSet<String>,
    /// Dependencies installed successfully
    pub installed: BTreeSet<String>,
    /// Build-metadata dependencies have been tried
    pub seeded: bool,
    /// Pre-commands already executed
    pub commands_run: Vec<String>,
}

/// Result of the loop.
#[derive(Debug, Clone, Default)]
pub struct BuildOutcome {
    pub success: bool,
    pub attempts: usize,
    /// Pre-commands, configure line and build line, in execution order
    pub build_commands: Vec<String>,
    pub configure_argv: Vec<String>,
    pub build_argv: Vec<String>,
    pub build_dir: String,
    pub config_log: String,
    pub build_log: String,
    pub context: BuildContext,
    pub failure: Option<String>,
}

pub struct BuildOrchestrator<'s, 'r> {
    sandbox: &'s Sandbox,
    flags: &'s FlagResolver,
    resolver: &'s mut DependencyResolver<'r>,
    settings: BuildSettings,
}

impl<'s, 'r> BuildOrchestrator<'s, 'r> {
    pub fn new(
        sandbox: &'s Sandbox,
        flags: &'s FlagResolver,
        resolver: &'s mut DependencyResolver<'r>,
        settings: BuildSettings,
    ) -> Self {
        Self {
            sandbox,
            flags,
            resolver,
            settings,
        }
    }

    /// Base configure argv plus test flags, before remediations.
    pub fn base_configure_argv(&self, source_dir: &str, build_dir: &str) -> Vec<String> {
        vec![
            "cmake".to_string(),
            "-S".to_string(),
            source_dir.to_string(),
            "-B".to_string(),
            build_dir.to_string(),
            "-DCMAKE_BUILD_TYPE=Debug".to_string(),
            "-DCMAKE_EXPORT_COMPILE_COMMANDS=ON".to_string(),
        ]
    }

    fn configure_argv(&self, ctx: &BuildContext, source_dir: &str, build_dir: &str) -> Vec<String> {
        let mut argv = self.base_configure_argv(source_dir, build_dir);
        argv.extend(ctx.configure_flags.iter().cloned());
        argv.extend(ctx.dependency_flags.iter().cloned());
        let mut argv = ctx.remediations.apply_to(&argv);
        if self.settings.package_manager == InstallMethod::Vcpkg {
            argv.push(format!(
                "-DCMAKE_TOOLCHAIN_FILE={}/scripts/buildsystems/vcpkg.cmake",
                self.settings.vcpkg_root.trim_end_matches('/')
            ));
            argv.push("-DVCPKG_MANIFEST_MODE=OFF".to_string());
        }
        argv
    }

    fn build_argv(&self, build_dir: &str) -> Vec<String> {
        vec![
            "cmake".to_string(),
            "--build".to_string(),
            build_dir.to_string(),
            "--parallel".to_string(),
            self.settings.jobs.to_string(),
        ]
    }

    /// Drive configure and build in `source_dir` until success or the
    /// attempt budget runs out.
    pub fn run(
        &mut self,
        source_dir: &str,
        test_flags: &[String],
        meta_dependencies: &BTreeSet<String>,
    ) -> Result<BuildOutcome> {
        let build_dir = format!("{}/{}", source_dir.trim_end_matches('/'), BUILD_DIR);
        let mut ctx = BuildContext {
            configure_flags: test_flags
                .iter()
                .map(|f| format!("-D{}={}", f, flag_value(f)))
                .collect(),
            test_flags: test_flags.iter().cloned().collect(),
            ..Default::default()
        };
        let mut outcome = BuildOutcome {
            build_dir: build_dir.clone(),
            ..Default::default()
        };

        for attempt in 1..=self.settings.max_attempts {
            outcome.attempts = attempt;
            self.run_pre_commands(&mut ctx, source_dir, &mut outcome)?;

            // Stale cache entries would survive removed flags
            self.sandbox
                .shell(&format!("rm -f {}/CMakeCache.txt", build_dir), None, None)?;

            let configure = self.configure_argv(&ctx, source_dir, &build_dir);
            let result = self.sandbox.exec(&configure, Some(source_dir), None)?;
            log_step(&mut outcome.config_log, attempt, &configure, &result);
            let mut diagnostics = result.combined();

            if result.success() {
                let build = self.build_argv(&build_dir);
                let built = self.sandbox.exec(&build, Some(source_dir), None)?;
                log_step(&mut outcome.build_log, attempt, &build, &built);
                if built.success() {
                    tracing::info!("Build succeeded after {} attempt(s)", attempt);
                    outcome.success = true;
                    outcome.build_commands.extend(ctx.commands_run.iter().cloned());
                    outcome.build_commands.push(configure.join(" "));
                    outcome.build_commands.push(build.join(" "));
                    outcome.configure_argv = configure;
                    outcome.build_argv = build;
                    outcome.context = ctx;
                    return Ok(outcome);
                }
                diagnostics.push('\n');
                diagnostics.push_str(&built.combined());
            }

            if !self.diagnose(&mut ctx, &diagnostics, meta_dependencies)? {
                let reason = format!(
                    "no new remediation after attempt {} (unresolved: {:?})",
                    attempt, ctx.unresolved
                );
                tracing::warn!("Configure/build failed: {}", reason);
                outcome.failure = Some(reason);
                outcome.context = ctx;
                return Ok(outcome);
            }
        }

        outcome.failure = Some(format!(
            "attempt budget of {} exhausted",
            self.settings.max_attempts
        ));
        outcome.context = ctx;
        Ok(outcome)
    }

    fn run_pre_commands(
        &self,
        ctx: &mut BuildContext,
        source_dir: &str,
        outcome: &mut BuildOutcome,
    ) -> Result<()> {
        let pending: Vec<String> = ctx
            .remediations
            .commands
            .iter()
            .filter(|c| !ctx.commands_run.contains(c))
            .cloned()
            .collect();
        for command in pending {
            let result = self.sandbox.shell(&command, Some(source_dir), None)?;
            outcome
                .config_log
                .push_str(&format!("$ {}\n{}\n", command, result.combined()));
            if !result.success() {
                tracing::warn!("Pre-command failed (exit {}): {}", result.exit_code, command);
            }
            ctx.commands_run.push(command);
        }
        Ok(())
    }

    /// Returns true when this diagnosis added something to try.
    fn diagnose(
        &mut self,
        ctx: &mut BuildContext,
        output: &str,
        meta_dependencies: &BTreeSet<String>,
    ) -> Result<bool> {
        let new_missing: BTreeSet<String> = find_missing(output)
            .difference(&ctx.missing)
            .cloned()
            .collect();
        let remediated = self.flags.apply(output, &mut ctx.remediations);

        let mut progressed = remediated;
        if !new_missing.is_empty() {
            tracing::info!("Missing dependencies: {:?}", new_missing);
            ctx.missing.extend(new_missing.iter().cloned());
            progressed |= self.install_dependencies(ctx, &new_missing)?;
        }
        if progressed {
            return Ok(true);
        }

        if !ctx.seeded {
            ctx.seeded = true;
            let seed: BTreeSet<String> = meta_dependencies
                .difference(&ctx.missing)
                .cloned()
                .collect();
            tracing::info!("Seeding dependencies from build metadata: {:?}", seed);
            ctx.missing.extend(seed.iter().cloned());
            self.install_dependencies(ctx, &seed)?;
            return Ok(true);
        }

        Ok(false)
    }

    /// Resolve and install `names`; true when anything new was installed
    /// or a new configure flag appeared.
    fn install_dependencies(
        &mut self,
        ctx: &mut BuildContext,
        names: &BTreeSet<String>,
    ) -> Result<bool> {
        if names.is_empty() {
            return Ok(false);
        }
        let method = self.settings.package_manager;
        let (unresolved, flags) = self.resolver.resolve_all(names);
        let mut progressed = false;
        for flag in flags {
            progressed |= ctx.dependency_flags.insert(flag);
        }
        for name in names.difference(&unresolved) {
            if self.resolver.install(self.sandbox, name, method)? {
                progressed |= ctx.installed.insert(name.clone());
            } else {
                ctx.unresolved.insert(name.clone());
            }
        }
        ctx.unresolved.extend(unresolved);
        Ok(progressed)
    }
}

fn log_step(log: &mut String, attempt: usize, argv: &[String], result: &ExecResult) {
    log.push_str(&format!(
        "=== attempt {} (exit {}) ===\n$ {}\n{}\n{}\n",
        attempt,
        result.exit_code,
        argv.join(" "),
        result.stdout,
        result.stderr
    ));
}
