//! Per-worker sandbox: one container, exec with timing, copy, commit, stop

use super::host::{ContainerHost, ContainerSpec, ContainerState, ExecOutput};
use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

/// Exit codes of `timeout --signal=KILL`.
const TIMEOUT_EXIT_CODES: &[i32] = &[124, 137];

/// Sandbox creation parameters.
#[derive(Debug, Clone)]
pub struct SandboxSpec {
    pub image: String,
    pub name: String,
    /// Host directory bind-mounted read-write
    pub mount_host: PathBuf,
    /// Mount point inside the container
    pub mount_target: String,
    /// Staging root prepared for artifacts
    pub test_dir: String,
    pub cpuset: Option<String>,
    pub mem_limit: Option<String>,
    pub memswap_limit: Option<String>,
    pub cpu_quota: Option<u64>,
    pub cpu_period: Option<u64>,
}

/// Result of [`Sandbox::exec`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Seconds measured around the host call
    pub wallclock: f64,
    /// Seconds measured inside the container, when the preamble reported it
    pub reported: Option<f64>,
    pub timed_out: bool,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }

    /// stdout without the trailing `real` line added by the timing preamble.
    pub fn stdout_body(&self) -> &str {
        match self.stdout.rfind("\nreal ") {
            Some(idx) if parse_real_line(&self.stdout[idx..]).is_some() => &self.stdout[..idx],
            _ => &self.stdout,
        }
    }
}

pub struct Sandbox {
    host: Arc<dyn ContainerHost>,
    spec: SandboxSpec,
    running: bool,
    known_dirs: Mutex<BTreeSet<String>>,
}

impl Sandbox {
    /// Create (or reuse a running) container named `spec.name`.
    ///
    /// A same-named container in any non-running state is force-removed first.
    pub fn start(host: Arc<dyn ContainerHost>, spec: SandboxSpec) -> Result<Self> {
        match host.state(&spec.name)? {
            ContainerState::Running => {
                tracing::info!("Reusing running container {}", spec.name);
            }
            state => {
                if state == ContainerState::Stopped {
                    tracing::debug!("Removing stale container {}", spec.name);
                    host.remove(&spec.name)?;
                }
                host.create(&ContainerSpec {
                    image: spec.image.clone(),
                    name: spec.name.clone(),
                    mounts: vec![(spec.mount_host.clone(), spec.mount_target.clone())],
                    cpuset: spec.cpuset.clone(),
                    mem_limit: spec.mem_limit.clone(),
                    memswap_limit: spec.memswap_limit.clone(),
                    cpu_quota: spec.cpu_quota,
                    cpu_period: spec.cpu_period,
                })?;
                tracing::info!(
                    "Started container {} (cpuset {})",
                    spec.name,
                    spec.cpuset.as_deref().unwrap_or("any")
                );
            }
        }

        let sandbox = Self {
            host,
            spec,
            running: true,
            known_dirs: Mutex::new(BTreeSet::new()),
        };
        let test_dir = sandbox.spec.test_dir.clone();
        let prepared = sandbox.shell(
            &format!("mkdir -p {0}/logs {0}/workspace", shell_quote(&test_dir)),
            None,
            None,
        )?;
        if !prepared.success() {
            anyhow::bail!("Failed to prepare {}: {}", test_dir, prepared.stderr.trim());
        }
        Ok(sandbox)
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn mount_target(&self) -> &str {
        &self.spec.mount_target
    }

    pub fn test_dir(&self) -> &str {
        &self.spec.test_dir
    }

    /// Rewrite host paths under the bind mount to their container form.
    pub fn translate(&self, value: &str) -> String {
        let host_root = self.spec.mount_host.to_string_lossy();
        let host_root = host_root.trim_end_matches('/');
        if host_root.is_empty() {
            return value.to_string();
        }
        match value.strip_prefix(host_root) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => {
                format!("{}{}", self.spec.mount_target.trim_end_matches('/'), rest)
            }
            _ => value.replace(
                &format!("{}/", host_root),
                &format!("{}/", self.spec.mount_target.trim_end_matches('/')),
            ),
        }
    }

    /// Run `argv` inside the container.
    ///
    /// The command is wrapped in a shell preamble that measures elapsed
    /// nanoseconds inside the container and appends a `real XmY.YYYs` line
    /// to stdout. With a timeout the command runs under `timeout`, so a hung
    /// process is killed inside the container.
    pub fn exec(
        &self,
        argv: &[String],
        workdir: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ExecResult> {
        let command = argv
            .iter()
            .map(|a| shell_quote(&self.translate(a)))
            .collect::<Vec<_>>()
            .join(" ");
        self.run_wrapped(&command, workdir, timeout)
    }

    /// Run a shell command line inside the container.
    pub fn shell(
        &self,
        script: &str,
        workdir: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ExecResult> {
        let command = format!("bash -c {}", shell_quote(&self.translate(script)));
        self.run_wrapped(&command, workdir, timeout)
    }

    fn run_wrapped(
        &self,
        command: &str,
        workdir: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ExecResult> {
        if !self.running {
            return Err(super::SandboxError::NotRunning(self.spec.name.clone()).into());
        }
        let workdir = self.resolve_workdir(workdir)?;
        let script = timing_preamble(command, timeout);
        let argv = vec!["bash".to_string(), "-c".to_string(), script];

        let started = Instant::now();
        let output: ExecOutput = self.host.exec(&self.spec.name, &argv, &workdir)?;
        let wallclock = started.elapsed().as_secs_f64();

        let timed_out = timeout.is_some() && TIMEOUT_EXIT_CODES.contains(&output.exit_code);
        if timed_out {
            tracing::warn!(
                "Command timed out after {:?} in {}: {}",
                timeout.unwrap_or_default(),
                self.spec.name,
                command
            );
        }

        Ok(ExecResult {
            exit_code: output.exit_code,
            reported: parse_real_line(&output.stdout),
            stdout: output.stdout,
            stderr: output.stderr,
            wallclock,
            timed_out,
        })
    }

    /// Workdir translated into the container; falls back to the mount root
    /// when it does not exist there.
    fn resolve_workdir(&self, workdir: Option<&str>) -> Result<String> {
        let root = self.spec.mount_target.clone();
        let Some(requested) = workdir else {
            return Ok(root);
        };
        let translated = self.translate(requested);
        if let Ok(known) = self.known_dirs.lock() {
            if known.contains(&translated) {
                return Ok(translated);
            }
        }
        let probe = self.host.exec(
            &self.spec.name,
            &["test".to_string(), "-d".to_string(), translated.clone()],
            &root,
        )?;
        if probe.success() {
            if let Ok(mut known) = self.known_dirs.lock() {
                known.insert(translated.clone());
            }
            Ok(translated)
        } else {
            tracing::debug!("Workdir {} missing in container, using {}", translated, root);
            Ok(root)
        }
    }

    pub fn copy_in(&self, host_path: &Path, container_path: &str) -> Result<()> {
        self.host
            .copy_in(&self.spec.name, host_path, container_path)
            .with_context(|| format!("Failed to copy {} into sandbox", host_path.display()))
    }

    pub fn copy_out(&self, container_path: &str, host_path: &Path) -> Result<()> {
        self.host
            .copy_out(&self.spec.name, container_path, host_path)
            .with_context(|| format!("Failed to copy {} out of sandbox", container_path))
    }

    /// Snapshot the container as `image`; optionally export a tarball.
    pub fn commit(&self, image: &str, export: Option<&Path>) -> Result<()> {
        self.host
            .commit(&self.spec.name, image)
            .with_context(|| format!("Failed to commit image {}", image))?;
        if let Some(tarball) = export {
            self.host.save(image, tarball)?;
            tracing::info!("Exported {} to {}", image, tarball.display());
        }
        Ok(())
    }

    /// Stop and remove the container. Safe to call more than once.
    pub fn stop(&mut self) -> Result<()> {
        if !self.running {
            return Ok(());
        }
        self.running = false;
        self.host.remove(&self.spec.name)
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!("Failed to remove container {}: {}", self.spec.name, e);
        }
    }
}

/// Single-quote for bash.
pub fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Wrap `command` so elapsed time is measured inside the container.
pub fn timing_preamble(command: &str, timeout: Option<Duration>) -> String {
    let prefix = timeout
        .map(|t| format!("timeout --signal=KILL {} ", t.as_secs().max(1)))
        .unwrap_or_default();
    format!(
        "__s=$(date +%s%N); {prefix}{command}; __rc=$?; __e=$(date +%s%N); \
         __ns=$((__e - __s)); \
         printf '\\nreal %dm%d.%09ds\\n' $((__ns / 60000000000)) $(((__ns / 1000000000) % 60)) $((__ns % 1000000000)); \
         exit $__rc"
    )
}

fn real_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^real\s+(\d+)m(\d+(?:\.\d+)?)s\s*$").expect("real line regex"))
}

/// Seconds from the last `real XmY.YYYs` line.
pub fn parse_real_line(text: &str) -> Option<f64> {
    let caps = real_line().captures_iter(text).last()?;
    let minutes: f64 = caps.get(1)?.as_str().parse().ok()?;
    let seconds: f64 = caps.get(2)?.as_str().parse().ok()?;
    Some(minutes * 60.0 + seconds)
}
