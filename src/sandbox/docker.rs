//! `ContainerHost` backed by the docker command-line client

use super::host::{ContainerHost, ContainerSpec, ContainerState, ExecOutput, SandboxError};
use crate::error::PipelineError;
use anyhow::{Context, Result};
use std::path::Path;
use std::process::{Command, Output};
use std::thread;
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Daemon hiccups worth retrying.
const TRANSIENT_MARKERS: &[&str] = &[
    "Cannot connect to the Docker daemon",
    "connection refused",
    "TLS handshake timeout",
    "i/o timeout",
    "context deadline exceeded",
    "toomanyrequests",
];

#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run `docker <args>`, retrying transient daemon errors.
    fn run(&self, args: &[String]) -> Result<Output> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let output = Command::new(&self.binary)
                .args(args)
                .output()
                .with_context(|| format!("Failed to spawn {}", self.binary))?;

            let stderr = String::from_utf8_lossy(&output.stderr);
            let transient = !output.status.success()
                && TRANSIENT_MARKERS.iter().any(|m| stderr.contains(m));
            if !transient {
                return Ok(output);
            }
            if attempt >= MAX_ATTEMPTS {
                return Err(PipelineError::transient(format!(
                    "docker {} failed after {} attempts: {}",
                    args.first().map(String::as_str).unwrap_or(""),
                    attempt,
                    stderr.trim()
                ))
                .into());
            }
            let wait = BACKOFF_BASE * 2u32.pow(attempt - 1);
            tracing::warn!("docker daemon error, retrying in {:?}: {}", wait, stderr.trim());
            thread::sleep(wait);
        }
    }

    /// Run and require a zero exit status.
    fn run_checked(&self, args: &[String]) -> Result<String> {
        let output = self.run(args)?;
        if !output.status.success() {
            return Err(SandboxError::Host {
                command: format!("{} {}", self.binary, args.join(" ")),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// `docker run` arguments for a long-running idle container.
pub fn run_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = strings(&["run", "-d", "--name", &spec.name]);
    for (host, target) in &spec.mounts {
        args.push("-v".to_string());
        args.push(format!("{}:{}:rw", host.display(), target));
    }
    if let Some(cpuset) = &spec.cpuset {
        args.push(format!("--cpuset-cpus={}", cpuset));
    }
    if let Some(mem) = &spec.mem_limit {
        args.push(format!("--memory={}", mem));
    }
    if let Some(swap) = &spec.memswap_limit {
        args.push(format!("--memory-swap={}", swap));
    }
    if let Some(quota) = spec.cpu_quota {
        args.push(format!("--cpu-quota={}", quota));
    }
    if let Some(period) = spec.cpu_period {
        args.push(format!("--cpu-period={}", period));
    }
    args.push(spec.image.clone());
    args.extend(strings(&["sleep", "infinity"]));
    args
}

impl ContainerHost for DockerCli {
    fn state(&self, name: &str) -> Result<ContainerState> {
        let output = self.run(&strings(&[
            "container",
            "inspect",
            "--format",
            "{{.State.Running}}",
            name,
        ]))?;
        if !output.status.success() {
            return Ok(ContainerState::Missing);
        }
        let running = String::from_utf8_lossy(&output.stdout).trim() == "true";
        Ok(if running {
            ContainerState::Running
        } else {
            ContainerState::Stopped
        })
    }

    fn create(&self, spec: &ContainerSpec) -> Result<()> {
        self.run_checked(&run_args(spec))
            .with_context(|| format!("Failed to start container {}", spec.name))?;
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        let output = self.run(&strings(&["rm", "-f", name]))?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() && !stderr.contains("No such container") {
            return Err(SandboxError::Host {
                command: format!("docker rm -f {}", name),
                message: stderr.trim().to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn exec(&self, name: &str, argv: &[String], workdir: &str) -> Result<ExecOutput> {
        let mut args = strings(&["exec", "-w", workdir, name]);
        args.extend(argv.iter().cloned());
        let output = self.run(&args)?;
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if stderr.contains("is not running") {
            return Err(SandboxError::NotRunning(name.to_string()).into());
        }
        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
        })
    }

    fn copy_in(&self, name: &str, host_path: &Path, container_path: &str) -> Result<()> {
        self.run_checked(&[
            "cp".to_string(),
            host_path.display().to_string(),
            format!("{}:{}", name, container_path),
        ])?;
        Ok(())
    }

    fn copy_out(&self, name: &str, container_path: &str, host_path: &Path) -> Result<()> {
        self.run_checked(&[
            "cp".to_string(),
            format!("{}:{}", name, container_path),
            host_path.display().to_string(),
        ])?;
        Ok(())
    }

    fn commit(&self, name: &str, image: &str) -> Result<()> {
        self.run_checked(&strings(&["commit", name, image]))?;
        Ok(())
    }

    fn save(&self, image: &str, tarball: &Path) -> Result<()> {
        self.run_checked(&[
            "save".to_string(),
            "-o".to_string(),
            tarball.display().to_string(),
            image.to_string(),
        ])?;
        Ok(())
    }

    fn image_exists(&self, image: &str) -> Result<bool> {
        let output = self.run(&strings(&["image", "inspect", image]))?;
        Ok(output.status.success())
    }
}
