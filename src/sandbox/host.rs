//! Container host abstraction
//!
//! The sandbox controller only needs create / exec / copy / commit / remove;
//! `DockerCli` implements them with the docker binary, tests use a fake.

use anyhow::Result;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Container-host failures the controller distinguishes.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("container {0} is not running")]
    NotRunning(String),

    #[error("`{command}` failed: {message}")]
    Host { command: String, message: String },

    #[error("`{command}` exceeded {secs}s")]
    Timeout { command: String, secs: u64 },
}

/// Raw result of a command run inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Missing,
    Running,
    /// Exists in some non-running state (created, exited, dead, ...)
    Stopped,
}

/// Everything needed to create a long-running container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub name: String,
    /// Read-write bind mounts (host, container)
    pub mounts: Vec<(PathBuf, String)>,
    pub cpuset: Option<String>,
    pub mem_limit: Option<String>,
    pub memswap_limit: Option<String>,
    pub cpu_quota: Option<u64>,
    pub cpu_period: Option<u64>,
}

pub trait ContainerHost: Send + Sync {
    fn state(&self, name: &str) -> Result<ContainerState>;

    /// Create and start a container that idles until removed.
    fn create(&self, spec: &ContainerSpec) -> Result<()>;

    /// Force-remove; removing a missing container is not an error.
    fn remove(&self, name: &str) -> Result<()>;

    fn exec(&self, name: &str, argv: &[String], workdir: &str) -> Result<ExecOutput>;

    fn copy_in(&self, name: &str, host_path: &Path, container_path: &str) -> Result<()>;

    fn copy_out(&self, name: &str, container_path: &str, host_path: &Path) -> Result<()>;

    /// Snapshot the container filesystem as `image`.
    fn commit(&self, name: &str, image: &str) -> Result<()>;

    /// Export `image` as a tarball.
    fn save(&self, image: &str, tarball: &Path) -> Result<()>;

    fn image_exists(&self, image: &str) -> Result<bool>;
}
