//! Isolated build/test sandbox on top of a container host

mod controller;
mod docker;
mod host;

#[cfg(test)]
pub(crate) mod fake;

pub use controller::{
    parse_real_line, shell_quote, timing_preamble, ExecResult, Sandbox, SandboxSpec,
};
pub use docker::{run_args, DockerCli};
pub use host::{ContainerHost, ContainerSpec, ContainerState, ExecOutput, SandboxError};
