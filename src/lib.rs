//! perfminer - mines C++ repositories for performance-improving commits
//!
//! This library provides the pipeline that classifies candidate commits,
//! builds both sides in isolated containers, runs their unit tests in
//! paired order and accepts a speedup only when it is statistically
//! significant.

pub mod buildmeta;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod cpus;
pub mod deps;
pub mod discovery;
pub mod error;
pub mod frameworks;
pub mod llm;
pub mod model;
pub mod orchestrator;
pub mod persist;
pub mod pipeline;
pub mod remediation;
pub mod runner;
pub mod sandbox;
pub mod significance;
pub mod source;
pub mod vcs;
