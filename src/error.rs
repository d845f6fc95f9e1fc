//! Error taxonomy for the commit evaluation pipeline
//!
//! Plumbing code returns `anyhow::Result`; failures the caller must
//! branch on are raised as a `PipelineError` and recovered by downcast.

use thiserror::Error;

/// Errors classified by how far they are allowed to propagate.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Invalid flags, missing credentials, malformed input. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rate limits, endpoint timeouts, container daemon hiccups.
    /// Retried with backoff; on exhaustion the candidate is skipped.
    #[error("Transient infrastructure error: {0}")]
    Transient(String),

    /// Clone failure, no build root, no tests, build budget exhausted.
    #[error("Candidate skipped: {0}")]
    Candidate(String),

    /// Broken pairing invariants (unequal invocation lists). The pair is abandoned.
    #[error("Assertion failed: {0}")]
    Assertion(String),
}

impl PipelineError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn candidate(message: impl Into<String>) -> Self {
        Self::Candidate(message.into())
    }

    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion(message.into())
    }

    /// Find the pipeline classification of an arbitrary error chain.
    pub fn classify(err: &anyhow::Error) -> Option<&PipelineError> {
        err.chain().find_map(|cause| cause.downcast_ref::<PipelineError>())
    }

    /// Whether this error must terminate the whole process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
