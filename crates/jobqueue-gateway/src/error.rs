//! Gateway error types.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for scheduler gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors that can occur while talking to the scheduler.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The scheduler CLI could not be started at all.
    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` did not finish within {after:?}")]
    Timeout { program: String, after: Duration },

    #[error("`{program}` exited with status {status:?}: {stderr}")]
    CommandFailed {
        program: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("i/o error talking to `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected scheduler output: {0}")]
    Parse(String),

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("scheduler rejected the request: {0}")]
    Rejected(String),
}

impl GatewayError {
    /// Whether the failure is worth another poll cycle.
    ///
    /// A missing scheduler CLI or a rejected submission will not fix
    /// itself; everything else may.
    pub fn is_transient(&self) -> bool {
        !matches!(self, GatewayError::Spawn { .. } | GatewayError::Rejected(_))
    }
}
