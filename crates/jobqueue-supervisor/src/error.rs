//! Acquisition error types.

use std::time::Duration;

use thiserror::Error;

use jobqueue_cluster::ClusterError;
use jobqueue_core::ConfigError;
use jobqueue_gateway::GatewayError;
use jobqueue_health::ReadinessError;

/// Result type alias for acquisition.
pub type AcquireResult<T> = Result<T, AcquireError>;

/// Terminal failures of an acquisition.
///
/// Errors raised by collaborators pass through unchanged so callers see
/// the root cause.
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("cluster not ready after {waited:?} on the first attempt")]
    FirstAttemptTimedOut { waited: Duration },

    #[error("cluster not ready after all {attempts} attempts ({waited:?})")]
    AllAttemptsTimedOut { attempts: usize, waited: Duration },

    #[error("cluster acquisition cancelled")]
    Cancelled,

    #[error("no configurations to attempt")]
    NoConfigurations,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

impl AcquireError {
    /// Build the exhaustion error for `attempts` timed-out configurations.
    pub fn timed_out(attempts: usize, waited: Duration) -> Self {
        if attempts <= 1 {
            AcquireError::FirstAttemptTimedOut { waited }
        } else {
            AcquireError::AllAttemptsTimedOut { attempts, waited }
        }
    }

    /// Whether every attempt ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            AcquireError::FirstAttemptTimedOut { .. } | AcquireError::AllAttemptsTimedOut { .. }
        )
    }

    /// Whether the caller cancelled the acquisition.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AcquireError::Cancelled)
    }
}

impl From<ReadinessError> for AcquireError {
    fn from(e: ReadinessError) -> Self {
        match e {
            ReadinessError::Gateway(e) => AcquireError::Gateway(e),
            ReadinessError::Cluster(e) => AcquireError::Cluster(e),
        }
    }
}
