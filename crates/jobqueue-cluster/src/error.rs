//! Cluster error types.

use thiserror::Error;

use jobqueue_gateway::GatewayError;

/// Result type alias for cluster operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors that can occur while creating or driving a worker pool.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("worker pool already closed: {0}")]
    Closed(String),

    #[error("invalid scaling bounds: minimum {minimum} exceeds maximum {maximum}")]
    InvalidBounds { minimum: u32, maximum: u32 },
}

impl ClusterError {
    /// Whether retrying on the next poll cycle could help.
    pub fn is_transient(&self) -> bool {
        match self {
            ClusterError::Gateway(e) => e.is_transient(),
            ClusterError::Closed(_) | ClusterError::InvalidBounds { .. } => false,
        }
    }
}
