//! Readiness error types.

use thiserror::Error;

use jobqueue_cluster::ClusterError;
use jobqueue_gateway::GatewayError;

/// A failure the monitor could not absorb as "not ready yet".
///
/// Transient scheduler trouble never reaches the caller; only errors that
/// no amount of polling will fix are returned.
#[derive(Debug, Error)]
pub enum ReadinessError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}
