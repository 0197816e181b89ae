//! Error types for the Marketplace Registry Operator

use thiserror::Error;

/// Result type for the operator
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the operator
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(String),
    /// Package datastore error
    #[error("Datastore error: {0}")]
    DatastoreError(String),
    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),
    /// Deployment scale-down wait exceeded its timeout
    #[error("timed out waiting for Deployment {0} to scale down")]
    ScaleDownTimeout(String),
    /// Finalizer error
    #[error("Finalizer error: {0}")]
    FinalizerError(Box<kube::runtime::finalizer::Error<Error>>),
}

impl From<kube::runtime::finalizer::Error<Error>> for Error {
    fn from(err: kube::runtime::finalizer::Error<Error>) -> Self {
        Error::FinalizerError(Box::new(err))
    }
}
