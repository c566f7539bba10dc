//! Controller-specific error types.
//!
//! This module defines error types specific to the dklb controller
//! that are not covered by upstream library errors.

use crate::cache::CacheError;
use dklb_spec::SpecError;
use edgelb_client::EdgeLBError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the dklb controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// EdgeLB API error
    #[error("EdgeLB error: {0}")]
    EdgeLB(#[from] EdgeLBError),

    /// The object's annotations describe an invalid pool
    #[error("{0}")]
    Spec(#[from] SpecError),

    /// Informer cache lookup failed
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// A Service, port or Secret the pool depends on is not there (yet)
    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    /// Neither the object nor its tombstone is available
    #[error("no object or tombstone for key {0}; its last state is lost")]
    MissingTombstone(String),

    /// Queue key is not of the form namespace/name
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Pool recreation did not complete
    #[error("Pool recreation failed: {0}")]
    Recreation(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Caches did not sync before shutdown
    #[error("failed to wait for cache sync")]
    CacheSync,

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Admission webhook server failed
    #[error("Admission server error: {0}")]
    Server(#[from] std::io::Error),
}

impl ControllerError {
    /// Whether processing the same item again may succeed.
    ///
    /// Validation problems only go away when the object changes, which
    /// enqueues it anyway.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Spec(_) | Self::MissingTombstone(_) | Self::InvalidKey(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable() {
        assert!(!ControllerError::Spec(SpecError::Immutable("name")).is_retryable());
        assert!(!ControllerError::InvalidKey("a/b/c".to_string()).is_retryable());
        assert!(ControllerError::EdgeLB(EdgeLBError::unknown("boom")).is_retryable());
        assert!(ControllerError::MissingDependency("service default/web".to_string()).is_retryable());
    }
}
