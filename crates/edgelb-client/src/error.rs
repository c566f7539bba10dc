//! EdgeLB client errors

use thiserror::Error;

/// Boxed underlying cause of an [`EdgeLBError::Unknown`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur when interacting with the EdgeLB API.
///
/// Callers only ever need to tell "the pool is not there" apart from
/// everything else, so the error space is deliberately narrow.
#[derive(Debug, Error)]
pub enum EdgeLBError {
    /// The requested pool (or its metadata) does not exist yet
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other failure: transport, unexpected status, undecodable body
    #[error("EdgeLB error: {0}")]
    Unknown(#[source] BoxError),
}

impl EdgeLBError {
    /// Build an `Unknown` error from a plain message.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown(message.into().into())
    }

    /// Whether this error means the pool does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<reqwest::Error> for EdgeLBError {
    fn from(err: reqwest::Error) -> Self {
        Self::Unknown(Box::new(err))
    }
}

impl From<serde_json::Error> for EdgeLBError {
    fn from(err: serde_json::Error) -> Self {
        Self::Unknown(Box::new(err))
    }
}
