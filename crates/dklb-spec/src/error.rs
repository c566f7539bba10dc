//! Specification errors
//!
//! Every variant describes a problem with what the user wrote, so none of
//! them is worth retrying until the object changes.

use thiserror::Error;

/// Errors produced while computing or checking a pool specification.
#[derive(Debug, Error)]
pub enum SpecError {
    /// An annotation value could not be parsed
    #[error("{0}")]
    Parse(String),

    /// The `dklb-config` annotation is not valid YAML for this kind
    #[error("failed to parse the dklb configuration: {0}")]
    Config(#[from] serde_yaml::Error),

    /// The resulting specification is invalid
    #[error("{0}")]
    Invalid(String),

    /// An immutable field differs from what was applied before
    #[error("the {0} of the target edgelb pool cannot be changed")]
    Immutable(&'static str),

    /// The pool record annotation is corrupt
    #[error("failed to parse the pool record: {0}")]
    Record(#[from] serde_json::Error),
}

impl SpecError {
    pub(crate) fn parse(value: &str, what: impl std::fmt::Display) -> Self {
        Self::Parse(format!("failed to parse \"{}\" as {}", value, what))
    }
}
