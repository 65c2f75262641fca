//! Error types for nodal-core.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{model}/{instance}: bad parameter: {reason}")]
    BadParameter {
        model: String,
        instance: String,
        reason: String,
    },

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("duplicate node: {0}")]
    DuplicateNode(String),

    #[error("invalid circuit: {0}")]
    InvalidCircuit(String),

    #[error("matrix error: {0}")]
    MatrixError(String),

    #[error("unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("parameter {name} expects {expected}")]
    InvalidParameterType { name: String, expected: &'static str },

    #[error("invalid options: {0}")]
    InvalidOptions(String),
}

impl Error {
    /// Shorthand for a [`Error::BadParameter`] naming the offending model and instance.
    pub fn bad_parameter(
        model: impl Into<String>,
        instance: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Error::BadParameter {
            model: model.into(),
            instance: instance.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
