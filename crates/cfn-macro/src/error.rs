//! failure conditions of a macro invocation
//!
//! Every variant aborts the whole invocation. Nothing in the core recovers from them; they
//! travel up with `?` until [crate::engine::Engine::process] turns them into a failure response.
use crate::value::Value;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("unknown matrix `{0}`")]
    UnknownMatrix(String),
    #[error("invalid arguments for matrix `{matrix}`: {reason}")]
    InvalidMatrixArguments { matrix: String, reason: String },
    #[error("circular dependency between actions: {}", .actions.join(", "))]
    CircularDependency { actions: Vec<String> },
    #[error("artifact `{artifact}` consumed by `{action}` is never produced")]
    MissingArtifact { artifact: String, action: String },
    #[error("unknown reference `{0}`")]
    UnknownReference(String),
}

impl Error {
    pub(crate) fn type_mismatch(expected: &'static str, found: &Value) -> Self {
        Error::TypeMismatch {
            expected,
            found: found.kind(),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidConfiguration(message.into())
    }
}
