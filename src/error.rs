use std::fmt::Display;

use crate::task::TaskStatus;

/// Error taxonomy for the task lifecycle service.
///
/// `Validation` and `NotFound` surface directly to the caller at the offending
/// call site. `Pipeline` and `Timeout` are captured by the dispatcher and end
/// up on the task record instead of propagating. `Internal` covers unexpected
/// failures in the registry or dispatcher itself.
#[derive(Debug)]
pub enum ServiceError {
    Validation(String),
    NotFound(&'static str),
    NotReady { status: TaskStatus },
    Pipeline(String),
    Timeout,
    Internal(String),
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(msg) => write!(f, "validation failed: {}", msg),
            Self::NotFound(what) => write!(f, "{} not found", what),
            Self::NotReady { status } => write!(f, "not ready, current status: {}", status),
            Self::Pipeline(msg) => write!(f, "pipeline failed: {}", msg),
            Self::Timeout => write!(f, "transform timed out"),
            Self::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<std::io::Error> for ServiceError {
    fn from(error: std::io::Error) -> Self {
        Self::Internal(error.to_string())
    }
}
