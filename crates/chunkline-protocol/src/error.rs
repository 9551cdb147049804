//! Error taxonomy for translation jobs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can end a job or a single upstream call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    /// Cooperative abort. Surfaced as an `Aborted` event, never as a failure.
    #[error("cancelled")]
    Cancelled,
    #[error("model overloaded: {0}")]
    Overloaded(String),
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("{0}")]
    Generic(String),
}

/// Convenience result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Serializable classification carried on `Failed` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Cancelled,
    Overloaded,
    QuotaExceeded,
    MalformedResponse,
    InvalidInput,
    Storage,
    Generic,
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Overloaded(_) => ErrorKind::Overloaded,
            Self::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
            Self::MalformedResponse(_) => ErrorKind::MalformedResponse,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Generic(_) => ErrorKind::Generic,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Caller-facing text. Quota and overload get actionable wording,
    /// everything else shows its raw message.
    pub fn user_message(&self) -> String {
        match self {
            Self::Cancelled => String::new(),
            Self::Overloaded(_) => "The model is busy right now. Try again shortly.".to_owned(),
            Self::QuotaExceeded(_) => "API quota exceeded. Try again later.".to_owned(),
            Self::Generic(message) => message.clone(),
            other => other.to_string(),
        }
    }
}
