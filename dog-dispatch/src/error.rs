use thiserror::Error;

use crate::JobId;

/// Result type for dispatch operations
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Protocol and infrastructure errors.
///
/// Failures of the user-supplied work callback are not listed here: they are
/// recorded on the job as status `error` (see [`WorkError`]).
#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    #[error("Roll call failed for function '{function}': {reason}")]
    RollCallFailed { function: String, reason: String },

    #[error("Job creation failed for function '{function}': {reason}")]
    JobCreationFailed { function: String, reason: String },

    #[error("No worker presence counter for function '{0}'")]
    PresenceMissing(String),

    #[error("Worker presence counter for function '{function}' holds invalid value '{value}'")]
    InvalidPresence { function: String, value: String },

    #[error("Invalid job record at '{key}': {reason}")]
    InvalidRecord { key: String, reason: String },

    #[error("Job {0} is already in a terminal state")]
    JobAlreadyTerminal(JobId),

    #[error("Invalid function name: '{0}'")]
    InvalidFunction(String),

    #[error("Function '{0}' is not accepted by this worker")]
    NotAccepted(String),

    #[error("Store error: {0}")]
    Store(String),

    /// A key holds a different kind of value than the operation expects
    #[error("Store type error: {0}")]
    WrongType(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Short stable label for logs and metrics
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::RollCallFailed { .. } => "roll_call_failed",
            Self::JobCreationFailed { .. } => "job_creation_failed",
            Self::PresenceMissing(_) => "presence_missing",
            Self::InvalidPresence { .. } => "invalid_presence",
            Self::InvalidRecord { .. } => "invalid_record",
            Self::JobAlreadyTerminal(_) => "job_already_terminal",
            Self::InvalidFunction(_) => "invalid_function",
            Self::NotAccepted(_) => "not_accepted",
            Self::Store(_) => "store",
            Self::WrongType(_) => "wrong_type",
            Self::Serialization(_) => "serialization",
            Self::Config(_) => "config",
            Self::Internal(_) => "internal",
        }
    }
}

/// Failure reported by a work callback.
///
/// The message becomes the job's `output` and its status becomes `error`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct WorkError {
    message: String,
}

impl WorkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for WorkError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for WorkError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

#[cfg(feature = "json")]
impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for DispatchError {
    fn from(err: redis::RedisError) -> Self {
        if err.code() == Some("WRONGTYPE") {
            Self::WrongType(err.to_string())
        } else {
            Self::Store(err.to_string())
        }
    }
}
