use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::JobId;

/// Submission options for [`Client::run`](crate::Client::run)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Refuse to create the job unless at least one worker is registered
    pub roll_call: bool,

    /// Block until the completion signal arrives or the timeout elapses
    pub blocking: bool,

    /// Blocking timeout; falls back to the configured default when unset
    pub timeout: Option<Duration>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a successful roll call before creating the job
    pub fn with_roll_call(mut self) -> Self {
        self.roll_call = true;
        self
    }

    /// Wait for completion up to `timeout`
    pub fn blocking(mut self, timeout: Duration) -> Self {
        self.blocking = true;
        self.timeout = Some(timeout);
        self
    }

    /// Wait for completion up to the configured default timeout
    pub fn blocking_default(mut self) -> Self {
        self.blocking = true;
        self
    }
}

/// How a bounded wait on the completion signal ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitOutcome {
    /// The worker signaled completion; the record is terminal
    Signaled,

    /// The wait ended without a signal; job status is unknown
    TimedOut,
}

impl WaitOutcome {
    pub fn is_signaled(&self) -> bool {
        matches!(self, Self::Signaled)
    }
}

/// Result of a submission. The id is always allocated; `wait` is only set for
/// blocking submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submitted {
    pub job_id: JobId,
    pub wait: Option<WaitOutcome>,
}
