use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{DispatchError, DispatchResult};

pub(crate) const FIELD_STATUS: &str = "status";
pub(crate) const FIELD_INPUT: &str = "input";
pub(crate) const FIELD_OUTPUT: &str = "output";
pub(crate) const FIELD_DIVIDEND: &str = "dividend";
pub(crate) const FIELD_DIVISOR: &str = "divisor";

/// Job status lifecycle: `idle` -> `busy` -> `success` | `error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created and queued, not yet claimed by a worker
    Idle,

    /// Claimed by exactly one worker and executing
    Busy,

    /// Work callback returned a value
    Success,

    /// Work callback reported a failure
    Error,
}

impl JobStatus {
    /// Check if the job is in a terminal state (success or error)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    /// Get the status name as stored in the record
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "busy" => Ok(Self::Busy),
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid status: {}", s)),
        }
    }
}

/// Progress reported by the executing worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub dividend: u64,
    pub divisor: u64,
}

impl Progress {
    /// Completed fraction, `None` when the divisor is zero
    pub fn ratio(&self) -> Option<f64> {
        (self.divisor != 0).then(|| self.dividend as f64 / self.divisor as f64)
    }
}

/// Job record as read from the store.
///
/// Output is present only once the job reached a terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub status: JobStatus,
    pub input: Vec<u8>,
    pub output: Option<Vec<u8>>,
    pub dividend: Option<u64>,
    pub divisor: Option<u64>,
}

impl JobRecord {
    /// Record written at submission time
    pub fn new(input: Vec<u8>) -> Self {
        Self {
            status: JobStatus::Idle,
            input,
            output: None,
            dividend: None,
            divisor: None,
        }
    }

    /// Progress, when both counters have been written
    pub fn progress(&self) -> Option<Progress> {
        match (self.dividend, self.divisor) {
            (Some(dividend), Some(divisor)) => Some(Progress { dividend, divisor }),
            _ => None,
        }
    }

    /// Output decoded as UTF-8 (lossy)
    pub fn output_lossy(&self) -> Option<String> {
        self.output
            .as_ref()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// Fields written when the record is created
    pub(crate) fn initial_fields(&self) -> Vec<(&'static str, Vec<u8>)> {
        vec![
            (FIELD_STATUS, self.status.name().as_bytes().to_vec()),
            (FIELD_INPUT, self.input.clone()),
        ]
    }

    /// Build a record from a full hash read. An empty hash means the record
    /// expired or never existed.
    pub(crate) fn from_fields(
        key: &str,
        mut fields: HashMap<String, Vec<u8>>,
    ) -> DispatchResult<Option<Self>> {
        if fields.is_empty() {
            return Ok(None);
        }

        let status = fields
            .remove(FIELD_STATUS)
            .ok_or_else(|| invalid(key, "missing status field"))?;
        let status = std::str::from_utf8(&status)
            .map_err(|_| invalid(key, "status is not UTF-8"))?
            .parse::<JobStatus>()
            .map_err(|e| invalid(key, &e))?;

        Ok(Some(Self {
            status,
            input: fields.remove(FIELD_INPUT).unwrap_or_default(),
            output: fields.remove(FIELD_OUTPUT),
            dividend: parse_counter(key, FIELD_DIVIDEND, fields.remove(FIELD_DIVIDEND))?,
            divisor: parse_counter(key, FIELD_DIVISOR, fields.remove(FIELD_DIVISOR))?,
        }))
    }
}

fn parse_counter(key: &str, field: &str, raw: Option<Vec<u8>>) -> DispatchResult<Option<u64>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    std::str::from_utf8(&raw)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Some)
        .ok_or_else(|| invalid(key, &format!("{} is not a non-negative integer", field)))
}

fn invalid(key: &str, reason: &str) -> DispatchError {
    DispatchError::InvalidRecord {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
