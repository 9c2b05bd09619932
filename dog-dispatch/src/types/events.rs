use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::JobId;

/// Lifecycle event kinds broadcast on a function's channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Create,
    Start,
    Finish,
}

impl EventKind {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Start => "start",
            Self::Finish => "finish",
        }
    }
}

/// Message published on the notification channel, wire form `{kind}:{id}`.
///
/// Best-effort side notification; the job record is always authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub kind: EventKind,
    pub job_id: JobId,
}

impl LifecycleEvent {
    pub fn create(job_id: JobId) -> Self {
        Self { kind: EventKind::Create, job_id }
    }

    pub fn start(job_id: JobId) -> Self {
        Self { kind: EventKind::Start, job_id }
    }

    pub fn finish(job_id: JobId) -> Self {
        Self { kind: EventKind::Finish, job_id }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.event_name(), self.job_id)
    }
}

impl FromStr for LifecycleEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| format!("Invalid event: {}", s))?;
        let kind = match kind {
            "create" => EventKind::Create,
            "start" => EventKind::Start,
            "finish" => EventKind::Finish,
            _ => return Err(format!("Invalid event kind: {}", kind)),
        };
        Ok(Self {
            kind,
            job_id: id.parse()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format() {
        assert_eq!(LifecycleEvent::start(JobId(7)).to_string(), "start:7");
        assert_eq!(
            "finish:12".parse::<LifecycleEvent>().unwrap(),
            LifecycleEvent::finish(JobId(12))
        );
    }

    #[test]
    fn rejects_malformed_messages() {
        assert!("finish".parse::<LifecycleEvent>().is_err());
        assert!("cancel:3".parse::<LifecycleEvent>().is_err());
        assert!("create:x".parse::<LifecycleEvent>().is_err());
    }
}
