use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Priority lanes of a function (higher values are dispatched first)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum JobPriority {
    /// Only dispatched when the high and normal lanes are empty
    Low = 1,
    #[default]
    Normal = 2,
    High = 3,
}

impl JobPriority {
    /// Lanes in dispatch order: high, normal, low.
    ///
    /// There is no aging between lanes: low work starves while higher lanes
    /// keep receiving jobs.
    pub fn dispatch_order() -> &'static [JobPriority] {
        &[Self::High, Self::Normal, Self::Low]
    }

    /// Lane name, also used as the lane's key suffix
    pub fn name(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for JobPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

/// Where a new job is placed: a priority lane, or the scheduled set with a due time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dispatch {
    Immediate(JobPriority),
    Scheduled(DateTime<Utc>),
}

impl Dispatch {
    pub fn high() -> Self {
        Self::Immediate(JobPriority::High)
    }

    pub fn normal() -> Self {
        Self::Immediate(JobPriority::Normal)
    }

    pub fn low() -> Self {
        Self::Immediate(JobPriority::Low)
    }

    pub fn at(due: DateTime<Utc>) -> Self {
        Self::Scheduled(due)
    }
}

impl Default for Dispatch {
    fn default() -> Self {
        Self::normal()
    }
}

impl From<JobPriority> for Dispatch {
    fn from(priority: JobPriority) -> Self {
        Self::Immediate(priority)
    }
}
