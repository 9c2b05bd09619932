//! Store key layout.
//!
//! Every structure is namespaced by a configurable prefix and the function
//! name:
//!
//! | structure | key |
//! |---|---|
//! | id counter | `{prefix}:{function}:next_id` |
//! | job record (hash) | `{prefix}:{function}:job:{id}` |
//! | priority lane (list) | `{prefix}:{function}:queue:{high,normal,low}` |
//! | scheduled set (zset) | `{prefix}:{function}:scheduled` |
//! | worker presence counter | `{prefix}:{function}:workers` |
//! | notification channel | `{prefix}:{function}:events` |
//! | completion signal (list) | `{prefix}:{function}:done:{id}` |

use crate::{DispatchError, DispatchResult, JobId, JobPriority};

const SEPARATOR: char = ':';

/// Key builder for one store namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn id_counter(&self, function: &str) -> String {
        format!("{}:{}:next_id", self.prefix, function)
    }

    pub fn record(&self, function: &str, id: JobId) -> String {
        format!("{}:{}:job:{}", self.prefix, function, id)
    }

    pub fn lane(&self, function: &str, priority: JobPriority) -> String {
        format!("{}:{}:queue:{}", self.prefix, function, priority.name())
    }

    /// Lane keys in dispatch order (high, normal, low)
    pub fn lanes(&self, function: &str) -> Vec<String> {
        JobPriority::dispatch_order()
            .iter()
            .map(|priority| self.lane(function, *priority))
            .collect()
    }

    pub fn scheduled(&self, function: &str) -> String {
        format!("{}:{}:scheduled", self.prefix, function)
    }

    pub fn workers(&self, function: &str) -> String {
        format!("{}:{}:workers", self.prefix, function)
    }

    pub fn events(&self, function: &str) -> String {
        format!("{}:{}:events", self.prefix, function)
    }

    pub fn completion(&self, function: &str, id: JobId) -> String {
        format!("{}:{}:done:{}", self.prefix, function, id)
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new("dispatch")
    }
}

/// Reject function names that would break the key layout
pub fn validate_function(function: &str) -> DispatchResult<()> {
    if function.is_empty()
        || function.contains(SEPARATOR)
        || function.chars().any(char::is_whitespace)
    {
        return Err(DispatchError::InvalidFunction(function.to_string()));
    }
    Ok(())
}
