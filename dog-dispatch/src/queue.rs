use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    keys::KeySpace, store::SharedStore, Dispatch, DispatchError, DispatchResult, JobId,
    JobPriority,
};

/// Shortest blocking pop a claim performs. A zero poll interval would
/// otherwise turn an idle worker loop into a busy spin.
pub const MIN_CLAIM_WAIT: Duration = Duration::from_millis(10);

/// Where a claimed id came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimSource {
    Scheduled,
    Lane(JobPriority),
}

/// A job id delivered to exactly one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub job_id: JobId,
    pub source: ClaimSource,
}

/// Snapshot of pending work for a function (advisory, not atomic across lanes)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCounts {
    pub high: usize,
    pub normal: usize,
    pub low: usize,
    pub scheduled: usize,
}

impl PendingCounts {
    pub fn total(&self) -> usize {
        self.high + self.normal + self.low + self.scheduled
    }
}

/// Queue manager: three FIFO priority lanes plus a due-time ordered
/// scheduled set per function.
///
/// Exclusivity comes entirely from the store: a lane pop and a scheduled
/// pop-if-due each remove the id in the same atomic step that returns it.
#[derive(Clone)]
pub struct QueueManager {
    store: SharedStore,
    keys: KeySpace,
}

impl QueueManager {
    pub fn new(store: SharedStore, keys: KeySpace) -> Self {
        Self { store, keys }
    }

    /// Make `id` eligible for dispatch: appended to its lane, or inserted into
    /// the scheduled set scored by due time (milliseconds since the epoch).
    pub async fn enqueue(&self, function: &str, id: JobId, dispatch: Dispatch) -> DispatchResult<()> {
        let member = id.to_string();
        match dispatch {
            Dispatch::Immediate(priority) => {
                self.store
                    .rpush(&self.keys.lane(function, priority), &member)
                    .await?;
                debug!("Queued job {} of {} on {} lane", id, function, priority);
            }
            Dispatch::Scheduled(due) => {
                self.store
                    .zadd(&self.keys.scheduled(function), &member, due.timestamp_millis())
                    .await?;
                debug!("Scheduled job {} of {} for {}", id, function, due);
            }
        }
        Ok(())
    }

    /// Atomically take the earliest scheduled id whose due time is `<= now`
    pub async fn promote_due(&self, function: &str, now: DateTime<Utc>) -> DispatchResult<Option<JobId>> {
        let key = self.keys.scheduled(function);
        let member = self
            .store
            .zpop_min_if_due(&key, now.timestamp_millis())
            .await?;

        member.map(|member| parse_member(&key, &member)).transpose()
    }

    /// One dispatch attempt at the current time
    pub async fn claim(&self, function: &str, wait: Duration) -> DispatchResult<Option<Claim>> {
        self.claim_at(function, Utc::now(), wait).await
    }

    /// One dispatch attempt: a due scheduled entry wins; otherwise a bounded
    /// blocking pop across the lanes in order high, normal, low. `wait` is
    /// raised to [`MIN_CLAIM_WAIT`].
    pub async fn claim_at(
        &self,
        function: &str,
        now: DateTime<Utc>,
        wait: Duration,
    ) -> DispatchResult<Option<Claim>> {
        if let Some(job_id) = self.promote_due(function, now).await? {
            return Ok(Some(Claim {
                job_id,
                source: ClaimSource::Scheduled,
            }));
        }

        let lanes = self.keys.lanes(function);
        let Some((lane_key, member)) = self.store.blpop(&lanes, wait.max(MIN_CLAIM_WAIT)).await? else {
            return Ok(None);
        };

        let priority = JobPriority::dispatch_order()
            .iter()
            .zip(lanes.iter())
            .find(|(_, key)| **key == lane_key)
            .map(|(priority, _)| *priority)
            .ok_or_else(|| DispatchError::Internal(format!("Pop returned unknown lane {}", lane_key)))?;

        Ok(Some(Claim {
            job_id: parse_member(&lane_key, &member)?,
            source: ClaimSource::Lane(priority),
        }))
    }

    /// Lane lengths and scheduled-set size
    pub async fn pending(&self, function: &str) -> DispatchResult<PendingCounts> {
        Ok(PendingCounts {
            high: self.store.llen(&self.keys.lane(function, JobPriority::High)).await?,
            normal: self.store.llen(&self.keys.lane(function, JobPriority::Normal)).await?,
            low: self.store.llen(&self.keys.lane(function, JobPriority::Low)).await?,
            scheduled: self.store.zcard(&self.keys.scheduled(function)).await?,
        })
    }
}

fn parse_member(key: &str, member: &str) -> DispatchResult<JobId> {
    member.parse().map_err(|reason| DispatchError::InvalidRecord {
        key: key.to_string(),
        reason,
    })
}
