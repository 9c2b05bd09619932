use std::time::Duration;

use tracing::debug;

use crate::{
    keys::KeySpace,
    store::SharedStore,
    types::record::{FIELD_DIVIDEND, FIELD_DIVISOR, FIELD_OUTPUT, FIELD_STATUS},
    DispatchResult, JobId, JobRecord, JobStatus, Progress, WorkError,
};

/// Job record store.
///
/// Owns the record lifecycle writes. Each write is a single multi-field hash
/// write followed by re-arming the retention TTL. A record is written by its
/// creating client once and afterwards only by the single worker that claimed it.
#[derive(Clone)]
pub struct JobRecords {
    store: SharedStore,
    keys: KeySpace,
    ttl: Duration,
}

impl JobRecords {
    pub fn new(store: SharedStore, keys: KeySpace, ttl: Duration) -> Self {
        Self { store, keys, ttl }
    }

    /// Write the initial `idle` record holding the job input
    pub async fn create(&self, function: &str, id: JobId, input: Vec<u8>) -> DispatchResult<()> {
        let record = JobRecord::new(input);
        self.write(function, id, &record.initial_fields()).await
    }

    /// Read the full record. `None` once the record expired (or never existed).
    pub async fn get(&self, function: &str, id: JobId) -> DispatchResult<Option<JobRecord>> {
        let key = self.keys.record(function, id);
        let fields = self.store.hgetall(&key).await?;
        JobRecord::from_fields(&key, fields)
    }

    pub async fn mark_busy(&self, function: &str, id: JobId) -> DispatchResult<()> {
        self.write(function, id, &[(FIELD_STATUS, status_bytes(JobStatus::Busy))])
            .await
    }

    /// Overwrite both progress counters in one write
    pub async fn set_progress(&self, function: &str, id: JobId, progress: Progress) -> DispatchResult<()> {
        self.write(
            function,
            id,
            &[
                (FIELD_DIVIDEND, progress.dividend.to_string().into_bytes()),
                (FIELD_DIVISOR, progress.divisor.to_string().into_bytes()),
            ],
        )
        .await
    }

    /// Write the terminal status together with the output.
    ///
    /// `Ok` becomes `success` with the returned bytes, `Err` becomes `error`
    /// with the failure description.
    pub async fn finish(
        &self,
        function: &str,
        id: JobId,
        outcome: &Result<Vec<u8>, WorkError>,
    ) -> DispatchResult<JobStatus> {
        let (status, output) = match outcome {
            Ok(output) => (JobStatus::Success, output.clone()),
            Err(error) => (JobStatus::Error, error.message().as_bytes().to_vec()),
        };

        self.write(
            function,
            id,
            &[(FIELD_STATUS, status_bytes(status)), (FIELD_OUTPUT, output)],
        )
        .await?;

        debug!("Job {} of {} finished with status {}", id, function, status);
        Ok(status)
    }

    async fn write(&self, function: &str, id: JobId, fields: &[(&str, Vec<u8>)]) -> DispatchResult<()> {
        let key = self.keys.record(function, id);
        self.store.hset_multiple(&key, fields).await?;
        self.store.expire(&key, self.ttl).await?;
        Ok(())
    }
}

fn status_bytes(status: JobStatus) -> Vec<u8> {
    status.name().as_bytes().to_vec()
}
