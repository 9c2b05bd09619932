use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::{
    allocator::IdAllocator,
    config::DispatchConfig,
    keys::validate_function,
    notify::{CompletionSignal, NotificationChannel},
    observability::DispatchMetrics,
    queue::{PendingCounts, QueueManager},
    records::JobRecords,
    registry::WorkerRegistry,
    store::{BoxStream, SharedStore},
    Dispatch, DispatchResult, JobId, JobRecord, LifecycleEvent, RunOptions, Submitted,
    WaitOutcome,
};

/// Submits jobs and observes their records.
///
/// Cheap to clone; all clones share the store handle and metrics.
#[derive(Clone)]
pub struct Client {
    config: DispatchConfig,
    ids: IdAllocator,
    records: JobRecords,
    queue: QueueManager,
    registry: WorkerRegistry,
    events: NotificationChannel,
    signals: CompletionSignal,
    metrics: Arc<DispatchMetrics>,
}

impl Client {
    pub fn new(store: SharedStore, config: DispatchConfig) -> Self {
        let keys = config.key_space();
        Self {
            ids: IdAllocator::new(store.clone(), keys.clone()),
            records: JobRecords::new(store.clone(), keys.clone(), config.record_ttl),
            queue: QueueManager::new(store.clone(), keys.clone()),
            registry: WorkerRegistry::new(store.clone(), keys.clone()),
            events: NotificationChannel::new(store.clone(), keys.clone()),
            signals: CompletionSignal::new(store, keys, config.signal_ttl),
            metrics: Arc::new(DispatchMetrics::new()),
            config,
        }
    }

    /// Share a metrics instance with other clients or workers
    pub fn with_metrics(mut self, metrics: Arc<DispatchMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Submit a job.
    ///
    /// With `roll_call` set, the presence counter is checked first and the call
    /// fails with `RollCallFailed` before anything is written. The check and
    /// the creation are separate steps: workers may leave in between.
    ///
    /// With `blocking` set, waits for the completion signal after enqueueing.
    /// The id is returned either way; a timed-out wait says nothing about the
    /// job's status.
    #[instrument(skip(self, input), fields(function = %function))]
    pub async fn run(
        &self,
        function: &str,
        input: impl Into<Vec<u8>>,
        dispatch: Dispatch,
        options: RunOptions,
    ) -> DispatchResult<Submitted> {
        validate_function(function)?;

        if options.roll_call {
            if let Err(e) = self.registry.require_workers(function).await {
                self.metrics.increment_roll_call_rejections();
                warn!("Refusing job for {}: {}", function, e);
                return Err(e);
            }
        }

        let job_id = self.ids.next_id(function).await?;
        self.records.create(function, job_id, input.into()).await?;
        self.events.publish(function, LifecycleEvent::create(job_id)).await;
        self.queue.enqueue(function, job_id, dispatch).await?;
        self.metrics.increment_jobs_submitted();

        info!("Submitted job {} of {} ({:?})", job_id, function, dispatch);

        let wait = if options.blocking {
            let timeout = options.timeout.unwrap_or(self.config.default_wait_timeout);
            Some(self.wait(function, job_id, timeout).await?)
        } else {
            None
        };

        Ok(Submitted { job_id, wait })
    }

    /// Submit a job whose input is JSON-encoded from `input`
    #[cfg(feature = "json")]
    pub async fn run_json<T: serde::Serialize>(
        &self,
        function: &str,
        input: &T,
        dispatch: Dispatch,
        options: RunOptions,
    ) -> DispatchResult<Submitted> {
        let payload = crate::codec::encode(input)?;
        self.run(function, payload, dispatch, options).await
    }

    /// Read the current record. `None` when it expired or never existed.
    pub async fn get(&self, function: &str, id: JobId) -> DispatchResult<Option<JobRecord>> {
        validate_function(function)?;
        self.records.get(function, id).await
    }

    /// Wait up to `timeout` for the completion signal of a job.
    ///
    /// `Signaled` guarantees an immediate [`get`](Self::get) sees a terminal
    /// record. `TimedOut` only means no signal was observed.
    pub async fn wait(&self, function: &str, id: JobId, timeout: Duration) -> DispatchResult<WaitOutcome> {
        validate_function(function)?;
        let outcome = self.signals.wait(function, id, timeout).await?;
        self.metrics.record_wait(outcome.is_signaled());
        if !outcome.is_signaled() {
            debug!("Wait for job {} of {} timed out after {:?}", id, function, timeout);
        }
        Ok(outcome)
    }

    /// Number of registered workers for `function`
    pub async fn roll_call(&self, function: &str) -> DispatchResult<u64> {
        validate_function(function)?;
        self.registry.roll_call(function).await
    }

    /// Lifecycle events for `function` published after this call
    pub async fn subscribe(&self, function: &str) -> DispatchResult<BoxStream<LifecycleEvent>> {
        validate_function(function)?;
        self.events.subscribe(function).await
    }

    /// Pending ids per lane and in the scheduled set
    pub async fn pending(&self, function: &str) -> DispatchResult<PendingCounts> {
        validate_function(function)?;
        self.queue.pending(function).await
    }

    pub fn metrics(&self) -> &DispatchMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::Store;
    use crate::worker::{handler_fn, Worker};
    use crate::{DispatchError, JobPriority, JobStatus};
    use chrono::Utc;
    use tokio_stream::StreamExt;

    fn client() -> (Arc<MemoryStore>, Client) {
        let store = Arc::new(MemoryStore::new());
        let client = Client::new(store.clone(), DispatchConfig::default());
        (store, client)
    }

    #[tokio::test]
    async fn test_run_creates_idle_record_and_queues_id() {
        let (_, client) = client();
        let submitted = client
            .run("resize", "img1.png", Dispatch::normal(), RunOptions::new())
            .await
            .unwrap();

        assert_eq!(submitted.job_id, JobId(1));
        assert_eq!(submitted.wait, None);

        let record = client.get("resize", submitted.job_id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Idle);
        assert_eq!(record.input, b"img1.png");
        assert!(record.output.is_none());

        let pending = client.pending("resize").await.unwrap();
        assert_eq!(pending.normal, 1);
        assert_eq!(client.metrics().snapshot().jobs_submitted, 1);
    }

    #[tokio::test]
    async fn test_scheduled_run_goes_to_scheduled_set() {
        let (_, client) = client();
        let due = Utc::now() + chrono::Duration::minutes(5);
        client
            .run("report", Vec::new(), Dispatch::at(due), RunOptions::new())
            .await
            .unwrap();

        let pending = client.pending("report").await.unwrap();
        assert_eq!(pending.scheduled, 1);
        assert_eq!(pending.total(), 1);
    }

    #[tokio::test]
    async fn test_roll_call_failure_writes_nothing() {
        let (store, client) = client();
        let err = client
            .run(
                "transcode",
                "a.mov",
                Dispatch::Immediate(JobPriority::High),
                RunOptions::new().with_roll_call(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::RollCallFailed { .. }));
        let keys = client.config().key_space();
        assert!(!store.contains_key(&keys.id_counter("transcode")));
        assert!(!store.contains_key(&keys.record("transcode", JobId(1))));
        assert_eq!(client.pending("transcode").await.unwrap().total(), 0);
        assert_eq!(client.metrics().snapshot().roll_call_rejections, 1);
    }

    #[tokio::test]
    async fn test_roll_call_on_non_counter_key_fails_roll_call() {
        let (store, client) = client();
        let keys = client.config().key_space();
        store.rpush(&keys.workers("transcode"), "x").await.unwrap();

        let err = client
            .run("transcode", "a.mov", Dispatch::normal(), RunOptions::new().with_roll_call())
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::RollCallFailed { .. }));
        assert!(!store.contains_key(&keys.id_counter("transcode")));
    }

    #[tokio::test]
    async fn test_blocking_run_times_out_with_id() {
        let (_, client) = client();
        let submitted = client
            .run(
                "slow",
                "x",
                Dispatch::normal(),
                RunOptions::new().blocking(Duration::from_millis(50)),
            )
            .await
            .unwrap();

        assert_eq!(submitted.wait, Some(WaitOutcome::TimedOut));
        let record = client.get("slow", submitted.job_id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Idle);
    }

    #[tokio::test]
    async fn test_unbounded_blocking_run_waits_for_completion() {
        let store = Arc::new(MemoryStore::new());
        let config = DispatchConfig::default()
            .with_poll_interval(Duration::from_millis(20))
            .with_signal_ttl(Duration::MAX);
        let mut worker = Worker::new(store.clone(), config.clone());
        worker
            .accept("resize", handler_fn(|_job, input: Vec<u8>| async move { Ok(input) }))
            .await
            .unwrap();
        let handle = worker.start();
        let client = Client::new(store, config);

        let submitted = tokio::time::timeout(
            Duration::from_secs(5),
            client.run("resize", "x", Dispatch::normal(), RunOptions::new().blocking(Duration::MAX)),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(submitted.wait, Some(WaitOutcome::Signaled));
        let record = client.get("resize", submitted.job_id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Success);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_event_is_published() {
        let (_, client) = client();
        let mut events = client.subscribe("resize").await.unwrap();

        let submitted = client
            .run("resize", "x", Dispatch::normal(), RunOptions::new())
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), events.next())
            .await
            .unwrap();
        assert_eq!(event, Some(LifecycleEvent::create(submitted.job_id)));
    }

    #[tokio::test]
    async fn test_invalid_function_is_rejected_before_store_access() {
        let (store, client) = client();
        let err = client
            .run("bad:name", "x", Dispatch::normal(), RunOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidFunction(_)));
        assert!(!store.contains_key(&client.config().key_space().id_counter("bad:name")));
    }

    #[cfg(feature = "json")]
    #[tokio::test]
    async fn test_run_json_encodes_input() {
        let (_, client) = client();
        let submitted = client
            .run_json("sum", &vec![1, 2, 3], Dispatch::normal(), RunOptions::new())
            .await
            .unwrap();
        let record = client.get("sum", submitted.job_id).await.unwrap().unwrap();
        assert_eq!(record.input, b"[1,2,3]");
    }
}
