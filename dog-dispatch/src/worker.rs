use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    config::DispatchConfig,
    keys::validate_function,
    notify::{CompletionSignal, NotificationChannel},
    observability::DispatchMetrics,
    queue::{QueueManager, MIN_CLAIM_WAIT},
    records::JobRecords,
    registry::WorkerRegistry,
    store::SharedStore,
    DispatchError, DispatchResult, JobId, LifecycleEvent, Progress, WorkError,
};

/// User-supplied work callback for one function.
///
/// Returning `Err` (or panicking) records the job with status `error`;
/// it never surfaces as a [`DispatchError`].
#[async_trait]
pub trait WorkHandler: Send + Sync + 'static {
    async fn work(&self, job: JobContext, input: Vec<u8>) -> Result<Vec<u8>, WorkError>;
}

/// [`WorkHandler`] backed by an async closure
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap an async closure as a [`WorkHandler`]
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(JobContext, Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<u8>, WorkError>> + Send + 'static,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> WorkHandler for HandlerFn<F>
where
    F: Fn(JobContext, Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<u8>, WorkError>> + Send + 'static,
{
    async fn work(&self, job: JobContext, input: Vec<u8>) -> Result<Vec<u8>, WorkError> {
        (self.f)(job, input).await
    }
}

/// Handle on the job being executed, passed to the work callback
#[derive(Clone)]
pub struct JobContext {
    function: Arc<str>,
    job_id: JobId,
    records: JobRecords,
    // Read-held across each progress write; taken for write once the callback returns.
    finished: Arc<RwLock<bool>>,
}

impl JobContext {
    fn new(function: &str, job_id: JobId, records: JobRecords) -> Self {
        Self {
            function: Arc::from(function),
            job_id,
            records,
            finished: Arc::new(RwLock::new(false)),
        }
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Overwrite the job's progress counters.
    ///
    /// Fails with `JobAlreadyTerminal` once the callback has returned, also
    /// from clones of the context that outlive the callback. An update still
    /// in flight at that point completes before the terminal write.
    pub async fn update(&self, dividend: u64, divisor: u64) -> DispatchResult<()> {
        let finished = self.finished.read().await;
        if *finished {
            return Err(DispatchError::JobAlreadyTerminal(self.job_id));
        }
        self.records
            .set_progress(&self.function, self.job_id, Progress { dividend, divisor })
            .await
    }

    async fn mark_finished(&self) {
        *self.finished.write().await = true;
    }
}

struct WorkerCore {
    registry: WorkerRegistry,
    records: JobRecords,
    queue: QueueManager,
    events: NotificationChannel,
    signals: CompletionSignal,
    metrics: Arc<DispatchMetrics>,
    config: DispatchConfig,
}

impl WorkerCore {
    /// One dispatch attempt followed by execution of the claimed job, if any
    #[instrument(skip(self, handler), fields(function = %function))]
    async fn poll_once(&self, function: &str, handler: &Arc<dyn WorkHandler>) -> DispatchResult<Option<JobId>> {
        let Some(claim) = self.queue.claim(function, self.config.poll_interval).await? else {
            return Ok(None);
        };
        let job_id = claim.job_id;
        self.metrics.increment_jobs_claimed();

        // The id is consumed either way; an expired record leaves nothing to run.
        let Some(record) = self.records.get(function, job_id).await? else {
            warn!("Claimed job {} of {} has no record, skipping", job_id, function);
            return Ok(Some(job_id));
        };

        debug!("Processing job {} of {} from {:?}", job_id, function, claim.source);

        self.events.publish(function, LifecycleEvent::start(job_id)).await;
        self.records.mark_busy(function, job_id).await?;

        let job = JobContext::new(function, job_id, self.records.clone());
        let outcome = match AssertUnwindSafe(handler.work(job.clone(), record.input))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => Err(WorkError::new(format!(
                "work callback panicked: {}",
                panic_message(&*panic)
            ))),
        };
        job.mark_finished().await;

        self.records.finish(function, job_id, &outcome).await?;
        self.events.publish(function, LifecycleEvent::finish(job_id)).await;
        self.signals.signal(function, job_id).await?;

        match &outcome {
            Ok(_) => {
                self.metrics.increment_jobs_succeeded();
                info!("Job {} of {} succeeded", job_id, function);
            }
            Err(e) => {
                self.metrics.increment_jobs_failed();
                warn!("Job {} of {} failed: {}", job_id, function, e);
            }
        }

        Ok(Some(job_id))
    }

    async fn run_loop(
        self: Arc<Self>,
        function: String,
        handler: Arc<dyn WorkHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Dispatch loop started for {}", function);

        // Shutdown is only observed between polls so a claimed job always runs to
        // its terminal write.
        loop {
            if *shutdown.borrow() || shutdown.has_changed().is_err() {
                break;
            }

            if let Err(e) = self.poll_once(&function, &handler).await {
                error!(kind = e.as_label(), "Error dispatching {}: {}", function, e);
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval.max(MIN_CLAIM_WAIT)) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }

        info!("Dispatch loop stopped for {}", function);
    }
}

/// Executes jobs for the functions it accepts.
///
/// Each [`accept`](Self::accept) registers presence immediately; [`start`](Self::start)
/// spawns one dispatch loop per accept.
pub struct Worker {
    id: Uuid,
    core: WorkerCore,
    accepted: Vec<(String, Arc<dyn WorkHandler>)>,
}

impl Worker {
    pub fn new(store: SharedStore, config: DispatchConfig) -> Self {
        let keys = config.key_space();
        let core = WorkerCore {
            registry: WorkerRegistry::new(store.clone(), keys.clone()),
            records: JobRecords::new(store.clone(), keys.clone(), config.record_ttl),
            queue: QueueManager::new(store.clone(), keys.clone()),
            events: NotificationChannel::new(store.clone(), keys.clone()),
            signals: CompletionSignal::new(store, keys, config.signal_ttl),
            metrics: Arc::new(DispatchMetrics::new()),
            config,
        };

        Self {
            id: Uuid::new_v4(),
            core,
            accepted: Vec::new(),
        }
    }

    /// Share a metrics instance with other clients or workers
    pub fn with_metrics(mut self, metrics: Arc<DispatchMetrics>) -> Self {
        self.core.metrics = metrics;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Register for `function` and increment its presence counter.
    ///
    /// Accepting the same function twice counts twice and runs two loops.
    #[instrument(skip(self, handler), fields(worker_id = %self.id))]
    pub async fn accept<H: WorkHandler>(&mut self, function: &str, handler: H) -> DispatchResult<()> {
        validate_function(function)?;

        if self.accepted.iter().any(|(name, _)| name == function) {
            warn!("Function {} accepted more than once by worker {}", function, self.id);
        }

        let presence = self.core.registry.register(function).await?;
        self.accepted.push((function.to_string(), Arc::new(handler)));

        info!("Worker {} accepted {} (presence {})", self.id, function, presence);
        Ok(())
    }

    /// Accepted function names, in accept order
    pub fn functions(&self) -> impl Iterator<Item = &str> {
        self.accepted.iter().map(|(name, _)| name.as_str())
    }

    /// Run a single dispatch attempt for an accepted function.
    ///
    /// Returns the id of the job that was claimed, or `None` when nothing was
    /// pending within the poll interval.
    pub async fn poll_once(&self, function: &str) -> DispatchResult<Option<JobId>> {
        let handler = self
            .accepted
            .iter()
            .find(|(name, _)| name == function)
            .map(|(_, handler)| handler)
            .ok_or_else(|| DispatchError::NotAccepted(function.to_string()))?;

        self.core.poll_once(function, handler).await
    }

    pub fn metrics(&self) -> &DispatchMetrics {
        &self.core.metrics
    }

    /// Spawn the dispatch loops.
    ///
    /// Dropping the returned handle stops the loops without deregistering,
    /// like a crash. Use [`WorkerHandle::shutdown`] for a graceful exit.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let core = Arc::new(self.core);

        let loops = self
            .accepted
            .into_iter()
            .map(|(function, handler)| {
                let task = tokio::spawn(core.clone().run_loop(
                    function.clone(),
                    handler,
                    shutdown_rx.clone(),
                ));
                (function, task)
            })
            .collect::<Vec<_>>();

        info!("Started worker {} with {} dispatch loops", self.id, loops.len());

        WorkerHandle {
            id: self.id,
            shutdown_tx,
            loops,
            registry: core.registry.clone(),
        }
    }
}

/// Handle to a running [`Worker`]
pub struct WorkerHandle {
    id: Uuid,
    shutdown_tx: watch::Sender<bool>,
    loops: Vec<(String, JoinHandle<()>)>,
    registry: WorkerRegistry,
}

impl WorkerHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Stop all loops after their current poll, then decrement the presence
    /// counter once per accept.
    ///
    /// Every function is deregistered even if one decrement fails; the first
    /// failure is returned.
    pub async fn shutdown(self) -> DispatchResult<()> {
        info!("Shutting down worker {}", self.id);
        self.shutdown_tx.send_replace(true);

        let mut first_error = None;
        for (function, task) in self.loops {
            if let Err(e) = task.await {
                error!("Dispatch loop for {} ended abnormally: {}", function, e);
            }
            if let Err(e) = self.registry.deregister(&function).await {
                error!("Failed to deregister worker {} from {}: {}", self.id, function, e);
                first_error.get_or_insert(e);
            }
        }

        info!("Worker {} stopped", self.id);
        first_error.map_or(Ok(()), Err)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
