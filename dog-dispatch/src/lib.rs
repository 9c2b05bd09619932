//! # dog-dispatch: Gearman-Style Job Dispatch on Atomic Store Primitives
//!
//! **Coordinator-free job dispatch for any number of clients and workers**
//!
//! dog-dispatch builds a complete job lifecycle out of single atomic store
//! commands: counters, hashes, lists, a score-ordered set, pub/sub and key
//! expiry. There is no broker process and no cross-key transaction.
//!
//! ## Guarantees
//!
//! - **Exactly-once delivery**: every enqueued id is popped by exactly one worker
//! - **Race-free scheduling**: due jobs are promoted with a single pop-min-if-due
//! - **Ordered lifecycle**: `idle` → `busy` → progress → `success`/`error`, terminal write before signal
//! - **Bounded waits**: blocking submissions end with `Signaled` or `TimedOut`, never hang
//! - **Pluggable stores**: in-memory for tests and single processes, Redis for fleets
//!
//! Crashed workers are not recovered: their jobs stay `busy` until the record expires.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dog_dispatch::prelude::*;
//!
//! # async fn example() -> DispatchResult<()> {
//! let store = Arc::new(MemoryStore::new());
//! let config = DispatchConfig::from_env()?;
//!
//! let mut worker = Worker::new(store.clone(), config.clone());
//! worker
//!     .accept("resize", handler_fn(|job: JobContext, input: Vec<u8>| async move {
//!         job.update(1, 2).await.map_err(|e| WorkError::new(e.to_string()))?;
//!         let name = String::from_utf8_lossy(&input).replace(".png", "_small.png");
//!         Ok(name.into_bytes())
//!     }))
//!     .await?;
//! let handle = worker.start();
//!
//! let client = Client::new(store, config);
//! let submitted = client
//!     .run(
//!         "resize",
//!         "img1.png",
//!         Dispatch::high(),
//!         RunOptions::new().with_roll_call().blocking_default(),
//!     )
//!     .await?;
//!
//! if let Some(record) = client.get("resize", submitted.job_id).await? {
//!     println!("{} -> {:?}", record.status, record.output_lossy());
//! }
//!
//! handle.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod allocator;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod keys;
pub mod notify;
pub mod observability;
pub mod queue;
pub mod records;
pub mod registry;
pub mod store;
pub mod types;
pub mod worker;

// Core API exports
pub use client::Client;
pub use worker::{handler_fn, HandlerFn, JobContext, WorkHandler, Worker, WorkerHandle};
pub use types::{
    Dispatch, EventKind, JobId, JobPriority, JobRecord, JobStatus, LifecycleEvent, Progress,
    RunOptions, Submitted, WaitOutcome,
};
pub use error::{DispatchError, DispatchResult, WorkError};
pub use config::DispatchConfig;
pub use keys::KeySpace;
pub use queue::{Claim, ClaimSource, PendingCounts};
pub use store::{BoxStream, SharedStore, Store};

// Observability exports
pub use observability::{DispatchMetrics, MetricsSnapshot};

#[cfg(feature = "json")]
pub use codec::json::{json_handler, JsonHandler};

// Store implementations
#[cfg(feature = "memory")]
pub use store::memory::{ExpiryReaper, MemoryStore};

#[cfg(feature = "redis")]
pub use store::redis::RedisStore;

/// Common imports for clients and workers
pub mod prelude {
    pub use crate::{Client, Worker, WorkerHandle, JobContext, WorkHandler, handler_fn};

    pub use crate::{
        Dispatch, JobId, JobPriority, JobRecord, JobStatus, RunOptions, Submitted, WaitOutcome,
    };

    pub use crate::{DispatchConfig, DispatchError, DispatchResult, WorkError};

    pub use crate::{SharedStore, Store};

    #[cfg(feature = "memory")]
    pub use crate::MemoryStore;

    #[cfg(feature = "redis")]
    pub use crate::RedisStore;

    #[cfg(feature = "json")]
    pub use crate::json_handler;

    pub use async_trait::async_trait;
}
