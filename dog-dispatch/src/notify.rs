use std::time::Duration;

use tokio_stream::StreamExt;
use tracing::{debug, warn};

use crate::{
    keys::KeySpace,
    store::{BoxStream, SharedStore},
    DispatchResult, JobId, LifecycleEvent, WaitOutcome,
};

/// Per-function pub/sub channel for `create`, `start` and `finish` events.
///
/// Side notification only. A failed publish is logged and swallowed since
/// the job record stays the source of truth.
#[derive(Clone)]
pub struct NotificationChannel {
    store: SharedStore,
    keys: KeySpace,
}

impl NotificationChannel {
    pub fn new(store: SharedStore, keys: KeySpace) -> Self {
        Self { store, keys }
    }

    pub async fn publish(&self, function: &str, event: LifecycleEvent) {
        let channel = self.keys.events(function);
        match self.store.publish(&channel, &event.to_string()).await {
            Ok(receivers) => debug!("Published {} on {} to {} receivers", event, channel, receivers),
            Err(e) => warn!("Failed to publish {} on {}: {}", event, channel, e),
        }
    }

    /// Stream of events for `function`; malformed messages are skipped
    pub async fn subscribe(&self, function: &str) -> DispatchResult<BoxStream<LifecycleEvent>> {
        let messages = self.store.subscribe(&self.keys.events(function)).await?;
        let events = messages.filter_map(|message| match message.parse::<LifecycleEvent>() {
            Ok(event) => Some(event),
            Err(e) => {
                warn!("Ignoring malformed lifecycle message: {}", e);
                None
            }
        });
        Ok(Box::pin(events))
    }
}

/// Per-job completion signal: a short-lived list the finishing worker pushes
/// to and a blocked client pops from.
#[derive(Clone)]
pub struct CompletionSignal {
    store: SharedStore,
    keys: KeySpace,
    ttl: Duration,
}

impl CompletionSignal {
    pub fn new(store: SharedStore, keys: KeySpace, ttl: Duration) -> Self {
        Self { store, keys, ttl }
    }

    /// Release any client waiting on `id`. Must only be called after the
    /// terminal record write.
    pub async fn signal(&self, function: &str, id: JobId) -> DispatchResult<()> {
        let key = self.keys.completion(function, id);
        self.store.rpush(&key, "1").await?;
        self.store.expire(&key, self.ttl).await?;
        Ok(())
    }

    /// Wait up to `timeout` for the signal of `id`
    pub async fn wait(&self, function: &str, id: JobId, timeout: Duration) -> DispatchResult<WaitOutcome> {
        let key = self.keys.completion(function, id);
        let outcome = match self.store.blpop(&[key], timeout).await? {
            Some(_) => WaitOutcome::Signaled,
            None => WaitOutcome::TimedOut,
        };
        debug!("Wait on job {} of {} ended: {:?}", id, function, outcome);
        Ok(outcome)
    }
}
