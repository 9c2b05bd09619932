use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info};

use crate::store::memory::storage::MemoryStore;

/// Background sweeper that drops expired keys from a [`MemoryStore`].
///
/// Expiry is already enforced on access; the reaper bounds memory for keys
/// nobody reads again (completion signals, records of abandoned jobs).
pub struct ExpiryReaper {
    store: Arc<MemoryStore>,
    interval: Duration,
}

impl ExpiryReaper {
    /// Create a new reaper
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            interval: Duration::from_secs(30),
        }
    }

    /// Create reaper with custom interval
    pub fn with_interval(store: Arc<MemoryStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Run until `shutdown` flips to true or its sender is dropped
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);

        info!("Starting expiry reaper with interval: {:?}", self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.reap_once();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Expiry reaper stopped");
    }

    /// Run one reaper cycle
    pub fn reap_once(&self) -> usize {
        let removed = self.store.purge_expired();
        if removed > 0 {
            debug!("Reaped {} expired keys", removed);
        }
        removed
    }
}
