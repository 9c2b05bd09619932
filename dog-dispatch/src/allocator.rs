use tracing::debug;

use crate::{keys::KeySpace, store::SharedStore, DispatchError, DispatchResult, JobId};

/// Per-function job id allocator backed by the store's atomic increment
#[derive(Clone)]
pub struct IdAllocator {
    store: SharedStore,
    keys: KeySpace,
}

impl IdAllocator {
    pub fn new(store: SharedStore, keys: KeySpace) -> Self {
        Self { store, keys }
    }

    /// Allocate the next id for `function`.
    ///
    /// Any failure means no usable id was produced, so the caller must assume
    /// no job exists.
    pub async fn next_id(&self, function: &str) -> DispatchResult<JobId> {
        let raw = self
            .store
            .incr_by(&self.keys.id_counter(function), 1)
            .await
            .map_err(|e| DispatchError::JobCreationFailed {
                function: function.to_string(),
                reason: e.to_string(),
            })?;

        let id = u64::try_from(raw)
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| DispatchError::JobCreationFailed {
                function: function.to_string(),
                reason: format!("allocator returned unusable id {}", raw),
            })?;

        debug!("Allocated job id {} for {}", id, function);
        Ok(JobId(id))
    }
}
