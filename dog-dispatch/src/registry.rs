use tracing::{debug, warn};

use crate::{keys::KeySpace, store::SharedStore, DispatchError, DispatchResult};

/// Worker presence counters.
///
/// Advisory only: a crashed worker never decrements, so the count can stay
/// above the number of live workers.
#[derive(Clone)]
pub struct WorkerRegistry {
    store: SharedStore,
    keys: KeySpace,
}

impl WorkerRegistry {
    pub fn new(store: SharedStore, keys: KeySpace) -> Self {
        Self { store, keys }
    }

    /// Count one more worker for `function`, returning the new count
    pub async fn register(&self, function: &str) -> DispatchResult<i64> {
        let count = self.store.incr_by(&self.keys.workers(function), 1).await?;
        debug!("Registered worker for {} (presence {})", function, count);
        Ok(count)
    }

    /// Count one worker fewer for `function`, returning the new count
    pub async fn deregister(&self, function: &str) -> DispatchResult<i64> {
        let count = self.store.incr_by(&self.keys.workers(function), -1).await?;
        if count < 0 {
            warn!("Presence counter for {} dropped below zero ({})", function, count);
        }
        debug!("Deregistered worker for {} (presence {})", function, count);
        Ok(count)
    }

    /// Read the presence counter.
    ///
    /// A missing counter or a value that is not a non-negative integer is a
    /// protocol violation, reported as an error rather than as zero workers.
    pub async fn roll_call(&self, function: &str) -> DispatchResult<u64> {
        let raw = match self.store.get(&self.keys.workers(function)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Err(DispatchError::PresenceMissing(function.to_string())),
            Err(DispatchError::WrongType(_)) => {
                return Err(DispatchError::InvalidPresence {
                    function: function.to_string(),
                    value: "<not a string>".to_string(),
                })
            }
            Err(e) => return Err(e),
        };

        raw.trim()
            .parse::<u64>()
            .map_err(|_| DispatchError::InvalidPresence {
                function: function.to_string(),
                value: raw.clone(),
            })
    }

    /// Roll call as a submission precondition: at least one worker must be present
    pub async fn require_workers(&self, function: &str) -> DispatchResult<u64> {
        let failed = |reason: String| DispatchError::RollCallFailed {
            function: function.to_string(),
            reason,
        };

        match self.roll_call(function).await {
            Ok(0) => Err(failed("no workers registered".to_string())),
            Ok(count) => Ok(count),
            Err(DispatchError::PresenceMissing(_)) => Err(failed("presence counter missing".to_string())),
            Err(DispatchError::InvalidPresence { value, .. }) => Err(failed(format!(
                "presence counter holds a non-integer or negative value ({})",
                value
            ))),
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::Store;
    use std::sync::Arc;

    fn registry() -> (Arc<MemoryStore>, WorkerRegistry) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), WorkerRegistry::new(store, KeySpace::default()))
    }

    #[tokio::test]
    async fn test_register_and_deregister() {
        let (_, registry) = registry();
        assert_eq!(registry.register("f").await.unwrap(), 1);
        assert_eq!(registry.register("f").await.unwrap(), 2);
        assert_eq!(registry.roll_call("f").await.unwrap(), 2);
        assert_eq!(registry.deregister("f").await.unwrap(), 1);
        assert_eq!(registry.roll_call("f").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_counter_is_not_zero() {
        let (_, registry) = registry();
        let err = registry.roll_call("f").await.unwrap_err();
        assert!(matches!(err, DispatchError::PresenceMissing(_)));
    }

    #[tokio::test]
    async fn test_negative_counter_is_invalid() {
        let (_, registry) = registry();
        registry.deregister("f").await.unwrap();
        let err = registry.roll_call("f").await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidPresence { .. }));
    }

    #[tokio::test]
    async fn test_require_workers() {
        let (store, registry) = registry();

        let err = registry.require_workers("f").await.unwrap_err();
        assert!(matches!(err, DispatchError::RollCallFailed { .. }));

        registry.register("f").await.unwrap();
        assert_eq!(registry.require_workers("f").await.unwrap(), 1);

        registry.deregister("f").await.unwrap();
        let err = registry.require_workers("f").await.unwrap_err();
        assert!(matches!(err, DispatchError::RollCallFailed { .. }));

        store.rpush(&KeySpace::default().workers("g"), "x").await.unwrap();
        let err = registry.require_workers("g").await.unwrap_err();
        assert!(matches!(err, DispatchError::RollCallFailed { .. }));
    }

    #[tokio::test]
    async fn test_counter_of_wrong_type_is_invalid_presence() {
        let (store, registry) = registry();
        store.rpush(&KeySpace::default().workers("f"), "x").await.unwrap();

        let err = registry.roll_call("f").await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidPresence { .. }));
    }
}
