#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "redis")]
pub mod redis;

use async_trait::async_trait;
use futures_core::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

use crate::DispatchResult;

/// Type alias for boxed streams (stable Rust compatible)
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Store handle shared by every protocol component
pub type SharedStore = std::sync::Arc<dyn Store>;

/// Atomic key-value primitives the dispatch protocol is built on.
///
/// Every method is a single store operation executed atomically and in
/// isolation. Nothing in the crate composes these into a read-modify-write
/// on the caller side; the only conditional mutation the protocol needs,
/// [`Store::zpop_min_if_due`], is one indivisible method.
#[async_trait]
pub trait Store: Send + Sync {
    /// Atomically add `delta` to an integer counter and return the new value.
    /// A missing key counts as zero.
    async fn incr_by(&self, key: &str, delta: i64) -> DispatchResult<i64>;

    /// Raw read of a string value (counters are read this way for roll call)
    async fn get(&self, key: &str) -> DispatchResult<Option<String>>;

    /// Atomically write several fields of a hash
    async fn hset_multiple(&self, key: &str, fields: &[(&str, Vec<u8>)]) -> DispatchResult<()>;

    /// Read every field of a hash; a missing key yields an empty map
    async fn hgetall(&self, key: &str) -> DispatchResult<HashMap<String, Vec<u8>>>;

    /// Set or reset the time-to-live of a key. Returns false if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> DispatchResult<bool>;

    /// Append to the tail of a list, returning the new length
    async fn rpush(&self, key: &str, value: &str) -> DispatchResult<usize>;

    /// Pop from the head of the first non-empty list in `keys`, scanning in
    /// order, waiting up to `timeout` for one to become non-empty.
    /// Returns the list key and the popped value.
    async fn blpop(&self, keys: &[String], timeout: Duration) -> DispatchResult<Option<(String, String)>>;

    /// Length of a list (zero when missing)
    async fn llen(&self, key: &str) -> DispatchResult<usize>;

    /// Add `member` to a score-ordered set, replacing any previous score
    async fn zadd(&self, key: &str, member: &str, score: i64) -> DispatchResult<()>;

    /// Atomically remove and return the lowest-scored member if its score is
    /// `<= max_score`. Two concurrent callers can never receive the same member.
    async fn zpop_min_if_due(&self, key: &str, max_score: i64) -> DispatchResult<Option<String>>;

    /// Cardinality of a score-ordered set (zero when missing)
    async fn zcard(&self, key: &str) -> DispatchResult<usize>;

    /// Publish a message, returning the number of receivers
    async fn publish(&self, channel: &str, message: &str) -> DispatchResult<usize>;

    /// Subscribe to a channel. Delivery is best-effort and at-most-once.
    async fn subscribe(&self, channel: &str) -> DispatchResult<BoxStream<String>>;
}
