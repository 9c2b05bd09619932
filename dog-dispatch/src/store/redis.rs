use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::{
    aio::{ConnectionManager, MultiplexedConnection},
    AsyncCommands, Client, Script,
};
use tokio_stream::StreamExt;
use tracing::debug;

use crate::{
    store::{BoxStream, Store},
    DispatchResult,
};

/// Pops the lowest-scored member only when its score is due. Runs as one
/// script so no other command interleaves between the range read and ZREM.
const POP_DUE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
if #due == 0 then
    return false
end
redis.call('ZREM', KEYS[1], due[1])
return due[1]
"#;

/// Smallest BLPOP timeout sent to the server; zero would block forever
const MIN_BLOCK_SECS: f64 = 0.01;

/// Largest BLPOP timeout sent to the server (about 31 years)
const MAX_BLOCK_SECS: f64 = 1e9;

/// Largest PEXPIRE ttl sent to the server (about 100 years)
const MAX_TTL_MILLIS: i64 = 100 * 365 * 24 * 3600 * 1000;

/// Idle blocking connections kept for reuse
const MAX_IDLE_BLOCKING: usize = 8;

/// Redis-backed store.
///
/// Regular commands share one auto-reconnecting multiplexed connection.
/// Blocking pops run on dedicated connections so a waiting worker never
/// stalls other commands queued behind its BLPOP. Those connections are
/// pooled: one is opened in [`connect`](Self::connect), more on demand when
/// pops overlap, and up to `MAX_IDLE_BLOCKING` are kept between calls.
pub struct RedisStore {
    client: Client,
    conn: ConnectionManager,
    blocking: Mutex<Vec<MultiplexedConnection>>,
    pop_due: Script,
}

impl RedisStore {
    /// Connect to the Redis server at `url`
    pub async fn connect(url: &str) -> DispatchResult<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        let blocking = client.get_multiplexed_async_connection().await?;
        debug!("Connected to redis at {}", url);

        Ok(Self {
            client,
            conn,
            blocking: Mutex::new(vec![blocking]),
            pop_due: Script::new(POP_DUE_SCRIPT),
        })
    }

    async fn take_blocking(&self) -> DispatchResult<MultiplexedConnection> {
        let idle = self.blocking.lock().pop();
        match idle {
            Some(conn) => Ok(conn),
            None => {
                debug!("Opening extra blocking redis connection");
                Ok(self.client.get_multiplexed_async_connection().await?)
            }
        }
    }

    fn return_blocking(&self, conn: MultiplexedConnection) {
        let mut idle = self.blocking.lock();
        if idle.len() < MAX_IDLE_BLOCKING {
            idle.push(conn);
        }
    }

    /// Blocking connections currently idle in the pool
    pub fn idle_blocking_connections(&self) -> usize {
        self.blocking.lock().len()
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn incr_by(&self, key: &str, delta: i64) -> DispatchResult<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.incr(key, delta).await?;
        Ok(value)
    }

    async fn get(&self, key: &str) -> DispatchResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn hset_multiple(&self, key: &str, fields: &[(&str, Vec<u8>)]) -> DispatchResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset_multiple(key, fields).await?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> DispatchResult<HashMap<String, Vec<u8>>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, Vec<u8>> = conn.hgetall(key).await?;
        Ok(fields)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> DispatchResult<bool> {
        let mut conn = self.conn.clone();
        let millis = i64::try_from(ttl.as_millis()).map_or(MAX_TTL_MILLIS, |ms| ms.min(MAX_TTL_MILLIS));
        let applied: bool = conn.pexpire(key, millis).await?;
        Ok(applied)
    }

    async fn rpush(&self, key: &str, value: &str) -> DispatchResult<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn.rpush(key, value).await?;
        Ok(len)
    }

    async fn blpop(&self, keys: &[String], timeout: Duration) -> DispatchResult<Option<(String, String)>> {
        let mut conn = self.take_blocking().await?;
        // A connection whose pop failed or was cancelled is dropped, not pooled.
        let popped: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(keys)
            .arg(timeout.as_secs_f64().clamp(MIN_BLOCK_SECS, MAX_BLOCK_SECS))
            .query_async(&mut conn)
            .await?;
        self.return_blocking(conn);
        Ok(popped)
    }

    async fn llen(&self, key: &str) -> DispatchResult<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn.llen(key).await?;
        Ok(len)
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> DispatchResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn zpop_min_if_due(&self, key: &str, max_score: i64) -> DispatchResult<Option<String>> {
        let mut conn = self.conn.clone();
        let popped: Option<String> = self
            .pop_due
            .key(key)
            .arg(max_score)
            .invoke_async(&mut conn)
            .await?;
        Ok(popped)
    }

    async fn zcard(&self, key: &str) -> DispatchResult<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn.zcard(key).await?;
        Ok(len)
    }

    async fn publish(&self, channel: &str, message: &str) -> DispatchResult<usize> {
        let mut conn = self.conn.clone();
        let receivers: usize = conn.publish(channel, message).await?;
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> DispatchResult<BoxStream<String>> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| msg.get_payload::<String>().ok());
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redis_url() -> String {
        std::env::var("DOG_DISPATCH__REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
    }

    #[tokio::test]
    #[ignore = "requires a running redis server"]
    async fn test_pop_due_script_is_conditional() {
        let store = RedisStore::connect(&redis_url()).await.unwrap();
        let key = format!("dog-dispatch-test:{}", uuid::Uuid::new_v4());

        store.zadd(&key, "1", 100).await.unwrap();
        assert_eq!(store.zpop_min_if_due(&key, 99).await.unwrap(), None);
        assert_eq!(store.zpop_min_if_due(&key, 100).await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.zcard(&key).await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore = "requires a running redis server"]
    async fn test_blpop_times_out() {
        let store = RedisStore::connect(&redis_url()).await.unwrap();
        let key = format!("dog-dispatch-test:{}", uuid::Uuid::new_v4());

        let popped = store.blpop(&[key], Duration::from_millis(100)).await.unwrap();
        assert_eq!(popped, None);
    }

    #[tokio::test]
    #[ignore = "requires a running redis server"]
    async fn test_blocking_connection_is_reused() {
        let store = RedisStore::connect(&redis_url()).await.unwrap();
        let key = format!("dog-dispatch-test:{}", uuid::Uuid::new_v4());
        assert_eq!(store.idle_blocking_connections(), 1);

        for value in ["a", "b", "c"] {
            store.rpush(&key, value).await.unwrap();
            let popped = store.blpop(&[key.clone()], Duration::from_millis(100)).await.unwrap();
            assert_eq!(popped, Some((key.clone(), value.to_string())));
            assert_eq!(store.idle_blocking_connections(), 1);
        }
    }

    #[tokio::test]
    #[ignore = "requires a running redis server"]
    async fn test_unbounded_ttl_is_accepted() {
        let store = RedisStore::connect(&redis_url()).await.unwrap();
        let key = format!("dog-dispatch-test:{}", uuid::Uuid::new_v4());

        store.rpush(&key, "x").await.unwrap();
        assert!(store.expire(&key, Duration::MAX).await.unwrap());
        assert_eq!(store.llen(&key).await.unwrap(), 1);
    }
}
