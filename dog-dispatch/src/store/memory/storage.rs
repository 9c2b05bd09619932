use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, Notify};
use tokio::time::Instant;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};

use crate::{
    store::{BoxStream, Store},
    DispatchError, DispatchResult,
};

const WRONG_TYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";
const CHANNEL_CAPACITY: usize = 1024;

type Keyspace = HashMap<String, Entry>;

/// Score-ordered set: members ordered by (score, member)
#[derive(Debug, Default)]
pub(crate) struct SortedSet {
    by_score: BTreeSet<(i64, String)>,
    scores: HashMap<String, i64>,
}

impl SortedSet {
    fn insert(&mut self, member: &str, score: i64) {
        if let Some(previous) = self.scores.insert(member.to_string(), score) {
            self.by_score.remove(&(previous, member.to_string()));
        }
        self.by_score.insert((score, member.to_string()));
    }

    fn pop_min_if(&mut self, max_score: i64) -> Option<String> {
        let first = self.by_score.first()?;
        if first.0 > max_score {
            return None;
        }
        let (_, member) = self.by_score.pop_first()?;
        self.scores.remove(&member);
        Some(member)
    }

    fn len(&self) -> usize {
        self.scores.len()
    }

    fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

#[derive(Debug)]
pub(crate) enum Value {
    Str(String),
    Hash(HashMap<String, Vec<u8>>),
    List(VecDeque<String>),
    ZSet(SortedSet),
}

#[derive(Debug)]
pub(crate) struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory store for testing, development and single-process deployments.
///
/// All keys live behind one mutex, so every operation is atomic with respect
/// to every other. Expired keys are dropped lazily on access and in bulk by
/// [`ExpiryReaper`](super::ExpiryReaper).
pub struct MemoryStore {
    pub(crate) keys: Arc<Mutex<Keyspace>>,

    /// Woken on every list push so blocked pops re-check their lists
    list_pushed: Arc<Notify>,

    /// Pub/sub channels
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<String>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            keys: Arc::new(Mutex::new(HashMap::new())),
            list_pushed: Arc::new(Notify::new()),
            channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Remaining time-to-live of a key, `None` when missing or persistent
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let keys = self.keys.lock();
        let entry = keys.get(key).filter(|entry| !entry.is_expired(now))?;
        entry
            .expires_at
            .map(|at| at.saturating_duration_since(now))
    }

    /// Whether a live (non-expired) key exists
    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.keys
            .lock()
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Drop every expired key, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut keys = self.keys.lock();
        let before = keys.len();
        keys.retain(|_, entry| !entry.is_expired(now));
        before - keys.len()
    }

    fn try_lpop_first(&self, list_keys: &[String]) -> DispatchResult<Option<(String, String)>> {
        let now = Instant::now();
        let mut keys = self.keys.lock();

        for key in list_keys {
            purge_if_expired(&mut keys, key, now);
            let popped = match keys.get_mut(key.as_str()) {
                Some(Entry { value: Value::List(list), .. }) => {
                    let value = list.pop_front();
                    if list.is_empty() {
                        keys.remove(key.as_str());
                    }
                    value
                }
                Some(_) => return Err(wrong_type()),
                None => None,
            };

            if let Some(value) = popped {
                return Ok(Some((key.clone(), value)));
            }
        }

        Ok(None)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn purge_if_expired(keys: &mut Keyspace, key: &str, now: Instant) {
    if keys.get(key).is_some_and(|entry| entry.is_expired(now)) {
        keys.remove(key);
    }
}

fn wrong_type() -> DispatchError {
    DispatchError::WrongType(WRONG_TYPE.to_string())
}

#[async_trait]
impl Store for MemoryStore {
    async fn incr_by(&self, key: &str, delta: i64) -> DispatchResult<i64> {
        let now = Instant::now();
        let mut keys = self.keys.lock();
        purge_if_expired(&mut keys, key, now);

        let entry = keys
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Str("0".to_string())));

        match &mut entry.value {
            Value::Str(raw) => {
                let current = raw.parse::<i64>().map_err(|_| {
                    DispatchError::Store("ERR value is not an integer or out of range".to_string())
                })?;
                let next = current.checked_add(delta).ok_or_else(|| {
                    DispatchError::Store("ERR increment or decrement would overflow".to_string())
                })?;
                *raw = next.to_string();
                Ok(next)
            }
            _ => Err(wrong_type()),
        }
    }

    async fn get(&self, key: &str) -> DispatchResult<Option<String>> {
        let now = Instant::now();
        let mut keys = self.keys.lock();
        purge_if_expired(&mut keys, key, now);

        match keys.get(key) {
            Some(Entry { value: Value::Str(raw), .. }) => Ok(Some(raw.clone())),
            Some(_) => Err(wrong_type()),
            None => Ok(None),
        }
    }

    async fn hset_multiple(&self, key: &str, fields: &[(&str, Vec<u8>)]) -> DispatchResult<()> {
        let now = Instant::now();
        let mut keys = self.keys.lock();
        purge_if_expired(&mut keys, key, now);

        let entry = keys
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Hash(HashMap::new())));

        match &mut entry.value {
            Value::Hash(hash) => {
                for (field, value) in fields {
                    hash.insert(field.to_string(), value.clone());
                }
                Ok(())
            }
            _ => Err(wrong_type()),
        }
    }

    async fn hgetall(&self, key: &str) -> DispatchResult<HashMap<String, Vec<u8>>> {
        let now = Instant::now();
        let mut keys = self.keys.lock();
        purge_if_expired(&mut keys, key, now);

        match keys.get(key) {
            Some(Entry { value: Value::Hash(hash), .. }) => Ok(hash.clone()),
            Some(_) => Err(wrong_type()),
            None => Ok(HashMap::new()),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> DispatchResult<bool> {
        let now = Instant::now();
        let mut keys = self.keys.lock();
        purge_if_expired(&mut keys, key, now);

        match keys.get_mut(key) {
            Some(entry) => {
                // A ttl past the clock's range never fires
                entry.expires_at = now.checked_add(ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn rpush(&self, key: &str, value: &str) -> DispatchResult<usize> {
        let len = {
            let now = Instant::now();
            let mut keys = self.keys.lock();
            purge_if_expired(&mut keys, key, now);

            let entry = keys
                .entry(key.to_string())
                .or_insert_with(|| Entry::new(Value::List(VecDeque::new())));

            match &mut entry.value {
                Value::List(list) => {
                    list.push_back(value.to_string());
                    list.len()
                }
                _ => return Err(wrong_type()),
            }
        };

        self.list_pushed.notify_waiters();
        Ok(len)
    }

    async fn blpop(&self, keys: &[String], timeout: Duration) -> DispatchResult<Option<(String, String)>> {
        // `None` when the timeout is past the clock's range: wait until a push
        let deadline = Instant::now().checked_add(timeout);

        loop {
            // Register for wakeups before checking, so a push between the
            // check and the wait is not missed.
            let notified = self.list_pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(popped) = self.try_lpop_first(keys)? {
                return Ok(Some(popped));
            }

            let Some(deadline) = deadline else {
                notified.await;
                continue;
            };

            if Instant::now() >= deadline {
                return Ok(None);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_lpop_first(keys);
            }
        }
    }

    async fn llen(&self, key: &str) -> DispatchResult<usize> {
        let now = Instant::now();
        let mut keys = self.keys.lock();
        purge_if_expired(&mut keys, key, now);

        match keys.get(key) {
            Some(Entry { value: Value::List(list), .. }) => Ok(list.len()),
            Some(_) => Err(wrong_type()),
            None => Ok(0),
        }
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> DispatchResult<()> {
        let now = Instant::now();
        let mut keys = self.keys.lock();
        purge_if_expired(&mut keys, key, now);

        let entry = keys
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::ZSet(SortedSet::default())));

        match &mut entry.value {
            Value::ZSet(set) => {
                set.insert(member, score);
                Ok(())
            }
            _ => Err(wrong_type()),
        }
    }

    async fn zpop_min_if_due(&self, key: &str, max_score: i64) -> DispatchResult<Option<String>> {
        let now = Instant::now();
        let mut keys = self.keys.lock();
        purge_if_expired(&mut keys, key, now);

        let popped = match keys.get_mut(key) {
            Some(Entry { value: Value::ZSet(set), .. }) => {
                let popped = set.pop_min_if(max_score);
                if set.is_empty() {
                    keys.remove(key);
                }
                popped
            }
            Some(_) => return Err(wrong_type()),
            None => None,
        };

        Ok(popped)
    }

    async fn zcard(&self, key: &str) -> DispatchResult<usize> {
        let now = Instant::now();
        let mut keys = self.keys.lock();
        purge_if_expired(&mut keys, key, now);

        match keys.get(key) {
            Some(Entry { value: Value::ZSet(set), .. }) => Ok(set.len()),
            Some(_) => Err(wrong_type()),
            None => Ok(0),
        }
    }

    async fn publish(&self, channel: &str, message: &str) -> DispatchResult<usize> {
        let channels = self.channels.read();
        let receivers = channels
            .get(channel)
            .and_then(|sender| sender.send(message.to_string()).ok())
            .unwrap_or(0);
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> DispatchResult<BoxStream<String>> {
        let receiver = {
            let mut channels = self.channels.write();
            channels
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .subscribe()
        };

        let stream = BroadcastStream::new(receiver).filter_map(|result| result.ok());
        Ok(Box::pin(stream))
    }
}
