use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::{Client, CustomRedisError};

/// In-memory stand-in for the shared store.
///
/// Unlike a canned-response mock, this keeps real state so pipeline tests can
/// observe counters filling up and dedup keys expiring. Clones share state,
/// which is how several "process instances" are simulated in tests. Errors can
/// be injected per operation name (`"get"`, `"exists"`, `"setex"`,
/// `"set_nx_ex"`, `"del"`, `"check_and_incr_expire"`).
#[derive(Clone, Default)]
pub struct MockRedisClient {
    store: Arc<Mutex<HashMap<String, MockEntry>>>,
    errors: Arc<Mutex<HashMap<String, CustomRedisError>>>,
    calls: Arc<Mutex<Vec<MockRedisCall>>>,
}

#[derive(Debug, Clone)]
struct MockEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MockEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockRedisValue {
    None,
    StringWithTTL(String, u64),
    LimitWithTTL(u64, u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockRedisCall {
    pub op: String,
    pub key: String,
    pub value: MockRedisValue,
}

// A poisoned lock only means another test thread panicked mid-call; the map
// itself is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MockRedisClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a key without a TTL.
    pub fn with_value(&mut self, key: &str, value: &str) -> Self {
        lock(&self.store).insert(
            key.to_owned(),
            MockEntry {
                value: value.to_owned(),
                expires_at: None,
            },
        );
        self.clone()
    }

    /// Make every call to `op` fail with `err` until `clear_errors` is called.
    pub fn fail_op(&mut self, op: &str, err: CustomRedisError) -> Self {
        lock(&self.errors).insert(op.to_owned(), err);
        self.clone()
    }

    pub fn clear_errors(&self) {
        lock(&self.errors).clear();
    }

    pub fn get_calls(&self) -> Vec<MockRedisCall> {
        lock(&self.calls).clone()
    }

    /// Current live value of a key, bypassing call recording.
    pub fn value(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        lock(&self.store)
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    /// Remaining TTL of a key in whole seconds, rounded up.
    pub fn ttl(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        lock(&self.store)
            .get(key)
            .filter(|entry| entry.is_live(now))
            .and_then(|entry| entry.expires_at)
            .map(|at| {
                let remaining = at.saturating_duration_since(now);
                remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0)
            })
    }

    /// Live keys starting with `prefix`, sorted.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = lock(&self.store)
            .iter()
            .filter(|(k, entry)| k.starts_with(prefix) && entry.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Drop a key's expiry deadline into the past, as if its window elapsed.
    pub fn expire_now(&self, key: &str) {
        if let Some(entry) = lock(&self.store).get_mut(key) {
            entry.expires_at = Some(Instant::now() - Duration::from_millis(1));
        }
    }

    fn record(&self, op: &str, key: &str, value: MockRedisValue) -> Result<(), CustomRedisError> {
        lock(&self.calls).push(MockRedisCall {
            op: op.to_string(),
            key: key.to_string(),
            value,
        });

        match lock(&self.errors).get(op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Client for MockRedisClient {
    async fn get(&self, key: String) -> Result<String, CustomRedisError> {
        self.record("get", &key, MockRedisValue::None)?;

        self.value(&key).ok_or(CustomRedisError::NotFound)
    }

    async fn exists(&self, key: String) -> Result<bool, CustomRedisError> {
        self.record("exists", &key, MockRedisValue::None)?;

        Ok(self.value(&key).is_some())
    }

    async fn setex(&self, key: String, value: String, seconds: u64) -> Result<(), CustomRedisError> {
        self.record(
            "setex",
            &key,
            MockRedisValue::StringWithTTL(value.clone(), seconds),
        )?;

        lock(&self.store).insert(
            key,
            MockEntry {
                value,
                expires_at: Some(Instant::now() + Duration::from_secs(seconds)),
            },
        );
        Ok(())
    }

    async fn set_nx_ex(
        &self,
        key: String,
        value: String,
        seconds: u64,
    ) -> Result<bool, CustomRedisError> {
        self.record(
            "set_nx_ex",
            &key,
            MockRedisValue::StringWithTTL(value.clone(), seconds),
        )?;

        let now = Instant::now();
        let mut store = lock(&self.store);
        if store.get(&key).is_some_and(|entry| entry.is_live(now)) {
            return Ok(false);
        }
        store.insert(
            key,
            MockEntry {
                value,
                expires_at: Some(now + Duration::from_secs(seconds)),
            },
        );
        Ok(true)
    }

    async fn del(&self, key: String) -> Result<(), CustomRedisError> {
        self.record("del", &key, MockRedisValue::None)?;

        lock(&self.store).remove(&key);
        Ok(())
    }

    async fn check_and_incr_expire(
        &self,
        key: String,
        limit: u64,
        ttl_seconds: u64,
    ) -> Result<bool, CustomRedisError> {
        self.record(
            "check_and_incr_expire",
            &key,
            MockRedisValue::LimitWithTTL(limit, ttl_seconds),
        )?;

        // One lock acquisition for read, increment and expiry, mirroring the
        // single script execution on a real server.
        let now = Instant::now();
        let mut store = lock(&self.store);

        let live = store.get(&key).filter(|entry| entry.is_live(now));
        let current = match live {
            Some(entry) => entry.value.parse::<u64>().map_err(|_| {
                CustomRedisError::ParseError(format!("value at {key} is not an integer"))
            })?,
            None => 0,
        };
        if current >= limit {
            return Ok(false);
        }

        let expires_at = match live {
            Some(entry) if current > 0 => entry.expires_at,
            _ => Some(now + Duration::from_secs(ttl_seconds)),
        };
        store.insert(
            key,
            MockEntry {
                value: (current + 1).to_string(),
                expires_at,
            },
        );
        Ok(true)
    }
}
