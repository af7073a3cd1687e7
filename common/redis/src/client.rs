use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use std::time::Duration;

use crate::{Client, CustomRedisError};

/// Check-and-increment-with-expiry, run server side so the read, the
/// increment and the expiry happen as one indivisible step.
///
/// KEYS[1] counter key, ARGV[1] limit, ARGV[2] ttl in seconds.
/// Returns 1 when admitted, 0 when denied.
pub const CHECK_AND_INCR_SCRIPT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current >= tonumber(ARGV[1]) then
    return 0
end
current = redis.call('INCR', KEYS[1])
if current == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[2])
end
return 1
"#;

pub struct RedisClient {
    connection: MultiplexedConnection,
    check_and_incr: Script,
}

impl RedisClient {
    /// Create a new RedisClient without timeouts.
    ///
    /// Prefer `with_config` in services: the pipeline stages expect store calls
    /// to fail fast rather than block a worker.
    pub async fn new(addr: String) -> Result<RedisClient, CustomRedisError> {
        Self::with_config(addr, None, None).await
    }

    /// Create a new RedisClient with timeouts.
    ///
    /// # Arguments
    /// * `addr` - Redis connection string
    /// * `response_timeout` - Timeout for command responses. `None` blocks indefinitely.
    /// * `connection_timeout` - Timeout for establishing connections. `None` blocks indefinitely.
    ///
    /// # Errors
    /// Returns `CustomRedisError::InvalidConfiguration` if `Some(Duration::ZERO)` is passed - use `None` for no timeout instead.
    pub async fn with_config(
        addr: String,
        response_timeout: Option<Duration>,
        connection_timeout: Option<Duration>,
    ) -> Result<RedisClient, CustomRedisError> {
        let client = redis::Client::open(addr)?;

        if response_timeout.is_some_and(|t| t.is_zero()) {
            return Err(CustomRedisError::InvalidConfiguration(
                "Redis response timeout cannot be Duration::ZERO - use None for no timeout"
                    .to_string(),
            ));
        }
        if connection_timeout.is_some_and(|t| t.is_zero()) {
            return Err(CustomRedisError::InvalidConfiguration(
                "Redis connection timeout cannot be Duration::ZERO - use None for no timeout"
                    .to_string(),
            ));
        }

        let mut config = redis::AsyncConnectionConfig::new();
        if let Some(timeout) = response_timeout {
            config = config.set_response_timeout(timeout);
        }
        if let Some(timeout) = connection_timeout {
            config = config.set_connection_timeout(timeout);
        }

        let connection = client
            .get_multiplexed_async_connection_with_config(&config)
            .await?;

        Ok(RedisClient {
            connection,
            check_and_incr: Script::new(CHECK_AND_INCR_SCRIPT),
        })
    }
}

#[async_trait]
impl Client for RedisClient {
    async fn get(&self, k: String) -> Result<String, CustomRedisError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(k).await?;

        value.ok_or(CustomRedisError::NotFound)
    }

    async fn exists(&self, k: String) -> Result<bool, CustomRedisError> {
        let mut conn = self.connection.clone();
        let exists: bool = conn.exists(k).await?;
        Ok(exists)
    }

    async fn setex(&self, k: String, v: String, seconds: u64) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(k, v, seconds).await?;
        Ok(())
    }

    async fn set_nx_ex(
        &self,
        k: String,
        v: String,
        seconds: u64,
    ) -> Result<bool, CustomRedisError> {
        let mut conn = self.connection.clone();

        let result: Option<String> = redis::cmd("SET")
            .arg(&k)
            .arg(&v)
            .arg("EX")
            .arg(seconds)
            .arg("NX")
            .query_async(&mut conn)
            .await?;

        // SET ... NX replies nil when the key already existed
        Ok(result.is_some())
    }

    async fn del(&self, k: String) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(k).await?;
        Ok(())
    }

    async fn check_and_incr_expire(
        &self,
        k: String,
        limit: u64,
        ttl_seconds: u64,
    ) -> Result<bool, CustomRedisError> {
        let mut conn = self.connection.clone();

        // EVALSHA, falling back to EVAL (and caching the script) on NOSCRIPT
        let admitted: i64 = self
            .check_and_incr
            .key(k)
            .arg(limit)
            .arg(ttl_seconds)
            .invoke_async(&mut conn)
            .await?;

        Ok(admitted == 1)
    }
}
