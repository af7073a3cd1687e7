use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum CustomRedisError {
    #[error("Not found in redis")]
    NotFound,
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Timeout error")]
    Timeout,
    #[error(transparent)]
    Redis(#[from] Arc<redis::RedisError>),
}

impl From<redis::RedisError> for CustomRedisError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            CustomRedisError::Timeout
        } else {
            CustomRedisError::Redis(Arc::new(err))
        }
    }
}

/// The subset of the shared store used by the dispatch pipeline.
///
/// Every implementation must give `check_and_incr_expire` single-operation
/// semantics: concurrent callers, including callers in other processes, never
/// observe a read that is separated from its increment.
#[async_trait]
pub trait Client {
    async fn get(&self, k: String) -> Result<String, CustomRedisError>;
    async fn exists(&self, k: String) -> Result<bool, CustomRedisError>;
    async fn setex(&self, k: String, v: String, seconds: u64) -> Result<(), CustomRedisError>;
    /// `SET k v EX seconds NX`. Returns true when the key was written.
    async fn set_nx_ex(&self, k: String, v: String, seconds: u64)
        -> Result<bool, CustomRedisError>;
    async fn del(&self, k: String) -> Result<(), CustomRedisError>;

    /// Admit one more unit against `k` unless it already reached `limit`.
    ///
    /// Reads the counter (absent counts as 0). At or above `limit` nothing is
    /// written and `false` is returned. Otherwise the counter is incremented,
    /// the expiry is set to `ttl_seconds` only when the counter goes from 0 to
    /// 1, and `true` is returned.
    async fn check_and_incr_expire(
        &self,
        k: String,
        limit: u64,
        ttl_seconds: u64,
    ) -> Result<bool, CustomRedisError>;
}

mod client;
mod mock;

pub use client::{RedisClient, CHECK_AND_INCR_SCRIPT};
pub use mock::{MockRedisCall, MockRedisClient, MockRedisValue};
