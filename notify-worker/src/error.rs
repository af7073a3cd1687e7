use common_redis::CustomRedisError;
use notify_common::pipeline::ProcessError;
use notify_common::task::TaskParseError;
use rdkafka::error::KafkaError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised while building the send pipeline.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("could not reach the shared store: {0}")]
    Redis(#[from] CustomRedisError),
}

/// Why a single queue receive produced no tasks.
#[derive(Error, Debug)]
pub enum RecvErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("could not parse task batch: {0}")]
    Parse(#[from] TaskParseError),
    #[error("Received empty payload")]
    Empty,
}

/// How a single task run ended, when it did not run to completion.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("task panicked: {0}")]
    Panicked(String),
}
