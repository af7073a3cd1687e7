use std::sync::{Arc, Weak};

use async_trait::async_trait;
use notify_common::task::{parse_task_batch, TaskBatch};
use rdkafka::{
    consumer::{Consumer, StreamConsumer},
    error::KafkaError,
    ClientConfig, Message,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::app_context::{submit_batch, AppContext};
use crate::config::KafkaConfig;
use crate::error::RecvErr;
use crate::metrics_consts::{EMPTY_MESSAGES, MESSAGES_RECEIVED, MESSAGE_PARSE_ERROR};
use crate::pool::WorkerPool;

/// Where task batches come from.
#[async_trait]
pub trait TaskSource: Send + Sync {
    async fn recv_batch(&self) -> Result<(TaskBatch, Offset), RecvErr>;
}

/// Consumer for the send-task topic. Offsets are stored explicitly once a
/// message has been handed off, never automatically.
#[derive(Clone)]
pub struct TaskConsumer {
    inner: Arc<Inner>,
}

struct Inner {
    consumer: StreamConsumer,
    topic: String,
}

impl TaskConsumer {
    pub fn new(config: &KafkaConfig) -> Result<Self, KafkaError> {
        let consumer: StreamConsumer = ClientConfig::from(config).create()?;
        consumer.subscribe(&[config.kafka_consumer_topic.as_str()])?;

        Ok(Self {
            inner: Arc::new(Inner {
                consumer,
                topic: config.kafka_consumer_topic.clone(),
            }),
        })
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }
}

#[async_trait]
impl TaskSource for TaskConsumer {
    /// Receive one message and decode it as a task batch.
    ///
    /// Messages that cannot be decoded at all have their offset stored before
    /// the error is returned, so they are not redelivered.
    async fn recv_batch(&self) -> Result<(TaskBatch, Offset), RecvErr> {
        let message = self.inner.consumer.recv().await?;

        let offset = Offset {
            handle: Arc::downgrade(&self.inner),
            partition: message.partition(),
            offset: message.offset(),
        };

        let Some(payload) = message.payload() else {
            offset.store()?;
            return Err(RecvErr::Empty);
        };

        match parse_task_batch(payload) {
            Ok(batch) => Ok((batch, offset)),
            Err(e) => {
                offset.store()?;
                Err(RecvErr::Parse(e))
            }
        }
    }
}

pub struct Offset {
    handle: Weak<Inner>,
    partition: i32,
    offset: i64,
}

impl Offset {
    /// An offset with no consumer behind it. Storing it does nothing.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Offset {
            handle: Weak::new(),
            partition: -1,
            offset: -1,
        }
    }

    pub fn store(self) -> Result<(), KafkaError> {
        // The consumer is gone only during shutdown; nothing left to commit to
        let Some(inner) = self.handle.upgrade() else {
            return Ok(());
        };
        inner
            .consumer
            .store_offset(&inner.topic, self.partition, self.offset)
    }
}

/// Feed batches from `source` into `pool` until `cancel` fires.
///
/// Cancellation is only observed while waiting for the next message. A batch
/// already received is submitted in full, including any task the pool runs on
/// this task when saturated, and its offset stored.
pub async fn run_consumer<S: TaskSource>(
    source: &S,
    context: Arc<AppContext>,
    pool: &WorkerPool,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Consumer stopping");
                return;
            }
            received = source.recv_batch() => received,
        };

        let (batch, offset) = match received {
            Ok(r) => r,
            Err(RecvErr::Empty) => {
                warn!("Received empty message");
                metrics::counter!(EMPTY_MESSAGES).increment(1);
                continue;
            }
            Err(RecvErr::Parse(e)) => {
                warn!("Failed to parse message: {}", e);
                metrics::counter!(MESSAGE_PARSE_ERROR).increment(1);
                continue;
            }
            Err(RecvErr::Kafka(e)) => {
                panic!("Kafka error: {e:?}"); // If kafka is down, we're down
            }
        };
        metrics::counter!(MESSAGES_RECEIVED).increment(1);

        if submit_batch(&context, pool, batch).await.is_err() {
            warn!("Worker pool closed, stopping consumer");
            return;
        }

        // Same reasoning as the panic above
        offset.store().expect("Failed to store offset");
    }
}
