use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use common_redis::RedisClient;
use futures::FutureExt;
use notify_common::pipeline::{ProcessContext, ProcessController};
use notify_common::task::{TaskBatch, TaskInfo};
use tracing::{debug, error, info, warn};

use crate::clock::SystemClock;
use crate::config::Config;
use crate::error::{TaskError, WorkerError};
use crate::handlers::HandlerRegistry;
use crate::metrics_consts::{
    CONTENT_DROPPED, TASKS_COMPLETED, TASKS_FAILED, TASKS_PANICKED, TASKS_RECEIVED,
    TASKS_REJECTED, TASKS_STOPPED, TASKS_WITHOUT_RECEIVERS,
};
use crate::pool::{panic_message, PoolClosed, WorkerPool};
use crate::sensitive::{load_words, SensitiveWordTrie};
use crate::stages::{build_controller, StageDeps, HANDLER_CODE};

pub struct AppContext {
    controller: ProcessController<TaskInfo>,
}

impl AppContext {
    /// Connect to the shared store and assemble the send pipeline.
    pub async fn new(config: &Config) -> Result<Self, WorkerError> {
        let redis = RedisClient::with_config(
            config.redis.redis_url.clone(),
            Some(config.redis.redis_response_timeout_ms.0),
            Some(config.redis.redis_connection_timeout_ms.0),
        )
        .await?;

        let words = load_words(
            config
                .sensitive_words
                .sensitive_words_path
                .as_deref()
                .map(Path::new),
        );
        let trie = SensitiveWordTrie::new(&words);
        info!(words = trie.len(), "sensitive word trie built");

        let registry = HandlerRegistry::with_default_handlers();
        info!(channels = ?registry.channel_codes(), "handlers registered");

        Self::with_deps(
            config,
            StageDeps {
                redis: Arc::new(redis),
                clock: Arc::new(SystemClock),
                trie: Arc::new(trie),
                registry: Arc::new(registry),
            },
        )
    }

    pub fn with_deps(config: &Config, deps: StageDeps) -> Result<Self, WorkerError> {
        Ok(Self {
            controller: build_controller(config, deps)?,
        })
    }

    /// Run the send pipeline for one task.
    ///
    /// Stage errors and panics end here: they are logged against the task's
    /// message id and returned, and the task is not retried.
    pub async fn process_task(
        &self,
        task: TaskInfo,
    ) -> Result<ProcessContext<TaskInfo>, TaskError> {
        let message_id = task.message_id.clone();
        let context = ProcessContext::new(HANDLER_CODE, task);

        match AssertUnwindSafe(self.controller.process(context))
            .catch_unwind()
            .await
        {
            Ok(Ok(context)) => {
                if context.need_break {
                    debug!(
                        message_id = %message_id,
                        reason = %context.response.msg,
                        "task stopped before dispatch"
                    );
                    metrics::counter!(TASKS_STOPPED).increment(1);
                } else {
                    metrics::counter!(TASKS_COMPLETED).increment(1);
                }
                Ok(context)
            }
            Ok(Err(e)) => {
                error!(message_id = %message_id, error = %e, "task failed, dropping it");
                metrics::counter!(TASKS_FAILED).increment(1);
                Err(TaskError::Process(e))
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(message_id = %message_id, reason = %reason, "task panicked, dropping it");
                metrics::counter!(TASKS_PANICKED).increment(1);
                Err(TaskError::Panicked(reason))
            }
        }
    }
}

/// Submit every runnable task of `batch` to `pool`, returning how many were
/// submitted. Rejected tasks and tasks without receivers are logged and
/// skipped.
pub async fn submit_batch(
    context: &Arc<AppContext>,
    pool: &WorkerPool,
    batch: TaskBatch,
) -> Result<usize, PoolClosed> {
    for rejected in &batch.rejected {
        warn!(error = %rejected, "dropping malformed task");
    }
    metrics::counter!(TASKS_REJECTED).increment(batch.rejected.len() as u64);

    if batch.content_dropped > 0 {
        warn!(
            count = batch.content_dropped,
            "content did not match its channel and was dropped"
        );
        metrics::counter!(CONTENT_DROPPED).increment(batch.content_dropped as u64);
    }

    let mut submitted = 0;
    for task in batch.tasks {
        metrics::counter!(TASKS_RECEIVED).increment(1);
        if task.receiver.is_empty() {
            warn!(message_id = %task.message_id, "task has no receivers, dropping it");
            metrics::counter!(TASKS_WITHOUT_RECEIVERS).increment(1);
            continue;
        }

        let context = context.clone();
        pool.submit(async move {
            // Failures are logged and counted inside process_task
            context.process_task(task).await.ok();
        })
        .await?;
        submitted += 1;
    }

    Ok(submitted)
}
