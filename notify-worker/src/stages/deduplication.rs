use std::sync::Arc;

use async_trait::async_trait;
use common_redis::{Client, CustomRedisError};
use notify_common::pipeline::{BusinessProcess, ProcessContext, ProcessError, RespStatus};
use notify_common::task::{ContentModel, TaskInfo};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::{DedupConfig, DedupMode};
use crate::metrics_consts::{DEDUP_STORE_ERRORS, DEDUP_SUPPRESSED};

pub const DEDUP_KEY_PREFIX: &str = "notify:dedup:";

/// Hex sha256 of the canonical content JSON. Absent content hashes the empty
/// string.
pub fn content_hash(content: Option<&ContentModel>) -> String {
    let canonical = content.map(ContentModel::canonical_json).unwrap_or_default();
    format!("{:x}", Sha256::digest(canonical.as_bytes()))
}

pub fn dedup_key(template_id: i64, receiver: &str, content_hash: &str) -> String {
    format!("{DEDUP_KEY_PREFIX}{template_id}:{receiver}:{content_hash}")
}

/// Suppresses a receiver that was already sent identical content from the
/// same template within the expiry window.
pub struct DeduplicationStage {
    redis: Arc<dyn Client + Send + Sync>,
    expire_seconds: u64,
    mode: DedupMode,
    fail_open: bool,
}

impl DeduplicationStage {
    pub fn new(redis: Arc<dyn Client + Send + Sync>, config: &DedupConfig) -> Self {
        Self {
            redis,
            expire_seconds: config.dedup_expire_seconds,
            mode: config.dedup_mode,
            fail_open: config.dedup_fail_open,
        }
    }

    /// Returns true when this is the first send of the window, recording it.
    async fn first_send(&self, key: String) -> Result<bool, CustomRedisError> {
        match self.mode {
            DedupMode::CheckThenSet => {
                if self.redis.exists(key.clone()).await? {
                    return Ok(false);
                }
                self.redis
                    .setex(key, "1".to_string(), self.expire_seconds)
                    .await?;
                Ok(true)
            }
            DedupMode::Atomic => {
                self.redis
                    .set_nx_ex(key, "1".to_string(), self.expire_seconds)
                    .await
            }
        }
    }
}

#[async_trait]
impl BusinessProcess<TaskInfo> for DeduplicationStage {
    fn name(&self) -> &'static str {
        "deduplication"
    }

    async fn process(&self, context: &mut ProcessContext<TaskInfo>) -> Result<(), ProcessError> {
        let hash = content_hash(context.model.content.as_ref());
        let template_id = context.model.message_template_id;
        let receivers = std::mem::take(&mut context.model.receiver);

        for receiver in receivers {
            let key = dedup_key(template_id, &receiver, &hash);
            let keep = match self.first_send(key).await {
                Ok(true) => true,
                Ok(false) => {
                    debug!(
                        message_id = %context.model.message_id,
                        receiver = %receiver,
                        "duplicate send suppressed"
                    );
                    metrics::counter!(DEDUP_SUPPRESSED).increment(1);
                    false
                }
                Err(e) => {
                    warn!(
                        message_id = %context.model.message_id,
                        receiver = %receiver,
                        error = %e,
                        fail_open = self.fail_open,
                        "dedup check failed"
                    );
                    metrics::counter!(DEDUP_STORE_ERRORS).increment(1);
                    self.fail_open
                }
            };

            if keep {
                context.model.receiver.insert(receiver);
            }
        }

        if context.model.receiver.is_empty() {
            context.break_with(RespStatus::Fail, "deduplication: no receivers left");
        }
        Ok(())
    }
}
