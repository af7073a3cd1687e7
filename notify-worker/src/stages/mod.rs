//! The stages of the dispatch pipeline, in the order they run.

use std::sync::Arc;

use common_redis::Client;
use notify_common::pipeline::{BusinessProcess, ProcessController, ProcessTemplate};
use notify_common::task::TaskInfo;

use crate::clock::Clock;
use crate::config::{Config, ConfigError};
use crate::handlers::HandlerRegistry;
use crate::sensitive::SensitiveWordTrie;

pub mod deduplication;
pub mod frequency_limit;
pub mod quiet_hours;
pub mod send_message;
pub mod sensitive_words;

pub use deduplication::DeduplicationStage;
pub use frequency_limit::FrequencyLimitStage;
pub use quiet_hours::{QuietHoursStage, QuietHoursWindow};
pub use send_message::SendMessageStage;
pub use sensitive_words::SensitiveWordStage;

/// Business code of the send pipeline.
pub const HANDLER_CODE: &str = "handler";

/// Everything the stages share, resolved once at startup.
pub struct StageDeps {
    pub redis: Arc<dyn Client + Send + Sync>,
    pub clock: Arc<dyn Clock>,
    pub trie: Arc<SensitiveWordTrie>,
    pub registry: Arc<HandlerRegistry>,
}

/// quiet hours, frequency limit, deduplication, sensitive words, dispatch.
pub fn handler_template(
    config: &Config,
    deps: StageDeps,
) -> Result<ProcessTemplate<TaskInfo>, ConfigError> {
    let mask = config.sensitive_words.mask()?;

    let stages: Vec<Arc<dyn BusinessProcess<TaskInfo>>> = vec![
        Arc::new(QuietHoursStage::from_config(&config.quiet_hours, deps.clock.clone())),
        Arc::new(FrequencyLimitStage::new(
            deps.redis.clone(),
            deps.clock,
            &config.frequency_limit,
        )),
        Arc::new(DeduplicationStage::new(deps.redis, &config.dedup)),
        Arc::new(SensitiveWordStage::new(
            deps.trie,
            config.sensitive_words.sensitive_words_enabled,
            mask,
        )),
        Arc::new(SendMessageStage::new(deps.registry)),
    ];

    Ok(ProcessTemplate::new(stages))
}

pub fn build_controller(
    config: &Config,
    deps: StageDeps,
) -> Result<ProcessController<TaskInfo>, ConfigError> {
    Ok(ProcessController::builder()
        .template(HANDLER_CODE, handler_template(config, deps)?)
        .build())
}
