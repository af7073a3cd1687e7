use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use common_redis::{Client, CustomRedisError};
use notify_common::pipeline::{BusinessProcess, ProcessContext, ProcessError, RespStatus};
use notify_common::task::TaskInfo;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::FrequencyLimitConfig;
use crate::metrics_consts::{FREQUENCY_LIMITED, FREQUENCY_STORE_ERRORS};

pub const FREQ_KEY_PREFIX: &str = "notify:freq:";

const DAY_TTL_SECONDS: u64 = 86_400;
const HOUR_TTL_SECONDS: u64 = 3_600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Day,
    Hour,
}

impl Window {
    fn dimension(&self) -> &'static str {
        match self {
            Window::Day => "day",
            Window::Hour => "hour",
        }
    }

    fn bucket(&self, now: NaiveDateTime) -> String {
        match self {
            Window::Day => now.format("%Y%m%d").to_string(),
            Window::Hour => now.format("%Y%m%d%H").to_string(),
        }
    }

    fn ttl_seconds(&self) -> u64 {
        match self {
            Window::Day => DAY_TTL_SECONDS,
            Window::Hour => HOUR_TTL_SECONDS,
        }
    }
}

pub fn frequency_key(window: Window, template_id: i64, receiver: &str, now: NaiveDateTime) -> String {
    format!(
        "{FREQ_KEY_PREFIX}{}:{template_id}:{receiver}:{}",
        window.dimension(),
        window.bucket(now)
    )
}

/// Caps how many sends each receiver gets per template per day and per hour.
pub struct FrequencyLimitStage {
    redis: Arc<dyn Client + Send + Sync>,
    clock: Arc<dyn Clock>,
    enabled: bool,
    day_max: u64,
    hour_max: u64,
}

impl FrequencyLimitStage {
    pub fn new(
        redis: Arc<dyn Client + Send + Sync>,
        clock: Arc<dyn Clock>,
        config: &FrequencyLimitConfig,
    ) -> Self {
        Self {
            redis,
            clock,
            enabled: config.frequency_limit_enabled,
            day_max: config.frequency_limit_day_max,
            hour_max: config.frequency_limit_hour_max,
        }
    }

    fn limit(&self, window: Window) -> u64 {
        match window {
            Window::Day => self.day_max,
            Window::Hour => self.hour_max,
        }
    }

    /// Store failures admit the receiver.
    async fn admit(
        &self,
        window: Window,
        template_id: i64,
        receiver: &str,
        now: NaiveDateTime,
    ) -> bool {
        let key = frequency_key(window, template_id, receiver, now);
        match self
            .redis
            .check_and_incr_expire(key, self.limit(window), window.ttl_seconds())
            .await
        {
            Ok(admitted) => admitted,
            Err(e) => {
                log_store_error(window, receiver, &e);
                true
            }
        }
    }
}

fn log_store_error(window: Window, receiver: &str, e: &CustomRedisError) {
    warn!(
        window = window.dimension(),
        receiver,
        error = %e,
        "frequency limit check failed, letting receiver through"
    );
    metrics::counter!(FREQUENCY_STORE_ERRORS, &[("window", window.dimension())]).increment(1);
}

#[async_trait]
impl BusinessProcess<TaskInfo> for FrequencyLimitStage {
    fn name(&self) -> &'static str {
        "frequency_limit"
    }

    async fn process(&self, context: &mut ProcessContext<TaskInfo>) -> Result<(), ProcessError> {
        if !self.enabled {
            return Ok(());
        }

        let now = self.clock.now();
        let template_id = context.model.message_template_id;
        let receivers = std::mem::take(&mut context.model.receiver);

        for receiver in receivers {
            // The hour window is only consulted once the day window admits
            let admitted = self.admit(Window::Day, template_id, &receiver, now).await
                && self.admit(Window::Hour, template_id, &receiver, now).await;

            if admitted {
                context.model.receiver.insert(receiver);
            } else {
                debug!(
                    message_id = %context.model.message_id,
                    receiver = %receiver,
                    "receiver over frequency limit"
                );
                metrics::counter!(FREQUENCY_LIMITED).increment(1);
            }
        }

        if context.model.receiver.is_empty() {
            context.break_with(RespStatus::Fail, "frequency limit: no receivers left");
        }
        Ok(())
    }
}
