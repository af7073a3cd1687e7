#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use common_redis::MockRedisClient;
use envconfig::Envconfig;
use notify_common::task::{ChannelType, ContentModel, MessageType, SmsContent, TaskInfo};
use notify_worker::app_context::AppContext;
use notify_worker::clock::FixedClock;
use notify_worker::config::Config;
use notify_worker::handlers::{Handler, HandlerRegistry};
use notify_worker::sensitive::{SensitiveWordTrie, BASELINE_WORDS};
use notify_worker::stages::StageDeps;

/// Records every task that reaches it, and panics on `panic_on`.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    pub sent: Arc<Mutex<Vec<TaskInfo>>>,
    pub panic_on: Option<String>,
}

impl RecordingHandler {
    pub fn panicking_on(message_id: &str) -> Self {
        Self {
            panic_on: Some(message_id.to_string()),
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<TaskInfo> {
        self.sent.lock().unwrap().clone()
    }

    pub fn delivered_receivers(&self) -> usize {
        self.sent().iter().map(|t| t.receiver.len()).sum()
    }
}

#[async_trait]
impl Handler for RecordingHandler {
    fn channel_code(&self) -> i32 {
        ChannelType::Sms.code()
    }

    async fn send(&self, task: &TaskInfo) -> bool {
        if self.panic_on.as_deref() == Some(task.message_id.as_str()) {
            panic!("provider blew up on {}", task.message_id);
        }
        self.sent.lock().unwrap().push(task.clone());
        true
    }
}

pub struct Harness {
    pub context: Arc<AppContext>,
    pub redis: MockRedisClient,
    pub clock: FixedClock,
    pub handler: RecordingHandler,
}

pub fn noon() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, 20)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

pub fn config(overrides: &[(&str, &str)]) -> Config {
    let env: HashMap<String, String> = overrides
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let config = Config::init_from_hashmap(&env).unwrap();
    config.validate().unwrap();
    config
}

pub fn harness(overrides: &[(&str, &str)]) -> Harness {
    harness_with(overrides, RecordingHandler::default())
}

pub fn harness_with(overrides: &[(&str, &str)], handler: RecordingHandler) -> Harness {
    let redis = MockRedisClient::new();
    let clock = FixedClock::new(noon());

    let registry = HandlerRegistry::builder()
        .register(Arc::new(handler.clone()))
        .build();

    let context = AppContext::with_deps(
        &config(overrides),
        StageDeps {
            redis: Arc::new(redis.clone()),
            clock: Arc::new(clock.clone()),
            trie: Arc::new(SensitiveWordTrie::new(BASELINE_WORDS)),
            registry: Arc::new(registry),
        },
    )
    .unwrap();

    Harness {
        context: Arc::new(context),
        redis,
        clock,
        handler,
    }
}

pub fn sms_task(message_id: &str, receivers: &[&str], text: &str) -> TaskInfo {
    TaskInfo {
        message_id: message_id.to_string(),
        business_id: Some(1_000_000_120_240_520),
        message_template_id: 1,
        receiver: receivers.iter().map(|r| r.to_string()).collect(),
        send_channel: Some(ChannelType::Sms.code()),
        msg_type: Some(MessageType::Notice),
        content: Some(ContentModel::Sms(SmsContent {
            content: text.to_string(),
            url: None,
        })),
        send_account: None,
    }
}
