//! Channel delivery implementations and the registry that routes to them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use notify_common::task::TaskInfo;
use tracing::warn;

mod email;
mod sms;

pub use email::EmailHandler;
pub use sms::SmsHandler;

/// Delivers a task over one channel.
#[async_trait]
pub trait Handler: Send + Sync {
    /// The `sendChannel` code this handler serves.
    fn channel_code(&self) -> i32;

    /// Returns whether the provider accepted the task.
    async fn send(&self, task: &TaskInfo) -> bool;
}

#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<i32, Arc<dyn Handler>>,
}

impl HandlerRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under its channel code. A later registration for
    /// the same code replaces the earlier one.
    pub fn register(mut self, handler: Arc<dyn Handler>) -> Self {
        let code = handler.channel_code();
        if self.handlers.insert(code, handler).is_some() {
            warn!(channel_code = code, "replacing handler registered for channel");
        }
        self
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: self.handlers,
        }
    }
}

/// Immutable channel code to handler map, shared across workers.
pub struct HandlerRegistry {
    handlers: HashMap<i32, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::new()
    }

    /// The registry served in production: SMS and email.
    pub fn with_default_handlers() -> Self {
        Self::builder()
            .register(Arc::new(SmsHandler))
            .register(Arc::new(EmailHandler))
            .build()
    }

    pub fn route(&self, channel_code: i32) -> Option<&Arc<dyn Handler>> {
        self.handlers.get(&channel_code)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn channel_codes(&self) -> Vec<i32> {
        let mut codes: Vec<i32> = self.handlers.keys().copied().collect();
        codes.sort_unstable();
        codes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify_common::task::ChannelType;

    struct Fixed {
        code: i32,
        accept: bool,
    }

    #[async_trait]
    impl Handler for Fixed {
        fn channel_code(&self) -> i32 {
            self.code
        }

        async fn send(&self, _task: &TaskInfo) -> bool {
            self.accept
        }
    }

    #[test]
    fn test_default_handlers() {
        let registry = HandlerRegistry::with_default_handlers();

        assert_eq!(
            registry.channel_codes(),
            vec![ChannelType::Sms.code(), ChannelType::Email.code()]
        );
        assert!(registry.route(ChannelType::Im.code()).is_none());
        assert!(registry.route(ChannelType::Push.code()).is_none());
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let registry = HandlerRegistry::builder()
            .register(Arc::new(Fixed {
                code: 30,
                accept: false,
            }))
            .register(Arc::new(Fixed {
                code: 30,
                accept: true,
            }))
            .build();

        assert_eq!(registry.len(), 1);

        let task = TaskInfo {
            message_id: "m".to_string(),
            business_id: None,
            message_template_id: 1,
            receiver: ["r".to_string()].into(),
            send_channel: Some(30),
            msg_type: None,
            content: None,
            send_account: None,
        };
        let handler = registry.route(30).unwrap();
        assert!(handler.send(&task).await);
    }
}
