use async_trait::async_trait;
use notify_common::task::{ChannelType, ContentModel, TaskInfo};
use tracing::{info, warn};

use super::Handler;

/// Log-only SMS delivery.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmsHandler;

#[async_trait]
impl Handler for SmsHandler {
    fn channel_code(&self) -> i32 {
        ChannelType::Sms.code()
    }

    async fn send(&self, task: &TaskInfo) -> bool {
        let Some(ContentModel::Sms(sms)) = &task.content else {
            warn!(message_id = %task.message_id, "sms task without sms content");
            return false;
        };

        for receiver in &task.receiver {
            info!(
                message_id = %task.message_id,
                template_id = task.message_template_id,
                receiver = %receiver,
                content = %sms.content,
                url = sms.url.as_deref().unwrap_or_default(),
                "sending sms"
            );
        }
        true
    }
}
