use async_trait::async_trait;
use notify_common::task::{ChannelType, ContentModel, TaskInfo};
use tracing::{info, warn};

use super::Handler;

/// Log-only email delivery.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmailHandler;

#[async_trait]
impl Handler for EmailHandler {
    fn channel_code(&self) -> i32 {
        ChannelType::Email.code()
    }

    async fn send(&self, task: &TaskInfo) -> bool {
        let Some(ContentModel::Email(email)) = &task.content else {
            warn!(message_id = %task.message_id, "email task without email content");
            return false;
        };

        for receiver in &task.receiver {
            info!(
                message_id = %task.message_id,
                template_id = task.message_template_id,
                receiver = %receiver,
                title = %email.title,
                "sending email"
            );
        }
        true
    }
}
