use std::sync::Arc;

use async_trait::async_trait;
use notify_common::pipeline::{
    BusinessProcess, ProcessContext, ProcessError, ProcessResult, RespStatus,
};
use notify_common::task::{ChannelType, TaskInfo};
use tracing::{error, info, warn};

use crate::handlers::HandlerRegistry;
use crate::metrics_consts::{DISPATCH_RESULT, DISPATCH_UNROUTABLE};

/// Terminal stage: hands the task to the handler for its channel.
pub struct SendMessageStage {
    registry: Arc<HandlerRegistry>,
}

impl SendMessageStage {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }
}

fn channel_label(code: i32) -> String {
    match ChannelType::from_code(code) {
        Some(channel) => channel.as_str().to_string(),
        None => code.to_string(),
    }
}

#[async_trait]
impl BusinessProcess<TaskInfo> for SendMessageStage {
    fn name(&self) -> &'static str {
        "send_message"
    }

    async fn process(&self, context: &mut ProcessContext<TaskInfo>) -> Result<(), ProcessError> {
        let task = &context.model;
        let Some(handler) = task
            .send_channel
            .and_then(|code| self.registry.route(code))
        else {
            error!(
                message_id = %task.message_id,
                send_channel = ?task.send_channel,
                "no handler registered for channel, task not sent"
            );
            metrics::counter!(DISPATCH_UNROUTABLE).increment(1);
            return Ok(());
        };

        let channel = channel_label(handler.channel_code());
        let sent = handler.send(task).await;
        if sent {
            info!(
                message_id = %task.message_id,
                channel = %channel,
                receivers = task.receiver.len(),
                "task dispatched"
            );
        } else {
            warn!(
                message_id = %task.message_id,
                channel = %channel,
                "handler failed to send task"
            );
            context.response = ProcessResult::with_msg(RespStatus::Fail, "handler failed to send task");
        }

        let outcome = if sent { "success" } else { "failure" };
        let labels = [("channel", channel), ("outcome", outcome.to_string())];
        metrics::counter!(DISPATCH_RESULT, &labels).increment(1);
        Ok(())
    }
}
