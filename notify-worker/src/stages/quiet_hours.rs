use std::sync::Arc;

use async_trait::async_trait;
use chrono::Timelike;
use notify_common::pipeline::{BusinessProcess, ProcessContext, ProcessError, RespStatus};
use notify_common::task::TaskInfo;
use tracing::info;

use crate::clock::Clock;
use crate::config::QuietHoursConfig;
use crate::metrics_consts::QUIET_HOURS_BLOCKED;

/// Half-open range of wall-clock hours, wrapping past midnight when
/// `start > end`. `start == end` is an empty window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietHoursWindow {
    start_hour: u32,
    end_hour: u32,
}

impl QuietHoursWindow {
    pub fn new(start_hour: u32, end_hour: u32) -> Self {
        Self {
            start_hour,
            end_hour,
        }
    }

    pub fn contains(&self, hour: u32) -> bool {
        if self.start_hour > self.end_hour {
            hour >= self.start_hour || hour < self.end_hour
        } else {
            hour >= self.start_hour && hour < self.end_hour
        }
    }
}

/// Drops marketing messages sent inside the quiet window.
pub struct QuietHoursStage {
    enabled: bool,
    window: QuietHoursWindow,
    clock: Arc<dyn Clock>,
}

impl QuietHoursStage {
    pub fn new(enabled: bool, window: QuietHoursWindow, clock: Arc<dyn Clock>) -> Self {
        Self {
            enabled,
            window,
            clock,
        }
    }

    pub fn from_config(config: &QuietHoursConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            config.quiet_hours_enabled,
            QuietHoursWindow::new(config.quiet_hours_start_hour, config.quiet_hours_end_hour),
            clock,
        )
    }
}

#[async_trait]
impl BusinessProcess<TaskInfo> for QuietHoursStage {
    fn name(&self) -> &'static str {
        "quiet_hours"
    }

    async fn process(&self, context: &mut ProcessContext<TaskInfo>) -> Result<(), ProcessError> {
        if !self.enabled || !context.model.is_marketing() {
            return Ok(());
        }

        let hour = self.clock.now().hour();
        if self.window.contains(hour) {
            info!(
                message_id = %context.model.message_id,
                hour,
                "marketing message dropped inside quiet hours"
            );
            metrics::counter!(QUIET_HOURS_BLOCKED).increment(1);
            context.break_with(
                RespStatus::Fail,
                format!("quiet hours: marketing messages are not sent at hour {hour}"),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::NaiveDate;
    use notify_common::task::MessageType;
    use test_case::test_case;

    fn at_hour(hour: u32) -> FixedClock {
        FixedClock::new(
            NaiveDate::from_ymd_opt(2024, 6, 1)
                .unwrap()
                .and_hms_opt(hour, 30, 0)
                .unwrap(),
        )
    }

    fn context(msg_type: MessageType) -> ProcessContext<TaskInfo> {
        ProcessContext::new(
            "handler",
            TaskInfo {
                message_id: "m".to_string(),
                business_id: None,
                message_template_id: 1,
                receiver: ["r".to_string()].into(),
                send_channel: Some(30),
                msg_type: Some(msg_type),
                content: None,
                send_account: None,
            },
        )
    }

    #[test_case(21, true)]
    #[test_case(23, true)]
    #[test_case(0, true)]
    #[test_case(7, true)]
    #[test_case(8, false)]
    #[test_case(12, false)]
    #[test_case(20, false)]
    fn test_wrapping_window(hour: u32, blocked: bool) {
        assert_eq!(QuietHoursWindow::new(21, 8).contains(hour), blocked);
    }

    #[test]
    fn test_non_wrapping_and_empty_windows() {
        let window = QuietHoursWindow::new(1, 5);
        assert!(window.contains(1));
        assert!(window.contains(4));
        assert!(!window.contains(5));
        assert!(!window.contains(0));

        let empty = QuietHoursWindow::new(6, 6);
        assert!((0..24).all(|hour| !empty.contains(hour)));
    }

    #[tokio::test]
    async fn test_only_marketing_is_blocked() {
        let cases = [
            (MessageType::Marketing, 22, true),
            (MessageType::Marketing, 9, false),
            (MessageType::Notice, 22, false),
            (MessageType::AuthCode, 3, false),
        ];

        for (msg_type, hour, breaks) in cases {
            let stage =
                QuietHoursStage::new(true, QuietHoursWindow::new(21, 8), Arc::new(at_hour(hour)));
            let mut context = context(msg_type);

            stage.process(&mut context).await.unwrap();

            assert_eq!(context.need_break, breaks, "{msg_type:?} at {hour}");
            assert_eq!(context.response.is_success(), !breaks);
        }
    }

    #[tokio::test]
    async fn test_disabled_stage_passes_everything() {
        let stage = QuietHoursStage::new(false, QuietHoursWindow::new(21, 8), Arc::new(at_hour(23)));
        let mut context = context(MessageType::Marketing);

        stage.process(&mut context).await.unwrap();

        assert!(!context.need_break);
    }
}
