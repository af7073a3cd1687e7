use std::sync::Arc;

use async_trait::async_trait;
use notify_common::pipeline::{BusinessProcess, ProcessContext, ProcessError};
use notify_common::task::{ContentModel, TaskInfo};
use tracing::info;

use crate::metrics_consts::CONTENT_MASKED;
use crate::sensitive::SensitiveWordTrie;

/// Masks sensitive words in outgoing text. Never stops the chain.
pub struct SensitiveWordStage {
    trie: Arc<SensitiveWordTrie>,
    enabled: bool,
    mask: char,
}

impl SensitiveWordStage {
    pub fn new(trie: Arc<SensitiveWordTrie>, enabled: bool, mask: char) -> Self {
        Self {
            trie,
            enabled,
            mask,
        }
    }

    /// Filter `text` in place, returning whether anything was masked.
    fn mask_field(&self, text: &mut String) -> bool {
        let filtered = self.trie.filter(text, self.mask);
        if filtered == *text {
            return false;
        }
        *text = filtered;
        true
    }
}

#[async_trait]
impl BusinessProcess<TaskInfo> for SensitiveWordStage {
    fn name(&self) -> &'static str {
        "sensitive_words"
    }

    async fn process(&self, context: &mut ProcessContext<TaskInfo>) -> Result<(), ProcessError> {
        if !self.enabled || self.trie.is_empty() {
            return Ok(());
        }

        // urls are left alone
        let masked = match context.model.content.as_mut() {
            Some(ContentModel::Sms(sms)) => self.mask_field(&mut sms.content),
            Some(ContentModel::Email(email)) => {
                let title = self.mask_field(&mut email.title);
                let body = self.mask_field(&mut email.content);
                title || body
            }
            None => false,
        };

        if masked {
            info!(message_id = %context.model.message_id, "sensitive words masked");
            metrics::counter!(CONTENT_MASKED).increment(1);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify_common::task::{EmailContent, SmsContent};

    fn stage(enabled: bool) -> SensitiveWordStage {
        let trie = SensitiveWordTrie::new(["赌博", "赌场", "诈骗"]);
        SensitiveWordStage::new(Arc::new(trie), enabled, '*')
    }

    fn context(content: Option<ContentModel>) -> ProcessContext<TaskInfo> {
        ProcessContext::new(
            "handler",
            TaskInfo {
                message_id: "m".to_string(),
                business_id: None,
                message_template_id: 1,
                receiver: ["r".to_string()].into(),
                send_channel: Some(40),
                msg_type: None,
                content,
                send_account: None,
            },
        )
    }

    #[tokio::test]
    async fn test_masks_sms_content_but_not_url() {
        let mut ctx = context(Some(ContentModel::Sms(SmsContent {
            content: "开设赌场".to_string(),
            url: Some("https://example.com/赌场".to_string()),
        })));

        stage(true).process(&mut ctx).await.unwrap();

        assert!(!ctx.need_break);
        assert_eq!(
            ctx.model.content,
            Some(ContentModel::Sms(SmsContent {
                content: "开设**".to_string(),
                url: Some("https://example.com/赌场".to_string()),
            }))
        );
    }

    #[tokio::test]
    async fn test_masks_email_title_and_body() {
        let mut ctx = context(Some(ContentModel::Email(EmailContent {
            title: "诈骗提醒".to_string(),
            content: "远离赌博".to_string(),
            url: None,
        })));

        stage(true).process(&mut ctx).await.unwrap();

        let Some(ContentModel::Email(email)) = &ctx.model.content else {
            panic!("content variant changed");
        };
        assert_eq!(email.title, "**提醒");
        assert_eq!(email.content, "远离**");
    }

    #[tokio::test]
    async fn test_disabled_or_no_content_passes_through() {
        let original = ContentModel::Sms(SmsContent {
            content: "赌博".to_string(),
            url: None,
        });
        let mut ctx = context(Some(original.clone()));
        stage(false).process(&mut ctx).await.unwrap();
        assert_eq!(ctx.model.content, Some(original));

        let mut ctx = context(None);
        stage(true).process(&mut ctx).await.unwrap();
        assert!(!ctx.need_break);
        assert_eq!(ctx.model.content, None);
    }
}
