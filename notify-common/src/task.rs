//! The unit of work carried through the dispatch pipeline, and the queue
//! message contract it is decoded from.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Delivery medium. The numeric codes are part of the queue message contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelType {
    Im,
    Push,
    Sms,
    Email,
}

impl ChannelType {
    pub const ALL: [ChannelType; 4] = [
        ChannelType::Im,
        ChannelType::Push,
        ChannelType::Sms,
        ChannelType::Email,
    ];

    pub fn code(&self) -> i32 {
        match self {
            ChannelType::Im => 10,
            ChannelType::Push => 20,
            ChannelType::Sms => 30,
            ChannelType::Email => 40,
        }
    }

    pub fn from_code(code: i32) -> Option<ChannelType> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Im => "im",
            ChannelType::Push => "push",
            ChannelType::Sms => "sms",
            ChannelType::Email => "email",
        }
    }

    /// The content shape this channel carries. IM and push are reserved and
    /// have none yet.
    pub fn content_kind(&self) -> Option<ContentKind> {
        match self {
            ChannelType::Sms => Some(ContentKind::Sms),
            ChannelType::Email => Some(ContentKind::Email),
            ChannelType::Im | ChannelType::Push => None,
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Notice,
    Marketing,
    AuthCode,
}

impl MessageType {
    pub fn from_code(code: i32) -> Option<MessageType> {
        match code {
            10 => Some(MessageType::Notice),
            20 => Some(MessageType::Marketing),
            30 => Some(MessageType::AuthCode),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Sms,
    Email,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsContent {
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailContent {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Channel-specific payload. Serializes as the bare inner object, which is
/// also the canonical form used for content hashing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ContentModel {
    Sms(SmsContent),
    Email(EmailContent),
}

impl ContentModel {
    /// Decode `value` as the shape declared by `channel`.
    ///
    /// Channels without a content shape yield `Ok(None)`.
    pub fn from_channel_json(
        channel: ChannelType,
        value: Value,
    ) -> Result<Option<ContentModel>, serde_json::Error> {
        let content = match channel.content_kind() {
            Some(ContentKind::Sms) => Some(ContentModel::Sms(serde_json::from_value(value)?)),
            Some(ContentKind::Email) => Some(ContentModel::Email(serde_json::from_value(value)?)),
            None => None,
        };
        Ok(content)
    }

    /// Canonical serialization, stable for identical content.
    pub fn canonical_json(&self) -> String {
        // Serializing plain structs of strings cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub message_id: String,
    pub business_id: Option<i64>,
    pub message_template_id: i64,
    pub receiver: BTreeSet<String>,
    /// Raw channel code as received; may not name a known channel.
    pub send_channel: Option<i32>,
    pub msg_type: Option<MessageType>,
    pub content: Option<ContentModel>,
    pub send_account: Option<i32>,
}

impl TaskInfo {
    pub fn channel(&self) -> Option<ChannelType> {
        self.send_channel.and_then(ChannelType::from_code)
    }

    pub fn is_marketing(&self) -> bool {
        self.msg_type == Some(MessageType::Marketing)
    }
}

#[derive(Error, Debug)]
pub enum TaskParseError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("payload is not a JSON array of tasks")]
    NotAnArray,
    #[error("task at index {index} is malformed: {reason}")]
    MalformedTask { index: usize, reason: String },
}

/// Result of decoding one queue message. Individual malformed tasks do not
/// fail the batch; they are reported in `rejected`.
#[derive(Debug, Default)]
pub struct TaskBatch {
    pub tasks: Vec<TaskInfo>,
    pub rejected: Vec<TaskParseError>,
    /// Tasks whose content did not decode as their channel's shape. They are
    /// still in `tasks`, with `content` absent.
    pub content_dropped: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTask {
    message_id: String,
    #[serde(default)]
    business_id: Option<i64>,
    message_template_id: i64,
    #[serde(default)]
    send_channel: Option<Value>,
    #[serde(default)]
    msg_type: Option<i32>,
    #[serde(default)]
    send_account: Option<i32>,
    #[serde(default)]
    receiver: Vec<String>,
    #[serde(default)]
    content_model: Option<Value>,
    #[serde(default)]
    content: Option<Value>,
}

/// Channel codes arrive as numbers or as numeric strings.
fn channel_code(raw: &Value) -> Option<i32> {
    let code = match raw {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    i32::try_from(code).ok()
}

/// Decode a queue message: a JSON array of task objects.
///
/// Unknown fields are ignored. A missing or unrecognised `sendChannel` gives a
/// task without content; content that does not fit the declared channel is
/// dropped and the task kept.
pub fn parse_task_batch(payload: &[u8]) -> Result<TaskBatch, TaskParseError> {
    let value: Value = serde_json::from_slice(payload)?;
    let Value::Array(items) = value else {
        return Err(TaskParseError::NotAnArray);
    };

    let mut batch = TaskBatch::default();
    for (index, item) in items.into_iter().enumerate() {
        if !item.is_object() {
            batch.rejected.push(TaskParseError::MalformedTask {
                index,
                reason: "not an object".to_string(),
            });
            continue;
        }

        let wire: WireTask = match serde_json::from_value(item) {
            Ok(wire) => wire,
            Err(e) => {
                batch.rejected.push(TaskParseError::MalformedTask {
                    index,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let send_channel = wire.send_channel.as_ref().and_then(channel_code);

        // contentModel wins when both keys are present
        let raw_content = wire
            .content_model
            .filter(|v| !v.is_null())
            .or(wire.content);

        let content = match (send_channel.and_then(ChannelType::from_code), raw_content) {
            (Some(channel), Some(raw)) if !raw.is_null() => {
                match ContentModel::from_channel_json(channel, raw) {
                    Ok(content) => content,
                    Err(_) => {
                        batch.content_dropped += 1;
                        None
                    }
                }
            }
            _ => None,
        };

        batch.tasks.push(TaskInfo {
            message_id: wire.message_id,
            business_id: wire.business_id,
            message_template_id: wire.message_template_id,
            receiver: wire.receiver.into_iter().collect(),
            send_channel,
            msg_type: wire.msg_type.and_then(MessageType::from_code),
            content,
            send_account: wire.send_account,
        });
    }

    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    fn sms_task_json() -> Value {
        json!({
            "messageId": "m-1",
            "businessId": 2000000120261016i64,
            "messageTemplateId": 1,
            "sendChannel": 30,
            "msgType": 20,
            "receiver": ["13800000000", "13800000001", "13800000000"],
            "content": {"content": "hello", "url": "https://t.cn/x"}
        })
    }

    #[test]
    fn test_channel_codes_round_trip() {
        for channel in ChannelType::ALL {
            assert_eq!(ChannelType::from_code(channel.code()), Some(channel));
        }
        assert_eq!(ChannelType::from_code(99), None);
    }

    #[test]
    fn test_parse_sms_task() {
        let payload = json!([sms_task_json()]).to_string();
        let batch = parse_task_batch(payload.as_bytes()).unwrap();

        assert!(batch.rejected.is_empty());
        assert_eq!(batch.tasks.len(), 1);

        let task = &batch.tasks[0];
        assert_eq!(task.message_id, "m-1");
        assert_eq!(task.channel(), Some(ChannelType::Sms));
        assert_eq!(task.msg_type, Some(MessageType::Marketing));
        // receivers are a set
        assert_eq!(task.receiver.len(), 2);
        assert_eq!(
            task.content,
            Some(ContentModel::Sms(SmsContent {
                content: "hello".to_string(),
                url: Some("https://t.cn/x".to_string()),
            }))
        );
    }

    #[test]
    fn test_content_model_key_and_unknown_fields() {
        let payload = json!([{
            "messageId": "m-2",
            "messageTemplateId": 7,
            "sendChannel": 40,
            "msgType": 10,
            "receiver": ["a@example.com"],
            "contentModel": {"title": "hi", "content": "body", "extra": true},
            "someFutureField": {"nested": 1}
        }])
        .to_string();
        let batch = parse_task_batch(payload.as_bytes()).unwrap();

        let task = &batch.tasks[0];
        assert_eq!(
            task.content,
            Some(ContentModel::Email(EmailContent {
                title: "hi".to_string(),
                content: "body".to_string(),
                url: None,
            }))
        );
    }

    #[test]
    fn test_missing_or_unknown_channel_yields_no_content() {
        let payload = json!([
            {"messageId": "a", "messageTemplateId": 1, "receiver": ["x"], "content": {"content": "c"}},
            {"messageId": "b", "messageTemplateId": 1, "sendChannel": 99, "receiver": ["x"], "content": {"content": "c"}},
            {"messageId": "c", "messageTemplateId": 1, "sendChannel": "sms", "receiver": ["x"], "content": {"content": "c"}},
            {"messageId": "d", "messageTemplateId": 1, "sendChannel": 10, "receiver": ["x"], "content": {"content": "c"}}
        ])
        .to_string();
        let batch = parse_task_batch(payload.as_bytes()).unwrap();

        assert_eq!(batch.tasks.len(), 4);
        assert!(batch.tasks.iter().all(|t| t.content.is_none()));
        assert_eq!(batch.tasks[1].send_channel, Some(99));
        assert_eq!(batch.tasks[2].send_channel, None);
        assert_eq!(batch.content_dropped, 0);
    }

    #[test]
    fn test_malformed_content_is_dropped_not_fatal() {
        let mut task = sms_task_json();
        task["content"] = json!({"content": 42});
        let payload = json!([task, sms_task_json()]).to_string();

        let batch = parse_task_batch(payload.as_bytes()).unwrap();

        assert_eq!(batch.tasks.len(), 2);
        assert_eq!(batch.tasks[0].content, None);
        assert!(batch.tasks[1].content.is_some());
        assert_eq!(batch.content_dropped, 1);
    }

    #[test]
    fn test_malformed_task_is_rejected_individually() {
        let payload = json!([
            "not a task",
            {"messageId": "m", "receiver": ["x"]},
            sms_task_json()
        ])
        .to_string();

        let batch = parse_task_batch(payload.as_bytes()).unwrap();

        assert_eq!(batch.tasks.len(), 1);
        assert_eq!(batch.rejected.len(), 2);
        assert!(matches!(
            batch.rejected[0],
            TaskParseError::MalformedTask { index: 0, .. }
        ));
        assert!(matches!(
            batch.rejected[1],
            TaskParseError::MalformedTask { index: 1, .. }
        ));
    }

    #[test]
    fn test_non_array_payload_is_rejected() {
        let payload = sms_task_json().to_string();
        assert!(matches!(
            parse_task_batch(payload.as_bytes()),
            Err(TaskParseError::NotAnArray)
        ));
        assert!(matches!(
            parse_task_batch(b"{not json"),
            Err(TaskParseError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_canonical_json_is_the_inner_object() {
        let content = ContentModel::Email(EmailContent {
            title: "t".to_string(),
            content: "c".to_string(),
            url: None,
        });

        assert_json_eq!(
            serde_json::from_str::<Value>(&content.canonical_json()).unwrap(),
            json!({"title": "t", "content": "c"})
        );
        assert_eq!(content.canonical_json(), r#"{"title":"t","content":"c"}"#);
    }

    #[test]
    fn test_content_and_content_model_together_keep_the_task() {
        let mut task = sms_task_json();
        task["contentModel"] = json!({"content": "from model"});
        let payload = json!([task]).to_string();

        let batch = parse_task_batch(payload.as_bytes()).unwrap();

        assert!(batch.rejected.is_empty());
        assert_eq!(batch.tasks.len(), 1);
        assert_eq!(
            batch.tasks[0].content,
            Some(ContentModel::Sms(SmsContent {
                content: "from model".to_string(),
                url: None,
            }))
        );
    }

    #[test]
    fn test_null_content_model_falls_back_to_content() {
        let mut task = sms_task_json();
        task["contentModel"] = Value::Null;
        let payload = json!([task]).to_string();

        let batch = parse_task_batch(payload.as_bytes()).unwrap();

        assert!(matches!(
            &batch.tasks[0].content,
            Some(ContentModel::Sms(sms)) if sms.content == "hello"
        ));
    }

    #[test]
    fn test_numeric_string_channel_is_coerced() {
        let mut task = sms_task_json();
        task["sendChannel"] = json!(" 30 ");
        let payload = json!([task]).to_string();

        let batch = parse_task_batch(payload.as_bytes()).unwrap();

        let task = &batch.tasks[0];
        assert_eq!(task.send_channel, Some(30));
        assert_eq!(task.channel(), Some(ChannelType::Sms));
        assert!(task.content.is_some());
    }
}
