//! Raw vendor event shapes
//!
//! The backend delivers chat events in two shapes: flat history items from
//! the messages endpoint, and push payloads that nest message/media/tid
//! under an `event` wrapper. Field naming is mixed camelCase/snake_case on
//! the wire, hence the per-field renames. These types go no further than
//! `engine::normalize`, which folds both shapes into the canonical
//! [`Message`](crate::models::Message).

use serde::{Deserialize, Serialize};

/// One wire event, covering both the history-item and push-payload shapes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawEvent {
    pub message: Option<String>,
    pub media: Option<Vec<RawMedia>>,
    pub tid: Option<String>,
    pub id: Option<String>,
    #[serde(rename = "clientMessageId")]
    pub client_message_id: Option<String>,
    #[serde(rename = "relatedTid")]
    pub related_tid: Option<String>,
    #[serde(rename = "interactiveData")]
    pub interactive_data: Option<RawInteractiveData>,
    #[serde(rename = "quickReplies")]
    pub quick_replies: Option<RawQuickReplies>,
    pub outgoing: Option<bool>,
    /// `sentByUser`, `sentToUser`, `typingStart`, `closeThread`, ...
    pub payload_type: Option<String>,
    /// The platform labels mobile-originated (user-sent) history items
    /// `incoming` from its own point of view.
    pub direction: Option<String>,
    pub thread: Option<RawThreadRef>,
    pub extras: Option<RawExtras>,
    pub created_on: Option<String>,
    /// RFC 3339 string or epoch milliseconds, depending on the endpoint.
    pub created: Option<serde_json::Value>,
    pub ts: Option<i64>,
    /// Push-payload wrapper around message/media/tid.
    pub event: Option<RawEventBody>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub participant: Option<RawParticipant>,
}

/// Nested `event` body of a push payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawEventBody {
    pub message: Option<RawEventMessage>,
    pub media: Option<Vec<RawMedia>>,
    pub tid: Option<String>,
    pub participant: Option<RawParticipant>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawEventMessage {
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawParticipant {
    pub name: Option<String>,
}

/// One wire media descriptor. Upload echoes carry the URL under a dynamic
/// key named by `contentType` (e.g. `"file": "https://..."`), captured by
/// the flattened `extra` map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawMedia {
    #[serde(rename = "contentType", skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(rename = "templateType", skip_serializing_if = "Option::is_none")]
    pub template_type: Option<String>,
    #[serde(rename = "templateId", skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "contentUrl", skip_serializing_if = "Option::is_none")]
    pub content_url: Option<String>,
    #[serde(rename = "fileName", skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Quick-reply set as delivered on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawQuickReplies {
    pub reference: Option<String>,
    pub options: Vec<RawQuickReplyOption>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawQuickReplyOption {
    pub identifier: Option<String>,
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub option_type: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub url: Option<String>,
}

/// Interactive answer descriptor: carried by quick-reply answers and sent
/// back verbatim when the user clicks an option.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawInteractiveData {
    #[serde(rename = "type")]
    pub kind: String,
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    pub title: String,
    pub reference: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawThreadRef {
    pub id: Option<String>,
    pub title: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawExtras {
    pub customtags: Option<RawCustomTags>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawCustomTags {
    pub typing: Option<String>,
    pub agent: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_item_shape() {
        let raw: RawEvent = serde_json::from_str(
            r#"{
                "tid": "t-1",
                "message": "hello",
                "payload_type": "sentToUser",
                "created_on": "2024-05-03T10:00:00Z",
                "quickReplies": {
                    "reference": "service",
                    "options": [{"identifier": "opt1", "title": "Track"}]
                }
            }"#,
        )
        .unwrap();
        assert_eq!(raw.tid.as_deref(), Some("t-1"));
        assert_eq!(raw.payload_type.as_deref(), Some("sentToUser"));
        assert_eq!(raw.quick_replies.unwrap().options.len(), 1);
    }

    #[test]
    fn test_push_payload_shape() {
        let raw: RawEvent = serde_json::from_str(
            r#"{
                "event": {
                    "tid": "t-2",
                    "message": {"text": "from push"}
                },
                "thread": {"id": "th-9"}
            }"#,
        )
        .unwrap();
        let event = raw.event.unwrap();
        assert_eq!(event.tid.as_deref(), Some("t-2"));
        assert_eq!(event.message.unwrap().text.as_deref(), Some("from push"));
        assert_eq!(raw.thread.unwrap().id.as_deref(), Some("th-9"));
    }

    #[test]
    fn test_media_dynamic_url_key() {
        let media: RawMedia = serde_json::from_str(
            r#"{"contentType": "file", "file": "https://cdn.example/a.pdf"}"#,
        )
        .unwrap();
        assert_eq!(media.content_type.as_deref(), Some("file"));
        assert_eq!(
            media.extra.get("file").and_then(|v| v.as_str()),
            Some("https://cdn.example/a.pdf")
        );
    }
}
