//! Event normalization
//!
//! Single boundary between the vendor's wire shapes and the canonical
//! [`Message`]. History items carry message/media/tid flat; push payloads
//! nest them under `event`. Both are folded here — raw shapes must not leak
//! past this module.

use chrono::{DateTime, TimeZone, Utc};

use crate::models::event::{RawEvent, RawMedia, RawQuickReplies};
use crate::models::{
    Attachment, Direction, FormField, FormPayload, Media, Message, QuickReplyOption, QuickReplySet,
};

/// Sentinel text of typing on/off events.
pub const TYPING_SENTINEL: &str = "$$$$$TYPING$$$$$";
/// Sentinel text of agent-assignment events.
pub const AGENT_ASSIGNED_SENTINEL: &str = "$$$$$AGENTASSIGNED$$$$$";

/// Non-message events routed to a side channel instead of the thread store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemEvent {
    TypingOn,
    TypingOff,
    AgentAssigned { name: String },
    ConversationClosed,
}

/// Outcome of normalizing one raw event.
#[derive(Debug, Clone)]
pub enum Normalized {
    Message(Message),
    System(SystemEvent),
}

/// Map a raw event to its canonical form.
///
/// Returns `None` for events that are neither a displayable message nor a
/// recognized system event; callers skip those (never an error).
pub fn normalize(raw: &RawEvent) -> Option<Normalized> {
    if let Some(system) = system_event(raw) {
        return Some(Normalized::System(system));
    }

    let text = raw
        .message
        .clone()
        .or_else(|| raw.event.as_ref()?.message.as_ref()?.text.clone());
    let raw_media = raw
        .media
        .as_ref()
        .or_else(|| raw.event.as_ref().and_then(|e| e.media.as_ref()));
    let tid = raw
        .tid
        .clone()
        .or_else(|| raw.event.as_ref().and_then(|e| e.tid.clone()));

    let mut media: Vec<Media> = raw_media
        .map(|items| items.iter().filter_map(canonical_media).collect())
        .unwrap_or_default();
    if let Some(qr) = raw.quick_replies.as_ref().map(quick_reply_set) {
        if !qr.options.is_empty() {
            media.push(Media::QuickReplies(qr));
        }
    }

    if text.is_none() && media.is_empty() {
        return None;
    }

    Some(Normalized::Message(Message {
        id: raw.id.clone(),
        client_id: raw.client_message_id.clone(),
        tid,
        related_tid: raw.related_tid.clone(),
        interactive_id: raw
            .interactive_data
            .as_ref()
            .map(|d| d.identifier.clone())
            .filter(|id| !id.is_empty()),
        text,
        media,
        direction: direction(raw),
        created_at: created_at(raw),
        answered: false,
        selected_option: None,
        hidden: false,
        failed: false,
    }))
}

/// Outbound iff the explicit flag, the `sentByUser` payload type, or the
/// platform's mobile-originated `direction: "incoming"` marker says so.
fn direction(raw: &RawEvent) -> Direction {
    let outbound = raw.outgoing == Some(true)
        || raw.payload_type.as_deref() == Some("sentByUser")
        || raw.direction.as_deref() == Some("incoming");
    if outbound {
        Direction::Outbound
    } else {
        Direction::Inbound
    }
}

fn system_event(raw: &RawEvent) -> Option<SystemEvent> {
    // Conversation end arrives as a dedicated payload type or a Closed
    // thread status on an otherwise ordinary event.
    if raw.payload_type.as_deref() == Some("closeThread")
        || raw
            .thread
            .as_ref()
            .and_then(|t| t.status.as_deref())
            .map(|s| s.eq_ignore_ascii_case("closed"))
            .unwrap_or(false)
    {
        return Some(SystemEvent::ConversationClosed);
    }

    if raw.message.as_deref() == Some(TYPING_SENTINEL)
        || raw.payload_type.as_deref() == Some("typingStart")
    {
        let status = raw
            .extras
            .as_ref()
            .and_then(|e| e.customtags.as_ref())
            .and_then(|t| t.typing.as_deref());
        return match status {
            Some("typing_on") => Some(SystemEvent::TypingOn),
            // Swallow the sentinel even without a recognized status so it
            // never renders as literal text.
            _ => Some(SystemEvent::TypingOff),
        };
    }

    if raw.message.as_deref() == Some(AGENT_ASSIGNED_SENTINEL) {
        let name = raw
            .extras
            .as_ref()
            .and_then(|e| e.customtags.as_ref())
            .and_then(|t| t.agent.clone())
            .unwrap_or_else(|| "Agent".to_string());
        return Some(SystemEvent::AgentAssigned { name });
    }

    // Legacy shape for agent assignment.
    if raw.event_type.as_deref() == Some("participant_joined") {
        let name = raw
            .participant
            .as_ref()
            .or_else(|| raw.event.as_ref().and_then(|e| e.participant.as_ref()))
            .and_then(|p| p.name.clone())
            .unwrap_or_else(|| "Agent".to_string());
        return Some(SystemEvent::AgentAssigned { name });
    }

    None
}

fn canonical_media(raw: &RawMedia) -> Option<Media> {
    if raw.template_type.as_deref() == Some("form") {
        let template_id = raw.template_id.clone()?;
        return Some(Media::Form(form_payload(template_id, raw)));
    }

    let content_type = raw
        .content_type
        .clone()
        .or_else(|| raw.mime_type.clone())
        .unwrap_or_default();
    Some(Media::Attachment(Attachment {
        url: attachment_url(raw, &content_type),
        file_name: raw.file_name.clone().or_else(|| raw.filename.clone()),
        content_type,
    }))
}

fn form_payload(template_id: String, raw: &RawMedia) -> FormPayload {
    let payload = raw.payload.as_ref();
    let title = payload
        .and_then(|p| p.get("title"))
        .and_then(|t| t.as_str())
        .map(String::from);
    let fields = payload
        .and_then(|p| p.get("fields"))
        .and_then(|f| f.as_array())
        .map(|fields| {
            fields
                .iter()
                .filter_map(|f| {
                    Some(FormField {
                        name: f.get("name")?.as_str()?.to_string(),
                        label: f.get("label").and_then(|v| v.as_str()).map(String::from),
                        value: f.get("value").and_then(|v| v.as_str()).map(String::from),
                        field_type: f.get("type").and_then(|v| v.as_str()).map(String::from),
                        description: f
                            .get("description")
                            .and_then(|v| v.as_str())
                            .map(String::from),
                        mandatory: f
                            .get("mandatory")
                            .and_then(|v| v.as_bool())
                            .unwrap_or(false),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    FormPayload {
        template_id,
        title,
        fields,
    }
}

/// Resolve an attachment URL: explicit fields first, then the dynamic key
/// named by the content type (upload echoes), then the legacy `file` key.
fn attachment_url(raw: &RawMedia, content_type: &str) -> Option<String> {
    if let Some(url) = raw.url.clone().or_else(|| raw.content_url.clone()) {
        return Some(url);
    }
    if let Some(url) = raw
        .payload
        .as_ref()
        .and_then(|p| p.get("url"))
        .and_then(|u| u.as_str())
    {
        return Some(url.to_string());
    }
    if !content_type.is_empty() {
        if let Some(url) = raw.extra.get(content_type).and_then(|v| v.as_str()) {
            return Some(url.to_string());
        }
    }
    match raw.extra.get("file") {
        Some(serde_json::Value::String(url)) => Some(url.clone()),
        Some(serde_json::Value::Object(obj)) => obj
            .get("url")
            .and_then(|u| u.as_str())
            .map(String::from),
        _ => None,
    }
}

fn quick_reply_set(raw: &RawQuickReplies) -> QuickReplySet {
    QuickReplySet {
        reference: raw.reference.clone(),
        options: raw
            .options
            .iter()
            .filter_map(|opt| {
                Some(QuickReplyOption {
                    identifier: opt.identifier.clone()?,
                    title: opt.title.clone().unwrap_or_default(),
                    kind: opt.option_type.clone(),
                    payload: opt.payload.clone(),
                    url: opt.url.clone(),
                })
            })
            .collect(),
    }
}

/// Resolve the event timestamp: `created_on`, then `created` (string or
/// epoch millis), then `ts`. Missing timestamps sort to the epoch so the
/// reconciler's defensive sort stays stable.
fn created_at(raw: &RawEvent) -> DateTime<Utc> {
    if let Some(ts) = raw.created_on.as_deref().and_then(parse_timestamp) {
        return ts;
    }
    if let Some(created) = raw.created.as_ref() {
        match created {
            serde_json::Value::String(s) => {
                if let Some(ts) = parse_timestamp(s) {
                    return ts;
                }
            }
            serde_json::Value::Number(n) => {
                if let Some(ts) = n.as_i64().and_then(epoch_millis) {
                    return ts;
                }
            }
            _ => {}
        }
    }
    if let Some(ts) = raw.ts.and_then(epoch_millis) {
        return ts;
    }
    DateTime::<Utc>::UNIX_EPOCH
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    // Some endpoints omit the offset.
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn epoch_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> RawEvent {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_history_item_normalizes_flat_fields() {
        let raw = parse(
            r#"{"tid": "t-1", "message": "hello", "created_on": "2024-05-03T10:00:00Z"}"#,
        );
        let Some(Normalized::Message(msg)) = normalize(&raw) else {
            panic!("expected message");
        };
        assert_eq!(msg.tid.as_deref(), Some("t-1"));
        assert_eq!(msg.text.as_deref(), Some("hello"));
        assert_eq!(msg.direction, Direction::Inbound);
    }

    #[test]
    fn test_push_payload_normalizes_nested_fields() {
        let raw = parse(r#"{"event": {"tid": "t-2", "message": {"text": "nested"}}}"#);
        let Some(Normalized::Message(msg)) = normalize(&raw) else {
            panic!("expected message");
        };
        assert_eq!(msg.tid.as_deref(), Some("t-2"));
        assert_eq!(msg.text.as_deref(), Some("nested"));
    }

    #[test]
    fn test_flat_text_wins_over_nested() {
        let raw = parse(r#"{"message": "flat", "event": {"message": {"text": "nested"}}}"#);
        let Some(Normalized::Message(msg)) = normalize(&raw) else {
            panic!("expected message");
        };
        assert_eq!(msg.text.as_deref(), Some("flat"));
    }

    #[test]
    fn test_outbound_markers() {
        for json in [
            r#"{"message": "m", "outgoing": true}"#,
            r#"{"message": "m", "payload_type": "sentByUser"}"#,
            r#"{"message": "m", "direction": "incoming"}"#,
        ] {
            let Some(Normalized::Message(msg)) = normalize(&parse(json)) else {
                panic!("expected message for {json}");
            };
            assert_eq!(msg.direction, Direction::Outbound, "{json}");
        }
    }

    #[test]
    fn test_typing_sentinel_is_system_event() {
        let raw = parse(&format!(
            r#"{{"message": "{TYPING_SENTINEL}", "extras": {{"customtags": {{"typing": "typing_on"}}}}}}"#
        ));
        let Some(Normalized::System(ev)) = normalize(&raw) else {
            panic!("expected system event");
        };
        assert_eq!(ev, SystemEvent::TypingOn);
    }

    #[test]
    fn test_agent_assigned_carries_name() {
        let raw = parse(&format!(
            r#"{{"message": "{AGENT_ASSIGNED_SENTINEL}", "extras": {{"customtags": {{"agent": "Alice"}}}}}}"#
        ));
        let Some(Normalized::System(ev)) = normalize(&raw) else {
            panic!("expected system event");
        };
        assert_eq!(ev, SystemEvent::AgentAssigned { name: "Alice".into() });
    }

    #[test]
    fn test_close_thread_payload() {
        let raw = parse(r#"{"payload_type": "closeThread"}"#);
        let Some(Normalized::System(ev)) = normalize(&raw) else {
            panic!("expected system event");
        };
        assert_eq!(ev, SystemEvent::ConversationClosed);
    }

    #[test]
    fn test_malformed_event_is_skipped() {
        assert!(normalize(&parse(r#"{"outgoing": true}"#)).is_none());
        assert!(normalize(&parse("{}")).is_none());
    }

    #[test]
    fn test_form_media_becomes_form_payload() {
        let raw = parse(
            r#"{
                "tid": "q-1",
                "media": [{
                    "templateType": "form",
                    "templateId": "contact",
                    "payload": {
                        "title": "Contact us",
                        "fields": [
                            {"name": "email", "label": "E-mail", "mandatory": true}
                        ]
                    }
                }]
            }"#,
        );
        let Some(Normalized::Message(msg)) = normalize(&raw) else {
            panic!("expected message");
        };
        let form = msg.form().unwrap();
        assert_eq!(form.template_id, "contact");
        assert_eq!(form.title.as_deref(), Some("Contact us"));
        assert_eq!(form.fields.len(), 1);
        assert!(form.fields[0].mandatory);
    }

    #[test]
    fn test_upload_echo_url_under_dynamic_key() {
        let raw = parse(
            r#"{"media": [{"contentType": "file", "file": "https://cdn.example/a.pdf"}]}"#,
        );
        let Some(Normalized::Message(msg)) = normalize(&raw) else {
            panic!("expected message");
        };
        let Media::Attachment(att) = &msg.media[0] else {
            panic!("expected attachment");
        };
        assert_eq!(att.url.as_deref(), Some("https://cdn.example/a.pdf"));
    }

    #[test]
    fn test_epoch_millis_created() {
        let raw = parse(r#"{"message": "m", "created": 1714730400000}"#);
        let Some(Normalized::Message(msg)) = normalize(&raw) else {
            panic!("expected message");
        };
        assert_eq!(msg.created_at.timestamp(), 1_714_730_400);
    }
}
