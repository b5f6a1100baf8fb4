//! Canonical message model
//!
//! One internal shape for every chat event, regardless of which wire shape
//! (history item or push payload) it arrived in. Raw vendor shapes stop at
//! the normalizer; everything past it works on these types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a message, from the end-user's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// From the agent/bot to the end user.
    Inbound,
    /// From the end user.
    Outbound,
}

/// One input field of an interactive form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    pub label: Option<String>,
    /// Filled in when the form has been answered.
    pub value: Option<String>,
    pub field_type: Option<String>,
    pub description: Option<String>,
    pub mandatory: bool,
}

/// An interactive form attached to a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormPayload {
    pub template_id: String,
    pub title: Option<String>,
    pub fields: Vec<FormField>,
}

/// One selectable option of a quick-reply set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuickReplyOption {
    pub identifier: String,
    pub title: String,
    pub kind: Option<String>,
    /// Vendor-defined option payload; call actions are detected in here.
    pub payload: Option<serde_json::Value>,
    pub url: Option<String>,
}

/// A set of quick-reply options attached to a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuickReplySet {
    pub reference: Option<String>,
    pub options: Vec<QuickReplyOption>,
}

/// A plain (non-interactive) attachment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Attachment {
    pub content_type: String,
    pub url: Option<String>,
    pub file_name: Option<String>,
}

/// One attachment descriptor. Interactive media takes rendering precedence
/// over any auxiliary text on the same message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Media {
    Form(FormPayload),
    QuickReplies(QuickReplySet),
    Attachment(Attachment),
}

/// One chat event in canonical form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Server-assigned message id, when delivered by the backend.
    pub id: Option<String>,
    /// Locally generated id for optimistic entries.
    pub client_id: Option<String>,
    /// Server-assigned thread-scoped correlation id (question/answer pairing).
    pub tid: Option<String>,
    /// The `tid` of the question this message answers, if any.
    pub related_tid: Option<String>,
    /// Option identifier carried by a quick-reply answer.
    pub interactive_id: Option<String>,
    pub text: Option<String>,
    pub media: Vec<Media>,
    pub direction: Direction,
    pub created_at: DateTime<Utc>,
    /// Set by reconciliation once an interactive question has its answer.
    pub answered: bool,
    /// The option chosen, when answered via quick reply.
    pub selected_option: Option<String>,
    /// Suppressed from rendering (merged answer, abandoned prompt, hidden start).
    pub hidden: bool,
    /// Optimistic entry whose send failed; the view marks it for retry.
    pub failed: bool,
}

impl Message {
    /// New optimistic outbound entry with only a client-generated id.
    pub fn optimistic(text: impl Into<String>) -> Self {
        Self {
            id: None,
            client_id: Some(uuid::Uuid::new_v4().to_string()),
            tid: None,
            related_tid: None,
            interactive_id: None,
            text: Some(text.into()),
            media: Vec::new(),
            direction: Direction::Outbound,
            created_at: Utc::now(),
            answered: false,
            selected_option: None,
            hidden: false,
            failed: false,
        }
    }

    pub fn is_outbound(&self) -> bool {
        self.direction == Direction::Outbound
    }

    /// First form attachment, if any.
    pub fn form(&self) -> Option<&FormPayload> {
        self.media.iter().find_map(|m| match m {
            Media::Form(f) => Some(f),
            _ => None,
        })
    }

    pub fn form_mut(&mut self) -> Option<&mut FormPayload> {
        self.media.iter_mut().find_map(|m| match m {
            Media::Form(f) => Some(f),
            _ => None,
        })
    }

    /// Quick-reply set, if this message carries one with at least one option.
    pub fn quick_replies(&self) -> Option<&QuickReplySet> {
        self.media.iter().find_map(|m| match m {
            Media::QuickReplies(q) if !q.options.is_empty() => Some(q),
            _ => None,
        })
    }

    /// Interactive prompt: a form or a non-empty quick-reply set.
    pub fn is_interactive(&self) -> bool {
        self.form().is_some() || self.quick_replies().is_some()
    }

    /// Lowercased, trimmed text for content-based matching. This is the
    /// known-weak fallback path: two distinct messages with identical text
    /// collide, so identifier-based matching is always tried first.
    pub fn normalized_text(&self) -> Option<String> {
        self.text
            .as_deref()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
    }
}

/// Normalize free text the same way `Message::normalized_text` does.
pub fn normalize_text(text: &str) -> String {
    text.trim().to_lowercase()
}
