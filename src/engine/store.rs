//! Thread store
//!
//! In-memory state of every conversation: ordered message lists, unread
//! counters, previews. The reconciliation engine is the single mutator; the
//! view layer only reads. Message lists are append-only for the session —
//! reconciliation flips derived flags, never removes entries.

use chrono::{DateTime, TimeZone, Utc};

use crate::calling;
use crate::models::{Direction, Message, ThreadInfo};

/// One conversation.
#[derive(Debug, Default)]
pub struct ThreadState {
    pub id: String,
    pub title: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub preview: Option<String>,
    pub unread: u32,
    pub closed: bool,
    pub messages: Vec<Message>,
}

impl ThreadState {
    pub fn from_info(info: &ThreadInfo) -> Option<Self> {
        let id = info.id.clone().filter(|id| !id.is_empty())?;
        Some(Self {
            id,
            title: info.title.clone(),
            created_at: thread_created_at(info),
            preview: info.last_message.clone(),
            unread: info.unread_count.unwrap_or(0),
            closed: info
                .status
                .as_deref()
                .map(|s| s.eq_ignore_ascii_case("closed"))
                .unwrap_or(false),
            messages: Vec::new(),
        })
    }

    /// Latest message that would actually render.
    pub fn last_visible(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| !m.hidden)
    }

    /// Whether the compose input is usable. Disabled exactly while the last
    /// visible message is an unanswered inbound prompt that demands a
    /// structured answer — a form, or quick replies without a call action
    /// (call actions are an open offer, not a blocking question).
    pub fn input_enabled(&self) -> bool {
        if self.closed {
            return false;
        }
        let Some(last) = self.last_visible() else {
            return true;
        };
        if last.direction != Direction::Inbound || last.answered {
            return true;
        }
        if last.form().is_some() {
            return false;
        }
        match last.quick_replies() {
            Some(qr) => calling::has_call_action(qr),
            None => true,
        }
    }

    /// Insert preserving `created_at` order. Live events normally arrive in
    /// order and append; when the transport reorders, the entry is placed by
    /// timestamp instead of trusting arrival order. Local optimistic entries
    /// are ordering barriers: their wall-clock timestamps are not comparable
    /// with server timestamps, and they were correct at render time.
    pub fn insert_ordered(&mut self, msg: Message) {
        let mut pos = self.messages.len();
        while pos > 0 {
            let prev = &self.messages[pos - 1];
            let prev_is_local = prev.id.is_none() && prev.tid.is_none();
            if prev_is_local || prev.created_at <= msg.created_at {
                break;
            }
            pos -= 1;
        }
        self.messages.insert(pos, msg);
    }

    pub fn update_preview(&mut self, msg: &Message) {
        self.preview = msg
            .text
            .clone()
            .or_else(|| (!msg.media.is_empty()).then(|| "Attachment".to_string()));
    }
}

/// Thread creation time: `created_on`, with the older `created` field
/// (string or epoch millis) as fallback.
fn thread_created_at(info: &ThreadInfo) -> Option<DateTime<Utc>> {
    if let Some(ts) = info
        .created_on
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    {
        return Some(ts.with_timezone(&Utc));
    }
    match info.created.as_ref()? {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|ts| ts.with_timezone(&Utc)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

/// All threads known to this session.
#[derive(Debug, Default)]
pub struct ThreadStore {
    threads: Vec<ThreadState>,
    focused: Option<String>,
}

impl ThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the thread list from a listing response; messages of threads
    /// that survive are kept.
    pub fn set_threads(&mut self, infos: Vec<ThreadInfo>) {
        let mut next: Vec<ThreadState> = infos.iter().filter_map(ThreadState::from_info).collect();
        for thread in &mut next {
            if let Some(existing) = self.threads.iter_mut().find(|t| t.id == thread.id) {
                thread.messages = std::mem::take(&mut existing.messages);
            }
        }
        self.threads = next;
    }

    /// Add a freshly created thread at the front of the list.
    pub fn add_front(&mut self, info: &ThreadInfo) -> Option<&ThreadState> {
        let thread = ThreadState::from_info(info)?;
        self.threads.insert(0, thread);
        self.threads.first()
    }

    pub fn get(&self, id: &str) -> Option<&ThreadState> {
        self.threads.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ThreadState> {
        self.threads.iter_mut().find(|t| t.id == id)
    }

    pub fn threads(&self) -> &[ThreadState] {
        &self.threads
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn focused_id(&self) -> Option<&str> {
        self.focused.as_deref()
    }

    pub fn focused(&self) -> Option<&ThreadState> {
        self.focused.as_deref().and_then(|id| self.get(id))
    }

    pub fn focused_mut(&mut self) -> Option<&mut ThreadState> {
        let id = self.focused.clone()?;
        self.get_mut(&id)
    }

    /// Focus a thread (opening it in the view) and clear its unread count.
    pub fn focus(&mut self, id: &str) -> bool {
        match self.get_mut(id) {
            Some(thread) => {
                thread.unread = 0;
                self.focused = Some(id.to_string());
                true
            }
            None => false,
        }
    }

    pub fn unfocus(&mut self) {
        self.focused = None;
    }

    /// Thread an event belongs to: its explicit thread id when known,
    /// otherwise the currently focused thread.
    pub fn resolve_thread_id(&self, event_thread_id: Option<&str>) -> Option<String> {
        event_thread_id
            .filter(|id| !id.is_empty())
            .map(String::from)
            .or_else(|| self.focused.clone())
    }
}
