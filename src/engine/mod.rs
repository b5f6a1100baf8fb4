//! Message reconciliation engine
//!
//! Turns the unordered, duplicated stream of historical and live chat
//! events into a single deduplicated, causally ordered, interactive
//! transcript. All state lives here; the view layer is a pure projection
//! fed by [`ViewEvent`]s and the [`store::ThreadStore`].
//!
//! Everything runs on the caller's single logical thread. Interleaving of
//! network completions is handled with ordering discipline and epoch
//! guards, not locks: a history load owns its thread until it completes,
//! live events for that thread queue up behind it, and a stale load (the
//! user opened another thread meanwhile) is discarded by token comparison.

pub mod autostart;
pub mod ledger;
pub mod normalize;
pub mod reconcile;
mod router;
pub mod store;

use std::time::Instant;

use thiserror::Error;

use crate::calling::{self, CallAction};
use crate::models::event::RawInteractiveData;
use crate::models::{FormField, Message, RawEvent, ThreadInfo};

pub use autostart::{AutoStartConfig, AutoStartController, AutoStartPolicy, AutoStartState};
use ledger::Ledger;
use normalize::{normalize, Normalized};
use store::ThreadStore;

/// Render instruction for the view layer. The engine notifies; the view has
/// no write access back except through the explicit action methods.
#[derive(Debug, Clone)]
pub enum ViewEvent {
    /// Thread list metadata changed (previews, unread counts, membership).
    ThreadListChanged,
    /// A thread's transcript was rebuilt wholesale; re-render it.
    HistoryRendered { thread_id: String },
    /// Append a single bubble to the focused thread.
    MessageRendered { thread_id: String, message: Message },
    /// The compose input became usable / blocked.
    InputVisibilityChanged { enabled: bool },
    /// Typing indicator on/off.
    TypingChanged { visible: bool },
    /// Transient system banner (agent assigned, send failure, ...).
    SystemNotice { text: String },
    ConversationEnded { thread_id: String },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown thread: {0}")]
    UnknownThread(String),
    #[error("no thread is open")]
    NoThreadOpen,
    #[error("no pending interactive message with tid {0}")]
    UnknownQuestion(String),
    #[error("unknown option: {0}")]
    UnknownOption(String),
    #[error("required field missing: {0}")]
    MissingField(String),
}

/// Opaque guard tying a history fetch to the open-thread generation it was
/// issued for. A fetch that resolves after the user switched threads no
/// longer matches and is discarded instead of reconciling into the wrong
/// thread.
#[derive(Debug, Clone)]
pub struct HistoryToken {
    thread_id: String,
    epoch: u64,
}

#[derive(Debug)]
struct HistoryLoad {
    thread_id: String,
    epoch: u64,
    /// Live events for the loading thread, drained once the rebuild lands.
    queued: Vec<RawEvent>,
}

/// What a quick-reply click resolves to.
#[derive(Debug)]
pub enum ClickOutcome {
    /// Ordinary option: send the title text with the interactive payload.
    Send {
        text: String,
        related_tid: String,
        interactive: RawInteractiveData,
    },
    /// Call action: hand off to the calling bridge, leave the prompt open.
    Dial(CallAction),
}

/// A validated form submission, ready for the send path.
#[derive(Debug)]
pub struct FormSubmission {
    pub template_id: String,
    pub fields: Vec<FormField>,
}

pub struct Engine {
    store: ThreadStore,
    ledger: Ledger,
    autostart: AutoStartController,
    epoch: u64,
    loading: Option<HistoryLoad>,
}

impl Engine {
    pub fn new(autostart: Option<AutoStartConfig>) -> Self {
        Self {
            store: ThreadStore::new(),
            ledger: Ledger::new(),
            autostart: AutoStartController::new(autostart),
            epoch: 0,
            loading: None,
        }
    }

    pub fn store(&self) -> &ThreadStore {
        &self.store
    }

    pub fn autostart(&self) -> &AutoStartController {
        &self.autostart
    }

    pub fn autostart_mut(&mut self) -> &mut AutoStartController {
        &mut self.autostart
    }

    /// Replace the thread list from a listing response.
    pub fn set_threads(&mut self, threads: Vec<ThreadInfo>) -> Vec<ViewEvent> {
        self.store.set_threads(threads);
        vec![ViewEvent::ThreadListChanged]
    }

    /// Register a freshly created thread at the top of the list.
    pub fn add_thread(&mut self, info: &ThreadInfo) -> Vec<ViewEvent> {
        self.store.add_front(info);
        vec![ViewEvent::ThreadListChanged]
    }

    /// Backfill a preview for a thread the listing returned without one.
    /// Never overwrites a preview that is already present.
    pub fn set_thread_preview(&mut self, thread_id: &str, preview: String) -> Vec<ViewEvent> {
        if let Some(thread) = self.store.get_mut(thread_id) {
            if thread.preview.is_none() {
                thread.preview = Some(preview);
                return vec![ViewEvent::ThreadListChanged];
            }
        }
        Vec::new()
    }

    /// Leave the chat view: unfocus so inbound messages count as unread
    /// again. An in-flight history load for the thread is abandoned.
    pub fn close_thread_view(&mut self) -> Vec<ViewEvent> {
        self.store.unfocus();
        self.loading = None;
        vec![ViewEvent::ThreadListChanged]
    }

    /// Whether the compose input is currently usable.
    pub fn input_enabled(&self) -> bool {
        self.store
            .focused()
            .map(|t| t.input_enabled())
            .unwrap_or(true)
    }

    /// Focus a thread and begin its history load. The returned token must
    /// be passed back to [`Engine::apply_history`] or
    /// [`Engine::history_failed`].
    pub fn open_thread(
        &mut self,
        thread_id: &str,
    ) -> Result<(HistoryToken, Vec<ViewEvent>), EngineError> {
        if !self.store.focus(thread_id) {
            return Err(EngineError::UnknownThread(thread_id.to_string()));
        }
        self.epoch += 1;
        self.loading = Some(HistoryLoad {
            thread_id: thread_id.to_string(),
            epoch: self.epoch,
            queued: Vec::new(),
        });
        let token = HistoryToken {
            thread_id: thread_id.to_string(),
            epoch: self.epoch,
        };
        // Input state never leaks from the previously open thread.
        let events = vec![
            ViewEvent::ThreadListChanged,
            ViewEvent::InputVisibilityChanged { enabled: true },
        ];
        Ok((token, events))
    }

    /// Complete a history load: reconcile, rebuild the ledger, replace the
    /// thread's transcript, then drain live events that queued up behind
    /// the load. A stale token (another thread was opened meanwhile) is a
    /// no-op.
    pub fn apply_history(&mut self, token: &HistoryToken, raws: Vec<RawEvent>) -> Vec<ViewEvent> {
        if !self.token_is_current(token) {
            tracing::debug!(
                "discarding stale history response for thread {}",
                token.thread_id
            );
            return Vec::new();
        }
        let Some(load) = self.loading.take() else {
            return Vec::new();
        };

        let mut messages: Vec<Message> = raws
            .iter()
            .filter_map(|raw| match normalize(raw) {
                Some(Normalized::Message(msg)) => Some(msg),
                // System events are transient; they do not replay from
                // history.
                _ => None,
            })
            .collect();

        reconcile::reconcile(&mut messages, self.autostart.hidden_start_text());

        // The rendered transcript is being replaced wholesale, so the ledger
        // restarts from exactly what the rebuild contains. Live events
        // queued during the load re-check against the rebuilt ledger below.
        self.ledger.clear();
        for msg in &messages {
            if let Some(key) = Ledger::key_for(msg) {
                self.ledger.mark(&key);
            }
        }

        let mut events = Vec::new();
        if let Some(thread) = self.store.get_mut(&token.thread_id) {
            thread.messages = messages;
            if let Some(last) = thread.last_visible().cloned() {
                thread.update_preview(&last);
            }
            let enabled = thread.input_enabled();
            events.push(ViewEvent::HistoryRendered {
                thread_id: token.thread_id.clone(),
            });
            events.push(ViewEvent::InputVisibilityChanged { enabled });
            events.push(ViewEvent::ThreadListChanged);
        }

        for raw in load.queued {
            router::route(
                &raw,
                &mut self.store,
                &mut self.ledger,
                &mut self.autostart,
                &mut events,
            );
        }
        events
    }

    /// A history fetch failed: release the load and route whatever queued
    /// up behind it. The ledger was not touched, so nothing is lost.
    pub fn history_failed(&mut self, token: &HistoryToken) -> Vec<ViewEvent> {
        if !self.token_is_current(token) {
            return Vec::new();
        }
        let Some(load) = self.loading.take() else {
            return Vec::new();
        };
        let mut events = Vec::new();
        for raw in load.queued {
            router::route(
                &raw,
                &mut self.store,
                &mut self.ledger,
                &mut self.autostart,
                &mut events,
            );
        }
        events
    }

    fn token_is_current(&self, token: &HistoryToken) -> bool {
        matches!(
            self.loading.as_ref(),
            Some(load) if load.epoch == token.epoch && load.thread_id == token.thread_id
        )
    }

    /// Route one live push-channel event. Events for a thread whose history
    /// load is in flight are queued until the load completes, so the
    /// ledger rebuild cannot wipe their dedup marks.
    pub fn route_live(&mut self, raw: RawEvent) -> Vec<ViewEvent> {
        if let Some(load) = self.loading.as_mut() {
            let event_thread = raw.thread.as_ref().and_then(|t| t.id.as_deref());
            let target = event_thread.unwrap_or(load.thread_id.as_str());
            if target == load.thread_id {
                load.queued.push(raw);
                return Vec::new();
            }
        }
        let mut events = Vec::new();
        router::route(
            &raw,
            &mut self.store,
            &mut self.ledger,
            &mut self.autostart,
            &mut events,
        );
        events
    }

    /// Expire time-bounded state (the armed hidden-echo flag).
    pub fn tick(&mut self, now: Instant) -> Vec<ViewEvent> {
        if self.autostart.tick(now) {
            tracing::debug!("hidden start echo never arrived, disarming suppression");
        }
        Vec::new()
    }

    /// Create the optimistic entry for a plain text send. With
    /// `visible = false` (hidden auto-start) nothing is rendered and only
    /// the message to transmit is returned.
    pub fn send_text(
        &mut self,
        text: &str,
        visible: bool,
    ) -> Result<(Message, Vec<ViewEvent>), EngineError> {
        let thread_id = self
            .store
            .focused_id()
            .ok_or(EngineError::NoThreadOpen)?
            .to_string();
        let msg = Message::optimistic(text);
        if !visible {
            return Ok((msg, Vec::new()));
        }

        let thread = self
            .store
            .get_mut(&thread_id)
            .ok_or_else(|| EngineError::UnknownThread(thread_id.clone()))?;
        thread.update_preview(&msg);
        thread.insert_ordered(msg.clone());
        let enabled = thread.input_enabled();
        let events = vec![
            ViewEvent::MessageRendered {
                thread_id,
                message: msg.clone(),
            },
            ViewEvent::ThreadListChanged,
            ViewEvent::InputVisibilityChanged { enabled },
        ];
        Ok((msg, events))
    }

    /// Resolve a quick-reply click on the focused thread.
    ///
    /// Ordinary options mark the question answered, render one optimistic
    /// bubble with the option title, and return the send payload. Call
    /// actions leave the question open and return the dial target.
    pub fn click_quick_reply(
        &mut self,
        question_tid: &str,
        option_identifier: &str,
    ) -> Result<(ClickOutcome, Vec<ViewEvent>), EngineError> {
        let thread_id = self
            .store
            .focused_id()
            .ok_or(EngineError::NoThreadOpen)?
            .to_string();
        let thread = self
            .store
            .get_mut(&thread_id)
            .ok_or_else(|| EngineError::UnknownThread(thread_id.clone()))?;

        let question = thread
            .messages
            .iter_mut()
            .rev()
            .find(|m| m.tid.as_deref() == Some(question_tid) && m.quick_replies().is_some())
            .ok_or_else(|| EngineError::UnknownQuestion(question_tid.to_string()))?;
        if question.answered {
            return Err(EngineError::UnknownQuestion(question_tid.to_string()));
        }

        let Some(qr) = question.quick_replies() else {
            return Err(EngineError::UnknownQuestion(question_tid.to_string()));
        };
        let reference = qr.reference.clone().unwrap_or_else(|| "service".to_string());
        let option = qr
            .options
            .iter()
            .find(|opt| opt.identifier == option_identifier)
            .ok_or_else(|| EngineError::UnknownOption(option_identifier.to_string()))?
            .clone();

        if let Some(action) = calling::call_action(&option) {
            return Ok((ClickOutcome::Dial(action), Vec::new()));
        }

        question.answered = true;
        question.selected_option = Some(option.identifier.clone());

        let interactive = RawInteractiveData {
            kind: option
                .kind
                .clone()
                .unwrap_or_else(|| "quickReplyPostback".to_string()),
            identifier: option.identifier.clone(),
            payload: option.payload.clone(),
            title: option.title.clone(),
            reference,
            url: option.url.clone().unwrap_or_default(),
        };

        let mut bubble = Message::optimistic(&option.title);
        bubble.related_tid = Some(question_tid.to_string());
        bubble.interactive_id = Some(option.identifier.clone());
        thread.update_preview(&bubble);
        thread.insert_ordered(bubble.clone());
        let enabled = thread.input_enabled();

        let events = vec![
            ViewEvent::MessageRendered {
                thread_id,
                message: bubble,
            },
            ViewEvent::ThreadListChanged,
            ViewEvent::InputVisibilityChanged { enabled },
        ];
        Ok((
            ClickOutcome::Send {
                text: option.title,
                related_tid: question_tid.to_string(),
                interactive,
            },
            events,
        ))
    }

    /// Validate and apply a form submission on the focused thread. The form
    /// itself becomes the record (values copied in, inputs disabled); no
    /// answer bubble is rendered.
    pub fn submit_form(
        &mut self,
        question_tid: &str,
        values: &[(String, String)],
    ) -> Result<(FormSubmission, Vec<ViewEvent>), EngineError> {
        let thread_id = self
            .store
            .focused_id()
            .ok_or(EngineError::NoThreadOpen)?
            .to_string();
        let thread = self
            .store
            .get_mut(&thread_id)
            .ok_or_else(|| EngineError::UnknownThread(thread_id.clone()))?;

        let question = thread
            .messages
            .iter_mut()
            .rev()
            .find(|m| m.tid.as_deref() == Some(question_tid) && m.form().is_some() && !m.answered)
            .ok_or_else(|| EngineError::UnknownQuestion(question_tid.to_string()))?;

        let Some(form) = question.form_mut() else {
            return Err(EngineError::UnknownQuestion(question_tid.to_string()));
        };
        for field in &form.fields {
            if field.mandatory {
                let filled = values
                    .iter()
                    .any(|(name, value)| name == &field.name && !value.trim().is_empty());
                if !filled {
                    let label = field.label.clone().unwrap_or_else(|| field.name.clone());
                    return Err(EngineError::MissingField(label));
                }
            }
        }

        let mut submitted = Vec::new();
        for field in form.fields.iter_mut() {
            if let Some((_, value)) = values.iter().find(|(name, _)| name == &field.name) {
                field.value = Some(value.clone());
            }
            submitted.push(FormField {
                name: field.name.clone(),
                label: field.label.clone(),
                value: field.value.clone(),
                field_type: None,
                description: None,
                mandatory: false,
            });
        }
        let template_id = form.template_id.clone();
        question.answered = true;
        let enabled = thread.input_enabled();

        let events = vec![
            ViewEvent::HistoryRendered {
                thread_id: thread_id.clone(),
            },
            ViewEvent::InputVisibilityChanged { enabled },
        ];
        Ok((
            FormSubmission {
                template_id,
                fields: submitted,
            },
            events,
        ))
    }

    /// A send failed: keep the optimistic bubble but mark it so the view
    /// can flag it for retry.
    pub fn mark_send_failed(&mut self, client_id: &str) -> Vec<ViewEvent> {
        let Some(thread) = self.store.focused_mut() else {
            return Vec::new();
        };
        let thread_id = thread.id.clone();
        if let Some(msg) = thread
            .messages
            .iter_mut()
            .find(|m| m.client_id.as_deref() == Some(client_id))
        {
            msg.failed = true;
        }
        vec![
            ViewEvent::HistoryRendered { thread_id },
            ViewEvent::SystemNotice {
                text: "Message could not be sent".to_string(),
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;

    fn raw(json: serde_json::Value) -> RawEvent {
        serde_json::from_value(json).unwrap()
    }

    fn engine_with_thread(id: &str) -> (Engine, HistoryToken) {
        let mut engine = Engine::new(None);
        engine.set_threads(vec![ThreadInfo {
            id: Some(id.into()),
            ..Default::default()
        }]);
        let (token, _) = engine.open_thread(id).unwrap();
        (engine, token)
    }

    fn opened_engine(id: &str) -> Engine {
        let (mut engine, token) = engine_with_thread(id);
        engine.apply_history(&token, vec![]);
        engine
    }

    fn qr_question_event(tid: &str, options: &[&str]) -> RawEvent {
        raw(serde_json::json!({
            "tid": tid,
            "message": "what would you like to do?",
            "payload_type": "sentToUser",
            "created_on": "2024-05-03T10:00:00Z",
            "quickReplies": {
                "reference": "service",
                "options": options
                    .iter()
                    .map(|o| serde_json::json!({"identifier": o, "title": o}))
                    .collect::<Vec<_>>()
            }
        }))
    }

    #[test]
    fn test_route_twice_yields_single_append() {
        let mut engine = opened_engine("th-1");
        let event = raw(serde_json::json!({"tid": "m-1", "message": "hello"}));
        engine.route_live(event.clone());
        engine.route_live(event);
        assert_eq!(engine.store().get("th-1").unwrap().messages.len(), 1);
    }

    #[test]
    fn test_optimistic_echo_suppressed() {
        let mut engine = opened_engine("th-1");
        engine.send_text("Hi", true).unwrap();
        engine.route_live(raw(serde_json::json!({
            "tid": "m-1",
            "message": "Hi",
            "payload_type": "sentByUser"
        })));
        let thread = engine.store().get("th-1").unwrap();
        assert_eq!(
            thread.messages.iter().filter(|m| !m.hidden).count(),
            1,
            "exactly one rendered bubble"
        );
    }

    #[test]
    fn test_outbound_media_event_is_rendered() {
        // No optimistic UI exists for attachments, so the delivered event
        // must pass the echo filter.
        let mut engine = opened_engine("th-1");
        engine.route_live(raw(serde_json::json!({
            "tid": "m-1",
            "payload_type": "sentByUser",
            "media": [{"contentType": "image", "url": "https://cdn.example/x.png"}]
        })));
        let thread = engine.store().get("th-1").unwrap();
        assert_eq!(thread.messages.len(), 1);
        assert!(!thread.messages[0].hidden);
    }

    #[test]
    fn test_hidden_start_echo_suppressed_only_while_armed() {
        let mut engine = Engine::new(Some(AutoStartConfig {
            text: "Hello".into(),
            hidden: true,
            policy: AutoStartPolicy::Always,
        }));
        engine.set_threads(vec![ThreadInfo {
            id: Some("th-1".into()),
            ..Default::default()
        }]);
        let (token, _) = engine.open_thread("th-1").unwrap();
        engine.apply_history(&token, vec![]);

        engine.autostart_mut().begin();
        engine.autostart_mut().thread_created();
        engine.autostart_mut().sent(Instant::now());
        assert!(engine.autostart().armed());

        engine.route_live(raw(serde_json::json!({"tid": "e-1", "message": "Hello"})));
        assert_eq!(engine.store().get("th-1").unwrap().messages.len(), 0);
        assert!(!engine.autostart().armed(), "flag cleared by the echo");

        // Same text later is a legitimate message once disarmed.
        engine.route_live(raw(serde_json::json!({"tid": "e-2", "message": "Hello"})));
        assert_eq!(engine.store().get("th-1").unwrap().messages.len(), 1);
    }

    #[test]
    fn test_stale_history_discarded_on_thread_switch() {
        let mut engine = Engine::new(None);
        engine.set_threads(vec![
            ThreadInfo {
                id: Some("a".into()),
                ..Default::default()
            },
            ThreadInfo {
                id: Some("b".into()),
                ..Default::default()
            },
        ]);
        let (token_a, _) = engine.open_thread("a").unwrap();
        let (token_b, _) = engine.open_thread("b").unwrap();

        // Thread A's fetch resolves late; it must not land anywhere.
        let events = engine.apply_history(
            &token_a,
            vec![raw(serde_json::json!({"tid": "m-1", "message": "late"}))],
        );
        assert!(events.is_empty());
        assert!(engine.store().get("a").unwrap().messages.is_empty());

        engine.apply_history(
            &token_b,
            vec![raw(serde_json::json!({"tid": "m-2", "message": "current"}))],
        );
        assert_eq!(engine.store().get("b").unwrap().messages.len(), 1);
    }

    #[test]
    fn test_live_events_queue_behind_history_load() {
        let (mut engine, token) = engine_with_thread("th-1");

        // Arrives mid-load: queued, not routed.
        engine.route_live(raw(serde_json::json!({"tid": "live-1", "message": "live"})));
        assert!(engine.store().get("th-1").unwrap().messages.is_empty());

        // History contains the same event; the drained copy must dedup
        // against the rebuilt ledger.
        engine.route_live(raw(serde_json::json!({"tid": "h-1", "message": "old"})));
        let events = engine.apply_history(
            &token,
            vec![raw(serde_json::json!({
                "tid": "h-1",
                "message": "old",
                "created_on": "2024-05-03T10:00:00Z"
            }))],
        );
        assert!(!events.is_empty());

        let thread = engine.store().get("th-1").unwrap();
        let texts: Vec<_> = thread
            .messages
            .iter()
            .map(|m| m.text.as_deref().unwrap())
            .collect();
        assert_eq!(texts, ["old", "live"], "queued drained once, dup dropped");
    }

    #[test]
    fn test_unread_increments_for_unfocused_thread() {
        let mut engine = opened_engine("a");
        engine.set_threads(vec![
            ThreadInfo {
                id: Some("a".into()),
                ..Default::default()
            },
            ThreadInfo {
                id: Some("b".into()),
                ..Default::default()
            },
        ]);
        let events = engine.route_live(raw(serde_json::json!({
            "tid": "m-1",
            "message": "psst",
            "thread": {"id": "b"}
        })));
        assert_eq!(engine.store().get("b").unwrap().unread, 1);
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, ViewEvent::MessageRendered { .. })),
            "no incremental render for an unfocused thread"
        );
    }

    #[test]
    fn test_conversation_close_disables_input() {
        let mut engine = opened_engine("th-1");
        let events = engine.route_live(raw(serde_json::json!({
            "payload_type": "closeThread",
            "thread": {"id": "th-1"}
        })));
        assert!(engine.store().get("th-1").unwrap().closed);
        assert!(!engine.input_enabled());
        assert!(events
            .iter()
            .any(|e| matches!(e, ViewEvent::ConversationEnded { .. })));
    }

    #[test]
    fn test_click_on_call_option_dials_and_leaves_prompt_open() {
        let mut engine = opened_engine("th-1");
        engine.route_live(raw(serde_json::json!({
            "tid": "q-1",
            "message": "need help?",
            "quickReplies": {
                "options": [{
                    "identifier": "call",
                    "title": "Call us",
                    "payload": {
                        "description": crate::calling::CALL_ACTION_MARKER,
                        "destination": "sip:support@example.com",
                        "accessToken": "tok"
                    }
                }]
            }
        })));
        let (outcome, _) = engine.click_quick_reply("q-1", "call").unwrap();
        assert!(matches!(outcome, ClickOutcome::Dial(_)));
        let question = &engine.store().get("th-1").unwrap().messages[0];
        assert!(!question.answered, "call prompts are repeatable");
    }

    // End-to-end: create thread, optimistic send, quick-reply question,
    // click, server echo. One outbound bubble for the click, question
    // answered, input re-enabled.
    #[test]
    fn test_quick_reply_round_trip() {
        let mut engine = Engine::new(None);
        engine.add_thread(&ThreadInfo {
            id: Some("th-1".into()),
            ..Default::default()
        });
        let (token, _) = engine.open_thread("th-1").unwrap();
        engine.apply_history(&token, vec![]);

        let (optimistic, events) = engine.send_text("order status", true).unwrap();
        assert!(optimistic.client_id.is_some());
        assert!(events
            .iter()
            .any(|e| matches!(e, ViewEvent::MessageRendered { .. })));

        engine.route_live(qr_question_event("q-1", &["Track", "Cancel"]));
        assert!(!engine.input_enabled(), "pending question blocks input");

        let (outcome, _) = engine.click_quick_reply("q-1", "Track").unwrap();
        let ClickOutcome::Send {
            text,
            related_tid,
            interactive,
        } = outcome
        else {
            panic!("expected send outcome");
        };
        assert_eq!(text, "Track");
        assert_eq!(related_tid, "q-1");
        assert_eq!(interactive.identifier, "Track");
        assert!(engine.input_enabled(), "answered question unblocks input");

        // Server echo of the click: text-only outbound, suppressed.
        engine.route_live(raw(serde_json::json!({
            "tid": "a-1",
            "message": "Track",
            "payload_type": "sentByUser",
            "relatedTid": "q-1"
        })));

        let thread = engine.store().get("th-1").unwrap();
        let question = thread
            .messages
            .iter()
            .find(|m| m.tid.as_deref() == Some("q-1"))
            .unwrap();
        assert!(question.answered);
        assert_eq!(question.selected_option.as_deref(), Some("Track"));

        let click_bubbles = thread
            .messages
            .iter()
            .filter(|m| {
                m.is_outbound() && !m.hidden && m.text.as_deref() == Some("Track")
            })
            .count();
        assert_eq!(click_bubbles, 1, "exactly one bubble for the click");

        // A second click on the answered question is rejected.
        assert!(engine.click_quick_reply("q-1", "Cancel").is_err());
    }

    #[test]
    fn test_form_submission_validates_and_merges() {
        let mut engine = opened_engine("th-1");
        engine.route_live(raw(serde_json::json!({
            "tid": "f-1",
            "media": [{
                "templateType": "form",
                "templateId": "contact",
                "payload": {
                    "fields": [
                        {"name": "email", "label": "E-mail", "mandatory": true},
                        {"name": "note", "label": "Note"}
                    ]
                }
            }]
        })));
        assert!(!engine.input_enabled());

        let err = engine.submit_form("f-1", &[]).unwrap_err();
        assert!(matches!(err, EngineError::MissingField(_)));

        let (submission, _) = engine
            .submit_form("f-1", &[("email".into(), "a@b.c".into())])
            .unwrap();
        assert_eq!(submission.template_id, "contact");

        let thread = engine.store().get("th-1").unwrap();
        let question = &thread.messages[0];
        assert!(question.answered);
        assert_eq!(
            question
                .form()
                .unwrap()
                .fields
                .iter()
                .find(|f| f.name == "email")
                .unwrap()
                .value
                .as_deref(),
            Some("a@b.c")
        );
        assert!(engine.input_enabled());
    }

    #[test]
    fn test_live_outbound_form_answer_folds_into_question() {
        // Form answered from another tab: the delivered answer carries the
        // form media, pairs with the question, and never renders twice.
        let mut engine = opened_engine("th-1");
        engine.route_live(raw(serde_json::json!({
            "tid": "f-1",
            "media": [{
                "templateType": "form",
                "templateId": "contact",
                "payload": {"fields": [{"name": "email"}]}
            }]
        })));
        engine.route_live(raw(serde_json::json!({
            "tid": "f-2",
            "payload_type": "sentByUser",
            "media": [{
                "templateType": "form",
                "templateId": "contact",
                "payload": {"fields": [{"name": "email", "value": "x@y.z"}]}
            }]
        })));

        let thread = engine.store().get("th-1").unwrap();
        assert!(thread.messages[0].answered);
        let answer = thread
            .messages
            .iter()
            .find(|m| m.tid.as_deref() == Some("f-2"))
            .unwrap();
        assert!(answer.hidden);
        assert_eq!(thread.messages[0].direction, Direction::Inbound);
    }

    #[test]
    fn test_preview_backfill_never_overwrites() {
        let mut engine = Engine::new(None);
        engine.set_threads(vec![
            ThreadInfo {
                id: Some("a".into()),
                ..Default::default()
            },
            ThreadInfo {
                id: Some("b".into()),
                last_message: Some("existing".into()),
                ..Default::default()
            },
        ]);
        engine.set_thread_preview("a", "filled".into());
        engine.set_thread_preview("b", "clobber".into());
        assert_eq!(
            engine.store().get("a").unwrap().preview.as_deref(),
            Some("filled")
        );
        assert_eq!(
            engine.store().get("b").unwrap().preview.as_deref(),
            Some("existing")
        );
    }

    #[test]
    fn test_send_failure_marks_bubble() {
        let mut engine = opened_engine("th-1");
        let (msg, _) = engine.send_text("hi", true).unwrap();
        let events = engine.mark_send_failed(msg.client_id.as_deref().unwrap());
        assert!(events
            .iter()
            .any(|e| matches!(e, ViewEvent::SystemNotice { .. })));
        assert!(engine.store().get("th-1").unwrap().messages[0].failed);
    }
}
