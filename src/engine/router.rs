//! Live event routing
//!
//! One call per push-channel delivery. Applies the suppression rules
//! (hidden auto-start echo, optimistic text echo, duplicate id), updates the
//! thread store, and emits incremental render instructions for the focused
//! thread.

use crate::models::RawEvent;

use super::autostart::AutoStartController;
use super::ledger::Ledger;
use super::normalize::{normalize, Normalized, SystemEvent};
use super::reconcile;
use super::store::ThreadStore;
use super::ViewEvent;

pub(super) fn route(
    raw: &RawEvent,
    store: &mut ThreadStore,
    ledger: &mut Ledger,
    autostart: &mut AutoStartController,
    out: &mut Vec<ViewEvent>,
) {
    let Some(normalized) = normalize(raw) else {
        tracing::debug!("skipping event with no displayable content");
        return;
    };

    let mut msg = match normalized {
        Normalized::System(event) => {
            route_system(event, raw, store, out);
            return;
        }
        Normalized::Message(msg) => msg,
    };

    // A real inbound message supersedes any typing indicator.
    if !msg.is_outbound() {
        out.push(ViewEvent::TypingChanged { visible: false });
    }

    // Live events without a usable timestamp are stamped at arrival so they
    // append after existing history instead of sorting to the epoch.
    if msg.created_at.timestamp() == 0 {
        msg.created_at = chrono::Utc::now();
    }

    // Armed hidden-start echo: swallow the configured start text once.
    if autostart.armed() {
        if let Some(text) = msg.text.as_deref() {
            if autostart.matches_start_text(text) {
                tracing::debug!("suppressing hidden start echo");
                autostart.suppressed();
                if let Some(key) = Ledger::key_for(&msg) {
                    ledger.mark(&key);
                }
                return;
            }
        }
    }

    // Text-only outbound events are echoes of an optimistic send. Outbound
    // events carrying media are not: attachments and form submissions have
    // no optimistic bubble, so the delivered event is their only rendering.
    if msg.is_outbound() && msg.media.is_empty() {
        tracing::debug!("suppressing text-only outbound echo");
        return;
    }

    if let Some(key) = Ledger::key_for(&msg) {
        if !ledger.insert(&key) {
            tracing::debug!("skipping duplicate event: {}", key);
            return;
        }
    }

    let event_thread_id = raw.thread.as_ref().and_then(|t| t.id.as_deref());
    let Some(thread_id) = store.resolve_thread_id(event_thread_id) else {
        tracing::warn!("event for unknown thread and no thread open, dropping");
        return;
    };
    let is_focused = store.focused_id() == Some(thread_id.as_str());

    let Some(thread) = store.get_mut(&thread_id) else {
        tracing::warn!("event for thread {} not in store, dropping", thread_id);
        return;
    };

    // A delivered outbound answer folds into its question instead of
    // rendering as a second bubble.
    if msg.is_outbound() && (msg.form().is_some() || msg.related_tid.is_some()) {
        reconcile::pair_live_answer(&mut thread.messages, &mut msg);
    }

    thread.update_preview(&msg);
    if !is_focused && !msg.is_outbound() {
        thread.unread += 1;
    }

    let rendered = (!msg.hidden).then(|| msg.clone());
    thread.insert_ordered(msg);

    out.push(ViewEvent::ThreadListChanged);
    if is_focused {
        if let Some(message) = rendered {
            out.push(ViewEvent::MessageRendered {
                thread_id: thread_id.clone(),
                message,
            });
        }
        let enabled = store
            .get(&thread_id)
            .map(|t| t.input_enabled())
            .unwrap_or(true);
        out.push(ViewEvent::InputVisibilityChanged { enabled });
    }
}

fn route_system(
    event: SystemEvent,
    raw: &RawEvent,
    store: &mut ThreadStore,
    out: &mut Vec<ViewEvent>,
) {
    match event {
        SystemEvent::TypingOn => out.push(ViewEvent::TypingChanged { visible: true }),
        SystemEvent::TypingOff => out.push(ViewEvent::TypingChanged { visible: false }),
        SystemEvent::AgentAssigned { name } => out.push(ViewEvent::SystemNotice {
            text: format!("{name} assigned"),
        }),
        SystemEvent::ConversationClosed => {
            let event_thread_id = raw.thread.as_ref().and_then(|t| t.id.as_deref());
            let Some(thread_id) = store.resolve_thread_id(event_thread_id) else {
                return;
            };
            if let Some(thread) = store.get_mut(&thread_id) {
                thread.closed = true;
            }
            let focused = store.focused_id() == Some(thread_id.as_str());
            out.push(ViewEvent::ConversationEnded {
                thread_id: thread_id.clone(),
            });
            if focused {
                out.push(ViewEvent::InputVisibilityChanged { enabled: false });
            }
        }
    }
}
