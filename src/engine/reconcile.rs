//! History reconciliation
//!
//! Takes one thread's freshly fetched history and annotates it in place:
//! pairs interactive questions (forms, quick replies) with their answers,
//! marks questions answered, hides merged answers, and hides abandoned
//! prompts. Entries are never removed — only the derived flags change, so
//! the transcript stays reproducible.

use crate::calling;
use crate::models::{message::normalize_text, FormPayload, Message};

/// Outcome of pairing a quick-reply answer against its question.
#[derive(Debug, PartialEq, Eq)]
enum QuickReplyPairing {
    /// Question found and marked answered; hide the answer bubble.
    Paired,
    /// The selected option is a call action: repeatable, so the question
    /// stays unanswered and the answer stays visible.
    CallAction,
    /// No unanswered question with that tid, or no resolvable option.
    NotFound,
}

/// Reconcile a chronologically ordered history list in place.
///
/// The caller is expected to pass messages sorted ascending by `created_at`;
/// the defensive re-sort guards against out-of-order API responses because
/// the pairing below is a backward scan and silently mispairs on unsorted
/// input.
pub fn reconcile(messages: &mut [Message], hidden_start_text: Option<&str>) {
    messages.sort_by_key(|m| m.created_at);

    suppress_hidden_start(messages, hidden_start_text);
    pair_answers(messages);
    hide_abandoned(messages);
}

/// Hide the first (and only the first) message matching the configured
/// hidden auto-start text. Later messages with coincidentally identical
/// text stay visible.
fn suppress_hidden_start(messages: &mut [Message], hidden_start_text: Option<&str>) {
    let Some(expected) = hidden_start_text.map(normalize_text).filter(|t| !t.is_empty()) else {
        return;
    };
    for msg in messages.iter_mut() {
        if msg.normalized_text().as_deref() == Some(expected.as_str()) {
            msg.hidden = true;
            break;
        }
    }
}

/// Single forward pass; each answer looks backward for the nearest matching
/// unanswered question.
fn pair_answers(messages: &mut [Message]) {
    for i in 0..messages.len() {
        let (earlier, rest) = messages.split_at_mut(i);
        let answer = &mut rest[0];
        if !answer.is_outbound() {
            continue;
        }

        let mut hide = false;

        let answer_forms: Vec<FormPayload> = answer
            .media
            .iter()
            .filter_map(|m| match m {
                crate::models::Media::Form(f) => Some(f.clone()),
                _ => None,
            })
            .collect();
        for form in &answer_forms {
            if pair_form_answer(earlier, form) {
                hide = true;
            }
        }

        if let Some(related) = answer.related_tid.clone() {
            let pairing = pair_quick_reply_answer(
                earlier,
                &related,
                answer.interactive_id.as_deref(),
                answer.text.as_deref(),
            );
            if pairing == QuickReplyPairing::Paired {
                hide = true;
            }
        }

        if hide {
            answer.hidden = true;
        }
    }
}

/// Pair a form answer with the nearest prior unanswered inbound question
/// carrying the same template id, copying the answered field values onto
/// the question's form. Nearest-match semantics: the scan stops at the
/// first hit, never pairing with an older question of the same template.
fn pair_form_answer(earlier: &mut [Message], answer_form: &FormPayload) -> bool {
    for question in earlier.iter_mut().rev() {
        if question.is_outbound() || question.answered {
            continue;
        }
        let Some(question_form) = question.form_mut() else {
            continue;
        };
        if question_form.template_id != answer_form.template_id {
            continue;
        }

        for field in question_form.fields.iter_mut() {
            let value = answer_form
                .fields
                .iter()
                .find(|af| af.name == field.name)
                .and_then(|af| af.value.clone())
                .filter(|v| !v.is_empty());
            if let Some(value) = value {
                field.value = Some(value);
            }
        }
        question.answered = true;
        return true;
    }
    false
}

/// Pair a quick-reply answer with the question whose tid it references.
///
/// The selected option comes from the answer's interactive data when
/// present, else from matching the answer text against option titles
/// (case-insensitive, trimmed). Only the nearest tid match is considered.
fn pair_quick_reply_answer(
    earlier: &mut [Message],
    related_tid: &str,
    interactive_id: Option<&str>,
    answer_text: Option<&str>,
) -> QuickReplyPairing {
    for question in earlier.iter_mut().rev() {
        if question.tid.as_deref() != Some(related_tid) || question.answered {
            continue;
        }
        let Some(qr) = question.quick_replies() else {
            continue;
        };

        let identifier = interactive_id.map(String::from).or_else(|| {
            let text = normalize_text(answer_text?);
            qr.options
                .iter()
                .find(|opt| normalize_text(&opt.title) == text)
                .map(|opt| opt.identifier.clone())
        });

        let Some(identifier) = identifier else {
            // Nearest match found but no resolvable option; stop scanning.
            return QuickReplyPairing::NotFound;
        };

        let selected_is_call = qr
            .options
            .iter()
            .find(|opt| opt.identifier == identifier)
            .map(|opt| calling::call_action(opt).is_some())
            .unwrap_or(false);
        if selected_is_call {
            return QuickReplyPairing::CallAction;
        }

        question.answered = true;
        question.selected_option = Some(identifier);
        return QuickReplyPairing::Paired;
    }
    QuickReplyPairing::NotFound
}

/// Hide unanswered interactive prompts from abandoned turns. The single
/// most recent message always stays visible (the user may still answer it),
/// and call-action prompts are a standing offer, never abandoned.
fn hide_abandoned(messages: &mut [Message]) {
    let Some(last_index) = messages.len().checked_sub(1) else {
        return;
    };
    for (idx, msg) in messages.iter_mut().enumerate() {
        if msg.hidden || msg.is_outbound() || msg.answered || idx >= last_index {
            continue;
        }
        let interactive = msg.form().is_some()
            || msg
                .quick_replies()
                .map(|qr| !calling::has_call_action(qr))
                .unwrap_or(false);
        if interactive {
            msg.hidden = true;
        }
    }
}

/// Pair a just-delivered outbound answer against the thread's existing
/// messages. Same semantics as the history pass; returns `true` when the
/// answer was merged (and should be hidden rather than rendered).
pub fn pair_live_answer(existing: &mut [Message], answer: &mut Message) -> bool {
    let mut hide = false;

    let answer_forms: Vec<FormPayload> = answer
        .media
        .iter()
        .filter_map(|m| match m {
            crate::models::Media::Form(f) => Some(f.clone()),
            _ => None,
        })
        .collect();
    for form in &answer_forms {
        if pair_form_answer(existing, form) {
            hide = true;
        }
    }

    if let Some(related) = answer.related_tid.clone() {
        if pair_quick_reply_answer(
            existing,
            &related,
            answer.interactive_id.as_deref(),
            answer.text.as_deref(),
        ) == QuickReplyPairing::Paired
        {
            hide = true;
        }
    }

    if hide {
        answer.hidden = true;
    }
    hide
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Direction, FormField, Media, QuickReplyOption, QuickReplySet,
    };
    use chrono::{TimeZone, Utc};

    fn at(secs: i64, mut msg: Message) -> Message {
        msg.created_at = Utc.timestamp_opt(secs, 0).unwrap();
        msg
    }

    fn inbound_text(text: &str) -> Message {
        let mut msg = Message::optimistic(text);
        msg.direction = Direction::Inbound;
        msg
    }

    fn form_question(tid: &str, template: &str) -> Message {
        let mut msg = inbound_text("please fill in");
        msg.tid = Some(tid.into());
        msg.media.push(Media::Form(FormPayload {
            template_id: template.into(),
            title: None,
            fields: vec![
                FormField {
                    name: "email".into(),
                    ..Default::default()
                },
                FormField {
                    name: "phone".into(),
                    ..Default::default()
                },
            ],
        }));
        msg
    }

    fn form_answer(template: &str, email: &str) -> Message {
        let mut msg = Message::optimistic("");
        msg.text = None;
        msg.media.push(Media::Form(FormPayload {
            template_id: template.into(),
            title: None,
            fields: vec![FormField {
                name: "email".into(),
                value: Some(email.into()),
                ..Default::default()
            }],
        }));
        msg
    }

    fn qr_question(tid: &str, options: &[&str]) -> Message {
        let mut msg = inbound_text("choose");
        msg.tid = Some(tid.into());
        msg.media.push(Media::QuickReplies(QuickReplySet {
            reference: Some("service".into()),
            options: options
                .iter()
                .map(|title| QuickReplyOption {
                    identifier: title.to_string(),
                    title: title.to_string(),
                    ..Default::default()
                })
                .collect(),
        }));
        msg
    }

    fn qr_call_question(tid: &str) -> Message {
        let mut msg = inbound_text("talk to us");
        msg.tid = Some(tid.into());
        msg.media.push(Media::QuickReplies(QuickReplySet {
            reference: None,
            options: vec![QuickReplyOption {
                identifier: "call".into(),
                title: "Call us".into(),
                payload: Some(serde_json::json!({
                    "description": calling::CALL_ACTION_MARKER,
                    "destination": "sip:x@y",
                    "accessToken": "tok"
                })),
                ..Default::default()
            }],
        }));
        msg
    }

    fn qr_answer(related: &str, identifier: Option<&str>, text: &str) -> Message {
        let mut msg = Message::optimistic(text);
        msg.related_tid = Some(related.into());
        msg.interactive_id = identifier.map(String::from);
        msg
    }

    #[test]
    fn test_defensive_resort() {
        let mut messages = vec![
            at(200, inbound_text("second")),
            at(100, inbound_text("first")),
        ];
        reconcile(&mut messages, None);
        assert_eq!(messages[0].text.as_deref(), Some("first"));
    }

    #[test]
    fn test_answer_pairs_with_nearest_unanswered_question() {
        // Q1 and Q2 share a template; the answer after Q2 must pair with Q2.
        let mut messages = vec![
            at(1, form_question("q1", "contact")),
            at(2, form_question("q2", "contact")),
            at(3, form_answer("contact", "a@b.c")),
        ];
        reconcile(&mut messages, None);

        assert!(!messages[0].answered, "older question untouched");
        assert!(messages[1].answered, "nearest question answered");
        assert!(messages[2].hidden, "answer bubble merged away");
        let merged = messages[1].form().unwrap();
        assert_eq!(
            merged.fields.iter().find(|f| f.name == "email").unwrap().value.as_deref(),
            Some("a@b.c")
        );
    }

    #[test]
    fn test_quick_reply_pairing_by_identifier() {
        let mut messages = vec![
            at(1, qr_question("q1", &["Track", "Cancel"])),
            at(2, qr_answer("q1", Some("Track"), "Track")),
            at(3, inbound_text("tracking started")),
        ];
        reconcile(&mut messages, None);
        assert!(messages[0].answered);
        assert_eq!(messages[0].selected_option.as_deref(), Some("Track"));
        assert!(messages[1].hidden);
    }

    #[test]
    fn test_quick_reply_pairing_by_title_fallback() {
        // Legacy history items drop interactiveData; the answer text matches
        // an option title instead.
        let mut messages = vec![
            at(1, qr_question("q1", &["Track", "Cancel"])),
            at(2, qr_answer("q1", None, "  CANCEL ")),
            at(3, inbound_text("cancelled")),
        ];
        reconcile(&mut messages, None);
        assert!(messages[0].answered);
        assert_eq!(messages[0].selected_option.as_deref(), Some("Cancel"));
        assert!(messages[1].hidden);
    }

    #[test]
    fn test_call_action_answer_is_non_terminating() {
        let mut messages = vec![
            at(1, qr_call_question("q1")),
            at(2, qr_answer("q1", Some("call"), "Call us")),
            at(3, inbound_text("anything else?")),
        ];
        reconcile(&mut messages, None);
        assert!(!messages[0].answered, "call prompts stay clickable");
        assert!(!messages[0].hidden);
        assert!(!messages[1].hidden, "call answer stays visible");
    }

    #[test]
    fn test_abandoned_prompts_hidden_except_last() {
        let mut messages = vec![
            at(1, qr_question("q1", &["A"])),
            at(2, qr_question("q2", &["B"])),
        ];
        reconcile(&mut messages, None);
        assert!(messages[0].hidden, "stale prompt hidden");
        assert!(!messages[1].hidden, "latest prompt stays live");
    }

    #[test]
    fn test_call_action_prompt_never_abandoned() {
        let mut messages = vec![
            at(1, qr_call_question("q1")),
            at(2, inbound_text("anything else?")),
        ];
        reconcile(&mut messages, None);
        assert!(!messages[0].hidden);
    }

    #[test]
    fn test_hidden_start_suppresses_only_first_match() {
        let mut hello_again = Message::optimistic("Hello");
        hello_again.direction = Direction::Inbound;
        let mut messages = vec![
            at(1, Message::optimistic("Hello")),
            at(2, hello_again),
        ];
        reconcile(&mut messages, Some("hello"));
        assert!(messages[0].hidden);
        assert!(!messages[1].hidden);
    }

    #[test]
    fn test_missing_fields_mean_no_match_not_error() {
        // Answer referencing an unknown tid, question without options.
        let mut messages = vec![
            at(1, inbound_text("plain")),
            at(2, qr_answer("ghost", Some("x"), "x")),
        ];
        reconcile(&mut messages, None);
        assert!(!messages[1].hidden);
    }

    #[test]
    fn test_pair_live_answer_merges_into_existing() {
        let mut existing = vec![at(1, qr_question("q1", &["Track", "Cancel"]))];
        let mut answer = qr_answer("q1", Some("Track"), "Track");
        assert!(pair_live_answer(&mut existing, &mut answer));
        assert!(existing[0].answered);
        assert!(answer.hidden);
    }
}
