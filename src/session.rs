//! Process-wide chat session
//!
//! One explicit object owning the authenticated client, the reconciliation
//! engine, the push-channel task and the calling bridge, with defined init
//! and teardown. Drivers (TUI, CLI commands) act on the session; nothing
//! lives in ambient global state.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use crate::api::client::ConnectClient;
use crate::api::threads::{self, SendOptions};
use crate::calling::{self, Dialer, DisabledDialer};
use crate::config::Config;
use crate::engine::{ClickOutcome, Engine, FormSubmission, ViewEvent};
use crate::models::{RawEvent, RawMedia};
use crate::push::{self, PushCredentials};

/// Buffered push deliveries between the broker task and the UI loop.
const PUSH_QUEUE_DEPTH: usize = 64;

pub struct Session {
    client: ConnectClient,
    engine: Engine,
    dialer: Box<dyn Dialer + Send>,
    push_rx: Option<mpsc::Receiver<RawEvent>>,
    push_task: Option<tokio::task::JoinHandle<()>>,
}

impl Session {
    /// Initialize the session: register if needed, connect the push
    /// channel, load the thread list, and run the auto-start policy.
    pub async fn init() -> Result<Self> {
        let config = Config::load()?;
        let auto_start = config.auto_start();
        let push_host = config.push_host_name()?;
        let had_pending = config.pending_start_text.is_some();

        let client = ConnectClient::new(config).await?;

        let mut engine = Engine::new(auto_start);
        if had_pending {
            // A hidden start was sent before a restart; suppress its echo
            // instead of sending again.
            engine.autostart_mut().resume_pending(Instant::now());
        }

        let token = client.access_token()?.token;
        let creds = PushCredentials::derive(
            &push_host,
            client.app_id(),
            client.user_id(),
            client.device_id(),
            &token,
            client.client_key(),
        );
        let (push_tx, push_rx) = mpsc::channel(PUSH_QUEUE_DEPTH);
        let push_task = tokio::spawn(async move {
            if let Err(e) = push::connect_and_run(creds, push_tx).await {
                tracing::warn!("Push channel task ended with error: {:#}", e);
            }
        });

        let mut session = Self {
            client,
            engine,
            dialer: Box::new(DisabledDialer),
            push_rx: Some(push_rx),
            push_task: Some(push_task),
        };

        let threads = threads::list_threads(&mut session.client).await?;
        let thread_count = threads.len();
        session.engine.set_threads(threads);
        session.fill_missing_previews().await;

        if session.engine.autostart().should_start(thread_count) {
            if let Err(e) = session.run_auto_start().await {
                tracing::warn!("Auto-start failed: {:#}", e);
                session.engine.autostart_mut().failed();
                session.clear_pending_start()?;
            }
        }

        Ok(session)
    }

    /// Replace the default dialer with a real calling SDK binding.
    #[allow(dead_code)]
    pub fn set_dialer(&mut self, dialer: Box<dyn Dialer + Send>) {
        self.dialer = dialer;
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Leave the chat view (back to the thread list).
    pub fn close_thread_view(&mut self) -> Vec<ViewEvent> {
        self.engine.close_thread_view()
    }

    /// Hand the push receiver to the driver's select loop. Deliveries are
    /// fed back through [`Session::on_push`].
    pub fn take_push_receiver(&mut self) -> Option<mpsc::Receiver<RawEvent>> {
        self.push_rx.take()
    }

    /// Route one push delivery through the engine.
    pub fn on_push(&mut self, raw: RawEvent) -> Vec<ViewEvent> {
        let events = self.engine.route_live(raw);
        self.sync_pending_start();
        events
    }

    /// Expire time-bounded engine state.
    pub fn tick(&mut self, now: Instant) -> Vec<ViewEvent> {
        let events = self.engine.tick(now);
        self.sync_pending_start();
        events
    }

    /// Open a thread: focus it and load its history. A fetch that loses the
    /// race to a newer open is discarded by the engine's token guard.
    pub async fn open_thread(&mut self, thread_id: &str) -> Result<Vec<ViewEvent>> {
        let (token, mut events) = self.engine.open_thread(thread_id)?;
        match threads::fetch_history(&mut self.client, thread_id).await {
            Ok(raws) => {
                events.extend(self.engine.apply_history(&token, raws));
            }
            Err(e) => {
                tracing::warn!("History load failed for {}: {:#}", thread_id, e);
                events.extend(self.engine.history_failed(&token));
                events.push(ViewEvent::SystemNotice {
                    text: "Could not load history — open the thread again to retry".to_string(),
                });
            }
        }
        Ok(events)
    }

    /// Create a new thread and open it.
    pub async fn create_thread(&mut self) -> Result<(String, Vec<ViewEvent>)> {
        let info = threads::create_thread(&mut self.client).await?;
        let thread_id = info.id.clone().context("created thread has no id")?;
        let mut events = self.engine.add_thread(&info);
        events.extend(self.open_thread(&thread_id).await?);
        Ok((thread_id, events))
    }

    /// Send a plain text message from the focused thread's compose input.
    pub async fn send_text(&mut self, text: &str) -> Result<Vec<ViewEvent>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let thread_id = self
            .engine
            .store()
            .focused_id()
            .context("no thread open")?
            .to_string();
        let (msg, mut events) = self.engine.send_text(text, true)?;

        let options = SendOptions {
            language: Some(self.client.config().language()),
            ..Default::default()
        };
        if let Err(e) =
            threads::send_message(&mut self.client, &thread_id, Some(text), None, &options).await
        {
            tracing::warn!("Send failed: {:#}", e);
            if let Some(client_id) = msg.client_id.as_deref() {
                events.extend(self.engine.mark_send_failed(client_id));
            }
        }
        Ok(events)
    }

    /// Click a quick-reply option: answer the question, or dial a call
    /// action through the bridge.
    pub async fn click_quick_reply(
        &mut self,
        question_tid: &str,
        option_identifier: &str,
    ) -> Result<Vec<ViewEvent>> {
        let thread_id = self
            .engine
            .store()
            .focused_id()
            .context("no thread open")?
            .to_string();
        let (outcome, mut events) = self
            .engine
            .click_quick_reply(question_tid, option_identifier)?;

        match outcome {
            ClickOutcome::Send {
                text,
                related_tid,
                interactive,
            } => {
                let options = SendOptions {
                    related_tid: Some(related_tid),
                    interactive_data: Some(interactive),
                    language: Some(self.client.config().language()),
                };
                if let Err(e) = threads::send_message(
                    &mut self.client,
                    &thread_id,
                    Some(text.as_str()),
                    None,
                    &options,
                )
                .await
                {
                    tracing::warn!("Quick-reply send failed: {:#}", e);
                    events.push(ViewEvent::SystemNotice {
                        text: "Reply could not be sent".to_string(),
                    });
                }
            }
            ClickOutcome::Dial(action) => {
                events.push(self.dial(&action));
            }
        }
        Ok(events)
    }

    fn dial(&mut self, action: &calling::CallAction) -> ViewEvent {
        let result = self
            .dialer
            .register(&action.access_token)
            .and_then(|_| self.dialer.dial(action));
        match result {
            Ok(_handle) => ViewEvent::SystemNotice {
                text: format!("Calling {}...", action.destination),
            },
            Err(e) => ViewEvent::SystemNotice {
                text: format!("{e:#}"),
            },
        }
    }

    /// Submit a filled form. The question becomes the record; the answer is
    /// delivered as form media with no optimistic bubble.
    pub async fn submit_form(
        &mut self,
        question_tid: &str,
        values: &[(String, String)],
    ) -> Result<Vec<ViewEvent>> {
        let thread_id = self
            .engine
            .store()
            .focused_id()
            .context("no thread open")?
            .to_string();
        let (submission, mut events) = self.engine.submit_form(question_tid, values)?;

        let media = [form_media(&submission)];
        let options = SendOptions {
            language: Some(self.client.config().language()),
            ..Default::default()
        };
        if let Err(e) =
            threads::send_message(&mut self.client, &thread_id, None, Some(&media), &options).await
        {
            tracing::warn!("Form send failed: {:#}", e);
            events.push(ViewEvent::SystemNotice {
                text: "Form could not be sent".to_string(),
            });
        }
        Ok(events)
    }

    /// Upload a file and send it as an attachment. No optimistic bubble:
    /// the delivered outbound media event is the single rendering.
    pub async fn send_file(&mut self, path: &Path) -> Result<Vec<ViewEvent>> {
        let thread_id = self
            .engine
            .store()
            .focused_id()
            .context("no thread open")?
            .to_string();
        let asset = threads::upload_file(&mut self.client, path).await?;
        let media = [asset.to_media()];
        let options = SendOptions {
            language: Some(self.client.config().language()),
            ..Default::default()
        };
        threads::send_message(&mut self.client, &thread_id, None, Some(&media), &options).await?;
        Ok(Vec::new())
    }

    /// Tear the session down: stop the push task.
    pub fn shutdown(&mut self) {
        self.push_rx = None;
        if let Some(task) = self.push_task.take() {
            task.abort();
        }
    }

    /// Drive the auto-start flow: create a thread, open it, send the
    /// configured start message (visibly or hidden).
    async fn run_auto_start(&mut self) -> Result<()> {
        let Some(config) = self.engine.autostart().config().cloned() else {
            return Ok(());
        };
        if !self.engine.autostart_mut().begin() {
            return Ok(());
        }

        let (_, _events) = self.create_thread().await?;
        self.engine.autostart_mut().thread_created();

        if config.hidden {
            self.client.config_mut().pending_start_text = Some(config.text.clone());
            self.client.config().save()?;
        }

        let (_msg, _events) = self.engine.send_text(&config.text, !config.hidden)?;
        let thread_id = self
            .engine
            .store()
            .focused_id()
            .context("auto-start lost its thread")?
            .to_string();
        let options = SendOptions {
            language: Some(self.client.config().language()),
            ..Default::default()
        };
        threads::send_message(
            &mut self.client,
            &thread_id,
            Some(config.text.as_str()),
            None,
            &options,
        )
        .await?;
        self.engine.autostart_mut().sent(Instant::now());
        tracing::debug!("auto-start state: {:?}", self.engine.autostart().state());
        Ok(())
    }

    /// Backfill previews for threads the listing returned without a last
    /// message, from the newest displayable history entry. Best effort and
    /// bounded; a missing preview is cosmetic.
    async fn fill_missing_previews(&mut self) {
        const PREVIEW_FILL_MAX: usize = 10;

        let missing: Vec<String> = self
            .engine
            .store()
            .threads()
            .iter()
            .filter(|t| t.preview.is_none())
            .take(PREVIEW_FILL_MAX)
            .map(|t| t.id.clone())
            .collect();

        for thread_id in missing {
            let raws = match threads::fetch_history(&mut self.client, &thread_id).await {
                Ok(raws) => raws,
                Err(e) => {
                    tracing::debug!("Preview fetch failed for {}: {:#}", thread_id, e);
                    continue;
                }
            };
            let newest = raws
                .iter()
                .filter_map(|raw| match crate::engine::normalize::normalize(raw) {
                    Some(crate::engine::normalize::Normalized::Message(msg)) => Some(msg),
                    _ => None,
                })
                .max_by_key(|msg| msg.created_at);
            if let Some(msg) = newest {
                let preview = msg
                    .text
                    .clone()
                    .or_else(|| (!msg.media.is_empty()).then(|| "Attachment".to_string()));
                if let Some(preview) = preview {
                    self.engine.set_thread_preview(&thread_id, preview);
                }
            }
        }
    }

    /// Clear the persisted pending-start marker once the hidden echo was
    /// observed or timed out.
    fn sync_pending_start(&mut self) {
        if self.client.config().pending_start_text.is_some() && !self.engine.autostart().armed() {
            if let Err(e) = self.clear_pending_start() {
                tracing::warn!("Failed to clear pending start marker: {:#}", e);
            }
        }
    }

    fn clear_pending_start(&mut self) -> Result<()> {
        if self.client.config().pending_start_text.is_some() {
            self.client.config_mut().pending_start_text = None;
            self.client.config().save()?;
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Form answer as wire media: same template id, `contentType: template`,
/// fields under the payload.
fn form_media(submission: &FormSubmission) -> RawMedia {
    let fields: Vec<serde_json::Value> = submission
        .fields
        .iter()
        .map(|f| {
            serde_json::json!({
                "name": f.name,
                "label": f.label.clone().unwrap_or_else(|| f.name.clone()),
                "value": f.value.clone().unwrap_or_default(),
            })
        })
        .collect();
    RawMedia {
        template_type: Some("form".into()),
        template_id: Some(submission.template_id.clone()),
        content_type: Some("template".into()),
        payload: Some(serde_json::json!({ "fields": fields })),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FormField;

    #[test]
    fn test_form_media_shape() {
        let submission = FormSubmission {
            template_id: "contact".into(),
            fields: vec![FormField {
                name: "email".into(),
                label: Some("E-mail".into()),
                value: Some("a@b.c".into()),
                ..Default::default()
            }],
        };
        let media = form_media(&submission);
        let json = serde_json::to_value(&media).unwrap();
        assert_eq!(json["templateType"], "form");
        assert_eq!(json["templateId"], "contact");
        assert_eq!(json["contentType"], "template");
        assert_eq!(json["payload"]["fields"][0]["name"], "email");
        assert_eq!(json["payload"]["fields"][0]["value"], "a@b.c");
    }
}
