//! TUI application state and main event loop

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use futures::StreamExt;
use ratatui::DefaultTerminal;
use tokio::sync::mpsc;
use tokio::time;

use super::compose::ComposeState;
use super::ui;
use crate::engine::ViewEvent;
use crate::models::{FormField, Message, RawEvent};
use crate::session::Session;

/// How long a transient notice stays on screen.
const NOTICE_TTL: Duration = Duration::from_secs(6);

/// Active view
#[derive(Default, Clone, Copy, PartialEq, Eq)]
pub enum View {
    #[default]
    List,
    Chat,
}

/// In-progress form fill: one field at a time through the prompt line.
pub struct FormFill {
    pub tid: String,
    pub fields: Vec<FormField>,
    pub index: usize,
    pub values: Vec<(String, String)>,
    pub input: ComposeState,
}

impl FormFill {
    pub fn current_field(&self) -> Option<&FormField> {
        self.fields.get(self.index)
    }
}

/// Application state
pub struct App {
    pub session: Session,
    pub view: View,
    /// Sidebar selection index.
    pub selected: usize,
    pub compose: ComposeState,
    pub form: Option<FormFill>,
    pub typing: bool,
    pub notice: Option<(String, Instant)>,
    pub input_enabled: bool,
    /// Transcript scroll, in lines up from the bottom.
    pub scroll_from_bottom: u16,
    pub should_exit: bool,
}

impl App {
    pub fn new(session: Session) -> Self {
        let view = if session.engine().store().is_empty() {
            View::List
        } else if session.engine().store().focused().is_some() {
            // Auto-start left a thread open.
            View::Chat
        } else {
            View::List
        };
        let input_enabled = session.engine().input_enabled();
        Self {
            session,
            view,
            selected: 0,
            compose: ComposeState::default(),
            form: None,
            typing: false,
            notice: None,
            input_enabled,
            scroll_from_bottom: 0,
            should_exit: false,
        }
    }

    /// Fold engine view events into the app's transient display state. The
    /// transcript and thread list themselves are re-read from the store on
    /// every draw.
    pub fn apply_events(&mut self, events: Vec<ViewEvent>) {
        for event in events {
            match event {
                ViewEvent::TypingChanged { visible } => self.typing = visible,
                ViewEvent::InputVisibilityChanged { enabled } => self.input_enabled = enabled,
                ViewEvent::SystemNotice { text } => {
                    self.notice = Some((text, Instant::now()));
                }
                ViewEvent::ConversationEnded { .. } => {
                    self.notice = Some(("Conversation ended".to_string(), Instant::now()));
                }
                ViewEvent::MessageRendered { .. } | ViewEvent::HistoryRendered { .. } => {
                    self.scroll_from_bottom = 0;
                }
                ViewEvent::ThreadListChanged => {}
            }
        }
    }

    pub fn on_tick(&mut self) {
        let events = self.session.tick(Instant::now());
        self.apply_events(events);
        if let Some((_, since)) = &self.notice {
            if since.elapsed() > NOTICE_TTL {
                self.notice = None;
            }
        }
    }

    /// The unanswered inbound prompt currently blocking or decorating the
    /// focused thread, if any.
    pub fn pending_question(&self) -> Option<&Message> {
        let thread = self.session.engine().store().focused()?;
        let last = thread.last_visible()?;
        (!last.is_outbound() && !last.answered && last.is_interactive()).then_some(last)
    }

    pub async fn handle_key(&mut self, key: KeyEvent) -> Result<()> {
        if key.kind != KeyEventKind::Press {
            return Ok(());
        }
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.should_exit = true;
            return Ok(());
        }
        if self.form.is_some() {
            self.handle_form_key(key).await?;
            return Ok(());
        }
        match self.view {
            View::List => self.handle_list_key(key).await?,
            View::Chat => self.handle_chat_key(key).await?,
        }
        Ok(())
    }

    async fn handle_list_key(&mut self, key: KeyEvent) -> Result<()> {
        let count = self.session.engine().store().threads().len();
        match key.code {
            KeyCode::Char('q') => self.should_exit = true,
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected = self.selected.saturating_sub(1);
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if count > 0 {
                    self.selected = (self.selected + 1).min(count - 1);
                }
            }
            KeyCode::Enter => {
                let id = self
                    .session
                    .engine()
                    .store()
                    .threads()
                    .get(self.selected)
                    .map(|t| t.id.clone());
                if let Some(id) = id {
                    let events = self.session.open_thread(&id).await?;
                    self.apply_events(events);
                    self.view = View::Chat;
                    self.scroll_from_bottom = 0;
                }
            }
            KeyCode::Char('n') => match self.session.create_thread().await {
                Ok((_, events)) => {
                    self.apply_events(events);
                    self.view = View::Chat;
                    self.selected = 0;
                }
                Err(e) => {
                    self.notice = Some((format!("Could not start a chat: {e:#}"), Instant::now()));
                }
            },
            _ => {}
        }
        Ok(())
    }

    async fn handle_chat_key(&mut self, key: KeyEvent) -> Result<()> {
        match key.code {
            KeyCode::Esc => {
                let events = self.session.close_thread_view();
                self.apply_events(events);
                self.view = View::List;
                self.typing = false;
                return Ok(());
            }
            KeyCode::PageUp => {
                self.scroll_from_bottom = self.scroll_from_bottom.saturating_add(5);
                return Ok(());
            }
            KeyCode::PageDown => {
                self.scroll_from_bottom = self.scroll_from_bottom.saturating_sub(5);
                return Ok(());
            }
            _ => {}
        }

        // Quick-reply answers: digits pick an option while a question is
        // pending. Call-action prompts never block input, so for those the
        // digits only apply while the compose line is empty.
        if let KeyCode::Char(ch @ '1'..='9') = key.code {
            if let Some(question) = self.pending_question() {
                if !self.input_enabled || self.compose.is_empty() {
                    let index = (ch as u8 - b'1') as usize;
                    let pick = question.tid.clone().zip(
                        question
                            .quick_replies()
                            .and_then(|qr| qr.options.get(index))
                            .map(|opt| opt.identifier.clone()),
                    );
                    if let Some((tid, identifier)) = pick {
                        match self.session.click_quick_reply(&tid, &identifier).await {
                            Ok(events) => self.apply_events(events),
                            Err(e) => {
                                self.notice =
                                    Some((format!("{e:#}"), Instant::now()));
                            }
                        }
                        return Ok(());
                    }
                }
            }
        }

        // A pending form is entered with Enter and filled field by field.
        if key.code == KeyCode::Enter && !self.input_enabled {
            let pending = self.pending_question().and_then(|question| {
                let tid = question.tid.clone()?;
                let form = question.form()?;
                Some((tid, form.fields.clone()))
            });
            if let Some((tid, fields)) = pending {
                self.form = Some(FormFill {
                    tid,
                    fields,
                    index: 0,
                    values: Vec::new(),
                    input: ComposeState::default(),
                });
            }
            return Ok(());
        }

        if !self.input_enabled {
            return Ok(());
        }

        match key.code {
            KeyCode::Enter => {
                if !self.compose.is_empty() {
                    let text = self.compose.take();
                    if let Some(path) = text.strip_prefix("/attach ") {
                        match self.session.send_file(Path::new(path.trim())).await {
                            Ok(events) => self.apply_events(events),
                            Err(e) => {
                                self.notice =
                                    Some((format!("Upload failed: {e:#}"), Instant::now()));
                            }
                        }
                    } else {
                        let events = self.session.send_text(&text).await?;
                        self.apply_events(events);
                    }
                }
            }
            KeyCode::Char(ch) => self.compose.insert(ch),
            KeyCode::Backspace => self.compose.backspace(),
            KeyCode::Delete => self.compose.delete(),
            KeyCode::Left => self.compose.move_left(),
            KeyCode::Right => self.compose.move_right(),
            KeyCode::Home => self.compose.move_home(),
            KeyCode::End => self.compose.move_end(),
            _ => {}
        }
        Ok(())
    }

    async fn handle_form_key(&mut self, key: KeyEvent) -> Result<()> {
        let Some(form) = self.form.as_mut() else {
            return Ok(());
        };
        match key.code {
            KeyCode::Esc => {
                self.form = None;
            }
            KeyCode::Enter => {
                let value = form.input.take();
                if let Some(field) = form.current_field() {
                    form.values.push((field.name.clone(), value));
                }
                form.index += 1;
                if form.index >= form.fields.len() {
                    if let Some(fill) = self.form.take() {
                        match self.session.submit_form(&fill.tid, &fill.values).await {
                            Ok(events) => self.apply_events(events),
                            Err(e) => {
                                // Typically a missing mandatory field; the
                                // form stays pending for another attempt.
                                self.notice = Some((format!("{e:#}"), Instant::now()));
                            }
                        }
                    }
                }
            }
            KeyCode::Char(ch) => form.input.insert(ch),
            KeyCode::Backspace => form.input.backspace(),
            KeyCode::Left => form.input.move_left(),
            KeyCode::Right => form.input.move_right(),
            _ => {}
        }
        Ok(())
    }
}

/// Launch the terminal UI with terminal restore on exit.
pub async fn run() -> Result<()> {
    let mut session = Session::init().await?;
    let push_rx = session.take_push_receiver();

    let mut terminal = ratatui::init();
    let result = run_app(&mut terminal, session, push_rx).await;
    ratatui::restore();
    result
}

async fn run_app(
    terminal: &mut DefaultTerminal,
    session: Session,
    mut push_rx: Option<mpsc::Receiver<RawEvent>>,
) -> Result<()> {
    let mut app = App::new(session);
    let mut input = EventStream::new();
    let mut tick = time::interval(Duration::from_secs(1));

    while !app.should_exit {
        terminal.draw(|frame| ui::render(frame, &app))?;

        tokio::select! {
            maybe_event = input.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key))) => app.handle_key(key).await?,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => break,
                }
            }
            raw = recv_push(&mut push_rx) => {
                if let Some(raw) = raw {
                    let events = app.session.on_push(raw);
                    app.apply_events(events);
                } else {
                    push_rx = None;
                }
            }
            _ = tick.tick() => app.on_tick(),
        }
    }
    Ok(())
}

/// Await the next push delivery, or hang forever once the channel is gone
/// so the select loop keeps serving input events.
async fn recv_push(rx: &mut Option<mpsc::Receiver<RawEvent>>) -> Option<RawEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
