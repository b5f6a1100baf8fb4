//! Auto-start controller
//!
//! Small state machine for the configured start message: on first load it
//! creates a thread, opens it, and sends the start text either visibly or
//! invisibly. For hidden sends it arms an echo-suppression flag and holds it
//! until the matching echo is observed — or a bounded deadline passes, so a
//! lost echo can never suppress an unrelated later message with the same
//! text.

use std::time::{Duration, Instant};

use crate::models::message::normalize_text;

/// How long to wait for the hidden-send echo before giving up.
pub const ECHO_TIMEOUT: Duration = Duration::from_secs(30);

/// When the auto-start fires. Explicit policy flag: the trigger condition is
/// configuration, not something inferred from thread state ad hoc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoStartPolicy {
    /// Start only when the user has no threads yet (new visitor). Prevents
    /// opening a fresh conversation on every reload for returning users.
    #[default]
    OnlyWhenEmpty,
    /// Start a new conversation on every load.
    Always,
}

impl AutoStartPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "only-when-empty" => Some(Self::OnlyWhenEmpty),
            "always" => Some(Self::Always),
            _ => None,
        }
    }
}

/// Start-message configuration from the bootstrap surface.
#[derive(Debug, Clone)]
pub struct AutoStartConfig {
    pub text: String,
    pub hidden: bool,
    pub policy: AutoStartPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoStartState {
    Idle,
    Creating,
    Sending,
    /// Hidden send in flight; echo suppression is armed.
    Awaiting,
    Done,
}

#[derive(Debug)]
pub struct AutoStartController {
    config: Option<AutoStartConfig>,
    state: AutoStartState,
    deadline: Option<Instant>,
}

impl AutoStartController {
    pub fn new(config: Option<AutoStartConfig>) -> Self {
        let config = config.filter(|c| !c.text.trim().is_empty());
        Self {
            config,
            state: AutoStartState::Idle,
            deadline: None,
        }
    }

    pub fn state(&self) -> AutoStartState {
        self.state
    }

    pub fn config(&self) -> Option<&AutoStartConfig> {
        self.config.as_ref()
    }

    /// Start text of an active hidden configuration, used by the history
    /// reconciler's hidden-start suppression. Independent of the state
    /// machine: history suppression applies whenever the configuration says
    /// the start message is hidden.
    pub fn hidden_start_text(&self) -> Option<&str> {
        self.config
            .as_ref()
            .filter(|c| c.hidden)
            .map(|c| c.text.as_str())
    }

    /// Whether the controller should fire given the current thread count.
    pub fn should_start(&self, thread_count: usize) -> bool {
        if self.state != AutoStartState::Idle {
            return false;
        }
        match &self.config {
            None => false,
            Some(c) => match c.policy {
                AutoStartPolicy::Always => true,
                AutoStartPolicy::OnlyWhenEmpty => thread_count == 0,
            },
        }
    }

    /// `Idle -> Creating`. Re-entrant triggers are ignored (returns false),
    /// so a double bootstrap cannot double-send.
    pub fn begin(&mut self) -> bool {
        if self.state != AutoStartState::Idle || self.config.is_none() {
            return false;
        }
        self.state = AutoStartState::Creating;
        true
    }

    /// `Creating -> Sending` on successful thread creation.
    pub fn thread_created(&mut self) {
        if self.state == AutoStartState::Creating {
            self.state = AutoStartState::Sending;
        }
    }

    /// `Sending -> Awaiting` (hidden) or `Sending -> Done` (visible).
    pub fn sent(&mut self, now: Instant) {
        if self.state != AutoStartState::Sending {
            return;
        }
        let hidden = self.config.as_ref().map(|c| c.hidden).unwrap_or(false);
        if hidden {
            self.state = AutoStartState::Awaiting;
            self.deadline = Some(now + ECHO_TIMEOUT);
        } else {
            self.state = AutoStartState::Done;
        }
    }

    /// Any step failed: fall back to the normal launcher flow instead of
    /// staying stuck mid-transition.
    pub fn failed(&mut self) {
        self.state = AutoStartState::Done;
        self.deadline = None;
    }

    /// Resume a hidden send that was in flight when the process restarted
    /// (persisted pending-start text): arm the echo suppression without
    /// sending again.
    pub fn resume_pending(&mut self, now: Instant) {
        let hidden = self.config.as_ref().map(|c| c.hidden).unwrap_or(false);
        if self.state == AutoStartState::Idle && hidden {
            self.state = AutoStartState::Awaiting;
            self.deadline = Some(now + ECHO_TIMEOUT);
        }
    }

    /// Echo suppression is armed only while awaiting the hidden echo.
    pub fn armed(&self) -> bool {
        self.state == AutoStartState::Awaiting
    }

    /// Case-insensitive, trimmed match against the configured start text.
    pub fn matches_start_text(&self, text: &str) -> bool {
        self.config
            .as_ref()
            .map(|c| normalize_text(&c.text) == normalize_text(text))
            .unwrap_or(false)
    }

    /// The armed echo was observed and suppressed: `Awaiting -> Done`.
    pub fn suppressed(&mut self) {
        if self.state == AutoStartState::Awaiting {
            self.state = AutoStartState::Done;
            self.deadline = None;
        }
    }

    /// Expire the armed flag after the bounded timeout. Returns true when
    /// the deadline fired.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.state == AutoStartState::Awaiting {
            if let Some(deadline) = self.deadline {
                if now >= deadline {
                    self.state = AutoStartState::Done;
                    self.deadline = None;
                    return true;
                }
            }
        }
        false
    }
}
