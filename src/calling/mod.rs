//! Calling bridge
//!
//! The VoIP SDK is an external collaborator; this module only defines the
//! boundary: detecting call-action payloads on quick-reply options, and the
//! `Dialer` contract a real SDK binding would implement. Call-action options
//! represent a standing offer — the reconciliation engine never marks them
//! answered or hides them (see `engine::reconcile`).

use anyhow::{bail, Result};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::models::{QuickReplyOption, QuickReplySet};

/// Vendor marker on call-action payloads.
pub const CALL_ACTION_MARKER: &str = "make a call using webex calling";

/// A dialable call action carried by a quick-reply option payload.
#[derive(Debug, Clone, Deserialize)]
pub struct CallAction {
    pub destination: String,
    #[serde(rename = "accessToken")]
    pub access_token: String,
    pub description: Option<String>,
}

/// Parse a quick-reply option payload into a call action.
///
/// Requires both `destination` and `accessToken`; the description marker
/// alone is not enough (payloads without dialing data are not actionable).
pub fn call_action(option: &QuickReplyOption) -> Option<CallAction> {
    let payload = option.payload.as_ref()?;
    let action: CallAction = serde_json::from_value(payload.clone()).ok()?;
    if action.destination.is_empty() || action.access_token.is_empty() {
        return None;
    }
    Some(action)
}

/// Whether any option in the set is a call action.
pub fn has_call_action(set: &QuickReplySet) -> bool {
    set.options.iter().any(|opt| call_action(opt).is_some())
}

/// Progress events emitted by an active call.
#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    Ringing,
    Connected,
    Disconnected,
    Error(String),
}

/// Handle on an in-flight call; events arrive on the channel until the call
/// terminates.
#[allow(dead_code)]
pub struct CallHandle {
    pub events: mpsc::Receiver<CallEvent>,
}

/// Contract for a calling SDK binding.
pub trait Dialer {
    /// Register with the calling backend using the payload-scoped token.
    fn register(&mut self, access_token: &str) -> Result<()>;
    /// Place an audio call to the action's destination.
    fn dial(&mut self, action: &CallAction) -> Result<CallHandle>;
}

/// Default dialer for builds without a calling SDK: rejects every call with
/// a user-facing message instead of failing silently.
pub struct DisabledDialer;

impl Dialer for DisabledDialer {
    fn register(&mut self, _access_token: &str) -> Result<()> {
        bail!("calling support is not available in this build")
    }

    fn dial(&mut self, _action: &CallAction) -> Result<CallHandle> {
        bail!("calling support is not available in this build")
    }
}
