//! Deduplication ledger
//!
//! Process-lifetime set of message identifiers already processed, used to
//! reject re-delivery of the same event from multiple sources (optimistic
//! echo, push delivery, history refetch). Entries are never removed except
//! by [`Ledger::clear`], which runs at the start of each full history load
//! because the load replaces the rendered transcript wholesale.

use std::collections::HashSet;

use crate::models::Message;

#[derive(Debug, Default)]
pub struct Ledger {
    seen: HashSet<String>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dedup key for a message: correlation id, then server id, then client
    /// id, then a content-based fallback for legacy events with no
    /// identifiers at all. The content fallback is the documented weak path
    /// (identical text collides); it is prefixed so it can never alias a
    /// real identifier.
    pub fn key_for(msg: &Message) -> Option<String> {
        if let Some(tid) = msg.tid.as_deref().filter(|t| !t.is_empty()) {
            return Some(tid.to_string());
        }
        if let Some(id) = msg.id.as_deref().filter(|i| !i.is_empty()) {
            return Some(id.to_string());
        }
        if let Some(client_id) = msg.client_id.as_deref().filter(|c| !c.is_empty()) {
            return Some(client_id.to_string());
        }
        msg.normalized_text().map(|text| format!("text:{text}"))
    }

    pub fn seen(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    pub fn mark(&mut self, key: &str) {
        self.seen.insert(key.to_string());
    }

    /// Atomic seen-then-mark: returns `false` when the key was already
    /// present. No suspension point between check and mark — callers on the
    /// single-threaded event path use this instead of calling the two
    /// separately.
    pub fn insert(&mut self, key: &str) -> bool {
        if self.seen(key) {
            return false;
        }
        self.mark(key);
        true
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_idempotent() {
        let mut ledger = Ledger::new();
        assert!(ledger.insert("t-1"));
        assert!(!ledger.insert("t-1"));
        assert!(ledger.seen("t-1"));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_key_prefers_tid_over_client_id() {
        let mut msg = Message::optimistic("hi");
        msg.tid = Some("t-9".into());
        assert_eq!(Ledger::key_for(&msg).as_deref(), Some("t-9"));

        msg.tid = None;
        msg.id = Some("srv-1".into());
        assert_eq!(Ledger::key_for(&msg).as_deref(), Some("srv-1"));

        msg.id = None;
        let client = msg.client_id.clone().unwrap();
        assert_eq!(Ledger::key_for(&msg), Some(client));
    }

    // Known-weak path: content fallback collides for identical text. It is
    // last in the key order on purpose.
    #[test]
    fn test_content_fallback_when_no_identifiers() {
        let mut msg = Message::optimistic("  Hello  ");
        msg.client_id = None;
        assert_eq!(Ledger::key_for(&msg).as_deref(), Some("text:hello"));

        let mut other = Message::optimistic("HELLO");
        other.client_id = None;
        assert_eq!(Ledger::key_for(&other).as_deref(), Some("text:hello"));
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut ledger = Ledger::new();
        ledger.mark("a");
        ledger.mark("b");
        ledger.clear();
        assert!(!ledger.seen("a"));
        assert_eq!(ledger.len(), 0);
    }
}
