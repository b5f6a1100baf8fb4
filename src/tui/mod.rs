//! Terminal user interface
//!
//! Ratatui projection of the reconciliation engine's thread store: a thread
//! list, the reconciled transcript, and a compose line that honours the
//! engine's input-visibility state.

mod app;
mod compose;
mod messages;
mod sidebar;
mod ui;

pub use app::run;
