//! Data models shared across the crate

pub mod event;
pub mod message;
pub mod thread;

pub use event::{RawEvent, RawInteractiveData, RawMedia};
pub use message::{
    Attachment, Direction, FormField, FormPayload, Media, Message, QuickReplyOption, QuickReplySet,
};
pub use thread::ThreadInfo;
