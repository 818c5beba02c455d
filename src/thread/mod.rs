//! Thread store and conversation data model

pub mod store;
pub mod types;

pub use store::{ThreadSnapshot, ThreadStore};
pub use types::{
    new_id, now_millis, Message, Role, Thread, ToolCall, ToolCallKind, ToolResult, ToolResultKind,
};
