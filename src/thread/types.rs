//! Conversation data model
//!
//! Threads, messages and the tool records embedded in assistant messages.
//! Field names serialize in camelCase so persisted threads and request
//! payloads keep the wire shape the chat backend expects.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Message typed by the user
    User,
    /// Message produced by the backend
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// Discriminator carried by every [`ToolCall`] (`"type": "tool-call"`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ToolCallKind {
    #[default]
    #[serde(rename = "tool-call")]
    ToolCall,
}

/// Discriminator carried by every [`ToolResult`] (`"type": "tool-result"`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ToolResultKind {
    #[default]
    #[serde(rename = "tool-result")]
    ToolResult,
}

/// A tool invocation announced inside the assistant's streamed text
///
/// Identified by `tool_call_id`, which is unique within one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Always `tool-call`
    #[serde(rename = "type", default)]
    pub kind: ToolCallKind,
    /// Name of the invoked tool
    pub tool_name: String,
    /// Identifier pairing this call with its result
    pub tool_call_id: String,
    /// Arbitrary structured arguments
    #[serde(default, alias = "arguments")]
    pub args: serde_json::Value,
}

impl ToolCall {
    /// Creates a tool call record
    ///
    /// # Examples
    ///
    /// ```
    /// use threadline::thread::ToolCall;
    ///
    /// let call = ToolCall::new("search", "call_1", serde_json::json!({"q": "rust"}));
    /// assert_eq!(call.tool_call_id, "call_1");
    /// ```
    pub fn new(
        tool_name: impl Into<String>,
        tool_call_id: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        Self {
            kind: ToolCallKind::ToolCall,
            tool_name: tool_name.into(),
            tool_call_id: tool_call_id.into(),
            args,
        }
    }
}

/// The outcome of a tool invocation, streamed back after its [`ToolCall`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    /// Always `tool-result`
    #[serde(rename = "type", default)]
    pub kind: ToolResultKind,
    /// Identifier of the call this result answers
    pub tool_call_id: String,
    /// Name of the tool that produced the result
    pub tool_name: String,
    /// Arbitrary structured result
    #[serde(default)]
    pub result: serde_json::Value,
}

impl ToolResult {
    /// Creates a tool result record
    pub fn new(
        tool_name: impl Into<String>,
        tool_call_id: impl Into<String>,
        result: serde_json::Value,
    ) -> Self {
        Self {
            kind: ToolResultKind::ToolResult,
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            result,
        }
    }
}

/// A single chat message
///
/// User messages are immutable once created. An assistant message that is
/// being streamed is overwritten as a whole (by `id`) after every chunk and
/// frozen once the stream ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Identifier, unique within the owning thread
    pub id: String,
    /// Author of the message
    pub role: Role,
    /// Display text (tool markers already removed for assistant messages)
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<ToolResult>>,
    /// Model that produced an assistant message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Creation time in epoch milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_per_second: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    /// Milliseconds from request start to the first non-empty chunk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_first_token: Option<u64>,
}

impl Message {
    /// Creates a user message with a fresh identifier and the current timestamp
    ///
    /// # Examples
    ///
    /// ```
    /// use threadline::thread::{Message, Role};
    ///
    /// let msg = Message::user("Hello");
    /// assert_eq!(msg.role, Role::User);
    /// assert!(msg.timestamp.is_some());
    /// ```
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            timestamp: Some(now_millis()),
            ..Self::bare(new_id(), Role::User, content)
        }
    }

    /// Creates a finished assistant message with a fresh identifier
    pub fn assistant(content: impl Into<String>, model: Option<String>) -> Self {
        Self {
            model,
            timestamp: Some(now_millis()),
            ..Self::bare(new_id(), Role::Assistant, content)
        }
    }

    /// Creates the empty assistant message a stream writes into
    pub fn stream_placeholder(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            timestamp: Some(now_millis()),
            ..Self::bare(id, Role::Assistant, "")
        }
    }

    /// Creates a message with only the required fields set
    pub fn bare(id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
            tool_calls: None,
            tool_results: None,
            model: None,
            timestamp: None,
            tokens_per_second: None,
            total_tokens: None,
            time_to_first_token: None,
        }
    }

    /// Returns true for messages authored by the user
    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}

/// One conversation: an ordered list of messages with a title
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Thread {
    /// Creates an empty thread with a fresh identifier
    ///
    /// # Examples
    ///
    /// ```
    /// use threadline::thread::Thread;
    ///
    /// let thread = Thread::new("New Chat");
    /// assert!(thread.messages.is_empty());
    /// ```
    pub fn new(title: impl Into<String>) -> Self {
        Self::with_messages(title, Vec::new())
    }

    /// Creates a thread seeded with existing messages
    pub fn with_messages(title: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            id: new_id(),
            title: title.into(),
            messages,
        }
    }

    /// Position of the message with the given identifier
    pub fn position_of(&self, message_id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == message_id)
    }
}

/// Generates a random identifier (UUID v4)
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
