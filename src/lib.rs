//! Threadline - streaming chat client library
//!
//! This library reconciles a streamed chat reply into a persistent, threaded
//! conversation. Text arrives from the backend in arbitrary chunks with tool
//! activity embedded as sentinel-delimited JSON; the library accumulates the
//! chunks, extracts the tool records, estimates live throughput and keeps the
//! in-progress message consistent in the thread store after every chunk.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `thread`: Conversation data model and the copy-on-write thread store
//! - `markers`: Tool-marker parser for accumulated stream text
//! - `metrics`: Token, throughput and time-to-first-token estimation
//! - `backend`: Chat backend seam and its HTTP implementation
//! - `reconciler`: State machine driving one reply into the store
//! - `controller`: Send, retry, branch and thread operations
//! - `storage`: Key-value session persistence
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`, `commands`: Terminal front end
//!
//! # Example
//!
//! ```no_run
//! use threadline::backend::HttpBackend;
//! use threadline::controller::ChatController;
//! use threadline::storage::SessionPersistence;
//! use threadline::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     config.validate()?;
//!
//!     let persistence = SessionPersistence::in_memory();
//!     let store = persistence.load_store("New Chat", &config.models.default_model);
//!     let backend = HttpBackend::new(&config.backend)?;
//!     let mut controller = ChatController::new(backend, store, persistence, config.chat);
//!
//!     controller.send("Hello").await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod cli;
pub mod commands;
pub mod config;
pub mod controller;
pub mod error;
pub mod markers;
pub mod metrics;
pub mod reconciler;
pub mod storage;
pub mod thread;

// Re-export commonly used types
pub use config::Config;
pub use controller::ChatController;
pub use error::{Result, ThreadlineError};
pub use markers::{parse_tool_markers, ParsedMarkers};
pub use reconciler::{ReplyOutcome, StreamState};
pub use thread::{Message, Role, Thread, ThreadStore, ToolCall, ToolResult};

#[cfg(test)]
pub mod test_utils;
