//! Test utilities for Threadline
//!
//! This module provides a scripted chat backend, configuration fixtures and
//! assertion helpers shared by unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;

use crate::backend::{BackendResponse, ChatBackend, ChatRequest};
use crate::config::Config;
use crate::error::{Result, ThreadlineError};

/// One canned backend reply
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Streamed body delivered as these raw chunks
    Text(Vec<Vec<u8>>),
    /// Streamed body that fails after these chunks
    TextThenError(Vec<Vec<u8>>, String),
    /// Complete JSON reply with this content
    Json(String),
    /// The request itself fails
    RequestError(String),
}

impl ScriptedReply {
    pub fn text<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::Text(to_chunks(chunks))
    }

    pub fn text_then_error<I, S>(chunks: I, reason: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::TextThenError(to_chunks(chunks), reason.to_string())
    }
}

fn to_chunks<I, S>(chunks: I) -> Vec<Vec<u8>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    chunks
        .into_iter()
        .map(|c| c.as_ref().as_bytes().to_vec())
        .collect()
}

/// [`ChatBackend`] that replays scripted replies in order and records every
/// request it receives
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<ChatRequest>>,
    loading: Mutex<Option<watch::Receiver<bool>>>,
    loading_seen: Mutex<Vec<bool>>,
}

impl ScriptedBackend {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            loading: Mutex::new(None),
            loading_seen: Mutex::new(Vec::new()),
        }
    }

    /// Samples `loading` on every request
    pub fn watch_loading(&self, loading: watch::Receiver<bool>) {
        *self.loading.lock().expect("loading lock poisoned") = Some(loading);
    }

    /// Loading flag values sampled so far, one per request
    pub fn loading_seen(&self) -> Vec<bool> {
        self.loading_seen
            .lock()
            .expect("loading lock poisoned")
            .clone()
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().expect("requests lock poisoned").clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn send(&self, request: &ChatRequest) -> Result<BackendResponse> {
        self.requests
            .lock()
            .expect("requests lock poisoned")
            .push(request.clone());
        if let Some(loading) = self.loading.lock().expect("loading lock poisoned").as_ref() {
            self.loading_seen
                .lock()
                .expect("loading lock poisoned")
                .push(*loading.borrow());
        }

        let reply = self
            .replies
            .lock()
            .expect("replies lock poisoned")
            .pop_front()
            .ok_or_else(|| ThreadlineError::Request("no scripted reply left".into()))?;

        let mut items: Vec<Result<Bytes>> = Vec::new();
        match reply {
            ScriptedReply::Json(content) => return Ok(BackendResponse::Json { content }),
            ScriptedReply::RequestError(reason) => {
                return Err(ThreadlineError::Request(reason).into())
            }
            ScriptedReply::Text(chunks) => {
                items.extend(chunks.into_iter().map(|c| Ok(Bytes::from(c))));
            }
            ScriptedReply::TextThenError(chunks, reason) => {
                items.extend(chunks.into_iter().map(|c| Ok(Bytes::from(c))));
                items.push(Err(ThreadlineError::StreamDecode(reason).into()));
            }
        }

        Ok(BackendResponse::Stream(Box::pin(futures::stream::iter(items))))
    }
}

/// Assert that an error contains the expected message
///
/// # Panics
///
/// Panics if the result is Ok or if the error doesn't contain the expected message
pub fn assert_error_contains<T>(result: Result<T>, expected: &str) {
    match result {
        Ok(_) => panic!("Expected error containing '{}' but got Ok", expected),
        Err(e) => {
            let error_msg = format!("{:#}", e);
            assert!(
                error_msg.contains(expected),
                "Error message '{}' does not contain '{}'",
                error_msg,
                expected
            );
        }
    }
}

/// Create a test configuration with default values and in-memory storage
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.storage.backend = crate::config::StorageBackend::Memory;
    config
}

/// Create a test configuration YAML string
pub fn test_config_yaml() -> String {
    r#"
backend:
  endpoint: http://localhost:4000/api/chat
  connect_timeout_seconds: 5

models:
  default_model: gpt-4o
  options:
    - gpt-4o
    - gpt-4o-mini

chat:
  default_thread_title: Fresh Chat
  title_max_chars: 40
  branch_title_chars: 30
  default_tools:
    - search

storage:
  backend: memory
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Attachment;
    use futures::StreamExt;

    fn request() -> ChatRequest {
        ChatRequest {
            model: "m".into(),
            attachments: vec![Attachment::new("a.txt", 1, "text/plain")],
            messages: vec![],
            tools: vec![],
        }
    }

    #[tokio::test]
    async fn test_scripted_backend_replays_in_order() {
        let backend = ScriptedBackend::new(vec![
            ScriptedReply::Json("one".into()),
            ScriptedReply::text(["a", "b"]),
        ]);

        match backend.send(&request()).await.unwrap() {
            BackendResponse::Json { content } => assert_eq!(content, "one"),
            other => panic!("unexpected response: {:?}", other),
        }
        match backend.send(&request()).await.unwrap() {
            BackendResponse::Stream(stream) => {
                let chunks: Vec<_> = stream.collect().await;
                assert_eq!(chunks.len(), 2);
            }
            other => panic!("unexpected response: {:?}", other),
        }
        assert_error_contains(backend.send(&request()).await, "no scripted reply");
        assert_eq!(backend.requests().len(), 3);
    }

    #[test]
    fn test_test_config() {
        let config = test_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_test_config_yaml() {
        let config: Config = serde_yaml::from_str(&test_config_yaml()).unwrap();
        assert_eq!(config.chat.default_thread_title, "Fresh Chat");
        assert!(config.validate().is_ok());
    }

    #[test]
    #[should_panic(expected = "Expected error containing")]
    fn test_assert_error_contains_ok() {
        assert_error_contains(Ok(()), "error");
    }
}
