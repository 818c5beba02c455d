//! Chat backend collaborator
//!
//! The backend receives the whole conversation and answers either with a
//! chunked plain-text body or with a single JSON document. This module owns
//! the request payload, the [`ChatBackend`] seam, the reqwest implementation
//! and the incremental UTF-8 decoder used to turn body chunks into text.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::BackendConfig;
use crate::error::{Result, ThreadlineError};
use crate::thread::Message;

/// Metadata of a file attached to a request
///
/// Only the metadata travels with the request; the file body is never read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// MIME type, empty when unknown
    #[serde(rename = "type")]
    pub mime_type: String,
}

impl Attachment {
    pub fn new(name: impl Into<String>, size: u64, mime_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size,
            mime_type: mime_type.into(),
        }
    }
}

/// Body of a chat request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub attachments: Vec<Attachment>,
    pub messages: Vec<Message>,
    /// Identifiers of the tools the backend may invoke
    pub tools: Vec<String>,
}

/// Chunked response body
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// What the backend answered with
pub enum BackendResponse {
    /// Plain text delivered progressively as raw byte chunks
    Stream(ChunkStream),
    /// A complete reply delivered as one JSON document
    Json { content: String },
}

impl std::fmt::Debug for BackendResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream(_) => f.write_str("BackendResponse::Stream(..)"),
            Self::Json { content } => f
                .debug_struct("BackendResponse::Json")
                .field("content", content)
                .finish(),
        }
    }
}

/// Sends a conversation to the chat backend
///
/// Implementations report failures that happen before a body is available
/// (transport errors, non-success status, unparseable JSON) as
/// `ThreadlineError::Request`. Failures while reading a streamed body are
/// yielded by the stream itself.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn send(&self, request: &ChatRequest) -> Result<BackendResponse>;
}

/// [`ChatBackend`] speaking HTTP to the configured endpoint
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    endpoint: String,
}

impl HttpBackend {
    /// Creates an HTTP backend
    ///
    /// Only connection establishment is bounded by a timeout. Reading the
    /// body is not, so a long reply is never cut off by this layer.
    ///
    /// # Errors
    ///
    /// Returns error if HTTP client initialization fails
    ///
    /// # Examples
    ///
    /// ```
    /// use threadline::backend::HttpBackend;
    /// use threadline::config::BackendConfig;
    ///
    /// let backend = HttpBackend::new(&BackendConfig::default()).unwrap();
    /// assert_eq!(backend.endpoint(), "http://localhost:3000/api/chat");
    /// ```
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .user_agent(concat!("threadline/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ThreadlineError::Request(format!("Failed to create HTTP client: {}", e)))?;

        tracing::info!("Initialized chat backend: endpoint={}", config.endpoint);

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn send(&self, request: &ChatRequest) -> Result<BackendResponse> {
        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Posting chat request to {}",
            self.endpoint
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("Chat request failed: {}", e);
                ThreadlineError::Request(format!("Failed to reach chat backend: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("Chat backend returned error {}: {}", status, error_text);
            return Err(ThreadlineError::Request(format!(
                "Chat backend returned error {}: {}",
                status, error_text
            ))
            .into());
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("text/plain") {
            let chunks = response.bytes_stream().map(|chunk| {
                chunk.map_err(|e| {
                    anyhow::Error::from(ThreadlineError::StreamDecode(format!(
                        "Failed to read response body: {}",
                        e
                    )))
                })
            });
            return Ok(BackendResponse::Stream(Box::pin(chunks)));
        }

        let body = response.text().await.map_err(|e| {
            ThreadlineError::Request(format!("Failed to read response body: {}", e))
        })?;
        let value: serde_json::Value = serde_json::from_str(&body).map_err(|e| {
            ThreadlineError::Request(format!("Failed to parse chat response: {}", e))
        })?;

        Ok(BackendResponse::Json {
            content: content_text(&value),
        })
    }
}

/// Extracts the reply text from a JSON response document
///
/// A missing or null `content` yields an empty string; any other non-string
/// value is rendered as its JSON text.
pub fn content_text(document: &serde_json::Value) -> String {
    match document.get("content") {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Decodes a byte stream into text chunk by chunk
///
/// A multi-byte sequence split across two chunks is held back until the
/// rest of it arrives.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes the next chunk, returning all text that is complete so far
    ///
    /// # Errors
    ///
    /// Returns `ThreadlineError::StreamDecode` on an invalid byte sequence
    ///
    /// # Examples
    ///
    /// ```
    /// use threadline::backend::Utf8ChunkDecoder;
    ///
    /// let mut decoder = Utf8ChunkDecoder::new();
    /// let bytes = "é".as_bytes();
    /// assert_eq!(decoder.decode(&bytes[..1]).unwrap(), "");
    /// assert_eq!(decoder.decode(&bytes[1..]).unwrap(), "é");
    /// ```
    pub fn decode(&mut self, chunk: &[u8]) -> Result<String> {
        self.pending.extend_from_slice(chunk);

        let valid_up_to = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            Err(e) if e.error_len().is_some() => {
                self.pending.clear();
                return Err(ThreadlineError::StreamDecode(format!(
                    "invalid UTF-8 sequence after byte {}",
                    e.valid_up_to()
                ))
                .into());
            }
            Err(e) => e.valid_up_to(),
        };

        let tail = self.pending.split_off(valid_up_to);
        let complete = std::mem::replace(&mut self.pending, tail);
        String::from_utf8(complete)
            .map_err(|e| ThreadlineError::StreamDecode(e.to_string()).into())
    }

    /// Ends decoding and returns how many incomplete bytes were discarded
    pub fn finish(&mut self) -> usize {
        let leftover = self.pending.len();
        self.pending.clear();
        leftover
    }
}
