//! Stream reconciler
//!
//! Drives one backend reply into the thread store. The reply either streams
//! as plain text, in which case an empty assistant placeholder is appended and
//! then overwritten as a whole after every chunk, or arrives as a single JSON
//! document that is appended once.
//!
//! ```text
//! Idle -> RequestSent -> StreamingText -> Completed
//!                     \               \-> Failed
//!                      \-> JsonReceived -> Completed
//!                       \-> Failed
//! ```
//!
//! Every error is contained here. A request failure appends a fixed error
//! message; a failure while reading the body replaces the placeholder in its
//! slot. Either way the store is left displayable.

use std::time::Instant;

use futures::StreamExt;

use crate::backend::{BackendResponse, ChatBackend, ChatRequest, ChunkStream, Utf8ChunkDecoder};
use crate::markers::parse_tool_markers;
use crate::metrics::{estimate, StreamClock, StreamMetrics, StreamTelemetry};
use crate::storage::SessionPersistence;
use crate::thread::{now_millis, Message, Role, ThreadStore};

/// Text of the message that replaces a reply whose body failed mid-stream
pub const STREAM_FAILED_TEXT: &str = "Sorry, streaming failed.";

/// Text of the message appended when the request itself failed
pub const REQUEST_FAILED_TEXT: &str = "Sorry, something went wrong.";

/// Lifecycle of one reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Idle,
    RequestSent,
    StreamingText,
    JsonReceived,
    Completed,
    Failed,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::RequestSent => "request_sent",
            Self::StreamingText => "streaming_text",
            Self::JsonReceived => "json_received",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What triggered a reply, used to derive the placeholder identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamTrigger<'a> {
    /// An explicit retry of an earlier turn
    Retry,
    /// A fresh send; carries the new user message's id when there is one
    Send { user_message_id: Option<&'a str> },
}

/// Identifier for the assistant placeholder of a streamed reply
///
/// Retries and fresh sends use disjoint prefixes so their identifiers can
/// never collide: `stream-retry-<millis>` for a retry, `stream-<user id>`
/// for a send, and `stream-<millis>` for a send without a user message id.
///
/// # Examples
///
/// ```
/// use threadline::reconciler::{derive_stream_message_id, StreamTrigger};
///
/// assert_eq!(derive_stream_message_id(StreamTrigger::Retry, 42), "stream-retry-42");
/// let send = StreamTrigger::Send { user_message_id: Some("u1") };
/// assert_eq!(derive_stream_message_id(send, 42), "stream-u1");
/// ```
pub fn derive_stream_message_id(trigger: StreamTrigger<'_>, now_millis: i64) -> String {
    match trigger {
        StreamTrigger::Retry => format!("stream-retry-{}", now_millis),
        StreamTrigger::Send {
            user_message_id: Some(id),
        } if !id.is_empty() => format!("stream-{}", id),
        StreamTrigger::Send { .. } => format!("stream-{}", now_millis),
    }
}

/// Request timing shared with the controller
///
/// Both trackers are cleared when a reply reaches a terminal state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamTimers {
    pub message_start_time: Option<Instant>,
    pub first_token_time: Option<Instant>,
}

impl StreamTimers {
    /// Marks the start of a new request
    pub fn start(&mut self, at: Instant) {
        self.message_start_time = Some(at);
        self.first_token_time = None;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// How a reply ended
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    /// The reply is in the thread as message `message_id`
    Completed {
        message_id: String,
        metrics: StreamMetrics,
    },
    /// The reply failed; `message_id` is the error message shown in its place
    Failed { message_id: String, reason: String },
}

impl ReplyOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn message_id(&self) -> &str {
        match self {
            Self::Completed { message_id, .. } | Self::Failed { message_id, .. } => message_id,
        }
    }
}

/// Reconciles one backend reply into one thread
#[derive(Debug)]
pub struct StreamReconciler {
    thread_id: String,
    model: String,
    state: StreamState,
}

impl StreamReconciler {
    pub fn new(thread_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            model: model.into(),
            state: StreamState::Idle,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    fn transition(&mut self, next: StreamState) {
        tracing::debug!(thread = %self.thread_id, from = %self.state, to = %next, "Stream state");
        self.state = next;
    }

    /// Sends `request` and drives the reply to a terminal state
    ///
    /// # Arguments
    ///
    /// * `backend` - Backend that answers the request
    /// * `store` - Store holding the target thread
    /// * `persistence` - Written after each thread mutation except per-chunk updates
    /// * `request` - Full request payload
    /// * `trigger` - What caused the reply, for the placeholder identifier
    /// * `timers` - Request timing; `message_start_time` should already be set
    pub async fn run<B>(
        &mut self,
        backend: &B,
        store: &mut ThreadStore,
        persistence: &SessionPersistence,
        request: &ChatRequest,
        trigger: StreamTrigger<'_>,
        timers: &mut StreamTimers,
    ) -> ReplyOutcome
    where
        B: ChatBackend + ?Sized,
    {
        let telemetry = StreamTelemetry::new(&self.model);
        self.transition(StreamState::RequestSent);

        let response = match backend.send(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(thread = %self.thread_id, "Chat request failed: {:#}", e);
                let error_message = Message::assistant(REQUEST_FAILED_TEXT, Some(self.model.clone()));
                let message_id = error_message.id.clone();
                store.append_message(&self.thread_id, error_message);
                save(persistence, store);
                telemetry.record_failure();
                self.transition(StreamState::Failed);
                return ReplyOutcome::Failed {
                    message_id,
                    reason: e.to_string(),
                };
            }
        };

        match response {
            BackendResponse::Json { content } => {
                self.transition(StreamState::JsonReceived);
                let message = Message::assistant(content, Some(self.model.clone()));
                let message_id = message.id.clone();
                store.append_message(&self.thread_id, message);
                save(persistence, store);
                telemetry.record_completion(&StreamMetrics::default());
                self.transition(StreamState::Completed);
                tracing::info!(thread = %self.thread_id, "Received complete JSON reply");
                ReplyOutcome::Completed {
                    message_id,
                    metrics: StreamMetrics::default(),
                }
            }
            BackendResponse::Stream(chunks) => {
                let stream_id = derive_stream_message_id(trigger, now_millis());
                self.consume(chunks, stream_id, store, persistence, &telemetry, timers)
                    .await
            }
        }
    }

    async fn consume(
        &mut self,
        mut chunks: ChunkStream,
        stream_id: String,
        store: &mut ThreadStore,
        persistence: &SessionPersistence,
        telemetry: &StreamTelemetry,
        timers: &mut StreamTimers,
    ) -> ReplyOutcome {
        self.transition(StreamState::StreamingText);

        let placeholder = Message::stream_placeholder(stream_id.clone(), self.model.clone());
        let created_at = placeholder.timestamp;
        store.append_message(&self.thread_id, placeholder);
        save(persistence, store);

        let mut clock = StreamClock::started(timers.message_start_time);
        let mut decoder = Utf8ChunkDecoder::new();
        let mut raw = String::new();
        let mut latest = parse_tool_markers("", &[], &[]);
        let mut dropped_seen = 0;
        let mut metrics = StreamMetrics::default();

        while let Some(next) = chunks.next().await {
            let text = match next.and_then(|bytes| decoder.decode(&bytes)) {
                Ok(text) => text,
                Err(e) => return self.fail_stream(&stream_id, e, store, persistence, telemetry),
            };
            telemetry.record_chunk();

            let now = Instant::now();
            clock.observe_chunk(&text, now);
            if timers.first_token_time.is_none() {
                timers.first_token_time = clock.first_chunk;
            }
            raw.push_str(&text);

            latest = parse_tool_markers(&raw, &latest.tool_calls, &latest.tool_results);
            if latest.dropped > dropped_seen {
                telemetry.record_dropped_markers(latest.dropped - dropped_seen);
                dropped_seen = latest.dropped;
            }
            metrics = estimate(&latest.content, &clock, now);

            let mut message = Message {
                content: latest.content.clone(),
                tool_calls: non_empty(&latest.tool_calls),
                tool_results: non_empty(&latest.tool_results),
                model: Some(self.model.clone()),
                timestamp: created_at,
                ..Message::bare(stream_id.clone(), Role::Assistant, "")
            };
            metrics.apply_to(&mut message);

            tracing::debug!(
                thread = %self.thread_id,
                bytes = text.len(),
                tokens = metrics.estimated_tokens,
                "Applied stream chunk"
            );
            store.replace_message(&self.thread_id, &stream_id, message);
        }

        let leftover = decoder.finish();
        if leftover > 0 {
            tracing::warn!(
                thread = %self.thread_id,
                "Discarding {} incomplete UTF-8 bytes at end of stream",
                leftover
            );
        }
        if latest.withheld {
            tracing::warn!(
                thread = %self.thread_id,
                "Stream ended inside an unterminated tool marker; trailing text was not kept"
            );
        }
        for orphan in latest.orphaned_results() {
            tracing::debug!(
                tool_call_id = %orphan.tool_call_id,
                tool = %orphan.tool_name,
                "Tool result has no matching tool call"
            );
        }

        save(persistence, store);
        telemetry.record_completion(&metrics);
        self.transition(StreamState::Completed);
        tracing::info!(
            thread = %self.thread_id,
            tokens = metrics.estimated_tokens,
            tool_calls = latest.tool_calls.len(),
            "Stream completed"
        );

        ReplyOutcome::Completed {
            message_id: stream_id,
            metrics,
        }
    }

    fn fail_stream(
        &mut self,
        stream_id: &str,
        error: anyhow::Error,
        store: &mut ThreadStore,
        persistence: &SessionPersistence,
        telemetry: &StreamTelemetry,
    ) -> ReplyOutcome {
        tracing::warn!(thread = %self.thread_id, "Stream failed: {:#}", error);

        let replacement = Message {
            model: Some(self.model.clone()),
            timestamp: Some(now_millis()),
            ..Message::bare(stream_id, Role::Assistant, STREAM_FAILED_TEXT)
        };
        store.replace_message(&self.thread_id, stream_id, replacement);
        save(persistence, store);
        telemetry.record_failure();
        self.transition(StreamState::Failed);

        ReplyOutcome::Failed {
            message_id: stream_id.to_string(),
            reason: error.to_string(),
        }
    }
}

fn non_empty<T: Clone>(items: &[T]) -> Option<Vec<T>> {
    (!items.is_empty()).then(|| items.to_vec())
}

fn save(persistence: &SessionPersistence, store: &ThreadStore) {
    if let Err(e) = persistence.save_threads(store.threads()) {
        tracing::warn!("Failed to persist threads: {:#}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ThreadlineError;
    use crate::test_utils::{ScriptedBackend, ScriptedReply};
    use crate::thread::Thread;

    fn setup() -> (ThreadStore, String, SessionPersistence) {
        let thread = Thread::with_messages("t", vec![Message::bare("u1", Role::User, "hi")]);
        let id = thread.id.clone();
        let store = ThreadStore::new(vec![thread], None, "gpt-4o");
        (store, id, SessionPersistence::in_memory())
    }

    fn request() -> ChatRequest {
        ChatRequest {
            model: "gpt-4o".into(),
            attachments: vec![],
            messages: vec![Message::bare("u1", Role::User, "hi")],
            tools: vec![],
        }
    }

    const SEND: StreamTrigger<'static> = StreamTrigger::Send {
        user_message_id: Some("u1"),
    };

    #[test]
    fn test_derive_stream_message_id_spaces_are_disjoint() {
        let retry = derive_stream_message_id(StreamTrigger::Retry, 7);
        let send = derive_stream_message_id(StreamTrigger::Send { user_message_id: None }, 7);
        assert_eq!(retry, "stream-retry-7");
        assert_eq!(send, "stream-7");
        assert_ne!(retry, send);
        let empty = StreamTrigger::Send {
            user_message_id: Some(""),
        };
        assert_eq!(derive_stream_message_id(empty, 9), "stream-9");
    }

    #[test]
    fn test_timers_reset() {
        let mut timers = StreamTimers::default();
        timers.start(Instant::now());
        timers.first_token_time = Some(Instant::now());
        timers.reset();
        assert_eq!(timers, StreamTimers::default());
    }

    #[tokio::test]
    async fn test_streamed_reply_overwrites_placeholder() {
        let (mut store, id, persistence) = setup();
        let backend = ScriptedBackend::new(vec![ScriptedReply::text(["Hel", "lo ", "there"])]);
        let mut timers = StreamTimers::default();
        timers.start(Instant::now());

        let mut reconciler = StreamReconciler::new(&id, "gpt-4o");
        let outcome = reconciler
            .run(&backend, &mut store, &persistence, &request(), SEND, &mut timers)
            .await;

        assert_eq!(reconciler.state(), StreamState::Completed);
        assert_eq!(outcome.message_id(), "stream-u1");
        let thread = store.thread(&id).unwrap();
        assert_eq!(thread.messages.len(), 2);
        assert_eq!(thread.messages[1].id, "stream-u1");
        assert_eq!(thread.messages[1].content, "Hello there");
        assert_eq!(thread.messages[1].model.as_deref(), Some("gpt-4o"));
        assert_eq!(thread.messages[1].total_tokens, Some(4));
        assert!(thread.messages[1].time_to_first_token.is_some());
        assert!(timers.first_token_time.is_some());
    }

    #[tokio::test]
    async fn test_marker_straddling_chunks_is_extracted() {
        let (mut store, id, persistence) = setup();
        let backend = ScriptedBackend::new(vec![ScriptedReply::text([
            "Checking. __TOOL_CALL__{\"toolName\":\"search\",",
            "\"toolCallId\":\"c1\",\"args\":{}}__TOOL_CALL__ done",
        ])]);
        let mut reconciler = StreamReconciler::new(&id, "gpt-4o");

        reconciler
            .run(
                &backend,
                &mut store,
                &persistence,
                &request(),
                SEND,
                &mut StreamTimers::default(),
            )
            .await;

        let reply = &store.thread(&id).unwrap().messages[1];
        assert_eq!(reply.content, "Checking.  done");
        let calls = reply.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "search");
        assert!(reply.tool_results.is_none());
    }

    #[tokio::test]
    async fn test_spliced_sentinel_is_never_stored() {
        let (mut store, id, persistence) = setup();
        let backend = ScriptedBackend::new(vec![ScriptedReply::text([
            "answer __TOOL_",
            "__TOOL_CALL__{\"toolName\":\"search\",\"toolCallId\":\"c1\",\"args\":{}}__TOOL_CALL__",
            "CALL__ tail",
        ])]);
        let mut reconciler = StreamReconciler::new(&id, "gpt-4o");

        let outcome = reconciler
            .run(
                &backend,
                &mut store,
                &persistence,
                &request(),
                SEND,
                &mut StreamTimers::default(),
            )
            .await;

        assert!(outcome.is_completed());
        let reply = &store.thread(&id).unwrap().messages[1];
        assert_eq!(reply.content, "answer");
        assert!(!reply.content.contains("__TOOL"));
        assert_eq!(reply.tool_calls.as_ref().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unterminated_marker_at_end_still_completes() {
        let (mut store, id, persistence) = setup();
        let backend = ScriptedBackend::new(vec![ScriptedReply::text([
            "kept text ",
            "__TOOL_RESULT__{\"never\":",
        ])]);
        let mut reconciler = StreamReconciler::new(&id, "gpt-4o");

        let outcome = reconciler
            .run(
                &backend,
                &mut store,
                &persistence,
                &request(),
                SEND,
                &mut StreamTimers::default(),
            )
            .await;

        assert!(outcome.is_completed());
        assert_eq!(reconciler.state(), StreamState::Completed);
        let stored = persistence.load().threads.unwrap();
        assert_eq!(stored[0].messages[1].content, "kept text");
    }

    #[tokio::test]
    async fn test_mid_stream_failure_replaces_placeholder_slot() {
        let (mut store, id, persistence) = setup();
        let backend = ScriptedBackend::new(vec![ScriptedReply::text_then_error(
            ["partial "],
            "connection reset",
        )]);
        let mut reconciler = StreamReconciler::new(&id, "gpt-4o");

        let outcome = reconciler
            .run(
                &backend,
                &mut store,
                &persistence,
                &request(),
                SEND,
                &mut StreamTimers::default(),
            )
            .await;

        assert!(!outcome.is_completed());
        assert_eq!(reconciler.state(), StreamState::Failed);
        let thread = store.thread(&id).unwrap();
        assert_eq!(thread.messages.len(), 2);
        assert_eq!(thread.messages[1].id, "stream-u1");
        assert_eq!(thread.messages[1].content, STREAM_FAILED_TEXT);
    }

    #[tokio::test]
    async fn test_invalid_utf8_fails_stream() {
        let (mut store, id, persistence) = setup();
        let backend = ScriptedBackend::new(vec![ScriptedReply::Text(vec![
            b"ok".to_vec(),
            vec![0xFF, 0xFE],
        ])]);
        let mut reconciler = StreamReconciler::new(&id, "gpt-4o");

        reconciler
            .run(
                &backend,
                &mut store,
                &persistence,
                &request(),
                SEND,
                &mut StreamTimers::default(),
            )
            .await;

        assert_eq!(reconciler.state(), StreamState::Failed);
        assert_eq!(
            store.thread(&id).unwrap().messages[1].content,
            STREAM_FAILED_TEXT
        );
    }

    #[tokio::test]
    async fn test_request_failure_appends_error_message() {
        let (mut store, id, persistence) = setup();
        let backend = ScriptedBackend::new(vec![ScriptedReply::RequestError("503".into())]);
        let mut reconciler = StreamReconciler::new(&id, "gpt-4o");

        let outcome = reconciler
            .run(
                &backend,
                &mut store,
                &persistence,
                &request(),
                SEND,
                &mut StreamTimers::default(),
            )
            .await;

        assert_eq!(reconciler.state(), StreamState::Failed);
        let thread = store.thread(&id).unwrap();
        assert_eq!(thread.messages.len(), 2);
        let error = &thread.messages[1];
        assert_eq!(error.id, outcome.message_id());
        assert_eq!(error.content, REQUEST_FAILED_TEXT);
        assert_eq!(error.model.as_deref(), Some("gpt-4o"));
        assert!(error.timestamp.is_some());
    }

    #[tokio::test]
    async fn test_json_reply_is_appended_once() {
        let (mut store, id, persistence) = setup();
        let backend = ScriptedBackend::new(vec![ScriptedReply::Json("All done".into())]);
        let mut reconciler = StreamReconciler::new(&id, "gpt-4o");

        let outcome = reconciler
            .run(
                &backend,
                &mut store,
                &persistence,
                &request(),
                SEND,
                &mut StreamTimers::default(),
            )
            .await;

        assert!(outcome.is_completed());
        assert_eq!(reconciler.state(), StreamState::Completed);
        let thread = store.thread(&id).unwrap();
        assert_eq!(thread.messages.len(), 2);
        assert_eq!(thread.messages[1].content, "All done");
        assert!(!thread.messages[1].id.starts_with("stream-"));
    }

    #[tokio::test]
    async fn test_terminal_state_is_persisted() {
        let (mut store, id, persistence) = setup();
        let backend = ScriptedBackend::new(vec![ScriptedReply::text(["saved"])]);
        let mut reconciler = StreamReconciler::new(&id, "gpt-4o");

        reconciler
            .run(
                &backend,
                &mut store,
                &persistence,
                &request(),
                SEND,
                &mut StreamTimers::default(),
            )
            .await;

        let stored = persistence.load().threads.unwrap();
        assert_eq!(stored[0].messages[1].content, "saved");
    }

    #[test]
    fn test_stream_decode_error_is_classified() {
        let err: anyhow::Error = ThreadlineError::StreamDecode("x".into()).into();
        assert!(err.to_string().contains("Stream decode error"));
    }
}
