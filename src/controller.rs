//! Message lifecycle controller
//!
//! The controller owns the thread store, the persistence handle and the
//! composer state (input text, attachments, selected tools, loading flag and
//! request timers). Each user operation mutates the store through its single
//! replace path, persists the result and, for send and retry, hands the
//! request to a [`StreamReconciler`].
//!
//! Operations take `&mut self`, so at most one send or retry is in flight
//! per controller.

use std::time::Instant;

use tokio::sync::watch;

use crate::backend::{Attachment, ChatBackend, ChatRequest};
use crate::config::ChatConfig;
use crate::error::{Result, ThreadlineError};
use crate::reconciler::{ReplyOutcome, StreamReconciler, StreamState, StreamTimers, StreamTrigger};
use crate::storage::SessionPersistence;
use crate::thread::{Message, Thread, ThreadSnapshot, ThreadStore};

/// Draft state of the message being composed
#[derive(Debug, Clone, Default)]
pub struct Composer {
    pub input: String,
    pub attachments: Vec<Attachment>,
    /// Tool identifiers sent with each request
    pub tools: Vec<String>,
    /// A send or retry is in flight; also published on
    /// [`ChatController::subscribe_loading`]
    pub is_loading: bool,
    pub timers: StreamTimers,
}

/// Title for a thread whose first message is `text`
///
/// Returns `None` when the trimmed text is empty, in which case the thread
/// keeps its current title.
///
/// # Examples
///
/// ```
/// use threadline::controller::derive_thread_title;
///
/// assert_eq!(derive_thread_title("  Hello  ", 40).as_deref(), Some("Hello"));
/// assert_eq!(derive_thread_title("abcdef", 3).as_deref(), Some("abc"));
/// assert_eq!(derive_thread_title("   ", 40), None);
/// ```
pub fn derive_thread_title(text: &str, max_chars: usize) -> Option<String> {
    let title: String = text.trim().chars().take(max_chars).collect();
    (!title.is_empty()).then_some(title)
}

/// Title for a thread branched off at a message with this content
///
/// # Examples
///
/// ```
/// use threadline::controller::derive_branch_title;
///
/// assert_eq!(derive_branch_title("Tell me more", 30), "Branch: Tell me more...");
/// ```
pub fn derive_branch_title(content: &str, max_chars: usize) -> String {
    let head: String = content.chars().take(max_chars).collect();
    format!("Branch: {}...", head)
}

/// Drives user operations against the thread store
pub struct ChatController<B: ChatBackend> {
    backend: B,
    store: ThreadStore,
    persistence: SessionPersistence,
    settings: ChatConfig,
    composer: Composer,
    loading: watch::Sender<bool>,
    last_state: StreamState,
}

impl<B: ChatBackend> ChatController<B> {
    /// Creates a controller over a hydrated store
    ///
    /// The composer starts with the configured default tools selected.
    pub fn new(
        backend: B,
        store: ThreadStore,
        persistence: SessionPersistence,
        settings: ChatConfig,
    ) -> Self {
        let composer = Composer {
            tools: settings.default_tools.clone(),
            ..Composer::default()
        };
        Self {
            backend,
            store,
            persistence,
            settings,
            composer,
            loading: watch::channel(false).0,
            last_state: StreamState::Idle,
        }
    }

    pub fn store(&self) -> &ThreadStore {
        &self.store
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    /// Subscribes to thread list snapshots
    pub fn subscribe(&self) -> watch::Receiver<ThreadSnapshot> {
        self.store.subscribe()
    }

    /// Subscribes to the loading flag
    ///
    /// The flag is `true` from the moment a request is built until its reply
    /// reaches a terminal state.
    pub fn subscribe_loading(&self) -> watch::Receiver<bool> {
        self.loading.subscribe()
    }

    /// The active thread, if any thread exists
    pub fn active_thread(&self) -> Option<&Thread> {
        self.store.active_thread()
    }

    /// State the most recent reply ended in
    pub fn last_stream_state(&self) -> StreamState {
        self.last_state
    }

    pub fn set_input(&mut self, input: impl Into<String>) {
        self.composer.input = input.into();
    }

    pub fn add_attachment(&mut self, attachment: Attachment) {
        self.composer.attachments.push(attachment);
    }

    pub fn clear_attachments(&mut self) {
        self.composer.attachments.clear();
    }

    pub fn set_tools(&mut self, tools: Vec<String>) {
        self.composer.tools = tools;
    }

    /// Selects the model for subsequent requests and persists the choice
    pub fn set_model(&mut self, model: impl Into<String>) {
        let model = model.into();
        tracing::info!("Selected model: {}", model);
        self.store.set_selected_model(model);
        if let Err(e) = self.persistence.save_model(self.store.selected_model()) {
            tracing::warn!("Failed to persist model: {:#}", e);
        }
    }

    /// Sends the composer input
    pub async fn send_input(&mut self) -> Result<Option<ReplyOutcome>> {
        let text = self.composer.input.clone();
        self.send(&text).await
    }

    /// Appends a user message to the active thread and streams the reply
    ///
    /// Blank text is a no-op and returns `Ok(None)`. The first message of a
    /// thread also sets its title. The composer input is cleared.
    ///
    /// # Errors
    ///
    /// Returns `ThreadlineError::InvalidOperation` if there is no thread to
    /// send on. Backend failures are not errors; they end up as messages in
    /// the thread and in the returned outcome.
    ///
    /// # Examples
    ///
    /// ```
    /// use threadline::backend::HttpBackend;
    /// use threadline::config::{BackendConfig, ChatConfig};
    /// use threadline::controller::ChatController;
    /// use threadline::storage::SessionPersistence;
    /// use threadline::thread::ThreadStore;
    ///
    /// # tokio_test::block_on(async {
    /// let backend = HttpBackend::new(&BackendConfig::default()).unwrap();
    /// let mut controller = ChatController::new(
    ///     backend,
    ///     ThreadStore::with_empty_thread("New Chat", "gpt-4o"),
    ///     SessionPersistence::in_memory(),
    ///     ChatConfig::default(),
    /// );
    ///
    /// // Whitespace never reaches the backend
    /// assert!(controller.send("   ").await.unwrap().is_none());
    /// # });
    /// ```
    pub async fn send(&mut self, text: &str) -> Result<Option<ReplyOutcome>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let thread_id = self.active_thread_id()?;
        let user_message = Message::user(text);
        let user_message_id = user_message.id.clone();
        let title = derive_thread_title(text, self.settings.title_max_chars);

        self.store.update_thread(&thread_id, |thread| {
            if thread.messages.is_empty() {
                if let Some(title) = title {
                    thread.title = title;
                }
            }
            thread.messages.push(user_message);
        });
        self.composer.input.clear();
        self.persist();

        let messages = self.thread_messages(&thread_id);
        tracing::info!(thread = %thread_id, messages = messages.len(), "Sending message");

        let trigger = StreamTrigger::Send {
            user_message_id: Some(&user_message_id),
        };
        let outcome = self.drive(&thread_id, messages, trigger).await;
        Ok(Some(outcome))
    }

    /// Re-issues the request that produced `target_message_id`
    ///
    /// The active thread is truncated to the messages strictly before the
    /// target, and that history is sent as-is. The composer input is left
    /// untouched. Blank `text` is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `ThreadlineError::InvalidOperation` if the target is not in
    /// the active thread.
    pub async fn retry(
        &mut self,
        text: &str,
        target_message_id: &str,
    ) -> Result<Option<ReplyOutcome>> {
        if text.trim().is_empty() {
            return Ok(None);
        }

        let thread_id = self.active_thread_id()?;
        let index = self.position_in_active(target_message_id)?;

        self.store
            .update_thread(&thread_id, |thread| thread.messages.truncate(index));
        self.persist();

        let messages = self.thread_messages(&thread_id);
        tracing::info!(thread = %thread_id, kept = messages.len(), "Retrying reply");

        let outcome = self.drive(&thread_id, messages, StreamTrigger::Retry).await;
        Ok(Some(outcome))
    }

    /// Retries an assistant message using the user message right before it
    ///
    /// Returns `Ok(None)` when the message has no preceding user message.
    ///
    /// # Errors
    ///
    /// Returns `ThreadlineError::InvalidOperation` if the message is not in
    /// the active thread.
    pub async fn retry_message(
        &mut self,
        assistant_message_id: &str,
    ) -> Result<Option<ReplyOutcome>> {
        let index = self.position_in_active(assistant_message_id)?;
        let preceding = index
            .checked_sub(1)
            .and_then(|i| self.store.active_thread().map(|t| t.messages[i].clone()));

        match preceding {
            Some(user_message) if user_message.is_user() => {
                self.retry(&user_message.content, assistant_message_id).await
            }
            _ => {
                tracing::debug!("No user message precedes {}", assistant_message_id);
                Ok(None)
            }
        }
    }

    /// Forks a new thread from the history strictly before `message_id`
    ///
    /// The new thread is prepended and becomes active; the original thread
    /// is left untouched. Returns the new thread's id.
    ///
    /// # Errors
    ///
    /// Returns `ThreadlineError::InvalidOperation` if the message is not in
    /// the active thread.
    pub fn branch(&mut self, message_id: &str) -> Result<String> {
        let index = self.position_in_active(message_id)?;
        let source = self
            .store
            .active_thread()
            .ok_or_else(|| ThreadlineError::InvalidOperation("no active thread".into()))?;

        let title = derive_branch_title(
            &source.messages[index].content,
            self.settings.branch_title_chars,
        );
        let branch = Thread::with_messages(title, source.messages[..index].to_vec());
        let branch_id = branch.id.clone();

        tracing::info!(from = %source.id, to = %branch_id, kept = index, "Branching thread");
        self.store.prepend_thread(branch);
        self.store.set_active(&branch_id)?;
        self.persist();

        Ok(branch_id)
    }

    /// Creates an empty thread, prepends it and makes it active
    pub fn new_thread(&mut self) -> String {
        let thread = Thread::new(self.settings.default_thread_title.clone());
        let thread_id = thread.id.clone();

        self.store.prepend_thread(thread);
        if let Err(e) = self.store.set_active(&thread_id) {
            tracing::warn!("Failed to activate new thread: {:#}", e);
        }
        self.composer.input.clear();
        self.persist();

        tracing::info!(thread = %thread_id, "Created new thread");
        thread_id
    }

    /// Switches the active thread
    ///
    /// # Errors
    ///
    /// Returns `ThreadlineError::InvalidOperation` for an unknown thread
    pub fn select_thread(&mut self, thread_id: &str) -> Result<()> {
        self.store.set_active(thread_id)?;
        if let Err(e) = self.persistence.save_active(self.store.active_thread_id()) {
            tracing::warn!("Failed to persist active thread: {:#}", e);
        }
        Ok(())
    }

    async fn drive(
        &mut self,
        thread_id: &str,
        messages: Vec<Message>,
        trigger: StreamTrigger<'_>,
    ) -> ReplyOutcome {
        let request = ChatRequest {
            model: self.store.selected_model().to_string(),
            attachments: self.composer.attachments.clone(),
            messages,
            tools: self.composer.tools.clone(),
        };

        self.set_loading(true);
        self.composer.timers.start(Instant::now());

        let mut reconciler = StreamReconciler::new(thread_id, request.model.clone());
        let outcome = reconciler
            .run(
                &self.backend,
                &mut self.store,
                &self.persistence,
                &request,
                trigger,
                &mut self.composer.timers,
            )
            .await;
        self.last_state = reconciler.state();

        if outcome.is_completed() {
            self.composer.attachments.clear();
        }
        self.set_loading(false);
        self.composer.timers.reset();

        outcome
    }

    fn set_loading(&mut self, loading: bool) {
        self.composer.is_loading = loading;
        self.loading.send_replace(loading);
    }

    fn active_thread_id(&self) -> Result<String> {
        self.store
            .active_thread()
            .map(|t| t.id.clone())
            .ok_or_else(|| ThreadlineError::InvalidOperation("no active thread".into()).into())
    }

    fn position_in_active(&self, message_id: &str) -> Result<usize> {
        self.store
            .active_thread()
            .and_then(|t| t.position_of(message_id))
            .ok_or_else(|| {
                ThreadlineError::InvalidOperation(format!(
                    "message {} is not in the active thread",
                    message_id
                ))
                .into()
            })
    }

    fn thread_messages(&self, thread_id: &str) -> Vec<Message> {
        self.store
            .thread(thread_id)
            .map(|t| t.messages.clone())
            .unwrap_or_default()
    }

    fn persist(&self) {
        if let Err(e) = self.persistence.save_all(&self.store) {
            tracing::warn!("Failed to persist session: {:#}", e);
        }
    }
}
