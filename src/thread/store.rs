//! In-memory thread store
//!
//! The store exclusively owns every thread and message of the session. All
//! mutations funnel through [`ThreadStore::replace`], which builds a new
//! thread list from the previous one and publishes it as a whole snapshot.
//! Snapshots already handed out are never modified, so observers cannot see a
//! half-applied update.

use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{Result, ThreadlineError};
use crate::thread::types::{Message, Thread};

/// Immutable view of the thread list at one point in time
pub type ThreadSnapshot = Arc<Vec<Thread>>;

/// Ordered collection of threads plus the active-thread pointer and the
/// selected model
#[derive(Debug)]
pub struct ThreadStore {
    threads: ThreadSnapshot,
    active_thread_id: Option<String>,
    selected_model: String,
    snapshots: watch::Sender<ThreadSnapshot>,
}

impl ThreadStore {
    /// Creates a store from hydrated state
    ///
    /// A dangling or missing active pointer is repaired to the first thread.
    ///
    /// # Examples
    ///
    /// ```
    /// use threadline::thread::{Thread, ThreadStore};
    ///
    /// let store = ThreadStore::new(vec![Thread::new("New Chat")], None, "gpt-4o");
    /// assert!(store.active_thread().is_some());
    /// ```
    pub fn new(
        threads: Vec<Thread>,
        active_thread_id: Option<String>,
        selected_model: impl Into<String>,
    ) -> Self {
        let threads: ThreadSnapshot = Arc::new(threads);
        let (snapshots, _) = watch::channel(Arc::clone(&threads));
        let mut store = Self {
            threads,
            active_thread_id,
            selected_model: selected_model.into(),
            snapshots,
        };
        store.ensure_active();
        store
    }

    /// Creates a store holding a single empty thread
    pub fn with_empty_thread(title: &str, selected_model: impl Into<String>) -> Self {
        Self::new(vec![Thread::new(title)], None, selected_model)
    }

    /// Current snapshot of the thread list
    pub fn snapshot(&self) -> ThreadSnapshot {
        Arc::clone(&self.threads)
    }

    /// All threads, most recently created first
    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    /// Subscribes to snapshot updates
    ///
    /// The receiver always holds the latest published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ThreadSnapshot> {
        self.snapshots.subscribe()
    }

    /// Looks up a thread by identifier
    pub fn thread(&self, thread_id: &str) -> Option<&Thread> {
        self.threads.iter().find(|t| t.id == thread_id)
    }

    /// Raw active-thread pointer
    pub fn active_thread_id(&self) -> Option<&str> {
        self.active_thread_id.as_deref()
    }

    /// The active thread, falling back to the first thread when the pointer
    /// is unset or no longer resolves
    pub fn active_thread(&self) -> Option<&Thread> {
        self.active_thread_id
            .as_deref()
            .and_then(|id| self.thread(id))
            .or_else(|| self.threads.first())
    }

    /// Points the store at another thread
    ///
    /// # Errors
    ///
    /// Returns `ThreadlineError::InvalidOperation` if no thread has that id
    pub fn set_active(&mut self, thread_id: &str) -> Result<()> {
        if self.thread(thread_id).is_none() {
            return Err(ThreadlineError::InvalidOperation(format!(
                "unknown thread: {}",
                thread_id
            ))
            .into());
        }
        self.active_thread_id = Some(thread_id.to_string());
        Ok(())
    }

    /// Model used for new requests
    pub fn selected_model(&self) -> &str {
        &self.selected_model
    }

    pub fn set_selected_model(&mut self, model: impl Into<String>) {
        self.selected_model = model.into();
    }

    /// Replaces the whole thread list with one derived from the current list
    ///
    /// This is the only mutation path; every other mutator is built on it.
    pub fn replace<F>(&mut self, f: F)
    where
        F: FnOnce(&[Thread]) -> Vec<Thread>,
    {
        let next: ThreadSnapshot = Arc::new(f(self.threads.as_slice()));
        self.threads = Arc::clone(&next);
        self.snapshots.send_replace(next);
        self.ensure_active();
    }

    /// Applies `f` to a copy of one thread, leaving every other thread shared
    /// by value. Returns false when the thread does not exist.
    pub fn update_thread<F>(&mut self, thread_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Thread),
    {
        if self.thread(thread_id).is_none() {
            return false;
        }
        let mut f = Some(f);
        self.replace(|threads| {
            threads
                .iter()
                .map(|t| {
                    let mut t = t.clone();
                    if t.id == thread_id {
                        if let Some(f) = f.take() {
                            f(&mut t);
                        }
                    }
                    t
                })
                .collect()
        });
        true
    }

    /// Appends a message to the end of a thread
    pub fn append_message(&mut self, thread_id: &str, message: Message) -> bool {
        self.update_thread(thread_id, |t| t.messages.push(message))
    }

    /// Overwrites the message with `message_id` in a thread
    ///
    /// The replacement takes the same position, even if its own id differs.
    /// Returns false when the thread or message does not exist.
    pub fn replace_message(&mut self, thread_id: &str, message_id: &str, message: Message) -> bool {
        let exists = self
            .thread(thread_id)
            .map(|t| t.position_of(message_id).is_some())
            .unwrap_or(false);
        if !exists {
            return false;
        }
        self.update_thread(thread_id, |t| {
            if let Some(slot) = t.messages.iter_mut().find(|m| m.id == message_id) {
                *slot = message;
            }
        })
    }

    /// Inserts a thread at the front of the list
    pub fn prepend_thread(&mut self, thread: Thread) {
        self.replace(|threads| {
            let mut next = Vec::with_capacity(threads.len() + 1);
            next.push(thread);
            next.extend(threads.iter().cloned());
            next
        });
    }

    fn ensure_active(&mut self) {
        let resolves = self
            .active_thread_id
            .as_deref()
            .map(|id| self.threads.iter().any(|t| t.id == id))
            .unwrap_or(false);
        if !resolves {
            self.active_thread_id = self.threads.first().map(|t| t.id.clone());
        }
    }
}
