use serde::{Deserialize, Serialize};

use crate::thread::Thread;

/// Key holding the JSON-serialized thread list
pub const THREADS_KEY: &str = "threadline.threads";

/// Key holding the active thread identifier
pub const ACTIVE_THREAD_KEY: &str = "threadline.activeThread";

/// Key holding the selected model name
pub const MODEL_KEY: &str = "threadline.model";

/// Session state as read from the key-value store
///
/// Each field is `None` when its entry was absent or could not be parsed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub threads: Option<Vec<Thread>>,
    pub active_thread_id: Option<String>,
    pub model: Option<String>,
}
