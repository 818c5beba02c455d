use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempDir;

use threadline::backend::{BackendResponse, ChatBackend, ChatRequest};
use threadline::config::ChatConfig;
use threadline::controller::ChatController;
use threadline::error::ThreadlineError;
use threadline::storage::{SessionPersistence, SledKeyValueStore};
use threadline::thread::ThreadStore;

/// Canned reply for [`FakeBackend`]
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub enum Reply {
    Chunks(Vec<&'static str>),
    ChunksThenError(Vec<&'static str>),
    Json(&'static str),
    Refused,
}

/// Backend that answers from a script and remembers every request
#[derive(Debug, Default)]
pub struct FakeBackend {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<ChatRequest>>,
}

#[allow(dead_code)]
impl FakeBackend {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn send(&self, request: &ChatRequest) -> threadline::Result<BackendResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("FakeBackend ran out of replies");

        let (chunks, fail) = match reply {
            Reply::Json(content) => {
                return Ok(BackendResponse::Json {
                    content: content.to_string(),
                })
            }
            Reply::Refused => return Err(ThreadlineError::Request("refused".into()).into()),
            Reply::Chunks(chunks) => (chunks, false),
            Reply::ChunksThenError(chunks) => (chunks, true),
        };

        let mut items: Vec<threadline::Result<Bytes>> = chunks
            .into_iter()
            .map(|c| Ok(Bytes::from_static(c.as_bytes())))
            .collect();
        if fail {
            items.push(Err(
                ThreadlineError::StreamDecode("connection reset".into()).into()
            ));
        }
        Ok(BackendResponse::Stream(Box::pin(futures::stream::iter(items))))
    }
}

/// Controller over a fresh single-thread store with in-memory persistence
#[allow(dead_code)]
pub fn controller_with(replies: Vec<Reply>) -> ChatController<FakeBackend> {
    ChatController::new(
        FakeBackend::new(replies),
        ThreadStore::with_empty_thread("New Chat", "gpt-4o-mini"),
        SessionPersistence::in_memory(),
        ChatConfig::default(),
    )
}

/// Sled-backed persistence in a fresh temporary directory
#[allow(dead_code)]
pub fn create_temp_persistence() -> (SessionPersistence, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let persistence = open_sled(&tmp);
    (persistence, tmp)
}

/// Reopens the sled store kept in `dir`
#[allow(dead_code)]
pub fn open_sled(dir: &TempDir) -> SessionPersistence {
    let store = SledKeyValueStore::new(dir.path().join("session.sled"))
        .expect("failed to open sled store");
    SessionPersistence::new(Box::new(store))
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}
