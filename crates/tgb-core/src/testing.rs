//! In-process fakes shared by the orchestrator tests.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    domain::{BotToken, ChatId, FileHandle, MessageId, RemotePart},
    errors::Error,
    transport::{BackupTransport, DeleteOutcome, RemotePath},
    Result,
};

#[derive(Clone, Copy, Debug)]
pub enum Failure {
    Rejected,
    RateLimited(Duration),
    Unreachable,
}

impl Failure {
    fn to_error(self) -> Error {
        match self {
            Failure::Rejected => Error::rejected("Bad Request: chat not found"),
            Failure::RateLimited(d) => Error::RemoteRejected {
                description: "Too Many Requests".to_string(),
                retry_after: Some(d),
            },
            Failure::Unreachable => Error::Unreachable("connection reset".to_string()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct UploadCall {
    pub token: String,
    pub chat: String,
    pub display_name: String,
    pub caption: String,
    pub len: usize,
}

#[derive(Default)]
struct FakeState {
    next_id: i64,
    files: HashMap<String, Vec<u8>>,
    uploads: Vec<UploadCall>,
    upload_failures: HashMap<(String, String), VecDeque<Failure>>,
    upload_delays: HashMap<String, Duration>,
    missing: HashSet<String>,
    fetches: usize,
    fail_fetch_at: Option<usize>,
    deleted: Vec<(String, i64)>,
    undeletable: HashSet<i64>,
    notices: Vec<(String, String)>,
    silenced: HashSet<String>,
}

/// Scriptable transport that keeps uploaded bytes in memory.
#[derive(Default)]
pub struct FakeTransport {
    state: Mutex<FakeState>,
}

impl FakeTransport {
    /// Queue `times` failures for uploads of `display_name` to `chat`.
    pub fn fail_upload(&self, chat: &str, display_name: &str, failure: Failure, times: usize) {
        let mut st = self.state.lock().unwrap();
        let q = st
            .upload_failures
            .entry((chat.to_string(), display_name.to_string()))
            .or_default();
        for _ in 0..times {
            q.push_back(failure);
        }
    }

    pub fn delay_upload(&self, display_name: &str, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .upload_delays
            .insert(display_name.to_string(), delay);
    }

    pub fn forget(&self, handle: &FileHandle) {
        self.state.lock().unwrap().missing.insert(handle.0.clone());
    }

    /// Make the n-th fetch (0-based, counted across calls) fail.
    pub fn fail_fetch_at(&self, n: usize) {
        self.state.lock().unwrap().fail_fetch_at = Some(n);
    }

    pub fn refuse_delete(&self, message: MessageId) {
        self.state.lock().unwrap().undeletable.insert(message.0);
    }

    /// Make notices to `chat` fail.
    pub fn refuse_notice(&self, chat: &str) {
        self.state.lock().unwrap().silenced.insert(chat.to_string());
    }

    /// Delivered notices as (chat, html).
    pub fn notices(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().notices.clone()
    }

    pub fn uploads(&self) -> Vec<UploadCall> {
        self.state.lock().unwrap().uploads.clone()
    }

    pub fn deleted(&self) -> Vec<(String, i64)> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn stored(&self, handle: &FileHandle) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(&handle.0).cloned()
    }
}

#[async_trait]
impl BackupTransport for FakeTransport {
    async fn upload_part(
        &self,
        credential: &BotToken,
        destination: &ChatId,
        bytes: Vec<u8>,
        display_name: &str,
        caption: &str,
    ) -> Result<RemotePart> {
        let delay = {
            let mut st = self.state.lock().unwrap();
            st.uploads.push(UploadCall {
                token: credential.expose().to_string(),
                chat: destination.0.clone(),
                display_name: display_name.to_string(),
                caption: caption.to_string(),
                len: bytes.len(),
            });
            let key = (destination.0.clone(), display_name.to_string());
            if let Some(f) = st.upload_failures.get_mut(&key).and_then(|q| q.pop_front()) {
                return Err(f.to_error());
            }
            st.upload_delays.get(display_name).copied()
        };

        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }

        let mut st = self.state.lock().unwrap();
        st.next_id += 1;
        let id = st.next_id;
        let handle = format!("file-{id}");
        st.files.insert(handle.clone(), bytes);
        Ok(RemotePart {
            file_handle: FileHandle(handle),
            message_handle: MessageId(id),
        })
    }

    async fn resolve_handle(
        &self,
        _credential: &BotToken,
        handle: &FileHandle,
    ) -> Result<RemotePath> {
        let st = self.state.lock().unwrap();
        if st.missing.contains(&handle.0) || !st.files.contains_key(&handle.0) {
            return Err(Error::NotFound(format!("file {} not found", handle.0)));
        }
        Ok(RemotePath(format!("documents/{}", handle.0)))
    }

    async fn fetch_bytes(&self, _credential: &BotToken, path: &RemotePath) -> Result<Vec<u8>> {
        let mut st = self.state.lock().unwrap();
        let n = st.fetches;
        st.fetches += 1;
        if st.fail_fetch_at == Some(n) {
            return Err(Error::Unreachable("timed out".to_string()));
        }
        let handle = path.0.trim_start_matches("documents/");
        st.files
            .get(handle)
            .cloned()
            .ok_or_else(|| Error::NotFound(path.0.clone()))
    }

    async fn delete_message(
        &self,
        _credential: &BotToken,
        destination: &ChatId,
        message: MessageId,
    ) -> DeleteOutcome {
        let mut st = self.state.lock().unwrap();
        if st.undeletable.contains(&message.0) {
            return DeleteOutcome::failed("Bad Request: message to delete not found");
        }
        st.deleted.push((destination.0.clone(), message.0));
        DeleteOutcome::ok()
    }

    async fn send_html(&self, _credential: &BotToken, destination: &ChatId, html: &str) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        if st.silenced.contains(&destination.0) {
            return Err(Failure::Rejected.to_error());
        }
        st.notices.push((destination.0.clone(), html.to_string()));
        Ok(())
    }
}
