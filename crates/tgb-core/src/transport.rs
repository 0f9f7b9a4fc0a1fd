use async_trait::async_trait;

use crate::{
    domain::{BotToken, ChatId, FileHandle, MessageId, RemotePart},
    Result,
};

/// Provider-side path returned by `getFile`, valid for a limited time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemotePath(pub String);

/// Result of a best-effort message deletion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl DeleteOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Remote operations the relay needs from the file host.
///
/// Implementations never retry on their own; the orchestrators decide.
/// Every call must be bounded by a timeout.
#[async_trait]
pub trait BackupTransport: Send + Sync {
    /// Upload one part as a document.
    ///
    /// Fails with `RemoteRejected` or `Unreachable`.
    async fn upload_part(
        &self,
        credential: &BotToken,
        destination: &ChatId,
        bytes: Vec<u8>,
        display_name: &str,
        caption: &str,
    ) -> Result<RemotePart>;

    /// Turn a stored file handle into a downloadable path.
    ///
    /// Fails with `NotFound` when the provider no longer knows the handle.
    async fn resolve_handle(&self, credential: &BotToken, handle: &FileHandle)
        -> Result<RemotePath>;

    async fn fetch_bytes(&self, credential: &BotToken, path: &RemotePath) -> Result<Vec<u8>>;

    /// Never fails; problems are reported in the outcome.
    async fn delete_message(
        &self,
        credential: &BotToken,
        destination: &ChatId,
        message: MessageId,
    ) -> DeleteOutcome;

    /// Post a text message formatted with Telegram's HTML subset.
    async fn send_html(&self, credential: &BotToken, destination: &ChatId, html: &str)
        -> Result<()>;
}
