//! Persistence ports for backup records and the bot/chat registry.

mod json;

pub use json::JsonStore;

use async_trait::async_trait;

use crate::{
    domain::{BackupRecord, BotId, BotProfile, ChatProfile, NewBackupRecord, RecordId},
    Result,
};

/// Storage for delivery records.
///
/// Records are immutable once created; the only mutation is whole-record
/// deletion.
#[async_trait]
pub trait BackupStore: Send + Sync {
    async fn create(&self, record: NewBackupRecord) -> Result<BackupRecord>;
    async fn find(&self, id: RecordId) -> Result<Option<BackupRecord>>;
    /// Newest first.
    async fn list(&self) -> Result<Vec<BackupRecord>>;
    /// Returns `false` when the record did not exist.
    async fn delete(&self, id: RecordId) -> Result<bool>;
}

/// Read side of the bot/chat registry used by destination resolution.
#[async_trait]
pub trait BotDirectory: Send + Sync {
    /// Active bots in ascending id order.
    async fn active_bots(&self) -> Result<Vec<BotProfile>>;
    /// Active chats linked to `bot`, in link order.
    async fn active_chats(&self, bot: BotId) -> Result<Vec<ChatProfile>>;
    /// Any registered bot, active or not.
    async fn find_bot(&self, bot: BotId) -> Result<Option<BotProfile>>;
}
