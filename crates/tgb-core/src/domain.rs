use std::{fmt, path::PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registry id of a sending bot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BotId(pub i64);

impl BotId {
    /// Source id used for sends made with the configured fallback token.
    pub const CONFIG_DEFAULT: BotId = BotId(0);
}

impl fmt::Display for BotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Telegram chat id (numeric id or `@channel` username).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChatId(pub String);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Telegram message id of a delivered document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque Telegram `file_id`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileHandle(pub String);

/// Local id of a persisted backup record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bot API token. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BotToken(String);

impl BotToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BotToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.0.split(':').next().unwrap_or_default();
        write!(f, "BotToken({id}:***)")
    }
}

/// One uploaded part as reported by the provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemotePart {
    pub file_handle: FileHandle,
    pub message_handle: MessageId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Pending,
    Sent,
    Failed,
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackupStatus::Pending => "pending",
            BackupStatus::Sent => "sent",
            BackupStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One logical delivery of an archive to one destination chat.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: RecordId,
    pub source_id: BotId,
    pub name: String,
    pub local_path: PathBuf,
    pub remote_file_handles: Vec<FileHandle>,
    pub remote_message_handles: Vec<MessageId>,
    pub destination_id: ChatId,
    pub size_bytes: u64,
    pub status: BackupStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl BackupRecord {
    pub fn is_chunked(&self) -> bool {
        self.remote_file_handles.len() > 1
    }

    pub fn part_count(&self) -> usize {
        self.remote_file_handles.len()
    }
}

/// Archive-level facts shared by every record of one send.
#[derive(Clone, Debug)]
pub struct BackupMeta {
    pub source_id: BotId,
    pub destination_id: ChatId,
    pub name: String,
    pub local_path: PathBuf,
    pub size_bytes: u64,
    pub sha256: Option<String>,
}

#[derive(Clone, Debug)]
enum Delivery {
    Sent {
        parts: Vec<RemotePart>,
        sent_at: DateTime<Utc>,
    },
    Failed {
        error: String,
    },
}

/// A record that has not been assigned an id yet.
///
/// Only constructible as fully sent (non-empty, complete part list) or failed
/// (no handles at all), so a stored record can never be partial.
#[derive(Clone, Debug)]
pub struct NewBackupRecord {
    meta: BackupMeta,
    delivery: Delivery,
}

impl NewBackupRecord {
    /// Returns `None` when `parts` is empty.
    pub fn sent(meta: BackupMeta, parts: Vec<RemotePart>, sent_at: DateTime<Utc>) -> Option<Self> {
        if parts.is_empty() {
            return None;
        }
        Some(Self {
            meta,
            delivery: Delivery::Sent { parts, sent_at },
        })
    }

    pub fn failed(meta: BackupMeta, error: impl Into<String>) -> Self {
        Self {
            meta,
            delivery: Delivery::Failed {
                error: error.into(),
            },
        }
    }

    pub fn meta(&self) -> &BackupMeta {
        &self.meta
    }

    pub fn status(&self) -> BackupStatus {
        match self.delivery {
            Delivery::Sent { .. } => BackupStatus::Sent,
            Delivery::Failed { .. } => BackupStatus::Failed,
        }
    }

    pub fn into_record(self, id: RecordId, created_at: DateTime<Utc>) -> BackupRecord {
        let BackupMeta {
            source_id,
            destination_id,
            name,
            local_path,
            size_bytes,
            sha256,
        } = self.meta;

        let (files, messages, status, error_detail, sent_at) = match self.delivery {
            Delivery::Sent { parts, sent_at } => {
                let (files, messages) = parts
                    .into_iter()
                    .map(|p| (p.file_handle, p.message_handle))
                    .unzip();
                (files, messages, BackupStatus::Sent, None, Some(sent_at))
            }
            Delivery::Failed { error } => (
                Vec::new(),
                Vec::new(),
                BackupStatus::Failed,
                Some(error),
                None,
            ),
        };

        BackupRecord {
            id,
            source_id,
            name,
            local_path,
            remote_file_handles: files,
            remote_message_handles: messages,
            destination_id,
            size_bytes,
            status,
            error_detail,
            sent_at,
            sha256,
            created_at,
        }
    }
}

/// Registered sending bot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BotProfile {
    pub id: BotId,
    pub token: BotToken,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub is_active: bool,
}

/// Registered destination chat.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatProfile {
    pub id: ChatId,
    #[serde(default = "default_chat_type")]
    pub chat_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    pub is_active: bool,
}

fn default_chat_type() -> String {
    "private".to_string()
}

impl ChatProfile {
    pub fn new(id: ChatId) -> Self {
        Self {
            id,
            chat_type: default_chat_type(),
            name: None,
            username: None,
            is_active: true,
        }
    }
}

/// Where one copy of a backup goes: which bot sends it, to which chat.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendTarget {
    pub source_id: BotId,
    pub credential: BotToken,
    pub destination_id: ChatId,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> BackupMeta {
        BackupMeta {
            source_id: BotId(1),
            destination_id: ChatId("-100".to_string()),
            name: "site.zip".to_string(),
            local_path: PathBuf::from("/tmp/site.zip"),
            size_bytes: 10,
            sha256: None,
        }
    }

    fn part(n: i64) -> RemotePart {
        RemotePart {
            file_handle: FileHandle(format!("f{n}")),
            message_handle: MessageId(n),
        }
    }

    #[test]
    fn sent_record_keeps_parallel_handles_in_order() {
        let now = Utc::now();
        let rec = NewBackupRecord::sent(meta(), vec![part(1), part(2), part(3)], now)
            .unwrap()
            .into_record(RecordId(7), now);

        assert_eq!(rec.status, BackupStatus::Sent);
        assert_eq!(rec.sent_at, Some(now));
        assert_eq!(
            rec.remote_file_handles,
            vec![
                FileHandle("f1".into()),
                FileHandle("f2".into()),
                FileHandle("f3".into())
            ]
        );
        assert_eq!(
            rec.remote_message_handles,
            vec![MessageId(1), MessageId(2), MessageId(3)]
        );
        assert!(rec.error_detail.is_none());
        assert!(rec.is_chunked());
    }

    #[test]
    fn sent_requires_at_least_one_part() {
        assert!(NewBackupRecord::sent(meta(), vec![], Utc::now()).is_none());
    }

    #[test]
    fn failed_record_has_no_handles() {
        let rec = NewBackupRecord::failed(meta(), "boom").into_record(RecordId(1), Utc::now());
        assert_eq!(rec.status, BackupStatus::Failed);
        assert!(rec.remote_file_handles.is_empty());
        assert!(rec.remote_message_handles.is_empty());
        assert_eq!(rec.error_detail.as_deref(), Some("boom"));
        assert!(rec.sent_at.is_none());
    }

    #[test]
    fn token_debug_is_redacted() {
        let t = BotToken::new("12345:SECRET");
        let dbg = format!("{t:?}");
        assert!(dbg.contains("12345"));
        assert!(!dbg.contains("SECRET"));
    }

    #[test]
    fn status_serializes_lowercase() {
        let s = serde_json::to_string(&BackupStatus::Failed).unwrap();
        assert_eq!(s, "\"failed\"");
    }
}
