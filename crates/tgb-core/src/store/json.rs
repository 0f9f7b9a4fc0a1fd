use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::{sync::Mutex, time::sleep};

use crate::{
    domain::{
        BackupRecord, BotId, BotProfile, BotToken, ChatId, ChatProfile, NewBackupRecord, RecordId,
    },
    errors::Error,
    Result,
};

use super::{BackupStore, BotDirectory};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct BotChatLink {
    bot_id: BotId,
    chat_id: ChatId,
}

/// On-disk document: one table per entity, like the relational schema.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct StoreDoc {
    #[serde(default)]
    next_bot_id: i64,
    #[serde(default)]
    next_record_id: u64,
    #[serde(default)]
    bots: Vec<BotProfile>,
    #[serde(default)]
    chats: Vec<ChatProfile>,
    #[serde(default)]
    links: Vec<BotChatLink>,
    #[serde(default)]
    backups: Vec<BackupRecord>,
}

impl StoreDoc {
    fn alloc_bot_id(&mut self) -> BotId {
        let floor = self.bots.iter().map(|b| b.id.0).max().unwrap_or(0) + 1;
        // 0 is reserved for the configured fallback bot.
        let id = self.next_bot_id.max(floor).max(1);
        self.next_bot_id = id + 1;
        BotId(id)
    }

    fn alloc_record_id(&mut self) -> RecordId {
        let floor = self.backups.iter().map(|b| b.id.0).max().unwrap_or(0) + 1;
        let id = self.next_record_id.max(floor);
        self.next_record_id = id + 1;
        RecordId(id)
    }

    fn bot_mut(&mut self, id: BotId) -> Result<&mut BotProfile> {
        self.bots
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or_else(|| Error::NotFound(format!("bot {id} is not registered")))
    }

    fn chat_mut(&mut self, id: &ChatId) -> Result<&mut ChatProfile> {
        self.chats
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| Error::NotFound(format!("chat {id} is not registered")))
    }
}

const LOCK_TIMEOUT: Duration = Duration::from_secs(10);
const LOCK_POLL: Duration = Duration::from_millis(25);
/// A lock file older than this is assumed to belong to a crashed process.
const STALE_LOCK_AGE: Duration = Duration::from_secs(120);

/// Registry + record store backed by a single JSON file.
///
/// Mutations run under an exclusive `<file>.lock`, start from the document
/// currently on disk, and rewrite it atomically (temp file, then rename), so
/// several processes can share one store. The cached copy is replaced only
/// after the write succeeded. `in_memory()` skips persistence entirely.
pub struct JsonStore {
    path: Option<PathBuf>,
    doc: Mutex<StoreDoc>,
}

/// Held while a mutation is in progress; removes the lock file on drop.
struct StoreLock {
    path: PathBuf,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release store lock");
        }
    }
}

impl JsonStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            doc: Mutex::new(StoreDoc::default()),
        }
    }

    /// Open (or start) the store at `path`. A missing or empty file is an empty store.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let doc = read_doc(&path).await?;
        Ok(Self {
            path: Some(path),
            doc: Mutex::new(doc),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Apply `f` to a fresh copy of the document and persist it.
    ///
    /// Nothing changes (on disk or in memory) when `f` or the write fails.
    async fn mutate<T>(&self, f: impl FnOnce(&mut StoreDoc) -> Result<T>) -> Result<T> {
        let mut cached = self.doc.lock().await;
        let Some(path) = &self.path else {
            let mut next = cached.clone();
            let out = f(&mut next)?;
            *cached = next;
            return Ok(out);
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let _lock = acquire_lock(path).await?;

        let mut next = read_doc(path).await?;
        let out = f(&mut next)?;
        write_doc(path, &next).await?;
        *cached = next;
        Ok(out)
    }

    // ============== Registry administration ==============

    pub async fn add_bot(
        &self,
        token: BotToken,
        username: Option<String>,
        name: Option<String>,
        is_active: bool,
    ) -> Result<BotProfile> {
        self.mutate(|doc| {
            if doc.bots.iter().any(|b| b.token == token) {
                return Err(Error::Config("bot token is already registered".to_string()));
            }
            let bot = BotProfile {
                id: doc.alloc_bot_id(),
                token,
                username,
                name,
                is_active,
            };
            doc.bots.push(bot.clone());
            Ok(bot)
        })
        .await
    }

    pub async fn list_bots(&self) -> Result<Vec<BotProfile>> {
        let doc = self.doc.lock().await;
        let mut bots = doc.bots.clone();
        bots.sort_by_key(|b| b.id);
        Ok(bots)
    }

    pub async fn set_bot_active(&self, id: BotId, active: bool) -> Result<()> {
        self.mutate(|doc| {
            doc.bot_mut(id)?.is_active = active;
            Ok(())
        })
        .await
    }

    /// Insert a chat, or refresh the descriptive fields of an existing one.
    ///
    /// The active flag of an existing chat is left as is.
    pub async fn upsert_chat(&self, chat: ChatProfile) -> Result<ChatProfile> {
        self.mutate(|doc| {
            let stored = match doc.chats.iter_mut().find(|c| c.id == chat.id) {
                Some(existing) => {
                    existing.chat_type = chat.chat_type;
                    existing.name = chat.name.or(existing.name.take());
                    existing.username = chat.username.or(existing.username.take());
                    existing.clone()
                }
                None => {
                    doc.chats.push(chat.clone());
                    chat
                }
            };
            Ok(stored)
        })
        .await
    }

    pub async fn set_chat_active(&self, id: &ChatId, active: bool) -> Result<()> {
        self.mutate(|doc| {
            doc.chat_mut(id)?.is_active = active;
            Ok(())
        })
        .await
    }

    /// Link a registered chat to a bot. Returns `false` if already linked.
    pub async fn attach_chat(&self, bot: BotId, chat: &ChatId) -> Result<bool> {
        self.mutate(|doc| {
            doc.bot_mut(bot)?;
            doc.chat_mut(chat)?;
            if doc
                .links
                .iter()
                .any(|l| l.bot_id == bot && &l.chat_id == chat)
            {
                return Ok(false);
            }
            doc.links.push(BotChatLink {
                bot_id: bot,
                chat_id: chat.clone(),
            });
            Ok(true)
        })
        .await
    }
}

async fn read_doc(path: &Path) -> Result<StoreDoc> {
    match tokio::fs::read_to_string(path).await {
        Ok(txt) if txt.trim().is_empty() => Ok(StoreDoc::default()),
        Ok(txt) => Ok(serde_json::from_str(&txt)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreDoc::default()),
        Err(e) => Err(Error::Io(e)),
    }
}

async fn write_doc(path: &Path, doc: &StoreDoc) -> Result<()> {
    let txt = serde_json::to_string_pretty(doc)?;
    let tmp = with_suffix(path, ".tmp");
    tokio::fs::write(&tmp, txt).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

async fn acquire_lock(path: &Path) -> Result<StoreLock> {
    let lock = with_suffix(path, ".lock");
    let started = Instant::now();
    loop {
        let res = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock)
            .await;
        match res {
            Ok(_) => return Ok(StoreLock { path: lock }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if lock_is_stale(&lock).await {
                    tracing::warn!(path = %lock.display(), "removing stale store lock");
                    let _ = tokio::fs::remove_file(&lock).await;
                    continue;
                }
                if started.elapsed() >= LOCK_TIMEOUT {
                    return Err(Error::Unavailable(format!(
                        "store {} is locked by another process",
                        path.display()
                    )));
                }
                sleep(LOCK_POLL).await;
            }
            Err(e) => return Err(Error::Io(e)),
        }
    }
}

async fn lock_is_stale(lock: &Path) -> bool {
    let Ok(meta) = tokio::fs::metadata(lock).await else {
        return false;
    };
    meta.modified()
        .ok()
        .and_then(|m| m.elapsed().ok())
        .is_some_and(|age| age > STALE_LOCK_AGE)
}

#[async_trait]
impl BackupStore for JsonStore {
    async fn create(&self, record: NewBackupRecord) -> Result<BackupRecord> {
        self.mutate(|doc| {
            let id = doc.alloc_record_id();
            let record = record.into_record(id, Utc::now());
            doc.backups.push(record.clone());
            Ok(record)
        })
        .await
    }

    async fn find(&self, id: RecordId) -> Result<Option<BackupRecord>> {
        let doc = self.doc.lock().await;
        Ok(doc.backups.iter().find(|b| b.id == id).cloned())
    }

    async fn list(&self) -> Result<Vec<BackupRecord>> {
        let doc = self.doc.lock().await;
        let mut out = doc.backups.clone();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(out)
    }

    async fn delete(&self, id: RecordId) -> Result<bool> {
        self.mutate(|doc| {
            let before = doc.backups.len();
            doc.backups.retain(|b| b.id != id);
            Ok(doc.backups.len() != before)
        })
        .await
    }
}

#[async_trait]
impl BotDirectory for JsonStore {
    async fn active_bots(&self) -> Result<Vec<BotProfile>> {
        let doc = self.doc.lock().await;
        let mut bots: Vec<BotProfile> = doc.bots.iter().filter(|b| b.is_active).cloned().collect();
        bots.sort_by_key(|b| b.id);
        Ok(bots)
    }

    async fn active_chats(&self, bot: BotId) -> Result<Vec<ChatProfile>> {
        let doc = self.doc.lock().await;
        let chats = doc
            .links
            .iter()
            .filter(|l| l.bot_id == bot)
            .filter_map(|l| doc.chats.iter().find(|c| c.id == l.chat_id))
            .filter(|c| c.is_active)
            .cloned()
            .collect();
        Ok(chats)
    }

    async fn find_bot(&self, bot: BotId) -> Result<Option<BotProfile>> {
        let doc = self.doc.lock().await;
        Ok(doc.bots.iter().find(|b| b.id == bot).cloned())
    }
}
