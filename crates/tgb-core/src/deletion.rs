use std::sync::Arc;

use crate::{
    domain::{MessageId, RecordId},
    errors::Error,
    resolver::DestinationResolver,
    store::BackupStore,
    transport::BackupTransport,
    Result,
};

/// What happened to the remote side of a deleted record.
#[derive(Clone, Debug, Default)]
pub struct DeletionReport {
    pub record_id: Option<RecordId>,
    pub deleted: usize,
    pub failures: Vec<(MessageId, String)>,
    /// Set when remote deletion was not attempted at all.
    pub remote_skipped: Option<String>,
}

impl DeletionReport {
    pub fn fully_cleaned(&self) -> bool {
        self.failures.is_empty() && self.remote_skipped.is_none()
    }
}

/// Removes a record together with the messages it points at.
///
/// The local record is authoritative: it is removed even when the remote
/// messages cannot be.
pub struct BackupDeleter {
    resolver: DestinationResolver,
    transport: Arc<dyn BackupTransport>,
    store: Arc<dyn BackupStore>,
}

impl BackupDeleter {
    pub fn new(
        resolver: DestinationResolver,
        transport: Arc<dyn BackupTransport>,
        store: Arc<dyn BackupStore>,
    ) -> Self {
        Self {
            resolver,
            transport,
            store,
        }
    }

    pub async fn delete(&self, id: RecordId) -> Result<DeletionReport> {
        let record = self
            .store
            .find(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("backup {id} does not exist")))?;

        let mut report = DeletionReport {
            record_id: Some(id),
            ..DeletionReport::default()
        };

        if !record.remote_message_handles.is_empty() {
            match self.resolver.credential_for(record.source_id).await {
                Ok(Some(credential)) => {
                    for &message in &record.remote_message_handles {
                        let res = self
                            .transport
                            .delete_message(&credential, &record.destination_id, message)
                            .await;
                        if res.success {
                            report.deleted += 1;
                        } else {
                            let error = res.error.unwrap_or_else(|| "unknown error".to_string());
                            tracing::warn!(
                                record = %id,
                                message = %message,
                                error = %error,
                                "failed to delete remote message"
                            );
                            report.failures.push((message, error));
                        }
                    }
                }
                Ok(None) => {
                    report.remote_skipped =
                        Some(format!("bot {} is no longer registered", record.source_id));
                }
                Err(e) => {
                    report.remote_skipped = Some(format!("bot lookup failed: {e}"));
                }
            }
        }

        self.store.delete(id).await?;
        tracing::info!(
            record = %id,
            deleted = report.deleted,
            failed = report.failures.len(),
            "backup record deleted"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::domain::{
        BackupMeta, BotId, BotToken, ChatId, FileHandle, NewBackupRecord, RemotePart,
    };
    use crate::store::JsonStore;
    use crate::testing::FakeTransport;
    use chrono::Utc;
    use std::path::PathBuf;

    async fn setup() -> (Arc<JsonStore>, Arc<FakeTransport>, BackupDeleter, BotId) {
        let store = Arc::new(JsonStore::in_memory());
        let bot = store
            .add_bot(BotToken::new("1:t"), None, None, true)
            .await
            .unwrap();
        let transport = Arc::new(FakeTransport::default());
        let resolver = DestinationResolver::new(Arc::new(Config::default()), store.clone());
        let deleter = BackupDeleter::new(resolver, transport.clone(), store.clone());
        (store, transport, deleter, bot.id)
    }

    fn record(bot: BotId, messages: &[i64]) -> NewBackupRecord {
        let meta = BackupMeta {
            source_id: bot,
            destination_id: ChatId("-7".into()),
            name: "n.zip".into(),
            local_path: PathBuf::from("/b/n.zip"),
            size_bytes: 1,
            sha256: None,
        };
        let parts = messages
            .iter()
            .map(|&m| RemotePart {
                file_handle: FileHandle(format!("f{m}")),
                message_handle: MessageId(m),
            })
            .collect();
        NewBackupRecord::sent(meta, parts, Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn deletes_every_message_then_the_record() {
        let (store, transport, deleter, bot) = setup().await;
        let rec = store.create(record(bot, &[11, 12, 13])).await.unwrap();

        let report = deleter.delete(rec.id).await.unwrap();
        assert_eq!(report.deleted, 3);
        assert!(report.fully_cleaned());
        assert_eq!(
            transport.deleted(),
            vec![
                ("-7".to_string(), 11),
                ("-7".to_string(), 12),
                ("-7".to_string(), 13)
            ]
        );
        assert!(store.find(rec.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remote_failures_do_not_block_record_removal() {
        let (store, transport, deleter, bot) = setup().await;
        let rec = store.create(record(bot, &[1, 2])).await.unwrap();
        transport.refuse_delete(MessageId(1));

        let report = deleter.delete(rec.id).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, MessageId(1));
        assert!(store.find(rec.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_bot_skips_remote_side() {
        let (store, transport, deleter, _) = setup().await;
        let rec = store.create(record(BotId(99), &[1])).await.unwrap();

        let report = deleter.delete(rec.id).await.unwrap();
        assert!(report.remote_skipped.is_some());
        assert!(transport.deleted().is_empty());
        assert!(store.find(rec.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_record_is_removed_without_remote_calls() {
        let (store, transport, deleter, bot) = setup().await;
        let meta = BackupMeta {
            source_id: bot,
            destination_id: ChatId("-7".into()),
            name: "n.zip".into(),
            local_path: PathBuf::from("/b/n.zip"),
            size_bytes: 1,
            sha256: None,
        };
        let rec = store
            .create(NewBackupRecord::failed(meta, "nope"))
            .await
            .unwrap();

        let report = deleter.delete(rec.id).await.unwrap();
        assert_eq!(report.deleted, 0);
        assert!(report.fully_cleaned());
        assert!(transport.deleted().is_empty());
    }

    #[tokio::test]
    async fn missing_record_is_not_found() {
        let (_, _, deleter, _) = setup().await;
        let err = deleter.delete(RecordId(5)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
