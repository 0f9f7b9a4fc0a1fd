//! "Send backup" workflow: decide chunking, upload every part to every
//! target in order, persist one record per target.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::Utc;
use tokio::time::sleep;

use crate::{
    chunker,
    config::Config,
    domain::{BackupMeta, BackupRecord, BackupStatus, NewBackupRecord, RemotePart, SendTarget},
    errors::Error,
    resolver::DestinationResolver,
    store::BackupStore,
    transport::BackupTransport,
    utils::{escape_html, format_bytes},
    Result,
};

/// Result of one `send`: every record that was created, one per target.
#[derive(Clone, Debug, Default)]
pub struct SendOutcome {
    pub records: Vec<BackupRecord>,
}

impl SendOutcome {
    /// True iff at least one destination received the complete file.
    pub fn succeeded(&self) -> bool {
        self.sent_count() > 0
    }

    pub fn sent_count(&self) -> usize {
        self.count(BackupStatus::Sent)
    }

    pub fn failed_count(&self) -> usize {
        self.count(BackupStatus::Failed)
    }

    fn count(&self, status: BackupStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }
}

/// A part ready to upload, with the name it is sent under.
#[derive(Clone, Debug)]
struct PartFile {
    path: PathBuf,
    display_name: String,
}

/// Generated chunk files, removed when dropped so every exit path cleans up.
struct GeneratedParts(Vec<PathBuf>);

impl Drop for GeneratedParts {
    fn drop(&mut self) {
        chunker::remove_parts(&self.0);
    }
}

pub struct DeliveryOrchestrator {
    cfg: Arc<Config>,
    resolver: DestinationResolver,
    transport: Arc<dyn BackupTransport>,
    store: Arc<dyn BackupStore>,
}

impl DeliveryOrchestrator {
    pub fn new(
        cfg: Arc<Config>,
        resolver: DestinationResolver,
        transport: Arc<dyn BackupTransport>,
        store: Arc<dyn BackupStore>,
    ) -> Self {
        Self {
            cfg,
            resolver,
            transport,
            store,
        }
    }

    /// Send `path` using the configured chunk ceiling.
    pub async fn send(&self, path: &Path) -> Result<SendOutcome> {
        self.send_with_limit(path, self.cfg.chunk_size_bytes()).await
    }

    /// Send `path` to every resolved target, splitting into parts of at most
    /// `max_part_bytes`.
    ///
    /// Targets are independent: a failure on one never affects another.
    /// Fails with `ConfigurationMissing` (and creates nothing) when no target
    /// resolves.
    pub async fn send_with_limit(&self, path: &Path, max_part_bytes: u64) -> Result<SendOutcome> {
        if max_part_bytes == 0 {
            return Err(Error::Config("chunk size must be greater than zero".to_string()));
        }

        let size = chunker::file_size(path)?;
        if size == 0 {
            return Err(Error::EmptyBackup(path.to_path_buf()));
        }

        let targets = self.resolver.resolve().await?;
        if targets.is_empty() {
            return Err(Error::ConfigurationMissing(
                "no active bot/chat is registered and no default token + chat id is configured"
                    .to_string(),
            ));
        }

        let name = archive_name(path);
        let owned = path.to_path_buf();
        let (sha256, parts, _generated) = tokio::task::spawn_blocking(move || {
            prepare_parts(&owned, size, max_part_bytes)
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))??;

        tracing::info!(
            backup = %name,
            size = %format_bytes(size),
            parts = parts.len(),
            targets = targets.len(),
            "sending backup"
        );

        let mut outcome = SendOutcome::default();
        for target in &targets {
            let meta = BackupMeta {
                source_id: target.source_id,
                destination_id: target.destination_id.clone(),
                name: name.clone(),
                local_path: path.to_path_buf(),
                size_bytes: size,
                sha256: Some(sha256.clone()),
            };
            let record = self.deliver(target, &parts, meta).await;
            let record = self.store.create(record).await?;

            match record.status {
                BackupStatus::Sent => tracing::info!(
                    record = %record.id,
                    bot = %target.source_id,
                    chat = %target.destination_id,
                    parts = record.part_count(),
                    "backup delivered"
                ),
                _ => tracing::warn!(
                    record = %record.id,
                    bot = %target.source_id,
                    chat = %target.destination_id,
                    error = record.error_detail.as_deref().unwrap_or_default(),
                    "backup delivery failed"
                ),
            }
            outcome.records.push(record);
        }

        if !outcome.succeeded() && self.cfg.notify_on_failure {
            let html = failure_notice(&self.cfg.app_name, &name, size, &outcome.records);
            self.notify(&targets, &html).await;
        }

        Ok(outcome)
    }

    /// Best effort: a notice that cannot be posted is only logged.
    async fn notify(&self, targets: &[SendTarget], html: &str) {
        for target in targets {
            if let Err(e) = self
                .transport
                .send_html(&target.credential, &target.destination_id, html)
                .await
            {
                tracing::warn!(
                    bot = %target.source_id,
                    chat = %target.destination_id,
                    error = %e,
                    "failed to send failure notice"
                );
            }
        }
    }

    /// Upload every part to one target and build its record.
    ///
    /// Keeps going after a failed part; any failure makes the whole target
    /// failed and its uploaded handles are dropped.
    async fn deliver(&self, target: &SendTarget, parts: &[PartFile], meta: BackupMeta) -> NewBackupRecord {
        let total = parts.len();
        let mut uploaded: Vec<RemotePart> = Vec::with_capacity(total);
        let mut first_error: Option<String> = None;

        for (idx, part) in parts.iter().enumerate() {
            match self.upload_part(target, part, idx, total, &meta.name).await {
                Ok(remote) => uploaded.push(remote),
                Err(e) => {
                    tracing::warn!(
                        chat = %target.destination_id,
                        part = idx + 1,
                        total,
                        error = %e,
                        "part upload failed"
                    );
                    if first_error.is_none() {
                        first_error = Some(if total > 1 {
                            format!("part {}/{total}: {e}", idx + 1)
                        } else {
                            e.to_string()
                        });
                    }
                }
            }
        }

        let error = match first_error {
            None => match NewBackupRecord::sent(meta.clone(), uploaded, Utc::now()) {
                Some(record) => return record,
                None => "no parts were uploaded".to_string(),
            },
            Some(error) => {
                if !uploaded.is_empty() && self.cfg.delete_orphaned_parts {
                    self.delete_orphans(target, &uploaded).await;
                }
                error
            }
        };

        NewBackupRecord::failed(meta, error)
    }

    async fn upload_part(
        &self,
        target: &SendTarget,
        part: &PartFile,
        idx: usize,
        total: usize,
        archive: &str,
    ) -> Result<RemotePart> {
        let bytes = tokio::fs::read(&part.path).await?;
        let caption = caption(&self.cfg.app_name, archive, idx, total);

        let mut attempts = 0u32;
        loop {
            let res = self
                .transport
                .upload_part(
                    &target.credential,
                    &target.destination_id,
                    bytes.clone(),
                    &part.display_name,
                    &caption,
                )
                .await;

            match res {
                Ok(remote) => return Ok(remote),
                Err(e) => match e.retry_after() {
                    Some(wait) if attempts < self.cfg.upload_retries => {
                        attempts += 1;
                        tracing::info!(
                            chat = %target.destination_id,
                            part = idx + 1,
                            wait_ms = wait.as_millis() as u64,
                            "rate limited; retrying part upload"
                        );
                        sleep(wait).await;
                    }
                    _ => return Err(e),
                },
            }
        }
    }

    /// Remove messages of a target whose sequence did not complete.
    async fn delete_orphans(&self, target: &SendTarget, uploaded: &[RemotePart]) {
        for part in uploaded {
            let res = self
                .transport
                .delete_message(&target.credential, &target.destination_id, part.message_handle)
                .await;
            if !res.success {
                tracing::warn!(
                    chat = %target.destination_id,
                    message = %part.message_handle,
                    error = res.error.as_deref().unwrap_or_default(),
                    "failed to delete orphaned part"
                );
            }
        }
    }
}

/// Checksum the source and, when it exceeds the ceiling, split it.
fn prepare_parts(
    path: &Path,
    size: u64,
    max_part_bytes: u64,
) -> Result<(String, Vec<PartFile>, GeneratedParts)> {
    let sha256 = chunker::sha256_file(path)?;

    if size <= max_part_bytes {
        let part = PartFile {
            path: path.to_path_buf(),
            display_name: archive_name(path),
        };
        return Ok((sha256, vec![part], GeneratedParts(Vec::new())));
    }

    let generated = GeneratedParts(chunker::split(path, max_part_bytes)?);
    let parts = generated
        .0
        .iter()
        .map(|p| PartFile {
            path: p.clone(),
            display_name: archive_name(p),
        })
        .collect();
    Ok((sha256, parts, generated))
}

fn archive_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "backup".to_string())
}

fn caption(app: &str, archive: &str, idx: usize, total: usize) -> String {
    if total > 1 {
        format!("[{app}] Backup of: {archive} (part {}/{total})", idx + 1)
    } else {
        format!("[{app}] Backup of: {archive}")
    }
}

fn failure_notice(app: &str, archive: &str, size: u64, records: &[BackupRecord]) -> String {
    let mut html = format!(
        "<b>[{}] Backup failed!</b>\n\nBackup Name: {}\nSize: {}\n",
        escape_html(app),
        escape_html(archive),
        format_bytes(size)
    );
    for r in records {
        html.push_str(&format!(
            "Error ({}): {}\n",
            escape_html(&r.destination_id.0),
            escape_html(r.error_detail.as_deref().unwrap_or("unknown error"))
        ));
    }
    html
}
