//! Reconstructs a backup from its recorded parts.
//!
//! Multi-part records are fetched into a private scratch directory first and
//! only then concatenated, so a failed fetch never produces partial output.
//! The scratch directory is removed on every exit path.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use sha2::{Digest, Sha256};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter},
};

use crate::{
    chunker::COPY_BLOCK_SIZE,
    config::Config,
    domain::{BackupRecord, BotToken, FileHandle, RecordId},
    errors::Error,
    resolver::DestinationResolver,
    transport::BackupTransport,
    utils::unix_millis,
    Result,
};

static SCRATCH_SEQ: AtomicUsize = AtomicUsize::new(1);

/// Per-attempt scratch directory. Removed on drop if not removed explicitly.
struct ScratchDir {
    path: PathBuf,
    removed: bool,
}

impl ScratchDir {
    async fn create(root: &Path, record: RecordId) -> Result<Self> {
        let n = SCRATCH_SEQ.fetch_add(1, Ordering::SeqCst);
        let path = root.join(format!("backup-{record}-{}-{n}", unix_millis()));
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self {
            path,
            removed: false,
        })
    }

    fn chunk_path(&self, index: usize) -> PathBuf {
        self.path.join(format!("chunk_{index:04}"))
    }

    async fn remove(mut self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.path).await {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove scratch dir");
        }
        self.removed = true;
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if !self.removed {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}

pub struct RetrievalOrchestrator {
    cfg: Arc<Config>,
    resolver: DestinationResolver,
    transport: Arc<dyn BackupTransport>,
}

impl RetrievalOrchestrator {
    pub fn new(
        cfg: Arc<Config>,
        resolver: DestinationResolver,
        transport: Arc<dyn BackupTransport>,
    ) -> Self {
        Self {
            cfg,
            resolver,
            transport,
        }
    }

    /// Write the original bytes of `record` into `sink`.
    ///
    /// Nothing is written unless every part was fetched (and, when the record
    /// has a checksum, the result matched it). Returns the number of bytes
    /// written.
    pub async fn retrieve_into<W>(&self, record: &BackupRecord, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        if record.remote_file_handles.is_empty() {
            return Err(Error::Unavailable(format!(
                "backup {} has no uploaded parts",
                record.id
            )));
        }

        let credential = self
            .resolver
            .credential_for(record.source_id)
            .await?
            .ok_or_else(|| {
                Error::Unavailable(format!(
                    "bot {} that sent backup {} is no longer registered",
                    record.source_id, record.id
                ))
            })?;

        tracing::info!(
            record = %record.id,
            parts = record.part_count(),
            "retrieving backup"
        );

        if let [handle] = record.remote_file_handles.as_slice() {
            let bytes = self.fetch_part(&credential, handle, 0, 1).await?;
            verify_checksum(record, &hex::encode(Sha256::digest(&bytes)))?;
            sink.write_all(&bytes).await?;
            sink.flush().await?;
            return Ok(bytes.len() as u64);
        }

        let scratch = ScratchDir::create(&self.cfg.scratch_dir, record.id).await?;
        let res = self.merge_into(record, &credential, &scratch, sink).await;
        scratch.remove().await;
        res
    }

    /// Reconstruct into `dest`, going through `<dest>.partial` so `dest` only
    /// ever appears complete.
    pub async fn retrieve_to_path(&self, record: &BackupRecord, dest: &Path) -> Result<u64> {
        let mut partial = dest.as_os_str().to_os_string();
        partial.push(".partial");
        let partial = PathBuf::from(partial);

        let res = async {
            let mut file = File::create(&partial).await?;
            let n = self.retrieve_into(record, &mut file).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&partial, dest).await?;
            Ok::<u64, Error>(n)
        }
        .await;

        if res.is_err() {
            let _ = tokio::fs::remove_file(&partial).await;
        }
        res
    }

    async fn merge_into<W>(
        &self,
        record: &BackupRecord,
        credential: &BotToken,
        scratch: &ScratchDir,
        sink: &mut W,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let total = record.remote_file_handles.len();
        let mut chunks = Vec::with_capacity(total);

        for (idx, handle) in record.remote_file_handles.iter().enumerate() {
            let bytes = self.fetch_part(credential, handle, idx, total).await?;
            let path = scratch.chunk_path(idx);
            tokio::fs::write(&path, &bytes).await?;
            chunks.push(path);
        }

        let merged = scratch.path.join("merged");
        let digest = concat_chunks(&chunks, &merged).await?;
        verify_checksum(record, &digest)?;

        copy_file_into(&merged, sink).await
    }

    async fn fetch_part(
        &self,
        credential: &BotToken,
        handle: &FileHandle,
        idx: usize,
        total: usize,
    ) -> Result<Vec<u8>> {
        let res = async {
            let remote = self.transport.resolve_handle(credential, handle).await?;
            self.transport.fetch_bytes(credential, &remote).await
        }
        .await;

        if let Err(e) = &res {
            tracing::warn!(part = idx + 1, total, error = %e, "failed to fetch part");
        }
        res
    }
}

/// Append `chunks` in order into `merged`, removing each chunk once folded in.
/// Returns the hex SHA-256 of the merged bytes.
async fn concat_chunks(chunks: &[PathBuf], merged: &Path) -> Result<String> {
    let mut out = BufWriter::with_capacity(COPY_BLOCK_SIZE, File::create(merged).await?);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; COPY_BLOCK_SIZE];

    for chunk in chunks {
        let mut src = File::open(chunk).await?;
        loop {
            let n = src.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            out.write_all(&buf[..n]).await?;
        }
        drop(src);
        tokio::fs::remove_file(chunk).await?;
    }

    out.flush().await?;
    Ok(hex::encode(hasher.finalize()))
}

async fn copy_file_into<W>(path: &Path, sink: &mut W) -> Result<u64>
where
    W: AsyncWrite + Unpin + Send + ?Sized,
{
    let mut src = File::open(path).await?;
    let mut buf = vec![0u8; COPY_BLOCK_SIZE];
    let mut total = 0u64;
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        sink.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    sink.flush().await?;
    Ok(total)
}

fn verify_checksum(record: &BackupRecord, actual: &str) -> Result<()> {
    match &record.sha256 {
        Some(expected) if !expected.eq_ignore_ascii_case(actual) => Err(Error::ChecksumMismatch {
            expected: expected.clone(),
            actual: actual.to_string(),
        }),
        _ => Ok(()),
    }
}
