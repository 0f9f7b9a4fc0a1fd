//! Background send queue.
//!
//! Callers hand a path to `enqueue` and get control back immediately; a
//! single worker runs the sends one after another so a slow upload never
//! blocks the caller.

use std::{path::PathBuf, sync::Arc};

use tokio::{
    sync::{mpsc, oneshot, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    delivery::{DeliveryOrchestrator, SendOutcome},
    errors::Error,
    Result,
};

const MAX_PENDING_JOBS: usize = 32;

struct Job {
    path: PathBuf,
    max_part_bytes: Option<u64>,
    reply: oneshot::Sender<Result<SendOutcome>>,
}

/// Completion handle for one queued send.
pub struct JobHandle {
    path: PathBuf,
    rx: oneshot::Receiver<Result<SendOutcome>>,
}

impl JobHandle {
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Wait for the send to finish. `JobCancelled` if the queue shut down
    /// before the job ran.
    pub async fn wait(self) -> Result<SendOutcome> {
        self.rx.await.map_err(|_| Error::JobCancelled)?
    }
}

pub struct BackupJobs {
    tx: mpsc::Sender<Job>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BackupJobs {
    /// Spawn the worker. Must be called inside a tokio runtime.
    pub fn start(delivery: Arc<DeliveryOrchestrator>) -> Self {
        let (tx, rx) = mpsc::channel(MAX_PENDING_JOBS);
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run_worker(delivery, rx, cancel.clone()));
        Self {
            tx,
            cancel,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue a send with the configured chunk size.
    pub async fn enqueue(&self, path: impl Into<PathBuf>) -> Result<JobHandle> {
        self.submit(path.into(), None).await
    }

    /// Queue a send with an explicit part ceiling in bytes.
    pub async fn enqueue_with_limit(
        &self,
        path: impl Into<PathBuf>,
        max_part_bytes: u64,
    ) -> Result<JobHandle> {
        self.submit(path.into(), Some(max_part_bytes)).await
    }

    async fn submit(&self, path: PathBuf, max_part_bytes: Option<u64>) -> Result<JobHandle> {
        if self.cancel.is_cancelled() {
            return Err(Error::JobCancelled);
        }
        let (reply, rx) = oneshot::channel();
        let job = Job {
            path: path.clone(),
            max_part_bytes,
            reply,
        };
        self.tx.send(job).await.map_err(|_| Error::JobCancelled)?;
        tracing::debug!(path = %path.display(), "backup job queued");
        Ok(JobHandle { path, rx })
    }

    /// Stop accepting jobs and wait for the worker.
    ///
    /// The job in flight finishes; jobs still queued resolve to
    /// `JobCancelled`.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let worker = self.worker.lock().await.take();
        if let Some(handle) = worker {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "backup worker ended abnormally");
            }
        }
    }
}

impl Drop for BackupJobs {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_worker(
    delivery: Arc<DeliveryOrchestrator>,
    mut rx: mpsc::Receiver<Job>,
    cancel: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = rx.recv() => match job {
                Some(j) => j,
                None => break,
            },
        };

        let started = std::time::Instant::now();
        let res = match job.max_part_bytes {
            Some(max) => delivery.send_with_limit(&job.path, max).await,
            None => delivery.send(&job.path).await,
        };
        match &res {
            Ok(out) => tracing::info!(
                path = %job.path.display(),
                sent = out.sent_count(),
                failed = out.failed_count(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "backup job finished"
            ),
            Err(e) => tracing::error!(path = %job.path.display(), error = %e, "backup job failed"),
        }
        // Receiver may have been dropped; the records are persisted either way.
        let _ = job.reply.send(res);
    }

    rx.close();
    while let Ok(job) = rx.try_recv() {
        tracing::debug!(path = %job.path.display(), "dropping queued backup job");
    }
    tracing::debug!("backup worker stopped");
}
