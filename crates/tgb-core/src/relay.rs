//! One entry point wiring config, registry, transport and store together.

use std::{path::Path, sync::Arc};

use tokio::io::AsyncWrite;

use crate::{
    config::Config,
    deletion::{BackupDeleter, DeletionReport},
    delivery::{DeliveryOrchestrator, SendOutcome},
    domain::{BackupRecord, RecordId},
    errors::Error,
    jobs::BackupJobs,
    resolver::DestinationResolver,
    retrieval::RetrievalOrchestrator,
    store::{BackupStore, BotDirectory},
    transport::BackupTransport,
    Result,
};

pub struct BackupRelay {
    store: Arc<dyn BackupStore>,
    delivery: Arc<DeliveryOrchestrator>,
    retrieval: RetrievalOrchestrator,
    deleter: BackupDeleter,
}

impl BackupRelay {
    pub fn new(
        cfg: Arc<Config>,
        transport: Arc<dyn BackupTransport>,
        store: Arc<dyn BackupStore>,
        directory: Arc<dyn BotDirectory>,
    ) -> Self {
        let resolver = DestinationResolver::new(cfg.clone(), directory);
        let delivery = Arc::new(DeliveryOrchestrator::new(
            cfg.clone(),
            resolver.clone(),
            transport.clone(),
            store.clone(),
        ));
        let retrieval = RetrievalOrchestrator::new(cfg, resolver.clone(), transport.clone());
        let deleter = BackupDeleter::new(resolver, transport, store.clone());
        Self {
            store,
            delivery,
            retrieval,
            deleter,
        }
    }

    /// Build over a single value that is both the record store and the
    /// registry (e.g. `JsonStore`).
    pub fn with_store<S>(cfg: Arc<Config>, transport: Arc<dyn BackupTransport>, store: Arc<S>) -> Self
    where
        S: BackupStore + BotDirectory + 'static,
    {
        Self::new(cfg, transport, store.clone(), store)
    }

    pub async fn send(&self, path: &Path) -> Result<SendOutcome> {
        self.delivery.send(path).await
    }

    pub async fn send_with_limit(&self, path: &Path, max_part_bytes: u64) -> Result<SendOutcome> {
        self.delivery.send_with_limit(path, max_part_bytes).await
    }

    /// Background queue sharing this relay's delivery pipeline.
    pub fn start_jobs(&self) -> BackupJobs {
        BackupJobs::start(self.delivery.clone())
    }

    pub async fn retrieve_into<W>(&self, id: RecordId, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let record = self.record(id).await?;
        self.retrieval.retrieve_into(&record, sink).await
    }

    pub async fn retrieve_to_path(&self, id: RecordId, dest: &Path) -> Result<u64> {
        let record = self.record(id).await?;
        self.retrieval.retrieve_to_path(&record, dest).await
    }

    pub async fn delete(&self, id: RecordId) -> Result<DeletionReport> {
        self.deleter.delete(id).await
    }

    pub async fn list(&self) -> Result<Vec<BackupRecord>> {
        self.store.list().await
    }

    pub async fn find(&self, id: RecordId) -> Result<Option<BackupRecord>> {
        self.store.find(id).await
    }

    async fn record(&self, id: RecordId) -> Result<BackupRecord> {
        self.store
            .find(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("backup {id} does not exist")))
    }
}
