//! Upload workers and per-unit post-processing.
//!
//! A batch runs a fixed number of workers over one shared `WorkQueue`. Each
//! worker owns one crypto worker lease, pops until the queue is empty, and
//! reconciles every result before taking the next unit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::local_index::LocalIndex;
use super::queue_manager::{RetrySet, WorkQueue};
use super::transcoding::remove_file_variant;
use super::types::{
    Collection, CollectionId, FileVariant, FileWithCollection, LocalId, MetadataAndFileTypeInfo,
    PendingUpload, UploadResult, UploadSummary,
};
use super::upload::{
    CryptoLease, CryptoWorker, FileUploader, UploadJob, UploadOutcome, UploadedFile,
};
use crate::database::LocalStore;
use crate::error::SyncError;
use crate::events::{EventBus, UploadEventPayload};
use crate::logging::file_name_size;

/// Desktop ledger of files not yet processed in the current batch
pub struct RemainingFiles {
    store: Arc<dyn LocalStore>,
    entries: Mutex<Vec<PendingUpload>>,
}

impl RemainingFiles {
    /// Record every file of the batch as remaining
    pub fn track(store: Arc<dyn LocalStore>, units: &[FileWithCollection]) -> Result<Self, SyncError> {
        let entries: Vec<PendingUpload> = units.iter().flat_map(PendingUpload::from_unit).collect();
        store.save_pending_uploads(&entries)?;
        Ok(Self {
            store,
            entries: Mutex::new(entries),
        })
    }

    /// Drop a finished unit's files from the ledger and persist it
    pub fn complete(&self, unit: &FileWithCollection) -> Result<(), SyncError> {
        let done = PendingUpload::from_unit(unit);
        let mut entries = self.entries.lock()?;
        entries.retain(|entry| !done.contains(entry));
        self.store.save_pending_uploads(&entries)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// State shared by the workers of one batch
pub struct BatchContext {
    pub uploader: Arc<dyn FileUploader>,
    pub events: EventBus,
    pub queue: WorkQueue,
    pub retry_set: RetrySet,
    pub index: Arc<LocalIndex>,
    pub collections: HashMap<CollectionId, Collection>,
    pub metadata_and_file_type_infos: HashMap<LocalId, MetadataAndFileTypeInfo>,
    pub file_variants: HashMap<LocalId, FileVariant>,
    pub remaining_files: Option<RemainingFiles>,
    pub summary: Mutex<UploadSummary>,
    pub total_units: usize,
    pub completed_units: AtomicUsize,
}

impl BatchContext {
    /// Record a terminal result: summary, per-file event and aggregate progress
    pub fn record_result(&self, local_id: LocalId, result: UploadResult) {
        if let Ok(mut summary) = self.summary.lock() {
            summary.record(result);
        }
        self.events
            .publish(UploadEventPayload::FileCompleted { local_id, result });

        let completed = self.completed_units.fetch_add(1, Ordering::SeqCst) + 1;
        if self.total_units > 0 {
            let percent = (completed * 100 / self.total_units).min(100) as u8;
            self.events
                .publish(UploadEventPayload::PercentComplete { percent });
        }
    }

    /// Result of a unit that never entered the queue
    pub fn record_rejected(&self, unit: &FileWithCollection, result: UploadResult) {
        if let Some(ledger) = &self.remaining_files {
            if let Err(e) = ledger.complete(unit) {
                tracing::warn!(local_id = unit.local_id, error = %e, "Failed to update remaining files");
            }
        }
        self.record_result(unit.local_id, result);
    }

    async fn upload_unit(&self, worker: &dyn CryptoWorker, unit: &FileWithCollection) -> UploadOutcome {
        let info = self.metadata_and_file_type_infos.get(&unit.local_id);
        let (file_type_info, metadata) = match info {
            Some(MetadataAndFileTypeInfo {
                file_type_info: Some(file_type_info),
                metadata: Some(metadata),
            }) => (file_type_info, metadata),
            _ => {
                tracing::error!(local_id = unit.local_id, "Queued unit has no metadata");
                return UploadOutcome::without_file(UploadResult::Failed);
            }
        };

        let Some(collection) = self.collections.get(&unit.collection_id) else {
            tracing::error!(
                local_id = unit.local_id,
                collection_id = unit.collection_id,
                "Unknown target collection"
            );
            return UploadOutcome::without_file(UploadResult::Failed);
        };

        let existing_in_collection = self.index.collection_files(unit.collection_id);
        let existing_all = self.index.snapshot();

        let events = self.events.clone();
        let local_id = unit.local_id;
        let progress = move |percent: u8| {
            events.publish(UploadEventPayload::FileProgress { local_id, percent });
        };

        self.uploader
            .upload(
                worker,
                UploadJob {
                    unit,
                    collection,
                    file_type_info,
                    metadata,
                    variant: self.file_variants.get(&unit.local_id),
                    existing_in_collection: &existing_in_collection,
                    existing_all: &existing_all,
                },
                &progress,
            )
            .await
    }

    /// Merge an outcome into durable state. Errors here downgrade the unit
    /// to FAILED.
    async fn reconcile(
        &self,
        worker: &dyn CryptoWorker,
        unit: &FileWithCollection,
        outcome: UploadOutcome,
    ) -> Result<UploadResult, SyncError> {
        let result = outcome.result;

        if result.is_success() {
            let uploaded: UploadedFile = outcome.file.ok_or_else(|| {
                SyncError::Upload(format!("{:?} without a remote record", result))
            })?;
            let collection = self.collections.get(&unit.collection_id).ok_or_else(|| {
                SyncError::Upload(format!("Unknown collection {}", unit.collection_id))
            })?;

            let (file, total_files) = self.index.reconcile(worker, collection, uploaded).await?;
            self.events.publish(UploadEventPayload::IndexUpdated {
                collection_id: file.collection_id,
                file_id: file.id,
                total_files,
            });
        }

        if let Some(ledger) = &self.remaining_files {
            ledger.complete(unit)?;
        }

        if result.is_retryable() {
            self.retry_set.add(unit.clone());
        }

        Ok(result)
    }

    async fn process_unit(&self, worker: &dyn CryptoWorker, unit: FileWithCollection) {
        let outcome = self.upload_unit(worker, &unit).await;

        let result = match self.reconcile(worker, &unit, outcome).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(
                    local_id = unit.local_id,
                    file = %file_name_size(unit.asset_name(), unit.total_size()),
                    error = %e,
                    "Post upload task failed"
                );
                self.retry_set.add(unit.clone());
                UploadResult::Failed
            }
        };

        if let Some(variant) = self.file_variants.get(&unit.local_id) {
            remove_file_variant(variant).await;
        }

        tracing::info!(
            local_id = unit.local_id,
            collection_id = unit.collection_id,
            ?result,
            "Upload finished"
        );
        self.record_result(unit.local_id, result);
    }

    /// Delete every transcoded file of the batch, including variants of
    /// files that were folded into a live photo or never ran
    pub async fn remove_file_variants(&self) {
        for variant in self.file_variants.values() {
            remove_file_variant(variant).await;
        }
    }

    pub fn summary(&self) -> UploadSummary {
        self.summary
            .lock()
            .map(|summary| summary.clone())
            .unwrap_or_default()
    }
}

/// Worker loop: pop until the queue is empty. The lease is released when
/// the worker returns.
pub async fn run_worker(ctx: Arc<BatchContext>, lease: CryptoLease, worker_index: usize) {
    tracing::debug!(worker_index, "Upload worker started");

    let mut processed = 0usize;
    while let Some(unit) = ctx.queue.pop() {
        ctx.process_unit(lease.worker(), unit).await;
        processed += 1;
    }

    tracing::debug!(worker_index, processed, "Upload worker finished");
}
