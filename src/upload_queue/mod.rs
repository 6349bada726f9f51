//! The upload pipeline.
//!
//! `UploadManager` turns a batch of (file, collection) pairs into terminal
//! upload results: sidecar parsing, extraction and transcoding, live-photo
//! clustering, a fixed pool of upload workers, and reconciliation into the
//! local index.

pub mod extraction;
pub mod hashing;
pub mod live_photo;
pub mod local_index;
pub mod metadata;
pub mod processor;
pub mod queue_manager;
pub mod transcoding;
pub mod types;
pub mod upload;

pub use types::*;

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;

use crate::config::UploadConfig;
use crate::database::LocalStore;
use crate::error::{ErrorContext, SyncError};
use crate::events::{EventBus, UploadEventPayload};
use crate::logging::file_name_size;
use extraction::{extract_file_type_and_metadata, Extraction, MediaExtractor, SniffingExtractor};
use live_photo::cluster_live_photos;
use local_index::LocalIndex;
use metadata::{parse_metadata_json, segregate_metadata_json_files, ParsedMetadataJsonMap};
use processor::{run_worker, BatchContext, RemainingFiles};
use queue_manager::{RetrySet, WorkQueue};
use transcoding::{transcode_if_enabled, FfmpegTranscoder, Transcoder};
use upload::{
    CryptoLease, CryptoWorkerPool, DefaultUploader, FileUploader, HttpTransport, UploadTransport,
};

/// Collaborators the manager drives
#[derive(Clone)]
pub struct UploadServices {
    pub extractor: Arc<dyn MediaExtractor>,
    pub transcoder: Arc<dyn Transcoder>,
    pub uploader: Arc<dyn FileUploader>,
    pub crypto_pool: Arc<dyn CryptoWorkerPool>,
    pub store: Arc<dyn LocalStore>,
}

/// Clears the running flag when a batch ends, however it ends
struct RunningGuard {
    is_running: Arc<Mutex<bool>>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        match self.is_running.lock() {
            Ok(mut running) => *running = false,
            Err(poisoned) => *poisoned.into_inner() = false,
        }
    }
}

#[derive(Clone)]
pub struct UploadManager {
    config: UploadConfig,
    services: UploadServices,
    events: EventBus,
    queue: WorkQueue,
    retry_set: RetrySet,
    is_running: Arc<Mutex<bool>>,
    last_collections: Arc<Mutex<Vec<Collection>>>,
}

impl std::fmt::Debug for UploadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadManager")
            .field("config", &self.config)
            .field("queue", &self.queue)
            .field("retry_set", &"<failed units>")
            .field("is_running", &self.is_running)
            .field("services", &"<collaborators>")
            .finish()
    }
}

impl UploadManager {
    pub fn new(
        config: UploadConfig,
        services: UploadServices,
        events: EventBus,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        Ok(Self {
            config,
            services,
            events,
            queue: WorkQueue::new(),
            retry_set: RetrySet::new(),
            is_running: Arc::new(Mutex::new(false)),
            last_collections: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Manager with the sniffing extractor, ffmpeg transcoder and HTTP transport
    pub fn with_defaults(
        config: UploadConfig,
        crypto_pool: Arc<dyn CryptoWorkerPool>,
        store: Arc<dyn LocalStore>,
        events: EventBus,
    ) -> Result<Self, SyncError> {
        let extractor: Arc<dyn MediaExtractor> = Arc::new(SniffingExtractor::new());
        let transport: Arc<dyn UploadTransport> = Arc::new(HttpTransport::from_config(&config)?);
        let uploader = Arc::new(DefaultUploader::new(extractor.clone(), transport, &config));

        let services = UploadServices {
            extractor,
            transcoder: Arc::new(FfmpegTranscoder::from_config(&config)),
            uploader,
            crypto_pool,
            store,
        };
        Self::new(config, services, events)
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn is_uploading(&self) -> bool {
        self.is_running
            .lock()
            .map(|running| *running)
            .unwrap_or(false)
    }

    /// Units of the last batches that ended FAILED or BLOCKED
    pub fn failed_files(&self) -> Vec<FileWithCollection> {
        self.retry_set.snapshot()
    }

    /// Files an interrupted batch never finished
    pub fn pending_uploads(&self) -> Result<Vec<PendingUpload>, SyncError> {
        self.services.store.load_pending_uploads()
    }

    fn try_start(&self) -> Result<RunningGuard, SyncError> {
        let mut running = self.is_running.lock()?;
        if *running {
            return Err(SyncError::UploadInProgress);
        }
        *running = true;
        Ok(RunningGuard {
            is_running: Arc::clone(&self.is_running),
        })
    }

    /// Upload a batch. Per-file problems become per-file results; only setup
    /// errors are returned.
    pub async fn queue_files_for_upload(
        &self,
        units: Vec<FileWithCollection>,
        collections: &[Collection],
    ) -> Result<UploadSummary, SyncError> {
        let _guard = self.try_start()?;
        if let Ok(mut last) = self.last_collections.lock() {
            *last = collections.to_vec();
        }
        self.run_batch(units, collections).await
    }

    /// Re-submit every FAILED or BLOCKED unit as a new batch
    pub async fn retry_failed_files(&self) -> Result<UploadSummary, SyncError> {
        let _guard = self.try_start()?;

        let failed = self.retry_set.take();
        if failed.is_empty() {
            return Ok(UploadSummary::default());
        }
        let units: Vec<FileWithCollection> = failed
            .iter()
            .cloned()
            .flat_map(FileWithCollection::into_files)
            .collect();

        let collections = self.last_collections.lock()?.clone();
        tracing::info!(count = units.len(), "Retrying failed files");
        let result = self.run_batch(units, &collections).await;

        // Setup errors stop the batch before any unit runs; keep them retryable
        if matches!(&result, Err(e) if e.is_setup()) {
            self.retry_set.clear();
            for unit in failed {
                self.retry_set.add(unit);
            }
        }
        result
    }

    async fn run_batch(
        &self,
        units: Vec<FileWithCollection>,
        collections: &[Collection],
    ) -> Result<UploadSummary, SyncError> {
        let result = self.process_batch(units, collections).await;
        if let Err(e) = &result {
            if e.is_setup() {
                tracing::error!(error = %e, "Upload batch setup failed");
            } else {
                tracing::error!(error = %e, "Upload batch aborted");
            }
        }
        result
    }

    async fn process_batch(
        &self,
        units: Vec<FileWithCollection>,
        collections: &[Collection],
    ) -> Result<UploadSummary, SyncError> {
        // A batch never carries over in-memory state of the previous one
        self.queue.clear();
        self.retry_set.clear();

        let index = Arc::new(LocalIndex::load(Arc::clone(&self.services.store))?);

        let (metadata_json_files, media_files) = segregate_metadata_json_files(units);
        tracing::info!(
            metadata_json_files = metadata_json_files.len(),
            media_files = media_files.len(),
            "Upload batch started"
        );

        let parsed_metadata_json = if metadata_json_files.is_empty() {
            ParsedMetadataJsonMap::new()
        } else {
            self.parse_metadata_json_files(&metadata_json_files).await
        };

        let mut summary = UploadSummary::default();
        if !media_files.is_empty() {
            summary = self
                .upload_media_files(media_files, collections, index, &parsed_metadata_json)
                .await?;
        }

        self.events.publish(UploadEventPayload::StageChanged {
            stage: UploadStage::Finish,
        });
        self.events
            .publish(UploadEventPayload::PercentComplete { percent: FILE_UPLOAD_COMPLETED });

        tracing::info!(
            uploaded = summary.uploaded + summary.uploaded_with_static_thumbnail,
            failed = summary.failed_total(),
            total = summary.total(),
            "Upload batch finished"
        );
        Ok(summary)
    }

    fn start_stage(&self, stage: UploadStage, count: usize) {
        self.events.publish(UploadEventPayload::StageChanged { stage });
        self.events
            .publish(UploadEventPayload::FilesCounted { stage, count });
    }

    fn stage_progress(&self, done: usize, total: usize) {
        if total > 0 {
            let percent = (done * 100 / total).min(100) as u8;
            self.events
                .publish(UploadEventPayload::PercentComplete { percent });
        }
    }

    async fn parse_metadata_json_files(
        &self,
        metadata_files: &[FileWithCollection],
    ) -> ParsedMetadataJsonMap {
        self.start_stage(UploadStage::ReadingMetadata, metadata_files.len());

        let mut parsed_map = ParsedMetadataJsonMap::new();
        for (done, unit) in metadata_files.iter().enumerate() {
            let file = unit.primary_file();
            let name_size = file_name_size(&file.name, file.size);

            match parse_metadata_json(&file.path).await {
                Ok(Some((title, parsed))) => {
                    parsed_map.insert(metadata::metadata_json_map_key(unit.collection_id, &title), parsed);
                    tracing::debug!(file = %name_size, "Parsed metadata json");
                }
                Ok(None) => {
                    tracing::debug!(file = %name_size, "Metadata json has no title, skipping");
                }
                Err(e) => {
                    tracing::warn!(file = %name_size, error = %e, "Failed to parse metadata json");
                }
            }
            self.stage_progress(done + 1, metadata_files.len());
        }
        parsed_map
    }

    async fn upload_media_files(
        &self,
        media_files: Vec<FileWithCollection>,
        collections: &[Collection],
        index: Arc<LocalIndex>,
        parsed_metadata_json: &ParsedMetadataJsonMap,
    ) -> Result<UploadSummary, SyncError> {
        // EXTRACTING_METADATA
        self.start_stage(UploadStage::ExtractingMetadata, media_files.len());

        let total_files = media_files.len();
        let mut prepared = Vec::with_capacity(total_files);
        let mut rejected: Vec<(FileWithCollection, UploadResult)> = Vec::new();
        let mut file_variants = HashMap::new();

        for (done, unit) in media_files.into_iter().enumerate() {
            let file = unit.primary_file().clone();
            let extraction = extract_file_type_and_metadata(
                self.services.extractor.as_ref(),
                &self.config,
                parsed_metadata_json,
                &file,
                unit.collection_id,
            )
            .await;

            match extraction {
                Extraction::Ready {
                    file_type_info,
                    metadata,
                } => {
                    if let Some(variant) = transcode_if_enabled(
                        self.services.transcoder.as_ref(),
                        &self.config,
                        &file,
                        &metadata,
                    )
                    .await
                    {
                        file_variants.insert(unit.local_id, variant);
                    }
                    prepared.push(PreparedUnit {
                        unit,
                        file_type_info,
                        metadata,
                    });
                }
                Extraction::Rejected(result) => rejected.push((unit, result)),
            }
            self.stage_progress(done + 1, total_files);
        }

        self.events.publish(UploadEventPayload::StageChanged {
            stage: UploadStage::Start,
        });

        // Live-photo clustering over the accepted files
        let clustered = cluster_live_photos(prepared, self.config.live_photo_asset_size_limit);

        let mut filenames: HashMap<LocalId, String> = HashMap::new();
        let mut metadata_and_file_type_infos = HashMap::new();
        let mut queued = Vec::with_capacity(clustered.units.len());
        for prepared in clustered.units {
            filenames.insert(prepared.unit.local_id, prepared.unit.asset_name().to_string());
            metadata_and_file_type_infos.insert(
                prepared.unit.local_id,
                MetadataAndFileTypeInfo {
                    file_type_info: Some(prepared.file_type_info),
                    metadata: Some(prepared.metadata),
                },
            );
            queued.push(prepared.unit);
        }
        for (unit, _) in &rejected {
            filenames.insert(unit.local_id, unit.asset_name().to_string());
            metadata_and_file_type_infos.insert(unit.local_id, MetadataAndFileTypeInfo::default());
        }

        self.events
            .publish(UploadEventPayload::FilenamesSet { filenames });
        self.events.publish(UploadEventPayload::HasLivePhotos {
            has_live_photos: clustered.has_live_photos,
        });

        // UPLOADING
        let remaining_files = if self.config.track_remaining_files {
            let mut all_units: Vec<FileWithCollection> = queued.clone();
            all_units.extend(rejected.iter().map(|(unit, _)| unit.clone()));
            match RemainingFiles::track(Arc::clone(&self.services.store), &all_units) {
                Ok(ledger) => Some(ledger),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to record remaining files");
                    None
                }
            }
        } else {
            None
        };

        let queued_count = self.queue.reset(queued);
        let total_units = queued_count + rejected.len();
        self.start_stage(UploadStage::Uploading, total_units);

        let ctx = Arc::new(BatchContext {
            uploader: Arc::clone(&self.services.uploader),
            events: self.events.clone(),
            queue: self.queue.clone(),
            retry_set: self.retry_set.clone(),
            index,
            collections: collections.iter().map(|c| (c.id, c.clone())).collect(),
            metadata_and_file_type_infos,
            file_variants,
            remaining_files,
            summary: Mutex::new(UploadSummary::default()),
            total_units,
            completed_units: AtomicUsize::new(0),
        });

        // Rejected units never enter the queue
        for (unit, result) in &rejected {
            tracing::info!(
                local_id = unit.local_id,
                file = %file_name_size(unit.asset_name(), unit.total_size()),
                ?result,
                "File rejected"
            );
            ctx.record_rejected(unit, *result);
        }

        let run = self.run_workers(&ctx).await;
        ctx.remove_file_variants().await;
        run?;

        Ok(ctx.summary())
    }

    /// Spawn the fixed worker pool and wait for all of it
    async fn run_workers(&self, ctx: &Arc<BatchContext>) -> Result<(), SyncError> {
        let worker_count = self.config.max_concurrent_uploads.min(ctx.queue.len());

        // Acquire every crypto worker first; dropping `leases` on error
        // returns the ones already taken
        let mut leases = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let lease = CryptoLease::acquire(Arc::clone(&self.services.crypto_pool))
                .await
                .map_err(|e| SyncError::Setup(e.to_string()))
                .context("Failed to acquire crypto worker")?;
            leases.push(lease);
        }

        let mut workers = JoinSet::new();
        for (worker_index, lease) in leases.into_iter().enumerate() {
            workers.spawn(run_worker(Arc::clone(ctx), lease, worker_index));
        }

        let mut panicked = None;
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Upload worker panicked");
                panicked.get_or_insert(e.to_string());
            }
        }

        match panicked {
            Some(message) => Err(SyncError::Other(format!("Upload worker failed: {}", message))),
            None => Ok(()),
        }
    }
}

/// Build a batch from every file under `dir`, hidden files excluded
pub fn collect_files(
    dir: &Path,
    collection_id: CollectionId,
    first_local_id: LocalId,
) -> Result<Vec<FileWithCollection>, SyncError> {
    if !dir.is_dir() {
        return Err(SyncError::Validation(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    let mut units = Vec::new();
    let mut next_id = first_local_id;
    for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| SyncError::Io(std::io::Error::other(e)))?;
        if !entry.file_type().is_file() || entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }

        let file = LocalFile::from_path(entry.path())?;
        units.push(FileWithCollection::new(next_id, collection_id, file));
        next_id += 1;
    }
    Ok(units)
}

/// Units of `requested` that still have files in the ledger
pub fn diff_remaining(
    requested: Vec<FileWithCollection>,
    ledger: &[PendingUpload],
) -> Vec<FileWithCollection> {
    let pending: HashSet<(CollectionId, &Path)> = ledger
        .iter()
        .map(|entry| (entry.collection_id, entry.path.as_path()))
        .collect();

    requested
        .into_iter()
        .filter(|unit| {
            unit.paths()
                .iter()
                .any(|path| pending.contains(&(unit.collection_id, *path)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn unit(local_id: LocalId, collection_id: CollectionId, path: &str) -> FileWithCollection {
        let path = PathBuf::from(path);
        FileWithCollection::new(
            local_id,
            collection_id,
            LocalFile {
                name: path.file_name().unwrap().to_string_lossy().to_string(),
                path,
                size: 1,
                last_modified: None,
            },
        )
    }

    #[test]
    fn test_diff_remaining() {
        let requested = vec![
            unit(1, 1, "/p/a.jpg"),
            unit(2, 1, "/p/b.jpg"),
            unit(3, 2, "/p/a.jpg"),
        ];
        let ledger = vec![
            PendingUpload {
                collection_id: 1,
                path: PathBuf::from("/p/b.jpg"),
            },
            PendingUpload {
                collection_id: 2,
                path: PathBuf::from("/p/a.jpg"),
            },
        ];

        let ids: Vec<LocalId> = diff_remaining(requested, &ledger)
            .iter()
            .map(|u| u.local_id)
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_collect_files_skips_hidden_and_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.jpg"), b"b").unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"a").unwrap();
        std::fs::write(dir.path().join(".DS_Store"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("c.mov"), b"c").unwrap();

        let units = collect_files(dir.path(), 7, 100).unwrap();
        let names: Vec<&str> = units.iter().map(|u| u.asset_name()).collect();

        assert_eq!(names, vec!["a.jpg", "b.jpg", "c.mov"]);
        assert_eq!(units[0].local_id, 100);
        assert_eq!(units[2].local_id, 102);
        assert!(units.iter().all(|u| u.collection_id == 7));
    }

    #[test]
    fn test_collect_files_requires_directory() {
        let result = collect_files(Path::new("/nonexistent/dir"), 1, 0);
        assert!(matches!(result, Err(SyncError::Validation(_))));
    }
}
