//! Per-unit upload state machine.
//!
//! DEDUP_CHECK -> ENCRYPTING -> UPLOADING_CONTENT -> UPLOADING_THUMBNAIL ->
//! terminal. Any error along the way becomes FAILED or BLOCKED for this unit
//! only.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncReadExt;

use super::crypto::{CryptoError, CryptoWorker, EncryptedFileData};
use super::retry::RetryStrategy;
use super::transport::{
    CreateFileRequest, FileAttributes, MetadataAttributes, TransportError, UploadTransport,
};
use super::{FileUploader, ProgressFn, UploadJob, UploadOutcome, UploadedFile};
use crate::config::UploadConfig;
use crate::logging::file_name_size;
use crate::upload_queue::extraction::MediaExtractor;
use crate::upload_queue::types::{
    CollectionId, FileType, Metadata, SyncedFile, UploadAsset, UploadResult,
};

/// 1x1 PNG uploaded when no real thumbnail could be produced
pub const STATIC_THUMBNAIL: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

#[derive(Debug, Error)]
enum UploadError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Blocked(String),
}

impl UploadError {
    fn result(&self) -> UploadResult {
        match self {
            UploadError::Transport(e) => e.upload_result(),
            UploadError::Blocked(_) => UploadResult::Blocked,
            UploadError::Crypto(_) | UploadError::Io(_) => UploadResult::Failed,
        }
    }
}

/// Same asset already known: same title and type, then equal hashes when
/// both sides have one, else equal timestamps and size
pub fn are_files_same(existing: &Metadata, candidate: &Metadata) -> bool {
    if existing.title != candidate.title || existing.file_type != candidate.file_type {
        return false;
    }

    match (&existing.hash, &candidate.hash) {
        (Some(a), Some(b)) => a == b,
        _ => {
            existing.creation_time == candidate.creation_time
                && existing.modification_time == candidate.modification_time
                && existing.file_size == candidate.file_size
        }
    }
}

/// A file with identical content in another collection
pub fn find_in_other_collection<'a>(
    existing_all: &'a [SyncedFile],
    candidate: &Metadata,
    collection_id: CollectionId,
) -> Option<&'a SyncedFile> {
    let hash = candidate.hash.as_ref()?;
    existing_all.iter().find(|file| {
        file.collection_id != collection_id
            && file.metadata.file_type == candidate.file_type
            && file.metadata.hash.as_ref() == Some(hash)
    })
}

const LIVE_PHOTO_HEADER_LEN: usize = 8;

/// Read both halves of a live photo into one buffer laid out as
/// `[u64 BE image length][image][video]`
pub async fn read_live_photo(
    image: &Path,
    video: &Path,
    size_hint: u64,
) -> std::io::Result<Vec<u8>> {
    let capacity = usize::try_from(size_hint).unwrap_or(0);
    let mut packed = Vec::with_capacity(LIVE_PHOTO_HEADER_LEN + capacity);
    packed.resize(LIVE_PHOTO_HEADER_LEN, 0);

    let image_len = tokio::fs::File::open(image)
        .await?
        .read_to_end(&mut packed)
        .await?;
    packed[..LIVE_PHOTO_HEADER_LEN].copy_from_slice(&(image_len as u64).to_be_bytes());

    tokio::fs::File::open(video)
        .await?
        .read_to_end(&mut packed)
        .await?;
    Ok(packed)
}

/// Uploader backed by an extractor for thumbnails and a network transport
pub struct DefaultUploader {
    extractor: Arc<dyn MediaExtractor>,
    transport: Arc<dyn UploadTransport>,
    retry: RetryStrategy,
    max_file_size: u64,
}

impl DefaultUploader {
    pub fn new(
        extractor: Arc<dyn MediaExtractor>,
        transport: Arc<dyn UploadTransport>,
        config: &UploadConfig,
    ) -> Self {
        Self {
            extractor,
            transport,
            retry: RetryStrategy::from_config(config),
            max_file_size: config.max_file_size_supported,
        }
    }

    async fn read_content(&self, job: &UploadJob<'_>) -> Result<Vec<u8>, UploadError> {
        if let Some(variant) = job.variant {
            return Ok(tokio::fs::read(&variant.transcoded_path).await?);
        }

        match &job.unit.asset {
            UploadAsset::File(file) => Ok(tokio::fs::read(&file.path).await?),
            UploadAsset::LivePhoto { image, video } => Ok(read_live_photo(
                &image.path,
                &video.path,
                image.size + video.size,
            )
            .await?),
        }
    }

    /// Every attempt shares the same buffer
    async fn upload_blob(&self, operation: &str, data: Bytes) -> Result<String, TransportError> {
        self.retry
            .run(operation, || self.transport.upload_object(data.clone()))
            .await
    }

    async fn upload_generated_thumbnail(
        &self,
        worker: &dyn CryptoWorker,
        job: &UploadJob<'_>,
        file_key: &str,
    ) -> anyhow::Result<FileAttributes> {
        let thumbnail = self
            .extractor
            .generate_thumbnail(job.unit.primary_file(), job.file_type_info)
            .await?;
        let encrypted = worker.encrypt_thumbnail(thumbnail, file_key).await?;
        let object_key = self
            .upload_blob("upload_thumbnail", Bytes::from(encrypted.encrypted_data))
            .await?;
        Ok(FileAttributes {
            object_key,
            decryption_header: encrypted.decryption_header,
        })
    }

    async fn upload_static_thumbnail(
        &self,
        worker: &dyn CryptoWorker,
        file_key: &str,
    ) -> Result<FileAttributes, UploadError> {
        let encrypted = worker
            .encrypt_thumbnail(STATIC_THUMBNAIL.to_vec(), file_key)
            .await?;
        let object_key = self
            .upload_blob("upload_static_thumbnail", Bytes::from(encrypted.encrypted_data))
            .await?;
        Ok(FileAttributes {
            object_key,
            decryption_header: encrypted.decryption_header,
        })
    }

    async fn add_symlink(
        &self,
        worker: &dyn CryptoWorker,
        job: &UploadJob<'_>,
        existing: &SyncedFile,
    ) -> Result<UploadOutcome, UploadError> {
        let key = worker
            .encrypt_file_key(&existing.key, &job.collection.key)
            .await?;
        let updation_time = self
            .retry
            .run("add_to_collection", || {
                self.transport
                    .add_to_collection(existing.id, job.collection.id, &key)
            })
            .await?;

        let mut linked = existing.clone();
        linked.collection_id = job.collection.id;
        linked.updation_time = updation_time;

        Ok(UploadOutcome {
            result: UploadResult::AddedSymlink,
            file: Some(UploadedFile::Decrypted(linked)),
        })
    }

    async fn try_upload(
        &self,
        worker: &dyn CryptoWorker,
        job: &UploadJob<'_>,
        progress: &ProgressFn,
    ) -> Result<UploadOutcome, UploadError> {
        if job.file_type_info.file_type == FileType::Others {
            return Ok(UploadOutcome::without_file(UploadResult::Unsupported));
        }

        // DEDUP_CHECK
        if job
            .existing_in_collection
            .iter()
            .any(|existing| are_files_same(&existing.metadata, job.metadata))
        {
            return Ok(UploadOutcome::without_file(UploadResult::AlreadyUploaded));
        }

        if let Some(existing) =
            find_in_other_collection(job.existing_all, job.metadata, job.collection.id)
        {
            return self.add_symlink(worker, job, existing).await;
        }

        let size = job.unit.total_size();
        if size >= self.max_file_size {
            return Err(UploadError::Blocked(format!(
                "{} bytes exceeds the supported size",
                size
            )));
        }

        // ENCRYPTING
        let content = self.read_content(job).await?;
        progress(10);
        let EncryptedFileData { file, key } = worker.encrypt_file(content).await?;
        progress(30);

        // UPLOADING_CONTENT
        let object_key = self
            .upload_blob("upload_file", Bytes::from(file.encrypted_data))
            .await?;
        progress(70);

        // UPLOADING_THUMBNAIL
        let (thumbnail, result) = match self.upload_generated_thumbnail(worker, job, &key).await {
            Ok(thumbnail) => (thumbnail, UploadResult::Uploaded),
            Err(e) => {
                tracing::warn!(
                    local_id = job.unit.local_id,
                    error = %e,
                    "Thumbnail generation failed, using static thumbnail"
                );
                (
                    self.upload_static_thumbnail(worker, &key).await?,
                    UploadResult::UploadedWithStaticThumbnail,
                )
            }
        };
        progress(85);

        let metadata = worker.encrypt_metadata(job.metadata, &key).await?;
        let encrypted_key = worker.encrypt_file_key(&key, &job.collection.key).await?;

        let request = CreateFileRequest {
            collection_id: job.collection.id,
            encrypted_key: encrypted_key.encrypted_key,
            key_decryption_nonce: encrypted_key.key_decryption_nonce,
            file: FileAttributes {
                object_key,
                decryption_header: file.decryption_header,
            },
            thumbnail,
            metadata: MetadataAttributes {
                encrypted_data: hex::encode(&metadata.encrypted_data),
                decryption_header: metadata.decryption_header,
            },
        };

        let remote = self
            .retry
            .run("create_file", || self.transport.create_file(&request))
            .await?;
        progress(100);

        Ok(UploadOutcome {
            result,
            file: Some(UploadedFile::Encrypted(remote)),
        })
    }
}

#[async_trait]
impl FileUploader for DefaultUploader {
    async fn upload<'a>(
        &self,
        worker: &dyn CryptoWorker,
        job: UploadJob<'a>,
        progress: &ProgressFn,
    ) -> UploadOutcome {
        match self.try_upload(worker, &job, progress).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let result = e.result();
                tracing::error!(
                    local_id = job.unit.local_id,
                    file = %file_name_size(job.unit.asset_name(), job.unit.total_size()),
                    ?result,
                    error = %e,
                    "Upload failed"
                );
                UploadOutcome::without_file(result)
            }
        }
    }
}
