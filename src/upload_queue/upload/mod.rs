//! Uploading one logical unit.
//!
//! `FileUploader` is the seam the workers call; `DefaultUploader` drives the
//! crypto worker and network transport collaborators.

pub mod crypto;
pub mod http;
pub mod retry;
pub mod transport;
pub mod uploader;

pub use crypto::{
    CryptoError, CryptoLease, CryptoWorker, CryptoWorkerPool, EncryptedFileData, EncryptedKey,
    EncryptionResult,
};
pub use http::HttpTransport;
pub use retry::{classify_error, ErrorType, RetryStrategy};
pub use transport::{
    CreateFileRequest, EncryptedFile, FileAttributes, MetadataAttributes, TransportError,
    UploadTransport,
};
pub use uploader::{are_files_same, read_live_photo, DefaultUploader};

use async_trait::async_trait;

use super::types::{
    Collection, FileTypeInfo, FileVariant, FileWithCollection, Metadata, SyncedFile, UploadResult,
};

/// Per-file progress callback, percent in 0..=100
pub type ProgressFn = dyn Fn(u8) + Send + Sync;

/// Everything the uploader needs for one unit
pub struct UploadJob<'a> {
    pub unit: &'a FileWithCollection,
    pub collection: &'a Collection,
    pub file_type_info: &'a FileTypeInfo,
    pub metadata: &'a Metadata,
    /// Transcoded replacement for the unit's bytes
    pub variant: Option<&'a FileVariant>,
    pub existing_in_collection: &'a [SyncedFile],
    pub existing_all: &'a [SyncedFile],
}

/// Remote record produced by a successful upload
#[derive(Debug, Clone, PartialEq)]
pub enum UploadedFile {
    /// Needs decrypting before it can enter the local index
    Encrypted(EncryptedFile),
    /// Already a local index entry (cross-collection link)
    Decrypted(SyncedFile),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutcome {
    pub result: UploadResult,
    pub file: Option<UploadedFile>,
}

impl UploadOutcome {
    pub fn without_file(result: UploadResult) -> Self {
        Self { result, file: None }
    }
}

#[async_trait]
pub trait FileUploader: Send + Sync {
    /// Produce exactly one terminal result for the job. Never fails.
    async fn upload<'a>(
        &self,
        worker: &dyn CryptoWorker,
        job: UploadJob<'a>,
        progress: &ProgressFn,
    ) -> UploadOutcome;
}
