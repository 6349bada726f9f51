//! Network collaborator for the uploader.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::crypto::EncryptedKey;
use crate::upload_queue::types::{CollectionId, FileId, UploadResult};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request failed with status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("Storage quota exceeded")]
    QuotaExceeded,

    #[error("File too large for the server")]
    FileTooLarge,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    /// Policy rejections are BLOCKED; everything else is FAILED
    pub fn upload_result(&self) -> UploadResult {
        match self {
            TransportError::QuotaExceeded | TransportError::FileTooLarge => UploadResult::Blocked,
            _ => UploadResult::Failed,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => TransportError::Status {
                code: status.as_u16(),
                message: err.to_string(),
            },
            None if err.is_decode() => TransportError::InvalidResponse(err.to_string()),
            None => TransportError::Network(err.to_string()),
        }
    }
}

/// Location and header of an uploaded encrypted object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAttributes {
    pub object_key: String,
    pub decryption_header: String,
}

/// Encrypted metadata travels inline, hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataAttributes {
    pub encrypted_data: String,
    pub decryption_header: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFileRequest {
    pub collection_id: CollectionId,
    pub encrypted_key: String,
    pub key_decryption_nonce: String,
    pub file: FileAttributes,
    pub thumbnail: FileAttributes,
    pub metadata: MetadataAttributes,
}

/// Remote file record as returned by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedFile {
    pub id: FileId,
    pub collection_id: CollectionId,
    pub updation_time: i64,
    pub encrypted_key: String,
    pub key_decryption_nonce: String,
    pub file: FileAttributes,
    pub thumbnail: FileAttributes,
    pub metadata: MetadataAttributes,
}

#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Store an encrypted blob and return its object key
    async fn upload_object(&self, data: Bytes) -> Result<String, TransportError>;

    async fn create_file(
        &self,
        request: &CreateFileRequest,
    ) -> Result<EncryptedFile, TransportError>;

    /// Add an existing file to another collection; returns the new updation time
    async fn add_to_collection(
        &self,
        file_id: FileId,
        collection_id: CollectionId,
        key: &EncryptedKey,
    ) -> Result<i64, TransportError>;
}
