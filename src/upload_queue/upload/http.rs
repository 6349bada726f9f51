//! HTTP implementation of the upload transport.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;

use super::crypto::EncryptedKey;
use super::transport::{CreateFileRequest, EncryptedFile, TransportError, UploadTransport};
use crate::config::UploadConfig;
use crate::error::SyncError;
use crate::upload_queue::types::{CollectionId, FileId};

const AUTH_HEADER: &str = "X-Auth-Token";

pub struct HttpTransport {
    client: reqwest::Client,
    server_url: String,
    auth_token: String,
}

impl HttpTransport {
    pub fn new(server_url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            server_url: server_url.into().trim_end_matches('/').to_string(),
            auth_token: auth_token.into(),
        }
    }

    pub fn from_config(config: &UploadConfig) -> Result<Self, SyncError> {
        let server_url = config
            .server_url
            .clone()
            .ok_or_else(|| SyncError::Config("No server URL configured".to_string()))?;
        let auth_token = config
            .auth_token
            .clone()
            .ok_or_else(|| SyncError::Config("No auth token configured".to_string()))?;
        Ok(Self::new(server_url, auth_token))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.server_url, path)
    }

    /// Map a non-success response to a typed error
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        Err(match status.as_u16() {
            413 => TransportError::FileTooLarge,
            426 => TransportError::QuotaExceeded,
            code => TransportError::Status {
                code,
                message: error_text,
            },
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadObjectResponse {
    object_key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddToCollectionResponse {
    updation_time: i64,
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn upload_object(&self, data: Bytes) -> Result<String, TransportError> {
        let response = self
            .client
            .post(self.url("/files/objects"))
            .header(AUTH_HEADER, &self.auth_token)
            .header("Content-Type", "application/octet-stream")
            .body(data)
            .send()
            .await?;

        let body: UploadObjectResponse = Self::check_status(response).await?.json().await?;
        Ok(body.object_key)
    }

    async fn create_file(
        &self,
        request: &CreateFileRequest,
    ) -> Result<EncryptedFile, TransportError> {
        let response = self
            .client
            .post(self.url("/files"))
            .header(AUTH_HEADER, &self.auth_token)
            .json(request)
            .send()
            .await?;

        Ok(Self::check_status(response).await?.json().await?)
    }

    async fn add_to_collection(
        &self,
        file_id: FileId,
        collection_id: CollectionId,
        key: &EncryptedKey,
    ) -> Result<i64, TransportError> {
        let request = serde_json::json!({
            "collectionID": collection_id,
            "files": [{
                "id": file_id,
                "encryptedKey": key.encrypted_key,
                "keyDecryptionNonce": key.key_decryption_nonce,
            }],
        });

        let response = self
            .client
            .post(self.url("/collections/add-files"))
            .header(AUTH_HEADER, &self.auth_token)
            .json(&request)
            .send()
            .await?;

        let body: AddToCollectionResponse = Self::check_status(response).await?.json().await?;
        Ok(body.updation_time)
    }
}
