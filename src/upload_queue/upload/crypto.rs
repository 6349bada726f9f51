//! Crypto worker collaborators.
//!
//! Encryption runs on dedicated workers handed out by a pool. Each upload
//! worker holds one for its whole lifetime through a `CryptoLease`, which
//! returns it to the pool when dropped.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use super::transport::EncryptedFile;
use crate::upload_queue::types::{Metadata, SyncedFile};

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("No crypto worker available: {0}")]
    WorkerUnavailable(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionResult {
    pub encrypted_data: Vec<u8>,
    pub decryption_header: String,
}

/// Ciphertext of a file plus the freshly generated file key (base64)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedFileData {
    pub file: EncryptionResult,
    pub key: String,
}

/// A file key sealed with a collection key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedKey {
    pub encrypted_key: String,
    pub key_decryption_nonce: String,
}

#[async_trait]
pub trait CryptoWorker: Send + Sync {
    async fn encrypt_file(&self, data: Vec<u8>) -> Result<EncryptedFileData, CryptoError>;

    async fn encrypt_thumbnail(
        &self,
        data: Vec<u8>,
        file_key: &str,
    ) -> Result<EncryptionResult, CryptoError>;

    async fn encrypt_metadata(
        &self,
        metadata: &Metadata,
        file_key: &str,
    ) -> Result<EncryptionResult, CryptoError>;

    async fn encrypt_file_key(
        &self,
        file_key: &str,
        collection_key: &str,
    ) -> Result<EncryptedKey, CryptoError>;

    /// Open a remote record into a local index entry
    async fn decrypt_file(
        &self,
        file: &EncryptedFile,
        collection_key: &str,
    ) -> Result<SyncedFile, CryptoError>;
}

#[async_trait]
pub trait CryptoWorkerPool: Send + Sync {
    async fn acquire(&self) -> Result<Arc<dyn CryptoWorker>, CryptoError>;

    fn release(&self, worker: Arc<dyn CryptoWorker>);
}

/// Exclusive use of one crypto worker, released on drop
pub struct CryptoLease {
    pool: Arc<dyn CryptoWorkerPool>,
    worker: Arc<dyn CryptoWorker>,
}

impl CryptoLease {
    pub async fn acquire(pool: Arc<dyn CryptoWorkerPool>) -> Result<Self, CryptoError> {
        let worker = pool.acquire().await?;
        Ok(Self { pool, worker })
    }

    pub fn worker(&self) -> &dyn CryptoWorker {
        self.worker.as_ref()
    }
}

impl Drop for CryptoLease {
    fn drop(&mut self) {
        self.pool.release(Arc::clone(&self.worker));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) struct NoopWorker;

    #[async_trait]
    impl CryptoWorker for NoopWorker {
        async fn encrypt_file(&self, data: Vec<u8>) -> Result<EncryptedFileData, CryptoError> {
            Ok(EncryptedFileData {
                file: EncryptionResult {
                    encrypted_data: data,
                    decryption_header: String::new(),
                },
                key: String::new(),
            })
        }

        async fn encrypt_thumbnail(
            &self,
            data: Vec<u8>,
            _file_key: &str,
        ) -> Result<EncryptionResult, CryptoError> {
            Ok(EncryptionResult {
                encrypted_data: data,
                decryption_header: String::new(),
            })
        }

        async fn encrypt_metadata(
            &self,
            _metadata: &Metadata,
            _file_key: &str,
        ) -> Result<EncryptionResult, CryptoError> {
            Err(CryptoError::Encryption("unused".to_string()))
        }

        async fn encrypt_file_key(
            &self,
            _file_key: &str,
            _collection_key: &str,
        ) -> Result<EncryptedKey, CryptoError> {
            Err(CryptoError::Encryption("unused".to_string()))
        }

        async fn decrypt_file(
            &self,
            _file: &EncryptedFile,
            _collection_key: &str,
        ) -> Result<SyncedFile, CryptoError> {
            Err(CryptoError::Decryption("unused".to_string()))
        }
    }

    #[derive(Default)]
    struct CountingPool {
        acquired: AtomicUsize,
        released: AtomicUsize,
    }

    #[async_trait]
    impl CryptoWorkerPool for CountingPool {
        async fn acquire(&self) -> Result<Arc<dyn CryptoWorker>, CryptoError> {
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NoopWorker))
        }

        fn release(&self, _worker: Arc<dyn CryptoWorker>) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_lease_releases_on_drop() {
        let pool = Arc::new(CountingPool::default());

        {
            let lease = CryptoLease::acquire(pool.clone()).await.unwrap();
            let _worker: &dyn CryptoWorker = lease.worker();
            assert_eq!(pool.released.load(Ordering::SeqCst), 0);
        }

        assert_eq!(pool.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(pool.released.load(Ordering::SeqCst), 1);
    }
}
