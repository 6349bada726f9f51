//! In-process fakes for the upload pipeline's collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use photosync_desktop::config::{ImageSourcePreference, UploadConfig};
use photosync_desktop::database::{LocalDatabase, LocalStore};
use photosync_desktop::events::{EventBus, EventReceiver, UploadEvent};
use photosync_desktop::upload_queue::extraction::{file_type_from_extension, MediaExtractor};
use photosync_desktop::upload_queue::transcoding::Transcoder;
use photosync_desktop::upload_queue::upload::{
    CreateFileRequest, CryptoError, CryptoWorker, CryptoWorkerPool, DefaultUploader,
    EncryptedFile, EncryptedFileData, EncryptedKey, EncryptionResult, TransportError,
    UploadTransport,
};
use photosync_desktop::upload_queue::{
    Collection, CollectionId, FileId, FileTypeInfo, FileVariant, FileWithCollection, LocalFile,
    LocalId, Metadata, PendingUpload, SyncedFile,
};
use photosync_desktop::{SyncError, UploadManager, UploadServices};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Extension based classification, file system metadata
#[derive(Default)]
pub struct FakeExtractor {
    pub fail_thumbnails: AtomicBool,
}

#[async_trait]
impl MediaExtractor for FakeExtractor {
    async fn file_type(&self, file: &LocalFile) -> anyhow::Result<FileTypeInfo> {
        let extension = file.extension().unwrap_or_default();
        Ok(FileTypeInfo {
            file_type: file_type_from_extension(&extension),
            extension,
            mime_type: None,
        })
    }

    async fn extract_metadata(
        &self,
        file: &LocalFile,
        file_type_info: &FileTypeInfo,
        _preference: ImageSourcePreference,
    ) -> anyhow::Result<Metadata> {
        let modified = file
            .last_modified
            .ok_or_else(|| anyhow::anyhow!("no mtime"))?;
        Ok(Metadata {
            title: file.name.clone(),
            creation_time: modified,
            modification_time: modified,
            location: None,
            file_type: file_type_info.file_type,
            hash: None,
            file_size: Some(file.size),
        })
    }

    async fn generate_thumbnail(
        &self,
        file: &LocalFile,
        _file_type_info: &FileTypeInfo,
    ) -> anyhow::Result<Vec<u8>> {
        if self.fail_thumbnails.load(Ordering::SeqCst) {
            anyhow::bail!("cannot decode {}", file.name);
        }
        Ok(format!("thumb:{}", file.name).into_bytes())
    }
}

/// Writes `transcoded:<name>` into its own output directory
pub struct FakeTranscoder {
    pub output_dir: TempDir,
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

impl FakeTranscoder {
    pub fn new() -> Self {
        Self {
            output_dir: tempfile::tempdir().unwrap(),
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn outputs(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.output_dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect()
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(
        &self,
        file: &LocalFile,
        _metadata: &Metadata,
    ) -> anyhow::Result<Option<FileVariant>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("encoder crashed");
        }
        let transcoded_path = self.output_dir.path().join(format!("{}.mp4", file.name));
        tokio::fs::write(&transcoded_path, format!("transcoded:{}", file.name)).await?;
        Ok(Some(FileVariant { transcoded_path }))
    }
}

/// "Encryption" that keeps plaintext; metadata travels as JSON so that
/// decryption yields the original record
pub struct FakeCryptoWorker {
    next_key: AtomicUsize,
}

#[async_trait]
impl CryptoWorker for FakeCryptoWorker {
    async fn encrypt_file(&self, data: Vec<u8>) -> Result<EncryptedFileData, CryptoError> {
        let key = self.next_key.fetch_add(1, Ordering::SeqCst);
        Ok(EncryptedFileData {
            file: EncryptionResult {
                encrypted_data: data,
                decryption_header: "file-header".to_string(),
            },
            key: format!("file-key-{}", key),
        })
    }

    async fn encrypt_thumbnail(
        &self,
        data: Vec<u8>,
        _file_key: &str,
    ) -> Result<EncryptionResult, CryptoError> {
        Ok(EncryptionResult {
            encrypted_data: data,
            decryption_header: "thumb-header".to_string(),
        })
    }

    async fn encrypt_metadata(
        &self,
        metadata: &Metadata,
        _file_key: &str,
    ) -> Result<EncryptionResult, CryptoError> {
        let encrypted_data =
            serde_json::to_vec(metadata).map_err(|e| CryptoError::Encryption(e.to_string()))?;
        Ok(EncryptionResult {
            encrypted_data,
            decryption_header: "metadata-header".to_string(),
        })
    }

    async fn encrypt_file_key(
        &self,
        file_key: &str,
        collection_key: &str,
    ) -> Result<EncryptedKey, CryptoError> {
        Ok(EncryptedKey {
            encrypted_key: file_key.to_string(),
            key_decryption_nonce: format!("nonce-{}", collection_key),
        })
    }

    async fn decrypt_file(
        &self,
        file: &EncryptedFile,
        _collection_key: &str,
    ) -> Result<SyncedFile, CryptoError> {
        let bytes = hex::decode(&file.metadata.encrypted_data)
            .map_err(|e| CryptoError::Decryption(e.to_string()))?;
        let metadata: Metadata =
            serde_json::from_slice(&bytes).map_err(|e| CryptoError::Decryption(e.to_string()))?;
        Ok(SyncedFile {
            id: file.id,
            collection_id: file.collection_id,
            updation_time: file.updation_time,
            key: file.encrypted_key.clone(),
            metadata,
        })
    }
}

#[derive(Default)]
pub struct FakeCryptoPool {
    pub fail_acquire: AtomicBool,
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
}

#[async_trait]
impl CryptoWorkerPool for FakeCryptoPool {
    async fn acquire(&self) -> Result<Arc<dyn CryptoWorker>, CryptoError> {
        if self.fail_acquire.load(Ordering::SeqCst) {
            return Err(CryptoError::WorkerUnavailable(
                "failed to load web worker".to_string(),
            ));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeCryptoWorker {
            next_key: AtomicUsize::new(0),
        }))
    }

    fn release(&self, _worker: Arc<dyn CryptoWorker>) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory server. Tracks how many object uploads run at once.
#[derive(Default)]
pub struct FakeTransport {
    pub upload_delay_ms: u64,
    pub objects: Mutex<Vec<Bytes>>,
    pub created: Mutex<Vec<CreateFileRequest>>,
    pub symlinks: Mutex<Vec<(FileId, CollectionId)>>,
    /// The next N object uploads fail with a client error
    pub failing_uploads: AtomicUsize,
    pub quota_exceeded: AtomicBool,
    next_id: AtomicI64,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeTransport {
    pub fn with_delay(upload_delay_ms: u64) -> Self {
        Self {
            upload_delay_ms,
            ..Self::default()
        }
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn has_object(&self, content: &[u8]) -> bool {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .any(|object| object.as_ref() == content)
    }
}

#[async_trait]
impl UploadTransport for FakeTransport {
    async fn upload_object(&self, data: Bytes) -> Result<String, TransportError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if self.upload_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.upload_delay_ms)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.quota_exceeded.load(Ordering::SeqCst) {
            return Err(TransportError::QuotaExceeded);
        }
        let failing = self
            .failing_uploads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(TransportError::Status {
                code: 400,
                message: "bad request".to_string(),
            });
        }

        let mut objects = self.objects.lock().unwrap();
        objects.push(data);
        Ok(format!("object-{}", objects.len()))
    }

    async fn create_file(
        &self,
        request: &CreateFileRequest,
    ) -> Result<EncryptedFile, TransportError> {
        self.created.lock().unwrap().push(request.clone());
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(EncryptedFile {
            id,
            collection_id: request.collection_id,
            updation_time: id * 1000,
            encrypted_key: request.encrypted_key.clone(),
            key_decryption_nonce: request.key_decryption_nonce.clone(),
            file: request.file.clone(),
            thumbnail: request.thumbnail.clone(),
            metadata: request.metadata.clone(),
        })
    }

    async fn add_to_collection(
        &self,
        file_id: FileId,
        collection_id: CollectionId,
        _key: &EncryptedKey,
    ) -> Result<i64, TransportError> {
        self.symlinks.lock().unwrap().push((file_id, collection_id));
        Ok(99_000)
    }
}

/// SQLite store whose next N index saves fail
pub struct FlakyStore {
    inner: LocalDatabase,
    pub failing_saves: AtomicUsize,
}

impl FlakyStore {
    pub fn new(failing_saves: usize) -> Self {
        Self {
            inner: LocalDatabase::open_in_memory().unwrap(),
            failing_saves: AtomicUsize::new(failing_saves),
        }
    }
}

impl LocalStore for FlakyStore {
    fn load_files(&self) -> Result<Vec<SyncedFile>, SyncError> {
        self.inner.load_files()
    }

    fn save_files(&self, files: &[SyncedFile]) -> Result<(), SyncError> {
        let failing = self
            .failing_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(SyncError::Io(std::io::Error::other("disk full")));
        }
        self.inner.save_files(files)
    }

    fn load_pending_uploads(&self) -> Result<Vec<PendingUpload>, SyncError> {
        self.inner.load_pending_uploads()
    }

    fn save_pending_uploads(&self, pending: &[PendingUpload]) -> Result<(), SyncError> {
        self.inner.save_pending_uploads(pending)
    }
}

/// A manager wired to fakes, with a temp directory for media files
pub struct Harness {
    pub dir: TempDir,
    pub manager: UploadManager,
    pub store: Arc<dyn LocalStore>,
    pub extractor: Arc<FakeExtractor>,
    pub transcoder: Arc<FakeTranscoder>,
    pub pool: Arc<FakeCryptoPool>,
    pub transport: Arc<FakeTransport>,
    pub events: EventReceiver,
    next_local_id: AtomicUsize,
}

impl Harness {
    pub fn new(config: UploadConfig) -> Self {
        Self::with_transport(config, FakeTransport::default())
    }

    pub fn with_transport(config: UploadConfig, transport: FakeTransport) -> Self {
        Self::build(config, transport, Arc::new(LocalDatabase::open_in_memory().unwrap()))
    }

    pub fn build(config: UploadConfig, transport: FakeTransport, store: Arc<dyn LocalStore>) -> Self {
        let extractor = Arc::new(FakeExtractor::default());
        let transcoder = Arc::new(FakeTranscoder::new());
        let pool = Arc::new(FakeCryptoPool::default());
        let transport = Arc::new(transport);
        let uploader = Arc::new(DefaultUploader::new(
            extractor.clone(),
            transport.clone(),
            &config,
        ));

        let bus = EventBus::new(8192);
        let events = bus.subscribe();

        let services = UploadServices {
            extractor: extractor.clone(),
            transcoder: transcoder.clone(),
            uploader,
            crypto_pool: pool.clone(),
            store: store.clone(),
        };
        let manager = UploadManager::new(config, services, bus).unwrap();

        Self {
            dir: tempfile::tempdir().unwrap(),
            manager,
            store,
            extractor,
            transcoder,
            pool,
            transport,
            events,
            next_local_id: AtomicUsize::new(1),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write a file with unique content and wrap it as a batch unit
    pub fn file(&self, name: &str, size: usize, collection_id: CollectionId) -> FileWithCollection {
        let path = self.path(name);
        let mut content = name.as_bytes().to_vec();
        content.resize(size.max(content.len()), b'x');
        std::fs::write(&path, &content).unwrap();
        self.unit(&path, collection_id)
    }

    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn unit(&self, path: &Path, collection_id: CollectionId) -> FileWithCollection {
        let local_id = self.next_local_id.fetch_add(1, Ordering::SeqCst) as LocalId;
        FileWithCollection::new(local_id, collection_id, LocalFile::from_path(path).unwrap())
    }

    pub fn drain_events(&mut self) -> Vec<UploadEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn local_files(&self) -> Vec<SyncedFile> {
        self.store.load_files().unwrap()
    }

    pub fn pending_is_empty(&self) -> bool {
        self.store.load_pending_uploads().unwrap().is_empty()
    }
}

pub fn collection(id: CollectionId) -> Collection {
    Collection {
        id,
        name: format!("album-{}", id),
        key: format!("collection-key-{}", id),
    }
}

pub fn ids(units: &[FileWithCollection]) -> HashSet<LocalId> {
    units.iter().map(|u| u.local_id).collect()
}
