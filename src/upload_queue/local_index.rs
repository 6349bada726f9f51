//! Post-upload reconciliation of the local file index.
//!
//! The index lists every file known to be stored remotely. It only grows,
//! is kept in canonical order, and is persisted on every append before the
//! new entry becomes visible to readers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::types::{Collection, CollectionId, SyncedFile};
use super::upload::{CryptoWorker, UploadedFile};
use crate::database::LocalStore;
use crate::error::SyncError;

#[derive(Default)]
struct IndexState {
    files: Arc<Vec<SyncedFile>>,
    by_collection: HashMap<CollectionId, Arc<Vec<SyncedFile>>>,
}

impl IndexState {
    fn new(mut files: Vec<SyncedFile>) -> Self {
        files.sort_by(|a, b| a.canonical_cmp(b));

        let mut grouped: HashMap<CollectionId, Vec<SyncedFile>> = HashMap::new();
        for file in &files {
            grouped
                .entry(file.collection_id)
                .or_default()
                .push(file.clone());
        }

        Self {
            files: Arc::new(files),
            by_collection: grouped
                .into_iter()
                .map(|(id, files)| (id, Arc::new(files)))
                .collect(),
        }
    }
}

pub struct LocalIndex {
    store: Arc<dyn LocalStore>,
    state: Mutex<IndexState>,
}

impl LocalIndex {
    /// Load the persisted index. Failure here is a batch setup error.
    pub fn load(store: Arc<dyn LocalStore>) -> Result<Self, SyncError> {
        let files = store
            .load_files()
            .map_err(|e| SyncError::Setup(format!("Failed to load local index: {}", e)))?;

        Ok(Self {
            store,
            state: Mutex::new(IndexState::new(files)),
        })
    }

    /// Every indexed file, in canonical order
    pub fn snapshot(&self) -> Arc<Vec<SyncedFile>> {
        self.state
            .lock()
            .map(|state| state.files.clone())
            .unwrap_or_default()
    }

    pub fn collection_files(&self, collection_id: CollectionId) -> Arc<Vec<SyncedFile>> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.by_collection.get(&collection_id).cloned())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append, re-sort and persist as one critical section.
    ///
    /// The new state replaces the current one only after it is persisted,
    /// so a failed save leaves the index unchanged. Returns the index size.
    pub fn append(&self, file: SyncedFile) -> Result<usize, SyncError> {
        let mut state = self.state.lock()?;

        let mut files: Vec<SyncedFile> = state.files.as_ref().clone();
        files.push(file.clone());
        files.sort_by(|a, b| a.canonical_cmp(b));

        self.store.save_files(&files)?;

        let mut collection: Vec<SyncedFile> = state
            .by_collection
            .get(&file.collection_id)
            .map(|files| files.as_ref().clone())
            .unwrap_or_default();
        collection.push(file.clone());
        collection.sort_by(|a, b| a.canonical_cmp(b));

        let total = files.len();
        state.files = Arc::new(files);
        state
            .by_collection
            .insert(file.collection_id, Arc::new(collection));

        Ok(total)
    }

    /// Turn an upload's remote record into an index entry and append it.
    /// The append rewrites the store, so it runs on the blocking pool.
    pub async fn reconcile(
        self: &Arc<Self>,
        worker: &dyn CryptoWorker,
        collection: &Collection,
        uploaded: UploadedFile,
    ) -> Result<(SyncedFile, usize), SyncError> {
        let file = match uploaded {
            UploadedFile::Decrypted(file) => file,
            UploadedFile::Encrypted(remote) => worker
                .decrypt_file(&remote, &collection.key)
                .await
                .map_err(|e| SyncError::Upload(e.to_string()))?,
        };

        let index = Arc::clone(self);
        let entry = file.clone();
        let total = tokio::task::spawn_blocking(move || index.append(entry))
            .await
            .map_err(|e| SyncError::Other(format!("Index append task failed: {}", e)))??;
        Ok((file, total))
    }
}
