use crate::upload_queue::types::{
    CollectionId, FileId, LocalId, UploadResult, UploadStage,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sequence number for ordering events
pub type EventSequence = u64;

/// Progress notification emitted by the upload manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadEvent {
    pub sequence: EventSequence,
    pub timestamp: DateTime<Utc>,
    pub payload: UploadEventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UploadEventPayload {
    StageChanged {
        stage: UploadStage,
    },

    /// Number of files being read or extracted in the current stage
    FilesCounted {
        stage: UploadStage,
        count: usize,
    },

    /// Display names of every unit that will go through a worker
    FilenamesSet {
        filenames: HashMap<LocalId, String>,
    },

    HasLivePhotos {
        has_live_photos: bool,
    },

    FileProgress {
        local_id: LocalId,
        percent: u8,
    },

    FileCompleted {
        local_id: LocalId,
        result: UploadResult,
    },

    /// The local index was reconciled and persisted
    IndexUpdated {
        collection_id: CollectionId,
        file_id: FileId,
        total_files: usize,
    },

    PercentComplete {
        percent: u8,
    },
}

impl UploadEvent {
    pub fn payload_type(&self) -> &str {
        match &self.payload {
            UploadEventPayload::StageChanged { .. } => "stage_changed",
            UploadEventPayload::FilesCounted { .. } => "files_counted",
            UploadEventPayload::FilenamesSet { .. } => "filenames_set",
            UploadEventPayload::HasLivePhotos { .. } => "has_live_photos",
            UploadEventPayload::FileProgress { .. } => "file_progress",
            UploadEventPayload::FileCompleted { .. } => "file_completed",
            UploadEventPayload::IndexUpdated { .. } => "index_updated",
            UploadEventPayload::PercentComplete { .. } => "percent_complete",
        }
    }

    pub fn local_id(&self) -> Option<LocalId> {
        match &self.payload {
            UploadEventPayload::FileProgress { local_id, .. }
            | UploadEventPayload::FileCompleted { local_id, .. } => Some(*local_id),
            _ => None,
        }
    }
}
