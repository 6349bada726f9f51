//! Type definitions for the upload pipeline.
//!
//! Defines the batch input (FileWithCollection), the per-file metadata join,
//! collections, local index entries, and terminal upload results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

// Aggregate percent reported when a batch finishes
pub const FILE_UPLOAD_COMPLETED: u8 = 100;

pub type LocalId = u64;
pub type CollectionId = i64;
pub type FileId = i64;

/// A file on local disk, captured once when the batch is built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFile {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

impl LocalFile {
    pub fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name")
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            name,
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        })
    }

    /// Lowercased extension without the dot
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
    }

    /// File name with the last extension removed
    pub fn base_name(&self) -> &str {
        match self.name.rfind('.') {
            Some(pos) if pos > 0 => &self.name[..pos],
            _ => &self.name,
        }
    }
}

/// What a unit uploads: one file, or an image+video pair merged by the clusterer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UploadAsset {
    File(LocalFile),
    LivePhoto { image: LocalFile, video: LocalFile },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileWithCollection {
    pub local_id: LocalId,
    pub collection_id: CollectionId,
    pub asset: UploadAsset,
    /// Local id of the video half of a merged live photo
    pub paired_local_id: Option<LocalId>,
}

impl FileWithCollection {
    pub fn new(local_id: LocalId, collection_id: CollectionId, file: LocalFile) -> Self {
        Self {
            local_id,
            collection_id,
            asset: UploadAsset::File(file),
            paired_local_id: None,
        }
    }

    pub fn is_live_photo(&self) -> bool {
        matches!(self.asset, UploadAsset::LivePhoto { .. })
    }

    /// Name shown to the user; live photos are named after their image
    pub fn asset_name(&self) -> &str {
        match &self.asset {
            UploadAsset::File(file) => &file.name,
            UploadAsset::LivePhoto { image, .. } => &image.name,
        }
    }

    pub fn total_size(&self) -> u64 {
        match &self.asset {
            UploadAsset::File(file) => file.size,
            UploadAsset::LivePhoto { image, video } => image.size + video.size,
        }
    }

    /// The primary physical file (the image for live photos)
    pub fn primary_file(&self) -> &LocalFile {
        match &self.asset {
            UploadAsset::File(file) => file,
            UploadAsset::LivePhoto { image, .. } => image,
        }
    }

    /// Split a merged unit back into the physical files it came from
    pub fn into_files(self) -> Vec<FileWithCollection> {
        match self.asset {
            UploadAsset::File(_) => vec![self],
            UploadAsset::LivePhoto { image, video } => {
                let mut files = vec![FileWithCollection::new(
                    self.local_id,
                    self.collection_id,
                    image,
                )];
                if let Some(video_id) = self.paired_local_id {
                    files.push(FileWithCollection::new(video_id, self.collection_id, video));
                }
                files
            }
        }
    }

    pub fn paths(&self) -> Vec<&Path> {
        match &self.asset {
            UploadAsset::File(file) => vec![file.path.as_path()],
            UploadAsset::LivePhoto { image, video } => {
                vec![image.path.as_path(), video.path.as_path()]
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Image,
    Video,
    LivePhoto,
    Others,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTypeInfo {
    pub file_type: FileType,
    pub extension: String,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    /// Exporters write (0, 0) when a photo has no position
    pub fn is_valid(&self) -> bool {
        !(self.latitude == 0.0 && self.longitude == 0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub title: String,
    pub creation_time: DateTime<Utc>,
    pub modification_time: DateTime<Utc>,
    pub location: Option<Location>,
    pub file_type: FileType,
    pub hash: Option<String>,
    pub file_size: Option<u64>,
}

/// Extraction result for one local id. Both fields are None when the file was rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataAndFileTypeInfo {
    pub file_type_info: Option<FileTypeInfo>,
    pub metadata: Option<Metadata>,
}

/// A unit that passed extraction, ready for clustering and upload
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedUnit {
    pub unit: FileWithCollection,
    pub file_type_info: FileTypeInfo,
    pub metadata: Metadata,
}

/// Fields read from a sidecar JSON file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedMetadataJson {
    pub creation_time: Option<DateTime<Utc>>,
    pub modification_time: Option<DateTime<Utc>>,
    pub location: Option<Location>,
}

/// Transcoded output that replaces the original file's bytes at upload time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileVariant {
    pub transcoded_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub id: CollectionId,
    pub name: String,
    /// Base64 collection key, opaque to the pipeline
    pub key: String,
}

/// Decrypted record of a file that is stored remotely (an entry of the local index)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedFile {
    pub id: FileId,
    pub collection_id: CollectionId,
    pub updation_time: i64,
    /// Base64 file key, needed to share the file into another collection
    pub key: String,
    pub metadata: Metadata,
}

impl SyncedFile {
    /// Canonical index order: collection ascending, then newest first
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.collection_id
            .cmp(&other.collection_id)
            .then_with(|| other.metadata.creation_time.cmp(&self.metadata.creation_time))
            .then_with(|| {
                other
                    .metadata
                    .modification_time
                    .cmp(&self.metadata.modification_time)
            })
            .then_with(|| self.id.cmp(&other.id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadResult {
    Uploaded,
    UploadedWithStaticThumbnail,
    AddedSymlink,
    Failed,
    Blocked,
    AlreadyUploaded,
    Unsupported,
    TooLarge,
}

impl UploadResult {
    /// Outcomes that put a new entry into the local index
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            UploadResult::Uploaded
                | UploadResult::UploadedWithStaticThumbnail
                | UploadResult::AddedSymlink
        )
    }

    /// Outcomes collected into the retry set
    pub fn is_retryable(&self) -> bool {
        matches!(self, UploadResult::Failed | UploadResult::Blocked)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadStage {
    ReadingMetadata,
    ExtractingMetadata,
    Start,
    Uploading,
    Finish,
}

/// One physical file of the desktop "remaining files" ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingUpload {
    pub collection_id: CollectionId,
    pub path: PathBuf,
}

impl PendingUpload {
    pub fn from_unit(unit: &FileWithCollection) -> Vec<PendingUpload> {
        unit.paths()
            .into_iter()
            .map(|path| PendingUpload {
                collection_id: unit.collection_id,
                path: path.to_path_buf(),
            })
            .collect()
    }
}

/// Counts per terminal result for one batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSummary {
    pub uploaded: usize,
    pub uploaded_with_static_thumbnail: usize,
    pub added_symlink: usize,
    pub already_uploaded: usize,
    pub failed: usize,
    pub blocked: usize,
    pub unsupported: usize,
    pub too_large: usize,
}

impl UploadSummary {
    pub fn record(&mut self, result: UploadResult) {
        match result {
            UploadResult::Uploaded => self.uploaded += 1,
            UploadResult::UploadedWithStaticThumbnail => self.uploaded_with_static_thumbnail += 1,
            UploadResult::AddedSymlink => self.added_symlink += 1,
            UploadResult::AlreadyUploaded => self.already_uploaded += 1,
            UploadResult::Failed => self.failed += 1,
            UploadResult::Blocked => self.blocked += 1,
            UploadResult::Unsupported => self.unsupported += 1,
            UploadResult::TooLarge => self.too_large += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.uploaded
            + self.uploaded_with_static_thumbnail
            + self.added_symlink
            + self.already_uploaded
            + self.failed
            + self.blocked
            + self.unsupported
            + self.too_large
    }

    /// What the user sees as "failed"
    pub fn failed_total(&self) -> usize {
        self.failed + self.blocked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn local_file(name: &str, size: u64) -> LocalFile {
        LocalFile {
            path: PathBuf::from("/photos").join(name),
            name: name.to_string(),
            size,
            last_modified: None,
        }
    }

    fn synced(id: FileId, collection_id: CollectionId, created_secs: i64) -> SyncedFile {
        let time = Utc.timestamp_opt(created_secs, 0).unwrap();
        SyncedFile {
            id,
            collection_id,
            updation_time: 0,
            key: String::new(),
            metadata: Metadata {
                title: format!("{}.jpg", id),
                creation_time: time,
                modification_time: time,
                location: None,
                file_type: FileType::Image,
                hash: None,
                file_size: None,
            },
        }
    }

    #[test]
    fn test_base_name_and_extension() {
        let file = local_file("IMG_0001.HEIC", 10);
        assert_eq!(file.base_name(), "IMG_0001");
        assert_eq!(file.extension().as_deref(), Some("heic"));

        let hidden = local_file(".hidden", 1);
        assert_eq!(hidden.base_name(), ".hidden");
    }

    #[test]
    fn test_live_photo_into_files() {
        let unit = FileWithCollection {
            local_id: 1,
            collection_id: 7,
            asset: UploadAsset::LivePhoto {
                image: local_file("IMG_1.jpg", 10),
                video: local_file("IMG_1.mov", 20),
            },
            paired_local_id: Some(2),
        };
        assert_eq!(unit.total_size(), 30);
        assert_eq!(unit.asset_name(), "IMG_1.jpg");

        let files = unit.into_files();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].local_id, 1);
        assert_eq!(files[1].local_id, 2);
        assert_eq!(files[1].asset_name(), "IMG_1.mov");
    }

    #[test]
    fn test_canonical_order() {
        let mut files = vec![synced(1, 2, 100), synced(2, 1, 100), synced(3, 1, 200)];
        files.sort_by(|a, b| a.canonical_cmp(b));

        let ids: Vec<FileId> = files.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn test_result_classification() {
        assert!(UploadResult::UploadedWithStaticThumbnail.is_success());
        assert!(UploadResult::AddedSymlink.is_success());
        assert!(!UploadResult::AlreadyUploaded.is_success());
        assert!(UploadResult::Blocked.is_retryable());
        assert!(!UploadResult::TooLarge.is_retryable());
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = UploadSummary::default();
        summary.record(UploadResult::Uploaded);
        summary.record(UploadResult::Failed);
        summary.record(UploadResult::Blocked);
        assert_eq!(summary.total(), 3);
        assert_eq!(summary.failed_total(), 2);
    }

    #[test]
    fn test_zero_location_is_invalid() {
        assert!(!Location { latitude: 0.0, longitude: 0.0 }.is_valid());
        assert!(Location { latitude: 48.1, longitude: 11.5 }.is_valid());
    }
}
