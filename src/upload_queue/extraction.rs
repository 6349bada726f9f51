//! Type classification and metadata extraction for media files.
//!
//! The codecs behind `MediaExtractor` are pluggable; this module owns the
//! join that turns one raw file into its `(FileTypeInfo, Metadata)` pair,
//! applies size and type rejection, merges sidecar metadata and fills in
//! the content hash.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use super::hashing::calculate_file_hash_sha256;
use super::metadata::{apply_metadata_json, lookup_metadata_json, ParsedMetadataJsonMap};
use super::types::{CollectionId, FileType, FileTypeInfo, LocalFile, Metadata, UploadResult};
use crate::config::{ImageSourcePreference, UploadConfig};
use crate::logging::file_name_size;

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "heic", "heif", "webp", "bmp", "tif", "tiff", "dng", "arw",
    "cr2", "nef",
];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "avi", "mkv", "webm", "3gp", "mts"];

/// Classifies files and reads their descriptive metadata
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    async fn file_type(&self, file: &LocalFile) -> anyhow::Result<FileTypeInfo>;

    async fn extract_metadata(
        &self,
        file: &LocalFile,
        file_type_info: &FileTypeInfo,
        preference: ImageSourcePreference,
    ) -> anyhow::Result<Metadata>;

    /// Encoded thumbnail bytes
    async fn generate_thumbnail(
        &self,
        file: &LocalFile,
        file_type_info: &FileTypeInfo,
    ) -> anyhow::Result<Vec<u8>>;
}

/// Result of running one media file through extraction
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Ready {
        file_type_info: FileTypeInfo,
        metadata: Metadata,
    },
    /// Terminal outcome decided before upload (TOO_LARGE or UNSUPPORTED)
    Rejected(UploadResult),
}

/// Classify and extract one file. Never fails: problems become a rejection
/// or a degraded metadata record.
pub async fn extract_file_type_and_metadata(
    extractor: &dyn MediaExtractor,
    config: &UploadConfig,
    parsed_metadata_json: &ParsedMetadataJsonMap,
    file: &LocalFile,
    collection_id: CollectionId,
) -> Extraction {
    let name_size = file_name_size(&file.name, file.size);

    if file.size >= config.max_file_size_supported {
        tracing::info!(file = %name_size, "Rejected because of large size");
        return Extraction::Rejected(UploadResult::TooLarge);
    }

    let file_type_info = match extractor.file_type(file).await {
        Ok(info) => info,
        Err(e) => {
            tracing::warn!(file = %name_size, error = %e, "File type detection failed");
            return Extraction::Rejected(UploadResult::Unsupported);
        }
    };

    if file_type_info.file_type == FileType::Others {
        tracing::info!(file = %name_size, "Rejected because of unknown file format");
        return Extraction::Rejected(UploadResult::Unsupported);
    }

    let mut metadata = match extractor
        .extract_metadata(file, &file_type_info, config.image_source_preference)
        .await
    {
        Ok(metadata) => metadata,
        Err(e) => {
            tracing::warn!(
                file = %name_size,
                error = %e,
                "Metadata extraction failed, using file system metadata"
            );
            fallback_metadata(file, file_type_info.file_type)
        }
    };

    if let Some(parsed) = lookup_metadata_json(parsed_metadata_json, collection_id, &file.name) {
        apply_metadata_json(&mut metadata, parsed);
    }

    if metadata.hash.is_none() {
        metadata.hash = hash_file(&file.path).await;
    }
    if metadata.file_size.is_none() {
        metadata.file_size = Some(file.size);
    }

    Extraction::Ready {
        file_type_info,
        metadata,
    }
}

/// Metadata derived from the file system only
pub fn fallback_metadata(file: &LocalFile, file_type: FileType) -> Metadata {
    let modified = file.last_modified.unwrap_or_else(Utc::now);
    Metadata {
        title: file.name.clone(),
        creation_time: modified,
        modification_time: modified,
        location: None,
        file_type,
        hash: None,
        file_size: Some(file.size),
    }
}

async fn hash_file(path: &Path) -> Option<String> {
    let path = path.to_path_buf();
    match tokio::task::spawn_blocking(move || calculate_file_hash_sha256(&path)).await {
        Ok(Ok(hash)) => Some(hash),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Failed to hash file");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "Hashing task failed");
            None
        }
    }
}

pub fn file_type_from_extension(extension: &str) -> FileType {
    let extension = extension.to_lowercase();
    if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        FileType::Image
    } else if VIDEO_EXTENSIONS.contains(&extension.as_str()) {
        FileType::Video
    } else {
        FileType::Others
    }
}

/// Magic-number sniffing with an extension fallback. Metadata comes from the
/// file system.
///
/// Thumbnails are not rendered: `generate_thumbnail` always fails, so every
/// upload through this extractor ends as `UploadedWithStaticThumbnail`.
/// Plug in an extractor with a real renderer to get `Uploaded`.
#[derive(Debug, Clone, Default)]
pub struct SniffingExtractor;

impl SniffingExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Takeout exports keep edits next to the original as `name-edited.ext`.
    /// Only metadata is read from the edited file; the queued file is what
    /// gets uploaded.
    fn source_path(file: &LocalFile, preference: ImageSourcePreference) -> PathBuf {
        if preference == ImageSourcePreference::Edited {
            let edited_name = match file.extension() {
                Some(ext) => format!("{}-edited.{}", file.base_name(), ext),
                None => format!("{}-edited", file.base_name()),
            };
            let edited = file.path.with_file_name(edited_name);
            if edited.exists() {
                return edited;
            }
        }
        file.path.clone()
    }
}

#[async_trait]
impl MediaExtractor for SniffingExtractor {
    async fn file_type(&self, file: &LocalFile) -> anyhow::Result<FileTypeInfo> {
        let path = file.path.clone();
        let kind = tokio::task::spawn_blocking(move || infer::get_from_path(path)).await??;

        let extension = file.extension().unwrap_or_default();
        let info = match kind {
            Some(kind) => {
                let file_type = match kind.matcher_type() {
                    infer::MatcherType::Image => FileType::Image,
                    infer::MatcherType::Video => FileType::Video,
                    _ => file_type_from_extension(&extension),
                };
                FileTypeInfo {
                    file_type,
                    extension: kind.extension().to_string(),
                    mime_type: Some(kind.mime_type().to_string()),
                }
            }
            None => FileTypeInfo {
                file_type: file_type_from_extension(&extension),
                extension,
                mime_type: None,
            },
        };

        Ok(info)
    }

    async fn extract_metadata(
        &self,
        file: &LocalFile,
        file_type_info: &FileTypeInfo,
        preference: ImageSourcePreference,
    ) -> anyhow::Result<Metadata> {
        let source = Self::source_path(file, preference);
        let fs_metadata = tokio::fs::metadata(&source).await?;

        let modification_time: DateTime<Utc> = fs_metadata.modified()?.into();
        let creation_time: DateTime<Utc> = fs_metadata
            .created()
            .map(DateTime::<Utc>::from)
            .unwrap_or(modification_time);

        Ok(Metadata {
            title: file.name.clone(),
            creation_time,
            modification_time,
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
        anyhow::bail!("no thumbnail renderer available for {}", file.name)
    }
}
