//! Live-photo clustering.
//!
//! An image and a short video exported side by side with the same base name
//! (`IMG_1.HEIC` + `IMG_1.MOV`) are one captured moment and are uploaded as a
//! single unit.

use indexmap::IndexMap;

use super::hashing::live_photo_hash;
use super::types::{
    CollectionId, FileType, FileTypeInfo, FileWithCollection, LocalFile, PreparedUnit, UploadAsset,
};

/// Result of clustering a batch
#[derive(Debug, Clone, Default)]
pub struct ClusterOutput {
    pub units: Vec<PreparedUnit>,
    pub has_live_photos: bool,
}

/// Merge (image, video) pairs sharing a collection and base name.
///
/// A group pairs only when it holds exactly one image and one video, each at
/// most `asset_size_limit` bytes. Every other file passes through unchanged.
/// Output keeps the position of each group's first member.
pub fn cluster_live_photos(units: Vec<PreparedUnit>, asset_size_limit: u64) -> ClusterOutput {
    let mut groups: IndexMap<(CollectionId, String), Vec<PreparedUnit>> = IndexMap::new();
    for prepared in units {
        let key = (
            prepared.unit.collection_id,
            prepared.unit.primary_file().base_name().to_lowercase(),
        );
        groups.entry(key).or_default().push(prepared);
    }

    let mut output = ClusterOutput::default();
    for (_, group) in groups {
        match try_merge(group, asset_size_limit) {
            Ok(merged) => {
                output.has_live_photos = true;
                output.units.push(merged);
            }
            Err(unpaired) => output.units.extend(unpaired),
        }
    }
    output
}

fn single_file(prepared: &PreparedUnit) -> Option<&LocalFile> {
    match &prepared.unit.asset {
        UploadAsset::File(file) => Some(file),
        UploadAsset::LivePhoto { .. } => None,
    }
}

fn try_merge(
    mut group: Vec<PreparedUnit>,
    asset_size_limit: u64,
) -> Result<PreparedUnit, Vec<PreparedUnit>> {
    if group.len() != 2 {
        return Err(group);
    }

    let image_index = match (
        group[0].file_type_info.file_type,
        group[1].file_type_info.file_type,
    ) {
        (FileType::Image, FileType::Video) => 0,
        (FileType::Video, FileType::Image) => 1,
        _ => return Err(group),
    };

    let within_limit = group
        .iter()
        .all(|p| single_file(p).is_some_and(|file| file.size <= asset_size_limit));
    if !within_limit {
        return Err(group);
    }

    let video = group.remove(1 - image_index);
    let image = group.remove(0);

    let (image_file, video_file) = match (single_file(&image), single_file(&video)) {
        (Some(image_file), Some(video_file)) => (image_file.clone(), video_file.clone()),
        _ => return Err(vec![image, video]),
    };

    let hash = match (&image.metadata.hash, &video.metadata.hash) {
        (Some(image_hash), Some(video_hash)) => Some(live_photo_hash(image_hash, video_hash)),
        _ => None,
    };
    let mut metadata = image.metadata;
    metadata.file_type = FileType::LivePhoto;
    metadata.hash = hash;
    metadata.file_size = Some(image_file.size + video_file.size);

    tracing::debug!(
        image = %image_file.name,
        video = %video_file.name,
        "Clustered live photo"
    );

    Ok(PreparedUnit {
        unit: FileWithCollection {
            local_id: image.unit.local_id,
            collection_id: image.unit.collection_id,
            asset: UploadAsset::LivePhoto {
                image: image_file,
                video: video_file,
            },
            paired_local_id: Some(video.unit.local_id),
        },
        file_type_info: FileTypeInfo {
            file_type: FileType::LivePhoto,
            extension: image.file_type_info.extension,
            mime_type: None,
        },
        metadata,
    })
}
