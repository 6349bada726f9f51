//! Sidecar metadata parsing.
//!
//! Exported archives (Google Takeout and similar) ship one JSON file per
//! media file. Each sidecar is parsed into a `ParsedMetadataJson` keyed by
//! `"{collection_id}-{title}"` and later merged into the extracted metadata.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

use super::types::{
    CollectionId, FileWithCollection, Location, Metadata, ParsedMetadataJson, UploadAsset,
};

/// Takeout truncates long titles to this many characters in sidecar names
pub const MAX_SIDECAR_TITLE_LENGTH: usize = 46;

pub type ParsedMetadataJsonMap = HashMap<String, ParsedMetadataJson>;

pub fn metadata_json_map_key(collection_id: CollectionId, title: &str) -> String {
    format!("{}-{}", collection_id, title)
}

/// Sidecars are recognized by their `.json` extension
pub fn is_metadata_json(unit: &FileWithCollection) -> bool {
    match &unit.asset {
        UploadAsset::File(file) => file.extension().as_deref() == Some("json"),
        UploadAsset::LivePhoto { .. } => false,
    }
}

/// Split a batch into (sidecar files, media files), preserving order
pub fn segregate_metadata_json_files(
    units: Vec<FileWithCollection>,
) -> (Vec<FileWithCollection>, Vec<FileWithCollection>) {
    units.into_iter().partition(is_metadata_json)
}

/// Parse sidecar JSON text. Returns the title and the parsed fields, or
/// `None` when the document has no title.
pub fn parse_metadata_json_str(
    content: &str,
) -> Result<Option<(String, ParsedMetadataJson)>, serde_json::Error> {
    let value: Value = serde_json::from_str(content)?;

    let title = match value.get("title").and_then(Value::as_str) {
        Some(title) if !title.is_empty() => title.to_string(),
        _ => return Ok(None),
    };

    let creation_time = value
        .get("photoTakenTime")
        .and_then(parse_timestamp)
        .or_else(|| value.get("creationTime").and_then(parse_timestamp));

    let modification_time = value.get("modificationTime").and_then(parse_timestamp);

    let location = value
        .get("geoDataExif")
        .and_then(parse_location)
        .or_else(|| value.get("geoData").and_then(parse_location));

    Ok(Some((
        title,
        ParsedMetadataJson {
            creation_time,
            modification_time,
            location,
        },
    )))
}

/// Read and parse one sidecar file
pub async fn parse_metadata_json(
    path: &Path,
) -> anyhow::Result<Option<(String, ParsedMetadataJson)>> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(parse_metadata_json_str(&content)?)
}

/// `{"timestamp": "1600000000"}` with seconds as a string or a number
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let timestamp = value.get("timestamp")?;
    let seconds = match timestamp {
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        Value::Number(n) => n.as_i64()?,
        _ => return None,
    };
    Utc.timestamp_opt(seconds, 0).single()
}

fn parse_location(value: &Value) -> Option<Location> {
    let location = Location {
        latitude: value.get("latitude")?.as_f64()?,
        longitude: value.get("longitude")?.as_f64()?,
    };
    location.is_valid().then_some(location)
}

/// Find the sidecar for a media file, trying the full name then the
/// truncated title Takeout writes for long names
pub fn lookup_metadata_json<'a>(
    map: &'a ParsedMetadataJsonMap,
    collection_id: CollectionId,
    file_name: &str,
) -> Option<&'a ParsedMetadataJson> {
    if let Some(parsed) = map.get(&metadata_json_map_key(collection_id, file_name)) {
        return Some(parsed);
    }

    if file_name.chars().count() > MAX_SIDECAR_TITLE_LENGTH {
        let truncated: String = file_name.chars().take(MAX_SIDECAR_TITLE_LENGTH).collect();
        return map.get(&metadata_json_map_key(collection_id, &truncated));
    }

    None
}

/// Sidecar fields take precedence over extracted ones
pub fn apply_metadata_json(metadata: &mut Metadata, parsed: &ParsedMetadataJson) {
    if let Some(creation_time) = parsed.creation_time {
        metadata.creation_time = creation_time;
    }
    if let Some(modification_time) = parsed.modification_time {
        metadata.modification_time = modification_time;
    }
    if let Some(location) = parsed.location {
        metadata.location = Some(location);
    }
}
