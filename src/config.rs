use crate::error::{ErrorContext, SyncError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default worker count for a batch
pub const DEFAULT_MAX_CONCURRENT_UPLOADS: usize = 4;

/// 4 GiB
pub const DEFAULT_MAX_FILE_SIZE_SUPPORTED: u64 = 4 * 1024 * 1024 * 1024;

/// 20 MiB per live photo asset
pub const DEFAULT_LIVE_PHOTO_ASSET_SIZE_LIMIT: u64 = 20 * 1024 * 1024;

/// Which variant of an image the extractor reads metadata from when a source
/// offers both. Uploaded content is always the queued file; queue the edited
/// file itself to upload the edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageSourcePreference {
    #[default]
    Original,
    Edited,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadConfig {
    pub max_concurrent_uploads: usize,
    pub max_file_size_supported: u64,
    pub live_photo_asset_size_limit: u64,
    pub transcoding_enabled: bool,
    pub image_source_preference: ImageSourcePreference,
    /// Desktop only: keep a durable ledger of files not yet processed
    pub track_remaining_files: bool,
    pub network_retries: u32,
    pub retry_base_delay_ms: u64,
    pub server_url: Option<String>,
    pub auth_token: Option<String>,
    pub transcode_cache_dir: Option<PathBuf>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: DEFAULT_MAX_CONCURRENT_UPLOADS,
            max_file_size_supported: DEFAULT_MAX_FILE_SIZE_SUPPORTED,
            live_photo_asset_size_limit: DEFAULT_LIVE_PHOTO_ASSET_SIZE_LIMIT,
            transcoding_enabled: false,
            image_source_preference: ImageSourcePreference::Original,
            track_remaining_files: true,
            network_retries: 3,
            retry_base_delay_ms: 1000,
            server_url: None,
            auth_token: None,
            transcode_cache_dir: None,
        }
    }
}

impl UploadConfig {
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.max_concurrent_uploads == 0 {
            return Err(SyncError::Config(
                "maxConcurrentUploads must be at least 1".to_string(),
            ));
        }
        if self.max_file_size_supported == 0 {
            return Err(SyncError::Config(
                "maxFileSizeSupported must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn transcode_dir(&self) -> PathBuf {
        self.transcode_cache_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("photosync-transcode"))
    }
}

pub fn get_config_dir() -> Result<PathBuf, SyncError> {
    dirs::home_dir()
        .map(|home_dir| home_dir.join(".photosync"))
        .ok_or_else(|| SyncError::Config("Could not find home directory".to_string()))
}

pub fn get_config_file_path() -> Result<PathBuf, SyncError> {
    Ok(get_config_dir()?.join("config.json"))
}

pub fn get_logs_dir() -> Result<PathBuf, SyncError> {
    Ok(get_config_dir()?.join("logs"))
}

pub fn get_database_path() -> Result<PathBuf, SyncError> {
    Ok(get_config_dir()?.join("photosync.db"))
}

/// Create a directory readable only by the owner
pub fn ensure_private_dir(dir: &Path) -> Result<(), SyncError> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;

        // Set permissions to 700 (read/write/execute for owner only) on Unix systems
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let metadata = fs::metadata(dir)?;
            let mut permissions = metadata.permissions();
            permissions.set_mode(0o700);
            fs::set_permissions(dir, permissions)?;
        }
    }
    Ok(())
}

pub fn load_config() -> Result<UploadConfig, SyncError> {
    load_config_from(&get_config_file_path()?)
}

pub fn save_config(config: &UploadConfig) -> Result<(), SyncError> {
    save_config_to(&get_config_file_path()?, config)
}

pub fn load_config_from(config_file: &Path) -> Result<UploadConfig, SyncError> {
    if let Some(parent) = config_file.parent() {
        ensure_private_dir(parent)?;
    }

    if config_file.exists() {
        let content = fs::read_to_string(config_file).context("Failed to read config file")?;
        let config: UploadConfig =
            serde_json::from_str(&content).context("Failed to parse config file")?;
        config
            .validate()
            .context(&format!("Invalid config file {}", config_file.display()))?;
        Ok(config)
    } else {
        Ok(UploadConfig::default())
    }
}

pub fn save_config_to(config_file: &Path, config: &UploadConfig) -> Result<(), SyncError> {
    config.validate()?;
    if let Some(parent) = config_file.parent() {
        ensure_private_dir(parent)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    fs::write(config_file, content)?;

    // Set permissions to 600 (read/write for owner only) on Unix systems
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = fs::metadata(config_file)?;
        let mut permissions = metadata.permissions();
        permissions.set_mode(0o600);
        fs::set_permissions(config_file, permissions)?;
    }

    Ok(())
}
