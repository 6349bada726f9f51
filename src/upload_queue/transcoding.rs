//! Video transcoding to a streamable variant.
//!
//! Wraps the `ffmpeg` binary. Transcoding is best effort: the caller uploads
//! the original file whenever this fails. Variants are temporary files owned
//! by the batch that produced them.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;

use super::types::{FileType, FileVariant, LocalFile, Metadata};
use crate::config::UploadConfig;
use crate::logging::file_name_size;

#[derive(Debug, Error)]
pub enum FfmpegError {
    #[error("FFmpeg not found in system PATH")]
    NotInstalled,

    #[error("FFmpeg execution failed: {0}")]
    ExecutionFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Produces an alternative representation of a file to upload instead of it
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(
        &self,
        file: &LocalFile,
        metadata: &Metadata,
    ) -> anyhow::Result<Option<FileVariant>>;
}

pub struct FfmpegCommand {
    args: Vec<String>,
}

impl FfmpegCommand {
    pub fn new() -> Self {
        Self { args: Vec::new() }
    }

    pub fn input(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push("-i".to_string());
        self.args.push(path.as_ref().display().to_string());
        self
    }

    pub fn output(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push(path.as_ref().display().to_string());
        self
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    pub fn as_args(&self) -> &[String] {
        &self.args
    }

    pub async fn execute(self) -> Result<(), FfmpegError> {
        let output = Command::new("ffmpeg")
            .args(&self.args)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => FfmpegError::NotInstalled,
                _ => FfmpegError::Io(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FfmpegError::ExecutionFailed(stderr.to_string()));
        }

        Ok(())
    }
}

impl Default for FfmpegCommand {
    fn default() -> Self {
        Self::new()
    }
}

/// H.264 MP4 with the index moved to the front of the file
pub struct FfmpegTranscoder {
    output_dir: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }

    pub fn from_config(config: &UploadConfig) -> Self {
        Self::new(config.transcode_dir())
    }

    fn streamable_command(input: &Path, output: &Path) -> FfmpegCommand {
        FfmpegCommand::new()
            .input(input)
            .args(&[
                "-preset",
                "ultrafast",
                "-c:v",
                "libx264",
                "-movflags",
                "+faststart",
                "-y",
            ])
            .output(output)
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        file: &LocalFile,
        metadata: &Metadata,
    ) -> anyhow::Result<Option<FileVariant>> {
        if metadata.file_type != FileType::Video {
            return Ok(None);
        }

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let output = self
            .output_dir
            .join(format!("{}-{}.mp4", file.base_name(), uuid::Uuid::new_v4()));

        tracing::info!(file = %file_name_size(&file.name, file.size), "Transcoding video");
        Self::streamable_command(&file.path, &output).execute().await?;

        Ok(Some(FileVariant {
            transcoded_path: output,
        }))
    }
}

/// Transcode when policy asks for it. A failure is logged and the original
/// file is used.
pub async fn transcode_if_enabled(
    transcoder: &dyn Transcoder,
    config: &UploadConfig,
    file: &LocalFile,
    metadata: &Metadata,
) -> Option<FileVariant> {
    if !config.transcoding_enabled || metadata.file_type != FileType::Video {
        return None;
    }

    match transcoder.transcode(file, metadata).await {
        // Handing back the input is not a variant, and must never be deleted as one
        Ok(Some(variant)) if variant.transcoded_path == file.path => None,
        Ok(variant) => variant,
        Err(e) => {
            tracing::warn!(
                file = %file_name_size(&file.name, file.size),
                error = %e,
                "Transcoding failed, uploading original"
            );
            None
        }
    }
}

/// Delete a transcoded file once nothing will read it again
pub async fn remove_file_variant(variant: &FileVariant) {
    match tokio::fs::remove_file(&variant.transcoded_path).await {
        Ok(()) => tracing::debug!(path = ?variant.transcoded_path, "Removed transcoded file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            path = ?variant.transcoded_path,
            error = %e,
            "Failed to remove transcoded file"
        ),
    }
}
