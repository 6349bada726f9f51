use thiserror::Error;

/// PhotoSync upload pipeline errors
#[derive(Debug, Error)]
pub enum SyncError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Configuration file errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Upload errors that escape per-file handling
    #[error("Upload error: {0}")]
    Upload(String),

    /// Batch setup errors (crypto workers, local index)
    #[error("Setup error: {0}")]
    Setup(String),

    /// Validation errors (path, size, etc.)
    #[error("Validation error: {0}")]
    Validation(String),

    /// A batch is already being processed
    #[error("An upload batch is already in progress")]
    UploadInProgress,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Mutex poison error
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl SyncError {
    /// Setup errors abort the batch; everything else is a defect or an outer-surface error.
    pub fn is_setup(&self) -> bool {
        matches!(self, SyncError::Setup(_) | SyncError::Database(_))
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        SyncError::Other(format!("{:#}", err))
    }
}

impl<T> From<std::sync::PoisonError<T>> for SyncError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        SyncError::LockPoisoned(err.to_string())
    }
}

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn context(self, msg: &str) -> Result<T, SyncError>;
}

impl<T, E: Into<SyncError>> ErrorContext<T> for Result<T, E> {
    fn context(self, msg: &str) -> Result<T, SyncError> {
        self.map_err(|e| {
            let err: SyncError = e.into();
            match err {
                SyncError::Other(s) => SyncError::Other(format!("{}: {}", msg, s)),
                SyncError::Config(s) => SyncError::Config(format!("{}: {}", msg, s)),
                SyncError::Upload(s) => SyncError::Upload(format!("{}: {}", msg, s)),
                SyncError::Setup(s) => SyncError::Setup(format!("{}: {}", msg, s)),
                SyncError::Validation(s) => SyncError::Validation(format!("{}: {}", msg, s)),
                SyncError::LockPoisoned(s) => SyncError::LockPoisoned(format!("{}: {}", msg, s)),
                other => other,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncError::Validation("Invalid path".to_string());
        assert_eq!(err.to_string(), "Validation error: Invalid path");
    }

    #[test]
    fn test_error_context_prefixes_message() {
        let result: Result<(), SyncError> = Err(SyncError::Setup("no worker".to_string()));
        let err = result.context("Failed to start batch").unwrap_err();
        assert_eq!(err.to_string(), "Setup error: Failed to start batch: no worker");
    }

    #[test]
    fn test_error_context_keeps_source_errors() {
        let result: Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"));
        let result = result.context("Failed to read config file");

        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("I/O error"));
    }

    #[test]
    fn test_setup_classification() {
        assert!(SyncError::Setup("x".to_string()).is_setup());
        assert!(!SyncError::UploadInProgress.is_setup());
    }
}
