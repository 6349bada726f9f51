// Library exports for the desktop app and integration tests

pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod logging;
pub mod upload_queue;

pub use error::SyncError;
pub use upload_queue::{UploadManager, UploadServices};
