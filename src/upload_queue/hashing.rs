//! SHA256 hashing utilities for deduplication.
//!
//! File content hashes are the identity signal for duplicate detection.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Calculate SHA256 hash of a file, streaming it in chunks
pub fn calculate_file_hash_sha256(file_path: &Path) -> std::io::Result<String> {
    let file = File::open(file_path)?;
    let mut reader = BufReader::new(file);

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hash of a live photo is the pair of its component hashes
pub fn live_photo_hash(image_hash: &str, video_hash: &str) -> String {
    format!("{}:{}", image_hash, video_hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_file_hash_matches_digest() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"test file content").unwrap();
        temp_file.flush().unwrap();

        let hash = calculate_file_hash_sha256(temp_file.path()).unwrap();

        // SHA256 hash should be 64 characters (hex)
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hex::encode(Sha256::digest(b"test file content")));
    }

    #[test]
    fn test_file_hash_streams_past_buffer_size() {
        let content = vec![7u8; 200 * 1024];
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(&content).unwrap();
        temp_file.flush().unwrap();

        let hash = calculate_file_hash_sha256(temp_file.path()).unwrap();
        assert_eq!(hash, hex::encode(Sha256::digest(&content)));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(calculate_file_hash_sha256(Path::new("/nonexistent/file.jpg")).is_err());
    }

    #[test]
    fn test_live_photo_hash() {
        assert_eq!(live_photo_hash("aa", "bb"), "aa:bb");
    }
}
