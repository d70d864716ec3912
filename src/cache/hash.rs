//! Content hashing and shard keys
//!
//! Identity is the SHA-256 of the file bytes, never the path. Files are
//! streamed in fixed-size chunks so large renders are never held in memory.

use crate::error::{MediagateError, MediagateResult};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Read size used while hashing
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Hex characters used to pick a shard directory
pub const SHARD_PREFIX_LEN: usize = 2;

/// Hash a file's contents using SHA-256, returning lowercase hex
pub fn hash_file_blocking(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hash a file on the blocking pool
pub async fn hash_file(path: &Path) -> MediagateResult<String> {
    let owned: PathBuf = path.to_path_buf();
    let hash = tokio::task::spawn_blocking(move || hash_file_blocking(&owned))
        .await
        .map_err(|e| MediagateError::Internal(format!("hashing task failed: {}", e)))?
        .map_err(|e| MediagateError::io(format!("hashing {}", path.display()), e))?;

    debug!("Hashed {} -> {}", path.display(), &hash[..12]);
    Ok(hash)
}

/// SHA-256 of in-memory bytes
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Whether `hash` is a lowercase hex SHA-256 digest
pub fn is_valid_hash(hash: &str) -> bool {
    hash.len() == 64 && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Shard directory name for a hash
pub fn shard_of(hash: &str) -> &str {
    &hash[..SHARD_PREFIX_LEN.min(hash.len())]
}

/// Key for the path index: the hash of the path string itself
pub fn path_key(path: &Path) -> String {
    hash_bytes(path.to_string_lossy().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn hash_deterministic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("render.png");
        fs::write(&path, b"test content").unwrap();

        let hash1 = hash_file_blocking(&path).unwrap();
        let hash2 = hash_file_blocking(&path).unwrap();

        assert_eq!(hash1, hash2);
        assert!(is_valid_hash(&hash1));
        assert_eq!(hash1, hash_bytes(b"test content"));
    }

    #[test]
    fn hash_ignores_path() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("renamed").join("b.png");
        fs::create_dir_all(b.parent().unwrap()).unwrap();
        fs::write(&a, b"same bytes").unwrap();
        fs::write(&b, b"same bytes").unwrap();

        assert_eq!(hash_file_blocking(&a).unwrap(), hash_file_blocking(&b).unwrap());
        assert_ne!(path_key(&a), path_key(&b));
    }

    #[test]
    fn hash_spans_chunks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("large.bin");
        let bytes: Vec<u8> = (0..(CHUNK_SIZE * 2 + 17)).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &bytes).unwrap();

        assert_eq!(hash_file_blocking(&path).unwrap(), hash_bytes(&bytes));
    }

    #[test]
    fn known_digest() {
        assert_eq!(
            hash_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn valid_hash_rules() {
        assert!(!is_valid_hash("abc123"));
        assert!(!is_valid_hash(&"G".repeat(64)));
        assert!(!is_valid_hash(&"AB".repeat(32)));
        assert!(is_valid_hash(&"0f".repeat(32)));
    }

    #[test]
    fn shard_prefix() {
        assert_eq!(shard_of("abc123"), "ab");
        assert_eq!(shard_of("a"), "a");
    }

    #[tokio::test]
    async fn async_hash_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = hash_file(&dir.path().join("missing.png")).await.unwrap_err();
        assert!(err.to_string().contains("hashing"));
    }
}
