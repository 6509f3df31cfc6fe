//! Content hashing for drift detection.
//!
//! A service's definition is fingerprinted by hashing its directory:
//! relative paths and file contents in sorted order, so the hash is stable
//! across hosts and checkout locations and changes whenever any file is
//! added, removed, renamed or edited.

use std::fs;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{SyncerError, SyncerResult};

/// Hex-encoded SHA-256 of a byte string.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hashes the contents of a directory, recursing into subdirectories.
pub fn hash_dir(dir: &Path) -> SyncerResult<String> {
    let mut hasher = Sha256::new();
    hash_dir_into(&mut hasher, dir, dir)?;
    Ok(hex::encode(hasher.finalize()))
}

fn hash_dir_into(hasher: &mut Sha256, root: &Path, dir: &Path) -> SyncerResult<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)
        .map_err(|e| SyncerError::io(dir.display().to_string(), e))?
        .collect::<Result<_, _>>()
        .map_err(|e| SyncerError::io(dir.display().to_string(), e))?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let relative = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .to_string_lossy()
            .into_owned();
        hasher.update(relative.as_bytes());

        if path.is_dir() {
            hash_dir_into(hasher, root, &path)?;
        } else {
            let content =
                fs::read(&path).map_err(|e| SyncerError::io(path.display().to_string(), e))?;
            hasher.update(&content);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex() {
        // Well-known SHA-256 of the empty string.
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(sha256_hex(b"abc").len(), 64);
    }

    #[test]
    fn test_hash_dir_stable() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("manifest.yml"), "Container: {}\n").unwrap();
        fs::create_dir(dir.path().join("data")).unwrap();
        fs::write(dir.path().join("data/seed.sql"), "select 1;\n").unwrap();

        let first = hash_dir(dir.path()).unwrap();
        let second = hash_dir(dir.path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn test_hash_dir_changes_with_content() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("manifest.yml"), "Container: {}\n").unwrap();
        let before = hash_dir(dir.path()).unwrap();

        fs::write(dir.path().join("manifest.yml"), "Container:\n  Image: [img]\n").unwrap();
        let after = hash_dir(dir.path()).unwrap();

        assert_ne!(before, after);
    }

    #[test]
    fn test_hash_dir_changes_with_rename() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "same content").unwrap();
        let before = hash_dir(dir.path()).unwrap();

        fs::rename(dir.path().join("a.txt"), dir.path().join("b.txt")).unwrap();
        let after = hash_dir(dir.path()).unwrap();

        assert_ne!(before, after);
    }

    #[test]
    fn test_hash_dir_location_independent() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        for dir in [&first, &second] {
            fs::write(dir.path().join("manifest.yml"), "Container: {}\n").unwrap();
        }

        assert_eq!(hash_dir(first.path()).unwrap(), hash_dir(second.path()).unwrap());
    }

    #[test]
    fn test_hash_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(hash_dir(&missing), Err(SyncerError::Io { .. })));
    }
}
