//! Content hashing and identity minting (C1).
//!
//! `composite_hash(parts)` must equal `hash(concat(parts))` so that a
//! streaming hasher and a buffered one agree; the test below pins that
//! equivalence down.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

use crate::error::{CoreError, ErrorCategory};

const HASH_PREFIX: &str = "sha256:";

static HASH_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^sha256:[0-9a-f]{64}$").expect("static hash pattern is valid"));

#[derive(Debug, Error)]
pub enum HashError {
    #[error("path is not absolute: {0}")]
    NotAbsolute(String),
    #[error("path is not a regular file: {0}")]
    NotARegularFile(String),
    #[error("io error hashing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl CoreError for HashError {
    fn category(&self) -> ErrorCategory {
        match self {
            HashError::NotAbsolute(_) | HashError::NotARegularFile(_) => ErrorCategory::Validation,
            HashError::Io { .. } => ErrorCategory::Internal,
        }
    }
}

/// Mint a new opaque identifier. Every row in the data model is keyed by one.
pub fn new_id() -> Uuid {
    Uuid::new_v4()
}

pub fn hash(bytes: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes.as_ref());
    format!("{HASH_PREFIX}{:x}", hasher.finalize())
}

/// Streams a regular file's content through the hasher. Refuses relative
/// paths so the same file hashed from two working directories never looks
/// like two different roots.
pub fn hash_file(path: impl AsRef<Path>) -> Result<String, HashError> {
    let path = path.as_ref();
    if !path.is_absolute() {
        return Err(HashError::NotAbsolute(path.display().to_string()));
    }
    let metadata = std::fs::metadata(path).map_err(|source| HashError::Io {
        path: path.display().to_string(),
        source,
    })?;
    if !metadata.is_file() {
        return Err(HashError::NotARegularFile(path.display().to_string()));
    }

    let mut file = std::fs::File::open(path).map_err(|source| HashError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|source| HashError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{HASH_PREFIX}{:x}", hasher.finalize()))
}

/// Hashes the concatenation of `parts` in order, equivalent to hashing each
/// part's bytes joined together rather than hashing the parts' hashes.
pub fn composite_hash<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_ref());
    }
    format!("{HASH_PREFIX}{:x}", hasher.finalize())
}

pub fn is_valid_hash(candidate: &str) -> bool {
    HASH_PATTERN.is_match(candidate)
}

pub fn verify(content: impl AsRef<[u8]>, expected: &str) -> bool {
    hash(content) == expected
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HashVerification {
    pub valid: bool,
    pub format_valid: bool,
    pub expected: String,
    pub computed: String,
}

/// A forensic variant of [`verify`] that distinguishes "the hash is
/// malformed" from "the content was tampered with".
pub fn verify_detailed(content: impl AsRef<[u8]>, expected: &str) -> HashVerification {
    let computed = hash(content);
    let format_valid = is_valid_hash(expected);
    HashVerification {
        valid: format_valid && computed == expected,
        format_valid,
        expected: expected.to_string(),
        computed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        assert_eq!(
            hash("hello"),
            "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(
            hash(""),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn composite_hash_equals_hash_of_concatenation() {
        let parts = ["alpha", "beta", "gamma"];
        let concatenated: String = parts.concat();
        assert_eq!(composite_hash(parts), hash(concatenated));
    }

    #[test]
    fn hash_round_trips_through_verify() {
        let content = b"provenance chain payload";
        let digest = hash(content);
        assert!(verify(content, &digest));

        let mut tampered = content.to_vec();
        tampered[0] ^= 0xFF;
        assert!(!verify(tampered, &digest));
    }

    #[test]
    fn verify_detailed_distinguishes_format_from_tamper() {
        let content = b"abc";
        let digest = hash(content);

        let tampered = verify_detailed(b"xyz", &digest);
        assert!(!tampered.valid);
        assert!(tampered.format_valid);

        let malformed = verify_detailed(content, "not-a-hash");
        assert!(!malformed.valid);
        assert!(!malformed.format_valid);
    }

    #[test]
    fn is_valid_hash_rejects_wrong_length_and_case() {
        assert!(is_valid_hash(&hash("x")));
        assert!(!is_valid_hash("sha256:ABCD"));
        assert!(!is_valid_hash("md5:abcd"));
    }

    #[test]
    fn hash_file_requires_absolute_existing_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("doc.txt");
        std::fs::write(&file_path, b"hello").unwrap();

        let digest = hash_file(&file_path).unwrap();
        assert_eq!(digest, hash("hello"));

        let relative = Path::new("doc.txt");
        assert!(matches!(
            hash_file(relative),
            Err(HashError::NotAbsolute(_))
        ));

        assert!(matches!(
            hash_file(dir.path()),
            Err(HashError::NotARegularFile(_))
        ));
    }
}
