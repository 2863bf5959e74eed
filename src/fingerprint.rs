//! Content fingerprints for distribution asset names.
//!
//! A fingerprint is the first [`FINGERPRINT_LEN`] hex characters of the
//! SHA-256 of the emitted bytes. Same bytes, same name.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub const FINGERPRINT_LEN: usize = 8;

/// Full SHA-256 of `bytes` as lowercase hex.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hash = hash_bytes(bytes);
    hash.truncate(FINGERPRINT_LEN);
    hash
}

/// `styles/main.css` + `1a2b3c4d` → `styles/main-1a2b3c4d.css`.
pub fn fingerprinted_name(path: &Path, fingerprint: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}-{fingerprint}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{fingerprint}"),
    };
    path.with_file_name(name)
}
