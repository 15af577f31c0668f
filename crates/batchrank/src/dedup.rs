//! Content fingerprinting and duplicate filtering for batch uploads.

use std::collections::HashSet;

use sha2::{Digest, Sha256};

/// One file handed to batch creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub filename: String,
    pub content: Vec<u8>,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
        }
    }
}

/// A file that survived deduplication, with its fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueFile {
    pub file: UploadedFile,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupOutcome {
    /// First occurrence of each distinct content, in submission order.
    pub unique: Vec<UniqueFile>,
    /// Number of extra copies dropped.
    pub skipped: u32,
}

/// SHA-256 of the raw bytes, lowercase hex.
pub fn fingerprint(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Keeps the first file for each distinct content. Names are ignored; only an
/// exact byte match counts as a duplicate.
pub fn dedup_files(files: Vec<UploadedFile>) -> DedupOutcome {
    let mut seen = HashSet::new();
    let mut outcome = DedupOutcome::default();

    for file in files {
        let fingerprint = fingerprint(&file.content);
        if seen.insert(fingerprint.clone()) {
            outcome.unique.push(UniqueFile { file, fingerprint });
        } else {
            log::debug!("Skipping duplicate upload '{}'", file.filename);
            outcome.skipped += 1;
        }
    }

    outcome
}
