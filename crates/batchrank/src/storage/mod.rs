//! Blob storage for uploaded resume files.

pub mod filesystem;

use crate::error::StorageError;
use crate::sanitize::sanitize_filename;

pub use filesystem::FilesystemBlobStore;

/// Accepts raw bytes under a key and hands back a retrievable reference.
pub trait BlobStore: Send + Sync {
    /// Stores `content` under `key`, replacing anything already there.
    fn put(&self, key: &str, content: &[u8]) -> Result<String, StorageError>;

    /// Removes the blob behind `reference`. Missing blobs are not an error.
    fn delete(&self, reference: &str) -> Result<(), StorageError>;
}

/// Key under which a job's source file is stored.
pub fn resume_key(batch_id: &str, job_id: &str, filename: &str) -> String {
    format!(
        "resumes/{}/{}_{}",
        batch_id,
        job_id,
        sanitize_filename(filename)
    )
}
