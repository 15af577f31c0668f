//! Test harness for isolated engine runs.
//!
//! Every harness owns a temp directory holding a SQLite file and a blob
//! root. Several engines and raw `Database` handles may be opened on the
//! same file to model concurrent processes.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use batchrank::{
    BatchEngine, BatchEventBroadcaster, BlobStore, Database, EngineContext, EngineSettings,
    FilesystemBlobStore, ResumeAnalyzer,
};

pub struct TestHarness {
    temp_dir: TempDir,
    pub db_path: PathBuf,
    pub blob_root: PathBuf,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("data").join("batchrank.db");
        let blob_root = temp_dir.path().join("blobs");
        std::fs::create_dir_all(&blob_root).expect("Failed to create blob dir");

        Self {
            temp_dir,
            db_path,
            blob_root,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// A fresh connection to the harness database.
    pub fn database(&self) -> Database {
        Database::open(&self.db_path).expect("Failed to open database")
    }

    pub fn blob_store(&self) -> FilesystemBlobStore {
        FilesystemBlobStore::new(&self.blob_root)
    }

    /// Settings with a short lease and no error backoff.
    pub fn settings() -> EngineSettings {
        EngineSettings {
            max_retries: 3,
            lease_timeout: Duration::from_secs(90),
            list_limit: 50,
            error_backoff: Duration::from_millis(10),
        }
    }

    pub fn engine(&self, analyzer: Arc<dyn ResumeAnalyzer>) -> BatchEngine {
        self.engine_with(analyzer, Arc::new(self.blob_store()), Self::settings())
    }

    pub fn engine_with(
        &self,
        analyzer: Arc<dyn ResumeAnalyzer>,
        blobs: Arc<dyn BlobStore>,
        settings: EngineSettings,
    ) -> BatchEngine {
        BatchEngine::new(EngineContext {
            db: self.database(),
            analyzer,
            blobs,
            events: BatchEventBroadcaster::default(),
            settings,
        })
    }

    /// Regular files under the blob root, temp files included.
    pub fn blob_files(&self) -> Vec<PathBuf> {
        fn walk(dir: &Path, out: &mut Vec<PathBuf>) {
            let Ok(entries) = std::fs::read_dir(dir) else {
                return;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    walk(&path, out);
                } else {
                    out.push(path);
                }
            }
        }

        let mut files = Vec::new();
        walk(&self.blob_root, &mut files);
        files
    }
}
