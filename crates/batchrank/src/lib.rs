pub mod broadcast;
pub mod config;
pub mod db;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod inference;
pub mod model;
pub mod sanitize;
pub mod storage;

pub use broadcast::{BatchEvent, BatchEventBroadcaster, BatchEventKind};
pub use config::{load_config, Config};
pub use db::{Database, DatabaseError};
pub use dedup::UploadedFile;
pub use engine::{
    BatchDetails, BatchEngine, ControlOutcome, EngineContext, EngineSettings, SweepReport,
    WatchdogScheduler,
};
pub use error::{BatchrankError, ConfigError, Result, StorageError, WorkerError};
pub use inference::{InferenceError, ResumeAnalysis, ResumeAnalyzer};
pub use model::{Batch, BatchAction, BatchStatus, ErrorCode, Job, JobError, JobStatus};
pub use storage::{BlobStore, FilesystemBlobStore};
