//! Batch progress broadcaster for real-time batch and job status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::{BatchStatus, ErrorCode};

/// What happened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", rename_all_fields = "camelCase", tag = "kind")]
pub enum BatchEventKind {
    BatchCreated {
        total: u32,
        skipped_duplicates: u32,
    },
    BatchStatusChanged {
        from: BatchStatus,
        to: BatchStatus,
    },
    JobClaimed {
        job_id: String,
        worker_id: String,
    },
    /// Claimed job handed back unprocessed because the batch stopped running.
    JobReleased {
        job_id: String,
    },
    JobCompleted {
        job_id: String,
        total_score: f64,
    },
    JobRequeued {
        job_id: String,
        code: ErrorCode,
        retry_count: u32,
    },
    JobFailed {
        job_id: String,
        code: ErrorCode,
    },
    JobsCancelled {
        count: u32,
    },
}

impl std::fmt::Display for BatchEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchEventKind::BatchCreated { total, .. } => write!(f, "Created with {} jobs", total),
            BatchEventKind::BatchStatusChanged { from, to } => write!(f, "{} -> {}", from, to),
            BatchEventKind::JobClaimed { job_id, .. } => write!(f, "Claimed {}", job_id),
            BatchEventKind::JobReleased { job_id } => write!(f, "Released {}", job_id),
            BatchEventKind::JobCompleted { job_id, .. } => write!(f, "Completed {}", job_id),
            BatchEventKind::JobRequeued { job_id, code, .. } => {
                write!(f, "Requeued {} ({})", job_id, code)
            }
            BatchEventKind::JobFailed { job_id, code } => write!(f, "Failed {} ({})", job_id, code),
            BatchEventKind::JobsCancelled { count } => write!(f, "Cancelled {} jobs", count),
        }
    }
}

/// Progress event for a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEvent {
    pub batch_id: String,
    #[serde(flatten)]
    pub kind: BatchEventKind,
    pub timestamp: DateTime<Utc>,
}

impl BatchEvent {
    pub fn new(batch_id: &str, kind: BatchEventKind) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            kind,
            timestamp: Utc::now(),
        }
    }
}

/// Broadcasts batch events for streaming.
#[derive(Clone)]
pub struct BatchEventBroadcaster {
    sender: Arc<broadcast::Sender<BatchEvent>>,
}

impl BatchEventBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends an event to all subscribers.
    pub fn send(&self, event: BatchEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn emit(&self, batch_id: &str, kind: BatchEventKind) {
        self.send(BatchEvent::new(batch_id, kind));
    }

    /// Creates a new subscriber.
    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.sender.subscribe()
    }
}

impl Default for BatchEventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
