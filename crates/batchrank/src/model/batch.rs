use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Running,
    Paused,
    Cancelled,
    Complete,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Running => "running",
            BatchStatus::Paused => "paused",
            BatchStatus::Cancelled => "cancelled",
            BatchStatus::Complete => "complete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(BatchStatus::Running),
            "paused" => Some(BatchStatus::Paused),
            "cancelled" => Some(BatchStatus::Cancelled),
            "complete" => Some(BatchStatus::Complete),
            _ => None,
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator control actions on a batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchAction {
    Pause,
    Resume,
    Cancel,
}

impl BatchAction {
    /// The status this action leads to from `current`, or `None` when the
    /// transition is not legal (the action is then a no-op).
    pub fn transition(&self, current: BatchStatus) -> Option<BatchStatus> {
        match (self, current) {
            (BatchAction::Pause, BatchStatus::Running) => Some(BatchStatus::Paused),
            (BatchAction::Resume, BatchStatus::Paused) => Some(BatchStatus::Running),
            (BatchAction::Cancel, BatchStatus::Running | BatchStatus::Paused) => {
                Some(BatchStatus::Cancelled)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchAction::Pause => "pause",
            BatchAction::Resume => "resume",
            BatchAction::Cancel => "cancel",
        }
    }
}

impl fmt::Display for BatchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pause" => Ok(BatchAction::Pause),
            "resume" => Ok(BatchAction::Resume),
            "cancel" => Ok(BatchAction::Cancel),
            other => Err(format!("unknown batch action '{}'", other)),
        }
    }
}

/// One job-description analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub id: String,
    pub user_id: String,
    pub status: BatchStatus,
    pub job_description: String,
    /// Number of unique files, i.e. jobs created.
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    pub cancelled_count: u32,
    pub skipped_duplicates: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
