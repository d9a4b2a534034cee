use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl Default for JobStatus {
    fn default() -> Self {
        JobStatus::Queued
    }
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum GenerationMode {
    /// Rescan all history and replace every stored event.
    Full,
    /// Rescan from the high-water mark and replace only the tail.
    Incremental,
}

impl GenerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationMode::Full => "full",
            GenerationMode::Incremental => "incremental",
        }
    }
}

/// Fixed steps of a generation run, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GenerationStep {
    AcquireLock,
    StreamAndSegment,
    ClassifyAndMerge,
    Persist,
    ReleaseLock,
}

impl GenerationStep {
    pub const TOTAL: u32 = 5;

    pub fn index(&self) -> u32 {
        match self {
            GenerationStep::AcquireLock => 1,
            GenerationStep::StreamAndSegment => 2,
            GenerationStep::ClassifyAndMerge => 3,
            GenerationStep::Persist => 4,
            GenerationStep::ReleaseLock => 5,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GenerationStep::AcquireLock => "ACQUIRE_LOCK",
            GenerationStep::StreamAndSegment => "STREAM_AND_SEGMENT",
            GenerationStep::ClassifyAndMerge => "CLASSIFY_AND_MERGE",
            GenerationStep::Persist => "PERSIST",
            GenerationStep::ReleaseLock => "RELEASE_LOCK",
        }
    }

    pub fn percentage(&self) -> u8 {
        (self.index() * 100 / Self::TOTAL) as u8
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationJob {
    pub id: Uuid,
    pub user_id: String,
    pub mode: GenerationMode,
    pub status: JobStatus,
    pub step_index: u32,
    pub step_name: Option<String>,
    pub total_steps: u32,
    pub percentage: u8,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub details: BTreeMap<String, serde_json::Value>,
}

impl GenerationJob {
    pub fn new(user_id: &str, mode: GenerationMode, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            mode,
            status: JobStatus::Queued,
            step_index: 0,
            step_name: None,
            total_steps: GenerationStep::TOTAL,
            percentage: 0,
            created_at: now,
            started_at: None,
            finished_at: None,
            error: None,
            details: BTreeMap::new(),
        }
    }
}
