pub mod queue;
pub mod runner;
pub mod store;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::storage::{output_stem, DownloadRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// `pending → processing → completed | failed`, nothing else.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(anyhow::anyhow!("unknown job status: {}", other)),
        }
    }
}

/// Everything recorded about one job. Replaced whole on every transition.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: Uuid,
    pub source: PathBuf,
    pub output_stem: String,
    pub status: JobStatus,
    pub download: Option<DownloadRef>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(source: PathBuf) -> Self {
        JobRecord {
            id: Uuid::new_v4(),
            output_stem: output_stem(&source),
            source,
            status: JobStatus::Pending,
            download: None,
            error: None,
            updated_at: Utc::now(),
        }
    }

    fn with_status(&self, status: JobStatus) -> Self {
        JobRecord {
            status,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn processing(&self) -> Self {
        self.with_status(JobStatus::Processing)
    }

    pub fn completed(&self, download: DownloadRef) -> Self {
        JobRecord {
            download: Some(download),
            ..self.with_status(JobStatus::Completed)
        }
    }

    pub fn failed(&self, error: impl Into<String>) -> Self {
        JobRecord {
            error: Some(error.into()),
            ..self.with_status(JobStatus::Failed)
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            status: self.status,
            download_ref: self.download.clone(),
            error: self.error.clone(),
        }
    }
}

/// What a status query sees.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_ref: Option<DownloadRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusLookup {
    Found(JobSnapshot),
    NotFound,
    InvalidId,
}

impl StatusLookup {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            StatusLookup::Found(snapshot) => {
                serde_json::to_value(snapshot).unwrap_or(serde_json::Value::Null)
            }
            StatusLookup::NotFound => serde_json::json!({ "status": "Task not found" }),
            StatusLookup::InvalidId => serde_json::json!({ "status": "invalid task id" }),
        }
    }
}

/// Only the canonical lowercase hyphenated form is accepted.
pub fn parse_job_id(raw: &str) -> Option<Uuid> {
    let id = Uuid::parse_str(raw).ok()?;
    (id.hyphenated().to_string() == raw).then_some(id)
}
