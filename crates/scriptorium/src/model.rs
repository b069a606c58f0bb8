//! Status and kind enums shared across the store, the ledger and the pipeline.
//!
//! Each is stored as lower-case TEXT; `as_str` and `FromStr` are the only
//! conversions the repositories use.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::db::DatabaseError;

/// Lifecycle of a document.
///
/// `uploading → processing → draft → published`; `failed` is reachable from
/// `processing` (including while its job is polling).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Uploading,
    Processing,
    Draft,
    Published,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploading => "uploading",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Draft => "draft",
            DocumentStatus::Published => "published",
            DocumentStatus::Failed => "failed",
        }
    }
}

impl FromStr for DocumentStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploading" => Ok(DocumentStatus::Uploading),
            "processing" => Ok(DocumentStatus::Processing),
            "draft" => Ok(DocumentStatus::Draft),
            "published" => Ok(DocumentStatus::Published),
            "failed" => Ok(DocumentStatus::Failed),
            other => Err(DatabaseError::UnknownValue {
                kind: "document status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a page's raw text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageSource {
    Native,
    Ocr,
}

impl PageSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageSource::Native => "native",
            PageSource::Ocr => "ocr",
        }
    }
}

impl FromStr for PageSource {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native" => Ok(PageSource::Native),
            "ocr" => Ok(PageSource::Ocr),
            other => Err(DatabaseError::UnknownValue {
                kind: "page source",
                value: other.to_string(),
            }),
        }
    }
}

/// Status of a job. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Polling,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Polling => "polling",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl FromStr for JobStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "polling" => Ok(JobStatus::Polling),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DatabaseError::UnknownValue {
                kind: "job status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of work a job represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    DocumentExtract,
    GenerateQuestions,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::DocumentExtract => "document_extract",
            JobType::GenerateQuestions => "generate_questions",
        }
    }
}

impl FromStr for JobType {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "document_extract" => Ok(JobType::DocumentExtract),
            "generate_questions" => Ok(JobType::GenerateQuestions),
            other => Err(DatabaseError::UnknownValue {
                kind: "job type",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type of an audit event appended to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Info,
    Warning,
    Error,
    Progress,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Info => "info",
            EventKind::Warning => "warning",
            EventKind::Error => "error",
            EventKind::Progress => "progress",
        }
    }
}

impl FromStr for EventKind {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(EventKind::Info),
            "warning" => Ok(EventKind::Warning),
            "error" => Ok(EventKind::Error),
            "progress" => Ok(EventKind::Progress),
            other => Err(DatabaseError::UnknownValue {
                kind: "event type",
                value: other.to_string(),
            }),
        }
    }
}
