use std::fmt;

use thiserror::Error;

use crate::db::DatabaseError;
use crate::error::{
    CleaningError, GenerationError, LlmError, OcrError, ProcessError, StorageError,
};
use crate::jobs::JobError;
use crate::model::JobStatus;

/// Why an operation was refused because of the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// The document already has a non-terminal job.
    AlreadyProcessing,
    AlreadyPublished,
    /// The job reached a terminal status before this call.
    JobFinished(JobStatus),
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::AlreadyProcessing => f.write_str("document is already being processed"),
            ConflictKind::AlreadyPublished => f.write_str("document is already published"),
            ConflictKind::JobFinished(status) => write!(f, "job is already {}", status),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Document,
    Page,
    Job,
    Version,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::Document => "Document",
            Entity::Page => "Page",
            Entity::Job => "Job",
            Entity::Version => "Version",
        })
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Conflict: {0}")]
    Conflict(ConflictKind),

    #[error("{0} '{1}' not found")]
    NotFound(Entity, String),

    #[error("Only the document owner may do this")]
    Forbidden,

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Upstream failure: {0}")]
    Upstream(String),

    #[error("Upstream is throttling: {0}")]
    Transient(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Only throttling is worth retrying; everything else fails the same way
    /// twice.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Transient(_))
    }

    /// Message safe to show a caller. Internal details are withheld.
    pub fn public_message(&self) -> String {
        match self {
            PipelineError::Internal(_) => "Internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<DatabaseError> for PipelineError {
    fn from(err: DatabaseError) -> Self {
        PipelineError::Internal(err.to_string())
    }
}

impl From<JobError> for PipelineError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::Database(e) => e.into(),
            JobError::NotFound(id) => PipelineError::NotFound(Entity::Job, id),
            JobError::Terminal { status, .. } => {
                PipelineError::Conflict(ConflictKind::JobFinished(status))
            }
        }
    }
}

impl From<StorageError> for PipelineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::TooLarge { .. } => PipelineError::Precondition(err.to_string()),
            other => PipelineError::Upstream(other.to_string()),
        }
    }
}

impl From<OcrError> for PipelineError {
    fn from(err: OcrError) -> Self {
        match err {
            OcrError::Transient { .. } => PipelineError::Transient(err.to_string()),
            other => PipelineError::Upstream(other.to_string()),
        }
    }
}

impl From<ProcessError> for PipelineError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::UnsupportedFormat(_) => PipelineError::Precondition(err.to_string()),
            other => PipelineError::Upstream(other.to_string()),
        }
    }
}

impl From<CleaningError> for PipelineError {
    fn from(err: CleaningError) -> Self {
        PipelineError::Upstream(err.to_string())
    }
}

impl From<GenerationError> for PipelineError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::InvalidParams(_) => PipelineError::Precondition(err.to_string()),
            GenerationError::Llm(LlmError::Transient { .. }) => {
                PipelineError::Transient(err.to_string())
            }
            GenerationError::Database(e) => e.into(),
            other => PipelineError::Upstream(other.to_string()),
        }
    }
}
