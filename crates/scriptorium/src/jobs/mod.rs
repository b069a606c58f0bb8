//! Durable job records and the per-document lock built on them.
//!
//! A job row is the only state shared between invocations. Its status is
//! also the document lock: while a document has a `queued`, `running` or
//! `polling` job, no other job can be created for it.

pub mod ledger;
pub mod lock;

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use thiserror::Error;

use crate::db::job_repo::{self, JobRow};
use crate::db::{format_timestamp, DatabaseError};
use crate::model::{JobStatus, JobType};

pub use ledger::{JobLedger, SweepReport};
pub use lock::{try_acquire, DocumentLock, LockOutcome};

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job store error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Job '{0}' not found")]
    NotFound(String),

    #[error("Job '{job_id}' is already {status}")]
    Terminal { job_id: String, status: JobStatus },
}

/// Parameters of a job about to be created.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub owner_id: String,
    /// Set for jobs that hold the document lock.
    pub document_id: Option<String>,
    pub job_type: JobType,
    pub params: serde_json::Value,
}

impl NewJob {
    pub fn for_document(
        owner_id: impl Into<String>,
        document_id: impl Into<String>,
        job_type: JobType,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            document_id: Some(document_id.into()),
            job_type,
            params: serde_json::json!({}),
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    /// A queued row with a fresh heartbeat, so a job that never starts is
    /// still found by the stale sweep.
    pub(crate) fn into_row(self, now: DateTime<Utc>, heartbeat_extension: Duration) -> JobRow {
        let created_at = format_timestamp(now);
        JobRow {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: self.owner_id,
            document_id: self.document_id,
            job_type: self.job_type.as_str().to_string(),
            status: JobStatus::Queued.as_str().to_string(),
            done_steps: 0,
            total_steps: 0,
            percent: 0.0,
            current_step: None,
            heartbeat_at: Some(created_at.clone()),
            timeout_at: Some(format_timestamp(now + heartbeat_extension)),
            operation_handle: None,
            params: self.params,
            result: None,
            error_message: None,
            created_at: created_at.clone(),
            updated_at: created_at,
            completed_at: None,
        }
    }
}

/// Turns the row count of a guarded job update into a result.
///
/// Zero rows means the job is missing or already terminal; the follow-up
/// read tells which.
pub(crate) fn ensure_changed(conn: &Connection, job_id: &str, changed: usize) -> Result<(), JobError> {
    if changed > 0 {
        return Ok(());
    }
    match job_repo::find_by_id(conn, job_id)? {
        None => Err(JobError::NotFound(job_id.to_string())),
        Some(job) => Err(JobError::Terminal {
            job_id: job_id.to_string(),
            status: job.status()?,
        }),
    }
}

/// `done / total` as a percentage rounded to two decimals; 0 when `total` is 0.
pub fn percent(done: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (f64::from(done) / f64::from(total) * 10_000.0).round() / 100.0
}
