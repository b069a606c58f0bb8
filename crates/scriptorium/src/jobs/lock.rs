//! At most one active job per document.
//!
//! The lock is a job row: inserting it either succeeds or trips the partial
//! unique index on `jobs(document_id)`. There is no unlock; the lock clears
//! when the job reaches a terminal status.

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;

use super::{JobError, JobLedger, NewJob};
use crate::db::job_repo::{self, JobRow};
use crate::db::DatabaseError;

/// Result of trying to take a document's lock.
#[derive(Debug, Clone)]
pub enum LockOutcome {
    /// The lock is held by the returned (queued) job.
    Acquired(JobRow),
    /// Another non-terminal job already holds it.
    AlreadyLocked,
}

impl LockOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockOutcome::Acquired(_))
    }
}

/// Inserts `job` as the document's lock holder on `conn`.
///
/// Usable inside a caller's transaction: a rejected insert rolls back only
/// its own statement.
pub fn try_acquire(
    conn: &Connection,
    job: NewJob,
    now: DateTime<Utc>,
    heartbeat_extension: Duration,
) -> Result<LockOutcome, DatabaseError> {
    let row = job.into_row(now, heartbeat_extension);
    match job_repo::insert(conn, &row) {
        Ok(()) => Ok(LockOutcome::Acquired(row)),
        Err(e) if e.is_unique_violation() => Ok(LockOutcome::AlreadyLocked),
        Err(e) => Err(e),
    }
}

/// Lock operations for callers that do not need to share a transaction.
#[derive(Clone)]
pub struct DocumentLock {
    ledger: JobLedger,
}

impl DocumentLock {
    pub fn new(ledger: JobLedger) -> Self {
        Self { ledger }
    }

    pub fn acquire(&self, job: NewJob) -> Result<LockOutcome, JobError> {
        let extension = self.ledger.heartbeat_extension();
        let outcome = self
            .ledger
            .database()
            .with_conn(|conn| try_acquire(conn, job, Utc::now(), extension))?;
        if let LockOutcome::Acquired(row) = &outcome {
            tracing::debug!(job_id = %row.id, document_id = ?row.document_id, "document lock acquired");
        }
        Ok(outcome)
    }

    /// The job currently holding a document's lock.
    pub fn holder(&self, document_id: &str) -> Result<Option<JobRow>, JobError> {
        Ok(self
            .ledger
            .database()
            .with_conn(|conn| job_repo::find_active_for_document(conn, document_id))?)
    }
}
