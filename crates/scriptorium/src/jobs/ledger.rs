//! Job ledger: status transitions, progress, heartbeats and the event log.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::{ensure_changed, percent, JobError, NewJob};
use crate::db::job_repo::{self, JobEventRow, JobRow};
use crate::db::{document_repo, format_timestamp, Database};
use crate::model::EventKind;

/// Outcome of [`JobLedger::sweep_stale`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub failed_jobs: Vec<String>,
    pub failed_documents: Vec<String>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.failed_jobs.is_empty()
    }
}

#[derive(Clone)]
pub struct JobLedger {
    db: Database,
    heartbeat_extension: Duration,
}

impl JobLedger {
    pub fn new(db: Database, heartbeat_extension: Duration) -> Self {
        Self {
            db,
            heartbeat_extension,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// How far each heartbeat pushes `timeout_at` out.
    pub fn heartbeat_extension(&self) -> Duration {
        self.heartbeat_extension
    }

    /// `timeout_at` for a heartbeat taken at `now`.
    pub fn timeout_from(&self, now: DateTime<Utc>) -> String {
        format_timestamp(now + self.heartbeat_extension)
    }

    /// Creates a queued job. Jobs tied to a document go through
    /// [`super::DocumentLock`] instead.
    pub fn enqueue(&self, job: NewJob) -> Result<JobRow, JobError> {
        let row = job.into_row(Utc::now(), self.heartbeat_extension);
        self.db.with_conn(|conn| job_repo::insert(conn, &row))?;
        tracing::info!(job_id = %row.id, job_type = %row.job_type, "job enqueued");
        Ok(row)
    }

    pub fn find(&self, job_id: &str) -> Result<JobRow, JobError> {
        self.db
            .with_conn(|conn| job_repo::find_by_id(conn, job_id))?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    pub fn mark_running(&self, job_id: &str) -> Result<(), JobError> {
        let now = format_timestamp(Utc::now());
        self.guarded(job_id, |conn| job_repo::mark_running(conn, job_id, &now))
    }

    /// Parks the job on a remote operation and restarts its timeout.
    pub fn mark_polling(
        &self,
        job_id: &str,
        operation_handle: &str,
        params: &serde_json::Value,
    ) -> Result<(), JobError> {
        let now = Utc::now();
        let (stamp, timeout_at) = (format_timestamp(now), self.timeout_from(now));
        self.guarded(job_id, |conn| {
            job_repo::mark_polling(conn, job_id, operation_handle, params, &stamp, &timeout_at)
        })
    }

    pub fn mark_completed(
        &self,
        job_id: &str,
        result: Option<&serde_json::Value>,
    ) -> Result<(), JobError> {
        let now = format_timestamp(Utc::now());
        self.guarded(job_id, |conn| job_repo::mark_completed(conn, job_id, result, &now))?;
        tracing::info!(job_id, "job completed");
        Ok(())
    }

    pub fn mark_failed(&self, job_id: &str, message: &str) -> Result<(), JobError> {
        let now = format_timestamp(Utc::now());
        self.guarded(job_id, |conn| job_repo::mark_failed(conn, job_id, message, &now))?;
        tracing::warn!(job_id, "job failed");
        Ok(())
    }

    /// Signals the job is alive: `heartbeat_at = now`, `timeout_at` pushed out.
    pub fn heartbeat(&self, job_id: &str) -> Result<(), JobError> {
        let now = Utc::now();
        let (stamp, timeout_at) = (format_timestamp(now), self.timeout_from(now));
        self.guarded(job_id, |conn| {
            job_repo::touch_heartbeat(conn, job_id, &stamp, &timeout_at)
        })
    }

    /// Records step counters; also counts as a heartbeat.
    pub fn update_progress(
        &self,
        job_id: &str,
        done: u32,
        total: u32,
        step: &str,
    ) -> Result<(), JobError> {
        let now = format_timestamp(Utc::now());
        let pct = percent(done, total);
        self.guarded(job_id, |conn| {
            job_repo::update_progress(conn, job_id, done, total, pct, step, &now)
        })?;
        tracing::debug!(job_id, done, total, step, "progress");
        Ok(())
    }

    /// Appends an audit event.
    ///
    /// With `error`, its message is appended to `message` and its source
    /// chain is kept as the stack trace.
    pub fn log_event(
        &self,
        job_id: &str,
        kind: EventKind,
        step: Option<&str>,
        message: &str,
        error: Option<&(dyn std::error::Error + 'static)>,
    ) -> Result<(), JobError> {
        let (message, trace) = match error {
            Some(err) => (format!("{}: {}", message, err), Some(error_chain(err))),
            None => (message.to_string(), None),
        };
        let now = format_timestamp(Utc::now());
        self.db.with_conn(|conn| {
            job_repo::insert_event(conn, job_id, kind, step, &message, trace.as_deref(), &now)
        })?;
        Ok(())
    }

    pub fn events(&self, job_id: &str) -> Result<Vec<JobEventRow>, JobError> {
        Ok(self.db.with_conn(|conn| job_repo::list_events(conn, job_id))?)
    }

    /// Fails every non-terminal job whose `timeout_at` is before `now`,
    /// together with its document when that is still `processing`.
    ///
    /// Nothing calls this on a schedule; it is an explicit operation.
    pub fn sweep_stale(&self, now: DateTime<Utc>) -> Result<SweepReport, JobError> {
        let stamp = format_timestamp(now);
        let stale = self.db.with_conn(|conn| job_repo::list_stale(conn, &stamp))?;
        let mut report = SweepReport::default();

        for job in stale {
            let message = format!(
                "Timed out: no heartbeat since {}",
                job.heartbeat_at.as_deref().unwrap_or(&job.created_at)
            );
            let document_failed = self.db.with_tx(|tx| {
                if job_repo::mark_failed(tx, &job.id, &message, &stamp)? == 0 {
                    // Finished between the scan and this update.
                    return Ok(None);
                }
                job_repo::insert_event(
                    tx,
                    &job.id,
                    EventKind::Error,
                    Some("sweep"),
                    &message,
                    None,
                    &stamp,
                )?;
                let failed_doc = match &job.document_id {
                    Some(doc_id) => document_repo::mark_failed(tx, doc_id, &stamp)? > 0,
                    None => false,
                };
                Ok::<_, JobError>(Some(failed_doc))
            })?;

            let Some(document_failed) = document_failed else {
                continue;
            };
            tracing::warn!(job_id = %job.id, timeout_at = ?job.timeout_at, "swept stale job");
            report.failed_jobs.push(job.id.clone());
            if document_failed {
                if let Some(doc_id) = job.document_id {
                    report.failed_documents.push(doc_id);
                }
            }
        }

        if !report.is_empty() {
            tracing::info!(
                jobs = report.failed_jobs.len(),
                documents = report.failed_documents.len(),
                "stale job sweep finished"
            );
        }
        Ok(report)
    }

    fn guarded<F>(&self, job_id: &str, update: F) -> Result<(), JobError>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<usize, crate::db::DatabaseError>,
    {
        self.db.with_conn(|conn| {
            let changed = update(conn)?;
            Ok(ensure_changed(conn, job_id, changed))
        })?
    }
}

/// The error followed by each of its sources, one per line.
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut lines = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        lines.push(format!("caused by: {}", cause));
        source = cause.source();
    }
    lines.join("\n")
}
