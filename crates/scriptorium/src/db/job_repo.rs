//! Job repository: rows of the `jobs` and `job_events` tables.
//!
//! Every status write is guarded with `status NOT IN ('completed', 'failed')`;
//! a return value of 0 means the job was already terminal (or missing).

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::DatabaseError;
use crate::model::{EventKind, JobStatus, JobType};

/// A raw job row from the database.
#[derive(Debug, Clone, Serialize)]
pub struct JobRow {
    pub id: String,
    pub owner_id: String,
    pub document_id: Option<String>,
    pub job_type: String,
    pub status: String,
    pub done_steps: u32,
    pub total_steps: u32,
    pub percent: f64,
    pub current_step: Option<String>,
    pub heartbeat_at: Option<String>,
    pub timeout_at: Option<String>,
    pub operation_handle: Option<String>,
    pub params: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let params: String = row.get("params")?;
        let result: Option<String> = row.get("result")?;
        Ok(Self {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            document_id: row.get("document_id")?,
            job_type: row.get("job_type")?,
            status: row.get("status")?,
            done_steps: row.get("done_steps")?,
            total_steps: row.get("total_steps")?,
            percent: row.get("percent")?,
            current_step: row.get("current_step")?,
            heartbeat_at: row.get("heartbeat_at")?,
            timeout_at: row.get("timeout_at")?,
            operation_handle: row.get("operation_handle")?,
            params: parse_json_column(&params)?,
            result: result.as_deref().map(parse_json_column).transpose()?,
            error_message: row.get("error_message")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
        })
    }

    pub fn status(&self) -> Result<JobStatus, DatabaseError> {
        self.status.parse()
    }

    pub fn job_type(&self) -> Result<JobType, DatabaseError> {
        self.job_type.parse()
    }
}

fn parse_json_column(raw: &str) -> Result<serde_json::Value, rusqlite::Error> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn to_json_column(column: &'static str, value: &serde_json::Value) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Json { column, source: e })
}

/// Inserts a new job row.
///
/// Fails with a unique violation (see [`DatabaseError::is_unique_violation`])
/// when the document already has a non-terminal job.
pub fn insert(conn: &Connection, job: &JobRow) -> Result<(), DatabaseError> {
    let params_json = to_json_column("params", &job.params)?;
    let result_json = job
        .result
        .as_ref()
        .map(|r| to_json_column("result", r))
        .transpose()?;
    conn.execute(
        "INSERT INTO jobs (id, owner_id, document_id, job_type, status, done_steps, total_steps,
         percent, current_step, heartbeat_at, timeout_at, operation_handle, params, result,
         error_message, created_at, updated_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        params![
            job.id,
            job.owner_id,
            job.document_id,
            job.job_type,
            job.status,
            job.done_steps,
            job.total_steps,
            job.percent,
            job.current_step,
            job.heartbeat_at,
            job.timeout_at,
            job.operation_handle,
            params_json,
            result_json,
            job.error_message,
            job.created_at,
            job.updated_at,
            job.completed_at,
        ],
    )?;
    Ok(())
}

/// Finds a job by its ID.
pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    let row = conn
        .query_row("SELECT * FROM jobs WHERE id = ?1", params![id], JobRow::from_row)
        .optional()?;
    Ok(row)
}

/// Finds the non-terminal job of a document, if any.
pub fn find_active_for_document(
    conn: &Connection,
    document_id: &str,
) -> Result<Option<JobRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM jobs WHERE document_id = ?1
             AND status IN ('queued', 'running', 'polling')",
            params![document_id],
            JobRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Sets `running`.
pub fn mark_running(conn: &Connection, id: &str, now: &str) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET status = 'running', updated_at = ?2
         WHERE id = ?1 AND status NOT IN ('completed', 'failed')",
        params![id, now],
    )?;
    Ok(changed)
}

/// Sets `polling` and records the remote operation handle and its locations.
pub fn mark_polling(
    conn: &Connection,
    id: &str,
    operation_handle: &str,
    job_params: &serde_json::Value,
    now: &str,
    timeout_at: &str,
) -> Result<usize, DatabaseError> {
    let params_json = to_json_column("params", job_params)?;
    let changed = conn.execute(
        "UPDATE jobs SET status = 'polling', operation_handle = ?2, params = ?3,
         heartbeat_at = ?4, timeout_at = ?5, updated_at = ?4
         WHERE id = ?1 AND status NOT IN ('completed', 'failed')",
        params![id, operation_handle, params_json, now, timeout_at],
    )?;
    Ok(changed)
}

/// Sets `completed` with an optional result payload.
pub fn mark_completed(
    conn: &Connection,
    id: &str,
    result: Option<&serde_json::Value>,
    now: &str,
) -> Result<usize, DatabaseError> {
    let result_json = result.map(|r| to_json_column("result", r)).transpose()?;
    let changed = conn.execute(
        "UPDATE jobs SET status = 'completed', result = COALESCE(?2, result),
         percent = 100, updated_at = ?3, completed_at = ?3
         WHERE id = ?1 AND status NOT IN ('completed', 'failed')",
        params![id, result_json, now],
    )?;
    Ok(changed)
}

/// Sets `failed` with the error message stored verbatim.
pub fn mark_failed(
    conn: &Connection,
    id: &str,
    message: &str,
    now: &str,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET status = 'failed', error_message = ?2, updated_at = ?3,
         completed_at = ?3
         WHERE id = ?1 AND status NOT IN ('completed', 'failed')",
        params![id, message, now],
    )?;
    Ok(changed)
}

/// Refreshes `heartbeat_at` and pushes `timeout_at` out.
pub fn touch_heartbeat(
    conn: &Connection,
    id: &str,
    now: &str,
    timeout_at: &str,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET heartbeat_at = ?2, timeout_at = ?3, updated_at = ?2
         WHERE id = ?1 AND status NOT IN ('completed', 'failed')",
        params![id, now, timeout_at],
    )?;
    Ok(changed)
}

/// Writes step counters and refreshes the heartbeat.
pub fn update_progress(
    conn: &Connection,
    id: &str,
    done_steps: u32,
    total_steps: u32,
    percent: f64,
    current_step: &str,
    now: &str,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET done_steps = ?2, total_steps = ?3, percent = ?4, current_step = ?5,
         heartbeat_at = ?6, updated_at = ?6
         WHERE id = ?1 AND status NOT IN ('completed', 'failed')",
        params![id, done_steps, total_steps, percent, current_step, now],
    )?;
    Ok(changed)
}

/// Non-terminal jobs whose `timeout_at` has passed.
pub fn list_stale(conn: &Connection, now: &str) -> Result<Vec<JobRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM jobs
         WHERE status IN ('queued', 'running', 'polling')
         AND timeout_at IS NOT NULL AND timeout_at < ?1
         ORDER BY timeout_at ASC",
    )?;
    let rows = stmt
        .query_map(params![now], JobRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// A raw job event row.
#[derive(Debug, Clone, Serialize)]
pub struct JobEventRow {
    pub id: i64,
    pub job_id: String,
    pub event_type: String,
    pub step: Option<String>,
    pub message: String,
    pub stack_trace: Option<String>,
    pub created_at: String,
}

impl JobEventRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            event_type: row.get("event_type")?,
            step: row.get("step")?,
            message: row.get("message")?,
            stack_trace: row.get("stack_trace")?,
            created_at: row.get("created_at")?,
        })
    }

    pub fn kind(&self) -> Result<EventKind, DatabaseError> {
        self.event_type.parse()
    }
}

/// Appends an event to a job's audit log.
pub fn insert_event(
    conn: &Connection,
    job_id: &str,
    kind: EventKind,
    step: Option<&str>,
    message: &str,
    stack_trace: Option<&str>,
    now: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO job_events (job_id, event_type, step, message, stack_trace, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![job_id, kind.as_str(), step, message, stack_trace, now],
    )?;
    Ok(())
}

/// Lists a job's events in insertion order.
pub fn list_events(conn: &Connection, job_id: &str) -> Result<Vec<JobEventRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM job_events WHERE job_id = ?1 ORDER BY id ASC")?;
    let rows = stmt
        .query_map(params![job_id], JobEventRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
