//! Document repository: rows of the `documents` table.
//!
//! Status changes are conditional updates; each returns the number of rows
//! it touched so callers can tell a lost race from a successful transition.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::DatabaseError;
use crate::model::DocumentStatus;

/// A raw document row from the database.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentRow {
    pub id: String,
    pub owner_id: String,
    pub title: Option<String>,
    pub file_name: String,
    pub storage_path: String,
    pub mime_type: Option<String>,
    pub file_type: String,
    pub file_size_bytes: u64,
    pub status: String,
    pub page_count: u32,
    pub active_version: u32,
    pub published_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl DocumentRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            title: row.get("title")?,
            file_name: row.get("file_name")?,
            storage_path: row.get("storage_path")?,
            mime_type: row.get("mime_type")?,
            file_type: row.get("file_type")?,
            file_size_bytes: row.get("file_size_bytes")?,
            status: row.get("status")?,
            page_count: row.get("page_count")?,
            active_version: row.get("active_version")?,
            published_at: row.get("published_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    pub fn status(&self) -> Result<DocumentStatus, DatabaseError> {
        self.status.parse()
    }
}

/// Inserts a new document row.
pub fn insert(conn: &Connection, doc: &DocumentRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO documents (id, owner_id, title, file_name, storage_path, mime_type,
         file_type, file_size_bytes, status, page_count, active_version, published_at,
         created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            doc.id,
            doc.owner_id,
            doc.title,
            doc.file_name,
            doc.storage_path,
            doc.mime_type,
            doc.file_type,
            doc.file_size_bytes,
            doc.status,
            doc.page_count,
            doc.active_version,
            doc.published_at,
            doc.created_at,
            doc.updated_at,
        ],
    )?;
    Ok(())
}

/// Finds a document by its ID.
pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<DocumentRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM documents WHERE id = ?1",
            params![id],
            DocumentRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Moves a document to `to` only if its current status is one of `from`.
pub fn transition(
    conn: &Connection,
    id: &str,
    from: &[DocumentStatus],
    to: DocumentStatus,
    now: &str,
) -> Result<usize, DatabaseError> {
    let allowed: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
    let allowed = serde_json::to_string(&allowed).map_err(|e| DatabaseError::Json {
        column: "status",
        source: e,
    })?;
    let changed = conn.execute(
        "UPDATE documents SET status = ?2, updated_at = ?3
         WHERE id = ?1 AND status IN (SELECT value FROM json_each(?4))",
        params![id, to.as_str(), now, allowed],
    )?;
    Ok(changed)
}

/// Marks extraction finished: status `draft` with the final page count.
pub fn mark_draft(
    conn: &Connection,
    id: &str,
    page_count: u32,
    now: &str,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE documents SET status = 'draft', page_count = ?2, updated_at = ?3
         WHERE id = ?1 AND status = 'processing'",
        params![id, page_count, now],
    )?;
    Ok(changed)
}

/// Marks a document failed while it is still being processed.
pub fn mark_failed(conn: &Connection, id: &str, now: &str) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE documents SET status = 'failed', updated_at = ?2
         WHERE id = ?1 AND status = 'processing'",
        params![id, now],
    )?;
    Ok(changed)
}

/// Flips a draft to published at `version`, optionally replacing the title.
pub fn mark_published(
    conn: &Connection,
    id: &str,
    version: u32,
    title: Option<&str>,
    now: &str,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE documents SET status = 'published', active_version = ?2,
         title = COALESCE(?3, title), published_at = ?4, updated_at = ?4
         WHERE id = ?1 AND status = 'draft'",
        params![id, version, title, now],
    )?;
    Ok(changed)
}
