//! Version repository: immutable published snapshots.
//!
//! Rows are append-only; triggers in the schema reject UPDATE and DELETE.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::DatabaseError;

/// One page of a published snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotPage {
    pub page_no: u32,
    pub final_text: String,
}

/// A raw version row with its snapshot decoded.
#[derive(Debug, Clone)]
pub struct VersionRow {
    pub id: String,
    pub document_id: String,
    pub version: u32,
    pub snapshot: Vec<SnapshotPage>,
    pub created_by: String,
    pub created_at: String,
    pub publish_notes: Option<String>,
}

impl VersionRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let snapshot_json: String = row.get("snapshot_json")?;
        let snapshot = serde_json::from_str(&snapshot_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(Self {
            id: row.get("id")?,
            document_id: row.get("document_id")?,
            version: row.get("version")?,
            snapshot,
            created_by: row.get("created_by")?,
            created_at: row.get("created_at")?,
            publish_notes: row.get("publish_notes")?,
        })
    }

    /// All page texts joined by blank lines, in page order.
    pub fn joined_text(&self) -> String {
        self.snapshot
            .iter()
            .map(|p| p.final_text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// The next version number for a document.
///
/// Takes the larger of the document's `active_version` and the highest stored
/// version, so a snapshot orphaned by a half-finished publish is never reused.
pub fn next_version(
    conn: &Connection,
    document_id: &str,
    active_version: u32,
) -> Result<u32, DatabaseError> {
    let stored: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM document_versions WHERE document_id = ?1",
        params![document_id],
        |r| r.get(0),
    )?;
    Ok(stored.max(active_version) + 1)
}

/// Inserts a new immutable version.
pub fn insert(conn: &Connection, version: &VersionRow) -> Result<(), DatabaseError> {
    let snapshot_json =
        serde_json::to_string(&version.snapshot).map_err(|e| DatabaseError::Json {
            column: "snapshot_json",
            source: e,
        })?;
    conn.execute(
        "INSERT INTO document_versions (id, document_id, version, snapshot_json, created_by,
         created_at, publish_notes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            version.id,
            version.document_id,
            version.version,
            snapshot_json,
            version.created_by,
            version.created_at,
            version.publish_notes,
        ],
    )?;
    Ok(())
}

/// Finds a version by its ID.
pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<VersionRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM document_versions WHERE id = ?1",
            params![id],
            VersionRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Lists every version of a document, oldest first.
pub fn list_for_document(
    conn: &Connection,
    document_id: &str,
) -> Result<Vec<VersionRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM document_versions WHERE document_id = ?1 ORDER BY version ASC",
    )?;
    let rows = stmt
        .query_map(params![document_id], VersionRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
