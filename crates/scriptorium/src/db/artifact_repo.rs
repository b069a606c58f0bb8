//! Generated artifact repository: the storage behind the generation cache.

use rusqlite::{params, Connection, Row};

use super::DatabaseError;

/// One stored artifact (for questions: one question object).
#[derive(Debug, Clone)]
pub struct ArtifactRow {
    pub id: String,
    pub owner_id: String,
    pub document_id: Option<String>,
    pub source_text_hash: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub created_at: String,
}

impl ArtifactRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let payload: String = row.get("payload")?;
        let payload = serde_json::from_str(&payload).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(Self {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            document_id: row.get("document_id")?,
            source_text_hash: row.get("source_text_hash")?,
            kind: row.get("kind")?,
            payload,
            created_at: row.get("created_at")?,
        })
    }
}

/// Artifacts an owner already has for a fingerprint, in insertion order.
pub fn find_by_hash(
    conn: &Connection,
    owner_id: &str,
    source_text_hash: &str,
) -> Result<Vec<ArtifactRow>, DatabaseError> {
    let mut stmt = conn.prepare_cached(
        "SELECT * FROM generated_artifacts WHERE owner_id = ?1 AND source_text_hash = ?2
         ORDER BY rowid ASC",
    )?;
    let rows = stmt
        .query_map(params![owner_id, source_text_hash], ArtifactRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Inserts artifacts; callers wrap this in a transaction for all-or-nothing.
pub fn insert_many(conn: &Connection, artifacts: &[ArtifactRow]) -> Result<(), DatabaseError> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO generated_artifacts (id, owner_id, document_id, source_text_hash, kind,
         payload, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for artifact in artifacts {
        let payload =
            serde_json::to_string(&artifact.payload).map_err(|e| DatabaseError::Json {
                column: "payload",
                source: e,
            })?;
        stmt.execute(params![
            artifact.id,
            artifact.owner_id,
            artifact.document_id,
            artifact.source_text_hash,
            artifact.kind,
            payload,
            artifact.created_at,
        ])?;
    }
    Ok(())
}
