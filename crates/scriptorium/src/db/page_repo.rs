//! Page repository: per-page text of a document.
//!
//! Writes are upserts on `(document_id, page_no)` so an extraction that is
//! re-run after a partial failure overwrites rather than duplicates.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;
use crate::model::PageSource;

/// A raw page row from the database.
#[derive(Debug, Clone)]
pub struct PageRow {
    pub document_id: String,
    pub page_no: u32,
    pub raw_text: Option<String>,
    pub clean_text: Option<String>,
    pub edited_text: Option<String>,
    pub source: String,
    pub word_count: u32,
    pub cleaning_model: Option<String>,
    pub cleaning_version: Option<String>,
    pub cleaning_failed: bool,
    pub changes_summary: Option<String>,
    pub edited_by: Option<String>,
    pub edited_at: Option<String>,
    pub created_at: String,
}

impl PageRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            document_id: row.get("document_id")?,
            page_no: row.get("page_no")?,
            raw_text: row.get("raw_text")?,
            clean_text: row.get("clean_text")?,
            edited_text: row.get("edited_text")?,
            source: row.get("source")?,
            word_count: row.get("word_count")?,
            cleaning_model: row.get("cleaning_model")?,
            cleaning_version: row.get("cleaning_version")?,
            cleaning_failed: row.get("cleaning_failed")?,
            changes_summary: row.get("changes_summary")?,
            edited_by: row.get("edited_by")?,
            edited_at: row.get("edited_at")?,
            created_at: row.get("created_at")?,
        })
    }

    /// The authoritative text of the page: edited, else cleaned, else raw.
    pub fn final_text(&self) -> &str {
        self.edited_text
            .as_deref()
            .or(self.clean_text.as_deref())
            .or(self.raw_text.as_deref())
            .unwrap_or("")
    }

    pub fn source(&self) -> Result<PageSource, DatabaseError> {
        self.source.parse()
    }
}

/// Page content produced by extraction, before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPage {
    pub page_no: u32,
    pub raw_text: String,
    pub clean_text: String,
    pub source: PageSource,
    pub cleaning_model: Option<String>,
    pub cleaning_version: Option<String>,
    pub cleaning_failed: bool,
    pub changes_summary: Option<String>,
}

impl NewPage {
    /// A page whose clean text is its raw text (native extraction, sync OCR).
    pub fn uncleaned(page_no: u32, text: String, source: PageSource) -> Self {
        Self {
            page_no,
            clean_text: text.clone(),
            raw_text: text,
            source,
            cleaning_model: None,
            cleaning_version: None,
            cleaning_failed: false,
            changes_summary: None,
        }
    }
}

/// Whitespace-separated token count.
pub fn word_count(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

/// Inserts or replaces the extracted content of one page.
///
/// Manual edits on an existing row are left untouched.
pub fn upsert(
    conn: &Connection,
    document_id: &str,
    page: &NewPage,
    now: &str,
) -> Result<(), DatabaseError> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO document_pages (document_id, page_no, raw_text, clean_text, source,
         word_count, cleaning_model, cleaning_version, cleaning_failed, changes_summary,
         created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT (document_id, page_no) DO UPDATE SET
            raw_text = excluded.raw_text,
            clean_text = excluded.clean_text,
            source = excluded.source,
            word_count = excluded.word_count,
            cleaning_model = excluded.cleaning_model,
            cleaning_version = excluded.cleaning_version,
            cleaning_failed = excluded.cleaning_failed,
            changes_summary = excluded.changes_summary",
    )?;
    stmt.execute(params![
        document_id,
        page.page_no,
        page.raw_text,
        page.clean_text,
        page.source.as_str(),
        word_count(&page.raw_text),
        page.cleaning_model,
        page.cleaning_version,
        page.cleaning_failed,
        page.changes_summary,
        now,
    ])?;
    Ok(())
}

/// Upserts a batch of pages.
pub fn upsert_batch(
    conn: &Connection,
    document_id: &str,
    pages: &[NewPage],
    now: &str,
) -> Result<(), DatabaseError> {
    for page in pages {
        upsert(conn, document_id, page, now)?;
    }
    Ok(())
}

/// Lists all pages of a document ordered by page number.
pub fn list_for_document(
    conn: &Connection,
    document_id: &str,
) -> Result<Vec<PageRow>, DatabaseError> {
    let mut stmt = conn.prepare_cached(
        "SELECT * FROM document_pages WHERE document_id = ?1 ORDER BY page_no ASC",
    )?;
    let rows = stmt
        .query_map(params![document_id], PageRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Finds one page.
pub fn find(
    conn: &Connection,
    document_id: &str,
    page_no: u32,
) -> Result<Option<PageRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM document_pages WHERE document_id = ?1 AND page_no = ?2",
            params![document_id, page_no],
            PageRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Sets or clears the manual edit of a page.
pub fn set_edit(
    conn: &Connection,
    document_id: &str,
    page_no: u32,
    edited_text: Option<&str>,
    edited_by: &str,
    now: &str,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE document_pages SET edited_text = ?3, edited_by = ?4, edited_at = ?5
         WHERE document_id = ?1 AND page_no = ?2",
        params![document_id, page_no, edited_text, edited_by, now],
    )?;
    Ok(changed)
}

/// Removes every page of a document ahead of a fresh extraction.
pub fn delete_for_document(conn: &Connection, document_id: &str) -> Result<usize, DatabaseError> {
    let deleted = conn.execute(
        "DELETE FROM document_pages WHERE document_id = ?1",
        params![document_id],
    )?;
    Ok(deleted)
}
