//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies
//! pending ones in order, each inside its own transaction.

use rusqlite::Connection;

use super::error::DatabaseError;

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_documents_table",
        sql: include_str!("sql/001_create_documents.sql"),
    },
    Migration {
        version: 2,
        description: "create_document_pages_table",
        sql: include_str!("sql/002_create_document_pages.sql"),
    },
    Migration {
        version: 3,
        description: "create_jobs_and_job_events_tables",
        sql: include_str!("sql/003_create_jobs.sql"),
    },
    Migration {
        version: 4,
        description: "create_document_versions_table",
        sql: include_str!("sql/004_create_document_versions.sql"),
    },
    Migration {
        version: 5,
        description: "create_generated_artifacts_table",
        sql: include_str!("sql/005_create_generated_artifacts.sql"),
    },
];

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        let batch = format!(
            "BEGIN;\n{}\nINSERT INTO _migrations (version, description) VALUES ({}, '{}');\nCOMMIT;",
            migration.sql, migration.version, migration.description
        );

        if let Err(e) = conn.execute_batch(&batch) {
            // Leave the connection usable; the failed batch may have stopped mid-transaction.
            let _ = conn.execute_batch("ROLLBACK;");
            return Err(DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column_exists(conn: &Connection, table: &str, column: &str) -> bool {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({})", table))
            .unwrap();
        let exists = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .any(|r| r.map(|name| name == column).unwrap_or(false));
        exists
    }

    fn migrated() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        run_all(&conn).unwrap();
        conn
    }

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let conn = migrated();
        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = migrated();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_versions_are_ordered() {
        for pair in MIGRATIONS.windows(2) {
            assert!(pair[0].version < pair[1].version);
        }
    }

    #[test]
    fn test_expected_columns_exist() {
        let conn = migrated();
        assert!(column_exists(&conn, "documents", "active_version"));
        assert!(column_exists(&conn, "document_pages", "edited_text"));
        assert!(column_exists(&conn, "jobs", "operation_handle"));
        assert!(column_exists(&conn, "jobs", "timeout_at"));
        assert!(column_exists(&conn, "document_versions", "snapshot_json"));
        assert!(column_exists(&conn, "generated_artifacts", "source_text_hash"));
        assert!(!column_exists(&conn, "jobs", "missing"));
    }

    #[test]
    fn test_versions_reject_update_and_delete() {
        let conn = migrated();
        conn.execute_batch(
            "INSERT INTO documents (id, owner_id, file_name, storage_path, file_type,
                created_at, updated_at)
             VALUES ('d1', 'u1', 'a.pdf', 'u1/a.pdf', 'pdf', 't', 't');
             INSERT INTO document_versions (id, document_id, version, snapshot_json,
                created_by, created_at)
             VALUES ('v1', 'd1', 1, '[]', 'u1', 't');",
        )
        .unwrap();

        assert!(conn
            .execute("UPDATE document_versions SET snapshot_json = 'x'", [])
            .is_err());
        assert!(conn.execute("DELETE FROM document_versions", []).is_err());
    }
}
