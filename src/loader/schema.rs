//! Forward-only schema application
//!
//! Schema files live in `sql/` and are applied in file-name order
//! (`0001_`, `0002_`, ...). Each applied file is recorded in
//! `schema_migrations`, so re-running is a no-op. The same files are
//! embedded in the binary for callers without a schema directory.

use crate::error::PersistenceError;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::fs;
use std::path::Path;

pub const EMBEDDED_MIGRATIONS: &[(&str, &str)] = &[
    ("0001_addresses.sql", include_str!("../../sql/0001_addresses.sql")),
    ("0002_transactions.sql", include_str!("../../sql/0002_transactions.sql")),
    ("0003_traces_logs.sql", include_str!("../../sql/0003_traces_logs.sql")),
];

/// Apply every `.sql` file in `schema_dir` not applied yet.
///
/// Returns the number of files applied by this call.
pub fn run_schema_migrations(
    conn: &mut Connection,
    schema_dir: impl AsRef<Path>,
) -> Result<usize, PersistenceError> {
    let schema_path = schema_dir.as_ref();
    if !schema_path.is_dir() {
        return Err(PersistenceError::Migration {
            name: schema_path.display().to_string(),
            reason: "schema directory not found".to_string(),
        });
    }

    let read_err = |e: std::io::Error| PersistenceError::Migration {
        name: schema_path.display().to_string(),
        reason: e.to_string(),
    };

    let mut sql_files: Vec<_> = fs::read_dir(schema_path)
        .map_err(read_err)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|s| s.to_str()) == Some("sql"))
        .collect();
    sql_files.sort();

    log::info!("🔧 Running schema migrations from: {}", schema_path.display());

    let mut applied = 0;
    for path in sql_files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let sql = fs::read_to_string(&path).map_err(read_err)?;
        if apply_migration(conn, &name, &sql)? {
            applied += 1;
        }
    }

    log::info!("✅ Schema up to date ({} newly applied)", applied);
    Ok(applied)
}

/// Apply the schema compiled into the crate.
pub fn apply_embedded_migrations(conn: &mut Connection) -> Result<usize, PersistenceError> {
    let mut applied = 0;
    for (name, sql) in EMBEDDED_MIGRATIONS {
        if apply_migration(conn, name, sql)? {
            applied += 1;
        }
    }
    Ok(applied)
}

/// Names of applied schema files, oldest first
pub fn applied_versions(conn: &Connection) -> Result<Vec<String>, PersistenceError> {
    ensure_migration_table(conn)?;
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
    let versions = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(versions)
}

fn ensure_migration_table(conn: &Connection) -> Result<(), PersistenceError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     TEXT PRIMARY KEY,
            applied_at  INTEGER NOT NULL
        )",
        [],
    )?;
    Ok(())
}

fn apply_migration(conn: &mut Connection, name: &str, sql: &str) -> Result<bool, PersistenceError> {
    ensure_migration_table(conn)?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let already: Option<String> = tx
        .query_row(
            "SELECT version FROM schema_migrations WHERE version = ?1",
            [name],
            |row| row.get(0),
        )
        .optional()?;
    if already.is_some() {
        return Ok(false);
    }

    log::info!("   ├─ Executing: {}", name);
    tx.execute_batch(sql).map_err(|e| PersistenceError::Migration {
        name: name.to_string(),
        reason: e.to_string(),
    })?;
    tx.execute(
        "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        params![name, chrono::Utc::now().timestamp()],
    )?;
    tx.commit()?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_embedded_migrations_apply_once() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(apply_embedded_migrations(&mut conn).unwrap(), EMBEDDED_MIGRATIONS.len());
        assert_eq!(apply_embedded_migrations(&mut conn).unwrap(), 0);

        let versions = applied_versions(&conn).unwrap();
        assert_eq!(versions.len(), EMBEDDED_MIGRATIONS.len());
        assert_eq!(versions[0], "0001_addresses.sql");
    }

    #[test]
    fn test_directory_migrations_in_name_order() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("0002_second.sql"),
            "ALTER TABLE things ADD COLUMN label TEXT;",
        )
        .unwrap();
        fs::write(
            dir.path().join("0001_first.sql"),
            "CREATE TABLE IF NOT EXISTS things (id INTEGER PRIMARY KEY);",
        )
        .unwrap();
        fs::write(dir.path().join("README.md"), "not a migration").unwrap();

        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(run_schema_migrations(&mut conn, dir.path()).unwrap(), 2);
        // a second ALTER would fail if the file were re-applied
        assert_eq!(run_schema_migrations(&mut conn, dir.path()).unwrap(), 0);

        conn.execute("INSERT INTO things (id, label) VALUES (1, 'x')", [])
            .unwrap();
    }

    #[test]
    fn test_repository_schema_dir_matches_embedded() {
        let mut conn = Connection::open_in_memory().unwrap();
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("sql");
        assert_eq!(
            run_schema_migrations(&mut conn, &dir).unwrap(),
            EMBEDDED_MIGRATIONS.len()
        );
        assert_eq!(apply_embedded_migrations(&mut conn).unwrap(), 0);
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let mut conn = Connection::open_in_memory().unwrap();
        let err = run_schema_migrations(&mut conn, "/definitely/not/here").unwrap_err();
        assert!(matches!(err, PersistenceError::Migration { .. }));
    }

    #[test]
    fn test_broken_file_is_rolled_back() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("0001_broken.sql"),
            "CREATE TABLE ok_table (id INTEGER); CREATE TABLE nope (",
        )
        .unwrap();

        let mut conn = Connection::open_in_memory().unwrap();
        assert!(run_schema_migrations(&mut conn, dir.path()).is_err());
        assert!(applied_versions(&conn).unwrap().is_empty());
        let exists: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'ok_table'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(exists, 0);
    }
}
