use anyhow::{Context, Result};
use rusqlite::{Connection, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

use accountlink_api::db::{Built, migrations::MIGRATIONS};

/// Shared database state
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    pub fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }
}

/// Initialize the database: open connection, enable WAL, run migrations
pub fn init_db(data_dir: &Path) -> Result<Db> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating data directory {}", data_dir.display()))?;
    let db_path = data_dir.join("accountlink.db");
    let conn = Connection::open(&db_path).context("opening SQLite database")?;

    // Enable WAL mode for better concurrent read performance
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;

    run_migrations(&conn)?;

    Ok(Db {
        conn: Arc::new(Mutex::new(conn)),
    })
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    for (name, sql) in MIGRATIONS {
        let already_applied: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM _migrations WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .unwrap_or(false);

        if !already_applied {
            conn.execute_batch(sql)
                .with_context(|| format!("running migration {name}"))?;
            conn.execute("INSERT INTO _migrations (name) VALUES (?1)", [name])?;
            tracing::info!("Applied migration: {name}");
        }
    }

    Ok(())
}

// ── sea-query glue ──────────────────────────────────────────────────────────

/// Convert `sea_query::Values` into rusqlite bind params.
fn bind_values(values: &sea_query::Values) -> Vec<rusqlite::types::Value> {
    use rusqlite::types::Value as Sql;

    values
        .0
        .iter()
        .map(|v| match v {
            sea_query::Value::String(Some(s)) => Sql::Text(s.as_ref().clone()),
            sea_query::Value::Int(Some(i)) => Sql::Integer(i64::from(*i)),
            sea_query::Value::BigInt(Some(i)) => Sql::Integer(*i),
            sea_query::Value::Bool(Some(b)) => Sql::Integer(i64::from(*b)),
            _ => Sql::Null,
        })
        .collect()
}

/// Run a built INSERT/UPDATE/DELETE. Returns the number of affected rows.
pub fn sq_execute(conn: &Connection, (sql, values): Built) -> rusqlite::Result<usize> {
    conn.execute(&sql, rusqlite::params_from_iter(bind_values(&values)))
}

/// Run a built SELECT expected to return exactly one row.
pub fn sq_query_row<T, F>(conn: &Connection, (sql, values): Built, f: F) -> rusqlite::Result<T>
where
    F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
{
    conn.query_row(&sql, rusqlite::params_from_iter(bind_values(&values)), f)
}

/// Run a built SELECT and collect every row.
pub fn sq_query_map<T, F>(conn: &Connection, (sql, values): Built, f: F) -> rusqlite::Result<Vec<T>>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(bind_values(&values)), f)?;
    rows.collect()
}

/// `true` when the error is a UNIQUE constraint violation.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

#[cfg(test)]
pub(crate) fn test_db() -> Db {
    let dir = tempfile::tempdir().unwrap();
    init_db(&dir.keep()).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use accountlink_api::db::users;

    #[test]
    fn migrations_are_idempotent() {
        let db = test_db();
        let conn = db.conn();
        run_migrations(&conn).unwrap();
        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied as usize, MIGRATIONS.len());
    }

    #[test]
    fn duplicate_email_is_a_unique_violation() {
        let db = test_db();
        let conn = db.conn();
        sq_execute(&conn, users::insert(Some("a@example.com"))).unwrap();
        let err = sq_execute(&conn, users::insert(Some("a@example.com"))).unwrap_err();
        assert!(is_unique_violation(&err));

        // NULL emails never collide
        sq_execute(&conn, users::insert(None)).unwrap();
        sq_execute(&conn, users::insert(None)).unwrap();
    }
}
