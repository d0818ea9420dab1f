//! # aula-db
//!
//! Database access layer for the aula payment core.
//! Manages the single SQLite database at `$AULA_DATA_DIR/aula.db`.
//!
//! ## Schema
//!
//! - WAL mode mandatory
//! - Foreign keys enforced
//! - All timestamps are Unix epoch seconds (u64)
//! - All money amounts are integer credits
//! - Schema version stored in `PRAGMA user_version`
//!
//! The query layer exposes plain functions over `&Connection`. Every
//! state transition with a correctness invariant (debit, redeem, grant)
//! is a single conditional `UPDATE`/`INSERT` whose `WHERE` clause or
//! uniqueness constraint decides the winner; zero affected rows means
//! the caller lost.

pub mod migrations;
pub mod queries;
pub mod schema;

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Shared store handle: one connection, serialized by an async mutex.
pub type Db = Arc<tokio::sync::Mutex<Connection>>;

/// Database error types.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Open or create the aula database at the given path.
///
/// Configures WAL mode, foreign keys, and runs any pending migrations.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing).
pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Wrap a connection in the shared handle used by the services.
pub fn into_shared(conn: Connection) -> Db {
    Arc::new(tokio::sync::Mutex::new(conn))
}

/// Configure SQLite pragmas.
fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(())
}

/// Whether an error is a SQLite uniqueness/constraint violation.
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_memory() {
        let conn = open_memory().expect("open in-memory db");
        let version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .expect("get user_version");
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let conn = open_memory().expect("open");
        let fk: i32 = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .expect("get foreign_keys");
        assert_eq!(fk, 1);
    }

    #[test]
    fn test_balance_check_rejects_negative() {
        // The CHECK constraint is a backstop; the conditional update in
        // queries::wallets is the primary guard.
        let conn = open_memory().expect("open");
        conn.execute(
            "INSERT INTO wallets (user_id, balance, updated_at) VALUES (1, 100, 0)",
            [],
        )
        .expect("insert wallet");

        let result = conn.execute("UPDATE wallets SET balance = -1 WHERE user_id = 1", []);
        assert!(result.is_err(), "negative balance must be rejected");
    }
}
