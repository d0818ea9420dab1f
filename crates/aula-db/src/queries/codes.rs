//! Activation code queries.
//!
//! A code transitions unused -> used exactly once. The transition is a
//! conditional update keyed on `is_used = 0`; at most one concurrent
//! caller observes an affected row and wins the redemption. The reverse
//! transition exists only as a compensation step and is equally
//! conditional on the winner's identity.

use aula_types::{CodeId, PackageId, UserId};
use rusqlite::{Connection, OptionalExtension};

use crate::{is_constraint_violation, DbError, Result};

/// An activation code row.
#[derive(Debug, Clone)]
pub struct CodeRow {
    pub id: CodeId,
    pub code: String,
    /// `None` means the code is valid for any package of its grade.
    pub package_id: Option<PackageId>,
    pub grade: String,
    pub is_used: bool,
    pub used_by: Option<UserId>,
    pub used_at: Option<u64>,
    pub expires_at: Option<u64>,
    pub created_at: u64,
}

/// Insert a new code. Returns the row id.
///
/// A duplicate token surfaces as [`DbError::Constraint`] so callers can
/// regenerate and retry.
pub fn insert(
    conn: &Connection,
    code: &str,
    package_id: Option<PackageId>,
    grade: &str,
    expires_at: Option<u64>,
    now: u64,
) -> Result<CodeId> {
    conn.execute(
        "INSERT INTO activation_codes (code, package_id, grade, expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            code,
            package_id.map(|p| p as i64),
            grade,
            expires_at.map(|t| t as i64),
            now as i64,
        ],
    )
    .map_err(|e| {
        if is_constraint_violation(&e) {
            DbError::Constraint(format!("duplicate activation code: {code}"))
        } else {
            DbError::Sqlite(e)
        }
    })?;
    Ok(conn.last_insert_rowid())
}

/// Look up a code by its token.
pub fn find_by_code(conn: &Connection, code: &str) -> Result<Option<CodeRow>> {
    let row = conn
        .query_row(
            "SELECT id, code, package_id, grade, is_used, used_by, used_at, expires_at, created_at
             FROM activation_codes WHERE code = ?1",
            [code],
            row_from_sql,
        )
        .optional()?;
    Ok(row)
}

/// Look up a code by its row id.
pub fn get(conn: &Connection, id: CodeId) -> Result<Option<CodeRow>> {
    let row = conn
        .query_row(
            "SELECT id, code, package_id, grade, is_used, used_by, used_at, expires_at, created_at
             FROM activation_codes WHERE id = ?1",
            [id],
            row_from_sql,
        )
        .optional()?;
    Ok(row)
}

/// Atomically mark a code as used by a user.
///
/// Returns `true` if this call won the unused -> used transition and
/// `false` if the code was already consumed.
pub fn try_redeem(conn: &Connection, id: CodeId, user_id: UserId, now: u64) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE activation_codes SET is_used = 1, used_by = ?2, used_at = ?3
         WHERE id = ?1 AND is_used = 0",
        rusqlite::params![id, user_id as i64, now as i64],
    )?;
    Ok(updated == 1)
}

/// Revert a code to unused (compensation only).
///
/// The revert applies only where this user is the recorded redeemer;
/// returns `false` if the row was not in that state.
pub fn release(conn: &Connection, id: CodeId, user_id: UserId) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE activation_codes SET is_used = 0, used_by = NULL, used_at = NULL
         WHERE id = ?1 AND is_used = 1 AND used_by = ?2",
        rusqlite::params![id, user_id as i64],
    )?;
    Ok(updated == 1)
}

/// List the most recently created codes, newest first.
pub fn list(conn: &Connection, limit: u32) -> Result<Vec<CodeRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, code, package_id, grade, is_used, used_by, used_at, expires_at, created_at
         FROM activation_codes ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit], row_from_sql)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn row_from_sql(row: &rusqlite::Row<'_>) -> std::result::Result<CodeRow, rusqlite::Error> {
    Ok(CodeRow {
        id: row.get(0)?,
        code: row.get(1)?,
        package_id: row.get::<_, Option<i64>>(2)?.map(|p| p as u64),
        grade: row.get(3)?,
        is_used: row.get::<_, i64>(4)? != 0,
        used_by: row.get::<_, Option<i64>>(5)?.map(|u| u as u64),
        used_at: row.get::<_, Option<i64>>(6)?.map(|t| t as u64),
        expires_at: row.get::<_, Option<i64>>(7)?.map(|t| t as u64),
        created_at: row.get::<_, i64>(8)? as u64,
    })
}
