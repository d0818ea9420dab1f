//! Entitlement (user package) queries.
//!
//! The partial unique index on `(user_id, package_id) WHERE is_active = 1`
//! guarantees at most one active row per pair; [`insert`] maps the
//! violation to [`DbError::Constraint`] so the service can report a
//! conflict instead of a raw store error.

use aula_types::{EntitlementId, EntitlementSource, PackageId, UserId};
use rusqlite::{Connection, OptionalExtension};

use crate::{is_constraint_violation, DbError, Result};

/// A user package (entitlement) row.
#[derive(Debug, Clone)]
pub struct EntitlementRow {
    pub id: EntitlementId,
    pub user_id: UserId,
    pub package_id: PackageId,
    pub purchased_at: u64,
    pub expires_at: u64,
    pub is_active: bool,
    pub source: EntitlementSource,
}

impl EntitlementRow {
    /// Whether this entitlement currently grants access.
    pub fn grants_access(&self, now: u64) -> bool {
        self.is_active && self.expires_at > now
    }
}

/// Insert a new active entitlement. Returns the row id.
///
/// An existing active row for the same `(user, package)` surfaces as
/// [`DbError::Constraint`].
pub fn insert(
    conn: &Connection,
    user_id: UserId,
    package_id: PackageId,
    purchased_at: u64,
    expires_at: u64,
    source: EntitlementSource,
) -> Result<EntitlementId> {
    conn.execute(
        "INSERT INTO user_packages (user_id, package_id, purchased_at, expires_at, is_active, source)
         VALUES (?1, ?2, ?3, ?4, 1, ?5)",
        rusqlite::params![
            user_id as i64,
            package_id as i64,
            purchased_at as i64,
            expires_at as i64,
            source.as_str(),
        ],
    )
    .map_err(|e| {
        if is_constraint_violation(&e) {
            DbError::Constraint(format!(
                "active entitlement already exists for user {user_id} package {package_id}"
            ))
        } else {
            DbError::Sqlite(e)
        }
    })?;
    Ok(conn.last_insert_rowid())
}

/// Get an entitlement by row id.
pub fn get(conn: &Connection, id: EntitlementId) -> Result<Option<EntitlementRow>> {
    let row = conn
        .query_row(
            "SELECT id, user_id, package_id, purchased_at, expires_at, is_active, source
             FROM user_packages WHERE id = ?1",
            [id],
            row_from_sql,
        )
        .optional()?;
    Ok(row)
}

/// Find the active, non-expired entitlement for a `(user, package)` pair.
pub fn active_for(
    conn: &Connection,
    user_id: UserId,
    package_id: PackageId,
    now: u64,
) -> Result<Option<EntitlementRow>> {
    let row = conn
        .query_row(
            "SELECT id, user_id, package_id, purchased_at, expires_at, is_active, source
             FROM user_packages
             WHERE user_id = ?1 AND package_id = ?2 AND is_active = 1 AND expires_at > ?3",
            rusqlite::params![user_id as i64, package_id as i64, now as i64],
            row_from_sql,
        )
        .optional()?;
    Ok(row)
}

/// Clear the active flag on expired rows for a `(user, package)` pair.
///
/// Returns the number of rows deactivated. Run before [`insert`] so the
/// partial unique index only ever guards genuinely live entitlements.
pub fn deactivate_expired(
    conn: &Connection,
    user_id: UserId,
    package_id: PackageId,
    now: u64,
) -> Result<usize> {
    let updated = conn.execute(
        "UPDATE user_packages SET is_active = 0
         WHERE user_id = ?1 AND package_id = ?2 AND is_active = 1 AND expires_at <= ?3",
        rusqlite::params![user_id as i64, package_id as i64, now as i64],
    )?;
    Ok(updated)
}

/// Explicitly deactivate an entitlement. Returns `false` if it was not
/// active.
pub fn deactivate(conn: &Connection, id: EntitlementId) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE user_packages SET is_active = 0 WHERE id = ?1 AND is_active = 1",
        [id],
    )?;
    Ok(updated == 1)
}

/// Whether the user ever held a code-sourced entitlement for a package,
/// active or not. Used to stop a student from farming codes for the same
/// package.
pub fn has_code_history(conn: &Connection, user_id: UserId, package_id: PackageId) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM user_packages
         WHERE user_id = ?1 AND package_id = ?2 AND source = 'code'",
        rusqlite::params![user_id as i64, package_id as i64],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// List all of a user's entitlements, newest first.
pub fn list_for_user(conn: &Connection, user_id: UserId) -> Result<Vec<EntitlementRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, package_id, purchased_at, expires_at, is_active, source
         FROM user_packages WHERE user_id = ?1 ORDER BY id DESC",
    )?;
    let rows = stmt
        .query_map([user_id as i64], row_from_sql)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn row_from_sql(row: &rusqlite::Row<'_>) -> std::result::Result<EntitlementRow, rusqlite::Error> {
    let source_str: String = row.get(6)?;
    let source = EntitlementSource::parse(&source_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            rusqlite::types::Type::Text,
            format!("unknown entitlement source: {source_str}").into(),
        )
    })?;
    Ok(EntitlementRow {
        id: row.get(0)?,
        user_id: row.get::<_, i64>(1)? as u64,
        package_id: row.get::<_, i64>(2)? as u64,
        purchased_at: row.get::<_, i64>(3)? as u64,
        expires_at: row.get::<_, i64>(4)? as u64,
        is_active: row.get::<_, i64>(5)? != 0,
        source,
    })
}
