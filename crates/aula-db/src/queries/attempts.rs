//! Purchase idempotency journal queries.
//!
//! One row per client-supplied idempotency key. The `INSERT OR IGNORE`
//! in [`insert_started`] is the claim point: the caller that inserts the
//! row owns the attempt; everyone else reads the recorded state.

use aula_types::{EntitlementId, PackageId, PaymentMethod, UserId};
use rusqlite::{Connection, OptionalExtension};

use crate::Result;

/// A journaled purchase attempt.
#[derive(Debug, Clone)]
pub struct AttemptRow {
    pub idempotency_key: String,
    pub user_id: UserId,
    pub package_id: PackageId,
    pub method: PaymentMethod,
    pub status: String,
    pub new_balance: Option<u64>,
    pub entitlement_id: Option<EntitlementId>,
    pub created_at: u64,
    pub completed_at: Option<u64>,
}

/// Claim an attempt key. Returns `true` if this caller inserted the row.
pub fn insert_started(
    conn: &Connection,
    key: &str,
    user_id: UserId,
    package_id: PackageId,
    method: PaymentMethod,
    now: u64,
) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO purchase_attempts
             (idempotency_key, user_id, package_id, method, status, created_at)
         VALUES (?1, ?2, ?3, ?4, 'started', ?5)",
        rusqlite::params![
            key,
            user_id as i64,
            package_id as i64,
            method.as_str(),
            now as i64,
        ],
    )?;
    Ok(inserted == 1)
}

/// Look up an attempt by key.
pub fn get(conn: &Connection, key: &str) -> Result<Option<AttemptRow>> {
    let row = conn
        .query_row(
            "SELECT idempotency_key, user_id, package_id, method, status,
                    new_balance, entitlement_id, created_at, completed_at
             FROM purchase_attempts WHERE idempotency_key = ?1",
            [key],
            row_from_sql,
        )
        .optional()?;
    Ok(row)
}

/// Record the final state of an attempt.
pub fn complete(
    conn: &Connection,
    key: &str,
    status: &str,
    new_balance: Option<u64>,
    entitlement_id: Option<EntitlementId>,
    now: u64,
) -> Result<()> {
    conn.execute(
        "UPDATE purchase_attempts
         SET status = ?2, new_balance = ?3, entitlement_id = ?4, completed_at = ?5
         WHERE idempotency_key = ?1",
        rusqlite::params![
            key,
            status,
            new_balance.map(|b| b as i64),
            entitlement_id,
            now as i64,
        ],
    )?;
    Ok(())
}

/// Drop an attempt row whose run changed no state, so a later retry with
/// the same key re-executes.
pub fn discard(conn: &Connection, key: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM purchase_attempts WHERE idempotency_key = ?1",
        [key],
    )?;
    Ok(())
}

fn row_from_sql(row: &rusqlite::Row<'_>) -> std::result::Result<AttemptRow, rusqlite::Error> {
    let method_str: String = row.get(3)?;
    let method = PaymentMethod::parse(&method_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown payment method: {method_str}").into(),
        )
    })?;
    Ok(AttemptRow {
        idempotency_key: row.get(0)?,
        user_id: row.get::<_, i64>(1)? as u64,
        package_id: row.get::<_, i64>(2)? as u64,
        method,
        status: row.get(4)?,
        new_balance: row.get::<_, Option<i64>>(5)?.map(|b| b as u64),
        entitlement_id: row.get(6)?,
        created_at: row.get::<_, i64>(7)? as u64,
        completed_at: row.get::<_, Option<i64>>(8)?.map(|t| t as u64),
    })
}
