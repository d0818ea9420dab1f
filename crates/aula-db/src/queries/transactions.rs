//! Append-only wallet ledger queries.
//!
//! Rows are written once per successful balance mutation and never
//! updated or deleted. The ledger is for audit and reconciliation; the
//! wallet balance column remains the source of truth.

use aula_types::{Credits, TransactionKind, TxId, UserId};
use rusqlite::Connection;

use crate::{DbError, Result};

/// A wallet ledger row.
#[derive(Debug, Clone)]
pub struct TransactionRow {
    pub id: TxId,
    pub user_id: UserId,
    /// Signed amount; negative = debit.
    pub amount: i64,
    pub kind: TransactionKind,
    pub description: String,
    pub previous_balance: Credits,
    pub new_balance: Credits,
    pub created_at: u64,
}

/// Append a ledger entry. Returns the row id.
#[allow(clippy::too_many_arguments)]
pub fn append(
    conn: &Connection,
    user_id: UserId,
    amount: i64,
    kind: TransactionKind,
    description: &str,
    previous_balance: Credits,
    new_balance: Credits,
    now: u64,
) -> Result<TxId> {
    conn.execute(
        "INSERT INTO wallet_transactions
             (user_id, amount, kind, description, previous_balance, new_balance, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            user_id as i64,
            amount,
            kind.as_str(),
            description,
            previous_balance as i64,
            new_balance as i64,
            now as i64,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// List a user's most recent ledger entries, newest first.
pub fn recent(conn: &Connection, user_id: UserId, limit: u32) -> Result<Vec<TransactionRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, amount, kind, description, previous_balance, new_balance, created_at
         FROM wallet_transactions
         WHERE user_id = ?1
         ORDER BY id DESC LIMIT ?2",
    )?;

    let rows = stmt
        .query_map(rusqlite::params![user_id as i64, limit], row_from_sql)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(DbError::Sqlite)?;

    Ok(rows)
}

fn row_from_sql(row: &rusqlite::Row<'_>) -> std::result::Result<TransactionRow, rusqlite::Error> {
    let kind_str: String = row.get(3)?;
    let kind = TransactionKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown transaction kind: {kind_str}").into(),
        )
    })?;
    Ok(TransactionRow {
        id: row.get(0)?,
        user_id: row.get::<_, i64>(1)? as u64,
        amount: row.get(2)?,
        kind,
        description: row.get(4)?,
        previous_balance: row.get::<_, i64>(5)? as u64,
        new_balance: row.get::<_, i64>(6)? as u64,
        created_at: row.get::<_, i64>(7)? as u64,
    })
}
