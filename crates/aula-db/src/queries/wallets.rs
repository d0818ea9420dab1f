//! Wallet balance queries.
//!
//! The balance column is mutated only here, and only through conditional
//! updates: the `WHERE balance >= amount` predicate is what serializes
//! concurrent debits and keeps the balance non-negative. A read followed
//! by a separate write is never used.

use aula_types::{Credits, UserId};
use rusqlite::Connection;

use crate::Result;

/// Outcome of a conditional debit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    /// The debit was applied.
    Applied {
        previous_balance: Credits,
        new_balance: Credits,
    },
    /// The wallet exists but holds less than the requested amount.
    Insufficient { available: Credits },
    /// No wallet row exists for this user.
    NoWallet,
}

/// Create a zero-balance wallet for a user. Returns `false` if one
/// already existed.
pub fn create(conn: &Connection, user_id: UserId, now: u64) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO wallets (user_id, balance, updated_at) VALUES (?1, 0, ?2)",
        rusqlite::params![user_id as i64, now as i64],
    )?;
    Ok(inserted == 1)
}

/// Get a wallet balance. `None` if the wallet does not exist.
pub fn balance(conn: &Connection, user_id: UserId) -> Result<Option<Credits>> {
    let balance = conn
        .query_row(
            "SELECT balance FROM wallets WHERE user_id = ?1",
            [user_id as i64],
            |row| row.get::<_, i64>(0),
        )
        .map(|b| b as u64);

    match balance {
        Ok(b) => Ok(Some(b)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Atomically debit a wallet.
///
/// Single conditional update: the row is decremented only where
/// `balance >= amount` still holds at execution time. Zero affected rows
/// is disambiguated into [`DebitOutcome::Insufficient`] or
/// [`DebitOutcome::NoWallet`] by a follow-up read.
pub fn try_debit(
    conn: &Connection,
    user_id: UserId,
    amount: Credits,
    now: u64,
) -> Result<DebitOutcome> {
    let updated = conn.query_row(
        "UPDATE wallets SET balance = balance - ?2, updated_at = ?3
         WHERE user_id = ?1 AND balance >= ?2
         RETURNING balance",
        rusqlite::params![user_id as i64, amount as i64, now as i64],
        |row| row.get::<_, i64>(0),
    );

    match updated {
        Ok(new_balance) => {
            let new_balance = new_balance as u64;
            Ok(DebitOutcome::Applied {
                previous_balance: new_balance + amount,
                new_balance,
            })
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => match balance(conn, user_id)? {
            Some(available) => Ok(DebitOutcome::Insufficient { available }),
            None => Ok(DebitOutcome::NoWallet),
        },
        Err(e) => Err(e.into()),
    }
}

/// Unconditionally credit a wallet.
///
/// Returns `(previous_balance, new_balance)`, or `None` if the wallet
/// does not exist.
pub fn credit(
    conn: &Connection,
    user_id: UserId,
    amount: Credits,
    now: u64,
) -> Result<Option<(Credits, Credits)>> {
    let updated = conn.query_row(
        "UPDATE wallets SET balance = balance + ?2, updated_at = ?3
         WHERE user_id = ?1
         RETURNING balance",
        rusqlite::params![user_id as i64, amount as i64, now as i64],
        |row| row.get::<_, i64>(0),
    );

    match updated {
        Ok(new_balance) => {
            let new_balance = new_balance as u64;
            Ok(Some((new_balance - amount, new_balance)))
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
