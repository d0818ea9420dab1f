//! # aula-wallet
//!
//! Prepaid wallet service: atomic debit/credit against a student's
//! balance with an append-only transaction ledger.
//!
//! Every debit is a single conditional update at the store — the
//! `balance >= amount` predicate is evaluated by SQLite at write time, so
//! two concurrent debits can never both succeed when only one would
//! leave a non-negative balance. The balance mutation and its ledger
//! entry commit in one store transaction.

use aula_db::queries::{transactions, wallets};
use aula_db::{Db, DbError};
use aula_types::{Credits, TransactionKind, TxId, UserId};
use tracing::info;

/// Error types for wallet operations.
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    /// The wallet holds less than the requested debit.
    #[error("insufficient funds: have {available}, need {required}")]
    InsufficientFunds {
        /// Current balance in credits.
        available: Credits,
        /// Requested debit amount in credits.
        required: Credits,
    },

    /// No wallet exists for the user; wallets are provisioned at account
    /// creation.
    #[error("wallet not found for user {user_id}")]
    WalletNotFound { user_id: UserId },

    /// Debits and credits must move a positive amount.
    #[error("amount must be positive")]
    ZeroAmount,

    /// Underlying store failure.
    #[error("store error: {0}")]
    Store(#[from] DbError),
}

/// Convenience result type for wallet operations.
pub type Result<T> = std::result::Result<T, WalletError>;

/// Receipt for a successful balance mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletReceipt {
    pub previous_balance: Credits,
    pub new_balance: Credits,
    /// Ledger row id of the recorded transaction.
    pub tx_id: TxId,
}

/// The wallet service. Cheap to clone; all clones share the injected
/// store handle.
#[derive(Clone)]
pub struct WalletService {
    db: Db,
}

impl WalletService {
    /// Create a wallet service over a shared store handle.
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Provision a zero-balance wallet for a new user. Idempotent.
    pub async fn provision(&self, user_id: UserId) -> Result<()> {
        let now = aula_types::unix_now();
        let conn = self.db.lock().await;
        let created = wallets::create(&conn, user_id, now)?;
        if created {
            info!(user_id, "wallet provisioned");
        }
        Ok(())
    }

    /// Current balance.
    pub async fn balance(&self, user_id: UserId) -> Result<Credits> {
        let conn = self.db.lock().await;
        wallets::balance(&conn, user_id)?.ok_or(WalletError::WalletNotFound { user_id })
    }

    /// Atomically debit a wallet and append the ledger entry.
    ///
    /// `kind` is [`TransactionKind::Deduct`] for plain debits and
    /// [`TransactionKind::Purchase`] when invoked from a purchase.
    pub async fn debit(
        &self,
        user_id: UserId,
        amount: Credits,
        kind: TransactionKind,
        description: &str,
    ) -> Result<WalletReceipt> {
        if amount == 0 {
            return Err(WalletError::ZeroAmount);
        }
        let now = aula_types::unix_now();

        let conn = self.db.lock().await;
        let tx = conn.unchecked_transaction().map_err(DbError::Sqlite)?;

        let (previous_balance, new_balance) =
            match wallets::try_debit(&tx, user_id, amount, now)? {
                wallets::DebitOutcome::Applied {
                    previous_balance,
                    new_balance,
                } => (previous_balance, new_balance),
                wallets::DebitOutcome::Insufficient { available } => {
                    return Err(WalletError::InsufficientFunds {
                        available,
                        required: amount,
                    });
                }
                wallets::DebitOutcome::NoWallet => {
                    return Err(WalletError::WalletNotFound { user_id });
                }
            };

        let tx_id = transactions::append(
            &tx,
            user_id,
            -(amount as i64),
            kind,
            description,
            previous_balance,
            new_balance,
            now,
        )?;

        tx.commit().map_err(DbError::Sqlite)?;

        info!(user_id, amount, new_balance, "wallet debited");
        Ok(WalletReceipt {
            previous_balance,
            new_balance,
            tx_id,
        })
    }

    /// Unconditionally credit a wallet and append the ledger entry.
    ///
    /// Admin top-ups and purchase compensation both land here; the
    /// distinction lives in the description. Never retried blindly.
    pub async fn credit(
        &self,
        user_id: UserId,
        amount: Credits,
        description: &str,
    ) -> Result<WalletReceipt> {
        if amount == 0 {
            return Err(WalletError::ZeroAmount);
        }
        let now = aula_types::unix_now();

        let conn = self.db.lock().await;
        let tx = conn.unchecked_transaction().map_err(DbError::Sqlite)?;

        let (previous_balance, new_balance) = wallets::credit(&tx, user_id, amount, now)?
            .ok_or(WalletError::WalletNotFound { user_id })?;

        let tx_id = transactions::append(
            &tx,
            user_id,
            amount as i64,
            TransactionKind::Add,
            description,
            previous_balance,
            new_balance,
            now,
        )?;

        tx.commit().map_err(DbError::Sqlite)?;

        info!(user_id, amount, new_balance, "wallet credited");
        Ok(WalletReceipt {
            previous_balance,
            new_balance,
            tx_id,
        })
    }

    /// Recent ledger entries, newest first.
    pub async fn transactions(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<transactions::TransactionRow>> {
        let conn = self.db.lock().await;
        Ok(transactions::recent(&conn, user_id, limit)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> WalletService {
        let conn = aula_db::open_memory().expect("open test db");
        WalletService::new(aula_db::into_shared(conn))
    }

    #[tokio::test]
    async fn test_provision_and_balance() {
        let wallet = service();
        wallet.provision(1).await.expect("provision");
        assert_eq!(wallet.balance(1).await.expect("balance"), 0);

        // Provisioning twice is harmless.
        wallet.provision(1).await.expect("re-provision");
        assert_eq!(wallet.balance(1).await.expect("balance"), 0);
    }

    #[tokio::test]
    async fn test_balance_unknown_user() {
        let wallet = service();
        let err = wallet.balance(9).await.expect_err("no wallet");
        assert!(matches!(err, WalletError::WalletNotFound { user_id: 9 }));
    }

    #[tokio::test]
    async fn test_credit_then_debit() {
        let wallet = service();
        wallet.provision(1).await.expect("provision");

        let receipt = wallet.credit(1, 500, "top-up").await.expect("credit");
        assert_eq!(receipt.previous_balance, 0);
        assert_eq!(receipt.new_balance, 500);

        let receipt = wallet
            .debit(1, 300, TransactionKind::Purchase, "package purchase")
            .await
            .expect("debit");
        assert_eq!(receipt.previous_balance, 500);
        assert_eq!(receipt.new_balance, 200);

        assert_eq!(wallet.balance(1).await.expect("balance"), 200);
    }

    #[tokio::test]
    async fn test_debit_insufficient_leaves_balance() {
        let wallet = service();
        wallet.provision(1).await.expect("provision");
        wallet.credit(1, 100, "top-up").await.expect("credit");

        let err = wallet
            .debit(1, 300, TransactionKind::Purchase, "package purchase")
            .await
            .expect_err("insufficient");
        assert!(matches!(
            err,
            WalletError::InsufficientFunds {
                available: 100,
                required: 300
            }
        ));

        assert_eq!(wallet.balance(1).await.expect("balance"), 100);
        // No ledger entry for the failed debit.
        let txs = wallet.transactions(1, 10).await.expect("txs");
        assert_eq!(txs.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_amount_rejected() {
        let wallet = service();
        wallet.provision(1).await.expect("provision");

        assert!(matches!(
            wallet.credit(1, 0, "nothing").await,
            Err(WalletError::ZeroAmount)
        ));
        assert!(matches!(
            wallet.debit(1, 0, TransactionKind::Deduct, "nothing").await,
            Err(WalletError::ZeroAmount)
        ));
    }

    #[tokio::test]
    async fn test_ledger_records_both_sides() {
        let wallet = service();
        wallet.provision(1).await.expect("provision");
        wallet.credit(1, 500, "top-up").await.expect("credit");
        wallet
            .debit(1, 200, TransactionKind::Deduct, "correction")
            .await
            .expect("debit");

        let txs = wallet.transactions(1, 10).await.expect("txs");
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].amount, -200);
        assert_eq!(txs[0].kind, TransactionKind::Deduct);
        assert_eq!(txs[1].amount, 500);
        assert_eq!(txs[1].kind, TransactionKind::Add);
        // Each entry chains previous -> new.
        assert_eq!(txs[1].new_balance, txs[0].previous_balance);
    }
}
