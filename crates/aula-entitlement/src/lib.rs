//! # aula-entitlement
//!
//! Entitlement service: time-boxed package grants with the
//! "at most one active entitlement per (user, package)" invariant.
//!
//! A grant runs inside one store transaction: stale active flags are
//! cleared, the live-entitlement check runs, and the insert lands — with
//! the partial unique index as the store-level backstop should two
//! grants race anyway. Either path reports [`EntitlementError::Conflict`]
//! to the loser.

use std::sync::Arc;

use aula_db::queries::entitlements;
use aula_db::{Db, DbError};
use aula_types::{
    EntitlementId, EntitlementSource, PackageId, UserId, SECONDS_PER_DAY,
};
use tracing::{info, warn};

pub use aula_db::queries::entitlements::EntitlementRow;

/// Error types for entitlement operations.
#[derive(Debug, thiserror::Error)]
pub enum EntitlementError {
    /// The user already holds an active, non-expired entitlement for
    /// this package.
    #[error("active entitlement already exists for user {user_id}, package {package_id}")]
    Conflict {
        user_id: UserId,
        package_id: PackageId,
    },

    /// No entitlement with this id.
    #[error("entitlement {id} not found")]
    NotFound { id: EntitlementId },

    /// Underlying store failure.
    #[error("store error: {0}")]
    Store(#[from] DbError),
}

/// Convenience result type for entitlement operations.
pub type Result<T> = std::result::Result<T, EntitlementError>;

/// Fire-and-forget notification receiver.
///
/// Implementations must never block or fail the caller; delivery
/// problems are theirs to log and swallow.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, user_id: UserId, title: &str, message: &str, kind: &str);
}

/// A sink that drops every notification. Useful in tests and tools.
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, _user_id: UserId, _title: &str, _message: &str, _kind: &str) {}
}

/// The entitlement service.
#[derive(Clone)]
pub struct EntitlementService {
    db: Db,
    sink: Arc<dyn NotificationSink>,
}

impl EntitlementService {
    /// Create an entitlement service over a shared store handle and a
    /// notification sink.
    pub fn new(db: Db, sink: Arc<dyn NotificationSink>) -> Self {
        Self { db, sink }
    }

    /// Grant a time-boxed entitlement.
    ///
    /// This is the authoritative check for the one-active-entitlement
    /// invariant; callers that skipped their own advisory checks still
    /// get a correct [`EntitlementError::Conflict`] here.
    pub async fn grant(
        &self,
        user_id: UserId,
        package_id: PackageId,
        duration_days: u64,
        source: EntitlementSource,
        now: u64,
    ) -> Result<EntitlementRow> {
        let expires_at = now + duration_days * SECONDS_PER_DAY;

        let row = {
            let conn = self.db.lock().await;
            let tx = conn.unchecked_transaction().map_err(DbError::Sqlite)?;

            // Entitlements expire by time; the flag is only cleared
            // lazily, here, so the unique index guards live rows.
            entitlements::deactivate_expired(&tx, user_id, package_id, now)?;

            if entitlements::active_for(&tx, user_id, package_id, now)?.is_some() {
                return Err(EntitlementError::Conflict {
                    user_id,
                    package_id,
                });
            }

            let id = entitlements::insert(&tx, user_id, package_id, now, expires_at, source)
                .map_err(|e| match e {
                    DbError::Constraint(_) => EntitlementError::Conflict {
                        user_id,
                        package_id,
                    },
                    other => EntitlementError::Store(other),
                })?;

            let row = entitlements::get(&tx, id)?
                .ok_or_else(|| DbError::NotFound(format!("entitlement {id} after insert")))?;

            tx.commit().map_err(DbError::Sqlite)?;
            row
        };

        info!(
            user_id,
            package_id,
            expires_at,
            source = source.as_str(),
            "entitlement granted"
        );

        // Best-effort notification; the grant already committed.
        self.sink.notify(
            user_id,
            "Package activated",
            &format!("Package {package_id} is now available until {expires_at}."),
            "purchase",
        );

        Ok(row)
    }

    /// The active, non-expired entitlement for a `(user, package)` pair,
    /// if any.
    pub async fn active_for(
        &self,
        user_id: UserId,
        package_id: PackageId,
        now: u64,
    ) -> Result<Option<EntitlementRow>> {
        let conn = self.db.lock().await;
        Ok(entitlements::active_for(&conn, user_id, package_id, now)?)
    }

    /// All of a user's entitlements, newest first.
    pub async fn list_for_user(&self, user_id: UserId) -> Result<Vec<EntitlementRow>> {
        let conn = self.db.lock().await;
        Ok(entitlements::list_for_user(&conn, user_id)?)
    }

    /// Whether the user ever redeemed a code for this package.
    pub async fn has_code_history(&self, user_id: UserId, package_id: PackageId) -> Result<bool> {
        let conn = self.db.lock().await;
        Ok(entitlements::has_code_history(&conn, user_id, package_id)?)
    }

    /// Explicitly revoke an entitlement (admin operation).
    pub async fn deactivate(&self, id: EntitlementId) -> Result<()> {
        let conn = self.db.lock().await;
        if entitlements::deactivate(&conn, id)? {
            info!(entitlement_id = id, "entitlement deactivated");
            Ok(())
        } else {
            warn!(entitlement_id = id, "deactivate found no active entitlement");
            Err(EntitlementError::NotFound { id })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aula_db::queries::packages;
    use std::sync::Mutex;

    const NOW: u64 = 1_700_000_000;

    /// Sink that records notifications for assertions.
    struct RecordingSink {
        seen: Mutex<Vec<(UserId, String)>>,
    }

    impl NotificationSink for RecordingSink {
        fn notify(&self, user_id: UserId, title: &str, _message: &str, _kind: &str) {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push((user_id, title.to_string()));
            }
        }
    }

    async fn setup() -> (EntitlementService, Db, Arc<RecordingSink>, PackageId) {
        let conn = aula_db::open_memory().expect("open test db");
        let pkg = packages::insert(&conn, "Algebra", "first", 300, 30, NOW).expect("package") as u64;
        let db = aula_db::into_shared(conn);
        let sink = Arc::new(RecordingSink {
            seen: Mutex::new(Vec::new()),
        });
        let service = EntitlementService::new(db.clone(), sink.clone());
        (service, db, sink, pkg)
    }

    #[tokio::test]
    async fn test_grant_sets_expiry() {
        let (service, _db, _sink, pkg) = setup().await;

        let row = service
            .grant(1, pkg, 30, EntitlementSource::Wallet, NOW)
            .await
            .expect("grant");
        assert_eq!(row.expires_at, NOW + 30 * SECONDS_PER_DAY);
        assert!(row.is_active);
        assert_eq!(row.source, EntitlementSource::Wallet);

        let active = service
            .active_for(1, pkg, NOW)
            .await
            .expect("query")
            .expect("active");
        assert_eq!(active.id, row.id);
    }

    #[tokio::test]
    async fn test_grant_conflict_while_active() {
        let (service, _db, _sink, pkg) = setup().await;

        service
            .grant(1, pkg, 30, EntitlementSource::Wallet, NOW)
            .await
            .expect("first grant");

        let err = service
            .grant(1, pkg, 30, EntitlementSource::Code, NOW + 10)
            .await
            .expect_err("second grant");
        assert!(matches!(err, EntitlementError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_grant_after_natural_expiry() {
        let (service, _db, _sink, pkg) = setup().await;

        service
            .grant(1, pkg, 30, EntitlementSource::Wallet, NOW)
            .await
            .expect("first grant");

        // Past expiry the stale flag is cleared and the grant succeeds.
        let later = NOW + 31 * SECONDS_PER_DAY;
        let row = service
            .grant(1, pkg, 30, EntitlementSource::Wallet, later)
            .await
            .expect("re-grant");
        assert_eq!(row.purchased_at, later);

        // The old row is gone from the active view but kept in history.
        let all = service.list_for_user(1).await.expect("list");
        assert_eq!(all.len(), 2);
        assert_eq!(all.iter().filter(|e| e.is_active).count(), 1);
    }

    #[tokio::test]
    async fn test_grant_independent_pairs() {
        let (service, db, _sink, pkg) = setup().await;
        let pkg2 = {
            let conn = db.lock().await;
            packages::insert(&conn, "Geometry", "first", 200, 30, NOW).expect("package") as u64
        };

        service
            .grant(1, pkg, 30, EntitlementSource::Wallet, NOW)
            .await
            .expect("grant user 1");
        service
            .grant(2, pkg, 30, EntitlementSource::Wallet, NOW)
            .await
            .expect("grant user 2");
        service
            .grant(1, pkg2, 30, EntitlementSource::Code, NOW)
            .await
            .expect("grant other package");
    }

    #[tokio::test]
    async fn test_grant_notifies() {
        let (service, _db, sink, pkg) = setup().await;

        service
            .grant(1, pkg, 30, EntitlementSource::Code, NOW)
            .await
            .expect("grant");

        let seen = sink.seen.lock().expect("lock");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, 1);
        assert_eq!(seen[0].1, "Package activated");
    }

    #[tokio::test]
    async fn test_conflict_does_not_notify() {
        let (service, _db, sink, pkg) = setup().await;

        service
            .grant(1, pkg, 30, EntitlementSource::Wallet, NOW)
            .await
            .expect("grant");
        let _ = service
            .grant(1, pkg, 30, EntitlementSource::Wallet, NOW)
            .await
            .expect_err("conflict");

        assert_eq!(sink.seen.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn test_deactivate() {
        let (service, _db, _sink, pkg) = setup().await;

        let row = service
            .grant(1, pkg, 30, EntitlementSource::Wallet, NOW)
            .await
            .expect("grant");

        service.deactivate(row.id).await.expect("deactivate");
        assert!(service
            .active_for(1, pkg, NOW)
            .await
            .expect("query")
            .is_none());

        let err = service.deactivate(row.id).await.expect_err("already inactive");
        assert!(matches!(err, EntitlementError::NotFound { .. }));
    }
}
