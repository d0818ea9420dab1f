//! # aula-redeem
//!
//! Activation code service: admin generation, eligibility validation,
//! and exactly-once redemption of single-use voucher codes.
//!
//! ## Redemption flow
//!
//! 1. The caller validates the code against the student's grade, the
//!    requested package, expiry, and prior purchases. Validation is
//!    read-only and advisory — it holds no reservation.
//! 2. The caller redeems the code. The unused -> used flip is a single
//!    conditional update; losing it (zero affected rows) is reported as
//!    [`RedeemError::RedeemConflict`]. This update is the only
//!    single-use guarantee in the system.
//! 3. If a later purchase step fails, the orchestrator releases the
//!    code, reverting it to unused for a fresh attempt.

use aula_db::queries::{codes, entitlements, packages, profiles};
use aula_db::{Db, DbError};
use aula_types::{CodeId, PackageId, UserId};
use rand::Rng;
use tracing::{info, warn};

pub use aula_db::queries::codes::CodeRow;

/// Error types for code operations.
#[derive(Debug, thiserror::Error)]
pub enum RedeemError {
    /// No code with this token exists.
    #[error("unknown activation code")]
    UnknownCode,

    /// The code was already redeemed by this same user.
    #[error("code already redeemed by this account")]
    AlreadyRedeemedBySelf,

    /// The code was already redeemed by a different user.
    #[error("code already redeemed by another account")]
    AlreadyRedeemedByOther,

    /// The code is scoped to a different grade.
    #[error("code is for grade {code_grade}, student is grade {student_grade}")]
    GradeMismatch {
        code_grade: String,
        student_grade: String,
    },

    /// The code is scoped to a different package.
    #[error("code is for package {code_package}, requested package {requested}")]
    PackageMismatch {
        code_package: PackageId,
        requested: PackageId,
    },

    /// The code expired before redemption.
    #[error("code expired at {expired_at}")]
    Expired { expired_at: u64 },

    /// The user already holds (or previously redeemed a code for) this
    /// package.
    #[error("user already entitled to this package")]
    AlreadyEntitled,

    /// No profile exists for the user, so grade eligibility cannot be
    /// checked.
    #[error("no profile for user {user_id}")]
    ProfileNotFound { user_id: UserId },

    /// Lost the unused -> used race to a concurrent redeemer.
    #[error("code was redeemed concurrently")]
    RedeemConflict,

    /// Code generation could not find a free token.
    #[error("could not generate a unique code after {attempts} attempts")]
    GenerationExhausted { attempts: u32 },

    /// Underlying store failure.
    #[error("store error: {0}")]
    Store(#[from] DbError),
}

/// Convenience result type for code operations.
pub type Result<T> = std::result::Result<T, RedeemError>;

/// A code that passed validation, carrying what the orchestrator needs
/// for the redemption step.
#[derive(Debug, Clone)]
pub struct ValidatedCode {
    pub id: CodeId,
    pub code: String,
    /// `None` means the code is valid for any package of its grade.
    pub package_id: Option<PackageId>,
    pub grade: String,
}

/// Alphabet for generated codes: no 0/O, 1/I/L ambiguity.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Generated token shape: two 4-character groups.
const CODE_GROUP_LEN: usize = 4;
const CODE_GROUPS: usize = 2;

/// Retries per code before giving up on token collisions.
const MAX_GENERATION_ATTEMPTS: u32 = 8;

/// The activation code service.
#[derive(Clone)]
pub struct CodeService {
    db: Db,
}

impl CodeService {
    /// Create a code service over a shared store handle.
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Mint a batch of unused codes (admin operation).
    ///
    /// `package_id = None` produces codes valid for any package of the
    /// grade. Returns the generated tokens.
    pub async fn generate(
        &self,
        count: u32,
        grade: &str,
        package_id: Option<PackageId>,
        expires_at: Option<u64>,
    ) -> Result<Vec<String>> {
        let now = aula_types::unix_now();
        let conn = self.db.lock().await;

        // A scoped code must point at a real package; otherwise every
        // insert would fail its foreign key and read like a collision.
        if let Some(pid) = package_id {
            if packages::get(&conn, pid)?.is_none() {
                return Err(RedeemError::Store(DbError::NotFound(format!(
                    "package {pid}"
                ))));
            }
        }

        let mut tokens = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let mut attempts = 0;
            let token = loop {
                let candidate = random_token();
                match codes::insert(&conn, &candidate, package_id, grade, expires_at, now) {
                    Ok(_) => break candidate,
                    Err(DbError::Constraint(_)) => {
                        attempts += 1;
                        if attempts >= MAX_GENERATION_ATTEMPTS {
                            return Err(RedeemError::GenerationExhausted { attempts });
                        }
                    }
                    Err(e) => return Err(e.into()),
                }
            };
            tokens.push(token);
        }

        info!(count, grade, ?package_id, "activation codes generated");
        Ok(tokens)
    }

    /// Validate a code for a user and package.
    ///
    /// Read-only; checks run in a fixed order so the caller always sees
    /// the most specific failure. Passing validation guarantees nothing
    /// about a later [`redeem`](Self::redeem) — the conditional update
    /// there is the only authority.
    pub async fn validate(
        &self,
        code: &str,
        user_id: UserId,
        package_id: PackageId,
        now: u64,
    ) -> Result<ValidatedCode> {
        let conn = self.db.lock().await;

        let row = codes::find_by_code(&conn, code)?.ok_or(RedeemError::UnknownCode)?;

        let profile =
            profiles::get(&conn, user_id)?.ok_or(RedeemError::ProfileNotFound { user_id })?;

        check_code(&row, &profile.grade, user_id, package_id, now)?;

        // Prior-purchase checks: an active entitlement of any source, or
        // any code-sourced history for this package, blocks redemption.
        if entitlements::active_for(&conn, user_id, package_id, now)?.is_some()
            || entitlements::has_code_history(&conn, user_id, package_id)?
        {
            return Err(RedeemError::AlreadyEntitled);
        }

        Ok(ValidatedCode {
            id: row.id,
            code: row.code,
            package_id: row.package_id,
            grade: row.grade,
        })
    }

    /// Redeem a code: atomically flip it unused -> used for this user.
    pub async fn redeem(&self, code_id: CodeId, user_id: UserId, now: u64) -> Result<()> {
        let conn = self.db.lock().await;
        if codes::try_redeem(&conn, code_id, user_id, now)? {
            info!(code_id, user_id, "activation code redeemed");
            Ok(())
        } else {
            warn!(code_id, user_id, "lost redemption race");
            Err(RedeemError::RedeemConflict)
        }
    }

    /// Compensation: revert a code this user redeemed back to unused.
    ///
    /// Returns `true` if a row was reverted.
    pub async fn release(&self, code_id: CodeId, user_id: UserId) -> Result<bool> {
        let conn = self.db.lock().await;
        let released = codes::release(&conn, code_id, user_id)?;
        if released {
            info!(code_id, user_id, "activation code released");
        } else {
            warn!(code_id, user_id, "release found code not held by user");
        }
        Ok(released)
    }

    /// Look up a code by token (admin surface).
    pub async fn find(&self, code: &str) -> Result<Option<CodeRow>> {
        let conn = self.db.lock().await;
        Ok(codes::find_by_code(&conn, code)?)
    }

    /// List recently created codes (admin surface).
    pub async fn list(&self, limit: u32) -> Result<Vec<CodeRow>> {
        let conn = self.db.lock().await;
        Ok(codes::list(&conn, limit)?)
    }
}

/// Pure eligibility checks against a loaded code row, in reporting order:
/// usage, grade, package scope, expiry.
fn check_code(
    row: &CodeRow,
    student_grade: &str,
    user_id: UserId,
    package_id: PackageId,
    now: u64,
) -> Result<()> {
    if row.is_used {
        return if row.used_by == Some(user_id) {
            Err(RedeemError::AlreadyRedeemedBySelf)
        } else {
            Err(RedeemError::AlreadyRedeemedByOther)
        };
    }

    if row.grade != student_grade {
        return Err(RedeemError::GradeMismatch {
            code_grade: row.grade.clone(),
            student_grade: student_grade.to_string(),
        });
    }

    // A package-scoped code must match the requested package; an
    // unscoped code works for any package of the grade.
    if let Some(code_package) = row.package_id {
        if code_package != package_id {
            return Err(RedeemError::PackageMismatch {
                code_package,
                requested: package_id,
            });
        }
    }

    if let Some(expires_at) = row.expires_at {
        if now >= expires_at {
            return Err(RedeemError::Expired {
                expired_at: expires_at,
            });
        }
    }

    Ok(())
}

/// Generate a random human-typed token like `X7Q2-M9KP`.
fn random_token() -> String {
    let mut rng = rand::thread_rng();
    let mut token = String::with_capacity(CODE_GROUPS * CODE_GROUP_LEN + CODE_GROUPS - 1);
    for group in 0..CODE_GROUPS {
        if group > 0 {
            token.push('-');
        }
        for _ in 0..CODE_GROUP_LEN {
            let idx = rng.gen_range(0..CODE_ALPHABET.len());
            token.push(CODE_ALPHABET[idx] as char);
        }
    }
    token
}

#[cfg(test)]
mod tests {
    use super::*;
    use aula_db::queries::{entitlements, packages, profiles};
    use aula_types::EntitlementSource;

    const NOW: u64 = 1_700_000_000;

    fn make_row(package_id: Option<PackageId>) -> CodeRow {
        CodeRow {
            id: 1,
            code: "X7Q2-M9KP".to_string(),
            package_id,
            grade: "first".to_string(),
            is_used: false,
            used_by: None,
            used_at: None,
            expires_at: Some(NOW + 1000),
            created_at: NOW - 1000,
        }
    }

    #[test]
    fn test_check_code_valid() {
        let row = make_row(Some(3));
        check_code(&row, "first", 7, 3, NOW).expect("valid");
    }

    #[test]
    fn test_check_code_used_by_self_vs_other() {
        let mut row = make_row(None);
        row.is_used = true;
        row.used_by = Some(7);
        row.used_at = Some(NOW - 10);

        assert!(matches!(
            check_code(&row, "first", 7, 3, NOW),
            Err(RedeemError::AlreadyRedeemedBySelf)
        ));
        assert!(matches!(
            check_code(&row, "first", 8, 3, NOW),
            Err(RedeemError::AlreadyRedeemedByOther)
        ));
    }

    #[test]
    fn test_check_code_grade_mismatch() {
        let row = make_row(None);
        let err = check_code(&row, "third", 7, 3, NOW).expect_err("mismatch");
        assert!(matches!(err, RedeemError::GradeMismatch { .. }));
    }

    #[test]
    fn test_check_code_package_scope() {
        let row = make_row(Some(3));
        assert!(matches!(
            check_code(&row, "first", 7, 4, NOW),
            Err(RedeemError::PackageMismatch {
                code_package: 3,
                requested: 4
            })
        ));

        // Unscoped code accepts any package of the grade.
        let row = make_row(None);
        check_code(&row, "first", 7, 4, NOW).expect("unscoped ok");
    }

    #[test]
    fn test_check_code_expiry() {
        let row = make_row(None);
        check_code(&row, "first", 7, 3, NOW + 999).expect("still valid");
        assert!(matches!(
            check_code(&row, "first", 7, 3, NOW + 1000),
            Err(RedeemError::Expired { .. })
        ));

        // No expiry set means the code never expires.
        let mut row = make_row(None);
        row.expires_at = None;
        check_code(&row, "first", 7, 3, u64::MAX).expect("no expiry");
    }

    #[test]
    fn test_usage_reported_before_grade() {
        // A used code reports usage even when the grade also mismatches.
        let mut row = make_row(None);
        row.is_used = true;
        row.used_by = Some(9);
        assert!(matches!(
            check_code(&row, "third", 7, 3, NOW),
            Err(RedeemError::AlreadyRedeemedByOther)
        ));
    }

    #[test]
    fn test_random_token_shape() {
        for _ in 0..100 {
            let token = random_token();
            assert_eq!(token.len(), 9);
            let parts: Vec<&str> = token.split('-').collect();
            assert_eq!(parts.len(), 2);
            for part in parts {
                assert_eq!(part.len(), 4);
                for b in part.bytes() {
                    assert!(CODE_ALPHABET.contains(&b), "unexpected char in {token}");
                }
            }
        }
    }

    // Service-level tests over an in-memory store.

    fn service() -> (CodeService, Db) {
        let conn = aula_db::open_memory().expect("open test db");
        let db = aula_db::into_shared(conn);
        (CodeService::new(db.clone()), db)
    }

    async fn seed(db: &Db) -> PackageId {
        let conn = db.lock().await;
        profiles::upsert(&conn, 7, "Sara", "first", NOW).expect("profile");
        packages::insert(&conn, "Algebra", "first", 300, 30, NOW).expect("package") as u64
    }

    #[tokio::test]
    async fn test_generate_and_validate() {
        let (service, db) = service();
        let pkg = seed(&db).await;

        let tokens = service
            .generate(3, "first", Some(pkg), Some(NOW + 1000))
            .await
            .expect("generate");
        assert_eq!(tokens.len(), 3);

        let validated = service
            .validate(&tokens[0], 7, pkg, NOW)
            .await
            .expect("validate");
        assert_eq!(validated.package_id, Some(pkg));
        assert_eq!(validated.grade, "first");
    }

    #[tokio::test]
    async fn test_validate_unknown_code() {
        let (service, db) = service();
        let pkg = seed(&db).await;

        let err = service
            .validate("ZZZZ-ZZZZ", 7, pkg, NOW)
            .await
            .expect_err("unknown");
        assert!(matches!(err, RedeemError::UnknownCode));
    }

    #[tokio::test]
    async fn test_validate_missing_profile() {
        let (service, db) = service();
        let pkg = seed(&db).await;
        let tokens = service
            .generate(1, "first", Some(pkg), None)
            .await
            .expect("generate");

        let err = service
            .validate(&tokens[0], 99, pkg, NOW)
            .await
            .expect_err("no profile");
        assert!(matches!(err, RedeemError::ProfileNotFound { user_id: 99 }));
    }

    #[tokio::test]
    async fn test_validate_blocks_prior_purchase() {
        let (service, db) = service();
        let pkg = seed(&db).await;
        let tokens = service
            .generate(2, "first", Some(pkg), None)
            .await
            .expect("generate");

        {
            let conn = db.lock().await;
            entitlements::insert(&conn, 7, pkg, NOW, NOW + 1000, EntitlementSource::Wallet)
                .expect("entitlement");
        }

        let err = service
            .validate(&tokens[0], 7, pkg, NOW)
            .await
            .expect_err("already entitled");
        assert!(matches!(err, RedeemError::AlreadyEntitled));
    }

    #[tokio::test]
    async fn test_validate_blocks_code_history_even_expired() {
        let (service, db) = service();
        let pkg = seed(&db).await;
        let tokens = service
            .generate(1, "first", Some(pkg), None)
            .await
            .expect("generate");

        {
            let conn = db.lock().await;
            // An old, deactivated code-sourced entitlement.
            let id = entitlements::insert(
                &conn,
                7,
                pkg,
                NOW - 100,
                NOW - 50,
                EntitlementSource::Code,
            )
            .expect("entitlement");
            entitlements::deactivate(&conn, id).expect("deactivate");
        }

        let err = service
            .validate(&tokens[0], 7, pkg, NOW)
            .await
            .expect_err("code history blocks");
        assert!(matches!(err, RedeemError::AlreadyEntitled));
    }

    #[tokio::test]
    async fn test_redeem_then_conflict() {
        let (service, db) = service();
        let pkg = seed(&db).await;
        let tokens = service
            .generate(1, "first", Some(pkg), None)
            .await
            .expect("generate");
        let validated = service
            .validate(&tokens[0], 7, pkg, NOW)
            .await
            .expect("validate");

        service.redeem(validated.id, 7, NOW).await.expect("redeem");

        let err = service
            .redeem(validated.id, 8, NOW)
            .await
            .expect_err("second redeem");
        assert!(matches!(err, RedeemError::RedeemConflict));
    }

    #[tokio::test]
    async fn test_release_roundtrip() {
        let (service, db) = service();
        let pkg = seed(&db).await;
        let tokens = service
            .generate(1, "first", Some(pkg), None)
            .await
            .expect("generate");
        let validated = service
            .validate(&tokens[0], 7, pkg, NOW)
            .await
            .expect("validate");

        service.redeem(validated.id, 7, NOW).await.expect("redeem");
        assert!(service.release(validated.id, 7).await.expect("release"));

        // The code is redeemable again after release.
        service.redeem(validated.id, 8, NOW).await.expect("re-redeem");
    }
}
