//! # aula-purchase
//!
//! Purchase orchestrator: the single entry point that composes the
//! wallet or code-redemption path with the entitlement grant, and owns
//! the compensation logic when a later step fails after an earlier one
//! already moved money or consumed a code.
//!
//! ## State machine
//!
//! Each attempt walks `Started -> FundsOrCodeReserved ->
//! EntitlementGranted -> Completed`, with failure exits from any state.
//! The orchestrator holds no lock and caches no shared state between
//! steps; each step is an atomic primitive at the store, and the only
//! cross-step knowledge is the receipt the previous step returned.
//!
//! ## Compensation
//!
//! If the grant fails after a debit or redemption, the reserved value is
//! returned (credit-back with description "purchase rollback", or the
//! code reverted to unused). Compensation runs on a spawned task so a
//! caller that gives up waiting cannot cancel it mid-flight. If
//! compensation itself fails, the attempt surfaces
//! [`PurchaseError::ManualInterventionRequired`] and logs everything an
//! operator needs to reconcile by hand.

use aula_db::queries::{attempts, entitlements, packages};
use aula_db::{Db, DbError};
use aula_entitlement::{EntitlementError, EntitlementRow, EntitlementService};
use aula_redeem::{CodeService, RedeemError};
use aula_types::{Credits, EntitlementSource, PackageId, PaymentMethod, TransactionKind, UserId};
use aula_wallet::{WalletError, WalletService};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

/// Error types for purchase orchestration.
#[derive(Debug, thiserror::Error)]
pub enum PurchaseError {
    /// No package with this id.
    #[error("unknown package {package_id}")]
    UnknownPackage { package_id: PackageId },

    /// The package exists but is closed for purchase.
    #[error("package {package_id} is not available for purchase")]
    PackageUnavailable { package_id: PackageId },

    /// Method was `code` but no code string was supplied.
    #[error("activation code required for code purchases")]
    MissingCode,

    /// The wallet holds less than the package price.
    #[error("insufficient funds: have {available}, need {required}")]
    InsufficientFunds {
        available: Credits,
        required: Credits,
    },

    /// No wallet exists for the user.
    #[error("wallet not found for user {user_id}")]
    WalletNotFound { user_id: UserId },

    /// The activation code failed validation.
    #[error(transparent)]
    Code(RedeemError),

    /// Lost the redemption race between validation and redeem.
    #[error("code was redeemed concurrently")]
    RedeemConflict,

    /// The grant found an active entitlement; any reserved value was
    /// returned.
    #[error("user already holds an active entitlement for this package")]
    EntitlementConflict,

    /// An earlier attempt with this idempotency key never finished.
    #[error("a purchase attempt with this idempotency key is still in progress")]
    AttemptInProgress,

    /// The purchase failed after the payment step; the reserved funds or
    /// code were returned.
    #[error("purchase failed; reserved funds or code were returned")]
    Failed,

    /// Compensation failed; an operator must reconcile.
    #[error("purchase requires manual reconciliation: {context}")]
    ManualInterventionRequired { context: String },

    /// Underlying store failure.
    #[error("store error: {0}")]
    Store(#[from] DbError),
}

/// Convenience result type for purchase operations.
pub type Result<T> = std::result::Result<T, PurchaseError>;

/// A purchase request as received from the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseRequest {
    pub user_id: UserId,
    pub package_id: PackageId,
    pub method: PaymentMethod,
    /// Required when `method` is [`PaymentMethod::Code`].
    #[serde(default)]
    pub code: Option<String>,
    /// Client-supplied key making retries safe after a timeout.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// The result of a completed purchase.
#[derive(Debug, Clone)]
pub struct PurchaseReceipt {
    /// Wallet balance after the purchase; `None` on the code path.
    pub new_balance: Option<Credits>,
    pub entitlement: EntitlementRow,
}

/// Progress of one purchase attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseState {
    Started,
    FundsOrCodeReserved,
    EntitlementGranted,
    Completed,
}

// Journal statuses for attempts that mutated state.
const STATUS_STARTED: &str = "started";
const STATUS_COMPLETED: &str = "completed";
const STATUS_ENTITLEMENT_CONFLICT: &str = "entitlement_conflict";
const STATUS_FAILED: &str = "failed";
const STATUS_MANUAL: &str = "manual_intervention";

/// The purchase orchestrator.
#[derive(Clone)]
pub struct PurchaseOrchestrator {
    db: Db,
    wallet: WalletService,
    codes: CodeService,
    entitlements: EntitlementService,
}

impl PurchaseOrchestrator {
    /// Create an orchestrator over the three payment services and the
    /// shared store handle (used only for package lookup and the
    /// idempotency journal).
    pub fn new(
        db: Db,
        wallet: WalletService,
        codes: CodeService,
        entitlements: EntitlementService,
    ) -> Self {
        Self {
            db,
            wallet,
            codes,
            entitlements,
        }
    }

    /// Run one purchase attempt.
    ///
    /// With an idempotency key, the attempt is journaled before any
    /// mutation: a resubmitted key replays the recorded outcome instead
    /// of touching balances or codes again. Attempts that failed before
    /// mutating anything release their key so the caller can retry after
    /// fixing the cause (topping up, using another code).
    pub async fn purchase(&self, req: &PurchaseRequest) -> Result<PurchaseReceipt> {
        let Some(key) = req.idempotency_key.as_deref() else {
            return self.execute(req).await;
        };

        let now = aula_types::unix_now();
        {
            let conn = self.db.lock().await;
            let claimed = attempts::insert_started(
                &conn,
                key,
                req.user_id,
                req.package_id,
                req.method,
                now,
            )?;
            if !claimed {
                let row = attempts::get(&conn, key)?.ok_or_else(|| {
                    DbError::NotFound(format!("purchase attempt {key} after claim race"))
                })?;
                return self.replay(&conn, &row);
            }
        }

        let result = self.execute(req).await;
        self.journal_outcome(key, &result).await;
        result
    }

    /// Replay a journaled attempt without re-running it.
    fn replay(
        &self,
        conn: &rusqlite::Connection,
        row: &attempts::AttemptRow,
    ) -> Result<PurchaseReceipt> {
        info!(
            key = %row.idempotency_key,
            status = %row.status,
            "replaying journaled purchase attempt"
        );
        match row.status.as_str() {
            STATUS_STARTED => Err(PurchaseError::AttemptInProgress),
            STATUS_COMPLETED => {
                let id = row.entitlement_id.ok_or_else(|| {
                    DbError::CorruptRow("completed attempt without entitlement id".into())
                })?;
                let entitlement = entitlements::get(conn, id)?.ok_or_else(|| {
                    DbError::NotFound(format!("entitlement {id} for journaled attempt"))
                })?;
                Ok(PurchaseReceipt {
                    new_balance: row.new_balance,
                    entitlement,
                })
            }
            STATUS_ENTITLEMENT_CONFLICT => Err(PurchaseError::EntitlementConflict),
            STATUS_FAILED => Err(PurchaseError::Failed),
            STATUS_MANUAL => Err(PurchaseError::ManualInterventionRequired {
                context: "recorded on an earlier attempt; see operator log".to_string(),
            }),
            other => Err(PurchaseError::Store(DbError::CorruptRow(format!(
                "unknown attempt status: {other}"
            )))),
        }
    }

    /// Record the final state of a keyed attempt.
    ///
    /// Outcomes that changed no state release the key instead, so a
    /// retry re-executes. Journal write failures are logged, not
    /// propagated — the purchase outcome already stands.
    async fn journal_outcome(&self, key: &str, result: &Result<PurchaseReceipt>) {
        let now = aula_types::unix_now();
        let conn = self.db.lock().await;
        let journaled = match result {
            Ok(receipt) => attempts::complete(
                &conn,
                key,
                STATUS_COMPLETED,
                receipt.new_balance,
                Some(receipt.entitlement.id),
                now,
            ),
            Err(PurchaseError::EntitlementConflict) => {
                attempts::complete(&conn, key, STATUS_ENTITLEMENT_CONFLICT, None, None, now)
            }
            Err(PurchaseError::Failed) => {
                attempts::complete(&conn, key, STATUS_FAILED, None, None, now)
            }
            Err(PurchaseError::ManualInterventionRequired { .. }) => {
                attempts::complete(&conn, key, STATUS_MANUAL, None, None, now)
            }
            // Nothing was mutated; free the key for a real retry.
            Err(_) => attempts::discard(&conn, key),
        };
        if let Err(e) = journaled {
            error!(key, error = %e, "failed to journal purchase outcome");
        }
    }

    /// Run the state machine for one attempt.
    async fn execute(&self, req: &PurchaseRequest) -> Result<PurchaseReceipt> {
        let now = aula_types::unix_now();
        let mut state = PurchaseState::Started;
        debug!(user_id = req.user_id, package_id = req.package_id, ?state, "purchase started");

        let package = {
            let conn = self.db.lock().await;
            packages::get(&conn, req.package_id)?.ok_or(PurchaseError::UnknownPackage {
                package_id: req.package_id,
            })?
        };
        if !package.is_active {
            return Err(PurchaseError::PackageUnavailable {
                package_id: req.package_id,
            });
        }

        match req.method {
            PaymentMethod::Wallet => {
                self.wallet_path(req, &package, &mut state, now).await
            }
            PaymentMethod::Code => self.code_path(req, &package, &mut state, now).await,
        }
    }

    /// Wallet path: debit, then grant, compensating the debit if the
    /// grant fails.
    async fn wallet_path(
        &self,
        req: &PurchaseRequest,
        package: &packages::PackageRow,
        state: &mut PurchaseState,
        now: u64,
    ) -> Result<PurchaseReceipt> {
        // Free packages skip the payment step entirely.
        if package.price == 0 {
            let entitlement = self
                .grant_step(req, package, EntitlementSource::Wallet, now, state)
                .await
                .map_err(|e| match e {
                    GrantFailure::Conflict => PurchaseError::EntitlementConflict,
                    GrantFailure::Other(err) => err,
                })?;
            advance(state, PurchaseState::Completed, req);
            return Ok(PurchaseReceipt {
                new_balance: None,
                entitlement,
            });
        }

        let receipt = self
            .wallet
            .debit(
                req.user_id,
                package.price,
                TransactionKind::Purchase,
                &format!("purchase of package {} ({})", package.id, package.name),
            )
            .await
            .map_err(|e| match e {
                WalletError::InsufficientFunds {
                    available,
                    required,
                } => PurchaseError::InsufficientFunds {
                    available,
                    required,
                },
                WalletError::WalletNotFound { user_id } => {
                    PurchaseError::WalletNotFound { user_id }
                }
                WalletError::ZeroAmount => PurchaseError::Failed,
                WalletError::Store(e) => PurchaseError::Store(e),
            })?;
        advance(state, PurchaseState::FundsOrCodeReserved, req);

        match self
            .grant_step(req, package, EntitlementSource::Wallet, now, state)
            .await
        {
            Ok(entitlement) => {
                advance(state, PurchaseState::Completed, req);
                info!(
                    user_id = req.user_id,
                    package_id = req.package_id,
                    new_balance = receipt.new_balance,
                    "purchase completed via wallet"
                );
                Ok(PurchaseReceipt {
                    new_balance: Some(receipt.new_balance),
                    entitlement,
                })
            }
            Err(failure) => {
                self.compensate_debit(req, package.price).await?;
                Err(match failure {
                    GrantFailure::Conflict => PurchaseError::EntitlementConflict,
                    GrantFailure::Other(_) => PurchaseError::Failed,
                })
            }
        }
    }

    /// Code path: validate (advisory), redeem (authoritative), then
    /// grant, releasing the code if the grant fails.
    async fn code_path(
        &self,
        req: &PurchaseRequest,
        package: &packages::PackageRow,
        state: &mut PurchaseState,
        now: u64,
    ) -> Result<PurchaseReceipt> {
        let code = req.code.as_deref().ok_or(PurchaseError::MissingCode)?;

        let validated = self
            .codes
            .validate(code, req.user_id, req.package_id, now)
            .await
            .map_err(map_redeem_error)?;

        self.codes
            .redeem(validated.id, req.user_id, now)
            .await
            .map_err(map_redeem_error)?;
        advance(state, PurchaseState::FundsOrCodeReserved, req);

        match self
            .grant_step(req, package, EntitlementSource::Code, now, state)
            .await
        {
            Ok(entitlement) => {
                advance(state, PurchaseState::Completed, req);
                info!(
                    user_id = req.user_id,
                    package_id = req.package_id,
                    code = %validated.code,
                    "purchase completed via activation code"
                );
                Ok(PurchaseReceipt {
                    new_balance: None,
                    entitlement,
                })
            }
            Err(failure) => {
                self.compensate_code(req, validated.id).await?;
                Err(match failure {
                    GrantFailure::Conflict => PurchaseError::EntitlementConflict,
                    GrantFailure::Other(_) => PurchaseError::Failed,
                })
            }
        }
    }

    /// The entitlement grant step shared by both paths.
    async fn grant_step(
        &self,
        req: &PurchaseRequest,
        package: &packages::PackageRow,
        source: EntitlementSource,
        now: u64,
        state: &mut PurchaseState,
    ) -> std::result::Result<EntitlementRow, GrantFailure> {
        match self
            .entitlements
            .grant(req.user_id, req.package_id, package.duration_days, source, now)
            .await
        {
            Ok(entitlement) => {
                advance(state, PurchaseState::EntitlementGranted, req);
                Ok(entitlement)
            }
            Err(EntitlementError::Conflict { .. }) => {
                warn!(
                    user_id = req.user_id,
                    package_id = req.package_id,
                    "grant lost to an existing active entitlement"
                );
                Err(GrantFailure::Conflict)
            }
            Err(e) => {
                error!(
                    user_id = req.user_id,
                    package_id = req.package_id,
                    error = %e,
                    "entitlement grant failed"
                );
                Err(GrantFailure::Other(PurchaseError::Failed))
            }
        }
    }

    /// Credit a failed purchase's debit back.
    ///
    /// Runs on its own task: the caller may have gone away, the refund
    /// still completes.
    async fn compensate_debit(&self, req: &PurchaseRequest, amount: Credits) -> Result<()> {
        let wallet = self.wallet.clone();
        let user_id = req.user_id;
        let handle =
            tokio::spawn(async move { wallet.credit(user_id, amount, "purchase rollback").await });

        match handle.await {
            Ok(Ok(receipt)) => {
                info!(
                    user_id,
                    amount,
                    new_balance = receipt.new_balance,
                    "debit compensated"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                error!(
                    user_id,
                    package_id = req.package_id,
                    amount,
                    step = "credit-back",
                    error = %e,
                    "compensation failed; manual reconciliation required"
                );
                Err(PurchaseError::ManualInterventionRequired {
                    context: format!(
                        "credit-back of {amount} credits for user {user_id} failed: {e}"
                    ),
                })
            }
            Err(e) => {
                error!(
                    user_id,
                    package_id = req.package_id,
                    amount,
                    step = "credit-back",
                    error = %e,
                    "compensation task failed; manual reconciliation required"
                );
                Err(PurchaseError::ManualInterventionRequired {
                    context: format!(
                        "credit-back task for user {user_id} did not complete: {e}"
                    ),
                })
            }
        }
    }

    /// Revert a failed purchase's code redemption.
    async fn compensate_code(&self, req: &PurchaseRequest, code_id: i64) -> Result<()> {
        let codes = self.codes.clone();
        let user_id = req.user_id;
        let handle = tokio::spawn(async move { codes.release(code_id, user_id).await });

        match handle.await {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => {
                error!(
                    user_id,
                    package_id = req.package_id,
                    code_id,
                    step = "code-release",
                    "code not in redeemed-by-user state; manual reconciliation required"
                );
                Err(PurchaseError::ManualInterventionRequired {
                    context: format!(
                        "release of code {code_id} for user {user_id} matched no row"
                    ),
                })
            }
            Ok(Err(e)) => {
                error!(
                    user_id,
                    package_id = req.package_id,
                    code_id,
                    step = "code-release",
                    error = %e,
                    "compensation failed; manual reconciliation required"
                );
                Err(PurchaseError::ManualInterventionRequired {
                    context: format!("release of code {code_id} for user {user_id} failed: {e}"),
                })
            }
            Err(e) => {
                error!(
                    user_id,
                    package_id = req.package_id,
                    code_id,
                    step = "code-release",
                    error = %e,
                    "compensation task failed; manual reconciliation required"
                );
                Err(PurchaseError::ManualInterventionRequired {
                    context: format!("release task for code {code_id} did not complete: {e}"),
                })
            }
        }
    }
}

/// Grant-step failure split: conflicts compensate and surface as such,
/// everything else compensates and degrades to the generic failure.
enum GrantFailure {
    Conflict,
    Other(PurchaseError),
}

/// Map a redemption-service error onto the purchase taxonomy.
fn map_redeem_error(e: RedeemError) -> PurchaseError {
    match e {
        RedeemError::RedeemConflict => PurchaseError::RedeemConflict,
        RedeemError::Store(e) => PurchaseError::Store(e),
        other => PurchaseError::Code(other),
    }
}

/// Trace a state transition.
fn advance(state: &mut PurchaseState, next: PurchaseState, req: &PurchaseRequest) {
    debug!(
        user_id = req.user_id,
        package_id = req.package_id,
        from = ?*state,
        to = ?next,
        "purchase state transition"
    );
    *state = next;
}
