//! Integration test: compensation correctness.
//!
//! When the entitlement grant fails after funds or a code were already
//! reserved, the orchestrator must return the reserved value and leave
//! an auditable trail:
//! 1. A failed wallet purchase restores the exact pre-purchase balance
//! 2. The ledger shows a paired deduct+add of equal magnitude
//! 3. A failed code purchase reverts the code to unused

use std::sync::Arc;

use aula_db::queries::profiles;
use aula_db::{queries::packages, Db};
use aula_entitlement::{EntitlementService, NullSink};
use aula_purchase::{PurchaseError, PurchaseOrchestrator, PurchaseRequest};
use aula_redeem::CodeService;
use aula_types::{EntitlementSource, PackageId, PaymentMethod, TransactionKind, UserId};
use aula_wallet::WalletService;

struct Harness {
    db: Db,
    wallet: WalletService,
    codes: CodeService,
    entitlements: EntitlementService,
    purchases: PurchaseOrchestrator,
}

fn harness() -> Harness {
    let conn = aula_db::open_memory().expect("open db");
    let db = aula_db::into_shared(conn);
    let wallet = WalletService::new(db.clone());
    let codes = CodeService::new(db.clone());
    let entitlements = EntitlementService::new(db.clone(), Arc::new(NullSink));
    let purchases = PurchaseOrchestrator::new(
        db.clone(),
        wallet.clone(),
        codes.clone(),
        entitlements.clone(),
    );
    Harness {
        db,
        wallet,
        codes,
        entitlements,
        purchases,
    }
}

async fn seed_student(h: &Harness, user_id: UserId, grade: &str) {
    {
        let conn = h.db.lock().await;
        profiles::upsert(&conn, user_id, "Student", grade, aula_types::unix_now())
            .expect("profile");
    }
    h.wallet.provision(user_id).await.expect("wallet");
}

async fn seed_package(h: &Harness, price: u64) -> PackageId {
    let conn = h.db.lock().await;
    packages::insert(&conn, "Algebra", "first", price, 30, aula_types::unix_now())
        .expect("package") as u64
}

#[tokio::test]
async fn failed_grant_refunds_debit() {
    // =========================================================
    // Setup: the user already holds an active entitlement, so
    // the wallet path debits and then loses the grant.
    // =========================================================
    let h = harness();
    seed_student(&h, 1, "first").await;
    h.wallet.credit(1, 500, "top-up").await.expect("credit");
    let pkg = seed_package(&h, 300).await;

    h.entitlements
        .grant(1, pkg, 30, EntitlementSource::Code, aula_types::unix_now())
        .await
        .expect("pre-existing entitlement");

    let err = h
        .purchases
        .purchase(&PurchaseRequest {
            user_id: 1,
            package_id: pkg,
            method: PaymentMethod::Wallet,
            code: None,
            idempotency_key: None,
        })
        .await
        .expect_err("grant must conflict");
    assert!(matches!(err, PurchaseError::EntitlementConflict));

    // =========================================================
    // The balance is exactly where it started.
    // =========================================================
    assert_eq!(h.wallet.balance(1).await.expect("balance"), 500);

    // =========================================================
    // The ledger shows the paired deduct+add.
    // =========================================================
    let txs = h.wallet.transactions(1, 10).await.expect("txs");
    assert_eq!(txs.len(), 3, "top-up, debit, refund");

    let refund = &txs[0];
    assert_eq!(refund.kind, TransactionKind::Add);
    assert_eq!(refund.amount, 300);
    assert_eq!(refund.description, "purchase rollback");

    let debit = &txs[1];
    assert_eq!(debit.kind, TransactionKind::Purchase);
    assert_eq!(debit.amount, -300);

    assert_eq!(
        refund.amount, -debit.amount,
        "refund must mirror the debit exactly"
    );
    assert_eq!(refund.new_balance, debit.previous_balance);

    // Only the pre-existing entitlement remains.
    let rows = h.entitlements.list_for_user(1).await.expect("list");
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn racing_code_purchases_release_losing_code() {
    // =========================================================
    // One user, two codes for the same package, raced: a loser
    // that reached the grant step must get its code back.
    // Whatever the interleaving, the invariants below hold.
    // =========================================================
    let h = harness();
    seed_student(&h, 1, "first").await;
    let pkg = seed_package(&h, 300).await;
    let tokens = h
        .codes
        .generate(2, "first", Some(pkg), None)
        .await
        .expect("generate");

    let mut handles = Vec::new();
    for token in &tokens {
        let purchases = h.purchases.clone();
        let token = token.clone();
        handles.push(tokio::spawn(async move {
            purchases
                .purchase(&PurchaseRequest {
                    user_id: 1,
                    package_id: pkg,
                    method: PaymentMethod::Code,
                    code: Some(token),
                    idempotency_key: None,
                })
                .await
        }));
    }

    let mut completed = 0;
    for handle in handles {
        match handle.await.expect("task") {
            Ok(_) => completed += 1,
            // The loser either failed validation up front or was
            // compensated after losing the grant.
            Err(PurchaseError::Code(_)) | Err(PurchaseError::EntitlementConflict) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(completed, 1, "exactly one code purchase may complete");

    // Exactly one code is consumed; the loser's code is unused,
    // whether it was released or never redeemed.
    let mut used = 0;
    for token in &tokens {
        let row = h.codes.find(token).await.expect("find").expect("exists");
        if row.is_used {
            used += 1;
            assert_eq!(row.used_by, Some(1));
        }
    }
    assert_eq!(used, 1, "exactly one code may stay consumed");

    let rows = h.entitlements.list_for_user(1).await.expect("list");
    assert_eq!(rows.iter().filter(|e| e.is_active).count(), 1);
}

#[tokio::test]
async fn compensation_is_reported_as_conflict_not_failure() {
    // The caller of a compensated conflict sees the conflict, not a
    // generic failure, and can tell nothing was lost.
    let h = harness();
    seed_student(&h, 1, "first").await;
    h.wallet.credit(1, 1000, "top-up").await.expect("credit");
    let pkg = seed_package(&h, 250).await;

    h.entitlements
        .grant(1, pkg, 30, EntitlementSource::Wallet, aula_types::unix_now())
        .await
        .expect("pre-existing entitlement");

    for _ in 0..3 {
        let err = h
            .purchases
            .purchase(&PurchaseRequest {
                user_id: 1,
                package_id: pkg,
                method: PaymentMethod::Wallet,
                code: None,
                idempotency_key: None,
            })
            .await
            .expect_err("conflict");
        assert!(matches!(err, PurchaseError::EntitlementConflict));
    }

    // Three debit/refund pairs later the balance is untouched.
    assert_eq!(h.wallet.balance(1).await.expect("balance"), 1000);
    let txs = h.wallet.transactions(1, 20).await.expect("txs");
    assert_eq!(txs.len(), 1 + 3 * 2);
}
