//! Purchase command handlers.

use std::sync::Arc;

use aula_purchase::{PurchaseError, PurchaseRequest};
use serde_json::Value;

use crate::commands::codes::map_redeem_error;
use crate::events::Event;
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

fn map_purchase_error(e: &PurchaseError) -> RpcError {
    match e {
        PurchaseError::UnknownPackage { package_id } => {
            RpcError::not_found(&format!("package {package_id}"))
        }
        PurchaseError::PackageUnavailable { package_id } => {
            RpcError::not_found(&format!("package {package_id} is unavailable"))
        }
        PurchaseError::MissingCode => RpcError::invalid_params("code required"),
        PurchaseError::InsufficientFunds {
            available,
            required,
        } => RpcError::insufficient_balance(*required, *available),
        PurchaseError::WalletNotFound { user_id } => RpcError::wallet_not_found(*user_id),
        PurchaseError::Code(e) => map_redeem_error(e),
        PurchaseError::RedeemConflict => RpcError::redeem_conflict(),
        PurchaseError::EntitlementConflict => RpcError::entitlement_conflict(),
        PurchaseError::AttemptInProgress => RpcError::attempt_in_progress(),
        PurchaseError::Failed => RpcError::purchase_failed(),
        PurchaseError::ManualInterventionRequired { context } => {
            RpcError::manual_intervention(context)
        }
        PurchaseError::Store(e) => RpcError::internal_error(&format!("store error: {e}")),
    }
}

/// Purchase a package by wallet balance or activation code.
pub async fn purchase_package(state: &Arc<DaemonState>, params: &Value) -> Result {
    let request: PurchaseRequest = serde_json::from_value(params.clone())
        .map_err(|e| RpcError::invalid_params(&e.to_string()))?;

    let receipt = state
        .purchases
        .purchase(&request)
        .await
        .map_err(|e| map_purchase_error(&e))?;

    state.event_bus.emit(Event {
        event_type: "PurchaseCompleted".to_string(),
        timestamp: aula_types::unix_now(),
        payload: serde_json::json!({
            "user_id": request.user_id,
            "package_id": request.package_id,
            "method": request.method.as_str(),
        }),
    });

    let entitlement = &receipt.entitlement;
    Ok(serde_json::json!({
        "status": "completed",
        "new_balance": receipt.new_balance,
        "entitlement": {
            "id": entitlement.id,
            "package_id": entitlement.package_id,
            "purchased_at": entitlement.purchased_at,
            "expires_at": entitlement.expires_at,
            "source": entitlement.source.as_str(),
        },
    }))
}
