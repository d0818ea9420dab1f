//! Wallet command handlers.

use std::sync::Arc;

use aula_wallet::WalletError;
use serde_json::Value;

use crate::commands::{require_admin, required_u64};
use crate::events::Event;
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

fn map_wallet_error(e: WalletError) -> RpcError {
    match e {
        WalletError::InsufficientFunds {
            available,
            required,
        } => RpcError::insufficient_balance(required, available),
        WalletError::WalletNotFound { user_id } => RpcError::wallet_not_found(user_id),
        WalletError::ZeroAmount => RpcError::invalid_params("amount must be positive"),
        WalletError::Store(e) => RpcError::internal_error(&format!("store error: {e}")),
    }
}

/// Get a user's wallet balance.
pub async fn get_wallet_balance(state: &Arc<DaemonState>, params: &Value) -> Result {
    let user_id = required_u64(params, "user_id")?;
    let balance = state
        .wallet
        .balance(user_id)
        .await
        .map_err(map_wallet_error)?;

    Ok(serde_json::json!({
        "user_id": user_id,
        "balance": balance,
    }))
}

/// Get a user's recent wallet transactions.
pub async fn get_wallet_transactions(state: &Arc<DaemonState>, params: &Value) -> Result {
    let user_id = required_u64(params, "user_id")?;
    let limit = params
        .get("limit")
        .and_then(|v| v.as_u64())
        .unwrap_or(50)
        .min(500) as u32;

    let txs = state
        .wallet
        .transactions(user_id, limit)
        .await
        .map_err(map_wallet_error)?;

    let result: Vec<Value> = txs
        .iter()
        .map(|tx| {
            serde_json::json!({
                "id": tx.id,
                "amount": tx.amount,
                "kind": tx.kind.as_str(),
                "description": tx.description,
                "previous_balance": tx.previous_balance,
                "new_balance": tx.new_balance,
                "created_at": tx.created_at,
            })
        })
        .collect();

    Ok(serde_json::json!(result))
}

/// Admin: credit a user's wallet.
pub async fn credit_wallet(state: &Arc<DaemonState>, params: &Value) -> Result {
    require_admin(state, params)?;
    let user_id = required_u64(params, "user_id")?;
    let amount = required_u64(params, "amount")?;
    let description = params
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or("wallet top-up");

    let receipt = state
        .wallet
        .credit(user_id, amount, description)
        .await
        .map_err(map_wallet_error)?;

    state.event_bus.emit(Event {
        event_type: "WalletCredited".to_string(),
        timestamp: aula_types::unix_now(),
        payload: serde_json::json!({
            "user_id": user_id,
            "amount": amount,
            "new_balance": receipt.new_balance,
        }),
    });

    Ok(serde_json::json!({
        "new_balance": receipt.new_balance,
        "tx_id": receipt.tx_id,
    }))
}

/// Admin: provision a wallet for a new user.
pub async fn provision_wallet(state: &Arc<DaemonState>, params: &Value) -> Result {
    require_admin(state, params)?;
    let user_id = required_u64(params, "user_id")?;

    state
        .wallet
        .provision(user_id)
        .await
        .map_err(map_wallet_error)?;

    Ok(serde_json::json!({"provisioned": true}))
}
