//! Activation code command handlers.

use std::sync::Arc;

use aula_redeem::RedeemError;
use serde_json::Value;

use crate::commands::{require_admin, required_str, required_u64};
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

pub(crate) fn map_redeem_error(e: &RedeemError) -> RpcError {
    match e {
        RedeemError::RedeemConflict => RpcError::redeem_conflict(),
        RedeemError::Store(e) => RpcError::internal_error(&format!("store error: {e}")),
        RedeemError::GenerationExhausted { .. } => {
            RpcError::internal_error("code generation exhausted")
        }
        other => RpcError::code_invalid(&other.to_string()),
    }
}

/// Admin: mint a batch of activation codes.
pub async fn create_activation_codes(state: &Arc<DaemonState>, params: &Value) -> Result {
    require_admin(state, params)?;
    let count = required_u64(params, "count")?;
    if count == 0 || count > 1000 {
        return Err(RpcError::invalid_params("count must be between 1 and 1000"));
    }
    let grade = required_str(params, "grade")?;
    let package_id = params.get("package_id").and_then(|v| v.as_u64());
    let expires_at = params.get("expires_at").and_then(|v| v.as_u64());

    let tokens = state
        .codes
        .generate(count as u32, grade, package_id, expires_at)
        .await
        .map_err(|e| map_redeem_error(&e))?;

    Ok(serde_json::json!({"codes": tokens}))
}

/// Validate a code for a user and package without redeeming it.
pub async fn validate_activation_code(state: &Arc<DaemonState>, params: &Value) -> Result {
    let code = required_str(params, "code")?;
    let user_id = required_u64(params, "user_id")?;
    let package_id = required_u64(params, "package_id")?;

    let validated = state
        .codes
        .validate(code, user_id, package_id, aula_types::unix_now())
        .await
        .map_err(|e| map_redeem_error(&e))?;

    Ok(serde_json::json!({
        "valid": true,
        "code": validated.code,
        "grade": validated.grade,
        "package_id": validated.package_id,
    }))
}

/// Admin: list recently created codes.
pub async fn list_activation_codes(state: &Arc<DaemonState>, params: &Value) -> Result {
    require_admin(state, params)?;
    let limit = params
        .get("limit")
        .and_then(|v| v.as_u64())
        .unwrap_or(100)
        .min(1000) as u32;

    let rows = state
        .codes
        .list(limit)
        .await
        .map_err(|e| map_redeem_error(&e))?;

    let result: Vec<Value> = rows
        .iter()
        .map(|row| {
            serde_json::json!({
                "code": row.code,
                "grade": row.grade,
                "package_id": row.package_id,
                "is_used": row.is_used,
                "used_by": row.used_by,
                "used_at": row.used_at,
                "expires_at": row.expires_at,
                "created_at": row.created_at,
            })
        })
        .collect();

    Ok(serde_json::json!(result))
}
