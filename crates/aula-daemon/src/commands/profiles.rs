//! Student profile command handlers.
//!
//! Registration provisions the wallet in the same step so a freshly
//! created student can always be debited or credited.

use std::sync::Arc;

use aula_db::queries::profiles;
use serde_json::Value;

use crate::commands::{require_admin, required_str, required_u64};
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// Admin: register a student and provision their wallet.
pub async fn register_student(state: &Arc<DaemonState>, params: &Value) -> Result {
    require_admin(state, params)?;
    let user_id = required_u64(params, "user_id")?;
    let display_name = required_str(params, "display_name")?;
    let grade = required_str(params, "grade")?;

    {
        let conn = state.db.lock().await;
        profiles::upsert(&conn, user_id, display_name, grade, aula_types::unix_now())
            .map_err(|e| RpcError::internal_error(&format!("store error: {e}")))?;
    }

    state
        .wallet
        .provision(user_id)
        .await
        .map_err(|e| RpcError::internal_error(&format!("wallet error: {e}")))?;

    Ok(serde_json::json!({"registered": true}))
}

/// Get a student profile.
pub async fn get_profile(state: &Arc<DaemonState>, params: &Value) -> Result {
    let user_id = required_u64(params, "user_id")?;

    let conn = state.db.lock().await;
    let profile = profiles::get(&conn, user_id)
        .map_err(|e| RpcError::internal_error(&format!("store error: {e}")))?
        .ok_or_else(|| RpcError::not_found(&format!("profile {user_id}")))?;

    Ok(serde_json::json!({
        "user_id": profile.user_id,
        "display_name": profile.display_name,
        "grade": profile.grade,
        "created_at": profile.created_at,
    }))
}
