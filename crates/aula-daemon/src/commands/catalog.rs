//! Catalog & entitlement command handlers.

use std::sync::Arc;

use aula_db::queries::packages;
use serde_json::Value;

use crate::commands::{require_admin, required_str, required_u64};
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// Admin: create a course package.
pub async fn create_package(state: &Arc<DaemonState>, params: &Value) -> Result {
    require_admin(state, params)?;
    let name = required_str(params, "name")?;
    let grade = required_str(params, "grade")?;
    let price = required_u64(params, "price")?;
    let duration_days = required_u64(params, "duration_days")?;
    if duration_days == 0 {
        return Err(RpcError::invalid_params("duration_days must be positive"));
    }

    let conn = state.db.lock().await;
    let id = packages::insert(
        &conn,
        name,
        grade,
        price,
        duration_days,
        aula_types::unix_now(),
    )
    .map_err(|e| RpcError::internal_error(&format!("store error: {e}")))?;

    Ok(serde_json::json!({"package_id": id}))
}

/// Admin: close a package for purchase.
pub async fn deactivate_package(state: &Arc<DaemonState>, params: &Value) -> Result {
    require_admin(state, params)?;
    let package_id = required_u64(params, "package_id")?;

    let conn = state.db.lock().await;
    let deactivated = packages::deactivate(&conn, package_id)
        .map_err(|e| RpcError::internal_error(&format!("store error: {e}")))?;
    if !deactivated {
        return Err(RpcError::not_found(&format!("package {package_id}")));
    }

    Ok(serde_json::json!({"deactivated": true}))
}

/// List purchasable packages, optionally filtered by grade.
pub async fn list_packages(state: &Arc<DaemonState>, params: &Value) -> Result {
    let grade = params.get("grade").and_then(|v| v.as_str());

    let conn = state.db.lock().await;
    let rows = packages::list_active(&conn, grade)
        .map_err(|e| RpcError::internal_error(&format!("store error: {e}")))?;

    let result: Vec<Value> = rows
        .iter()
        .map(|p| {
            serde_json::json!({
                "id": p.id,
                "name": p.name,
                "grade": p.grade,
                "price": p.price,
                "duration_days": p.duration_days,
            })
        })
        .collect();

    Ok(serde_json::json!(result))
}

/// List a user's entitlements with their access state.
pub async fn get_my_packages(state: &Arc<DaemonState>, params: &Value) -> Result {
    let user_id = required_u64(params, "user_id")?;
    let now = aula_types::unix_now();

    let rows = state
        .entitlements
        .list_for_user(user_id)
        .await
        .map_err(|e| RpcError::internal_error(&format!("entitlement error: {e}")))?;

    let result: Vec<Value> = rows
        .iter()
        .map(|e| {
            serde_json::json!({
                "id": e.id,
                "package_id": e.package_id,
                "purchased_at": e.purchased_at,
                "expires_at": e.expires_at,
                "source": e.source.as_str(),
                "has_access": e.grants_access(now),
            })
        })
        .collect();

    Ok(serde_json::json!(result))
}

/// Whether a user currently has access to a package.
pub async fn get_access_status(state: &Arc<DaemonState>, params: &Value) -> Result {
    let user_id = required_u64(params, "user_id")?;
    let package_id = required_u64(params, "package_id")?;
    let now = aula_types::unix_now();

    let active = state
        .entitlements
        .active_for(user_id, package_id, now)
        .await
        .map_err(|e| RpcError::internal_error(&format!("entitlement error: {e}")))?;

    Ok(match active {
        Some(e) => serde_json::json!({
            "has_access": true,
            "expires_at": e.expires_at,
            "source": e.source.as_str(),
        }),
        None => serde_json::json!({"has_access": false}),
    })
}
