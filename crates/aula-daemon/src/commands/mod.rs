//! IPC command handlers.
//!
//! Each submodule implements the commands for one IPC category.

pub mod catalog;
pub mod codes;
pub mod profiles;
pub mod purchase;
pub mod wallet;

use std::sync::Arc;

use serde_json::Value;

use crate::rpc::RpcError;
use crate::DaemonState;

/// Check the admin token on operator commands.
///
/// An empty configured token disables admin commands entirely.
pub(crate) fn require_admin(state: &Arc<DaemonState>, params: &Value) -> Result<(), RpcError> {
    let configured = state.config.admin.admin_token.as_str();
    if configured.is_empty() {
        return Err(RpcError::unauthorized());
    }
    let supplied = params.get("admin_token").and_then(|v| v.as_str());
    if supplied == Some(configured) {
        Ok(())
    } else {
        Err(RpcError::unauthorized())
    }
}

/// Extract a required u64 parameter.
pub(crate) fn required_u64(params: &Value, key: &str) -> Result<u64, RpcError> {
    params
        .get(key)
        .and_then(|v| v.as_u64())
        .ok_or_else(|| RpcError::invalid_params(&format!("{key} required")))
}

/// Extract a required string parameter.
pub(crate) fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, RpcError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::invalid_params(&format!("{key} required")))
}
