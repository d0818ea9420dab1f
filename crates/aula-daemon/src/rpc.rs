//! JSON-RPC server over Unix socket.
//!
//! Listens on a Unix domain socket, accepts connections, and dispatches
//! JSON-RPC method calls to the appropriate command handlers. Each
//! purchase outcome maps onto a distinct error code so the UI can react
//! without parsing messages.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tracing::{debug, error, info, warn};

use crate::commands;
use crate::DaemonState;

/// JSON-RPC request.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request ID.
    pub id: serde_json::Value,
    /// Method name.
    pub method: String,
    /// Parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// JSON-RPC response.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    /// JSON-RPC version.
    pub jsonrpc: String,
    /// Request ID.
    pub id: serde_json::Value,
    /// Result or error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RpcError {
    /// Error code.
    pub code: i32,
    /// Error name.
    pub message: String,
    /// Optional structured data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcResponse {
    /// Create a success response.
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: serde_json::Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

impl RpcError {
    // Standard JSON-RPC errors

    /// Parse error (-32700).
    pub fn parse_error() -> Self {
        Self {
            code: -32700,
            message: "PARSE_ERROR".to_string(),
            data: None,
        }
    }

    /// Method not found (-32601).
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: "METHOD_NOT_FOUND".to_string(),
            data: Some(serde_json::json!({"method": method})),
        }
    }

    /// Invalid params (-32602).
    pub fn invalid_params(detail: &str) -> Self {
        Self {
            code: -32602,
            message: "INVALID_PARAMS".to_string(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }

    /// Internal error (-32603).
    pub fn internal_error(detail: &str) -> Self {
        Self {
            code: -32603,
            message: "INTERNAL_ERROR".to_string(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }

    // Domain errors

    /// Admin token missing or wrong (-32000).
    pub fn unauthorized() -> Self {
        Self {
            code: -32000,
            message: "UNAUTHORIZED".to_string(),
            data: None,
        }
    }

    /// Entity not found (-32001).
    pub fn not_found(detail: &str) -> Self {
        Self {
            code: -32001,
            message: "NOT_FOUND".to_string(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }

    /// Insufficient balance (-32040).
    pub fn insufficient_balance(required: u64, available: u64) -> Self {
        Self {
            code: -32040,
            message: "INSUFFICIENT_BALANCE".to_string(),
            data: Some(serde_json::json!({"required": required, "available": available})),
        }
    }

    /// Wallet not provisioned (-32041).
    pub fn wallet_not_found(user_id: u64) -> Self {
        Self {
            code: -32041,
            message: "WALLET_NOT_FOUND".to_string(),
            data: Some(serde_json::json!({"user_id": user_id})),
        }
    }

    /// Activation code rejected by validation (-32042).
    pub fn code_invalid(reason: &str) -> Self {
        Self {
            code: -32042,
            message: "CODE_INVALID".to_string(),
            data: Some(serde_json::json!({"reason": reason})),
        }
    }

    /// Lost the redemption race (-32043).
    pub fn redeem_conflict() -> Self {
        Self {
            code: -32043,
            message: "REDEEM_CONFLICT".to_string(),
            data: None,
        }
    }

    /// Active entitlement already exists (-32044).
    pub fn entitlement_conflict() -> Self {
        Self {
            code: -32044,
            message: "ENTITLEMENT_CONFLICT".to_string(),
            data: None,
        }
    }

    /// Purchase failed after the payment step; value was returned
    /// (-32045).
    pub fn purchase_failed() -> Self {
        Self {
            code: -32045,
            message: "PURCHASE_FAILED".to_string(),
            data: None,
        }
    }

    /// Compensation failed; operator reconciliation needed (-32046).
    pub fn manual_intervention(context: &str) -> Self {
        Self {
            code: -32046,
            message: "MANUAL_INTERVENTION".to_string(),
            data: Some(serde_json::json!({"context": context})),
        }
    }

    /// Idempotency key still in flight (-32047).
    pub fn attempt_in_progress() -> Self {
        Self {
            code: -32047,
            message: "ATTEMPT_IN_PROGRESS".to_string(),
            data: None,
        }
    }
}

/// The RPC server.
pub struct RpcServer {
    state: Arc<DaemonState>,
    socket_path: PathBuf,
}

impl RpcServer {
    /// Create a new RPC server.
    pub fn new(state: Arc<DaemonState>, socket_path: PathBuf) -> Self {
        Self { state, socket_path }
    }

    /// Run the server, accepting connections.
    pub async fn run(&self) -> anyhow::Result<()> {
        // Remove stale socket file
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("IPC server listening on {:?}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(state, stream).await {
                            warn!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

/// Handle a single client connection.
async fn handle_connection(
    state: Arc<DaemonState>,
    stream: tokio::net::UnixStream,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break; // EOF
        }

        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => dispatch_request(state.clone(), request).await,
            Err(_) => RpcResponse::error(serde_json::Value::Null, RpcError::parse_error()),
        };

        let mut response_json = serde_json::to_string(&response)?;
        response_json.push('\n');
        writer.write_all(response_json.as_bytes()).await?;
        writer.flush().await?;
    }

    Ok(())
}

/// Dispatch a JSON-RPC request to the appropriate command handler.
async fn dispatch_request(state: Arc<DaemonState>, request: RpcRequest) -> RpcResponse {
    let id = request.id.clone();
    let method = request.method.as_str();

    debug!("Dispatching RPC method: {}", method);

    let result = match method {
        // Wallet commands
        "get_wallet_balance" => commands::wallet::get_wallet_balance(&state, &request.params).await,
        "get_wallet_transactions" => {
            commands::wallet::get_wallet_transactions(&state, &request.params).await
        }
        "credit_wallet" => commands::wallet::credit_wallet(&state, &request.params).await,
        "provision_wallet" => commands::wallet::provision_wallet(&state, &request.params).await,

        // Activation code commands
        "create_activation_codes" => {
            commands::codes::create_activation_codes(&state, &request.params).await
        }
        "validate_activation_code" => {
            commands::codes::validate_activation_code(&state, &request.params).await
        }
        "list_activation_codes" => {
            commands::codes::list_activation_codes(&state, &request.params).await
        }

        // Purchase commands
        "purchase_package" => commands::purchase::purchase_package(&state, &request.params).await,

        // Catalog & entitlement commands
        "create_package" => commands::catalog::create_package(&state, &request.params).await,
        "deactivate_package" => {
            commands::catalog::deactivate_package(&state, &request.params).await
        }
        "list_packages" => commands::catalog::list_packages(&state, &request.params).await,
        "get_my_packages" => commands::catalog::get_my_packages(&state, &request.params).await,
        "get_access_status" => commands::catalog::get_access_status(&state, &request.params).await,

        // Profile commands
        "register_student" => commands::profiles::register_student(&state, &request.params).await,
        "get_profile" => commands::profiles::get_profile(&state, &request.params).await,

        _ => Err(RpcError::method_not_found(method)),
    };

    match result {
        Ok(value) => RpcResponse::success(id, value),
        Err(err) => RpcResponse::error(id, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_codes() {
        let err = RpcError::insufficient_balance(300, 100);
        assert_eq!(err.code, -32040);
        assert_eq!(err.message, "INSUFFICIENT_BALANCE");

        let err = RpcError::redeem_conflict();
        assert_eq!(err.code, -32043);

        let err = RpcError::method_not_found("unknown");
        assert_eq!(err.code, -32601);

        let err = RpcError::unauthorized();
        assert_eq!(err.code, -32000);
    }

    #[test]
    fn test_rpc_response_success() {
        let resp = RpcResponse::success(serde_json::json!(1), serde_json::json!({"balance": 500}));
        assert!(resp.result.is_some());
        assert!(resp.error.is_none());
    }

    #[test]
    fn test_rpc_response_error() {
        let resp = RpcResponse::error(serde_json::json!(1), RpcError::internal_error("test"));
        assert!(resp.result.is_none());
        assert!(resp.error.is_some());
    }
}
