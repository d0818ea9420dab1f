//! aula-daemon: the payment-core daemon for the aula platform.
//!
//! Single OS process running a Tokio async runtime. The UI communicates
//! with the daemon via JSON-RPC over Unix socket; the daemon owns the
//! wallet, activation code, entitlement, and purchase services over one
//! SQLite store.

mod commands;
mod config;
mod events;
mod rpc;

use std::sync::Arc;

use aula_db::Db;
use aula_entitlement::EntitlementService;
use aula_purchase::PurchaseOrchestrator;
use aula_redeem::CodeService;
use aula_wallet::WalletService;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::config::DaemonConfig;
use crate::events::{EventBus, EventBusSink};
use crate::rpc::RpcServer;

/// Daemon-wide shared state.
pub struct DaemonState {
    /// Shared store handle.
    pub db: Db,
    /// Configuration.
    pub config: DaemonConfig,
    /// Event bus for pushing events to subscribers.
    pub event_bus: EventBus,
    /// Wallet service.
    pub wallet: WalletService,
    /// Activation code service.
    pub codes: CodeService,
    /// Entitlement service.
    pub entitlements: EntitlementService,
    /// Purchase orchestrator.
    pub purchases: PurchaseOrchestrator,
    /// Shutdown signal sender.
    pub shutdown_tx: broadcast::Sender<()>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("aula=info".parse()?),
        )
        .init();

    info!("aula daemon starting");

    // 1. Load config
    let config = DaemonConfig::load()?;
    let data_dir = config.data_dir();

    // Ensure data directory exists
    std::fs::create_dir_all(&data_dir)?;

    // 2. Open database
    let db_path = data_dir.join("aula.db");
    let conn = aula_db::open(&db_path)?;
    let db = aula_db::into_shared(conn);

    // 3. Create event bus
    let event_bus = EventBus::new(1000);

    // 4. Build services over the shared store handle
    let wallet = WalletService::new(db.clone());
    let codes = CodeService::new(db.clone());
    let entitlements = EntitlementService::new(
        db.clone(),
        Arc::new(EventBusSink::new(event_bus.clone())),
    );
    let purchases = PurchaseOrchestrator::new(
        db.clone(),
        wallet.clone(),
        codes.clone(),
        entitlements.clone(),
    );

    // 5. Create shutdown channel
    let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);

    // 6. Build daemon state
    let state = Arc::new(DaemonState {
        db,
        config,
        event_bus,
        wallet,
        codes,
        entitlements,
        purchases,
        shutdown_tx: shutdown_tx.clone(),
    });

    // 7. Start IPC server
    let socket_path = data_dir.join("daemon.sock");
    let rpc_server = RpcServer::new(state.clone(), socket_path.clone());

    info!("Starting JSON-RPC server on {:?}", socket_path);

    // 8. Emit DaemonStarted event
    state.event_bus.emit(events::Event {
        event_type: "DaemonStarted".to_string(),
        timestamp: aula_types::unix_now(),
        payload: serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
        }),
    });

    // 9. Run the RPC server until shutdown
    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::select! {
        result = rpc_server.run() => {
            if let Err(e) = result {
                error!("RPC server error: {}", e);
            }
        }
        _ = shutdown_rx.recv() => {
            info!("Shutdown signal received");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
        }
    }

    // Graceful shutdown
    info!("Daemon shutting down gracefully");

    // Clean up socket file
    let _ = std::fs::remove_file(&socket_path);

    info!("Daemon stopped");
    Ok(())
}
