use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use farmlink_api::background;
use farmlink_api::config::ServerConfig;
use farmlink_api::router::build_app_router;
use farmlink_api::state::AppState;
use farmlink_core::coordinator::Coordinator;
use farmlink_core::gateway::{DeadlineGateway, SchedulerGateway};
use farmlink_core::registry::WorkerRegistry;
use farmlink_core::snapshot::{FileSnapshotStore, InMemorySnapshotStore, SnapshotStore};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "farmlink_api=debug,farmlink_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });
    tracing::info!(host = %config.host, port = config.port, "Loaded server configuration");

    // --- Snapshot store ---
    let snapshot: Arc<dyn SnapshotStore> = match &config.snapshot_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "Mirroring workers into snapshot file");
            Arc::new(FileSnapshotStore::new(path))
        }
        None => {
            tracing::info!("Snapshot file disabled; keeping worker snapshot in memory");
            Arc::new(InMemorySnapshotStore::new())
        }
    };

    // --- Scheduler gateway ---
    let gateway: Arc<dyn SchedulerGateway> = Arc::new(DeadlineGateway::discover(
        config.deadline_path.as_deref(),
        config.deadline_plugin.clone(),
    ));

    // --- Registry + coordinator ---
    let registry = Arc::new(WorkerRegistry::new(
        Duration::from_secs(config.heartbeat_timeout_secs),
        snapshot,
    ));
    let coordinator = Arc::new(Coordinator::new(Arc::clone(&registry), gateway));

    // --- Liveness sweep ---
    let sweep_cancel = CancellationToken::new();
    let sweep_handle = (config.sweep_interval_secs > 0).then(|| {
        tokio::spawn(background::liveness_sweep::run(
            Arc::clone(&registry),
            Duration::from_secs(config.sweep_interval_secs),
            sweep_cancel.clone(),
        ))
    });

    // --- App state + router ---
    let state = AppState { coordinator };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let ip = config.host.parse().unwrap_or_else(|e| {
        tracing::error!(host = %config.host, error = %e, "Invalid HOST address");
        std::process::exit(1);
    });
    let addr = SocketAddr::new(ip, config.port);
    tracing::info!(%addr, "Starting coordinator");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to bind to address");
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
    }

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    sweep_cancel.cancel();
    if let Some(handle) = sweep_handle {
        let _ = tokio::time::timeout(Duration::from_secs(config.shutdown_timeout_secs), handle).await;
    }
    tracing::info!(live_workers = registry.len().await, "Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
