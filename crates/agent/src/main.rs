//! `farmlink-agent` -- keeps a scheduler-launched render worker registered
//! with the farmlink coordinator.
//!
//! Started inside each task of a provisioning job. Registers the worker,
//! heartbeats until the task is stopped, then unregisters.
//!
//! # Configuration
//!
//! Read from the plugin-info file named by `FARMLINK_PLUGIN_INFO`, then from
//! `FARMLINK_*` environment variables. See [`farmlink_agent::config`].

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use farmlink_agent::backoff::{register_with_backoff, BackoffConfig, RegistrationOutcome};
use farmlink_agent::client::{CoordinatorClient, RegisterPayload};
use farmlink_agent::config::AgentConfig;
use farmlink_agent::heartbeat;
use farmlink_agent::identity::{local_hostname, WorkerIdentity};
use farmlink_core::seed::resolve_seed;
use farmlink_core::worker_pool::HEARTBEAT_INTERVAL_SECS;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "farmlink_agent=info,farmlink_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AgentConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid agent configuration");
        std::process::exit(1);
    });

    if !config.distributed_mode {
        tracing::info!("Distributed mode is off, skipping worker registration");
        return;
    }

    let hostname = local_hostname();
    let identity = WorkerIdentity::resolve(&config, &hostname);
    let seed = resolve_seed(&config.seed, &config.seed_context(&identity.name));

    let job_id = Some(config.task.job_id.clone()).filter(|id| id != "unknown");
    let payload = RegisterPayload::new(&identity, job_id, seed);
    let client = CoordinatorClient::new(&config.coordinator);

    tracing::info!(
        worker_id = %identity.worker_id,
        coordinator = %config.coordinator,
        advertised = %format!("{}:{}", identity.host, identity.port),
        seed_mode = %config.seed.mode,
        seed,
        "Starting farmlink-agent",
    );

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    let backoff = BackoffConfig::default();
    if let RegistrationOutcome::Cancelled { attempts } =
        register_with_backoff(&client, &payload, &backoff, &cancel).await
    {
        tracing::info!(attempts, "Stopped before registering");
        return;
    }

    let stats = heartbeat::run(
        &client,
        &payload,
        Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
        &backoff,
        cancel,
    )
    .await;
    tracing::info!(
        sent = stats.sent,
        failed = stats.failed,
        reregistrations = stats.reregistrations,
        "Heartbeats stopped",
    );

    // Best effort: a worker that never unregisters just goes stale.
    match client.unregister(&identity.worker_id).await {
        Ok(()) => tracing::info!(worker_id = %identity.worker_id, "Unregistered from coordinator"),
        Err(e) => tracing::warn!(worker_id = %identity.worker_id, error = %e, "Unregister failed"),
    }
}

/// Wait for SIGINT or (on Unix) SIGTERM.
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
        () = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
