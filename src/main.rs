//! Secrets Store rotation controller
//!
//! Main entry point. Builds the Kubernetes client and the node-scoped caches,
//! wires the rotation pipeline to its collaborators and runs the controller
//! until a shutdown signal arrives.

use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use secrets_rotation_controller::{
    adapters::{KubeClusterClient, KubeEventSink, KubeStore, EVENT_REPORTER},
    config::Config,
    controllers::{Context, RotationController},
    metrics,
    provider::{ProviderClientCache, UnixSocketConnector},
    reconcilers::Reconciler,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::parse();
    config.validate()?;

    info!(
        node = %config.node_name,
        provider_volume = %config.provider_volume.display(),
        "Starting secrets rotation controller"
    );

    let client = config.build_client().await?;
    info!("Connected to Kubernetes API server");

    let store = Arc::new(KubeStore::start(client.clone(), &config.node_name).await?);
    info!("Object caches synced");

    let cluster = Arc::new(KubeClusterClient::new(client.clone(), EVENT_REPORTER));
    let events = Arc::new(KubeEventSink::new(client, Some(config.node_name.clone())));
    let providers = Arc::new(ProviderClientCache::new(Arc::new(UnixSocketConnector::new(
        config.provider_volume.clone(),
        config.provider_timeout(),
    ))));

    let reconciler = Reconciler::new(store.clone(), cluster, providers);
    let context = Arc::new(Context::new(store, events, reconciler));
    let controller = RotationController::new(context, config.controller_settings());

    let metrics_handle = tokio::spawn(metrics::serve(config.metrics_port));
    info!("Metrics server starting on port {}", config.metrics_port);

    let shutdown = CancellationToken::new();
    let mut controller_handle = tokio::spawn(controller.run(shutdown.clone()));

    tokio::select! {
        _ = &mut controller_handle => {
            error!("Rotation controller exited unexpectedly");
        }
        _ = metrics_handle => {
            error!("Metrics server exited unexpectedly");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping controller");
        }
    }

    shutdown.cancel();
    if !controller_handle.is_finished() {
        if let Err(e) = controller_handle.await {
            error!(error = %e, "Rotation controller task failed");
        }
    }

    info!("Secrets rotation controller stopped");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
