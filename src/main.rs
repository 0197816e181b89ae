//! Marketplace Registry Kubernetes Operator
//!
//! Main entry point for the operator. Sets up the Kubernetes client,
//! seeds the package datastore, and runs the reconciliation loop.

use std::sync::Arc;

use kube::Client;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use marketplace_registry_operator::{
    controllers::{registry_controller, Context},
    datastore::MemoryDatastore,
    metrics,
    reconcilers::registry::DEFAULT_SERVER_IMAGE,
};

/// Default metrics port
const METRICS_PORT: u16 = 8080;

/// Environment variable overriding the registry server image
const SERVER_IMAGE_ENV: &str = "REGISTRY_SERVER_IMAGE";

/// Environment variable naming an optional datastore seed file
const METADATA_FILE_ENV: &str = "PACKAGE_METADATA_FILE";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    info!("Starting Marketplace Registry Operator");

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let server_image =
        std::env::var(SERVER_IMAGE_ENV).unwrap_or_else(|_| DEFAULT_SERVER_IMAGE.to_string());
    info!("Using registry server image {}", server_image);

    // Seed the package datastore if a metadata file was provided
    let datastore = match std::env::var(METADATA_FILE_ENV) {
        Ok(path) => {
            info!("Seeding package datastore from {}", path);
            MemoryDatastore::from_yaml(&std::fs::read_to_string(&path)?)?
        }
        Err(_) => MemoryDatastore::new(),
    };

    // Create shared context
    let context = Context::new(client.clone(), Arc::new(datastore), server_image);

    // Start metrics server
    let metrics_handle = tokio::spawn(metrics::serve(METRICS_PORT));
    info!("Metrics server starting on port {}", METRICS_PORT);

    // Run the registry controller
    let controller_handle = tokio::spawn(registry_controller::run(context));

    // Handle graceful shutdown
    tokio::select! {
        _ = controller_handle => {
            error!("Registry controller exited unexpectedly");
        }
        _ = metrics_handle => {
            error!("Metrics server exited unexpectedly");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping operator");
        }
    }

    info!("Marketplace Registry Operator stopped");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,marketplace_registry_operator=debug,kube=warn,hyper=warn")
    });

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
