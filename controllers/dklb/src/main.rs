//! dklb
//!
//! Kubernetes controller exposing Ingresses and `LoadBalancer` Services
//! through EdgeLB pools:
//! - Services of type `LoadBalancer` get one TCP frontend per port
//! - Ingresses annotated with the `edgelb` class get HTTP/HTTPS frontends
//!   routing hosts and paths to their backend Services
//! - An admission webhook persists defaulted pool configuration and rejects
//!   changes to a pool's identity

mod admission;
mod backoff;
mod cache;
mod config;
mod controller;
mod engine;
mod error;
mod events;
mod reconciler;
mod translator;
mod watcher;
mod workqueue;
mod writer;

#[cfg(test)]
mod test_utils;

use crate::config::Config;
use crate::controller::Controller;
use crate::error::ControllerError;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,dklb=debug".into()))
        .init();

    // Both the Kubernetes and EdgeLB clients use rustls; fails only if already installed
    let _ = rustls::crypto::ring::default_provider().install_default();

    info!("Starting dklb");

    let config = Config::from_env()?;
    info!("Configuration:");
    info!("  Cluster name: {}", config.cluster_name);
    info!("  EdgeLB URL: {}", config.edgelb.url);
    info!("  Namespace: {}", config.watch_namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Workers: {} ingress, {} service", config.ingress_workers, config.service_workers);
    info!("  Recreation policy: {:?}", config.recreation_policy);

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    let controller = Controller::new(config).await?;
    controller.run(cancel).await
}

async fn shutdown_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received interrupt"),
        () = terminate => info!("Received SIGTERM"),
    }
    cancel.cancel();
}
