use anyhow::Result;
use meshgate_control::apis::gateway::watcher::spawn_watchers;
use meshgate_control::apis::metrics::gather_controller_metrics;
use meshgate_control::gvk;
use meshgate_control::push::LoggingPushSink;
use meshgate_control::store::MemoryStore;
use meshgate_control::{ControllerConfig, Coordinator};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

/// meshgate control plane
///
/// Watches Gateway API objects and keeps the derived mesh routing config current.
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize rustls crypto provider (needed for Kubernetes TLS client)
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok(); // Ignore error if already installed

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("meshgate control plane starting");

    let config = ControllerConfig::from_env()?;
    info!("   Controller: {}", config.controller_name);
    info!("   Domain suffix: {}", config.domain_suffix);

    let store = MemoryStore::new();
    let coordinator = Coordinator::new(
        Arc::new(store.clone()),
        Arc::new(LoggingPushSink),
        config.translation_options(),
    );
    store.subscribe(coordinator.event_sender());

    coordinator.register_event_handler(gvk::GATEWAY, |_, new, event| {
        if let Some(config) = new {
            debug!("Gateway {} {}", config.key(), event);
        }
    });
    coordinator.register_event_handler(gvk::VIRTUAL_SERVICE, |_, new, event| {
        if let Some(config) = new {
            debug!("VirtualService {} {}", config.key(), event);
        }
    });

    let mut watcher_handles = vec![];

    if config.k8s_mode {
        info!("Kubernetes mode enabled - starting Gateway API watchers");

        match kube::Client::try_default().await {
            Ok(client) => {
                watcher_handles = spawn_watchers(client, store.clone());
                info!("Gateway API watchers started");
            }
            Err(e) => {
                warn!("Failed to create Kubernetes client: {}", e);
                warn!("Running store-only, no objects will be watched");
            }
        }
    } else {
        info!("Standalone mode - store-only, no objects will be watched");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = coordinator.run(shutdown_rx)?;
    coordinator.reconcile()?;

    info!("Press Ctrl-C to exit.");
    signal::ctrl_c().await?;
    info!("Shutdown signal received");

    for handle in watcher_handles {
        handle.abort();
    }
    shutdown_tx.send(true).ok();
    worker.await?;

    let snapshot = coordinator.snapshot();
    info!("Final snapshot version {}", snapshot.version());
    match gather_controller_metrics() {
        Ok(metrics) => debug!("Controller metrics:\n{}", metrics),
        Err(e) => warn!("{}", e),
    }

    Ok(())
}
