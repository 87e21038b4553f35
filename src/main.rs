//! Transaction admission daemon
//!
//! Connects to the configured endpoint, starts the confirmer and keeps the
//! admission layer running until shutdown.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use tx_admission::chain::ChainProvider;
use tx_admission::config::Settings;
use tx_admission::confirm::Confirmer;
use tx_admission::metrics::MetricsServer;
use tx_admission::tx::{Identity, TransactionSender};

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting tx-admission v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;

    let provider = Arc::new(ChainProvider::connect(&settings.client.endpoint).await?);

    let confirmer = Arc::new(Confirmer::new(provider.clone(), &settings.confirmer));
    let sender = Arc::new(TransactionSender::new(
        &settings.client,
        provider.clone(),
        confirmer,
    ));
    sender.start();

    // Report on the configured identity, if any
    if let Some(var) = &settings.wallet.private_key_env {
        match Identity::from_env(var) {
            Ok(identity) => {
                let address = identity.address();
                let nonce = sender.nonce(address).await?;
                let balance = sender.balance(address).await?;
                info!(
                    "Identity {:?}: on-chain nonce {}, balance {} wei",
                    address, nonce, balance
                );
            }
            Err(e) => warn!("Identity not loaded: {}", e),
        }
    }

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Health check loop
    let health_handle = tokio::spawn({
        let provider = provider.clone();
        let sender = sender.clone();
        async move {
            loop {
                tokio::time::sleep(HEALTH_CHECK_INTERVAL).await;

                if !provider.health_check().await {
                    warn!("Endpoint {} health check failed", provider.endpoint());
                }

                let pending = sender.pending();
                info!(
                    "Pending: {} sent, {} unconfirmed",
                    pending.sent_count(),
                    pending.unconfirmed_count()
                );
            }
        }
    });

    info!("tx-admission is running");
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    sender.stop().await;

    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("tx-admission stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tx_admission=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
