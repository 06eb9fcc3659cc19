//! HTLC Coordinator - lifecycle orchestration for cross-chain HTLC swaps
//!
//! Tracks swap orders, derives their secrets from a wallet signature and
//! redeems the destination leg once both legs are funded.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use htlc_coordinator::api::{self, AppState};
use htlc_coordinator::chain::{ChainFamily, ChainProvider, ChainRegistry};
use htlc_coordinator::config::{LoggingConfig, Settings};
use htlc_coordinator::coordination::{CoordinatorContext, SwapCoordinator};
use htlc_coordinator::metrics::{self, MetricsServer};
use htlc_coordinator::order::HttpOrderSource;
use htlc_coordinator::redeem::RedemptionDispatcher;
use htlc_coordinator::secret::{CommitmentDeriver, SqliteSecretStore};
use htlc_coordinator::wallet::{LocalEvmWallet, WalletSessions};

const DEFAULT_LOG_FILTER: &str = "info,htlc_coordinator=debug,sqlx=warn,hyper=warn";

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "htlc-coordinator", version, about)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "HTLC_COORDINATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Order IDs to track at startup
    order_ids: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };

    init_logging(&settings.logging);

    info!("Starting HTLC Coordinator v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Loaded configuration for {} chains",
        settings.enabled_chains().len()
    );

    // Secret store
    let store = Arc::new(SqliteSecretStore::connect(&settings.storage).await?);

    // Chain registry and EVM providers
    let registry = Arc::new(ChainRegistry::with_configured(settings.enabled_chains()));
    let mut providers = Vec::new();
    for (name, chain) in settings.enabled_chains() {
        if chain.family != ChainFamily::Evm || chain.rpc_urls.is_empty() {
            continue;
        }
        providers.push(Arc::new(ChainProvider::new(name, chain.clone())?));
    }
    info!("{} EVM chain providers initialized", providers.len());

    // Wallet sessions
    let sessions = Arc::new(WalletSessions::new());
    if let Some(var) = &settings.wallet.evm_private_key_env {
        match LocalEvmWallet::key_from_env(var) {
            Ok(_) if providers.is_empty() => {
                warn!("EVM key configured but no EVM chains have RPC URLs");
            }
            Ok(key) => {
                let wallet = LocalEvmWallet::new(
                    key,
                    providers.clone(),
                    settings.coordinator.receipt_timeout(),
                    settings.coordinator.receipt_poll_interval(),
                )?;
                sessions.connect_evm(Arc::new(wallet)).await;
            }
            Err(e) => warn!("EVM wallet not connected: {}", e),
        }
    }

    // Coordinator
    let source = Arc::new(HttpOrderSource::new(
        &settings.backend.base_url,
        settings.coordinator.request_timeout(),
    )?);
    let coordinator = Arc::new(SwapCoordinator::new(CoordinatorContext {
        source,
        deriver: Arc::new(CommitmentDeriver::new(store.clone())),
        dispatcher: Arc::new(RedemptionDispatcher::new(registry.clone(), sessions.clone())),
        sessions,
        registry,
        poll_interval: settings.coordinator.poll_interval(),
    }));

    for order_id in &cli.order_ids {
        coordinator.track(order_id)?;
    }

    // Start API server
    let api_handle = if settings.api.enabled {
        let state = AppState {
            coordinator: coordinator.clone(),
            store: Some(store.clone()),
            providers: providers.clone(),
        };
        let config = settings.api.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }))
    } else {
        None
    };

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
        let providers = providers.clone();
        let store = store.clone();
        async move {
            loop {
                tokio::time::sleep(HEALTH_CHECK_INTERVAL).await;

                for provider in &providers {
                    let healthy = provider.health_check().await;
                    metrics::record_chain_health(provider.chain_id(), healthy);
                    if !healthy {
                        warn!("Chain {} health check failed", provider.name());
                    }
                }

                if let Err(e) = store.health_check().await {
                    warn!("Secret store health check failed: {}", e);
                }
            }
        }
    });

    info!("HTLC Coordinator is running");
    if settings.api.enabled {
        info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    }
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Graceful shutdown
    coordinator.shutdown_all().await;

    health_handle.abort();
    if let Some(h) = api_handle {
        h.abort();
    }
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("HTLC Coordinator stopped");
    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(config.filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.json {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
