//! Pairing proxy - Entry point.

use anyhow::{Context, Result};
use bridge_client::{BridgeClient, BridgeConnector};
use pairing_proxy::{
    api::{create_router_with_rate_limit, AppState, RateLimitState},
    config::{Config, LogConfig, LogFormat},
};
use secrecy::ExposeSecret;
use session_core::{
    open_store, KnownNumbers, LocalCache, PairingConfig, PairingCoordinator, SessionServices,
    WelcomeMessage,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    init_tracing(&config.log);

    if let Err(e) = run(config).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let registry = tracing_subscriber::registry().with(filter);

    match log.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn run(config: Config) -> Result<()> {
    info!("Starting pairing proxy");

    // Initialize storage
    let secret = config
        .store
        .encryption_secret
        .as_ref()
        .map(|s| s.expose_secret().as_str());
    let store = open_store(config.store.url.as_deref(), &config.store.database, secret)
        .await
        .context("Failed to open credential store")?;

    // Initialize bridge client
    let client = BridgeClient::new(&config.bridge.api_url).context("Failed to create bridge client")?;
    if !client.health_check().await {
        info!(url = %config.bridge.api_url, "Protocol bridge not reachable yet");
    }
    let connector = Arc::new(BridgeConnector::new(client, config.bridge.poll_interval));

    // Session hooks
    let mut services = SessionServices::new(store.clone(), LocalCache::new(&config.pairing.cache_dir))
        .with_hook(Arc::new(KnownNumbers::new(store)));
    if config.pairing.send_welcome {
        services = services.with_hook(Arc::new(WelcomeMessage::new(
            config.pairing.welcome_message.clone(),
        )));
    }

    let coordinator = PairingCoordinator::new(
        services,
        connector,
        PairingConfig {
            ready_timeout: config.pairing.ready_timeout,
        },
    );
    let registry = coordinator.registry().clone();

    let state = AppState::new(coordinator);
    let rate_limit = RateLimitState::new(
        config.rate_limit.global_per_minute,
        config.rate_limit.number_per_minute,
    );
    let app = create_router_with_rate_limit(state, rate_limit);

    // Bind to address
    let listen_addr = config
        .server
        .listen_addr
        .parse()
        .with_context(|| format!("Invalid listen address {}", config.server.listen_addr))?;
    let addr = SocketAddr::new(listen_addr, config.server.port);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!(active = registry.count().await, "Closing active sessions");
    registry.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
