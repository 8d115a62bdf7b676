//! Keygate
//!
//! JWT authorization gateway speaking the Redis protocol.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing (JSON when `KEYGATE_LOG_JSON=true`)
//! 3. Initialize Prometheus metrics recorder (if configured)
//! 4. Connect the storage backend (Redis or in-memory)
//! 5. Build verifier, token cache, validator and gate
//! 6. Bind the RESP listener and serve until SIGTERM/Ctrl+C

#![warn(clippy::pedantic)]

use common::secret::ExposeSecret;
use keygate::config::Config;
use keygate::errors::StartupError;
use keygate::gate::CommandAuthorizationGate;
use keygate::observability::metrics::init_metrics_recorder;
use keygate::server::GatewayServer;
use keygate::store::{Backend, MemoryStore, RedisStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration first: it decides the log format
    let config = Config::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {e}");
        e
    })?;

    init_tracing(config.log_json);

    info!("Starting Keygate");
    info!(
        bind_address = %config.bind_address,
        organization = %config.jwt_organization,
        namespace = %config.jwt_namespace,
        auth_commands = ?config.auth_commands,
        token_cache_capacity = config.token_cache_capacity,
        negative_cache_ttl_seconds = config.negative_cache_ttl.as_secs(),
        backend = if config.backend_url.is_some() { "redis" } else { "memory" },
        "Configuration loaded successfully"
    );

    if let Some(metrics_address) = &config.metrics_bind_address {
        let addr: SocketAddr = metrics_address.parse().map_err(|e| {
            error!(error = %e, addr = %metrics_address, "Invalid metrics bind address");
            StartupError::Metrics(format!("Invalid metrics bind address: {e}"))
        })?;
        init_metrics_recorder(addr).map_err(|e| {
            error!(error = %e, "Failed to install Prometheus metrics recorder");
            StartupError::Metrics(e)
        })?;
        info!(addr = %addr, "Prometheus metrics endpoint started");
    }

    let backend: Arc<dyn Backend> = match &config.backend_url {
        Some(url) => {
            info!("Connecting to Redis backend...");
            let store = RedisStore::connect(url.expose_secret())
                .await
                .map_err(StartupError::from)?;
            info!("Redis backend connection established");
            Arc::new(store)
        }
        None => {
            info!("Using in-memory backend");
            Arc::new(MemoryStore::new())
        }
    };

    let gate = CommandAuthorizationGate::from_config(&config, backend).map_err(|e| {
        error!(error = %e, "Failed to initialize authorization gate");
        e
    })?;
    let gate = Arc::new(gate);

    let server = GatewayServer::bind(&config.bind_address, Arc::clone(&gate))
        .await
        .map_err(|e| {
            error!(error = %e, addr = %config.bind_address, "Failed to bind RESP listener");
            StartupError::Io(e)
        })?;
    info!(addr = %server.local_addr()?, "RESP listener bound successfully");

    let shutdown_token = CancellationToken::new();
    let server_handle = tokio::spawn(server.run(shutdown_token.child_token()));

    info!("Keygate running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");
    shutdown_token.cancel();

    if let Err(e) = server_handle.await {
        error!(error = %e, "RESP server task failed");
    }

    info!("Keygate shutdown complete");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "keygate=debug,common=info".into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Wait for SIGTERM or Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
