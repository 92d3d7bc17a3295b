//! sluice-server - REST API server binary.

use sluice_server::{create_server, AppState, ServerConfig};
use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive(Level::INFO.into())
                .add_directive("sluice_server=debug".parse()?),
        )
        .init();

    // A config file, when given, replaces the defaults; env still wins.
    let mut config = match std::env::var("SLUICE_CONFIG") {
        Ok(path) => {
            info!(path = %path, "Loading configuration file");
            ServerConfig::from_file(&path)?
        }
        Err(_) => ServerConfig::default(),
    };
    config.apply_env(|key| std::env::var(key).ok())?;

    let state = AppState::from_config(&config.engine)?;

    if let Err(e) = state.engine.start().await {
        error!(error = %e, "Failed to start event engine");
        return Err(e.into());
    }

    let app = create_server(state.clone());

    // Start server
    let addr = config.addr()?;
    info!("Starting sluice-server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_signal().await;
            info!("Shutdown signal received, stopping engine...");
        })
        .await?;

    state.engine.shutdown().await;

    info!("Server stopped cleanly");
    Ok(())
}
