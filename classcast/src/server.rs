//! Server lifecycle management
//!
//! Binds the HTTP/WebSocket listener and runs it until a shutdown signal
//! arrives; graceful shutdown stops accepting connections and lets axum
//! drain the ones in flight.

use std::sync::Arc;
use tracing::{error, info};

use classcast_api::AppState;
use classcast_core::Config;

/// Classcast server - owns the HTTP listener
pub struct ClasscastServer {
    config: Arc<Config>,
    state: AppState,
}

impl ClasscastServer {
    pub const fn new(config: Arc<Config>, state: AppState) -> Self {
        Self { config, state }
    }

    /// Bind, serve, and wait for a shutdown signal
    pub async fn start(self) -> anyhow::Result<()> {
        let address = self.config.http_address();
        let router = classcast_api::http::create_router().with_state(self.state);

        let listener = tokio::net::TcpListener::bind(&address).await?;
        info!(address = %address, "HTTP server listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C signal");
            }
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
