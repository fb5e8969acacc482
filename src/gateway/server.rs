//! Interpreter HTTP server

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use super::router::{AppState, create_router};
use crate::config::Config;
use crate::interpreter::Interpreter;
use crate::{Error, Result};

/// Interpreter HTTP server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Request pipeline
    interpreter: Arc<Interpreter>,
}

impl Gateway {
    /// Create a gateway with real MCP connections and the configured model
    pub fn new(config: Config) -> Result<Self> {
        let interpreter = Interpreter::from_config(config.clone())?;
        Ok(Self::with_interpreter(config, Arc::new(interpreter)))
    }

    /// Create a gateway around a prepared interpreter
    pub fn with_interpreter(config: Config, interpreter: Arc<Interpreter>) -> Self {
        Self { config, interpreter }
    }

    /// Run the gateway until Ctrl+C or SIGTERM
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let state = Arc::new(AppState {
            interpreter: Arc::clone(&self.interpreter),
        });
        let app = create_router(state);

        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("MCP INTERPRETER v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(
            "  POST http://{}:{}/interpret",
            self.config.server.host, self.config.server.port
        );
        for backend in self.config.enabled_backends() {
            info!(backend = %backend.name, url = %backend.url, transport = backend.transport_type(), "Backend configured");
        }
        if self.interpreter.backend_count() == 0 {
            warn!("No MCP endpoints configured - requests will fail until one is added");
        }
        if !self.interpreter.model_configured() {
            warn!("GOOGLE_API_KEY not set - requests will fail until it is provided");
        }
        info!("============================================================");

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let timeout = self.config.server.shutdown_timeout;

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal(shutdown_tx));
        let deadline = async move {
            let _ = shutdown_rx.recv().await;
            tokio::time::sleep(timeout).await;
        };

        tokio::select! {
            result = server => result.map_err(|e| Error::Internal(e.to_string()))?,
            () = deadline => warn!(timeout = ?timeout, "Graceful shutdown timed out, dropping in-flight requests"),
        }

        info!("Shutdown complete");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
