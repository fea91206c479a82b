//! HTTP server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, info, warn};

use super::router::{AppState, create_router};
use crate::config::Config;
use crate::{Error, Result};

/// How often abandoned sign-in attempts are dropped
const REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Context tester server
pub struct App {
    config: Config,
    state: Arc<AppState>,
}

impl App {
    /// Create the server from configuration
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let state = Arc::new(AppState::from_config(&config)?);
        Ok(Self { config, state })
    }

    /// Serve until Ctrl+C or SIGTERM
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let app = create_router(Arc::clone(&self.state), &self.config);
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, api = %self.config.api.base_url, engine = %self.config.engine.base_url, "Context tester listening");

        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

        let state = Arc::clone(&self.state);
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REAP_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let reaped = state.pending.reap_expired();
                        if reaped > 0 {
                            debug!(reaped, "Dropped expired sign-in attempts");
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        let mut drain_rx = shutdown_tx.subscribe();
        let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal(shutdown_tx));
        let mut server = tokio::spawn(async move { serve.await });

        tokio::select! {
            joined = &mut server => return finish(joined),
            _ = drain_rx.recv() => {}
        }

        let shutdown_timeout = self.config.server.shutdown_timeout;
        match tokio::time::timeout(shutdown_timeout, server).await {
            Ok(joined) => finish(joined),
            Err(_) => {
                warn!(timeout = ?shutdown_timeout, "Connections still open at shutdown deadline");
                Ok(())
            }
        }
    }
}

fn finish(joined: std::result::Result<std::io::Result<()>, tokio::task::JoinError>) -> Result<()> {
    joined.map_err(|e| Error::Internal(e.to_string()))??;
    info!("Server stopped");
    Ok(())
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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
