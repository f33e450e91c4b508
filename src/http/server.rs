//! HTTP server implementation.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::{error, info};

use super::service::{router, SharedState};
use crate::error::{GateError, Result};

/// HTTP server for the admission API.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Handler state
    state: SharedState,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, state: SharedState) -> Self {
        Self { addr, state }
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;

        info!(
            addr = %listener.local_addr()?,
            backend = self.state.decider.name(),
            "Starting HTTP server for admission API"
        );

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                GateError::Io(e)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FailurePolicy, LimitsConfig};
    use crate::http::AppState;
    use crate::ratelimit::LocalDecider;
    use std::sync::Arc;

    fn state() -> SharedState {
        Arc::new(AppState::new(
            Arc::new(LocalDecider::new()),
            LimitsConfig::default(),
            FailurePolicy::Closed,
        ))
    }

    #[tokio::test]
    async fn test_server_stops_on_signal() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let server = HttpServer::new(addr, state());

        server.serve_with_shutdown(async {}).await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();

        let err = HttpServer::new(addr, state())
            .serve_with_shutdown(async {})
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Io(_)));
    }
}
