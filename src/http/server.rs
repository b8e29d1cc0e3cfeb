//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the upstream forwarder as the only handler
//! - Wire up middleware (bridge, timeout, request ID, tracing)
//! - Serve on a listener until shutdown is signalled

use std::time::Duration;

use axum::body::Body;
use axum::http::uri::InvalidUri;
use axum::{routing::any, Router};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::bridge::GrpcWebBridgeLayer;
use crate::config::BridgeConfig;
use crate::http::request::{make_span, X_REQUEST_ID};
use crate::http::upstream::{forward_handler, Upstream};

/// Errors raised while building or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid upstream address: {0}")]
    Upstream(#[from] InvalidUri),

    #[error("server IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// HTTP server fronting the upstream gRPC server.
pub struct HttpServer {
    router: Router,
    config: BridgeConfig,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: BridgeConfig) -> Result<Self, ServerError> {
        let upstream = Upstream::new(
            &config.upstream.address,
            Duration::from_secs(config.timeouts.connect_secs),
        )?;

        let router = Self::build_router(&config, upstream);
        Ok(Self { router, config })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &BridgeConfig, upstream: Upstream) -> Router {
        let mut router = Router::new()
            .route("/{*path}", any(forward_handler))
            .route("/", any(forward_handler))
            .with_state(upstream)
            .layer(GrpcWebBridgeLayer::from_settings(&config.bridge));

        if config.timeouts.request_secs > 0 {
            router = router.layer(TimeoutLayer::new(Duration::from_secs(
                config.timeouts.request_secs,
            )));
        }

        router
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(TraceLayer::new_for_http().make_span_with(make_span::<Body>))
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
    }

    /// Run the server until a shutdown signal arrives.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            upstream = %self.config.upstream.address,
            websocket_ping_ms = self.config.bridge.websocket_ping_ms,
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// The assembled router, for serving in-process.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }
}
