//! The bridging middleware.
//!
//! Classifies every request and either hands it to the matching bridge
//! together with the wrapped service as continuation, or calls the wrapped
//! service directly. Errors from the continuation come back unchanged.

use std::fmt::Display;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, Response};
use futures_util::future::BoxFuture;
use tower::{BoxError, Layer, Service};

use crate::bridge::classify::{classify, RequestKind};
use crate::bridge::{grpc_web, websocket};
use crate::config::BridgeSettings;
use crate::config::schema::MIN_WEBSOCKET_PING_MS;
use crate::observability::metrics;

/// Layer that applies [`GrpcWebBridge`].
#[derive(Debug, Clone, Default)]
pub struct GrpcWebBridgeLayer {
    websocket_ping: Option<Duration>,
}

impl GrpcWebBridgeLayer {
    /// A layer with WebSocket pinging disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable WebSocket keep-alive pings. Intervals under one second disable pinging.
    pub fn with_websocket_ping(mut self, interval: Duration) -> Self {
        self.websocket_ping = (interval >= Duration::from_millis(MIN_WEBSOCKET_PING_MS)).then_some(interval);
        self
    }

    pub fn from_settings(settings: &BridgeSettings) -> Self {
        Self {
            websocket_ping: settings.websocket_ping(),
        }
    }

    pub fn websocket_ping(&self) -> Option<Duration> {
        self.websocket_ping
    }
}

impl<S> Layer<S> for GrpcWebBridgeLayer {
    type Service = GrpcWebBridge<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GrpcWebBridge {
            inner,
            websocket_ping: self.websocket_ping,
        }
    }
}

/// Service bridging gRPC-Web and grpc-websockets requests onto `S`.
#[derive(Debug, Clone)]
pub struct GrpcWebBridge<S> {
    inner: S,
    websocket_ping: Option<Duration>,
}

impl<S> Service<Request<Body>> for GrpcWebBridge<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError> + Display + Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let kind = classify(&req);

        // Take the service that was driven to readiness and leave a clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let ping = self.websocket_ping;

        tracing::debug!(
            kind = %kind,
            method = %req.method(),
            path = %req.uri().path(),
            "Dispatching request"
        );

        Box::pin(async move {
            let start = Instant::now();
            let result = match kind {
                RequestKind::GrpcWeb => grpc_web::bridge(inner, req).await,
                RequestKind::GrpcWebSocket => Ok(websocket::bridge(inner, req, ping).await),
                RequestKind::Plain => inner.call(req).await,
            };

            match &result {
                Ok(response) => metrics::record_request(kind, response.status().as_u16(), start),
                Err(e) => tracing::error!(kind = %kind, error = %e, "Continuation failed"),
            }
            result
        })
    }
}
