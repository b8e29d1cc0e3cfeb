//! gRPC-Web bridge invocation.
//!
//! Framing, trailer encoding and the base64 text variant are all handled by
//! `tonic_web`. This module only adapts bodies so the continuation, which
//! speaks `axum::body::Body`, can sit behind `GrpcWebLayer`.

use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, Response};
use futures_util::future::BoxFuture;
use tonic_web::GrpcWebLayer;
use tower::{BoxError, Layer, Service, ServiceExt};

/// Presents an axum-bodied service as a tonic-bodied one.
#[derive(Debug, Clone)]
pub struct Continuation<S> {
    inner: S,
}

impl<S> Continuation<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S> Service<Request<tonic::body::Body>> for Continuation<S>
where
    S: Service<Request<Body>, Response = Response<Body>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response<tonic::body::Body>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<tonic::body::Body>) -> Self::Future {
        let fut = self.inner.call(req.map(Body::new));
        Box::pin(async move {
            let response = fut.await?;
            Ok(response.map(tonic::body::Body::new))
        })
    }
}

/// Drive one request through tonic-web with `continuation` as the gRPC handler.
pub async fn bridge<S>(continuation: S, req: Request<Body>) -> Result<Response<Body>, S::Error>
where
    S: Service<Request<Body>, Response = Response<Body>>,
    S::Future: Send + 'static,
    S::Error: Into<BoxError> + Send + 'static,
{
    let service = GrpcWebLayer::new().layer(Continuation::new(continuation));
    let response = service.oneshot(req).await?;
    Ok(response.map(Body::new))
}
