//! Request identification.
//!
//! # Responsibilities
//! - Name the request ID header
//! - Build the per-request tracing span (method, path, kind, request ID)
//!
//! # Design Decisions
//! - Request ID is assigned by tower-http before the span is created
//! - Classification is repeated for the span; it only reads headers

use axum::http::{HeaderName, Request};
use tracing::Span;

use crate::bridge::classify;

/// Header carrying the request correlation ID.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Read the request ID, if one has been assigned.
pub fn request_id<B>(req: &Request<B>) -> &str {
    req.headers()
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// Span factory for `TraceLayer::make_span_with`.
pub fn make_span<B>(req: &Request<B>) -> Span {
    tracing::info_span!(
        "request",
        method = %req.method(),
        path = %req.uri().path(),
        kind = %classify(req),
        request_id = %request_id(req),
    )
}
