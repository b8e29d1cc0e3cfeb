//! Upstream forwarding.
//!
//! # Responsibilities
//! - Rewrite the request URI onto the configured upstream
//! - Strip hop-by-hop headers before forwarding
//! - Send over cleartext HTTP/2 and stream the response (trailers included) back
//!
//! # Design Decisions
//! - HTTP/2 prior knowledge only; gRPC servers rarely speak anything else
//! - No buffering: request and response bodies are streamed
//! - Connection failures map to 502 Bad Gateway

use std::str::FromStr;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::uri::{Authority, InvalidUri, PathAndQuery, Scheme};
use axum::http::{header, HeaderMap, HeaderName, Request, Response, StatusCode, Uri, Version};
use axum::response::IntoResponse;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::observability::metrics;

/// Connection-level headers that must not be forwarded.
const HOP_BY_HOP: [HeaderName; 4] = [
    header::CONNECTION,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::HOST,
];

/// Non-standard connection headers, matched by name.
const HOP_BY_HOP_EXTRA: [&str; 2] = ["keep-alive", "proxy-connection"];

/// The downstream gRPC server every request is forwarded to.
#[derive(Debug, Clone)]
pub struct Upstream {
    client: Client<HttpConnector, Body>,
    authority: Authority,
}

impl Upstream {
    /// Create a forwarder for `address` (`host:port`).
    pub fn new(address: &str, connect_timeout: Duration) -> Result<Self, InvalidUri> {
        let authority = Authority::from_str(address)?;

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new())
            .http2_only(true)
            .build(connector);

        Ok(Self { client, authority })
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Forward a request and return the upstream response.
    pub async fn forward(&self, request: Request<Body>) -> Response<Body> {
        let (mut parts, body) = request.into_parts();
        let path = parts.uri.path().to_string();

        parts.uri = match self.rewrite_uri(parts.uri) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Failed to build upstream URI");
                return (StatusCode::BAD_REQUEST, "Invalid request URI").into_response();
            }
        };
        parts.version = Version::HTTP_2;
        strip_hop_by_hop(&mut parts.headers);

        match self.client.request(Request::from_parts(parts, body)).await {
            Ok(response) => response.map(Body::new),
            Err(e) => {
                tracing::error!(
                    upstream = %self.authority,
                    path = %path,
                    error = %e,
                    "Upstream error"
                );
                metrics::record_upstream_error();
                (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
            }
        }
    }

    fn rewrite_uri(&self, uri: Uri) -> Result<Uri, axum::http::uri::InvalidUriParts> {
        let mut parts = uri.into_parts();
        parts.scheme = Some(Scheme::HTTP);
        parts.authority = Some(self.authority.clone());
        if parts.path_and_query.is_none() {
            parts.path_and_query = Some(PathAndQuery::from_static("/"));
        }
        Uri::from_parts(parts)
    }
}

/// Axum handler forwarding everything to the upstream in state.
pub async fn forward_handler(State(upstream): State<Upstream>, request: Request<Body>) -> Response<Body> {
    upstream.forward(request).await
}

/// Remove connection-level headers. `te` survives only as `trailers`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_EXTRA {
        headers.remove(name);
    }

    let te_trailers = headers
        .get_all(header::TE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("trailers")));
    headers.remove(header::TE);
    if te_trailers {
        headers.insert(header::TE, header::HeaderValue::from_static("trailers"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn strips_connection_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, upgrade"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(header::HOST, HeaderValue::from_static("example.com"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/grpc"));
        headers.insert("x-request-id", HeaderValue::from_static("abc"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 2);
        assert_eq!(headers[header::CONTENT_TYPE], "application/grpc");
        assert_eq!(headers["x-request-id"], "abc");
    }

    #[test]
    fn te_kept_only_as_trailers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::TE, HeaderValue::from_static("gzip, trailers"));
        strip_hop_by_hop(&mut headers);
        assert_eq!(headers[header::TE], "trailers");

        let mut headers = HeaderMap::new();
        headers.insert(header::TE, HeaderValue::from_static("gzip"));
        strip_hop_by_hop(&mut headers);
        assert!(headers.get(header::TE).is_none());
    }

    #[tokio::test]
    async fn uri_rewritten_onto_upstream() {
        let upstream = Upstream::new("127.0.0.1:50051", Duration::from_secs(1)).unwrap();
        let uri = upstream
            .rewrite_uri(Uri::from_static("/echo.Echo/Say?x=1"))
            .unwrap();
        assert_eq!(uri.to_string(), "http://127.0.0.1:50051/echo.Echo/Say?x=1");
    }

    #[tokio::test]
    async fn unreachable_upstream_is_bad_gateway() {
        // Port 9 (discard) on loopback is not expected to accept connections.
        let upstream = Upstream::new("127.0.0.1:9", Duration::from_millis(200)).unwrap();
        let request = Request::builder()
            .uri("/echo.Echo/Say")
            .body(Body::empty())
            .unwrap();
        let response = upstream.forward(request).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
