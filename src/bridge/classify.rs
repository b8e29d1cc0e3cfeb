//! Request classification.
//!
//! # Responsibilities
//! - Recognise gRPC-Web requests (POST + `application/grpc-web*` content type)
//! - Recognise grpc-websockets upgrades (`Upgrade: websocket` + subprotocol)
//! - Leave everything else as plain HTTP
//!
//! # Design Decisions
//! - Only the first value of each header is considered
//! - Content-type prefix match is case-sensitive; upgrade values are not
//! - Non-UTF-8 header values never match

use axum::http::{header, HeaderMap, HeaderName, Method, Request};

/// Content-type prefix shared by every gRPC-Web variant.
pub const GRPC_WEB_CONTENT_TYPE: &str = "application/grpc-web";

/// WebSocket subprotocol spoken by grpc-websockets clients.
pub const GRPC_WEBSOCKETS_PROTOCOL: &str = "grpc-websockets";

/// How an inbound request should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// gRPC-Web over plain HTTP.
    GrpcWeb,
    /// gRPC-Web tunnelled over a WebSocket.
    GrpcWebSocket,
    /// Anything else; passed through untouched.
    Plain,
}

impl RequestKind {
    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::GrpcWeb => "grpc_web",
            RequestKind::GrpcWebSocket => "grpc_websocket",
            RequestKind::Plain => "plain",
        }
    }

    /// True for the two variants that go through a bridge.
    pub fn is_bridged(&self) -> bool {
        !matches!(self, RequestKind::Plain)
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a request.
pub fn classify<B>(req: &Request<B>) -> RequestKind {
    if is_grpc_web(req) {
        RequestKind::GrpcWeb
    } else if is_grpc_websocket(req) {
        RequestKind::GrpcWebSocket
    } else {
        RequestKind::Plain
    }
}

/// Returns true for a gRPC-Web request.
pub fn is_grpc_web<B>(req: &Request<B>) -> bool {
    req.method() == Method::POST
        && first_value(req.headers(), &header::CONTENT_TYPE)
            .map(|ct| ct.starts_with(GRPC_WEB_CONTENT_TYPE))
            .unwrap_or(false)
}

/// Returns true for a grpc-websockets upgrade request.
pub fn is_grpc_websocket<B>(req: &Request<B>) -> bool {
    let headers = req.headers();
    let upgrade = first_value(headers, &header::UPGRADE)
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    let protocol = first_value(headers, &header::SEC_WEBSOCKET_PROTOCOL)
        .map(|v| v.eq_ignore_ascii_case(GRPC_WEBSOCKETS_PROTOCOL))
        .unwrap_or(false);
    upgrade && protocol
}

fn first_value<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
