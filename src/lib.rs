//! gRPC-Web bridge library.
//!
//! Classifies inbound HTTP requests as gRPC-Web, grpc-websockets or plain,
//! bridges the first two onto a native gRPC upstream and passes the rest
//! through untouched.

pub mod bridge;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use bridge::{GrpcWebBridge, GrpcWebBridgeLayer, RequestKind};
pub use config::BridgeConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
