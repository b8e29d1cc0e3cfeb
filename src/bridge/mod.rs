//! gRPC-Web bridging subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request
//!     → classify.rs (gRPC-Web / grpc-websockets / plain)
//!     → layer.rs (dispatch)
//!         gRPC-Web        → grpc_web.rs  (tonic-web)        → continuation
//!         grpc-websockets → websocket.rs (axum ws + tonic-web) → continuation
//!         plain           → continuation
//! ```
//!
//! # Design Decisions
//! - No per-request state is kept between calls
//! - Protocol translation is delegated to tonic-web; only body and
//!   transport adaptation happens here
//! - The continuation is any tower service over `axum::body::Body`

pub mod classify;
pub mod grpc_web;
pub mod layer;
pub mod websocket;

pub use classify::{classify, is_grpc_web, is_grpc_websocket, RequestKind};
pub use layer::{GrpcWebBridge, GrpcWebBridgeLayer};
pub use websocket::BridgeError;
