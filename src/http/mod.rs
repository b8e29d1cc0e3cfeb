//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack)
//!     → request.rs (request ID, tracing span)
//!     → bridge (classify, bridge or pass through)
//!     → upstream.rs (forward to gRPC server over h2c)
//!     → Send to client
//! ```

pub mod request;
pub mod server;
pub mod upstream;

pub use request::X_REQUEST_ID;
pub use server::{HttpServer, ServerError};
pub use upstream::Upstream;
