//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Init logging/metrics → Bind → Serve
//!
//! Shutdown:
//!     signals.rs (SIGTERM/SIGINT) → shutdown.rs (broadcast)
//!     → HTTP server stops accepting → in-flight requests drain → Exit
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
