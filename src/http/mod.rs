//! HTTP surface.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, timeout, body limit, tracing)
//!     → handlers.rs (decode body, call the trigger service)
//!     → error.rs (typed errors → JSON with a generic message)
//! ```

pub mod error;
pub mod handlers;
pub mod server;

pub use error::ApiError;
pub use server::{build_router, AppState, HttpServer, X_REQUEST_ID};
