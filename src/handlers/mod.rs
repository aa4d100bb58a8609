//! # HTTP API Handlers
//!
//! REST surface next to the WebSocket endpoint: runtime configuration
//! inspection and updates. Credentials never appear here; they live only in
//! the process environment.

pub mod config;

pub use config::*;
