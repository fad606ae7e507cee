//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check endpoint
//! - `relay` - SAUC relay WebSocket sessions with recording

pub mod api;
pub mod relay;

pub use relay::relay_handler;
