//! Coordinator client library.
//!
//! Provides the HTTP API wrapper used to log in and upload
//! measurements, the bearer session that backs it, and the WebSocket
//! handshake for the `/jobs` stream.

pub mod api;
pub mod client;
pub mod session;
