//! `dci-runner` library crate.
//!
//! Re-exports internal modules for integration testing. The binary
//! entrypoint lives in `main.rs`.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod pool;
pub mod supervisor;
pub mod unit;
