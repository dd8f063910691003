//! Shared data model for the DCI job runner.
//!
//! Holds the wire types exchanged with the coordinator ([`Job`],
//! [`Measurement`]) and the error type for decoding them. Lives in its
//! own crate so the coordinator client and the runner agree on one
//! definition.

pub mod error;
pub mod job;
pub mod measurement;
pub mod types;

pub use error::CoreError;
pub use job::Job;
pub use measurement::Measurement;
pub use types::MeasurementId;
