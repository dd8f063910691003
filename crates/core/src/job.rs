//! Job descriptors pushed by the coordinator over the `/jobs` stream.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::MeasurementId;

/// One project to analyse.
///
/// Decoded from a single incoming message and consumed by exactly one
/// execution unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub measurement_id: MeasurementId,
    pub project_name: String,
    pub project_version: String,
    pub github_url: String,
    pub purl: String,
}

impl Job {
    /// Decode a raw frame payload.
    ///
    /// The payload must be a UTF-8 JSON object carrying every field of
    /// [`Job`]. Unknown extra fields are ignored.
    pub fn decode(raw: &[u8]) -> Result<Self, CoreError> {
        serde_json::from_slice(raw).map_err(CoreError::MalformedJob)
    }
}
