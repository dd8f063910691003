//! The twelve-field measurement report uploaded for every job.
//!
//! A [`Measurement`] is always complete: either every field comes from
//! the analysis container, or every field is [`SENTINEL_VALUE`]. There
//! is no way to build one with a subset of fields, and decoding
//! container output fails if any field is missing.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::MeasurementId;

/// Value written to every field when the analysis could not run.
pub const SENTINEL_VALUE: f64 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    #[serde(rename = "vulnDensity")]
    pub vuln_density: f64,
    #[serde(rename = "secDensity")]
    pub sec_density: f64,
    #[serde(rename = "bugDensity")]
    pub bug_density: f64,
    #[serde(rename = "smellDensity")]
    pub smell_density: f64,
    #[serde(rename = "commentDensity")]
    pub comment_density: f64,
    #[serde(rename = "hasLicense")]
    pub has_license: f64,
    #[serde(rename = "usesCI")]
    pub uses_ci: f64,
    #[serde(rename = "codeCoverage")]
    pub code_coverage: f64,
    #[serde(rename = "busFactor")]
    pub bus_factor: f64,
    #[serde(rename = "releaseFrequency")]
    pub release_frequency: f64,
    #[serde(rename = "managesDeps")]
    pub manages_deps: f64,
    pub popularity: f64,
}

impl Measurement {
    /// Uniform fallback report used when the container run fails.
    pub const fn sentinel() -> Self {
        Self {
            vuln_density: SENTINEL_VALUE,
            sec_density: SENTINEL_VALUE,
            bug_density: SENTINEL_VALUE,
            smell_density: SENTINEL_VALUE,
            comment_density: SENTINEL_VALUE,
            has_license: SENTINEL_VALUE,
            uses_ci: SENTINEL_VALUE,
            code_coverage: SENTINEL_VALUE,
            bus_factor: SENTINEL_VALUE,
            release_frequency: SENTINEL_VALUE,
            manages_deps: SENTINEL_VALUE,
            popularity: SENTINEL_VALUE,
        }
    }

    /// Parse the stdout of an analysis container.
    ///
    /// Surrounding whitespace (the trailing newline in particular) is
    /// ignored.
    pub fn from_output(measurement_id: MeasurementId, stdout: &str) -> Result<Self, CoreError> {
        serde_json::from_str(stdout.trim()).map_err(|source| CoreError::MalformedMeasurement {
            measurement_id,
            source,
        })
    }

    /// All twelve values in wire order.
    pub fn values(&self) -> [f64; 12] {
        [
            self.vuln_density,
            self.sec_density,
            self.bug_density,
            self.smell_density,
            self.comment_density,
            self.has_license,
            self.uses_ci,
            self.code_coverage,
            self.bus_factor,
            self.release_frequency,
            self.manages_deps,
            self.popularity,
        ]
    }

    pub fn is_sentinel(&self) -> bool {
        self.values().iter().all(|v| *v == SENTINEL_VALUE)
    }
}
