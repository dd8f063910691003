use crate::types::MeasurementId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Malformed job message: {0}")]
    MalformedJob(#[source] serde_json::Error),

    #[error("Malformed measurement output for {measurement_id}: {source}")]
    MalformedMeasurement {
        measurement_id: MeasurementId,
        #[source]
        source: serde_json::Error,
    },
}
