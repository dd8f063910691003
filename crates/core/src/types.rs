/// Key of a measurement record in the coordinator's store.
pub type MeasurementId = i64;
