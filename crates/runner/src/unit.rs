//! Execution unit: one job from login to upload.
//!
//! Every unit logs in on its own and owns its own HTTP client, so a
//! rejected or expired token in one job never affects another. The
//! unit produces at most one upload, and that upload always carries a
//! complete [`Measurement`].

use std::sync::Arc;

use dci_coordinator::api::CoordinatorApi;
use dci_core::{Job, Measurement, MeasurementId};

use crate::config::Config;
use crate::executor::{ContainerRuntime, RunSpec};

/// Final state of an execution unit, reported to the worker pool.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome {
    /// The coordinator accepted the upload.
    Reported {
        measurement_id: MeasurementId,
        /// `true` when the sentinel measurement was uploaded.
        degraded: bool,
    },
    /// A measurement was produced but the upload did not succeed.
    UploadFailed {
        measurement_id: MeasurementId,
        degraded: bool,
        reason: String,
    },
    /// No measurement was produced; nothing was uploaded.
    Aborted {
        measurement_id: MeasurementId,
        reason: String,
    },
}

/// Run one job to completion.
pub async fn run_unit(
    config: Arc<Config>,
    runtime: Arc<dyn ContainerRuntime>,
    job: Job,
) -> UnitOutcome {
    let measurement_id = job.measurement_id;
    let aborted = |reason: String| UnitOutcome::Aborted {
        measurement_id,
        reason,
    };

    let mut api = CoordinatorApi::new(
        config.api_url(),
        config.credentials.clone(),
        config.login_policy,
    );
    if let Err(e) = api.login().await {
        return aborted(format!("login failed: {e}"));
    }

    let image = match runtime.resolve_image(&config.image_version).await {
        Ok(image) => image,
        Err(e) => return aborted(e.to_string()),
    };

    let spec = RunSpec::for_job(&job, &config.network_name, &config.sonar_url());
    let (measurement, degraded) = match runtime.run(&image, &spec).await {
        Ok(stdout) => match Measurement::from_output(measurement_id, &stdout) {
            Ok(measurement) => (measurement, false),
            Err(e) => return aborted(format!("unusable container output: {e}")),
        },
        Err(e) if e.is_container_failure() => {
            tracing::warn!(
                measurement_id,
                project = %job.project_name,
                error = %e,
                "Container run failed, reporting sentinel",
            );
            (Measurement::sentinel(), true)
        }
        Err(e) => return aborted(e.to_string()),
    };

    match api.upload_measurement(measurement_id, &measurement).await {
        Ok(()) => UnitOutcome::Reported {
            measurement_id,
            degraded,
        },
        Err(e) => {
            tracing::warn!(measurement_id, error = %e, "Unable to upload measurement");
            UnitOutcome::UploadFailed {
                measurement_id,
                degraded,
                reason: e.to_string(),
            }
        }
    }
}
