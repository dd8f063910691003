//! Container lifecycle for one analysis run.
//!
//! [`ContainerRuntime`] is the seam between an execution unit and the
//! container engine. [`CliRuntime`] drives a podman (or docker
//! compatible) CLI through `tokio::process::Command`; tests substitute
//! an in-memory runtime.
//!
//! Errors are split so the caller can tell a failed *container* (the
//! analysis exited non-zero, reported with the sentinel measurement)
//! from a failed *engine* (no measurement is produced at all).

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use dci_core::Job;
use tokio::process::Command;

/// Exit status podman and docker use for "the engine itself failed",
/// as opposed to the containerised command failing.
const ENGINE_FAILURE_EXIT_CODE: i32 = 125;

/// Registry prefix podman gives to locally built images.
const LOCAL_REGISTRY: &str = "localhost";

/// A locally available analysis image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHandle {
    /// Reference passed to `run`, e.g. `localhost/dci-container:1.4`.
    pub reference: String,
}

/// Everything needed to start one analysis container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    /// Environment passed with `-e KEY=VALUE`, in order.
    pub env: Vec<(String, String)>,
    /// Network to attach; also used as the container's network alias.
    pub network: String,
}

impl RunSpec {
    /// Build the run spec for a job.
    ///
    /// * `sonar_url` - metrics endpoint reachable from inside `network`.
    pub fn for_job(job: &Job, network: &str, sonar_url: &str) -> Self {
        Self {
            env: vec![
                ("PROJECT_NAME".into(), job.project_name.clone()),
                ("PROJECT_VERSION".into(), job.project_version.clone()),
                ("GITHUB_URL".into(), job.github_url.clone()),
                ("PURL".into(), job.purl.clone()),
                ("SONAR_HOST".into(), sonar_url.to_string()),
            ],
            network: network.to_string(),
        }
    }
}

/// Errors from resolving images or running containers.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The container ran and exited non-zero.
    #[error("Container exited with status {exit_code:?}")]
    ContainerFailed { exit_code: Option<i32> },

    /// Building the analysis image failed.
    #[error("Failed to build image {image}: {stderr}")]
    BuildFailed { image: String, stderr: String },

    /// The engine could not be invoked or reported its own failure.
    #[error("Container engine error: {0}")]
    Engine(String),
}

impl ExecutorError {
    /// Whether this failure belongs to the container rather than the
    /// engine. Only these failures are reported with a sentinel.
    pub fn is_container_failure(&self) -> bool {
        matches!(self, Self::ContainerFailed { .. })
    }
}

/// Container engine operations used by an execution unit.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Find the image for `version_tag`, building it if it is not cached.
    async fn resolve_image(&self, version_tag: &str) -> Result<ImageHandle, ExecutorError>;

    /// Run one container to completion and return its stdout.
    ///
    /// The container is removed on exit and its stderr is discarded.
    async fn run(&self, image: &ImageHandle, spec: &RunSpec) -> Result<String, ExecutorError>;
}

/// [`ContainerRuntime`] backed by the podman/docker command line.
#[derive(Debug, Clone)]
pub struct CliRuntime {
    engine: String,
    image_name: String,
    build_context: PathBuf,
}

impl CliRuntime {
    /// * `engine`        - CLI binary, e.g. `podman`.
    /// * `image_name`    - repository name without tag, e.g. `dci-container`.
    /// * `build_context` - directory holding the analysis `Dockerfile`.
    pub fn new(engine: String, image_name: String, build_context: PathBuf) -> Self {
        Self {
            engine,
            image_name,
            build_context,
        }
    }

    /// Image reference for a version tag. Only locally built images
    /// are used, never a same-named image from a registry.
    pub fn image_reference(&self, version_tag: &str) -> String {
        format!("{LOCAL_REGISTRY}/{}:{}", self.image_name, version_tag)
    }

    fn build_args(&self, reference: &str) -> Vec<String> {
        vec![
            "build".into(),
            "-t".into(),
            reference.to_string(),
            "-f".into(),
            self.build_context.join("Dockerfile").display().to_string(),
            self.build_context.display().to_string(),
        ]
    }

    async fn image_exists(&self, reference: &str) -> Result<bool, ExecutorError> {
        let status = Command::new(&self.engine)
            .args(["image", "inspect", "--format", "{{.Id}}", reference])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| ExecutorError::Engine(format!("Failed to execute {}: {e}", self.engine)))?;

        Ok(status.success())
    }
}

/// Arguments for `<engine> run`.
pub fn run_args(image: &ImageHandle, spec: &RunSpec) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--rm".to_string(),
        format!("--network={}", spec.network),
        format!("--network-alias={}", spec.network),
    ];
    for (key, value) in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }
    args.push(image.reference.clone());
    args
}

/// Map a non-zero exit of `<engine> run` to an error.
pub fn classify_exit(exit_code: Option<i32>) -> ExecutorError {
    match exit_code {
        Some(ENGINE_FAILURE_EXIT_CODE) => ExecutorError::Engine(format!(
            "engine exited with status {ENGINE_FAILURE_EXIT_CODE}"
        )),
        other => ExecutorError::ContainerFailed { exit_code: other },
    }
}

#[async_trait]
impl ContainerRuntime for CliRuntime {
    async fn resolve_image(&self, version_tag: &str) -> Result<ImageHandle, ExecutorError> {
        let reference = self.image_reference(version_tag);

        if self.image_exists(&reference).await? {
            tracing::debug!(image = %reference, "Using cached image");
            return Ok(ImageHandle { reference });
        }

        tracing::info!(
            image = %reference,
            context = %self.build_context.display(),
            "Building analysis image",
        );

        let output = Command::new(&self.engine)
            .args(self.build_args(&reference))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ExecutorError::Engine(format!("Failed to execute {}: {e}", self.engine)))?;

        if !output.status.success() {
            return Err(ExecutorError::BuildFailed {
                image: reference,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(ImageHandle { reference })
    }

    async fn run(&self, image: &ImageHandle, spec: &RunSpec) -> Result<String, ExecutorError> {
        let output = Command::new(&self.engine)
            .args(run_args(image, spec))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|e| ExecutorError::Engine(format!("Failed to execute {}: {e}", self.engine)))?;

        if !output.status.success() {
            return Err(classify_exit(output.status.code()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
