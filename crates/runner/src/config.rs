use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use dci_coordinator::session::{Credentials, LoginPolicy};

/// Runner configuration loaded once from environment variables.
///
/// Built at startup and shared read-only (behind an `Arc`) with the
/// supervisor and every execution unit.
#[derive(Debug, Clone)]
pub struct Config {
    /// Coordinator login (`DCI_USER` / `PASSWORD`).
    pub credentials: Credentials,
    /// Coordinator host name or address.
    pub host: String,
    /// Coordinator port.
    pub port: u16,
    /// Tag of the analysis image (default: `latest`).
    pub image_version: String,
    /// Container network the analysis joins (default: `dci`).
    pub network_name: String,
    /// Metrics endpoint host reachable from inside the network (default: `sonarqube`).
    pub sonar_host: String,
    /// Metrics endpoint port (default: `9000`).
    pub sonar_port: u16,
    /// Silence on the job stream before a liveness ping (default: 30s).
    pub idle_timeout: Duration,
    /// Maximum number of execution units running at once (default: `4`).
    pub max_concurrent_jobs: usize,
    /// Jobs buffered while all workers are busy (default: `32`).
    pub job_queue_capacity: usize,
    /// Reaction to a rejected login (default: soft).
    pub login_policy: LoginPolicy,
    /// Container engine CLI (default: `podman`).
    pub container_engine: String,
    /// Directory holding the analysis `Dockerfile` (default: `.`).
    pub image_build_context: PathBuf,
    /// Image repository name without tag (default: `dci-container`).
    pub image_name: String,
}

/// Errors raised while reading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{key} has an invalid value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                | Default         |
    /// |------------------------|-----------------|
    /// | `DCI_USER`             | required        |
    /// | `PASSWORD`             | required        |
    /// | `HOST`                 | required        |
    /// | `PORT`                 | required        |
    /// | `IMAGE_VERSION`        | `latest`        |
    /// | `NETWORK_NAME`         | `dci`           |
    /// | `SONAR_HOST`           | `sonarqube`     |
    /// | `SONAR_PORT`           | `9000`          |
    /// | `IDLE_TIMEOUT_SECS`    | `30`            |
    /// | `MAX_CONCURRENT_JOBS`  | `4`             |
    /// | `JOB_QUEUE_CAPACITY`   | `32`            |
    /// | `LOGIN_FAILURE_POLICY` | `soft`          |
    /// | `CONTAINER_ENGINE`     | `podman`        |
    /// | `IMAGE_BUILD_CONTEXT`  | `.`             |
    /// | `IMAGE_NAME`           | `dci-container` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key/value source.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));
        let or_default = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let username = required("DCI_USER")?;
        let password = required("PASSWORD")?;
        let host = required("HOST")?;
        let port = parse("PORT", required("PORT")?)?;

        let idle_timeout_secs: u64 = parse("IDLE_TIMEOUT_SECS", or_default("IDLE_TIMEOUT_SECS", "30"))?;
        let max_concurrent_jobs: usize =
            parse("MAX_CONCURRENT_JOBS", or_default("MAX_CONCURRENT_JOBS", "4"))?;
        let job_queue_capacity: usize =
            parse("JOB_QUEUE_CAPACITY", or_default("JOB_QUEUE_CAPACITY", "32"))?;

        ensure_positive("IDLE_TIMEOUT_SECS", idle_timeout_secs)?;
        ensure_positive("MAX_CONCURRENT_JOBS", max_concurrent_jobs)?;
        ensure_positive("JOB_QUEUE_CAPACITY", job_queue_capacity)?;

        Ok(Self {
            credentials: Credentials::new(username, password),
            host,
            port,
            image_version: or_default("IMAGE_VERSION", "latest"),
            network_name: or_default("NETWORK_NAME", "dci"),
            sonar_host: or_default("SONAR_HOST", "sonarqube"),
            sonar_port: parse("SONAR_PORT", or_default("SONAR_PORT", "9000"))?,
            idle_timeout: Duration::from_secs(idle_timeout_secs),
            max_concurrent_jobs,
            job_queue_capacity,
            login_policy: parse("LOGIN_FAILURE_POLICY", or_default("LOGIN_FAILURE_POLICY", "soft"))?,
            container_engine: or_default("CONTAINER_ENGINE", "podman"),
            image_build_context: PathBuf::from(or_default("IMAGE_BUILD_CONTEXT", ".")),
            image_name: or_default("IMAGE_NAME", "dci-container"),
        })
    }

    /// Base URL of the coordinator REST API.
    pub fn api_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// URL of the coordinator job stream.
    pub fn jobs_url(&self) -> String {
        format!("ws://{}:{}/jobs", self.host, self.port)
    }

    /// Metrics endpoint as seen from inside the analysis container.
    pub fn sonar_url(&self) -> String {
        format!("http://{}:{}", self.sonar_host, self.sonar_port)
    }
}

fn parse<T>(key: &'static str, value: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        reason: e.to_string(),
        value,
    })
}

fn ensure_positive<T>(key: &'static str, value: T) -> Result<(), ConfigError>
where
    T: Default + PartialEq,
{
    if value == T::default() {
        return Err(ConfigError::Invalid {
            key,
            value: "0".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}
