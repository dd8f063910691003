use dci_coordinator::api::CoordinatorApiError;
use dci_coordinator::client::CoordinatorClientError;

use crate::config::ConfigError;

/// Errors that stop the runner process.
///
/// Anything downstream of startup degrades instead of surfacing here,
/// except a reconnect that the coordinator refuses outright.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Coordinator login failed: {0}")]
    Login(#[from] CoordinatorApiError),

    #[error("Job stream unavailable: {0}")]
    Stream(#[from] CoordinatorClientError),
}
