//! `dci-runner` -- analysis job runner.
//!
//! Connects to the coordinator's `/jobs` WebSocket, runs each received
//! job in an analysis container and uploads the resulting measurement
//! over the coordinator REST API.
//!
//! See [`Config::from_env`] for the environment variables. Logging is
//! controlled with `RUST_LOG` and `LOG_FORMAT` (`text` or `json`).

use std::sync::Arc;

use dci_runner::config::Config;
use dci_runner::executor::CliRuntime;
use dci_runner::supervisor::ConnectionSupervisor;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });
    let config = Arc::new(config);

    tracing::info!(
        coordinator = %config.api_url(),
        image_version = %config.image_version,
        network = %config.network_name,
        max_concurrent_jobs = config.max_concurrent_jobs,
        "Starting dci-runner",
    );

    let runtime = Arc::new(CliRuntime::new(
        config.container_engine.clone(),
        config.image_name.clone(),
        config.image_build_context.clone(),
    ));

    let supervisor = match ConnectionSupervisor::connect(Arc::clone(&config), runtime).await {
        Ok(supervisor) => supervisor,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            std::process::exit(1);
        }
    };

    let stats = supervisor.stats();

    tokio::select! {
        result = supervisor.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Job runner stopped");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(stats = ?stats.snapshot(), "Interrupted, exiting");
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "dci_runner=info,dci_coordinator=info".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
