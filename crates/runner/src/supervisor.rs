//! Coordinator connection and receive loop.
//!
//! [`ConnectionSupervisor`] owns the `/jobs` stream. It waits for job
//! frames, sends a ping after every idle period, and swaps in a fresh
//! connection whenever the stream closes. Job frames go to the
//! [`JobDispatcher`]; the supervisor itself never runs a container or
//! uploads anything.
//!
//! ```text
//! Connecting -> Listening <-> AwaitingKeepAlive
//!                   ^
//!                   +---- Reconnecting <---- (closure, from any state)
//! ```

use std::fmt;
use std::sync::Arc;

use dci_coordinator::api::CoordinatorApi;
use dci_coordinator::client::{connect_jobs, CoordinatorClientError, JobStream};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use crate::config::Config;
use crate::dispatcher::JobDispatcher;
use crate::error::RunnerError;
use crate::executor::ContainerRuntime;
use crate::pool::{PoolHandle, RunnerStats, WorkerPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Connecting,
    Listening,
    AwaitingKeepAlive,
    Reconnecting,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Listening => "listening",
            Self::AwaitingKeepAlive => "awaiting_keepalive",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

pub struct ConnectionSupervisor {
    config: Arc<Config>,
    api: CoordinatorApi,
    stream: JobStream,
    dispatcher: JobDispatcher,
    pool: PoolHandle,
    state: SupervisorState,
}

impl ConnectionSupervisor {
    /// Log in, open the job stream and start the worker pool.
    ///
    /// Any failure here is fatal: there is no startup retry.
    pub async fn connect(
        config: Arc<Config>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Result<Self, RunnerError> {
        tracing::debug!(state = %SupervisorState::Connecting, "Supervisor state");

        let mut api = CoordinatorApi::new(
            config.api_url(),
            config.credentials.clone(),
            config.login_policy,
        );
        api.login().await?;

        let stream = connect_jobs(&config.jobs_url(), api.token()).await?;
        let (dispatcher, pool) = WorkerPool::start(Arc::clone(&config), runtime);

        let mut supervisor = Self {
            config,
            api,
            stream,
            dispatcher,
            pool,
            state: SupervisorState::Connecting,
        };
        supervisor.set_state(SupervisorState::Listening);
        Ok(supervisor)
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn stats(&self) -> Arc<RunnerStats> {
        self.pool.stats()
    }

    /// Receive and dispatch jobs until a reconnect fails.
    ///
    /// Under normal operation this never returns. Running execution
    /// units are not affected by reconnects. When the stream is lost
    /// for good, the pool is drained first: every queued and running
    /// unit completes before the error is returned.
    pub async fn run(mut self) -> Result<(), RunnerError> {
        let result = self.receive_loop().await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "Job stream lost, waiting for running execution units");
        }

        let Self {
            dispatcher, pool, ..
        } = self;
        drop(dispatcher);
        pool.join().await;

        result
    }

    async fn receive_loop(&mut self) -> Result<(), RunnerError> {
        loop {
            tracing::info!("Waiting for job...");

            match tokio::time::timeout(self.config.idle_timeout, self.stream.next()).await {
                Err(_elapsed) => self.send_probe().await?,
                Ok(Some(Ok(message))) => self.handle_message(message).await?,
                Ok(Some(Err(e))) => {
                    tracing::warn!(error = %e, "Job stream receive error");
                    self.reconnect().await?;
                }
                Ok(None) => {
                    tracing::warn!("Job stream ended");
                    self.reconnect().await?;
                }
            }
        }
    }

    async fn handle_message(&mut self, message: Message) -> Result<(), RunnerError> {
        match message {
            Message::Text(text) => {
                self.dispatcher.on_message(text.as_bytes()).await;
            }
            Message::Binary(data) => {
                self.dispatcher.on_message(&data).await;
            }
            Message::Ping(_) | Message::Pong(_) => {
                // Answered by tungstenite; counts as activity only.
            }
            Message::Close(frame) => {
                tracing::info!(?frame, "Coordinator closed job stream");
                self.reconnect().await?;
            }
            Message::Frame(_) => {}
        }
        Ok(())
    }

    /// Send one liveness ping after an idle period.
    async fn send_probe(&mut self) -> Result<(), RunnerError> {
        self.set_state(SupervisorState::AwaitingKeepAlive);
        tracing::debug!(
            idle_secs = self.config.idle_timeout.as_secs_f64(),
            "No job received, sending liveness probe",
        );

        match self.stream.send(Message::Ping(Default::default())).await {
            Ok(()) => {
                self.set_state(SupervisorState::Listening);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Liveness probe failed");
                self.reconnect().await
            }
        }
    }

    /// Replace the job stream using the token already held.
    ///
    /// A 401 handshake triggers one fresh login before a second
    /// attempt. Every other failure is returned.
    async fn reconnect(&mut self) -> Result<(), RunnerError> {
        self.set_state(SupervisorState::Reconnecting);
        let url = self.config.jobs_url();

        let stream = match connect_jobs(&url, self.api.token()).await {
            Ok(stream) => stream,
            Err(CoordinatorClientError::Unauthorized) => {
                tracing::info!("Job stream rejected token, logging in again");
                self.api.invalidate_session();
                self.api.login().await?;
                connect_jobs(&url, self.api.token()).await?
            }
            Err(e) => return Err(e.into()),
        };

        self.stream = stream;
        self.set_state(SupervisorState::Listening);
        Ok(())
    }

    fn set_state(&mut self, next: SupervisorState) {
        if self.state != next {
            tracing::debug!(from = %self.state, to = %next, "Supervisor state");
            self.state = next;
        }
    }
}
