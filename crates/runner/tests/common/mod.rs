//! Shared test harness: an in-process coordinator and a scripted
//! container runtime.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Form, Json, Router};
use dci_coordinator::session::{Credentials, LoginPolicy};
use dci_runner::config::Config;
use dci_runner::executor::{ContainerRuntime, ExecutorError, ImageHandle, RunSpec};
use serde::Deserialize;
use tokio::sync::mpsc;

pub const USERNAME: &str = "runner";
pub const PASSWORD: &str = "secret";

pub const JOB_7: &str = r#"{"measurement_id":7,"project_name":"p","project_version":"1.0","github_url":"https://x","purl":"pkg:pypi/p@1.0"}"#;

pub const OUTPUT: &str = r#"{"vulnDensity":0.1,"secDensity":0.2,"bugDensity":0.3,"smellDensity":0.4,"commentDensity":0.5,"hasLicense":1.0,"usesCI":1.0,"codeCoverage":0.75,"busFactor":3.0,"releaseFrequency":12.0,"managesDeps":1.0,"popularity":42.0}"#;

pub fn job_json(measurement_id: i64) -> String {
    format!(
        r#"{{"measurement_id":{measurement_id},"project_name":"p{measurement_id}","project_version":"1.0","github_url":"https://x","purl":"pkg:pypi/p@1.0"}}"#
    )
}

/// Build a test `Config` pointing at the mock coordinator.
pub fn test_config(addr: SocketAddr) -> Config {
    Config {
        credentials: Credentials::new(USERNAME, PASSWORD),
        host: addr.ip().to_string(),
        port: addr.port(),
        image_version: "test".to_string(),
        network_name: "dci".to_string(),
        sonar_host: "sonarqube".to_string(),
        sonar_port: 9000,
        idle_timeout: Duration::from_secs(30),
        max_concurrent_jobs: 4,
        job_queue_capacity: 8,
        login_policy: LoginPolicy::Soft,
        container_engine: "podman".to_string(),
        image_build_context: PathBuf::from("."),
        image_name: "dci-container".to_string(),
    }
}

/// Poll `check` until it holds or `within` elapses.
pub async fn wait_until(within: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

// ---------------------------------------------------------------------------
// Mock coordinator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Upload {
    pub measurement_id: i64,
    pub body: serde_json::Value,
    pub authorization: String,
}

enum StreamCommand {
    Send(String),
    Close,
}

#[derive(Default)]
pub struct MockState {
    pub logins: AtomicUsize,
    pub connections: AtomicUsize,
    pub pings: AtomicUsize,
    /// Tokens are `token-<generation>`; bumping it revokes older ones.
    pub token_generation: AtomicUsize,
    /// Number of upcoming uploads to reject with 401.
    pub reject_uploads: AtomicUsize,
    /// Answer every new stream handshake with 503.
    pub refuse_streams: AtomicBool,
    commands: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<StreamCommand>>>,
    upload_tx: Mutex<Option<mpsc::UnboundedSender<Upload>>>,
}

impl MockState {
    fn current_token(&self) -> String {
        format!("token-{}", self.token_generation.load(Ordering::SeqCst))
    }

    fn is_authorized(&self, headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == format!("Bearer {}", self.current_token()))
            .unwrap_or(false)
    }
}

pub struct MockCoordinator {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
    commands: mpsc::UnboundedSender<StreamCommand>,
    uploads: tokio::sync::Mutex<mpsc::UnboundedReceiver<Upload>>,
}

impl MockCoordinator {
    pub async fn start() -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (upload_tx, upload_rx) = mpsc::unbounded_channel();

        let state = Arc::new(MockState::default());
        *state.commands.lock().await = Some(command_rx);
        *state.upload_tx.lock().unwrap() = Some(upload_tx);

        let app = Router::new()
            .route("/login", post(login))
            .route("/api/measurement/{id}", put(upload))
            .route("/jobs", get(jobs))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            commands: command_tx,
            uploads: tokio::sync::Mutex::new(upload_rx),
        }
    }

    /// Queue a text frame for the current (or next) stream connection.
    pub fn send_frame(&self, text: &str) {
        let _ = self.commands.send(StreamCommand::Send(text.to_string()));
    }

    /// Close the current stream connection from the server side.
    pub fn close_stream(&self) {
        let _ = self.commands.send(StreamCommand::Close);
    }

    /// Revoke every token issued so far.
    pub fn revoke_tokens(&self) {
        self.state.token_generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Make every later stream handshake fail with 503.
    pub fn refuse_streams(&self) {
        self.state.refuse_streams.store(true, Ordering::SeqCst);
    }

    pub async fn next_upload(&self, within: Duration) -> Option<Upload> {
        let mut uploads = self.uploads.lock().await;
        tokio::time::timeout(within, uploads.recv()).await.ok().flatten()
    }

    pub fn logins(&self) -> usize {
        self.state.logins.load(Ordering::SeqCst)
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.state.pings.load(Ordering::SeqCst)
    }
}

#[derive(Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

async fn login(State(state): State<Arc<MockState>>, Form(form): Form<LoginForm>) -> Response {
    state.logins.fetch_add(1, Ordering::SeqCst);
    if form.username == USERNAME && form.password == PASSWORD {
        Json(serde_json::json!({ "access_token": state.current_token() })).into_response()
    } else {
        (StatusCode::UNAUTHORIZED, "bad credentials").into_response()
    }
}

async fn upload(
    State(state): State<Arc<MockState>>,
    Path(measurement_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    let pending = state.reject_uploads.load(Ordering::SeqCst);
    if pending > 0 {
        state.reject_uploads.store(pending - 1, Ordering::SeqCst);
        return StatusCode::UNAUTHORIZED;
    }
    if !state.is_authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }

    let authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if let Some(tx) = state.upload_tx.lock().unwrap().as_ref() {
        let _ = tx.send(Upload {
            measurement_id,
            body,
            authorization,
        });
    }
    StatusCode::OK
}

async fn jobs(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if state.refuse_streams.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    if !state.is_authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state.connections.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| serve_stream(socket, state))
}

/// Forward queued commands to one connection and count client pings.
/// The command queue is held for the lifetime of the connection, so a
/// reconnecting client picks up where the previous one stopped.
async fn serve_stream(mut socket: WebSocket, state: Arc<MockState>) {
    let mut guard = state.commands.lock().await;
    let Some(commands) = guard.as_mut() else {
        return;
    };

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(StreamCommand::Send(text)) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(StreamCommand::Close) => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
                None => break,
            },
            message = socket.recv() => match message {
                Some(Ok(Message::Ping(_))) => {
                    state.pings.fetch_add(1, Ordering::SeqCst);
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Scripted container runtime
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Behavior {
    /// The container exits 0 and prints this.
    Output(String),
    /// The container exits non-zero.
    ContainerFails,
    /// The image cannot be built.
    BuildFails,
}

pub struct FakeRuntime {
    behavior: Behavior,
    run_delay: Duration,
    pub runs: AtomicUsize,
    pub specs: Mutex<Vec<RunSpec>>,
    running: AtomicUsize,
    pub peak_running: AtomicUsize,
}

impl FakeRuntime {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Self::with_delay(behavior, Duration::ZERO)
    }

    pub fn with_delay(behavior: Behavior, run_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            run_delay,
            runs: AtomicUsize::new(0),
            specs: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            peak_running: AtomicUsize::new(0),
        })
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn resolve_image(&self, version_tag: &str) -> Result<ImageHandle, ExecutorError> {
        let reference = format!("localhost/dci-container:{version_tag}");
        match self.behavior {
            Behavior::BuildFails => Err(ExecutorError::BuildFailed {
                image: reference,
                stderr: "no Dockerfile".to_string(),
            }),
            _ => Ok(ImageHandle { reference }),
        }
    }

    async fn run(&self, _image: &ImageHandle, spec: &RunSpec) -> Result<String, ExecutorError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.specs.lock().unwrap().push(spec.clone());

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.run_delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);

        match &self.behavior {
            Behavior::Output(stdout) => Ok(stdout.clone()),
            Behavior::ContainerFails => Err(ExecutorError::ContainerFailed { exit_code: Some(1) }),
            Behavior::BuildFails => unreachable!("run is never reached without an image"),
        }
    }
}
