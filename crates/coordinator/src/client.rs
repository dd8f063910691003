//! WebSocket handshake for the coordinator `/jobs` stream.

use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// A live job stream.
pub type JobStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Open the job stream with bearer authentication.
///
/// * `ws_url` - full stream URL, e.g. `ws://host:8000/jobs`.
/// * `token`  - bearer token; an empty token is sent as-is.
pub async fn connect_jobs(ws_url: &str, token: &str) -> Result<JobStream, CoordinatorClientError> {
    let mut request = ws_url
        .into_client_request()
        .map_err(|e| CoordinatorClientError::Connection(format!("Invalid URL {ws_url}: {e}")))?;

    let header = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|e| CoordinatorClientError::Connection(format!("Invalid bearer token: {e}")))?;
    request.headers_mut().insert(AUTHORIZATION, header);

    match connect_async(request).await {
        Ok((stream, _response)) => {
            tracing::info!(url = %ws_url, "Connected to coordinator job stream");
            Ok(stream)
        }
        Err(tokio_tungstenite::tungstenite::Error::Http(response))
            if response.status() == StatusCode::UNAUTHORIZED =>
        {
            Err(CoordinatorClientError::Unauthorized)
        }
        Err(e) => Err(CoordinatorClientError::Connection(format!(
            "Failed to connect to {ws_url}: {e}"
        ))),
    }
}

/// Errors that can occur when opening the job stream.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorClientError {
    /// The handshake was rejected with HTTP 401.
    #[error("Job stream rejected the bearer token")]
    Unauthorized,

    /// Any other handshake or transport failure.
    #[error("Connection error: {0}")]
    Connection(String),
}
