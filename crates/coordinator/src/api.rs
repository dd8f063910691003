//! REST client for the coordinator HTTP endpoints.
//!
//! Wraps `POST /login` and `PUT /api/measurement/{id}` using
//! [`reqwest`]. Each execution unit builds its own [`CoordinatorApi`],
//! so sessions are never shared between jobs.

use dci_core::{Measurement, MeasurementId};
use reqwest::StatusCode;
use serde::Deserialize;

use crate::session::{AuthSession, Credentials, LoginPolicy};

/// HTTP client for one coordinator.
pub struct CoordinatorApi {
    client: reqwest::Client,
    base_url: String,
    credentials: Credentials,
    policy: LoginPolicy,
    session: AuthSession,
}

/// Body returned by `POST /login` on success.
#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
}

/// Errors from the coordinator REST layer.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Login was rejected and the policy is [`LoginPolicy::Hard`].
    #[error("Login rejected ({status}): {body}")]
    LoginRejected { status: u16, body: String },

    /// The coordinator returned a non-200 status code.
    #[error("Coordinator API error ({status}): {body}")]
    ApiError { status: u16, body: String },
}

impl CoordinatorApi {
    /// Create an unauthenticated client.
    ///
    /// * `base_url` - HTTP base URL, e.g. `http://host:8000`.
    pub fn new(base_url: String, credentials: Credentials, policy: LoginPolicy) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            credentials,
            policy,
            session: AuthSession::default(),
        }
    }

    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    /// Current bearer token (empty before a successful login).
    pub fn token(&self) -> &str {
        self.session.token()
    }

    /// Mark the held token as rejected by the coordinator.
    pub fn invalidate_session(&mut self) {
        self.session.invalidate();
    }

    /// Submit the credentials as a form and store the returned token.
    ///
    /// A non-200 answer, or a 200 without `access_token`, is handled
    /// according to the [`LoginPolicy`]. Transport failures are always
    /// returned.
    pub async fn login(&mut self) -> Result<(), CoordinatorApiError> {
        let response = self
            .client
            .post(format!("{}/login", self.base_url))
            .form(&[
                ("username", self.credentials.username.as_str()),
                ("password", self.credentials.password.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());

        if status == StatusCode::OK {
            if let Ok(parsed) = serde_json::from_str::<LoginResponse>(&body) {
                self.session.accept(parsed.access_token);
                tracing::debug!(username = %self.credentials.username, "Logged in to coordinator");
                return Ok(());
            }
        }

        self.session.invalidate();
        match self.policy {
            LoginPolicy::Soft => {
                tracing::warn!(
                    status = status.as_u16(),
                    body = %body,
                    "Unable to login, continuing without a valid token",
                );
                Ok(())
            }
            LoginPolicy::Hard => Err(CoordinatorApiError::LoginRejected {
                status: status.as_u16(),
                body,
            }),
        }
    }

    /// Upload one measurement report.
    ///
    /// A 401 answer invalidates the session, triggers one fresh login
    /// and repeats the same PUT once. Any other non-200 status is
    /// returned as [`CoordinatorApiError::ApiError`].
    pub async fn upload_measurement(
        &mut self,
        measurement_id: MeasurementId,
        measurement: &Measurement,
    ) -> Result<(), CoordinatorApiError> {
        let response = self.put_measurement(measurement_id, measurement).await?;

        let response = if response.status() == StatusCode::UNAUTHORIZED {
            tracing::info!(measurement_id, "Upload rejected with 401, logging in again");
            self.session.invalidate();
            self.login().await?;
            self.put_measurement(measurement_id, measurement).await?
        } else {
            response
        };

        Self::ensure_ok(response).await
    }

    // ---- private helpers ----

    async fn put_measurement(
        &self,
        measurement_id: MeasurementId,
        measurement: &Measurement,
    ) -> Result<reqwest::Response, CoordinatorApiError> {
        let response = self
            .client
            .put(format!("{}/api/measurement/{}", self.base_url, measurement_id))
            .bearer_auth(self.session.token())
            .json(measurement)
            .send()
            .await?;
        Ok(response)
    }

    /// The coordinator answers exactly 200 on success; anything else
    /// (including other 2xx codes) is reported with its body.
    async fn ensure_ok(response: reqwest::Response) -> Result<(), CoordinatorApiError> {
        let status = response.status();
        if status != StatusCode::OK {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(CoordinatorApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
