//! Bearer session state and the login-failure policy.

use std::fmt;
use std::str::FromStr;

/// Username/password pair submitted to `POST /login`.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

// Keeps the password out of log lines that print the config.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// What to do when the coordinator rejects a login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoginPolicy {
    /// Log a warning and carry on with an empty token.
    #[default]
    Soft,
    /// Treat the rejection as an error.
    Hard,
}

impl FromStr for LoginPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "soft" => Ok(Self::Soft),
            "hard" => Ok(Self::Hard),
            other => Err(format!("unknown login policy '{other}' (expected soft or hard)")),
        }
    }
}

/// A bearer token plus whether the coordinator last accepted it.
///
/// A fresh session holds an empty, invalid token. The token is never
/// refreshed on a timer; it is replaced only by a new login after the
/// coordinator answers with 401.
#[derive(Debug, Clone, Default)]
pub struct AuthSession {
    token: String,
    valid: bool,
}

impl AuthSession {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub(crate) fn accept(&mut self, token: String) {
        self.token = token;
        self.valid = true;
    }

    /// Mark the token as rejected. The token string is kept so that a
    /// soft-failed session still sends the same header it sent before.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }
}
