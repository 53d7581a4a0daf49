use crate::errors::ImageError;
use base64::Engine;
use http::header::HeaderValue;
use std::{env, fmt};

/// Username and optional password for HTTP Basic authentication
///
/// When a client has credentials, every request it makes carries them.
#[derive(Clone, Eq, PartialEq)]
pub struct Credentials {
    username: String,
    password: Option<String>,
}

impl Credentials {
    pub fn new(username: String, password: Option<String>) -> Self {
        Credentials { username, password }
    }

    /// Credentials from `$DOCKYARD_USERNAME` and `$DOCKYARD_PASSWORD`
    ///
    /// Returns `None` unless at least a username is set.
    pub fn from_env() -> Option<Self> {
        let username = env::var("DOCKYARD_USERNAME").ok()?;
        Some(Credentials::new(
            username,
            env::var("DOCKYARD_PASSWORD").ok(),
        ))
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Value for the `Authorization` header
    pub fn authorization(&self) -> Result<HeaderValue, ImageError> {
        let plain = format!(
            "{}:{}",
            self.username,
            self.password.as_deref().unwrap_or("")
        );
        let encoded = base64::engine::general_purpose::STANDARD.encode(plain);
        let mut value = HeaderValue::from_str(&format!("Basic {}", encoded))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
