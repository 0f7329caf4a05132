//! Transport Configuration
//!
//! Configuration types for selecting and tuning the serving-endpoint
//! transports.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::session::AuthMode;

/// Process-wide auth mode selector
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthModeSetting {
    /// Always use the On-Behalf-Of token and the raw SSE transport
    Obo,
    /// Always use the personal access token and the chat-completions transport
    #[default]
    Pat,
    /// Use OBO when a token is present, otherwise fall back to PAT
    Auto,
}

impl AuthModeSetting {
    /// The fixed mode this setting requires, if any
    #[must_use]
    pub fn fixed(&self) -> Option<AuthMode> {
        match self {
            Self::Obo => Some(AuthMode::Obo),
            Self::Pat => Some(AuthMode::Pat),
            Self::Auto => None,
        }
    }
}

impl fmt::Display for AuthModeSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Obo => write!(f, "obo"),
            Self::Pat => write!(f, "pat"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

impl FromStr for AuthModeSetting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "obo" => Ok(Self::Obo),
            "pat" => Ok(Self::Pat),
            "auto" => Ok(Self::Auto),
            other => Err(format!("unknown auth mode '{other}' (expected obo, pat or auto)")),
        }
    }
}

/// Stream tuning shared by both transports
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Idle-read timeout in milliseconds
    ///
    /// Maximum gap between two reads from the connection before the stream
    /// fails with an idle timeout.
    pub idle_timeout_ms: u64,

    /// Frames buffered between the producer task and the consumer
    pub channel_capacity: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            idle_timeout_ms: 60_000,
            channel_capacity: 100,
        }
    }
}

impl StreamSettings {
    /// Connection timeout
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Idle-read timeout
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Set the idle-read timeout
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Build the HTTP client used for streaming requests
    ///
    /// No overall request timeout is set: streams are long-lived and are
    /// bounded by the idle-read timeout instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn http_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout())
            .build()
    }
}
