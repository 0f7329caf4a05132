//! Session Identity
//!
//! A session binds one auth mode, one bearer credential and one serving
//! endpoint for the whole lifetime of a user-facing chat. Nothing on a
//! [`Session`] can be changed after construction; switching auth schemes
//! means starting a new session.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a new unique session ID
    #[must_use]
    pub fn new() -> Self {
        Self(format!("session_{}", uuid::Uuid::new_v4().simple()))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authentication scheme used against the serving endpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// On-Behalf-Of token minted for the end user
    Obo,
    /// Personal access token (local/developer access)
    Pat,
}

impl AuthMode {
    /// Lowercase name used in config and logs
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Obo => "obo",
            Self::Pat => "pat",
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bearer credential
///
/// The `Debug` impl never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    /// Wrap a raw token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Read the secret, e.g. to build an `Authorization` header
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the token is blank
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Treat missing and blank tokens the same way
    #[must_use]
    pub fn non_empty(token: Option<Self>) -> Option<Self> {
        token.filter(|t| !t.is_empty())
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(***)")
    }
}

/// The serving endpoint a session talks to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointIdentity {
    /// Workspace base URL, e.g. `https://example.cloud.databricks.com`
    pub host: String,
    /// Serving endpoint name
    pub name: String,
}

impl EndpointIdentity {
    /// Create an endpoint identity; a trailing slash on the host is dropped
    pub fn new(host: impl Into<String>, name: impl Into<String>) -> Self {
        let host = host.into();
        Self {
            host: host.trim_end_matches('/').to_string(),
            name: name.into(),
        }
    }

    /// URL of the chat-completions route (model is named in the body)
    #[must_use]
    pub fn chat_completions_url(&self) -> String {
        format!("{}/serving-endpoints/chat/completions", self.host)
    }

    /// URL of the endpoint's raw invocations route
    #[must_use]
    pub fn invocations_url(&self) -> String {
        format!("{}/serving-endpoints/{}/invocations", self.host, self.name)
    }
}

/// A user-facing chat session
#[derive(Clone, Debug)]
pub struct Session {
    id: SessionId,
    mode: AuthMode,
    credential: BearerToken,
    endpoint: EndpointIdentity,
}

impl Session {
    /// Create a session
    pub fn new(mode: AuthMode, credential: BearerToken, endpoint: EndpointIdentity) -> Self {
        Self {
            id: SessionId::new(),
            mode,
            credential,
            endpoint,
        }
    }

    /// Session ID
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Auth mode, fixed for the session's lifetime
    #[must_use]
    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    /// Bearer credential
    #[must_use]
    pub fn credential(&self) -> &BearerToken {
        &self.credential
    }

    /// Endpoint identity
    #[must_use]
    pub fn endpoint(&self) -> &EndpointIdentity {
        &self.endpoint
    }
}
