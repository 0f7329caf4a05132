//! Transport Selection
//!
//! Chooses, once per session, which transport and auth scheme to use. The
//! choice is captured in a [`BoundSession`] that carries both the
//! [`Session`] and its transport, so no later code path can pair a session
//! with the other scheme's request shape.

use std::fmt;
use std::sync::Arc;

use super::chat_completions::ChatCompletionsTransport;
use super::config::{AuthModeSetting, StreamSettings};
use super::invocations::InvocationsTransport;
use super::traits::{ClientError, InferenceTransport};
use crate::session::{AuthMode, BearerToken, EndpointIdentity, Session};

/// Credentials the caller has at hand when a session starts
#[derive(Clone, Debug, Default)]
pub struct AvailableCredentials {
    /// On-Behalf-Of token for the end user
    pub obo: Option<BearerToken>,
    /// Personal access token
    pub pat: Option<BearerToken>,
}

impl AvailableCredentials {
    /// Credentials with only an OBO token
    #[must_use]
    pub fn obo(token: BearerToken) -> Self {
        Self {
            obo: Some(token),
            pat: None,
        }
    }

    /// Credentials with only a PAT
    #[must_use]
    pub fn pat(token: BearerToken) -> Self {
        Self {
            obo: None,
            pat: Some(token),
        }
    }
}

/// A session together with the transport it was bound to
#[derive(Clone)]
pub struct BoundSession {
    session: Session,
    transport: Arc<dyn InferenceTransport>,
}

impl BoundSession {
    /// The session
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The transport selected for the session
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn InferenceTransport> {
        &self.transport
    }
}

impl fmt::Debug for BoundSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundSession")
            .field("session", &self.session)
            .field("transport", &self.transport.name())
            .finish()
    }
}

/// Picks the transport for new sessions
#[derive(Clone)]
pub struct TransportSelector {
    setting: AuthModeSetting,
    obo_transport: Arc<dyn InferenceTransport>,
    pat_transport: Arc<dyn InferenceTransport>,
}

impl TransportSelector {
    /// Create a selector with the two HTTP transports sharing one client
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if the HTTP client cannot be built.
    pub fn new(setting: AuthModeSetting, settings: &StreamSettings) -> Result<Self, ClientError> {
        let http_client = settings.http_client()?;
        Ok(Self::with_transports(
            setting,
            Arc::new(InvocationsTransport::with_client(
                http_client.clone(),
                settings.clone(),
            )),
            Arc::new(ChatCompletionsTransport::with_client(
                http_client,
                settings.clone(),
            )),
        ))
    }

    /// Create a selector over custom transports
    #[must_use]
    pub fn with_transports(
        setting: AuthModeSetting,
        obo_transport: Arc<dyn InferenceTransport>,
        pat_transport: Arc<dyn InferenceTransport>,
    ) -> Self {
        Self {
            setting,
            obo_transport,
            pat_transport,
        }
    }

    /// Decide the auth mode and credential for a new session
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NoUsableTransport`] when the credential the
    /// setting needs is missing (or, in `auto` mode, when neither is present).
    pub fn resolve(
        setting: AuthModeSetting,
        credentials: AvailableCredentials,
    ) -> Result<(AuthMode, BearerToken), ClientError> {
        let obo = BearerToken::non_empty(credentials.obo);
        let pat = BearerToken::non_empty(credentials.pat);

        match setting {
            AuthModeSetting::Obo => obo.map(|t| (AuthMode::Obo, t)).ok_or_else(|| {
                ClientError::NoUsableTransport(
                    "auth mode 'obo' requires an on-behalf-of token".to_string(),
                )
            }),
            AuthModeSetting::Pat => pat.map(|t| (AuthMode::Pat, t)).ok_or_else(|| {
                ClientError::NoUsableTransport(
                    "auth mode 'pat' requires a personal access token".to_string(),
                )
            }),
            AuthModeSetting::Auto => obo
                .map(|t| (AuthMode::Obo, t))
                .or_else(|| pat.map(|t| (AuthMode::Pat, t)))
                .ok_or_else(|| {
                    ClientError::NoUsableTransport(
                        "neither an on-behalf-of token nor a personal access token is available"
                            .to_string(),
                    )
                }),
        }
    }

    /// Start a session and bind it to its transport
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NoUsableTransport`] if no suitable credential is
    /// available; no request is attempted in that case.
    pub fn bind(
        &self,
        endpoint: EndpointIdentity,
        credentials: AvailableCredentials,
    ) -> Result<BoundSession, ClientError> {
        let (mode, credential) = Self::resolve(self.setting, credentials)?;
        let transport = match mode {
            AuthMode::Obo => Arc::clone(&self.obo_transport),
            AuthMode::Pat => Arc::clone(&self.pat_transport),
        };
        let session = Session::new(mode, credential, endpoint);

        tracing::info!(
            session = %session.id(),
            mode = %mode,
            transport = transport.name(),
            endpoint = %session.endpoint().name,
            "Bound session to transport"
        );

        Ok(BoundSession { session, transport })
    }
}

impl fmt::Debug for TransportSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSelector")
            .field("setting", &self.setting)
            .finish_non_exhaustive()
    }
}
