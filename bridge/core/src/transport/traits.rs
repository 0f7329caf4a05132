//! Transport Traits
//!
//! The seam between the turn driver and the two wire transports. Both
//! implementations open a long-lived request and hand back a
//! [`FrameStream`]: a cancellable producer task feeding a bounded channel.
//! The producer owns the HTTP response, so the connection is released as
//! soon as the task ends.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::frame::RawFrame;
use crate::events::StreamErrorKind;
use crate::history::BoundedHistory;
use crate::session::{AuthMode, Session};

/// Why the endpoint rejected a credential
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AuthErrorKind {
    /// The credential is expired or otherwise no longer valid
    Expired,
    /// The credential is valid but lacks the required scope or permission
    InsufficientScope,
    /// Rejected without enough detail to tell which
    Unknown,
}

impl fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expired => write!(f, "expired"),
            Self::InsufficientScope => write!(f, "insufficient scope"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl AuthErrorKind {
    /// Infer the failure kind from a 401/403 response
    ///
    /// Returns `None` for any other status.
    #[must_use]
    pub fn classify(status: u16, www_authenticate: Option<&str>, body: &str) -> Option<Self> {
        let header = www_authenticate.unwrap_or_default().to_ascii_lowercase();
        let body = body.to_ascii_lowercase();
        let mentions_scope = |text: &str| text.contains("scope") || text.contains("permission");

        match status {
            401 if header.contains("insufficient_scope") => Some(Self::InsufficientScope),
            401 => Some(Self::Expired),
            403 if header.contains("invalid_token") || body.contains("expired") => {
                Some(Self::Expired)
            }
            403 if mentions_scope(&header) || mentions_scope(&body) => {
                Some(Self::InsufficientScope)
            }
            403 => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// Errors raised while selecting a transport or opening and reading a stream
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// No credential is available for the configured auth mode
    #[error("no usable transport: {0}")]
    NoUsableTransport(String),

    /// The endpoint rejected the credential
    #[error("authentication failed ({kind}, HTTP {status}): {message}")]
    Auth {
        /// Expiry vs scope denial, when inferable
        kind: AuthErrorKind,
        /// HTTP status code
        status: u16,
        /// Response detail
        message: String,
    },

    /// Connection refused, reset, or timed out while connecting
    #[error("transport error: {0}")]
    Transport(String),

    /// No frame arrived within the idle-read timeout
    #[error("no data received for {0:?}")]
    IdleTimeout(Duration),

    /// The response did not look like the expected stream
    #[error("malformed handshake: {0}")]
    Handshake(String),

    /// Any other non-success HTTP status
    #[error("endpoint returned HTTP {status}: {body}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Response body (truncated)
        body: String,
    },
}

impl ClientError {
    /// Canonical error kind used when this error ends a started stream
    #[must_use]
    pub fn stream_error_kind(&self) -> StreamErrorKind {
        match self {
            Self::Auth { .. } => StreamErrorKind::Auth,
            _ => StreamErrorKind::Transport,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Transport(format!("request timed out: {err}"))
        } else if err.is_connect() {
            Self::Transport(format!("connection failed: {err}"))
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Item delivered by a [`FrameStream`]
pub type FrameResult = Result<RawFrame, ClientError>;

/// A finite, non-restartable sequence of raw frames
///
/// Dropping the stream cancels the producer, which drops the underlying
/// HTTP response and releases the connection.
pub struct FrameStream {
    receiver: mpsc::Receiver<FrameResult>,
    cancel: CancellationToken,
    producer: Option<JoinHandle<()>>,
}

impl FrameStream {
    /// Wrap a producer task and its channel
    pub fn new(
        receiver: mpsc::Receiver<FrameResult>,
        cancel: CancellationToken,
        producer: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            receiver,
            cancel,
            producer,
        }
    }

    /// Build a stream from a fixed list of frames (useful for replay and tests)
    #[must_use]
    pub fn from_frames(frames: Vec<FrameResult>) -> Self {
        let (tx, rx) = mpsc::channel(frames.len().max(1));
        for frame in frames {
            if tx.try_send(frame).is_err() {
                break;
            }
        }
        Self::new(rx, CancellationToken::new(), None)
    }

    /// Receive the next frame
    ///
    /// Returns `None` once the producer has finished or the stream was
    /// cancelled. After cancellation no further frames are returned, even if
    /// some were already buffered.
    pub async fn next(&mut self) -> Option<FrameResult> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            frame = self.receiver.recv() => frame,
        }
    }

    /// Signal the producer to stop
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the stream has been cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel and wait until the producer has released its connection
    pub async fn close(mut self) {
        self.cancel.cancel();
        self.receiver.close();
        if let Some(producer) = self.producer.take() {
            if let Err(e) = producer.await {
                tracing::warn!(error = %e, "Frame producer task failed");
            }
        }
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for FrameStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameStream")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// A wire transport to the serving endpoint
///
/// One implementation exists per auth scheme; the
/// [`TransportSelector`](super::selector::TransportSelector) binds exactly one
/// of them to a session.
#[async_trait]
pub trait InferenceTransport: Send + Sync {
    /// Transport name for logs (e.g. "chat-completions")
    fn name(&self) -> &'static str;

    /// Auth mode this transport speaks
    fn mode(&self) -> AuthMode;

    /// Open a streaming request carrying `history`
    ///
    /// Resolves once the response headers are in; frames then arrive through
    /// the returned [`FrameStream`].
    async fn open_stream(
        &self,
        session: &Session,
        history: &BoundedHistory,
    ) -> Result<FrameStream, ClientError>;
}
