//! Invocations Transport (On-Behalf-Of)
//!
//! Raw HTTP transport used when the session carries an On-Behalf-Of token.
//! The request goes to the endpoint's `/invocations` route with an
//! `input=[...]` payload and `Accept: text/event-stream`; the response body
//! is decoded by hand with [`SseDecoder`], one [`RawFrame::Sse`] per record.
//!
//! # Wire format
//!
//! ```text
//! POST {host}/serving-endpoints/{name}/invocations
//! Authorization: Bearer <obo token>
//! Accept: text/event-stream
//!
//! {"input": [{"role": "user", "content": "..."}], "stream": true}
//! ```
//!
//! The stream ends when the server closes the connection or sends the
//! `[DONE]` payload.

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::config::StreamSettings;
use super::frame::RawFrame;
use super::pump::{forward, read_next, Read};
use super::response::{ensure_event_stream, ensure_success, send_bounded};
use super::sse::{SseDecoder, DONE_SENTINEL};
use super::traits::{ClientError, FrameResult, FrameStream, InferenceTransport};
use crate::history::BoundedHistory;
use crate::session::{AuthMode, Session, SessionId};

/// Raw-SSE transport for OBO sessions
#[derive(Clone, Debug)]
pub struct InvocationsTransport {
    /// HTTP client
    http_client: reqwest::Client,
    /// Stream tuning
    settings: StreamSettings,
}

impl InvocationsTransport {
    /// Create a transport that shares an existing HTTP client
    #[must_use]
    pub fn with_client(http_client: reqwest::Client, settings: StreamSettings) -> Self {
        Self {
            http_client,
            settings,
        }
    }

    /// Request body for a history
    fn build_body(history: &BoundedHistory) -> Value {
        json!({
            "input": history.to_wire(),
            "stream": true,
        })
    }
}

#[async_trait]
impl InferenceTransport for InvocationsTransport {
    fn name(&self) -> &'static str {
        "invocations"
    }

    fn mode(&self) -> AuthMode {
        AuthMode::Obo
    }

    async fn open_stream(
        &self,
        session: &Session,
        history: &BoundedHistory,
    ) -> Result<FrameStream, ClientError> {
        let url = session.endpoint().invocations_url();
        tracing::debug!(
            session = %session.id(),
            url = %url,
            messages = history.messages().len(),
            "Opening invocations stream"
        );

        let request = self
            .http_client
            .post(&url)
            .bearer_auth(session.credential().expose())
            .header(ACCEPT, "text/event-stream")
            .json(&Self::build_body(history));
        let handshake_timeout = self.settings.idle_timeout();
        let response = send_bounded(request, handshake_timeout).await?;

        let response = ensure_success(response, handshake_timeout).await?;
        ensure_event_stream(&response)?;

        let (tx, rx) = mpsc::channel(self.settings.channel_capacity.max(1));
        let cancel = CancellationToken::new();
        let producer = tokio::spawn(pump_sse(
            response,
            tx,
            cancel.clone(),
            self.settings.clone(),
            session.id().clone(),
        ));

        Ok(FrameStream::new(rx, cancel, Some(producer)))
    }
}

/// Read the response body, decode SSE records and forward them
///
/// The response is owned by this task, so returning drops it and releases
/// the connection.
async fn pump_sse(
    response: reqwest::Response,
    tx: mpsc::Sender<FrameResult>,
    cancel: CancellationToken,
    settings: StreamSettings,
    session_id: SessionId,
) {
    let stream = response.bytes_stream();
    tokio::pin!(stream);
    let mut decoder = SseDecoder::new();
    let idle_timeout = settings.idle_timeout();

    loop {
        match read_next(&mut stream, &cancel, idle_timeout).await {
            Read::Item(Ok(bytes)) => {
                for record in decoder.feed(&bytes) {
                    let done = record.data.trim() == DONE_SENTINEL;
                    if !forward(&tx, &cancel, Ok(RawFrame::Sse(record))).await {
                        tracing::debug!(session = %session_id, "Consumer gone, closing stream");
                        return;
                    }
                    if done {
                        tracing::debug!(session = %session_id, "Received terminal payload");
                        return;
                    }
                }
            }
            Read::Item(Err(e)) => {
                tracing::warn!(session = %session_id, error = %e, "Invocations stream read failed");
                forward(&tx, &cancel, Err(ClientError::from(e))).await;
                return;
            }
            Read::Ended => {
                decoder.finish();
                tracing::debug!(session = %session_id, "Server closed invocations stream");
                return;
            }
            Read::Cancelled => {
                tracing::debug!(session = %session_id, "Invocations stream cancelled");
                return;
            }
            Read::TimedOut => {
                tracing::warn!(
                    session = %session_id,
                    timeout_ms = settings.idle_timeout_ms,
                    "Invocations stream idle timeout"
                );
                forward(&tx, &cancel, Err(ClientError::IdleTimeout(idle_timeout))).await;
                return;
            }
        }
    }
}
