//! Chat-Completions Transport (Personal Access Token)
//!
//! SDK-style transport used when the session carries a personal access
//! token. The request is an OpenAI-compatible chat-completions call with a
//! `messages=[...]` payload; SSE framing is handled by `eventsource-stream`
//! and every record is parsed into a [`ChatCompletionChunk`] before it is
//! handed on, so consumers see structured event objects.
//!
//! Records that do not parse as a chunk are forwarded as raw
//! [`RawFrame::Sse`] frames so the normalizer can report them rather than
//! having them vanish here.

use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use reqwest::header::ACCEPT;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::config::StreamSettings;
use super::frame::{ChatCompletionChunk, RawFrame, SseRecord};
use super::pump::{forward, read_next, Read};
use super::response::{ensure_event_stream, ensure_success, send_bounded};
use super::sse::DONE_SENTINEL;
use super::traits::{ClientError, FrameResult, FrameStream, InferenceTransport};
use crate::history::BoundedHistory;
use crate::session::{AuthMode, Session, SessionId};

/// Chat-completions transport for PAT sessions
#[derive(Clone, Debug)]
pub struct ChatCompletionsTransport {
    /// HTTP client
    http_client: reqwest::Client,
    /// Stream tuning
    settings: StreamSettings,
}

impl ChatCompletionsTransport {
    /// Create a transport that shares an existing HTTP client
    #[must_use]
    pub fn with_client(http_client: reqwest::Client, settings: StreamSettings) -> Self {
        Self {
            http_client,
            settings,
        }
    }

    /// Request body for a history
    fn build_body(model: &str, history: &BoundedHistory) -> Value {
        json!({
            "model": model,
            "messages": history.to_wire(),
            "stream": true,
        })
    }
}

#[async_trait]
impl InferenceTransport for ChatCompletionsTransport {
    fn name(&self) -> &'static str {
        "chat-completions"
    }

    fn mode(&self) -> AuthMode {
        AuthMode::Pat
    }

    async fn open_stream(
        &self,
        session: &Session,
        history: &BoundedHistory,
    ) -> Result<FrameStream, ClientError> {
        let url = session.endpoint().chat_completions_url();
        tracing::debug!(
            session = %session.id(),
            url = %url,
            model = %session.endpoint().name,
            messages = history.messages().len(),
            "Opening chat-completions stream"
        );

        let request = self
            .http_client
            .post(&url)
            .bearer_auth(session.credential().expose())
            .header(ACCEPT, "text/event-stream")
            .json(&Self::build_body(&session.endpoint().name, history));
        let handshake_timeout = self.settings.idle_timeout();
        let response = send_bounded(request, handshake_timeout).await?;

        let response = ensure_success(response, handshake_timeout).await?;
        ensure_event_stream(&response)?;

        let (tx, rx) = mpsc::channel(self.settings.channel_capacity.max(1));
        let cancel = CancellationToken::new();
        let producer = tokio::spawn(pump_chunks(
            response,
            tx,
            cancel.clone(),
            self.settings.clone(),
            session.id().clone(),
        ));

        Ok(FrameStream::new(rx, cancel, Some(producer)))
    }
}

/// Parse one SSE record into a frame
fn parse_record(event: String, data: String) -> RawFrame {
    let chunk = serde_json::from_str::<Value>(&data)
        .ok()
        .filter(|value| value.get("choices").is_some() || value.get("error").is_some())
        .and_then(|value| serde_json::from_value::<ChatCompletionChunk>(value).ok());

    match chunk {
        Some(chunk) => RawFrame::Chunk(chunk),
        None => {
            tracing::trace!("Record is not a chat-completions chunk");
            RawFrame::Sse(SseRecord {
                event: (!event.is_empty()).then_some(event),
                data,
            })
        }
    }
}

async fn pump_chunks(
    response: reqwest::Response,
    tx: mpsc::Sender<FrameResult>,
    cancel: CancellationToken,
    settings: StreamSettings,
    session_id: SessionId,
) {
    let stream = response.bytes_stream().eventsource();
    tokio::pin!(stream);
    let idle_timeout = settings.idle_timeout();

    loop {
        match read_next(&mut stream, &cancel, idle_timeout).await {
            Read::Item(Ok(event)) => {
                let done = event.data.trim() == DONE_SENTINEL;
                let frame = if done {
                    RawFrame::sse(event.data)
                } else {
                    parse_record(event.event, event.data)
                };
                if !forward(&tx, &cancel, Ok(frame)).await {
                    tracing::debug!(session = %session_id, "Consumer gone, closing stream");
                    return;
                }
                if done {
                    tracing::debug!(session = %session_id, "Received terminal payload");
                    return;
                }
            }
            Read::Item(Err(e)) => {
                tracing::warn!(session = %session_id, error = %e, "Chat-completions stream read failed");
                let error = match e {
                    EventStreamError::Transport(e) => ClientError::from(e),
                    other => ClientError::Transport(other.to_string()),
                };
                forward(&tx, &cancel, Err(error)).await;
                return;
            }
            Read::Ended => {
                tracing::debug!(session = %session_id, "Server closed chat-completions stream");
                return;
            }
            Read::Cancelled => {
                tracing::debug!(session = %session_id, "Chat-completions stream cancelled");
                return;
            }
            Read::TimedOut => {
                tracing::warn!(
                    session = %session_id,
                    timeout_ms = settings.idle_timeout_ms,
                    "Chat-completions stream idle timeout"
                );
                forward(&tx, &cancel, Err(ClientError::IdleTimeout(idle_timeout))).await;
                return;
            }
        }
    }
}
