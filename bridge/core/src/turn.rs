//! Turn Driver
//!
//! Runs one user turn end to end: window the transcript, open a stream on
//! the session's transport, normalize every frame and hand the canonical
//! events to the renderer in order.
//!
//! # Termination
//!
//! ```text
//! server completes      -> Completion delivered, status Completed
//! server/transport fail -> terminal StreamError delivered, status Failed
//! cancel / sink dropped -> nothing more delivered, status Cancelled
//! ```
//!
//! The stream is closed on every path, so the connection is released
//! before `run` returns.

use std::fmt;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::events::CanonicalEvent;
use crate::history::{HistoryError, HistoryLimits, HistoryWindower};
use crate::messages::Message;
use crate::normalizer::EventNormalizer;
use crate::transport::selector::BoundSession;
use crate::transport::traits::{ClientError, FrameResult};

/// Failures that prevent a turn from starting
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TurnError {
    /// The transcript does not fit the history limits
    #[error(transparent)]
    History(#[from] HistoryError),

    /// The stream could not be opened
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// How a turn ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnStatus {
    /// The server completed the response
    Completed,
    /// The stream ended with a terminal error
    Failed,
    /// Stopped on request or because the renderer went away
    Cancelled,
}

impl fmt::Display for TurnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Summary of a finished turn
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnOutcome {
    /// How the turn ended
    pub status: TurnStatus,
    /// Assistant text delivered during the turn
    pub text: String,
    /// Finish reason reported by the server
    pub finish_reason: Option<String>,
    /// Tool calls that were opened but never received a result
    pub open_tool_calls: Vec<String>,
    /// Number of events delivered to the renderer
    pub events_delivered: usize,
}

impl TurnOutcome {
    fn new(status: TurnStatus) -> Self {
        Self {
            status,
            text: String::new(),
            finish_reason: None,
            open_tool_calls: Vec::new(),
            events_delivered: 0,
        }
    }
}

/// One step of the read loop
enum Step {
    Cancelled,
    Frame(Option<FrameResult>),
}

/// Drives turns for any bound session
#[derive(Clone, Debug)]
pub struct TurnDriver {
    windower: HistoryWindower,
}

impl TurnDriver {
    /// Create a driver with the given history limits
    #[must_use]
    pub fn new(limits: HistoryLimits) -> Self {
        Self {
            windower: HistoryWindower::new(limits),
        }
    }

    /// Run one turn
    ///
    /// # Errors
    ///
    /// Returns [`TurnError`] if the history cannot be windowed or the stream
    /// cannot be opened. No events are delivered in that case. Failures
    /// after the stream opened are delivered as a terminal `StreamError`
    /// and reported through [`TurnOutcome::status`] instead.
    pub async fn run(
        &self,
        bound: &BoundSession,
        transcript: &[Message],
        sink: &mpsc::Sender<CanonicalEvent>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        let session = bound.session();
        let history = self.windower.build(transcript)?;

        tracing::info!(
            session = %session.id(),
            transport = bound.transport().name(),
            turns = history.turn_count(),
            chars = history.total_chars(),
            "Starting turn"
        );

        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            opened = bound.transport().open_stream(session, &history) => Some(opened),
        };
        let Some(opened) = opened else {
            tracing::info!(session = %session.id(), "Turn cancelled before the stream opened");
            return Ok(TurnOutcome::new(TurnStatus::Cancelled));
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(session = %session.id(), error = %e, "Failed to open stream");
                return Err(e.into());
            }
        };

        let mut normalizer = EventNormalizer::new();
        let mut outcome = TurnOutcome::new(TurnStatus::Completed);

        let status = loop {
            let step = tokio::select! {
                biased;
                () = cancel.cancelled() => Step::Cancelled,
                frame = stream.next() => Step::Frame(frame),
            };

            let stream_over = !matches!(step, Step::Frame(Some(Ok(_))));
            let events = match step {
                Step::Cancelled => break TurnStatus::Cancelled,
                Step::Frame(Some(Ok(frame))) => normalizer.normalize(frame),
                Step::Frame(Some(Err(e))) => {
                    tracing::warn!(session = %session.id(), error = %e, "Stream failed mid-turn");
                    normalizer.fail(&e).into_iter().collect()
                }
                Step::Frame(None) => normalizer.finish().into_iter().collect(),
            };

            let mut terminal = None;
            let mut delivered_all = true;
            for event in events {
                if !deliver(sink, cancel, event.clone()).await {
                    delivered_all = false;
                    break;
                }
                outcome.events_delivered += 1;
                record(&mut outcome, &event);
                if event.is_terminal() {
                    terminal = Some(match event {
                        CanonicalEvent::Completion { .. } => TurnStatus::Completed,
                        _ => TurnStatus::Failed,
                    });
                }
            }

            if !delivered_all {
                break TurnStatus::Cancelled;
            }
            if let Some(status) = terminal {
                break status;
            }
            if stream_over {
                break TurnStatus::Failed;
            }
        };

        stream.close().await;

        outcome.status = status;
        outcome.open_tool_calls = normalizer.open_tool_calls();

        if status == TurnStatus::Cancelled && !outcome.open_tool_calls.is_empty() {
            tracing::warn!(
                session = %session.id(),
                open_tool_calls = ?outcome.open_tool_calls,
                "Turn cancelled with tool calls still open"
            );
        }
        tracing::info!(
            session = %session.id(),
            status = %status,
            events = outcome.events_delivered,
            "Turn finished"
        );

        Ok(outcome)
    }
}

/// Fold an event into the outcome summary
fn record(outcome: &mut TurnOutcome, event: &CanonicalEvent) {
    match event {
        CanonicalEvent::TextDelta { text } => outcome.text.push_str(text),
        CanonicalEvent::Completion {
            text,
            finish_reason,
        } => {
            if outcome.text.is_empty() {
                if let Some(text) = text {
                    outcome.text.clone_from(text);
                }
            }
            outcome.finish_reason.clone_from(finish_reason);
        }
        _ => {}
    }
}

/// Send one event to the renderer
///
/// Returns `false` if the turn was cancelled or the renderer is gone.
async fn deliver(
    sink: &mpsc::Sender<CanonicalEvent>,
    cancel: &CancellationToken,
    event: CanonicalEvent,
) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        sent = sink.send(event) => sent.is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    use crate::events::StreamErrorKind;
    use crate::history::BoundedHistory;
    use crate::session::{AuthMode, BearerToken, EndpointIdentity, Session};
    use crate::transport::config::AuthModeSetting;
    use crate::transport::frame::RawFrame;
    use crate::transport::selector::{AvailableCredentials, TransportSelector};
    use crate::transport::traits::{AuthErrorKind, FrameStream, InferenceTransport};

    /// Transport that replays canned frames, then optionally stays open
    struct ScriptedTransport {
        frames: Mutex<Vec<FrameResult>>,
        hold_open: bool,
        open_error: Option<ClientError>,
        opens: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(frames: Vec<FrameResult>) -> Arc<Self> {
            Arc::new(Self {
                frames: Mutex::new(frames),
                hold_open: false,
                open_error: None,
                opens: AtomicUsize::new(0),
            })
        }

        fn held_open(frames: Vec<FrameResult>) -> Arc<Self> {
            Arc::new(Self {
                frames: Mutex::new(frames),
                hold_open: true,
                open_error: None,
                opens: AtomicUsize::new(0),
            })
        }

        fn failing(error: ClientError) -> Arc<Self> {
            Arc::new(Self {
                frames: Mutex::new(Vec::new()),
                hold_open: false,
                open_error: Some(error),
                opens: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl InferenceTransport for ScriptedTransport {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn mode(&self) -> AuthMode {
            AuthMode::Obo
        }

        async fn open_stream(
            &self,
            _session: &Session,
            _history: &BoundedHistory,
        ) -> Result<FrameStream, ClientError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = &self.open_error {
                return Err(error.clone());
            }
            let frames = std::mem::take(&mut *self.frames.lock());
            if !self.hold_open {
                return Ok(FrameStream::from_frames(frames));
            }

            let (tx, rx) = mpsc::channel(frames.len().max(1));
            let cancel = CancellationToken::new();
            let producer_cancel = cancel.clone();
            let producer = tokio::spawn(async move {
                for frame in frames {
                    if tx.send(frame).await.is_err() {
                        return;
                    }
                }
                producer_cancel.cancelled().await;
            });
            Ok(FrameStream::new(rx, cancel, Some(producer)))
        }
    }

    fn bind(transport: Arc<ScriptedTransport>) -> BoundSession {
        TransportSelector::with_transports(AuthModeSetting::Obo, transport.clone(), transport)
            .bind(
                EndpointIdentity::new("https://host.example", "agent"),
                AvailableCredentials::obo(BearerToken::new("obo")),
            )
            .unwrap()
    }

    fn transcript() -> Vec<Message> {
        vec![Message::system("be brief", 0), Message::user("hello", 1)]
    }

    fn drain(rx: &mut mpsc::Receiver<CanonicalEvent>) -> Vec<CanonicalEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_completed_turn_delivers_in_order() {
        let transport = ScriptedTransport::new(vec![
            Ok(RawFrame::sse(r#"{"type":"text_delta","text":"Hel"}"#)),
            Ok(RawFrame::sse(r#"{"type":"text_delta","text":"lo"}"#)),
            Ok(RawFrame::sse(r#"{"type":"completion","finish_reason":"stop"}"#)),
            Ok(RawFrame::sse(r#"{"type":"text_delta","text":"ignored"}"#)),
        ]);
        let (tx, mut rx) = mpsc::channel(16);

        let outcome = TurnDriver::new(HistoryLimits::default())
            .run(&bind(transport), &transcript(), &tx, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, TurnStatus::Completed);
        assert_eq!(outcome.text, "Hello");
        assert_eq!(outcome.finish_reason.as_deref(), Some("stop"));
        assert_eq!(outcome.events_delivered, 3);
        assert_eq!(
            drain(&mut rx),
            vec![
                CanonicalEvent::text_delta("Hel"),
                CanonicalEvent::text_delta("lo"),
                CanonicalEvent::Completion {
                    text: None,
                    finish_reason: Some("stop".into()),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_server_close_without_terminal_completes() {
        let transport =
            ScriptedTransport::new(vec![Ok(RawFrame::sse(r#"{"type":"text_delta","text":"x"}"#))]);
        let (tx, mut rx) = mpsc::channel(16);

        let outcome = TurnDriver::new(HistoryLimits::default())
            .run(&bind(transport), &transcript(), &tx, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, TurnStatus::Completed);
        let events = drain(&mut rx);
        assert!(matches!(events.last(), Some(CanonicalEvent::Completion { .. })));
    }

    #[tokio::test]
    async fn test_mid_stream_failure_is_terminal_event() {
        let transport = ScriptedTransport::new(vec![
            Ok(RawFrame::sse(r#"{"type":"text_delta","text":"partial"}"#)),
            Err(ClientError::Auth {
                kind: AuthErrorKind::Expired,
                status: 401,
                message: "token expired".into(),
            }),
        ]);
        let (tx, mut rx) = mpsc::channel(16);

        let outcome = TurnDriver::new(HistoryLimits::default())
            .run(&bind(transport), &transcript(), &tx, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, TurnStatus::Failed);
        assert_eq!(outcome.text, "partial");
        let events = drain(&mut rx);
        assert!(matches!(
            events.last(),
            Some(CanonicalEvent::StreamError {
                kind: StreamErrorKind::Auth,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_open_failure_is_error_and_emits_nothing() {
        let transport = ScriptedTransport::failing(ClientError::Handshake("text/html".into()));
        let (tx, mut rx) = mpsc::channel(16);

        let result = TurnDriver::new(HistoryLimits::default())
            .run(&bind(transport), &transcript(), &tx, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(TurnError::Client(ClientError::Handshake(_)))));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_budget_failure_never_opens_stream() {
        let transport = ScriptedTransport::new(Vec::new());
        let bound = bind(transport.clone());
        let (tx, _rx) = mpsc::channel(16);

        let result = TurnDriver::new(HistoryLimits {
            max_turns: 2,
            max_chars: 5,
        })
        .run(&bound, &transcript(), &tx, &CancellationToken::new())
        .await;

        assert!(matches!(result, Err(TurnError::History(_))));
        assert_eq!(transport.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_reports_open_tool_calls() {
        let transport = ScriptedTransport::held_open(vec![
            Ok(RawFrame::sse(r#"{"type":"tool_call_start","id":"c1","name":"search"}"#)),
            Ok(RawFrame::sse(r#"{"type":"tool_call_delta","id":"c1","delta":"{"}"#)),
        ]);
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let bound = bind(transport);
        let driver = TurnDriver::new(HistoryLimits::default());

        let turn = {
            let cancel = cancel.clone();
            let transcript = transcript();
            async move { driver.run(&bound, &transcript, &tx, &cancel).await }
        };
        let watcher = async {
            // Cancel once both frames reached the renderer
            let first = rx.recv().await;
            let second = rx.recv().await;
            cancel.cancel();
            (first, second)
        };

        let (outcome, (first, second)) = tokio::join!(turn, watcher);
        let outcome = outcome.unwrap();

        assert!(matches!(first, Some(CanonicalEvent::ToolCallStart { .. })));
        assert!(matches!(second, Some(CanonicalEvent::ToolCallDelta { .. })));
        assert_eq!(outcome.status, TurnStatus::Cancelled);
        assert_eq!(outcome.open_tool_calls, vec!["c1".to_string()]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_renderer_counts_as_cancelled() {
        let transport = ScriptedTransport::held_open(vec![Ok(RawFrame::sse(
            r#"{"type":"text_delta","text":"nobody listens"}"#,
        ))]);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let outcome = TurnDriver::new(HistoryLimits::default())
            .run(&bind(transport), &transcript(), &tx, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, TurnStatus::Cancelled);
        assert_eq!(outcome.events_delivered, 0);
    }
}
