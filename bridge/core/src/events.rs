//! Canonical Events
//!
//! The single, uniform event model handed to renderers. Every wire shape
//! either transport can produce is mapped onto one of these variants by the
//! [`EventNormalizer`](crate::normalizer::EventNormalizer).
//!
//! # Ordering
//!
//! Within one stream events are delivered strictly in arrival order:
//! - `TextDelta` payloads concatenate to the full message text
//! - `ToolCallStart` for an id precedes any `ToolCallDelta`/`ToolCallResult` for it
//! - the last event is `Completion` or a terminal `StreamError`

use std::fmt;

use serde::{Deserialize, Serialize};

/// Category of a stream-level failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamErrorKind {
    /// Frame with a discriminator the normalizer does not know
    UnknownEvent,
    /// Frame that is not valid JSON or misses required fields
    Malformed,
    /// Tool-call frame referencing an id that was never opened
    ProtocolViolation,
    /// Error reported by the serving endpoint inside the stream
    Server,
    /// Connection failure or idle timeout after the stream started
    Transport,
    /// Credential rejected after the stream started
    Auth,
    /// Stream stopped on request
    Cancelled,
}

impl StreamErrorKind {
    /// Whether an error of this kind ends the stream
    ///
    /// Unknown, malformed and out-of-order frames are reported and then
    /// skipped; everything else ends the turn.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            Self::UnknownEvent | Self::Malformed | Self::ProtocolViolation
        )
    }

    /// Snake-case name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownEvent => "unknown_event",
            Self::Malformed => "malformed",
            Self::ProtocolViolation => "protocol_violation",
            Self::Server => "server",
            Self::Transport => "transport",
            Self::Auth => "auth",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for StreamErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized stream event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CanonicalEvent {
    /// A slice of assistant text
    TextDelta {
        /// Text to append
        text: String,
    },
    /// A tool call was opened
    ToolCallStart {
        /// Tool call ID
        id: String,
        /// Tool name
        name: String,
        /// Arguments received so far (may be empty)
        arguments: String,
    },
    /// More argument text for an open tool call
    ToolCallDelta {
        /// Tool call ID
        id: String,
        /// Argument fragment to append
        arguments_delta: String,
    },
    /// Output of a tool call
    ToolCallResult {
        /// Tool call ID
        id: String,
        /// Tool output, verbatim
        result: String,
    },
    /// The response finished
    Completion {
        /// Final text, when the server sends one
        text: Option<String>,
        /// Why generation stopped
        finish_reason: Option<String>,
    },
    /// Something went wrong in the stream
    StreamError {
        /// Failure category
        kind: StreamErrorKind,
        /// Human-readable detail
        message: String,
    },
}

impl CanonicalEvent {
    /// Create a text delta
    pub fn text_delta(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }

    /// Create a stream error
    pub fn stream_error(kind: StreamErrorKind, message: impl Into<String>) -> Self {
        Self::StreamError {
            kind,
            message: message.into(),
        }
    }

    /// Whether this event ends the stream
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Completion { .. } => true,
            Self::StreamError { kind, .. } => kind.is_terminal(),
            _ => false,
        }
    }

    /// Tool call ID, for tool-call events
    #[must_use]
    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            Self::ToolCallStart { id, .. }
            | Self::ToolCallDelta { id, .. }
            | Self::ToolCallResult { id, .. } => Some(id),
            _ => None,
        }
    }
}
