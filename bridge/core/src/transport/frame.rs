//! Raw Frames
//!
//! The transport-specific unit produced by a stream before normalization.
//! The chat-completions transport yields parsed chunk objects; the
//! invocations transport yields one decoded SSE record per frame.

use serde::Deserialize;
use serde_json::Value;

/// One unit read off the wire
#[derive(Clone, Debug, PartialEq)]
pub enum RawFrame {
    /// Parsed chat-completions chunk
    Chunk(ChatCompletionChunk),
    /// Decoded Server-Sent-Events record
    Sse(SseRecord),
}

impl RawFrame {
    /// Build an SSE frame from a `data:` payload
    pub fn sse(data: impl Into<String>) -> Self {
        Self::Sse(SseRecord {
            event: None,
            data: data.into(),
        })
    }
}

/// A Server-Sent-Events record with its `data:` lines joined
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseRecord {
    /// Value of the `event:` field, if the record had one
    pub event: Option<String>,
    /// Payload with the `data: ` prefix removed
    pub data: String,
}

/// Streaming chat-completions chunk
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ChatCompletionChunk {
    /// Chunk ID
    #[serde(default)]
    pub id: Option<String>,
    /// Object tag, `chat.completion.chunk` for well-formed chunks
    #[serde(default)]
    pub object: Option<String>,
    /// Model that produced the chunk
    #[serde(default)]
    pub model: Option<String>,
    /// Choices; only the first is used
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    /// Error reported in-band by the endpoint
    #[serde(default)]
    pub error: Option<Value>,
}

/// One choice inside a chunk
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ChunkChoice {
    /// Choice index
    #[serde(default)]
    pub index: usize,
    /// Incremental content
    #[serde(default)]
    pub delta: ChunkDelta,
    /// Set on the final chunk of the choice
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Incremental content of a choice
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ChunkDelta {
    /// Role, sent on the first chunk only
    #[serde(default)]
    pub role: Option<String>,
    /// Text fragment
    #[serde(default)]
    pub content: Option<String>,
    /// Tool call fragments
    #[serde(default)]
    pub tool_calls: Vec<ChunkToolCall>,
}

/// A tool-call fragment; `id` and `name` only appear on the first fragment
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ChunkToolCall {
    /// Position of the call within the message
    #[serde(default)]
    pub index: usize,
    /// Tool call ID
    #[serde(default)]
    pub id: Option<String>,
    /// Function name and argument fragment
    #[serde(default)]
    pub function: Option<ChunkFunction>,
}

/// Function part of a tool-call fragment
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ChunkFunction {
    /// Function name
    #[serde(default)]
    pub name: Option<String>,
    /// Argument text fragment
    #[serde(default)]
    pub arguments: Option<String>,
}

impl ChatCompletionChunk {
    /// Human-readable message of an in-band error, if present
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        let error = self.error.as_ref()?;
        if let Some(message) = error.get("message").and_then(Value::as_str) {
            return Some(message.to_string());
        }
        if let Some(message) = error.as_str() {
            return Some(message.to_string());
        }
        Some("An error occurred during streaming".to_string())
    }
}
