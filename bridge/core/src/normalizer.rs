//! Event Normalization
//!
//! Maps raw frames from either transport onto [`CanonicalEvent`]s.
//!
//! Each call is a plain mapping of one frame to zero or more events; the
//! only state carried between calls is the set of tool calls opened so far
//! (to reject deltas and results for ids that were never started) and
//! whether a terminal event has already been produced.
//!
//! # Wire shapes
//!
//! SSE payloads are dispatched on their `type` field:
//!
//! ```text
//! text_delta            {text}                  -> TextDelta
//! tool_call_start       {id, name, arguments?}  -> ToolCallStart
//! tool_call_delta       {id, delta}             -> ToolCallDelta
//! tool_call_result      {id, result}            -> ToolCallResult
//! completion            {text?, finish_reason?} -> Completion
//! error                 {message}               -> StreamError(server)
//! response.output_text.delta                    -> TextDelta
//! response.output_item.added / .done            -> ToolCallStart / ToolCallResult
//! response.function_call_arguments.delta        -> ToolCallDelta
//! response.completed                            -> Completion
//! response.failed / response.error              -> StreamError(server)
//! [DONE]                                        -> Completion (if none yet)
//! ```
//!
//! Anything else yields one `StreamError(unknown_event)`.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::events::{CanonicalEvent, StreamErrorKind};
use crate::transport::frame::{ChatCompletionChunk, RawFrame, SseRecord};
use crate::transport::sse::DONE_SENTINEL;
use crate::transport::traits::ClientError;

/// Lifecycle events of the Responses API that carry nothing to render
const IGNORED_RESPONSE_EVENTS: &[&str] = &[
    "response.created",
    "response.in_progress",
    "response.queued",
    "response.output_text.done",
    "response.content_part.added",
    "response.content_part.done",
    "response.function_call_arguments.done",
];

/// Per-stream frame normalizer
///
/// Create one per stream; it is not meant to be reused across turns.
#[derive(Debug, Default)]
pub struct EventNormalizer {
    /// Tool call ids in the order they were opened
    opened: Vec<String>,
    /// Tool call ids that already received a result
    resolved: HashSet<String>,
    /// Chunk tool-call index -> tool call id
    chunk_calls: HashMap<usize, String>,
    /// Responses API item id -> tool call id
    items: HashMap<String, String>,
    /// A terminal event has been produced
    terminated: bool,
}

impl EventNormalizer {
    /// Create a normalizer for a new stream
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a terminal event has been produced
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Tool calls that were opened but never received a result
    #[must_use]
    pub fn open_tool_calls(&self) -> Vec<String> {
        self.opened
            .iter()
            .filter(|id| !self.resolved.contains(*id))
            .cloned()
            .collect()
    }

    /// Map one raw frame to canonical events
    ///
    /// Frames arriving after the terminal event produce nothing. At most one
    /// terminal event is ever returned, and it is always last.
    pub fn normalize(&mut self, frame: RawFrame) -> Vec<CanonicalEvent> {
        if self.terminated {
            tracing::debug!("Ignoring frame received after terminal event");
            return Vec::new();
        }

        let events = match frame {
            RawFrame::Chunk(chunk) => self.normalize_chunk(chunk),
            RawFrame::Sse(record) => self.normalize_record(record),
        };
        self.seal(events)
    }

    /// Terminal event for a transport failure after the stream started
    ///
    /// Returns `None` if the stream has already terminated.
    pub fn fail(&mut self, error: &ClientError) -> Option<CanonicalEvent> {
        if self.terminated {
            return None;
        }
        self.terminated = true;
        Some(CanonicalEvent::stream_error(
            error.stream_error_kind(),
            error.to_string(),
        ))
    }

    /// Terminal event for a stream the server closed without one
    ///
    /// Server closure is a normal end of stream, so this is a `Completion`
    /// with no finish reason. Returns `None` if the stream already terminated.
    pub fn finish(&mut self) -> Option<CanonicalEvent> {
        if self.terminated {
            return None;
        }
        self.terminated = true;
        Some(CanonicalEvent::Completion {
            text: None,
            finish_reason: None,
        })
    }

    /// Cut everything after the first terminal event and record termination
    fn seal(&mut self, mut events: Vec<CanonicalEvent>) -> Vec<CanonicalEvent> {
        if let Some(pos) = events.iter().position(CanonicalEvent::is_terminal) {
            events.truncate(pos + 1);
            self.terminated = true;
        }
        events
    }

    // ------------------------------------------------------------------
    // SDK chunks
    // ------------------------------------------------------------------

    fn normalize_chunk(&mut self, chunk: ChatCompletionChunk) -> Vec<CanonicalEvent> {
        if let Some(message) = chunk.error_message() {
            return vec![CanonicalEvent::stream_error(StreamErrorKind::Server, message)];
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return Vec::new();
        };

        let mut events = Vec::new();

        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            events.push(CanonicalEvent::TextDelta { text: content });
        }

        for call in choice.delta.tool_calls {
            let function = call.function.unwrap_or_default();
            let arguments = function.arguments.unwrap_or_default();

            match call.id {
                Some(id) if !self.is_open(&id) => {
                    self.chunk_calls.insert(call.index, id.clone());
                    events.push(self.start(id, function.name.unwrap_or_default(), arguments));
                }
                // Some servers repeat the id on every fragment
                Some(id) => {
                    if !arguments.is_empty() {
                        events.push(self.delta(id, arguments));
                    }
                }
                None => match self.chunk_calls.get(&call.index).cloned() {
                    Some(id) => {
                        if !arguments.is_empty() {
                            events.push(self.delta(id, arguments));
                        }
                    }
                    None => events.push(CanonicalEvent::stream_error(
                        StreamErrorKind::ProtocolViolation,
                        format!("tool call fragment for unopened index {}", call.index),
                    )),
                },
            }
        }

        if let Some(reason) = choice.finish_reason {
            events.push(CanonicalEvent::Completion {
                text: None,
                finish_reason: Some(reason),
            });
        }

        events
    }

    // ------------------------------------------------------------------
    // SSE records
    // ------------------------------------------------------------------

    fn normalize_record(&mut self, record: SseRecord) -> Vec<CanonicalEvent> {
        let data = record.data.trim();
        if data.is_empty() {
            return Vec::new();
        }
        if data == DONE_SENTINEL {
            return vec![CanonicalEvent::Completion {
                text: None,
                finish_reason: None,
            }];
        }

        let payload: Value = match serde_json::from_str(data) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding malformed stream payload");
                return vec![CanonicalEvent::stream_error(
                    StreamErrorKind::Malformed,
                    format!("payload is not valid JSON: {e}"),
                )];
            }
        };

        if is_chunk_payload(&payload) {
            return match serde_json::from_value::<ChatCompletionChunk>(payload) {
                Ok(chunk) => self.normalize_chunk(chunk),
                Err(e) => vec![CanonicalEvent::stream_error(
                    StreamErrorKind::Malformed,
                    format!("invalid chat completion chunk: {e}"),
                )],
            };
        }

        // The SSE `event:` field is only a fallback; the payload wins
        let kind = payload
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or(record.event);

        match kind {
            Some(kind) => self
                .dispatch(&kind, &payload)
                .unwrap_or_else(|message| {
                    vec![CanonicalEvent::stream_error(StreamErrorKind::Malformed, message)]
                }),
            None => {
                tracing::warn!("Stream payload has no type discriminator");
                vec![CanonicalEvent::stream_error(
                    StreamErrorKind::UnknownEvent,
                    "payload has no type field",
                )]
            }
        }
    }

    /// Map a typed payload; `Err` carries a malformed-frame message
    fn dispatch(&mut self, kind: &str, payload: &Value) -> Result<Vec<CanonicalEvent>, String> {
        let events = match kind {
            "text_delta" => vec![CanonicalEvent::TextDelta {
                text: required_str(payload, "text", kind)?,
            }],
            "tool_call_start" => {
                let id = required_str(payload, "id", kind)?;
                let name = required_str(payload, "name", kind)?;
                let arguments = verbatim(payload.get("arguments"));
                if self.is_open(&id) {
                    vec![duplicate_start(&id)]
                } else {
                    vec![self.start(id, name, arguments)]
                }
            }
            "tool_call_delta" => {
                let id = required_str(payload, "id", kind)?;
                let delta = payload
                    .get("delta")
                    .or_else(|| payload.get("arguments_delta"))
                    .ok_or_else(|| missing(kind, "delta"))?;
                vec![self.delta_checked(id, verbatim(Some(delta)))]
            }
            "tool_call_result" => {
                let id = required_str(payload, "id", kind)?;
                let result = payload.get("result").ok_or_else(|| missing(kind, "result"))?;
                vec![self.result_checked(id, verbatim(Some(result)))]
            }
            "completion" => vec![CanonicalEvent::Completion {
                text: optional_str(payload, "text"),
                finish_reason: optional_str(payload, "finish_reason"),
            }],
            "error" | "response.error" => vec![server_error(payload)],
            "response.output_text.delta" => vec![CanonicalEvent::TextDelta {
                text: required_str(payload, "delta", kind)?,
            }],
            "response.output_item.added" | "response.output_item.done" => {
                let item = payload.get("item").ok_or_else(|| missing(kind, "item"))?;
                self.output_item(item, kind == "response.output_item.done")?
            }
            "response.function_call_arguments.delta" => {
                let delta = required_str(payload, "delta", kind)?;
                let reference = optional_str(payload, "item_id")
                    .or_else(|| optional_str(payload, "call_id"))
                    .ok_or_else(|| missing(kind, "item_id"))?;
                let id = self.items.get(&reference).cloned().unwrap_or(reference);
                vec![self.delta_checked(id, delta)]
            }
            "response.completed" => {
                let response = payload.get("response");
                vec![CanonicalEvent::Completion {
                    text: None,
                    finish_reason: response
                        .and_then(|r| optional_str(r, "status"))
                        .or_else(|| Some("completed".to_string())),
                }]
            }
            "response.failed" => vec![server_error(payload.get("response").unwrap_or(payload))],
            ignored if IGNORED_RESPONSE_EVENTS.contains(&ignored) => Vec::new(),
            unknown => {
                tracing::warn!(event_type = %unknown, "Unknown stream event type");
                vec![CanonicalEvent::stream_error(
                    StreamErrorKind::UnknownEvent,
                    format!("unknown event type '{unknown}'"),
                )]
            }
        };
        Ok(events)
    }

    /// Responses API output item
    fn output_item(&mut self, item: &Value, done: bool) -> Result<Vec<CanonicalEvent>, String> {
        let item_type = item.get("type").and_then(Value::as_str).unwrap_or_default();

        let events = match item_type {
            "function_call" => {
                let call_id = optional_str(item, "call_id")
                    .or_else(|| optional_str(item, "id"))
                    .ok_or_else(|| missing("function_call", "call_id"))?;
                if let Some(item_id) = optional_str(item, "id") {
                    self.items.insert(item_id, call_id.clone());
                }
                let name = optional_str(item, "name").unwrap_or_default();
                let arguments = verbatim(item.get("arguments"));

                match (done, self.is_open(&call_id)) {
                    (false, true) => vec![duplicate_start(&call_id)],
                    (_, false) => vec![self.start(call_id, name, arguments)],
                    // Arguments already arrived as deltas
                    (true, true) => Vec::new(),
                }
            }
            "function_call_output" => {
                if !done {
                    return Ok(Vec::new());
                }
                let call_id = optional_str(item, "call_id")
                    .ok_or_else(|| missing("function_call_output", "call_id"))?;
                vec![self.result_checked(call_id, verbatim(item.get("output")))]
            }
            // Text of a message item already arrived as output_text deltas
            "message" | "reasoning" => Vec::new(),
            other => {
                tracing::warn!(item_type = %other, "Unknown output item type");
                vec![CanonicalEvent::stream_error(
                    StreamErrorKind::UnknownEvent,
                    format!("unknown output item type '{other}'"),
                )]
            }
        };
        Ok(events)
    }

    // ------------------------------------------------------------------
    // Tool call bookkeeping
    // ------------------------------------------------------------------

    fn is_open(&self, id: &str) -> bool {
        self.opened.iter().any(|opened| opened == id)
    }

    fn start(&mut self, id: String, name: String, arguments: String) -> CanonicalEvent {
        self.opened.push(id.clone());
        CanonicalEvent::ToolCallStart {
            id,
            name,
            arguments,
        }
    }

    fn delta(&self, id: String, arguments_delta: String) -> CanonicalEvent {
        CanonicalEvent::ToolCallDelta {
            id,
            arguments_delta,
        }
    }

    fn delta_checked(&self, id: String, arguments_delta: String) -> CanonicalEvent {
        if self.is_open(&id) {
            self.delta(id, arguments_delta)
        } else {
            unopened("delta", &id)
        }
    }

    fn result_checked(&mut self, id: String, result: String) -> CanonicalEvent {
        if self.is_open(&id) {
            self.resolved.insert(id.clone());
            CanonicalEvent::ToolCallResult { id, result }
        } else {
            unopened("result", &id)
        }
    }
}

fn is_chunk_payload(payload: &Value) -> bool {
    payload.get("object").and_then(Value::as_str) == Some("chat.completion.chunk")
        || (payload.get("type").is_none() && payload.get("choices").is_some())
}

fn required_str(payload: &Value, field: &str, kind: &str) -> Result<String, String> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| missing(kind, field))
}

fn optional_str(payload: &Value, field: &str) -> Option<String> {
    payload.get(field).and_then(Value::as_str).map(str::to_string)
}

/// Strings pass through untouched, other JSON values are serialized as sent
fn verbatim(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn missing(kind: &str, field: &str) -> String {
    format!("{kind} frame is missing '{field}'")
}

fn server_error(payload: &Value) -> CanonicalEvent {
    let message = payload
        .get("error")
        .and_then(|e| e.get("message").and_then(Value::as_str).or_else(|| e.as_str()))
        .or_else(|| payload.get("message").and_then(Value::as_str))
        .unwrap_or("the endpoint reported an error")
        .to_string();
    CanonicalEvent::stream_error(StreamErrorKind::Server, message)
}

fn unopened(what: &str, id: &str) -> CanonicalEvent {
    tracing::warn!(tool_call = %id, "Tool call {what} for an id that was never opened");
    CanonicalEvent::stream_error(
        StreamErrorKind::ProtocolViolation,
        format!("tool call {what} for unopened id '{id}'"),
    )
}

fn duplicate_start(id: &str) -> CanonicalEvent {
    CanonicalEvent::stream_error(
        StreamErrorKind::ProtocolViolation,
        format!("tool call '{id}' was opened twice"),
    )
}
