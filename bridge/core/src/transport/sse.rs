//! Server-Sent-Events Decoder
//!
//! Incremental, line-oriented decoder for `text/event-stream` bodies.
//! Bytes are fed as they arrive; complete records come out at each blank
//! line. Lines are split on raw bytes before UTF-8 decoding, so a multi-byte
//! character split across network chunks is reassembled correctly.
//!
//! Only `data:` and `event:` fields are kept. Comment lines (`:`) and the
//! `id:`/`retry:` fields are ignored.

use super::frame::SseRecord;

/// Payload that marks the end of a stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// Incremental SSE decoder
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Bytes of the line currently being received
    buffer: Vec<u8>,
    /// `data:` lines of the record being assembled
    data_lines: Vec<String>,
    /// `event:` field of the record being assembled
    event: Option<String>,
}

impl SseDecoder {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes and return every record it completes
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseRecord> {
        self.buffer.extend_from_slice(bytes);
        let mut records = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);

            if line.is_empty() {
                if let Some(record) = self.take_record() {
                    records.push(record);
                }
                continue;
            }

            self.accept_line(&line);
        }

        records
    }

    /// Finish decoding at connection close
    ///
    /// A record that was never terminated by a blank line is incomplete and
    /// is discarded. Returns whether anything was discarded.
    pub fn finish(&mut self) -> bool {
        let discarded = !self.buffer.is_empty() || !self.data_lines.is_empty();
        if discarded {
            tracing::debug!(
                pending_bytes = self.buffer.len(),
                pending_lines = self.data_lines.len(),
                "Discarding incomplete SSE record at end of stream"
            );
        }
        self.buffer.clear();
        self.data_lines.clear();
        self.event = None;
        discarded
    }

    fn accept_line(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.find(':') {
            Some(idx) => {
                let value = &line[idx + 1..];
                (&line[..idx], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        match field {
            "data" => self.data_lines.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            _ => {}
        }
    }

    fn take_record(&mut self) -> Option<SseRecord> {
        let event = self.event.take();
        if self.data_lines.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data_lines).join("\n");
        Some(SseRecord { event, data })
    }
}
