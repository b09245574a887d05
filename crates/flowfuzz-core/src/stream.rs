//! Server-sent-event framing for the execution stream
//!
//! Each event travels as one `data: <json>\n\n` frame.

use crate::error::Result;
use crate::events::ExecutionEvent;

const DATA_PREFIX: &str = "data:";
const FRAME_END: &str = "\n\n";

/// Encode one event as a `data: <json>\n\n` frame
pub fn encode_frame(event: &ExecutionEvent) -> Result<String> {
    let json = serde_json::to_string(event)?;
    Ok(format!("{DATA_PREFIX} {json}{FRAME_END}"))
}

/// Incremental decoder for a captured or live event stream
///
/// Bytes may arrive in arbitrary chunks; complete frames are returned as soon
/// as their terminating blank line is seen. Frames that are not `data:` lines
/// or do not hold a valid event are skipped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    /// A chunk ended on `\r`; its `\n` may arrive with the next one
    pending_cr: bool,
    skipped: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event completed by it
    pub fn push(&mut self, chunk: &str) -> Vec<ExecutionEvent> {
        let mut text = String::with_capacity(chunk.len() + 1);
        if std::mem::take(&mut self.pending_cr) {
            text.push('\r');
        }
        text.push_str(chunk);
        if text.ends_with('\r') {
            text.pop();
            self.pending_cr = true;
        }
        self.buffer.push_str(&text.replace("\r\n", "\n"));

        let mut events = Vec::new();
        while let Some(end) = self.buffer.find(FRAME_END) {
            let frame: String = self.buffer.drain(..end + FRAME_END.len()).collect();
            if let Some(event) = self.decode_frame(&frame) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing frame that was not terminated by a blank line
    pub fn finish(&mut self) -> Option<ExecutionEvent> {
        self.pending_cr = false;
        let frame = std::mem::take(&mut self.buffer);
        if frame.trim().is_empty() {
            return None;
        }
        self.decode_frame(&frame)
    }

    /// Number of frames dropped as malformed so far
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn decode_frame(&mut self, frame: &str) -> Option<ExecutionEvent> {
        // Multi-line data fields are joined with newlines
        let data: Vec<&str> = frame
            .lines()
            .filter_map(|line| line.strip_prefix(DATA_PREFIX))
            .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
            .collect();

        if data.is_empty() {
            if !frame.trim().is_empty() {
                self.skipped += 1;
            }
            return None;
        }

        match serde_json::from_str(&data.join("\n")) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!("Skipping malformed stream frame: {}", e);
                self.skipped += 1;
                None
            }
        }
    }
}

/// Decode a complete captured stream
pub fn decode_all(input: &str) -> Vec<ExecutionEvent> {
    let mut decoder = SseDecoder::new();
    let mut events = decoder.push(input);
    events.extend(decoder.finish());
    events
}
