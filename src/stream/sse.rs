//! Incremental `text/event-stream` decoder
//!
//! Bytes arrive in arbitrary chunks; frames are dispatched on a blank line.

use crate::error::{Error, Result};

/// Longest line accepted before the rest of it is discarded
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the `event:` field, `message` when absent
    pub event: String,
    /// `data:` lines joined with `\n`
    pub data: String,
    /// Last `id:` seen for this frame
    pub id: Option<String>,
}

/// Stateful line-oriented decoder
#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
    max_line: usize,
    /// Inside an oversized line; bytes are dropped until its newline
    discarding: bool,
    /// The current frame lost a line; dropped at the next blank line
    poisoned: bool,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_line_limit(MAX_LINE_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_line_limit(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            event: None,
            data: Vec::new(),
            id: None,
            max_line,
            discarding: false,
            poisoned: false,
        }
    }

    /// Feed a chunk and collect every frame it completes
    ///
    /// A line longer than the limit yields one malformed-payload error and
    /// the frame it belonged to is dropped.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<SseFrame>> {
        let mut out = Vec::new();
        let mut chunk = chunk;

        if self.discarding {
            match chunk.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    self.discarding = false;
                    chunk = &chunk[pos + 1..];
                }
                None => return out,
            }
        }
        self.buffer.extend_from_slice(chunk);

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.len() > self.max_line {
                out.push(Err(self.overflow()));
                continue;
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            if let Some(frame) = self.process_line(&line) {
                out.push(Ok(frame));
            }
        }

        if self.buffer.len() > self.max_line {
            self.buffer.clear();
            self.discarding = true;
            out.push(Err(self.overflow()));
        }

        out
    }

    /// Dispatch whatever is pending when the stream ends without a blank line
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.buffer.is_empty() && !self.discarding {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string();
            if let Some(frame) = self.process_line(&line) {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    fn overflow(&mut self) -> Error {
        self.poisoned = true;
        self.event = None;
        self.data.clear();
        Error::malformed(format!("event stream line exceeds {} bytes", self.max_line))
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            // retry hints are ignored; reconnection is owned by the aggregator
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if std::mem::take(&mut self.poisoned) {
            self.data.clear();
            return None;
        }
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event: event.filter(|e| !e.is_empty()).unwrap_or_else(|| "message".to_string()),
            data,
            id: self.id.clone(),
        })
    }
}

/// Render a frame the way a server would send it
pub fn encode_frame(event: &str, data: &str) -> String {
    let mut out = format!("event: {}\n", event);
    for line in data.lines() {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn frames(decoder: &mut SseDecoder, chunk: &[u8]) -> Vec<SseFrame> {
        decoder.feed(chunk).into_iter().map(|f| f.unwrap()).collect()
    }

    #[test]
    fn test_single_frame() {
        let mut decoder = SseDecoder::new();
        let frames = frames(&mut decoder, b"event: error\ndata: {\"error\":\"x\"}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "error");
        assert_eq!(frames[0].data, "{\"error\":\"x\"}");
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: session_comp").is_empty());
        assert!(decoder.feed(b"leted\r\ndata: {}\r\n").is_empty());
        let frames = frames(&mut decoder, b"\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "session_completed");
    }

    #[test]
    fn test_multiline_data_and_comments() {
        let mut decoder = SseDecoder::new();
        let frames = frames(&mut decoder, b": keep-alive\ndata: line one\ndata:line two\nid: 7\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "message");
        assert_eq!(frames[0].data, "line one\nline two");
        assert_eq!(frames[0].id.as_deref(), Some("7"));
    }

    #[test]
    fn test_event_without_data_is_dropped() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: ping\n\n").is_empty());
        let frames = frames(&mut decoder, b"data: x\n\n");
        assert_eq!(frames[0].event, "message");
    }

    #[test]
    fn test_finish_flushes_pending_frame() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: error\ndata: {}").is_empty());
        let frame = decoder.finish().unwrap();
        assert_eq!(frame.event, "error");
        assert_eq!(frame.data, "{}");
    }

    #[test]
    fn test_encode_frame_decodes_back() {
        let mut decoder = SseDecoder::new();
        let frames = frames(&mut decoder, encode_frame("response_received", "{\"a\":1}").as_bytes());
        assert_eq!(frames[0].event, "response_received");
        assert_eq!(frames[0].data, "{\"a\":1}");
    }

    #[test]
    fn test_endless_line_is_capped() {
        let mut decoder = SseDecoder::with_line_limit(16);
        assert!(decoder.feed(b"event: error\ndata: ").is_empty());

        // no newline ever arrives for this line
        let items = decoder.feed(&[b'x'; 32]);
        assert_eq!(items.len(), 1);
        let err = items[0].as_ref().unwrap_err();
        assert_eq!(err.code(), ErrorCode::PayloadMalformed);

        // the rest of the line is skipped without growing the buffer
        assert!(decoder.feed(&[b'x'; 64]).is_empty());
        assert!(decoder.buffer.is_empty());

        // the broken frame is dropped; the next one decodes
        assert!(decoder.feed(b"xx\n\n").is_empty());
        let frames = frames(&mut decoder, b"event: session_completed\ndata: {}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "session_completed");
    }

    #[test]
    fn test_long_line_within_one_chunk_is_rejected() {
        let mut decoder = SseDecoder::with_line_limit(8);
        let items = decoder.feed(b"data: 0123456789\n\ndata: ok\n\n");
        assert_eq!(items.len(), 2);
        assert!(items[0].is_err());
        assert_eq!(items[1].as_ref().unwrap().data, "ok");
    }
}
