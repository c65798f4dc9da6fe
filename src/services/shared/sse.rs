// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Server-Sent Events (SSE) stream parser.
//!
//! Extracts `data:` payloads from an SSE byte stream. Network reads may split
//! a line, or a multi-byte UTF-8 character, at any point; the parser buffers
//! until it has whole lines.

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// The payload of one `data:` line.
    Data(String),
    /// Stream termination signal (`data: [DONE]`).
    Done,
}

/// Streaming SSE parser.
///
/// # Example
///
/// ```
/// use simple_chatbot::services::shared::sse::{SseEvent, SseParser};
///
/// let mut parser = SseParser::new();
/// let events = parser.feed(b"data: {\"text\":\"hello\"}\n\ndata: [DONE]\n\n");
/// assert_eq!(events[0], SseEvent::Data("{\"text\":\"hello\"}".into()));
/// assert_eq!(events[1], SseEvent::Done);
/// ```
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(1024),
        }
    }

    /// Feed raw bytes and return every event completed by them.
    ///
    /// Comment lines (`:`), `event:`, `id:` and `retry:` fields are ignored.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = match std::str::from_utf8(&line) {
                Ok(line) => line.trim(),
                Err(e) => {
                    tracing::warn!("SSE: dropping non-UTF-8 line: {e}");
                    continue;
                }
            };

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim_start();
            if data == "[DONE]" {
                events.push(SseEvent::Done);
            } else if !data.is_empty() {
                events.push(SseEvent::Data(data.to_string()));
            }
        }

        events
    }

    /// Bytes waiting for the end of their line.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_and_done() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: {\"a\":1}\n\ndata: {\"b\":2}\n\ndata: [DONE]\n\n");
        assert_eq!(
            events,
            vec![
                SseEvent::Data("{\"a\":1}".into()),
                SseEvent::Data("{\"b\":2}".into()),
                SseEvent::Done,
            ]
        );
    }

    #[test]
    fn test_line_split_across_reads() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"da").is_empty());
        assert!(parser.feed(b"ta: {\"tex").is_empty());
        assert!(parser.pending() > 0);
        let events = parser.feed(b"t\":\"hello\"}\r\n");
        assert_eq!(events, vec![SseEvent::Data("{\"text\":\"hello\"}".into())]);
        assert_eq!(parser.pending(), 0);
    }

    #[test]
    fn test_multibyte_character_split_across_reads() {
        let mut parser = SseParser::new();
        let line = "data: {\"text\":\"こんにちは\"}\n".as_bytes();
        let (head, tail) = line.split_at(17);
        assert!(parser.feed(head).is_empty());
        let events = parser.feed(tail);
        assert_eq!(events, vec![SseEvent::Data("{\"text\":\"こんにちは\"}".into())]);
    }

    #[test]
    fn test_other_fields_ignored() {
        let mut parser = SseParser::new();
        let events = parser.feed(b": keep-alive\nevent: ping\nid: 1\nretry: 5000\ndata:{\"ok\":true}\n\n");
        assert_eq!(events, vec![SseEvent::Data("{\"ok\":true}".into())]);
    }

    #[test]
    fn test_empty_input() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"").is_empty());
        assert!(parser.feed(b"\n\n\n").is_empty());
    }
}
