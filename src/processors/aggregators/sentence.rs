// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Sentence aggregation for streamed text.
//!
//! [`SentenceAggregator`] accumulates streamed model output and hands back
//! complete sentences, so speech synthesis works on coherent units rather than
//! fragmented tokens.
//!
//! # Example flow
//!
//! ```text
//! push("Hello,")        -> []
//! push(" world.")       -> []                 ("." may still be "3.5")
//! push(" How are")      -> ["Hello, world."]
//! flush()               -> Some("How are")
//! ```

/// Punctuation that ends a sentence when followed by whitespace.
const LATIN_ENDINGS: &[char] = &['.', '!', '?', ';'];

/// Punctuation that always ends a sentence.
const HARD_ENDINGS: &[char] = &['\n', '。', '！', '？'];

/// Byte offset just past the first sentence boundary in `text`, if any.
fn find_sentence_end(text: &str) -> Option<usize> {
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let end = i + c.len_utf8();
        if HARD_ENDINGS.contains(&c) {
            return Some(end);
        }
        if LATIN_ENDINGS.contains(&c) {
            if let Some(&(_, next)) = chars.peek() {
                if next.is_whitespace() {
                    return Some(end);
                }
            }
        }
    }
    None
}

/// Accumulates text until it holds complete sentences.
#[derive(Debug, Default, Clone)]
pub struct SentenceAggregator {
    buffer: String,
}

impl SentenceAggregator {
    pub fn new() -> Self {
        Self {
            buffer: String::with_capacity(256),
        }
    }

    /// Add streamed text and return every sentence it completed.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buffer.push_str(text);
        let mut sentences = Vec::new();
        while let Some(end) = find_sentence_end(&self.buffer) {
            let rest = self.buffer.split_off(end);
            let sentence = std::mem::replace(&mut self.buffer, rest);
            let sentence = sentence.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
        }
        sentences
    }

    /// Take whatever is buffered, complete or not.
    pub fn flush(&mut self) -> Option<String> {
        let text = std::mem::take(&mut self.buffer);
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }

    /// Drop buffered text.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// The text waiting for a boundary.
    pub fn buffered(&self) -> &str {
        &self.buffer
    }
}
