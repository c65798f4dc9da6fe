// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! OpenAI chat-completions provider.
//!
//! [`OpenAiProvider`] streams replies from `/chat/completions` (or any
//! compatible endpoint) over Server-Sent Events and yields [`LlmChunk`]s:
//! text deltas as they arrive, reassembled tool calls once the stream ends,
//! and token usage from the final chunk.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, Stream, StreamExt};

use crate::error::ProviderError;
use crate::processors::aggregators::llm_context::LLMContext;
use crate::services::shared::llm_protocol::{
    error_message, ChatCompletionChunk, ChatCompletionRequest, ToolCallAccumulator,
};
use crate::services::shared::sse::{SseEvent, SseParser};
use crate::services::{LlmChunk, LlmProvider, LlmStream};

pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Streaming chat-completion client.
#[derive(Clone)]
pub struct OpenAiProvider {
    api_key: String,
    model: String,
    base_url: String,
    temperature: Option<f64>,
    max_tokens: Option<u64>,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ProviderError::Config("OpenAI API key is empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            api_key,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: None,
            max_tokens: None,
            client,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point at an OpenAI-compatible API (no trailing slash).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    fn build_request(&self, context: &LLMContext) -> ChatCompletionRequest {
        let mut request = ChatCompletionRequest::streaming(&self.model, context);
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;
        request
    }
}

impl fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn stream(&self, context: &LLMContext) -> Result<LlmStream, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_request(context);
        tracing::debug!(
            model = %self.model,
            messages = body.messages.len(),
            tools = body.tools.as_ref().map_or(0, Vec::len),
            "starting chat completion"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: error_message(&text),
            });
        }

        Ok(decode_stream(Box::pin(response.bytes_stream())))
    }
}

// ---------------------------------------------------------------------------
// Stream decoding
// ---------------------------------------------------------------------------

/// Turns SSE bytes into response chunks.
#[derive(Debug, Default)]
struct ChunkDecoder {
    parser: SseParser,
    tool_calls: ToolCallAccumulator,
    done: bool,
}

impl ChunkDecoder {
    fn feed(&mut self, bytes: &[u8]) -> Vec<LlmChunk> {
        let mut out = Vec::new();
        for event in self.parser.feed(bytes) {
            match event {
                SseEvent::Done => {
                    self.done = true;
                    out.extend(self.finish());
                    break;
                }
                SseEvent::Data(data) => {
                    let chunk: ChatCompletionChunk = match serde_json::from_str(&data) {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            tracing::warn!(error = %e, "skipping malformed completion chunk");
                            continue;
                        }
                    };
                    for choice in chunk.choices {
                        let Some(delta) = choice.delta else { continue };
                        if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                            out.push(LlmChunk::Text(text));
                        }
                        for fragment in delta.tool_calls.iter().flatten() {
                            self.tool_calls.push(fragment);
                        }
                    }
                    if let Some(usage) = chunk.usage {
                        out.push(LlmChunk::Usage(usage.into()));
                    }
                }
            }
        }
        out
    }

    /// Flush accumulated tool calls.
    fn finish(&mut self) -> Vec<LlmChunk> {
        std::mem::take(&mut self.tool_calls).finish()
    }
}

struct DecodeState<S> {
    body: S,
    decoder: ChunkDecoder,
    queue: VecDeque<LlmChunk>,
    ended: bool,
}

/// Decode an SSE byte stream into an [`LlmStream`].
///
/// The stream ends at `data: [DONE]` or when the body closes, whichever comes
/// first. A transport error is yielded once and ends the stream.
fn decode_stream<S, B, E>(body: S) -> LlmStream
where
    S: Stream<Item = Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ProviderError> + Send + 'static,
{
    let state = DecodeState {
        body,
        decoder: ChunkDecoder::default(),
        queue: VecDeque::new(),
        ended: false,
    };
    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(chunk) = state.queue.pop_front() {
                return Some((Ok(chunk), state));
            }
            if state.ended {
                return None;
            }
            match state.body.next().await {
                Some(Ok(bytes)) => {
                    state.queue.extend(state.decoder.feed(bytes.as_ref()));
                    state.ended = state.decoder.done;
                }
                Some(Err(e)) => {
                    state.ended = true;
                    return Some((Err(e.into()), state));
                }
                None => {
                    state.queue.extend(state.decoder.finish());
                    state.ended = true;
                }
            }
        }
    })
    .boxed()
}
