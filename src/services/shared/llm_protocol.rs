// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! OpenAI-compatible chat-completions wire types.
//!
//! Request bodies are built from an [`LLMContext`]; streamed response chunks
//! are decoded into [`LlmChunk`]s. Tool calls arrive in fragments spread over
//! many chunks and are reassembled by [`ToolCallAccumulator`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::metrics::LLMTokenUsage;
use crate::processors::aggregators::llm_context::LLMContext;
use crate::services::LlmChunk;

/// Request body for `/chat/completions`.
#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Value>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
}

#[derive(Debug, Serialize)]
pub struct StreamOptions {
    pub include_usage: bool,
}

impl ChatCompletionRequest {
    /// A streaming request for `context`, asking for usage in the last chunk.
    pub fn streaming(model: &str, context: &LLMContext) -> Self {
        let tools = context.tools();
        Self {
            model: model.to_string(),
            messages: context.messages_for_api(),
            stream: true,
            stream_options: Some(StreamOptions {
                include_usage: true,
            }),
            temperature: None,
            max_tokens: None,
            tools: (!tools.is_empty()).then(|| tools.to_vec()),
        }
    }
}

/// A single SSE chunk from a streaming completions endpoint.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: Option<ChunkDelta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ChunkToolCall>>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkToolCall {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<ChunkFunction>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkFunction {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UsageInfo {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl From<UsageInfo> for LLMTokenUsage {
    fn from(usage: UsageInfo) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

/// Error body returned with a non-2xx status.
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub error: ApiError,
}

#[derive(Debug, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub message: String,
}

/// Extract a readable message from an error response body.
pub fn error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.to_string())
}

// ---------------------------------------------------------------------------
// Tool-call reassembly
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Collects streamed tool-call fragments, keyed by their index.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: Vec<PartialToolCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: &ChunkToolCall) {
        if self.calls.len() <= fragment.index {
            self.calls.resize_with(fragment.index + 1, PartialToolCall::default);
        }
        let call = &mut self.calls[fragment.index];
        if let Some(id) = &fragment.id {
            call.id.clone_from(id);
        }
        if let Some(function) = &fragment.function {
            if let Some(name) = &function.name {
                call.name.push_str(name);
            }
            if let Some(arguments) = &function.arguments {
                call.arguments.push_str(arguments);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// The finished calls, in index order.
    ///
    /// Arguments that are not valid JSON become an empty object.
    pub fn finish(self) -> Vec<LlmChunk> {
        self.calls
            .into_iter()
            .filter(|call| !call.name.is_empty())
            .map(|call| {
                let arguments = if call.arguments.trim().is_empty() {
                    Value::Object(serde_json::Map::new())
                } else {
                    serde_json::from_str(&call.arguments).unwrap_or_else(|e| {
                        tracing::warn!(error = %e, raw = %call.arguments, "failed to parse tool call arguments");
                        Value::Object(serde_json::Map::new())
                    })
                };
                LlmChunk::ToolCall {
                    id: call.id,
                    name: call.name,
                    arguments,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::aggregators::llm_context::LLMMessage;
    use serde_json::json;

    fn fragment(data: &str) -> ChunkToolCall {
        serde_json::from_str(data).unwrap()
    }

    #[test]
    fn test_streaming_request_body() {
        let mut context = LLMContext::with_messages(vec![LLMMessage::system("Be brief.")]);
        let body = serde_json::to_value(ChatCompletionRequest::streaming("gpt-4.1-mini", &context)).unwrap();
        assert_eq!(body["model"], "gpt-4.1-mini");
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert!(body.get("tools").is_none());

        context.set_tools(vec![json!({"type": "function", "function": {"name": "f"}})]);
        let body = serde_json::to_value(ChatCompletionRequest::streaming("m", &context)).unwrap();
        assert_eq!(body["tools"][0]["function"]["name"], "f");
    }

    #[test]
    fn test_chunk_parsing() {
        let chunk: ChatCompletionChunk = serde_json::from_str(
            r#"{"id":"x","choices":[{"index":0,"delta":{"content":"Hi"},"finish_reason":null}]}"#,
        )
        .unwrap();
        let delta = chunk.choices[0].delta.as_ref().unwrap();
        assert_eq!(delta.content.as_deref(), Some("Hi"));

        let usage: ChatCompletionChunk = serde_json::from_str(
            r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#,
        )
        .unwrap();
        let usage: LLMTokenUsage = usage.usage.unwrap().into();
        assert_eq!(usage.total_tokens, 15);
    }

    #[test]
    fn test_tool_call_fragments_reassembled() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(&fragment(r#"{"index":0,"id":"call_1","function":{"name":"get_weather","arguments":""}}"#));
        acc.push(&fragment(r#"{"index":0,"function":{"arguments":"{\"location\":"}}"#));
        acc.push(&fragment(r#"{"index":1,"id":"call_2","function":{"name":"get_time","arguments":"{}"}}"#));
        acc.push(&fragment(r#"{"index":0,"function":{"arguments":"\"Paris\"}"}}"#));

        let calls = acc.finish();
        assert_eq!(
            calls,
            vec![
                LlmChunk::ToolCall {
                    id: "call_1".into(),
                    name: "get_weather".into(),
                    arguments: json!({"location": "Paris"}),
                },
                LlmChunk::ToolCall {
                    id: "call_2".into(),
                    name: "get_time".into(),
                    arguments: json!({}),
                },
            ]
        );
    }

    #[test]
    fn test_bad_arguments_become_empty_object() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(&fragment(r#"{"index":0,"id":"c","function":{"name":"f","arguments":"{not json"}}"#));
        assert_eq!(
            acc.finish(),
            vec![LlmChunk::ToolCall {
                id: "c".into(),
                name: "f".into(),
                arguments: json!({}),
            }]
        );
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(r#"{"error":{"message":"Invalid API key","type":"auth"}}"#),
            "Invalid API key"
        );
        assert_eq!(error_message("plain text"), "plain text");
    }
}
