// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! LLM context management for conversation state.
//!
//! This module provides [`LLMContext`], the ordered conversation history plus
//! the tool schemas offered to the model, and [`LLMMessage`], one entry of
//! that history. Messages serialize to the OpenAI chat-completions shape.
//!
//! The context is shared between the user and assistant aggregators via
//! `Arc<Mutex<LLMContext>>`; every other stage only ever sees snapshots
//! carried by `LLMContextFrame`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Content of a tool message whose call has not finished yet.
pub const TOOL_IN_PROGRESS: &str = "IN_PROGRESS";
/// Content of a tool message whose call was abandoned.
pub const TOOL_CANCELLED: &str = "CANCELLED";

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        write!(f, "{s}")
    }
}

/// Function name and JSON-encoded arguments of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    /// Arguments as a JSON string, as the chat API expects.
    pub arguments: String,
}

/// A tool call recorded on an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: ToolCallFunction,
}

impl ToolCall {
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: &Value) -> Self {
        Self {
            id: id.into(),
            call_type: "function".to_string(),
            function: ToolCallFunction {
                name: name.into(),
                arguments: arguments.to_string(),
            },
        }
    }
}

/// One message of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LLMMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl LLMMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// An assistant message requesting tool calls.
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    /// The answer to the tool call `tool_call_id`.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// The ordered conversation history and the tools offered to the model.
///
/// # Example
///
/// ```
/// use simple_chatbot::processors::aggregators::llm_context::{LLMContext, LLMMessage};
///
/// let mut context = LLMContext::with_messages(vec![LLMMessage::system("Be brief.")]);
/// context.add_user_message("Hello!");
/// context.add_assistant_message("Hi there!");
///
/// assert_eq!(context.message_count(), 3);
/// assert_eq!(context.messages_for_api()[1]["role"], "user");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LLMContext {
    messages: Vec<LLMMessage>,
    tools: Vec<Value>,
}

impl LLMContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(messages: Vec<LLMMessage>) -> Self {
        Self {
            messages,
            tools: Vec::new(),
        }
    }

    pub fn with_tools(messages: Vec<LLMMessage>, tools: Vec<Value>) -> Self {
        Self { messages, tools }
    }

    pub fn add_message(&mut self, message: LLMMessage) {
        self.messages.push(message);
    }

    pub fn add_messages(&mut self, messages: impl IntoIterator<Item = LLMMessage>) {
        self.messages.extend(messages);
    }

    pub fn add_user_message(&mut self, text: &str) {
        self.add_message(LLMMessage::user(text));
    }

    pub fn add_assistant_message(&mut self, text: &str) {
        self.add_message(LLMMessage::assistant(text));
    }

    pub fn add_system_message(&mut self, text: &str) {
        self.add_message(LLMMessage::system(text));
    }

    /// Replace the whole history.
    pub fn set_messages(&mut self, messages: Vec<LLMMessage>) {
        self.messages = messages;
    }

    pub fn messages(&self) -> &[LLMMessage] {
        &self.messages
    }

    pub fn last_message(&self) -> Option<&LLMMessage> {
        self.messages.last()
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Replace the tool schemas. An empty list removes all tools.
    pub fn set_tools(&mut self, tools: Vec<Value>) {
        self.tools = tools;
    }

    pub fn tools(&self) -> &[Value] {
        &self.tools
    }

    /// Set the content of the tool message answering `tool_call_id`.
    ///
    /// Returns `false` if no such message exists.
    pub fn update_tool_result(&mut self, tool_call_id: &str, content: impl Into<String>) -> bool {
        match self
            .messages
            .iter_mut()
            .rev()
            .find(|m| m.role == Role::Tool && m.tool_call_id.as_deref() == Some(tool_call_id))
        {
            Some(message) => {
                message.content = content.into();
                true
            }
            None => false,
        }
    }

    /// Messages in the chat-completions wire shape.
    pub fn messages_for_api(&self) -> Vec<Value> {
        self.messages
            .iter()
            .filter_map(|m| match serde_json::to_value(m) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!("LLMContext: failed to serialize message: {e}");
                    None
                }
            })
            .collect()
    }
}
