// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! LLM response aggregators for the two halves of a conversation turn.
//!
//! - [`LLMUserContextAggregator`]: buffers interim transcripts and, on a
//!   final transcript, appends a `user` message to the shared context and
//!   pushes a context snapshot downstream (preceded by an interruption when
//!   the user may barge in).
//! - [`LLMAssistantContextAggregator`]: accumulates streamed model text
//!   between `LLMFullResponseStartFrame` and `LLMFullResponseEndFrame`,
//!   appends it as an `assistant` message, and records tool calls and their
//!   results. A finished tool call pushes a snapshot upstream so the model
//!   can continue.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::frames::frame_enum::FrameEnum;
use crate::frames::{EndFrame, InterruptionFrame, LLMContextFrame};
use crate::impl_processor_display;
use crate::processors::processor::{Processor, ProcessorContext, ProcessorWeight};
use crate::processors::FrameDirection;
use crate::utils::base_object::obj_id;

use super::llm_context::{LLMContext, LLMMessage, ToolCall, TOOL_CANCELLED, TOOL_IN_PROGRESS};

/// Parameters for [`LLMUserContextAggregator`].
#[derive(Debug, Clone, Default)]
pub struct UserAggregatorParams {
    /// Push an interruption ahead of each new user turn.
    ///
    /// `None` follows the task's `allow_interruptions`.
    pub interrupt_on_final_transcript: Option<bool>,
}

/// Parameters for [`LLMAssistantContextAggregator`].
#[derive(Debug, Clone, Default)]
pub struct AssistantAggregatorParams {
    /// Keep the text spoken so far when the user interrupts.
    pub keep_partial_on_interruption: bool,
}

async fn snapshot(context: &Mutex<LLMContext>) -> FrameEnum {
    let context = context.lock().await.clone();
    FrameEnum::LLMContext(LLMContextFrame::new(context))
}

// ---------------------------------------------------------------------------
// LLMUserContextAggregator
// ---------------------------------------------------------------------------

/// Turns user transcripts into `user` messages and generation requests.
///
/// Also applies `LLMMessagesAppendFrame` and `LLMSetToolsFrame` to the shared
/// context. Transcription frames are consumed.
pub struct LLMUserContextAggregator {
    id: u64,
    name: String,
    context: Arc<Mutex<LLMContext>>,
    params: UserAggregatorParams,
    /// Latest interim transcript of the current utterance.
    interim: String,
    allow_interruptions: bool,
    user_speaking: bool,
}

impl LLMUserContextAggregator {
    pub fn new(context: Arc<Mutex<LLMContext>>, params: UserAggregatorParams) -> Self {
        Self {
            id: obj_id(),
            name: "LLMUserContextAggregator".to_string(),
            context,
            params,
            interim: String::new(),
            allow_interruptions: false,
            user_speaking: false,
        }
    }

    pub fn context(&self) -> &Arc<Mutex<LLMContext>> {
        &self.context
    }

    /// The interim transcript buffered for the current utterance.
    pub fn interim(&self) -> &str {
        &self.interim
    }

    /// A snapshot of the shared context, ready to start a generation.
    pub async fn get_context_frame(&self) -> LLMContextFrame {
        LLMContextFrame::new(self.context.lock().await.clone())
    }

    fn should_interrupt(&self) -> bool {
        self.params
            .interrupt_on_final_transcript
            .unwrap_or(self.allow_interruptions)
    }

    async fn handle_final_transcript(&mut self, text: &str, ctx: &ProcessorContext) {
        self.interim.clear();
        let text = text.trim();
        if text.is_empty() {
            tracing::debug!("{}: ignoring empty transcript", self.name);
            return;
        }

        self.context.lock().await.add_user_message(text);
        tracing::debug!("{}: user turn [{}]", self.name, text);

        if self.should_interrupt() {
            ctx.send_downstream(FrameEnum::Interruption(InterruptionFrame::new()));
        }
        ctx.send_downstream(snapshot(&self.context).await);
    }
}

impl_processor_display!(LLMUserContextAggregator);

#[async_trait]
impl Processor for LLMUserContextAggregator {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> u64 {
        self.id
    }

    fn weight(&self) -> ProcessorWeight {
        ProcessorWeight::Standard
    }

    async fn process(&mut self, frame: FrameEnum, direction: FrameDirection, ctx: &ProcessorContext) {
        match frame {
            FrameEnum::Start(start) => {
                self.allow_interruptions = start.allow_interruptions;
                ctx.send(FrameEnum::Start(start), direction);
            }
            FrameEnum::UserStartedSpeaking(f) => {
                self.user_speaking = true;
                ctx.send(FrameEnum::UserStartedSpeaking(f), direction);
            }
            FrameEnum::UserStoppedSpeaking(f) => {
                self.user_speaking = false;
                ctx.send(FrameEnum::UserStoppedSpeaking(f), direction);
            }
            FrameEnum::InterimTranscription(t) if direction == FrameDirection::Downstream => {
                self.interim = t.text;
            }
            FrameEnum::Transcription(t) if direction == FrameDirection::Downstream => {
                self.handle_final_transcript(&t.text, ctx).await;
            }
            FrameEnum::LLMMessagesAppend(append) => {
                self.context.lock().await.add_messages(append.messages);
                if append.run_llm {
                    ctx.send_downstream(snapshot(&self.context).await);
                }
            }
            FrameEnum::LLMSetTools(tools) => {
                self.context.lock().await.set_tools(tools.tools);
            }
            other => ctx.send(other, direction),
        }
    }
}

// ---------------------------------------------------------------------------
// LLMAssistantContextAggregator
// ---------------------------------------------------------------------------

/// Records the model's replies and tool calls in the shared context.
///
/// Sits at the end of the pipeline, after the output transport, so what it
/// records is what was actually delivered.
pub struct LLMAssistantContextAggregator {
    id: u64,
    name: String,
    context: Arc<Mutex<LLMContext>>,
    params: AssistantAggregatorParams,
    /// Text of the response being streamed.
    aggregation: String,
    /// Incremented on start, decremented on end; the aggregation is pushed
    /// when it returns to zero.
    response_depth: u32,
    /// Tool calls whose results have not arrived yet.
    calls_in_progress: HashSet<String>,
    regeneration: Regeneration,
    /// An `EndFrame` waiting for the post-tool reply to be recorded.
    held_end: Option<EndFrame>,
}

/// Progress of the reply requested after tool results came in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Regeneration {
    Idle,
    Requested,
    Streaming,
}

impl LLMAssistantContextAggregator {
    pub fn new(context: Arc<Mutex<LLMContext>>, params: AssistantAggregatorParams) -> Self {
        Self {
            id: obj_id(),
            name: "LLMAssistantContextAggregator".to_string(),
            context,
            params,
            aggregation: String::new(),
            response_depth: 0,
            calls_in_progress: HashSet::new(),
            regeneration: Regeneration::Idle,
            held_end: None,
        }
    }

    pub fn context(&self) -> &Arc<Mutex<LLMContext>> {
        &self.context
    }

    /// Append the accumulated response as an `assistant` message.
    async fn push_aggregation(&mut self) {
        let text = std::mem::take(&mut self.aggregation);
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.context.lock().await.add_assistant_message(text);
        tracing::debug!("{}: assistant turn [{}]", self.name, text);
    }

    /// Whether ending now would lose a reply that is still on its way.
    fn awaiting_response(&self) -> bool {
        self.regeneration != Regeneration::Idle || !self.calls_in_progress.is_empty()
    }

    fn release_end(&mut self, ctx: &ProcessorContext) {
        if self.awaiting_response() {
            return;
        }
        if let Some(end) = self.held_end.take() {
            tracing::debug!("{}: reply recorded, releasing end of session", self.name);
            ctx.send_downstream(FrameEnum::End(end));
        }
    }

    async fn handle_interruption(&mut self) {
        if self.params.keep_partial_on_interruption {
            self.push_aggregation().await;
        } else if !self.aggregation.is_empty() {
            tracing::debug!(
                "{}: discarding partial response ({} chars)",
                self.name,
                self.aggregation.len()
            );
            self.aggregation.clear();
        }
        self.response_depth = 0;
        self.regeneration = Regeneration::Idle;
    }

    async fn handle_call_in_progress(&mut self, tool_call_id: &str, function_name: &str, arguments: &serde_json::Value) {
        let mut context = self.context.lock().await;
        context.add_message(LLMMessage::assistant_tool_calls(vec![ToolCall::function(
            tool_call_id,
            function_name,
            arguments,
        )]));
        context.add_message(LLMMessage::tool(tool_call_id, TOOL_IN_PROGRESS));
        self.calls_in_progress.insert(tool_call_id.to_string());
    }

    /// Record a tool result. Returns `true` when no other call is pending.
    async fn handle_call_result(
        &mut self,
        tool_call_id: &str,
        function_name: &str,
        arguments: &serde_json::Value,
        result: &serde_json::Value,
    ) -> bool {
        let content = result.to_string();
        let mut context = self.context.lock().await;
        if !context.update_tool_result(tool_call_id, content.clone()) {
            // The in-progress notice never made it here; keep the pair valid.
            context.add_message(LLMMessage::assistant_tool_calls(vec![ToolCall::function(
                tool_call_id,
                function_name,
                arguments,
            )]));
            context.add_message(LLMMessage::tool(tool_call_id, content));
        }
        self.calls_in_progress.remove(tool_call_id);
        self.calls_in_progress.is_empty()
    }
}

impl_processor_display!(LLMAssistantContextAggregator);

#[async_trait]
impl Processor for LLMAssistantContextAggregator {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> u64 {
        self.id
    }

    async fn process(&mut self, frame: FrameEnum, direction: FrameDirection, ctx: &ProcessorContext) {
        match frame {
            FrameEnum::LLMFullResponseStart(_) => {
                self.response_depth += 1;
                if self.response_depth == 1 && self.regeneration == Regeneration::Requested {
                    self.regeneration = Regeneration::Streaming;
                }
            }
            FrameEnum::LLMFullResponseEnd(_) => {
                self.response_depth = self.response_depth.saturating_sub(1);
                if self.response_depth == 0 {
                    self.push_aggregation().await;
                    if self.regeneration == Regeneration::Streaming {
                        self.regeneration = Regeneration::Idle;
                    }
                    self.release_end(ctx);
                }
            }
            FrameEnum::LLMText(t) => {
                if self.response_depth > 0 {
                    self.aggregation.push_str(&t.text);
                }
                ctx.send(FrameEnum::LLMText(t), direction);
            }
            FrameEnum::Text(t) => {
                if self.response_depth > 0 {
                    self.aggregation.push_str(&t.text);
                }
                ctx.send(FrameEnum::Text(t), direction);
            }
            FrameEnum::Interruption(f) => {
                self.handle_interruption().await;
                ctx.send(FrameEnum::Interruption(f), direction);
                self.release_end(ctx);
            }
            FrameEnum::FunctionCallInProgress(f) => {
                self.handle_call_in_progress(&f.tool_call_id, &f.function_name, &f.arguments)
                    .await;
                ctx.send(FrameEnum::FunctionCallInProgress(f), direction);
            }
            FrameEnum::FunctionCallResult(f) => {
                let run_llm = self
                    .handle_call_result(&f.tool_call_id, &f.function_name, &f.arguments, &f.result)
                    .await;
                if run_llm {
                    tracing::debug!("{}: tool results complete, requesting generation", self.name);
                    self.regeneration = Regeneration::Requested;
                    ctx.send_upstream(snapshot(&self.context).await);
                }
                ctx.send(FrameEnum::FunctionCallResult(f), direction);
            }
            FrameEnum::FunctionCallCancel(f) => {
                self.context
                    .lock()
                    .await
                    .update_tool_result(&f.tool_call_id, TOOL_CANCELLED);
                self.calls_in_progress.remove(&f.tool_call_id);
                ctx.send(FrameEnum::FunctionCallCancel(f), direction);
                self.release_end(ctx);
            }
            FrameEnum::LLMMessagesAppend(append) => {
                self.context.lock().await.add_messages(append.messages);
                if append.run_llm {
                    ctx.send_upstream(snapshot(&self.context).await);
                }
            }
            FrameEnum::LLMSetTools(tools) => {
                self.context.lock().await.set_tools(tools.tools);
            }
            FrameEnum::End(end) if self.awaiting_response() => {
                tracing::debug!("{}: holding end of session until the reply arrives", self.name);
                self.held_end = Some(end);
            }
            FrameEnum::Cancel(cancel) => {
                self.held_end = None;
                self.regeneration = Regeneration::Idle;
                ctx.send(FrameEnum::Cancel(cancel), direction);
            }
            other => ctx.send(other, direction),
        }
    }
}
