// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Function-call execution for tool-using language models.
//!
//! [`FunctionCallBridge`] sits right after the LLM stage. When the model asks
//! for tool calls (`FunctionCallsStartedFrame`) the bridge announces each
//! call with a `FunctionCallInProgressFrame`, runs the registered handler on
//! its own task, and delivers a `FunctionCallResultFrame` when it finishes.
//! The assistant aggregator downstream records the result in the context and
//! asks the model to continue.
//!
//! Handler failures, panics and unknown function names all become results
//! carrying an `{"error": ...}` payload so the model can react to them.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::frames::frame_enum::FrameEnum;
use crate::frames::{
    FunctionCallCancelFrame, FunctionCallFromLLM, FunctionCallInProgressFrame,
    FunctionCallResultFrame, TTSSpeakFrame,
};
use crate::impl_processor_display;
use crate::processors::processor::{FrameEmitter, Processor, ProcessorContext, ProcessorWeight};
use crate::processors::FrameDirection;
use crate::utils::base_object::obj_id;

/// Arguments handed to a function handler.
#[derive(Debug, Clone)]
pub struct FunctionCallParams {
    pub function_name: String,
    pub tool_call_id: String,
    pub arguments: Value,
}

/// Type-erased async function handler.
pub type FunctionHandler =
    Arc<dyn Fn(FunctionCallParams) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// Per-function behaviour.
#[derive(Debug, Clone)]
pub struct FunctionOptions {
    /// Spoken right away while the call runs.
    pub filler_text: Option<String>,
    /// Abandon the call when the user interrupts.
    pub cancel_on_interruption: bool,
}

impl Default for FunctionOptions {
    fn default() -> Self {
        Self {
            filler_text: None,
            cancel_on_interruption: true,
        }
    }
}

struct RegisteredFunction {
    handler: FunctionHandler,
    options: FunctionOptions,
}

struct PendingCall {
    function_name: String,
    cancel_on_interruption: bool,
    handle: JoinHandle<()>,
}

/// Runs tool calls requested by the model and reports their results.
pub struct FunctionCallBridge {
    id: u64,
    name: String,
    functions: HashMap<String, RegisteredFunction>,
    pending: HashMap<String, PendingCall>,
}

impl FunctionCallBridge {
    pub fn new() -> Self {
        Self {
            id: obj_id(),
            name: "FunctionCallBridge".to_string(),
            functions: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// Register `handler` for calls to `name`, replacing any earlier one.
    pub fn register_function<F, Fut>(&mut self, name: impl Into<String>, handler: F, options: FunctionOptions)
    where
        F: Fn(FunctionCallParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        let handler: FunctionHandler = Arc::new(move |params| Box::pin(handler(params)));
        let name = name.into();
        tracing::debug!(processor = %self.name, function = %name, "registered function");
        self.functions
            .insert(name, RegisteredFunction { handler, options });
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Number of calls still running.
    pub fn pending_calls(&self) -> usize {
        self.pending.values().filter(|c| !c.handle.is_finished()).count()
    }

    fn prune_finished(&mut self) {
        self.pending.retain(|_, call| !call.handle.is_finished());
    }

    fn handle_calls_started(&mut self, calls: Vec<FunctionCallFromLLM>, ctx: &ProcessorContext) {
        // Every call is announced before any result can arrive, so the
        // aggregator knows how many results to wait for.
        for call in &calls {
            let options = self
                .functions
                .get(&call.function_name)
                .map(|f| f.options.clone())
                .unwrap_or_default();
            if let Some(filler) = options.filler_text {
                ctx.send_downstream(FrameEnum::TTSSpeak(TTSSpeakFrame::new(filler)));
            }
            let mut in_progress = FunctionCallInProgressFrame::new(
                call.function_name.clone(),
                call.tool_call_id.clone(),
                call.arguments.clone(),
            );
            in_progress.cancel_on_interruption = options.cancel_on_interruption;
            ctx.send_downstream(FrameEnum::FunctionCallInProgress(in_progress));
        }

        for call in calls {
            let Some(function) = self.functions.get(&call.function_name) else {
                tracing::warn!(processor = %self.name, function = %call.function_name, "function is not registered");
                let error = json!({
                    "error": format!("function '{}' is not registered", call.function_name)
                });
                ctx.send_downstream(result_frame(call, error));
                continue;
            };

            let cancel_on_interruption = function.options.cancel_on_interruption;
            let emitter = if cancel_on_interruption {
                ctx.emitter()
            } else {
                ctx.persistent_emitter()
            };
            let handler = function.handler.clone();
            let tool_call_id = call.tool_call_id.clone();
            let function_name = call.function_name.clone();
            tracing::debug!(processor = %self.name, function = %function_name, id = %tool_call_id, "running function");
            let handle = tokio::spawn(run_handler(handler, call, emitter));
            self.pending.insert(
                tool_call_id,
                PendingCall {
                    function_name,
                    cancel_on_interruption,
                    handle,
                },
            );
        }
    }

    fn cancel_interruptible(&mut self, ctx: &ProcessorContext) {
        let cancelled: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, call)| call.cancel_on_interruption)
            .map(|(id, _)| id.clone())
            .collect();
        for tool_call_id in cancelled {
            if let Some(call) = self.pending.remove(&tool_call_id) {
                call.handle.abort();
                tracing::debug!(processor = %self.name, function = %call.function_name, id = %tool_call_id, "function call cancelled");
                ctx.send_downstream(FrameEnum::FunctionCallCancel(FunctionCallCancelFrame::new(
                    call.function_name,
                    tool_call_id,
                )));
            }
        }
    }

    fn abort_all(&mut self) {
        for (_, call) in self.pending.drain() {
            call.handle.abort();
        }
    }

    /// Wait for running calls; gives up if an urgent frame arrives.
    async fn wait_for_pending(&mut self, ctx: &ProcessorContext) {
        let handles: Vec<JoinHandle<()>> = self.pending.drain().map(|(_, call)| call.handle).collect();
        if handles.is_empty() {
            return;
        }
        tracing::debug!(processor = %self.name, count = handles.len(), "waiting for function calls before ending");
        let all = futures_util::future::join_all(handles);
        tokio::select! {
            _ = all => {}
            _ = ctx.interruption_token().cancelled() => {
                tracing::debug!(processor = %self.name, "stopped waiting for function calls");
            }
        }
    }
}

impl Default for FunctionCallBridge {
    fn default() -> Self {
        Self::new()
    }
}

fn result_frame(call: FunctionCallFromLLM, result: Value) -> FrameEnum {
    FrameEnum::FunctionCallResult(FunctionCallResultFrame::new(
        call.function_name,
        call.tool_call_id,
        call.arguments,
        result,
    ))
}

async fn run_handler(handler: FunctionHandler, call: FunctionCallFromLLM, emitter: FrameEmitter) {
    let params = FunctionCallParams {
        function_name: call.function_name.clone(),
        tool_call_id: call.tool_call_id.clone(),
        arguments: call.arguments.clone(),
    };
    let result = match AssertUnwindSafe(handler(params)).catch_unwind().await {
        Ok(Ok(value)) => value,
        Ok(Err(message)) => {
            tracing::warn!(function = %call.function_name, "function call failed: {message}");
            json!({ "error": message })
        }
        Err(_) => {
            tracing::error!(function = %call.function_name, "function handler panicked");
            json!({ "error": format!("function '{}' panicked", call.function_name) })
        }
    };
    if !emitter.send_downstream(result_frame(call, result)) {
        tracing::debug!("function result dropped: call was cancelled");
    }
}

impl_processor_display!(FunctionCallBridge);

#[async_trait]
impl Processor for FunctionCallBridge {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> u64 {
        self.id
    }

    /// Heavy so that waiting for calls on End yields to urgent frames.
    fn weight(&self) -> ProcessorWeight {
        ProcessorWeight::Heavy
    }

    async fn process(&mut self, frame: FrameEnum, direction: FrameDirection, ctx: &ProcessorContext) {
        self.prune_finished();
        match frame {
            FrameEnum::FunctionCallsStarted(started) if direction == FrameDirection::Downstream => {
                let calls = started.function_calls.clone();
                ctx.send_downstream(FrameEnum::FunctionCallsStarted(started));
                self.handle_calls_started(calls, ctx);
            }
            FrameEnum::Interruption(interruption) => {
                ctx.send(FrameEnum::Interruption(interruption), direction);
                self.cancel_interruptible(ctx);
            }
            FrameEnum::Cancel(cancel) => {
                self.abort_all();
                ctx.send(FrameEnum::Cancel(cancel), direction);
            }
            FrameEnum::End(end) => {
                self.wait_for_pending(ctx).await;
                ctx.send(FrameEnum::End(end), direction);
            }
            other => ctx.send(other, direction),
        }
    }

    async fn cleanup(&mut self) {
        self.abort_all();
    }
}
