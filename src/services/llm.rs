// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Language-model pipeline stage.
//!
//! [`LLMService`] answers every `LLMContextFrame` (from either direction) by
//! streaming a reply from its [`LlmProvider`] on a background task:
//!
//! ```text
//! LLMFullResponseStart, LLMText*, [FunctionCallsStarted], LLMFullResponseEnd
//! ```
//!
//! A new snapshot supersedes the generation in flight; an interruption or
//! cancel aborts it. Provider failures are reported upstream as non-fatal
//! `ErrorFrame`s and the response is still closed.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::task::JoinHandle;

use crate::frames::frame_enum::FrameEnum;
use crate::frames::{
    ErrorFrame, FunctionCallFromLLM, FunctionCallsStartedFrame, LLMFullResponseEndFrame,
    LLMFullResponseStartFrame, LLMTextFrame, MetricsFrame,
};
use crate::metrics::MetricsData;
use crate::processors::aggregators::llm_context::LLMContext;
use crate::processors::processor::{FrameEmitter, Processor, ProcessorContext, ProcessorWeight};
use crate::processors::FrameDirection;
use crate::services::{LlmChunk, LlmProvider, MetricsSettings};
use crate::utils::base_object::obj_id;

#[derive(Debug, Default)]
struct ResponseState {
    /// LLMFullResponseStart went out without its matching end.
    open: bool,
    superseded: bool,
}

/// Output gate for one generation.
///
/// Lets the stage close a generation it replaces without racing the task
/// that is still writing to it.
#[derive(Clone)]
struct ResponseGate {
    emitter: FrameEmitter,
    state: Arc<Mutex<ResponseState>>,
}

impl ResponseGate {
    fn new(emitter: FrameEmitter) -> Self {
        Self {
            emitter,
            state: Arc::new(Mutex::new(ResponseState::default())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ResponseState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn send(&self, frame: FrameEnum, direction: FrameDirection) -> bool {
        let mut state = self.lock();
        if state.superseded {
            return false;
        }
        match &frame {
            FrameEnum::LLMFullResponseStart(_) => state.open = true,
            FrameEnum::LLMFullResponseEnd(_) => state.open = false,
            _ => {}
        }
        self.emitter.send(frame, direction)
    }

    fn downstream(&self, frame: FrameEnum) -> bool {
        self.send(frame, FrameDirection::Downstream)
    }

    /// Stop the generation's output; returns whether its response was open.
    fn supersede(&self) -> bool {
        let mut state = self.lock();
        state.superseded = true;
        std::mem::take(&mut state.open)
    }
}

struct Generation {
    gate: ResponseGate,
    handle: JoinHandle<()>,
}

/// Streams model replies for context snapshots.
pub struct LLMService<P: LlmProvider> {
    id: u64,
    name: String,
    provider: Arc<P>,
    metrics: MetricsSettings,
    generation: Option<Generation>,
}

impl<P: LlmProvider> LLMService<P> {
    pub fn new(provider: P) -> Self {
        let name = format!("LLMService({})", provider.model());
        Self {
            id: obj_id(),
            name,
            provider: Arc::new(provider),
            metrics: MetricsSettings::default(),
            generation: None,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Whether a reply is still being generated.
    pub fn is_generating(&self) -> bool {
        self.generation
            .as_ref()
            .is_some_and(|g| !g.handle.is_finished())
    }

    fn start_generation(&mut self, context: LLMContext, ctx: &ProcessorContext) {
        if let Some(previous) = self.generation.take() {
            if previous.gate.supersede() {
                ctx.send_downstream(FrameEnum::LLMFullResponseEnd(LLMFullResponseEndFrame::new()));
            }
            previous.handle.abort();
            tracing::debug!(processor = %self.name, "superseded running generation");
        }

        tracing::debug!(processor = %self.name, messages = context.message_count(), "generating reply");
        let gate = ResponseGate::new(ctx.emitter());
        let handle = tokio::spawn(run_generation(
            self.provider.clone(),
            context,
            gate.clone(),
            self.name.clone(),
            self.metrics,
        ));
        self.generation = Some(Generation { gate, handle });
    }

    fn abort_generation(&mut self) {
        if let Some(generation) = self.generation.take() {
            generation.gate.supersede();
            generation.handle.abort();
        }
    }

    /// Let the running generation finish; gives up if an urgent frame arrives.
    async fn wait_for_generation(&mut self, ctx: &ProcessorContext) {
        let Some(mut generation) = self.generation.take() else {
            return;
        };
        tokio::select! {
            _ = &mut generation.handle => {}
            _ = ctx.interruption_token().cancelled() => {
                self.generation = Some(generation);
            }
        }
    }
}

async fn run_generation<P: LlmProvider>(
    provider: Arc<P>,
    context: LLMContext,
    gate: ResponseGate,
    name: String,
    metrics: MetricsSettings,
) {
    if !gate.downstream(FrameEnum::LLMFullResponseStart(LLMFullResponseStartFrame::new())) {
        return;
    }
    let started = Instant::now();
    let model = Some(provider.model().to_string());

    match provider.stream(&context).await {
        Err(e) => {
            tracing::error!(processor = %name, error = %e, "LLM request failed");
            gate.send(
                FrameEnum::Error(ErrorFrame::non_fatal(format!("{name}: {e}"))),
                FrameDirection::Upstream,
            );
        }
        Ok(mut stream) => {
            let mut first_chunk = true;
            let mut calls = Vec::new();
            while let Some(item) = stream.next().await {
                let chunk = match item {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        tracing::error!(processor = %name, error = %e, "LLM stream failed");
                        gate.send(
                            FrameEnum::Error(ErrorFrame::non_fatal(format!("{name}: {e}"))),
                            FrameDirection::Upstream,
                        );
                        break;
                    }
                };
                if first_chunk && !matches!(chunk, LlmChunk::Usage(_)) {
                    first_chunk = false;
                    if metrics.ttfb {
                        gate.downstream(FrameEnum::Metrics(MetricsFrame::new(vec![MetricsData::Ttfb {
                            processor: name.clone(),
                            model: model.clone(),
                            value: started.elapsed().as_secs_f64(),
                        }])));
                    }
                }
                match chunk {
                    LlmChunk::Text(text) => {
                        if !gate.downstream(FrameEnum::LLMText(LLMTextFrame::new(text))) {
                            return;
                        }
                    }
                    LlmChunk::ToolCall { id, name: function_name, arguments } => {
                        tracing::debug!(processor = %name, function = %function_name, "model requested tool call");
                        calls.push(FunctionCallFromLLM {
                            function_name,
                            tool_call_id: id,
                            arguments,
                        });
                    }
                    LlmChunk::Usage(usage) => {
                        if metrics.usage {
                            gate.downstream(FrameEnum::Metrics(MetricsFrame::new(vec![MetricsData::LlmUsage {
                                processor: name.clone(),
                                model: model.clone(),
                                value: usage,
                            }])));
                        }
                    }
                }
            }
            if !calls.is_empty()
                && !gate.downstream(FrameEnum::FunctionCallsStarted(FunctionCallsStartedFrame::new(calls)))
            {
                return;
            }
        }
    }

    if metrics.ttfb {
        gate.downstream(FrameEnum::Metrics(MetricsFrame::new(vec![MetricsData::Processing {
            processor: name.clone(),
            model,
            value: started.elapsed().as_secs_f64(),
        }])));
    }
    gate.downstream(FrameEnum::LLMFullResponseEnd(LLMFullResponseEndFrame::new()));
}

impl<P: LlmProvider> fmt::Debug for LLMService<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LLMService")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("generating", &self.is_generating())
            .finish()
    }
}

impl<P: LlmProvider> fmt::Display for LLMService<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[async_trait]
impl<P: LlmProvider> Processor for LLMService<P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> u64 {
        self.id
    }

    fn weight(&self) -> ProcessorWeight {
        ProcessorWeight::Heavy
    }

    async fn process(&mut self, frame: FrameEnum, direction: FrameDirection, ctx: &ProcessorContext) {
        match frame {
            FrameEnum::Start(start) => {
                self.metrics = MetricsSettings::from_start(&start);
                ctx.send(FrameEnum::Start(start), direction);
            }
            FrameEnum::LLMContext(snapshot) => {
                self.start_generation(snapshot.context, ctx);
            }
            FrameEnum::Interruption(interruption) => {
                self.abort_generation();
                ctx.send(FrameEnum::Interruption(interruption), direction);
            }
            FrameEnum::Cancel(cancel) => {
                self.abort_generation();
                ctx.send(FrameEnum::Cancel(cancel), direction);
            }
            FrameEnum::End(end) => {
                self.wait_for_generation(ctx).await;
                ctx.send(FrameEnum::End(end), direction);
            }
            other => ctx.send(other, direction),
        }
    }

    async fn cleanup(&mut self) {
        self.abort_generation();
    }
}
