// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Text-to-speech pipeline stage.
//!
//! [`TTSService`] collects the model's streamed text into sentences and
//! speaks them one at a time on a worker task. `TTSSpeakFrame`s are spoken
//! as soon as they arrive. For every utterance the worker emits
//!
//! ```text
//! TTSStarted, [BotStartedSpeaking (both directions)], TTSAudioRaw*, TTSStopped
//! ```
//!
//! and `BotStoppedSpeaking` in both directions once nothing is left to say.
//! Text frames are forwarded unchanged so the assistant aggregator still
//! sees them.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::frames::frame_enum::FrameEnum;
use crate::frames::{
    BotStartedSpeakingFrame, BotStoppedSpeakingFrame, ErrorFrame, MetricsFrame, TTSAudioRawFrame,
    TTSStartedFrame, TTSStoppedFrame,
};
use crate::metrics::MetricsData;
use crate::processors::aggregators::sentence::SentenceAggregator;
use crate::processors::processor::{FrameEmitter, Processor, ProcessorContext, ProcessorWeight};
use crate::processors::FrameDirection;
use crate::services::{MetricsSettings, TtsProvider};
use crate::utils::base_object::obj_id;
use crate::utils::helpers::generate_unique_id;

/// Whether the bot is audibly speaking; updated together with the frames
/// that announce it.
#[derive(Debug, Default)]
struct SpeakingState {
    speaking: bool,
}

#[derive(Clone)]
struct SpeechOutput {
    emitter: FrameEmitter,
    state: Arc<Mutex<SpeakingState>>,
}

impl SpeechOutput {
    fn lock(&self) -> std::sync::MutexGuard<'_, SpeakingState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn downstream(&self, frame: FrameEnum) -> bool {
        self.emitter.send_downstream(frame)
    }

    fn start_speaking(&self) {
        let mut state = self.lock();
        if state.speaking {
            return;
        }
        if self
            .emitter
            .send_downstream(FrameEnum::BotStartedSpeaking(BotStartedSpeakingFrame::new()))
        {
            self.emitter
                .send_upstream(FrameEnum::BotStartedSpeaking(BotStartedSpeakingFrame::new()));
            state.speaking = true;
        }
    }

    fn stop_speaking(&self) {
        let mut state = self.lock();
        if !state.speaking {
            return;
        }
        if self
            .emitter
            .send_downstream(FrameEnum::BotStoppedSpeaking(BotStoppedSpeakingFrame::new()))
        {
            self.emitter
                .send_upstream(FrameEnum::BotStoppedSpeaking(BotStoppedSpeakingFrame::new()));
        }
        state.speaking = false;
    }
}

struct Worker {
    queue: mpsc::UnboundedSender<String>,
    output: SpeechOutput,
    handle: JoinHandle<()>,
}

/// Speaks model output through a [`TtsProvider`].
pub struct TTSService<P: TtsProvider> {
    id: u64,
    name: String,
    provider: Arc<P>,
    aggregator: SentenceAggregator,
    /// Nesting depth of LLMFullResponseStart/End.
    response_depth: usize,
    metrics: MetricsSettings,
    worker: Option<Worker>,
}

impl<P: TtsProvider> TTSService<P> {
    pub fn new(provider: P) -> Self {
        let name = format!("TTSService({})", provider.name());
        Self {
            id: obj_id(),
            name,
            provider: Arc::new(provider),
            aggregator: SentenceAggregator::new(),
            response_depth: 0,
            metrics: MetricsSettings::default(),
            worker: None,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Whether the bot is currently speaking.
    pub fn is_speaking(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| w.output.lock().speaking)
    }

    fn speak(&mut self, text: String, ctx: &ProcessorContext) {
        if text.trim().is_empty() {
            return;
        }
        let worker = match self.worker.take() {
            Some(worker) if !worker.handle.is_finished() => worker,
            _ => self.spawn_worker(ctx),
        };
        tracing::debug!(processor = %self.name, text = %text, "queueing utterance");
        if worker.queue.send(text).is_err() {
            tracing::warn!(processor = %self.name, "speech worker stopped, utterance dropped");
        }
        self.worker = Some(worker);
    }

    fn spawn_worker(&self, ctx: &ProcessorContext) -> Worker {
        let (queue, rx) = mpsc::unbounded_channel();
        let output = SpeechOutput {
            emitter: ctx.emitter(),
            state: Arc::new(Mutex::new(SpeakingState::default())),
        };
        let handle = tokio::spawn(run_worker(
            self.provider.clone(),
            rx,
            output.clone(),
            self.name.clone(),
            self.metrics,
        ));
        Worker {
            queue,
            output,
            handle,
        }
    }

    /// Drop queued speech and stop the worker. Reports the bot as stopped
    /// through `ctx` if it was speaking.
    fn stop_worker(&mut self, ctx: &ProcessorContext) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.handle.abort();
        let mut state = worker.output.lock();
        if std::mem::take(&mut state.speaking) {
            ctx.send_downstream(FrameEnum::BotStoppedSpeaking(BotStoppedSpeakingFrame::new()));
            ctx.send_upstream(FrameEnum::BotStoppedSpeaking(BotStoppedSpeakingFrame::new()));
        }
    }

    fn abort_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.handle.abort();
        }
    }

    /// Let queued speech finish; gives up if an urgent frame arrives.
    async fn drain_worker(&mut self, ctx: &ProcessorContext) {
        let Some(Worker { queue, output, mut handle }) = self.worker.take() else {
            return;
        };
        drop(queue);
        tokio::select! {
            _ = &mut handle => {}
            _ = ctx.interruption_token().cancelled() => {
                let (queue, _) = mpsc::unbounded_channel();
                self.worker = Some(Worker { queue, output, handle });
            }
        }
    }
}

async fn run_worker<P: TtsProvider>(
    provider: Arc<P>,
    mut rx: mpsc::UnboundedReceiver<String>,
    output: SpeechOutput,
    name: String,
    metrics: MetricsSettings,
) {
    let mut next = rx.recv().await;
    while let Some(text) = next.take() {
        speak_utterance(provider.as_ref(), &text, &output, &name, metrics).await;
        match rx.try_recv() {
            Ok(text) => next = Some(text),
            Err(_) => {
                output.stop_speaking();
                next = rx.recv().await;
            }
        }
    }
    output.stop_speaking();
}

async fn speak_utterance<P: TtsProvider>(
    provider: &P,
    text: &str,
    output: &SpeechOutput,
    name: &str,
    metrics: MetricsSettings,
) {
    let context_id = generate_unique_id("tts");
    let sample_rate = provider.sample_rate();
    let model = provider.model().map(str::to_string);
    let started = Instant::now();

    let mut audio = match provider.synthesize(text).await {
        Ok(audio) => audio,
        Err(e) => {
            tracing::error!(processor = %name, error = %e, "speech synthesis failed");
            output.emitter.send_upstream(FrameEnum::Error(ErrorFrame::non_fatal(format!("{name}: {e}"))));
            return;
        }
    };

    if !output.downstream(FrameEnum::TTSStarted(TTSStartedFrame::new(Some(context_id.clone())))) {
        return;
    }
    let mut first_chunk = true;
    while let Some(chunk) = audio.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::error!(processor = %name, error = %e, "speech stream failed");
                output.emitter.send_upstream(FrameEnum::Error(ErrorFrame::non_fatal(format!("{name}: {e}"))));
                break;
            }
        };
        if chunk.is_empty() {
            continue;
        }
        if first_chunk {
            first_chunk = false;
            if metrics.ttfb {
                output.downstream(FrameEnum::Metrics(MetricsFrame::new(vec![MetricsData::Ttfb {
                    processor: name.to_string(),
                    model: model.clone(),
                    value: started.elapsed().as_secs_f64(),
                }])));
            }
            output.start_speaking();
        }
        let mut frame = TTSAudioRawFrame::new(chunk, sample_rate, 1);
        frame.context_id = Some(context_id.clone());
        if !output.downstream(FrameEnum::TTSAudioRaw(frame)) {
            return;
        }
    }
    output.downstream(FrameEnum::TTSStopped(TTSStoppedFrame::new(Some(context_id))));
    if metrics.usage {
        output.downstream(FrameEnum::Metrics(MetricsFrame::new(vec![MetricsData::TtsUsage {
            processor: name.to_string(),
            model,
            value: text.chars().count() as u64,
        }])));
    }
}

impl<P: TtsProvider> fmt::Debug for TTSService<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TTSService")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("buffered", &self.aggregator.buffered())
            .finish()
    }
}

impl<P: TtsProvider> fmt::Display for TTSService<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[async_trait]
impl<P: TtsProvider> Processor for TTSService<P> {
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
            FrameEnum::LLMFullResponseStart(start) if direction == FrameDirection::Downstream => {
                self.response_depth += 1;
                ctx.send_downstream(FrameEnum::LLMFullResponseStart(start));
            }
            FrameEnum::LLMText(text) if direction == FrameDirection::Downstream => {
                let sentences = self.aggregator.push(&text.text);
                ctx.send_downstream(FrameEnum::LLMText(text));
                for sentence in sentences {
                    self.speak(sentence, ctx);
                }
            }
            FrameEnum::LLMFullResponseEnd(end) if direction == FrameDirection::Downstream => {
                self.response_depth = self.response_depth.saturating_sub(1);
                if self.response_depth == 0 {
                    if let Some(rest) = self.aggregator.flush() {
                        self.speak(rest, ctx);
                    }
                }
                ctx.send_downstream(FrameEnum::LLMFullResponseEnd(end));
            }
            FrameEnum::TTSSpeak(speak) if direction == FrameDirection::Downstream => {
                self.speak(speak.text, ctx);
            }
            FrameEnum::Interruption(interruption) => {
                self.aggregator.clear();
                self.response_depth = 0;
                ctx.send(FrameEnum::Interruption(interruption), direction);
                self.stop_worker(ctx);
            }
            FrameEnum::Cancel(cancel) => {
                self.abort_worker();
                ctx.send(FrameEnum::Cancel(cancel), direction);
            }
            FrameEnum::End(end) => {
                if let Some(rest) = self.aggregator.flush() {
                    self.speak(rest, ctx);
                }
                self.drain_worker(ctx).await;
                ctx.send(FrameEnum::End(end), direction);
            }
            other => ctx.send(other, direction),
        }
    }

    async fn cleanup(&mut self) {
        self.abort_worker();
    }
}
