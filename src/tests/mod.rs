// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Testing utilities for pipeline stages.
//!
//! Provides [`run_test()`] to send frames through a pipeline and assert the
//! frames that come out in each direction, plus scripted providers that stand
//! in for the network services.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;

use crate::error::{PipelineError, ProviderError};
use crate::frames::frame_enum::FrameEnum;
use crate::impl_processor_display;
use crate::observers::Observer;
use crate::pipeline::{PipelineParams, PipelineTask, TaskState};
use crate::processors::aggregators::llm_context::LLMContext;
use crate::processors::processor::{Processor, ProcessorContext, ProcessorWeight};
use crate::processors::FrameDirection;
use crate::services::{
    AudioStream, LlmChunk, LlmProvider, LlmStream, SttConfig, SttEvent, SttEventStream,
    SttProvider, SttSession, TtsProvider,
};
use crate::utils::base_object::obj_id;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// One step of a test script.
#[derive(Debug)]
pub enum TestStep {
    /// Queue a frame on the task.
    Frame(FrameEnum),
    /// Wait before queueing the next frame.
    Sleep(Duration),
}

impl From<FrameEnum> for TestStep {
    fn from(frame: FrameEnum) -> Self {
        TestStep::Frame(frame)
    }
}

/// A stage that records every frame travelling in one direction.
pub struct QueuedFrameProcessor {
    id: u64,
    name: String,
    queue_direction: FrameDirection,
    ignore_start: bool,
    captured: Arc<Mutex<Vec<FrameEnum>>>,
}

impl QueuedFrameProcessor {
    pub fn new(
        queue_direction: FrameDirection,
        ignore_start: bool,
        captured: Arc<Mutex<Vec<FrameEnum>>>,
    ) -> Self {
        let name = match queue_direction {
            FrameDirection::Downstream => "QueuedSink",
            FrameDirection::Upstream => "QueuedSource",
        };
        Self {
            id: obj_id(),
            name: name.to_string(),
            queue_direction,
            ignore_start,
            captured,
        }
    }
}

impl_processor_display!(QueuedFrameProcessor);

#[async_trait]
impl Processor for QueuedFrameProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> u64 {
        self.id
    }

    fn weight(&self) -> ProcessorWeight {
        ProcessorWeight::Light
    }

    async fn process(&mut self, frame: FrameEnum, direction: FrameDirection, ctx: &ProcessorContext) {
        if direction == self.queue_direction {
            let is_start = matches!(frame, FrameEnum::Start(_));
            if !is_start || !self.ignore_start {
                lock(&self.captured).push(frame.clone());
            }
        }
        ctx.send(frame, direction);
    }
}

/// Result of running a test pipeline.
#[derive(Debug)]
pub struct TestResult {
    /// How the task ended.
    pub state: TaskState,
    /// Frames captured flowing downstream.
    pub downstream_frames: Vec<FrameEnum>,
    /// Frames captured flowing upstream.
    pub upstream_frames: Vec<FrameEnum>,
}

impl TestResult {
    pub fn downstream_names(&self) -> Vec<&'static str> {
        self.downstream_frames.iter().map(|f| f.name()).collect()
    }

    pub fn upstream_names(&self) -> Vec<&'static str> {
        self.upstream_frames.iter().map(|f| f.name()).collect()
    }
}

/// How long to let background work settle before cancelling a task that
/// was not sent an `EndFrame`.
const SETTLE: Duration = Duration::from_millis(200);

/// Run `processors` between a capturing source and sink and validate the
/// frames that reach each end.
///
/// The pipeline is `[source] -> processors... -> [sink]`. The source records
/// upstream frames and the sink downstream frames, both ignoring the
/// `StartFrame`. With `send_end_frame` the task finishes by draining an
/// `EndFrame`; otherwise it is cancelled once the script has run. Terminal
/// `EndFrame`/`CancelFrame`s are filtered from the results.
pub async fn run_test(
    processors: Vec<Box<dyn Processor>>,
    steps: Vec<TestStep>,
    expected_down_frames: Option<&[&str]>,
    expected_up_frames: Option<&[&str]>,
    send_end_frame: bool,
    observers: Vec<Arc<dyn Observer>>,
    pipeline_params: Option<PipelineParams>,
) -> Result<TestResult, PipelineError> {
    let params = pipeline_params.unwrap_or_default();

    let received_up: Arc<Mutex<Vec<FrameEnum>>> = Arc::default();
    let received_down: Arc<Mutex<Vec<FrameEnum>>> = Arc::default();

    let mut chain: Vec<Box<dyn Processor>> = Vec::with_capacity(processors.len() + 2);
    chain.push(Box::new(QueuedFrameProcessor::new(
        FrameDirection::Upstream,
        true,
        received_up.clone(),
    )));
    chain.extend(processors);
    chain.push(Box::new(QueuedFrameProcessor::new(
        FrameDirection::Downstream,
        true,
        received_down.clone(),
    )));

    let task = PipelineTask::new(chain, params, observers)?;
    let handle = task.handle();

    let push_frames = async move {
        for step in steps {
            match step {
                TestStep::Frame(frame) => handle.queue_frame(frame),
                TestStep::Sleep(duration) => tokio::time::sleep(duration).await,
            }
        }
        if send_end_frame {
            handle.stop_when_done();
        } else {
            tokio::time::sleep(SETTLE).await;
            handle.cancel(None);
        }
    };

    let (state, ()) = tokio::join!(task.run(), push_frames);

    let terminal = |f: &FrameEnum| matches!(f, FrameEnum::End(_) | FrameEnum::Cancel(_));
    let down_frames: Vec<FrameEnum> = lock(&received_down)
        .iter()
        .filter(|f| !terminal(f))
        .cloned()
        .collect();
    let up_frames: Vec<FrameEnum> = lock(&received_up)
        .iter()
        .filter(|f| !terminal(f))
        .cloned()
        .collect();

    let result = TestResult {
        state,
        downstream_frames: down_frames,
        upstream_frames: up_frames,
    };

    if let Some(expected) = expected_down_frames {
        let received_names = result.downstream_names();
        println!("received DOWN frames = {received_names:?}");
        println!("expected DOWN frames = {expected:?}");
        assert_eq!(received_names, expected, "downstream frames did not match");
    }

    if let Some(expected) = expected_up_frames {
        let received_names = result.upstream_names();
        println!("received UP frames = {received_names:?}");
        println!("expected UP frames = {expected:?}");
        assert_eq!(received_names, expected, "upstream frames did not match");
    }

    Ok(result)
}

// ---------------------------------------------------------------------------
// Scripted language model
// ---------------------------------------------------------------------------

/// An [`LlmProvider`] that replays scripted replies.
///
/// Request `i` gets reply `min(i, replies.len() - 1)`. Clones share the
/// request log.
#[derive(Debug, Clone)]
pub struct MockLlmProvider {
    replies: Arc<Vec<Vec<LlmChunk>>>,
    failure: Option<String>,
    chunk_delay: Option<Duration>,
    requests: Arc<Mutex<Vec<LLMContext>>>,
}

impl MockLlmProvider {
    pub fn new(replies: Vec<Vec<LlmChunk>>) -> Self {
        Self {
            replies: Arc::new(replies),
            failure: None,
            chunk_delay: None,
            requests: Arc::default(),
        }
    }

    /// The same text reply, one chunk per piece, for every request.
    pub fn with_reply(pieces: &[&str]) -> Self {
        Self::new(vec![pieces
            .iter()
            .map(|p| LlmChunk::Text(p.to_string()))
            .collect()])
    }

    /// Every request fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::new(Vec::new())
        }
    }

    /// Sleep before yielding each chunk.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Every context the provider was asked to answer, oldest first.
    pub fn requests(&self) -> Vec<LLMContext> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    fn name(&self) -> &str {
        "mock-llm"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn stream(&self, context: &LLMContext) -> Result<LlmStream, ProviderError> {
        let index = {
            let mut requests = lock(&self.requests);
            requests.push(context.clone());
            requests.len() - 1
        };
        if let Some(message) = &self.failure {
            return Err(ProviderError::Status {
                status: 500,
                body: message.clone(),
            });
        }
        let reply = match self.replies.len() {
            0 => Vec::new(),
            n => self.replies[index.min(n - 1)].clone(),
        };
        let delay = self.chunk_delay;
        Ok(stream::iter(reply)
            .then(move |chunk| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(chunk)
            })
            .boxed())
    }
}

// ---------------------------------------------------------------------------
// Scripted speech synthesis
// ---------------------------------------------------------------------------

/// Size of each audio chunk returned by [`MockTtsProvider`]: 20 ms at 24 kHz.
pub const MOCK_TTS_CHUNK_BYTES: usize = 960;

/// A [`TtsProvider`] that returns two chunks of silence per utterance.
#[derive(Debug, Clone, Default)]
pub struct MockTtsProvider {
    failure: Option<String>,
    chunk_delay: Option<Duration>,
    spoken: Arc<Mutex<Vec<String>>>,
}

impl MockTtsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every synthesis fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Texts synthesized so far, in order.
    pub fn spoken(&self) -> Vec<String> {
        lock(&self.spoken).clone()
    }
}

#[async_trait]
impl TtsProvider for MockTtsProvider {
    fn name(&self) -> &str {
        "mock-tts"
    }

    fn sample_rate(&self) -> u32 {
        24000
    }

    async fn synthesize(&self, text: &str) -> Result<AudioStream, ProviderError> {
        if let Some(message) = &self.failure {
            return Err(ProviderError::Status {
                status: 400,
                body: message.clone(),
            });
        }
        lock(&self.spoken).push(text.to_string());
        let delay = self.chunk_delay;
        let chunks = vec![vec![0u8; MOCK_TTS_CHUNK_BYTES]; 2];
        Ok(stream::iter(chunks)
            .then(move |chunk| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(chunk)
            })
            .boxed())
    }
}

// ---------------------------------------------------------------------------
// Scripted speech recognition
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SttMockState {
    last_config: Option<SttConfig>,
    audio_bytes: usize,
    finished: bool,
}

/// An [`SttProvider`] that releases its scripted events as soon as the
/// first audio arrives.
#[derive(Debug, Clone, Default)]
pub struct MockSttProvider {
    script: Vec<SttEvent>,
    failure: Option<String>,
    state: Arc<Mutex<SttMockState>>,
}

impl MockSttProvider {
    pub fn new(script: Vec<SttEvent>) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }

    /// Connecting fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    /// Config of the most recent session.
    pub fn last_config(&self) -> Option<SttConfig> {
        lock(&self.state).last_config.clone()
    }

    /// Total audio bytes received over all sessions.
    pub fn audio_bytes(&self) -> usize {
        lock(&self.state).audio_bytes
    }

    /// Whether a session was finished by its sender.
    pub fn finished(&self) -> bool {
        lock(&self.state).finished
    }
}

type EventSender = mpsc::UnboundedSender<Result<SttEvent, ProviderError>>;

struct MockSttSession {
    events: Option<EventSender>,
    script: Option<Vec<SttEvent>>,
    state: Arc<Mutex<SttMockState>>,
}

#[async_trait]
impl SttSession for MockSttSession {
    async fn send_audio(&mut self, audio: &[u8]) -> Result<(), ProviderError> {
        lock(&self.state).audio_bytes += audio.len();
        if let (Some(script), Some(events)) = (self.script.take(), &self.events) {
            for event in script {
                let _ = events.send(Ok(event));
            }
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), ProviderError> {
        lock(&self.state).finished = true;
        self.events = None;
        Ok(())
    }
}

#[async_trait]
impl SttProvider for MockSttProvider {
    fn name(&self) -> &str {
        "mock-stt"
    }

    async fn connect(
        &self,
        config: &SttConfig,
    ) -> Result<(Box<dyn SttSession>, SttEventStream), ProviderError> {
        if let Some(message) = &self.failure {
            return Err(ProviderError::Status {
                status: 401,
                body: message.clone(),
            });
        }
        lock(&self.state).last_config = Some(config.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        let session = MockSttSession {
            events: Some(tx),
            script: Some(self.script.clone()),
            state: self.state.clone(),
        };
        let events = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed();
        Ok((Box::new(session), events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::TextFrame;

    struct Echo {
        id: u64,
        name: String,
    }

    impl Echo {
        fn boxed() -> Box<dyn Processor> {
            Box::new(Echo {
                id: obj_id(),
                name: "Echo".into(),
            })
        }
    }

    impl_processor_display!(Echo);

    #[async_trait]
    impl Processor for Echo {
        fn name(&self) -> &str {
            &self.name
        }

        fn id(&self) -> u64 {
            self.id
        }

        async fn process(&mut self, frame: FrameEnum, direction: FrameDirection, ctx: &ProcessorContext) {
            if let FrameEnum::Text(text) = &frame {
                ctx.send_upstream(FrameEnum::Text(TextFrame::new(text.text.clone())));
            }
            ctx.send(frame, direction);
        }
    }

    #[tokio::test]
    async fn test_run_test_captures_both_directions() {
        let result = run_test(
            vec![Echo::boxed()],
            vec![FrameEnum::Text(TextFrame::new("hi")).into()],
            Some(&["TextFrame"]),
            Some(&["TextFrame"]),
            true,
            vec![],
            None,
        )
        .await
        .unwrap();
        assert_eq!(result.state, TaskState::Completed);
    }

    #[tokio::test]
    async fn test_run_test_without_end_cancels() {
        let result = run_test(
            vec![Echo::boxed()],
            vec![
                TestStep::Sleep(Duration::from_millis(10)),
                FrameEnum::Text(TextFrame::new("hi")).into(),
            ],
            Some(&["TextFrame"]),
            None,
            false,
            vec![],
            None,
        )
        .await
        .unwrap();
        assert_eq!(result.state, TaskState::Cancelled);
    }

    #[tokio::test]
    async fn test_mock_llm_cycles_replies() {
        let provider = MockLlmProvider::new(vec![
            vec![LlmChunk::Text("first".into())],
            vec![LlmChunk::Text("second".into())],
        ]);
        let context = LLMContext::default();
        let mut replies = Vec::new();
        for _ in 0..3 {
            let chunks: Vec<_> = provider.stream(&context).await.unwrap().collect().await;
            replies.push(chunks);
        }
        assert_eq!(replies[0][0].as_ref().unwrap(), &LlmChunk::Text("first".into()));
        assert_eq!(replies[2][0].as_ref().unwrap(), &LlmChunk::Text("second".into()));
        assert_eq!(provider.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_mock_stt_releases_script_on_audio() {
        let provider = MockSttProvider::new(vec![SttEvent::Final {
            text: "hello".into(),
            language: None,
        }]);
        let (mut session, mut events) = provider.connect(&SttConfig::default()).await.unwrap();
        session.send_audio(&[0; 4]).await.unwrap();
        session.finish().await.unwrap();
        let received: Vec<_> = events.collect().await;
        assert_eq!(received.len(), 1);
        assert!(provider.finished());
        assert_eq!(provider.audio_bytes(), 4);
    }
}
