// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Pipeline task: one pipeline, one frame queue, one run/cancel lifecycle.
//!
//! A [`PipelineTask`] sends a `StartFrame` built from its [`PipelineParams`],
//! then feeds queued frames into the head of its [`ChannelPipeline`] while
//! watching both ends:
//!
//! - an `EndFrame` leaving the downstream end completes the task;
//! - a fatal `ErrorFrame` reaching the upstream end makes the task cancel
//!   itself;
//! - [`PipelineTaskHandle::cancel`] injects a `CancelFrame` at both ends and
//!   the task ends once both have left the chain.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::frames::frame_enum::FrameEnum;
use crate::frames::{EndFrame, StartFrame};
use crate::observers::Observer;
use crate::pipeline::channel::ChannelPipeline;
use crate::processors::processor::Processor;
use crate::processors::FrameDirection;
use crate::utils::base_object::obj_id;

/// Upper bound on how long a cancel may take to cross the chain.
const CANCEL_TIMEOUT: Duration = Duration::from_secs(5);

/// Parameters for pipeline task execution.
#[derive(Debug, Clone)]
pub struct PipelineParams {
    pub allow_interruptions: bool,
    pub enable_metrics: bool,
    pub enable_usage_metrics: bool,
    pub audio_in_sample_rate: u32,
    pub audio_out_sample_rate: u32,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            allow_interruptions: false,
            enable_metrics: false,
            enable_usage_metrics: false,
            audio_in_sample_rate: 16000,
            audio_out_sample_rate: 24000,
        }
    }
}

impl PipelineParams {
    fn start_frame(&self) -> StartFrame {
        StartFrame::new(
            self.audio_in_sample_rate,
            self.audio_out_sample_rate,
            self.allow_interruptions,
            self.enable_metrics,
            self.enable_usage_metrics,
        )
    }
}

/// How a task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// An `EndFrame` made it through the whole chain.
    Completed,
    /// The task was cancelled, explicitly or after a fatal error.
    Cancelled,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Completed => write!(f, "Completed"),
            TaskState::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Shared cancel request.
#[derive(Debug, Default)]
struct CancelRequest {
    token: CancellationToken,
    reason: Mutex<Option<String>>,
}

impl CancelRequest {
    fn request(&self, reason: Option<String>) {
        let mut slot = self.reason.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_none() {
            *slot = reason;
        }
        drop(slot);
        self.token.cancel();
    }

    fn reason(&self) -> Option<String> {
        self.reason
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

/// Cloneable, non-blocking handle for feeding and cancelling a task.
///
/// Handles can be moved into event hooks and background tasks; every call
/// returns immediately.
#[derive(Clone)]
pub struct PipelineTaskHandle {
    name: Arc<str>,
    queue_tx: mpsc::UnboundedSender<FrameEnum>,
    cancel: Arc<CancelRequest>,
}

impl PipelineTaskHandle {
    /// Append a frame to the task's queue.
    pub fn queue_frame(&self, frame: impl Into<FrameEnum>) {
        let frame = frame.into();
        if self.queue_tx.send(frame).is_err() {
            tracing::debug!(task = %self.name, "PipelineTask: queue closed, frame dropped");
        }
    }

    /// Append frames to the task's queue, in order.
    pub fn queue_frames<I>(&self, frames: I)
    where
        I: IntoIterator<Item = FrameEnum>,
    {
        for frame in frames {
            self.queue_frame(frame);
        }
    }

    /// Queue an `EndFrame`; the task completes once it has gone through.
    pub fn stop_when_done(&self) {
        tracing::debug!(task = %self.name, "PipelineTask: stop when done");
        self.queue_frame(FrameEnum::End(EndFrame::new()));
    }

    /// Cancel the task. Frames still in the queue are discarded.
    pub fn cancel(&self, reason: Option<String>) {
        tracing::debug!(task = %self.name, reason = ?reason, "PipelineTask: cancel requested");
        self.cancel.request(reason);
    }

    /// Whether `cancel()` has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.token.is_cancelled()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for PipelineTaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineTaskHandle")
            .field("name", &self.name)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Owns one pipeline and drives it from start to a terminal [`TaskState`].
pub struct PipelineTask {
    name: Arc<str>,
    pipeline: ChannelPipeline,
    params: PipelineParams,
    queue_tx: mpsc::UnboundedSender<FrameEnum>,
    queue_rx: mpsc::UnboundedReceiver<FrameEnum>,
    cancel: Arc<CancelRequest>,
}

impl PipelineTask {
    /// Build the pipeline. Fails if `processors` is empty.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        processors: Vec<Box<dyn Processor>>,
        params: PipelineParams,
        observers: Vec<Arc<dyn Observer>>,
    ) -> Result<Self, PipelineError> {
        let pipeline = ChannelPipeline::new(processors, observers)?;
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Ok(Self {
            name: format!("PipelineTask#{}", obj_id()).into(),
            pipeline,
            params,
            queue_tx,
            queue_rx,
            cancel: Arc::new(CancelRequest::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &PipelineParams {
        &self.params
    }

    /// A new handle for queueing frames and cancelling.
    pub fn handle(&self) -> PipelineTaskHandle {
        PipelineTaskHandle {
            name: self.name.clone(),
            queue_tx: self.queue_tx.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Run the task until it completes or is cancelled.
    pub async fn run(mut self) -> TaskState {
        let (Some(mut output), Some(mut upstream)) =
            (self.pipeline.take_output(), self.pipeline.take_upstream())
        else {
            tracing::error!(task = %self.name, "PipelineTask: pipeline ends already taken");
            self.pipeline.shutdown().await;
            return TaskState::Cancelled;
        };

        tracing::debug!(
            task = %self.name,
            stages = ?self.pipeline.stage_names(),
            "PipelineTask: starting"
        );
        self.pipeline
            .send(FrameEnum::Start(self.params.start_frame()))
            .await;

        let cancel_token = self.cancel.token.clone();
        let mut cancelling = false;
        let mut cancel_down_seen = false;
        let mut cancel_up_seen = false;
        let cancel_deadline = tokio::time::sleep(Duration::MAX);
        tokio::pin!(cancel_deadline);

        let state = loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled(), if !cancelling => {
                    cancelling = true;
                    let reason = self.cancel.reason();
                    tracing::info!(task = %self.name, reason = ?reason, "PipelineTask: cancelling");
                    self.pipeline
                        .inject(FrameEnum::cancel(reason.clone()), FrameDirection::Downstream)
                        .await;
                    self.pipeline
                        .inject(FrameEnum::cancel(reason), FrameDirection::Upstream)
                        .await;
                    cancel_deadline
                        .as_mut()
                        .reset(tokio::time::Instant::now() + CANCEL_TIMEOUT);
                }

                _ = &mut cancel_deadline, if cancelling => {
                    tracing::warn!(
                        task = %self.name,
                        "PipelineTask: cancel did not cross the pipeline in time"
                    );
                    break TaskState::Cancelled;
                }

                Some(directed) = upstream.recv() => match directed.frame {
                    FrameEnum::Cancel(_) => {
                        cancel_up_seen = true;
                        if cancel_down_seen {
                            break TaskState::Cancelled;
                        }
                    }
                    FrameEnum::Error(error) if error.fatal => {
                        tracing::error!(task = %self.name, error = %error.error, "PipelineTask: fatal error");
                        self.cancel.request(Some(error.error));
                    }
                    FrameEnum::Error(error) => {
                        tracing::warn!(task = %self.name, error = %error.error, "PipelineTask: error");
                    }
                    other => {
                        tracing::trace!(task = %self.name, frame = %other, "PipelineTask: upstream frame reached the head");
                    }
                },

                Some(directed) = output.recv() => match directed.frame {
                    FrameEnum::End(_) if !cancelling => {
                        break TaskState::Completed;
                    }
                    FrameEnum::Cancel(_) => {
                        cancel_down_seen = true;
                        if cancel_up_seen {
                            break TaskState::Cancelled;
                        }
                    }
                    other => {
                        tracing::trace!(task = %self.name, frame = %other, "PipelineTask: frame reached the tail");
                    }
                },

                Some(frame) = self.queue_rx.recv(), if !cancelling => {
                    self.pipeline.send(frame).await;
                }
            }
        };

        self.pipeline.shutdown().await;
        tracing::info!(task = %self.name, state = %state, "PipelineTask: finished");
        state
    }
}

impl fmt::Display for PipelineTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl fmt::Debug for PipelineTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineTask")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}
