// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Processor trait with explicit context passing.
//!
//! This module defines the [`Processor`] trait alongside [`ProcessorContext`],
//! [`ProcessorWeight`] and [`FrameEmitter`].
//!
//! - **Explicit context**: `ProcessorContext` carries channel senders for
//!   downstream/upstream frame delivery.
//! - **Frame enum**: Uses `FrameEnum` for exhaustive pattern matching.
//! - **Gated background output**: work that outlives a `process()` call
//!   (network streams, tool calls) emits through a `FrameEmitter`, which the
//!   pipeline closes on interruption or cancellation.

use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::frames::frame_enum::FrameEnum;
use crate::processors::FrameDirection;

// ---------------------------------------------------------------------------
// ProcessorWeight
// ---------------------------------------------------------------------------

/// Categorizes the computational cost of a processor.
///
/// The pipeline sizes each stage's ordered input lane from it, and races
/// `Heavy` stages' `process()` against urgent frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProcessorWeight {
    /// Pass-through, filters, simple state machines. < 1ms per frame.
    Light,
    /// Aggregators and moderate computation. 1-10ms per frame.
    #[default]
    Standard,
    /// Network-bound services (LLM, TTS, STT).
    Heavy,
}

impl fmt::Display for ProcessorWeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Light => write!(f, "Light"),
            Self::Standard => write!(f, "Standard"),
            Self::Heavy => write!(f, "Heavy"),
        }
    }
}

// ---------------------------------------------------------------------------
// Emitter gate
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct GateState {
    /// Bumped on every interruption.
    epoch: u64,
    /// Set once the stage has seen a cancel.
    cancelled: bool,
}

/// Shared switch deciding whether background output may still be delivered.
#[derive(Debug, Default)]
struct EmitterGate {
    state: Mutex<GateState>,
}

impl EmitterGate {
    fn lock(&self) -> std::sync::MutexGuard<'_, GateState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Cloneable handle for emitting frames from background work.
///
/// An emitter obtained from [`ProcessorContext::emitter`] stops delivering
/// once the stage is interrupted or cancelled; one obtained from
/// [`ProcessorContext::persistent_emitter`] stops only on cancellation.
/// The check and the send happen under one lock, so once the pipeline has
/// closed the gate no later send is delivered.
#[derive(Clone)]
pub struct FrameEmitter {
    downstream_tx: mpsc::UnboundedSender<FrameEnum>,
    upstream_tx: mpsc::UnboundedSender<FrameEnum>,
    gate: Arc<EmitterGate>,
    /// `Some(epoch)` for interruptible emitters.
    epoch: Option<u64>,
}

impl FrameEmitter {
    /// Emit a frame in `direction`. Returns `false` if the gate is closed.
    pub fn send(&self, frame: FrameEnum, direction: FrameDirection) -> bool {
        let state = self.gate.lock();
        if state.cancelled || self.epoch.is_some_and(|epoch| epoch != state.epoch) {
            tracing::trace!(frame = %frame, "FrameEmitter: gate closed, frame dropped");
            return false;
        }
        let tx = match direction {
            FrameDirection::Downstream => &self.downstream_tx,
            FrameDirection::Upstream => &self.upstream_tx,
        };
        tx.send(frame).is_ok()
    }

    pub fn send_downstream(&self, frame: FrameEnum) -> bool {
        self.send(frame, FrameDirection::Downstream)
    }

    pub fn send_upstream(&self, frame: FrameEnum) -> bool {
        self.send(frame, FrameDirection::Upstream)
    }

    /// Returns `true` once nothing sent through this emitter can be delivered.
    pub fn is_closed(&self) -> bool {
        let state = self.gate.lock();
        state.cancelled || self.epoch.is_some_and(|epoch| epoch != state.epoch)
    }
}

impl fmt::Debug for FrameEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameEmitter")
            .field("interruptible", &self.epoch.is_some())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ProcessorContext
// ---------------------------------------------------------------------------

/// Context provided to processors during frame processing.
///
/// Carries the channel senders for downstream/upstream frame delivery,
/// a cancellation token for cooperative shutdown, an interruption token
/// for cooperative interruption, and the emitter gate for background work.
pub struct ProcessorContext {
    /// Unbounded so a stage never blocks on its own output.
    downstream_tx: mpsc::UnboundedSender<FrameEnum>,
    upstream_tx: mpsc::UnboundedSender<FrameEnum>,
    cancel_token: CancellationToken,
    /// Cancelled when an urgent frame arrives while a Heavy stage's
    /// `process()` is running.
    interruption_token: CancellationToken,
    generation_id: u64,
    gate: Arc<EmitterGate>,
}

impl ProcessorContext {
    /// Create a new processor context.
    pub fn new(
        downstream_tx: mpsc::UnboundedSender<FrameEnum>,
        upstream_tx: mpsc::UnboundedSender<FrameEnum>,
        cancel_token: CancellationToken,
        generation_id: u64,
    ) -> Self {
        Self {
            downstream_tx,
            upstream_tx,
            cancel_token,
            interruption_token: CancellationToken::new(),
            generation_id,
            gate: Arc::new(EmitterGate::default()),
        }
    }

    /// Create a context suitable for unit tests.
    #[cfg(test)]
    pub fn for_test(
        downstream_tx: mpsc::UnboundedSender<FrameEnum>,
        upstream_tx: mpsc::UnboundedSender<FrameEnum>,
    ) -> Self {
        Self::new(downstream_tx, upstream_tx, CancellationToken::new(), 1)
    }

    /// Send a frame downstream (input → output direction). Never blocks.
    pub fn send_downstream(&self, frame: FrameEnum) {
        if self.downstream_tx.send(frame).is_err() {
            tracing::warn!("ProcessorContext: downstream receiver dropped, frame lost");
        }
    }

    /// Send a frame upstream (output → input direction). Never blocks.
    pub fn send_upstream(&self, frame: FrameEnum) {
        if self.upstream_tx.send(frame).is_err() {
            tracing::warn!("ProcessorContext: upstream receiver dropped, frame lost");
        }
    }

    /// Send a frame in the specified direction.
    pub fn send(&self, frame: FrameEnum, direction: FrameDirection) {
        match direction {
            FrameDirection::Downstream => self.send_downstream(frame),
            FrameDirection::Upstream => self.send_upstream(frame),
        }
    }

    /// Emitter for background work that an interruption should silence.
    pub fn emitter(&self) -> FrameEmitter {
        let epoch = self.gate.lock().epoch;
        FrameEmitter {
            downstream_tx: self.downstream_tx.clone(),
            upstream_tx: self.upstream_tx.clone(),
            gate: self.gate.clone(),
            epoch: Some(epoch),
        }
    }

    /// Emitter for background work that survives interruptions
    /// (transcription readers, non-cancellable tool calls).
    pub fn persistent_emitter(&self) -> FrameEmitter {
        FrameEmitter {
            downstream_tx: self.downstream_tx.clone(),
            upstream_tx: self.upstream_tx.clone(),
            gate: self.gate.clone(),
            epoch: None,
        }
    }

    /// Close every interruptible emitter handed out so far.
    pub(crate) fn close_interruptible(&self) {
        self.gate.lock().epoch += 1;
    }

    /// Close every emitter, permanently.
    pub(crate) fn close_all(&self) {
        self.gate.lock().cancelled = true;
    }

    /// Check if pipeline shutdown has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// The pipeline-wide cancellation token.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// The interruption token for the current `process()` call.
    ///
    /// Long-running `process()` calls should select on it to break out
    /// early when an interruption or cancel arrives.
    pub fn interruption_token(&self) -> &CancellationToken {
        &self.interruption_token
    }

    pub fn is_interrupted(&self) -> bool {
        self.interruption_token.is_cancelled()
    }

    /// Replace the interruption token before a Heavy `process()` call.
    pub(crate) fn set_interruption_token(&mut self, token: CancellationToken) {
        self.interruption_token = token;
    }

    /// Identifier of the pipeline instance this stage belongs to.
    pub fn generation_id(&self) -> u64 {
        self.generation_id
    }
}

impl fmt::Debug for ProcessorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorContext")
            .field("generation_id", &self.generation_id)
            .field("cancelled", &self.cancel_token.is_cancelled())
            .field("interrupted", &self.interruption_token.is_cancelled())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Processor trait
// ---------------------------------------------------------------------------

/// A pipeline stage.
///
/// `process()` is called for every frame that reaches the stage, in arrival
/// order. A stage forwards what it does not consume by sending it on in the
/// same direction; ordering of frames sent in one direction is preserved.
///
/// # Example
///
/// ```ignore
/// struct UpperCaseProcessor;
///
/// #[async_trait]
/// impl Processor for UpperCaseProcessor {
///     fn name(&self) -> &str { "UpperCase" }
///     fn id(&self) -> u64 { 0 }
///
///     async fn process(&mut self, frame: FrameEnum, dir: FrameDirection, ctx: &ProcessorContext) {
///         match frame {
///             FrameEnum::Text(text) => {
///                 ctx.send_downstream(FrameEnum::text(text.text.to_uppercase()));
///             }
///             other => ctx.send(other, dir),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Processor: Send + Sync + fmt::Debug + fmt::Display {
    /// Human-readable name for logging and debugging.
    fn name(&self) -> &str;

    /// Unique identifier for this processor instance.
    fn id(&self) -> u64;

    /// Computational weight for scheduling decisions.
    fn weight(&self) -> ProcessorWeight {
        ProcessorWeight::Standard
    }

    /// Process a single frame travelling in `direction`.
    async fn process(
        &mut self,
        frame: FrameEnum,
        direction: FrameDirection,
        ctx: &ProcessorContext,
    );

    /// Lifecycle: called once before the first frame.
    async fn setup(&mut self) {}

    /// Lifecycle: called once when the stage stops.
    async fn cleanup(&mut self) {}
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
