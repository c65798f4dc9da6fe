// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Channel-based pipeline where each processor runs on its own tokio task.
//!
//! - **Two lanes per link**: `InterruptionFrame` and `CancelFrame` travel on an
//!   unbounded urgent lane that is always checked first. Every other frame
//!   travels on the ordered lane and keeps strict FIFO order per direction.
//! - **Bounded downstream lanes**: sized by processor weight (Light=32,
//!   Standard=64, Heavy=128). Upstream lanes are unbounded so two neighbours
//!   can never block on each other.
//! - **Interruption flush**: when a stage handles an interruption it drops the
//!   interruptible frames its neighbour queued *before* the interruption
//!   (tracked by a per-sender sequence number) and closes its interruptible
//!   emitters.
//! - **Cancel relay**: after a stage has seen a cancel it only relays the
//!   cancel travelling the other way, then stops once it has seen both.
//! - **Panic isolation**: a panicking stage reports a fatal `ErrorFrame`
//!   upstream and from then on only relays cancels.
//! - **JoinSet lifecycle**: all stage tasks are tracked for clean shutdown.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::frames::frame_enum::FrameEnum;
use crate::frames::ErrorFrame;
use crate::observers::{FrameProcessed, FramePushed, Observer};
use crate::processors::processor::{Processor, ProcessorContext, ProcessorWeight};
use crate::processors::FrameDirection;

// ---------------------------------------------------------------------------
// Priority channel
// ---------------------------------------------------------------------------

/// Capacity of a stage's downstream ordered lane, by processor weight.
fn data_channel_capacity(weight: ProcessorWeight) -> usize {
    match weight {
        ProcessorWeight::Light => 32,
        ProcessorWeight::Standard => 64,
        ProcessorWeight::Heavy => 128,
    }
}

/// Whether an interruption leaves `frame` alone.
fn survives_interruption(frame: &FrameEnum) -> bool {
    frame.is_system_frame() || frame.is_uninterruptible()
}

/// A frame tagged with its flow direction.
#[derive(Debug)]
pub struct DirectedFrame {
    pub frame: FrameEnum,
    pub direction: FrameDirection,
    /// Position in the sender's output order, across both lanes.
    seq: u64,
}

#[derive(Clone)]
enum OrderedSender {
    Bounded(mpsc::Sender<DirectedFrame>),
    Unbounded(mpsc::UnboundedSender<DirectedFrame>),
}

enum OrderedReceiver {
    Bounded(mpsc::Receiver<DirectedFrame>),
    Unbounded(mpsc::UnboundedReceiver<DirectedFrame>),
}

impl OrderedReceiver {
    async fn recv(&mut self) -> Option<DirectedFrame> {
        match self {
            OrderedReceiver::Bounded(rx) => rx.recv().await,
            OrderedReceiver::Unbounded(rx) => rx.recv().await,
        }
    }

    fn try_recv(&mut self) -> Option<DirectedFrame> {
        match self {
            OrderedReceiver::Bounded(rx) => rx.try_recv().ok(),
            OrderedReceiver::Unbounded(rx) => rx.try_recv().ok(),
        }
    }
}

/// Sender half of a lane pair.
#[derive(Clone)]
pub struct PrioritySender {
    urgent_tx: mpsc::UnboundedSender<DirectedFrame>,
    ordered_tx: OrderedSender,
    seq: Arc<AtomicU64>,
}

impl PrioritySender {
    /// Send a frame, routing urgent frames to the urgent lane.
    ///
    /// Waits for room when the ordered lane is bounded and full.
    pub async fn send(&self, frame: FrameEnum, direction: FrameDirection) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let directed = DirectedFrame {
            frame,
            direction,
            seq,
        };
        if directed.frame.is_urgent() {
            if self.urgent_tx.send(directed).is_err() {
                tracing::warn!("PrioritySender: urgent receiver dropped, frame lost");
            }
            return;
        }
        let delivered = match &self.ordered_tx {
            OrderedSender::Bounded(tx) => tx.send(directed).await.is_ok(),
            OrderedSender::Unbounded(tx) => tx.send(directed).is_ok(),
        };
        if !delivered {
            tracing::warn!("PrioritySender: ordered receiver dropped, frame lost");
        }
    }
}

/// Receiver half of a lane pair.
pub struct PriorityReceiver {
    urgent_rx: mpsc::UnboundedReceiver<DirectedFrame>,
    ordered_rx: OrderedReceiver,
}

impl PriorityReceiver {
    /// Receive the next frame, preferring the urgent lane.
    pub async fn recv(&mut self) -> Option<DirectedFrame> {
        tokio::select! {
            biased;
            Some(frame) = self.urgent_rx.recv() => Some(frame),
            Some(frame) = self.ordered_rx.recv() => Some(frame),
            else => None,
        }
    }

    /// Receive the next frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<DirectedFrame> {
        self.urgent_rx
            .try_recv()
            .ok()
            .or_else(|| self.ordered_rx.try_recv())
    }

    /// Drop interruptible frames queued before the frame numbered `seq`.
    ///
    /// Returns the frames to keep, in order, and the discarded count.
    /// Draining stops at the first frame sent after `seq`, which is kept.
    fn drain_stale(&mut self, seq: u64) -> (Vec<DirectedFrame>, usize) {
        let mut kept = Vec::new();
        let mut discarded = 0usize;
        while let Some(directed) = self.ordered_rx.try_recv() {
            if directed.seq > seq {
                kept.push(directed);
                break;
            }
            if survives_interruption(&directed.frame) {
                kept.push(directed);
            } else {
                discarded += 1;
            }
        }
        (kept, discarded)
    }
}

/// Create a lane pair. `None` makes the ordered lane unbounded.
fn priority_channel(capacity: Option<usize>) -> (PrioritySender, PriorityReceiver) {
    let (urgent_tx, urgent_rx) = mpsc::unbounded_channel();
    let (ordered_tx, ordered_rx) = match capacity {
        Some(cap) => {
            let (tx, rx) = mpsc::channel(cap);
            (OrderedSender::Bounded(tx), OrderedReceiver::Bounded(rx))
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (OrderedSender::Unbounded(tx), OrderedReceiver::Unbounded(rx))
        }
    };
    (
        PrioritySender {
            urgent_tx,
            ordered_tx,
            seq: Arc::new(AtomicU64::new(0)),
        },
        PriorityReceiver {
            urgent_rx,
            ordered_rx,
        },
    )
}

// ---------------------------------------------------------------------------
// ChannelPipeline
// ---------------------------------------------------------------------------

/// Generation counter, one value per pipeline instance.
static GENERATION: AtomicU64 = AtomicU64::new(1);

/// A channel-based pipeline where each processor runs on its own tokio task.
///
/// ```text
///          inject(Downstream)                              take_output()
///                 |                                              ^
///                 v                                              |
///            [Stage 0] ---> [Stage 1] ---> ... ---> [Stage N-1] -+
///            |   ^              ^                        ^
///            v   +--------------+-------- ... -----------+-- inject(Upstream)
///     take_upstream()
/// ```
pub struct ChannelPipeline {
    /// Frames sent here enter the first stage travelling downstream.
    head_tx: PrioritySender,
    /// Frames sent here enter the last stage travelling upstream.
    tail_tx: PrioritySender,
    /// Frames leaving the last stage downstream.
    output_rx: Option<PriorityReceiver>,
    /// Frames leaving the first stage upstream.
    upstream_rx: Option<PriorityReceiver>,
    join_set: JoinSet<()>,
    cancel_token: CancellationToken,
    generation_id: u64,
    stage_names: Vec<String>,
}

impl ChannelPipeline {
    /// Build and start a pipeline from an ordered list of stages.
    ///
    /// Each stage is spawned on its own tokio task, so this must be called
    /// from within a tokio runtime. Fails if the list is empty.
    pub fn new(
        processors: Vec<Box<dyn Processor>>,
        observers: Vec<Arc<dyn Observer>>,
    ) -> Result<Self, PipelineError> {
        let n = processors.len();
        if n == 0 {
            return Err(PipelineError::Configuration(
                "a pipeline needs at least one stage".to_string(),
            ));
        }

        let cancel_token = CancellationToken::new();
        let generation_id = GENERATION.fetch_add(1, Ordering::Relaxed);
        let observers: Arc<[Arc<dyn Observer>]> = observers.into();
        let clock = Instant::now();
        let mut join_set = JoinSet::new();

        let meta: Vec<(u64, String)> = processors
            .iter()
            .map(|p| (p.id(), p.name().to_string()))
            .collect();

        // N+1 downstream lanes: head -> stage 0 -> ... -> stage N-1 -> output.
        // The output lane is unbounded: its reader may itself be blocked
        // feeding the head.
        let (down_txs, mut down_rxs): (Vec<_>, Vec<_>) = processors
            .iter()
            .map(|p| Some(data_channel_capacity(p.weight())))
            .chain(std::iter::once(None))
            .map(priority_channel)
            .unzip();
        // N+1 upstream lanes: upstream output <- stage 0 <- ... <- stage N-1 <- tail.
        let (up_txs, mut up_rxs): (Vec<_>, Vec<_>) =
            (0..=n).map(|_| priority_channel(None)).unzip();

        let output_rx = down_rxs.pop();
        let upstream_rx = Some(up_rxs.remove(0));
        let head_tx = down_txs[0].clone();
        let tail_tx = up_txs[n].clone();

        let stages = processors.into_iter().zip(down_rxs).zip(up_rxs).enumerate();
        for (i, ((processor, down_rx), up_rx)) in stages {
            let (ctx_down_tx, ctx_down_rx) = mpsc::unbounded_channel::<FrameEnum>();
            let (ctx_up_tx, ctx_up_rx) = mpsc::unbounded_channel::<FrameEnum>();
            let ctx = ProcessorContext::new(
                ctx_down_tx,
                ctx_up_tx,
                cancel_token.clone(),
                generation_id,
            );

            let (id, name) = meta[i].clone();
            let stage = Stage {
                heavy: processor.weight() == ProcessorWeight::Heavy,
                processor,
                id,
                name,
                ctx,
                ctx_down_rx,
                ctx_up_rx,
                down_rx,
                up_rx,
                downstream_tx: down_txs[i + 1].clone(),
                upstream_tx: up_txs[i].clone(),
                prev: i.checked_sub(1).map(|p| meta[p].clone()),
                next: meta.get(i + 1).cloned(),
                observers: observers.clone(),
                clock,
                token: cancel_token.clone(),
                pending: VecDeque::new(),
                cancelled_down: false,
                cancelled_up: false,
                poisoned: false,
            };
            join_set.spawn(stage.run());
        }

        Ok(Self {
            head_tx,
            tail_tx,
            output_rx,
            upstream_rx,
            join_set,
            cancel_token,
            generation_id,
            stage_names: meta.into_iter().map(|(_, name)| name).collect(),
        })
    }

    /// Inject a frame at the head (downstream) or the tail (upstream).
    pub async fn inject(&self, frame: FrameEnum, direction: FrameDirection) {
        match direction {
            FrameDirection::Downstream => self.head_tx.send(frame, direction).await,
            FrameDirection::Upstream => self.tail_tx.send(frame, direction).await,
        }
    }

    /// Inject a frame at the head, travelling downstream.
    pub async fn send(&self, frame: FrameEnum) {
        self.inject(frame, FrameDirection::Downstream).await;
    }

    /// Sender feeding the first stage.
    pub fn input(&self) -> &PrioritySender {
        &self.head_tx
    }

    /// Take the downstream output receiver. Can only be called once.
    pub fn take_output(&mut self) -> Option<PriorityReceiver> {
        self.output_rx.take()
    }

    /// Take the upstream output receiver. Can only be called once.
    pub fn take_upstream(&mut self) -> Option<PriorityReceiver> {
        self.upstream_rx.take()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    pub fn generation_id(&self) -> u64 {
        self.generation_id
    }

    /// Names of the stages, head first.
    pub fn stage_names(&self) -> &[String] {
        &self.stage_names
    }

    /// Wait until every stage task has stopped on its own.
    pub async fn join(&mut self) {
        while let Some(result) = self.join_set.join_next().await {
            if let Err(e) = result {
                tracing::error!("ChannelPipeline: stage task failed: {e}");
            }
        }
    }

    /// Stop every stage and wait for their tasks to finish.
    pub async fn shutdown(&mut self) {
        self.cancel_token.cancel();
        self.join().await;
    }
}

impl Drop for ChannelPipeline {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

// ---------------------------------------------------------------------------
// Stage task
// ---------------------------------------------------------------------------

enum Next {
    Input(DirectedFrame),
    Background(FrameEnum, FrameDirection),
    Stop,
}

/// Result of racing a Heavy stage's `process()`.
enum MonitorResult {
    Completed,
    Preempted(DirectedFrame),
    Cancelled,
    Panicked(String),
}

/// One stage and the lanes around it.
struct Stage {
    processor: Box<dyn Processor>,
    id: u64,
    name: String,
    heavy: bool,
    ctx: ProcessorContext,
    ctx_down_rx: mpsc::UnboundedReceiver<FrameEnum>,
    ctx_up_rx: mpsc::UnboundedReceiver<FrameEnum>,
    /// Frames travelling downstream into this stage.
    down_rx: PriorityReceiver,
    /// Frames travelling upstream into this stage.
    up_rx: PriorityReceiver,
    downstream_tx: PrioritySender,
    upstream_tx: PrioritySender,
    prev: Option<(u64, String)>,
    next: Option<(u64, String)>,
    observers: Arc<[Arc<dyn Observer>]>,
    clock: Instant,
    token: CancellationToken,
    /// Input frames to handle before reading the lanes again.
    pending: VecDeque<DirectedFrame>,
    cancelled_down: bool,
    cancelled_up: bool,
    poisoned: bool,
}

impl Stage {
    async fn run(mut self) {
        self.processor.setup().await;
        tracing::debug!(
            processor = %self.name,
            weight = %self.processor.weight(),
            "Pipeline: processor started"
        );

        loop {
            let next = match self.pending.pop_front() {
                Some(directed) => Next::Input(directed),
                None => self.next_event().await,
            };
            match next {
                Next::Stop => break,
                Next::Background(frame, direction) => {
                    if self.relay_only() {
                        tracing::trace!(processor = %self.name, frame = %frame, "Pipeline: dropping late output");
                    } else {
                        self.forward(frame, direction).await;
                    }
                }
                Next::Input(directed) => {
                    if !self.handle(directed).await {
                        break;
                    }
                }
            }
        }

        self.processor.cleanup().await;
        tracing::debug!(processor = %self.name, "Pipeline: processor stopped");
    }

    async fn next_event(&mut self) -> Next {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Next::Stop,
            Some(d) = self.down_rx.urgent_rx.recv() => Next::Input(d),
            Some(d) = self.up_rx.urgent_rx.recv() => Next::Input(d),
            Some(f) = self.ctx_down_rx.recv() => Next::Background(f, FrameDirection::Downstream),
            Some(f) = self.ctx_up_rx.recv() => Next::Background(f, FrameDirection::Upstream),
            Some(d) = self.down_rx.ordered_rx.recv() => Next::Input(d),
            Some(d) = self.up_rx.ordered_rx.recv() => Next::Input(d),
            else => Next::Stop,
        }
    }

    fn relay_only(&self) -> bool {
        self.poisoned || self.cancelled_down || self.cancelled_up
    }

    fn now(&self) -> u64 {
        self.clock.elapsed().as_nanos().min(u64::MAX as u128) as u64
    }

    /// Handle one input frame. Returns `false` once the stage should stop.
    async fn handle(&mut self, directed: DirectedFrame) -> bool {
        tracing::trace!(
            processor = %self.name,
            frame = %directed.frame,
            direction = ?directed.direction,
            "Pipeline: dispatching"
        );

        if self.relay_only() {
            self.relay_cancel(directed).await;
        } else {
            match directed.frame {
                FrameEnum::Cancel(_) => self.handle_cancel(directed).await,
                FrameEnum::Interruption(_) => self.handle_interruption(directed).await,
                _ => self.dispatch(directed).await,
            }
        }
        !(self.cancelled_down && self.cancelled_up)
    }

    /// Relay-only mode: pass each direction's first cancel, drop the rest.
    async fn relay_cancel(&mut self, directed: DirectedFrame) {
        if !matches!(directed.frame, FrameEnum::Cancel(_)) {
            tracing::trace!(processor = %self.name, frame = %directed.frame, "Pipeline: dropping frame after cancel");
            return;
        }
        let first = match directed.direction {
            FrameDirection::Downstream => !std::mem::replace(&mut self.cancelled_down, true),
            FrameDirection::Upstream => !std::mem::replace(&mut self.cancelled_up, true),
        };
        if first {
            self.forward(directed.frame, directed.direction).await;
        }
    }

    async fn handle_cancel(&mut self, directed: DirectedFrame) {
        self.ctx.close_all();
        let dropped = self.discard_context_output();
        if dropped > 0 {
            tracing::debug!(processor = %self.name, dropped, "Pipeline: dropped output on cancel");
        }
        match directed.direction {
            FrameDirection::Downstream => self.cancelled_down = true,
            FrameDirection::Upstream => self.cancelled_up = true,
        }

        // The stage sees the cancel so it can abort its work; the relay
        // itself is done here.
        let relay = directed.frame.clone();
        let direction = directed.direction;
        self.notify_process(&directed).await;
        let result = AssertUnwindSafe(self.processor.process(directed.frame, direction, &self.ctx))
            .catch_unwind()
            .await;
        if let Err(panic) = result {
            tracing::error!(processor = %self.name, "Processor panicked on cancel: {}", panic_message(panic));
        }
        self.discard_context_output();
        self.forward(relay, direction).await;
    }

    async fn handle_interruption(&mut self, directed: DirectedFrame) {
        self.ctx.close_interruptible();

        // Stale background output.
        let mut discarded = 0usize;
        while let Ok(frame) = self.ctx_down_rx.try_recv() {
            if survives_interruption(&frame) {
                self.forward(frame, FrameDirection::Downstream).await;
            } else {
                discarded += 1;
            }
        }
        while let Ok(frame) = self.ctx_up_rx.try_recv() {
            if survives_interruption(&frame) {
                self.forward(frame, FrameDirection::Upstream).await;
            } else {
                discarded += 1;
            }
        }

        // Stale input queued by the neighbour before the interruption.
        let lane = match directed.direction {
            FrameDirection::Downstream => &mut self.down_rx,
            FrameDirection::Upstream => &mut self.up_rx,
        };
        let (kept, stale) = lane.drain_stale(directed.seq);
        self.pending.extend(kept);
        discarded += stale;

        if discarded > 0 {
            tracing::debug!(processor = %self.name, discarded, "Pipeline: interruption flushed stale frames");
        }
        self.dispatch(directed).await;
    }

    /// Run `process()` for one frame and forward everything it emitted.
    async fn dispatch(&mut self, directed: DirectedFrame) {
        self.notify_process(&directed).await;

        if self.heavy {
            match self.process_monitored(directed).await {
                MonitorResult::Completed => {}
                MonitorResult::Cancelled => return,
                MonitorResult::Panicked(msg) => {
                    self.poison(msg).await;
                    return;
                }
                MonitorResult::Preempted(urgent) => {
                    // Handled next, after the output already produced.
                    self.pending.push_front(urgent);
                }
            }
        } else {
            let result = AssertUnwindSafe(self.processor.process(
                directed.frame,
                directed.direction,
                &self.ctx,
            ))
            .catch_unwind()
            .await;
            if let Err(panic) = result {
                self.poison(panic_message(panic)).await;
                return;
            }
        }

        self.forward_context_output().await;
    }

    /// Race a Heavy stage's `process()` against urgent frames.
    async fn process_monitored(&mut self, directed: DirectedFrame) -> MonitorResult {
        let interrupt_token = CancellationToken::new();
        self.ctx.set_interruption_token(interrupt_token.clone());

        let mut process_fut = pin!(AssertUnwindSafe(self.processor.process(
            directed.frame,
            directed.direction,
            &self.ctx,
        ))
        .catch_unwind());

        let urgent = tokio::select! {
            biased;
            _ = self.token.cancelled() => return MonitorResult::Cancelled,
            result = &mut process_fut => {
                return match result {
                    Ok(()) => MonitorResult::Completed,
                    Err(panic) => MonitorResult::Panicked(panic_message(panic)),
                };
            }
            Some(d) = self.down_rx.urgent_rx.recv() => d,
            Some(d) = self.up_rx.urgent_rx.recv() => d,
        };

        tracing::debug!(
            processor = %self.name,
            frame = %urgent.frame,
            "Pipeline: urgent frame during Heavy process()"
        );
        interrupt_token.cancel();
        match process_fut.await {
            Ok(()) => MonitorResult::Preempted(urgent),
            Err(panic) => {
                self.pending.push_front(urgent);
                MonitorResult::Panicked(panic_message(panic))
            }
        }
    }

    /// Report a panic upstream and switch to relay-only mode.
    async fn poison(&mut self, msg: String) {
        tracing::error!(processor = %self.name, "Processor panicked: {msg}");
        self.poisoned = true;
        self.ctx.close_all();
        self.discard_context_output();
        let error = ErrorFrame::new(format!("Processor {} panicked: {msg}", self.name), true);
        self.forward(FrameEnum::Error(error), FrameDirection::Upstream)
            .await;
    }

    async fn forward_context_output(&mut self) {
        while let Ok(frame) = self.ctx_down_rx.try_recv() {
            self.forward(frame, FrameDirection::Downstream).await;
        }
        while let Ok(frame) = self.ctx_up_rx.try_recv() {
            self.forward(frame, FrameDirection::Upstream).await;
        }
    }

    fn discard_context_output(&mut self) -> usize {
        let mut dropped = 0usize;
        while self.ctx_down_rx.try_recv().is_ok() {
            dropped += 1;
        }
        while self.ctx_up_rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    async fn notify_process(&mut self, directed: &DirectedFrame) {
        if self.observers.is_empty() {
            return;
        }
        let data = FrameProcessed {
            processor_id: self.id,
            processor_name: &self.name,
            frame: &directed.frame,
            direction: directed.direction,
            timestamp: self.now(),
        };
        for observer in self.observers.iter() {
            observer.on_process_frame(&data).await;
        }
    }

    async fn forward(&mut self, frame: FrameEnum, direction: FrameDirection) {
        if !self.observers.is_empty() {
            let destination = match direction {
                FrameDirection::Downstream => self.next.as_ref(),
                FrameDirection::Upstream => self.prev.as_ref(),
            };
            let data = FramePushed {
                source_id: self.id,
                source_name: &self.name,
                destination_id: destination.map(|(id, _)| *id),
                destination_name: destination.map(|(_, name)| name.as_str()),
                frame: &frame,
                direction,
                timestamp: self.now(),
            };
            for observer in self.observers.iter() {
                observer.on_push_frame(&data).await;
            }
        }
        match direction {
            FrameDirection::Downstream => self.downstream_tx.send(frame, direction).await,
            FrameDirection::Upstream => self.upstream_tx.send(frame, direction).await,
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{
        EndFrame, InterruptionFrame, LLMFullResponseEndFrame, LLMFullResponseStartFrame,
        TextFrame,
    };
    use std::sync::Mutex;
    use std::time::Duration;

    /// Forwards every frame in its direction.
    #[derive(Debug)]
    struct PassthroughProc {
        id: u64,
        name: &'static str,
    }

    impl std::fmt::Display for PassthroughProc {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.name)
        }
    }

    #[async_trait::async_trait]
    impl Processor for PassthroughProc {
        fn name(&self) -> &str {
            self.name
        }
        fn id(&self) -> u64 {
            self.id
        }
        async fn process(&mut self, frame: FrameEnum, direction: FrameDirection, ctx: &ProcessorContext) {
            ctx.send(frame, direction);
        }
    }

    fn pt(id: u64, name: &'static str) -> Box<dyn Processor> {
        Box::new(PassthroughProc { id, name })
    }

    /// Uppercases text; forwards everything else.
    #[derive(Debug)]
    struct UpperProc;

    impl std::fmt::Display for UpperProc {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "Upper")
        }
    }

    #[async_trait::async_trait]
    impl Processor for UpperProc {
        fn name(&self) -> &str {
            "Upper"
        }
        fn id(&self) -> u64 {
            1
        }
        fn weight(&self) -> ProcessorWeight {
            ProcessorWeight::Light
        }
        async fn process(&mut self, frame: FrameEnum, direction: FrameDirection, ctx: &ProcessorContext) {
            match frame {
                FrameEnum::Text(text) => ctx.send_downstream(FrameEnum::text(text.text.to_uppercase())),
                other => ctx.send(other, direction),
            }
        }
    }

    /// Panics on any text frame.
    #[derive(Debug)]
    struct PanicProc;

    impl std::fmt::Display for PanicProc {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "Panic")
        }
    }

    #[async_trait::async_trait]
    impl Processor for PanicProc {
        fn name(&self) -> &str {
            "Panic"
        }
        fn id(&self) -> u64 {
            7
        }
        async fn process(&mut self, frame: FrameEnum, direction: FrameDirection, ctx: &ProcessorContext) {
            if let FrameEnum::Text(_) = frame {
                panic!("boom");
            }
            ctx.send(frame, direction);
        }
    }

    /// Heavy stage whose text handling waits until interrupted.
    #[derive(Debug)]
    struct SlowHeavyProc {
        interrupted: Arc<Mutex<bool>>,
    }

    impl std::fmt::Display for SlowHeavyProc {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "SlowHeavy")
        }
    }

    #[async_trait::async_trait]
    impl Processor for SlowHeavyProc {
        fn name(&self) -> &str {
            "SlowHeavy"
        }
        fn id(&self) -> u64 {
            9
        }
        fn weight(&self) -> ProcessorWeight {
            ProcessorWeight::Heavy
        }
        async fn process(&mut self, frame: FrameEnum, direction: FrameDirection, ctx: &ProcessorContext) {
            if let FrameEnum::Text(_) = frame {
                tokio::select! {
                    _ = ctx.interruption_token().cancelled() => {
                        *self.interrupted.lock().unwrap() = true;
                    }
                    _ = tokio::time::sleep(Duration::from_secs(30)) => {
                        ctx.send_downstream(FrameEnum::text("too late"));
                    }
                }
                return;
            }
            ctx.send(frame, direction);
        }
    }

    async fn recv(rx: &mut PriorityReceiver) -> DirectedFrame {
        tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_empty_pipeline_is_configuration_error() {
        let result = ChannelPipeline::new(vec![], vec![]);
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_two_processor_chain() {
        let mut pipeline = ChannelPipeline::new(vec![pt(1, "PT1"), Box::new(UpperProc)], vec![]).unwrap();
        let mut output = pipeline.take_output().unwrap();
        assert_eq!(pipeline.stage_names(), ["PT1", "Upper"]);

        pipeline.send(FrameEnum::Text(TextFrame::new("chain test"))).await;

        match recv(&mut output).await.frame {
            FrameEnum::Text(text) => assert_eq!(text.text, "CHAIN TEST"),
            other => panic!("Expected Text, got {other}"),
        }
        pipeline.shutdown().await;
    }

    /// LLM text must not overtake the end-of-response frame.
    #[tokio::test]
    async fn test_llm_token_ordering_preserved() {
        let mut pipeline = ChannelPipeline::new(vec![pt(1, "PT1"), pt(2, "PT2")], vec![]).unwrap();
        let mut output = pipeline.take_output().unwrap();

        pipeline.send(FrameEnum::LLMFullResponseStart(LLMFullResponseStartFrame::new())).await;
        pipeline.send(FrameEnum::llm_text("Hello ")).await;
        pipeline.send(FrameEnum::llm_text("world.")).await;
        pipeline.send(FrameEnum::LLMFullResponseEnd(LLMFullResponseEndFrame::new())).await;

        for expected in [
            "LLMFullResponseStartFrame",
            "LLMTextFrame",
            "LLMTextFrame",
            "LLMFullResponseEndFrame",
        ] {
            assert_eq!(recv(&mut output).await.frame.name(), expected);
        }
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_multiple_frames_keep_order() {
        let mut pipeline = ChannelPipeline::new(vec![Box::new(UpperProc)], vec![]).unwrap();
        let mut output = pipeline.take_output().unwrap();

        for i in 0..100 {
            pipeline.send(FrameEnum::text(format!("msg{i}"))).await;
        }
        for i in 0..100 {
            match recv(&mut output).await.frame {
                FrameEnum::Text(text) => assert_eq!(text.text, format!("MSG{i}")),
                other => panic!("Expected Text, got {other}"),
            }
        }
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_upstream_injection_reaches_head() {
        let mut pipeline = ChannelPipeline::new(vec![pt(1, "A"), pt(2, "B")], vec![]).unwrap();
        let mut upstream = pipeline.take_upstream().unwrap();

        pipeline.inject(FrameEnum::text("up"), FrameDirection::Upstream).await;
        let received = recv(&mut upstream).await;
        assert_eq!(received.direction, FrameDirection::Upstream);
        assert!(matches!(received.frame, FrameEnum::Text(_)));
        pipeline.shutdown().await;
    }

    #[test]
    fn test_data_channel_capacity() {
        assert_eq!(data_channel_capacity(ProcessorWeight::Light), 32);
        assert_eq!(data_channel_capacity(ProcessorWeight::Standard), 64);
        assert_eq!(data_channel_capacity(ProcessorWeight::Heavy), 128);
    }

    #[tokio::test]
    async fn test_urgent_lane_overtakes_ordered_lane() {
        let (tx, mut rx) = priority_channel(Some(8));
        tx.send(FrameEnum::text("queued"), FrameDirection::Downstream).await;
        tx.send(FrameEnum::Interruption(InterruptionFrame::new()), FrameDirection::Downstream)
            .await;

        assert!(matches!(rx.recv().await.unwrap().frame, FrameEnum::Interruption(_)));
        assert!(matches!(rx.recv().await.unwrap().frame, FrameEnum::Text(_)));
    }

    #[tokio::test]
    async fn test_drain_stale_only_touches_frames_sent_before() {
        let (tx, mut rx) = priority_channel(Some(16));
        tx.send(FrameEnum::text("stale 1"), FrameDirection::Downstream).await;
        tx.send(FrameEnum::End(EndFrame::new()), FrameDirection::Downstream).await;
        tx.send(FrameEnum::text("stale 2"), FrameDirection::Downstream).await;
        tx.send(FrameEnum::Interruption(InterruptionFrame::new()), FrameDirection::Downstream)
            .await;
        tx.send(FrameEnum::text("fresh"), FrameDirection::Downstream).await;
        tx.send(FrameEnum::text("fresh 2"), FrameDirection::Downstream).await;

        let interruption = rx.urgent_rx.recv().await.unwrap();
        let (kept, discarded) = rx.drain_stale(interruption.seq);

        assert_eq!(discarded, 2);
        let names: Vec<String> = kept.iter().map(|d| d.frame.to_string()).collect();
        assert_eq!(names, vec!["EndFrame(reason: None)", "TextFrame(text: [fresh])"]);
        // The rest stays queued.
        match rx.try_recv().unwrap().frame {
            FrameEnum::Text(t) => assert_eq!(t.text, "fresh 2"),
            other => panic!("unexpected {other}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_relay_and_quiescence() {
        let mut pipeline =
            ChannelPipeline::new(vec![pt(1, "A"), pt(2, "B"), pt(3, "C")], vec![]).unwrap();
        let mut output = pipeline.take_output().unwrap();
        let mut upstream = pipeline.take_upstream().unwrap();

        pipeline.inject(FrameEnum::cancel(Some("test".into())), FrameDirection::Downstream).await;
        pipeline.inject(FrameEnum::cancel(Some("test".into())), FrameDirection::Upstream).await;

        assert!(matches!(recv(&mut output).await.frame, FrameEnum::Cancel(_)));
        assert!(matches!(recv(&mut upstream).await.frame, FrameEnum::Cancel(_)));

        // Every stage stops on its own once it has seen both cancels.
        tokio::time::timeout(Duration::from_secs(1), pipeline.join())
            .await
            .expect("stages did not stop");

        pipeline.send(FrameEnum::text("after cancel")).await;
        let late = tokio::time::timeout(Duration::from_millis(100), output.recv()).await;
        assert!(matches!(late, Err(_) | Ok(None)));
    }

    #[tokio::test]
    async fn test_stage_drops_frames_after_cancel() {
        let mut pipeline = ChannelPipeline::new(vec![pt(1, "A"), pt(2, "B")], vec![]).unwrap();
        let mut output = pipeline.take_output().unwrap();

        pipeline.inject(FrameEnum::cancel(None), FrameDirection::Downstream).await;
        assert!(matches!(recv(&mut output).await.frame, FrameEnum::Cancel(_)));

        pipeline.send(FrameEnum::text("ignored")).await;
        let late = tokio::time::timeout(Duration::from_millis(100), output.recv()).await;
        assert!(late.is_err(), "no frame may leave a cancelled pipeline");
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_panicking_stage_reports_fatal_error_upstream() {
        let mut pipeline =
            ChannelPipeline::new(vec![pt(1, "A"), Box::new(PanicProc), pt(3, "C")], vec![]).unwrap();
        let mut output = pipeline.take_output().unwrap();
        let mut upstream = pipeline.take_upstream().unwrap();

        pipeline.send(FrameEnum::text("explode")).await;
        match recv(&mut upstream).await.frame {
            FrameEnum::Error(e) => {
                assert!(e.fatal);
                assert!(e.error.contains("boom"));
            }
            other => panic!("Expected Error, got {other}"),
        }

        // Cancel still makes it through the poisoned stage.
        pipeline.inject(FrameEnum::cancel(None), FrameDirection::Downstream).await;
        pipeline.inject(FrameEnum::cancel(None), FrameDirection::Upstream).await;
        assert!(matches!(recv(&mut output).await.frame, FrameEnum::Cancel(_)));
        assert!(matches!(recv(&mut upstream).await.frame, FrameEnum::Cancel(_)));
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_heavy_process_is_interrupted() {
        let interrupted = Arc::new(Mutex::new(false));
        let heavy = SlowHeavyProc {
            interrupted: interrupted.clone(),
        };
        let mut pipeline = ChannelPipeline::new(vec![Box::new(heavy)], vec![]).unwrap();
        let mut output = pipeline.take_output().unwrap();

        pipeline.send(FrameEnum::text("slow")).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        pipeline.send(FrameEnum::Interruption(InterruptionFrame::new())).await;

        assert!(matches!(recv(&mut output).await.frame, FrameEnum::Interruption(_)));
        assert!(*interrupted.lock().unwrap());
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_observers_see_pushes() {
        #[derive(Default)]
        struct Recorder {
            pushes: Mutex<Vec<(String, Option<String>)>>,
        }

        #[async_trait::async_trait]
        impl Observer for Recorder {
            async fn on_push_frame(&self, data: &FramePushed<'_>) {
                self.pushes.lock().unwrap().push((
                    data.source_name.to_string(),
                    data.destination_name.map(str::to_string),
                ));
            }
        }

        let recorder = Arc::new(Recorder::default());
        let mut pipeline =
            ChannelPipeline::new(vec![pt(1, "A"), pt(2, "B")], vec![recorder.clone()]).unwrap();
        let mut output = pipeline.take_output().unwrap();

        pipeline.send(FrameEnum::text("x")).await;
        recv(&mut output).await;

        let pushes = recorder.pushes.lock().unwrap().clone();
        assert_eq!(
            pushes,
            vec![
                ("A".to_string(), Some("B".to_string())),
                ("B".to_string(), None),
            ]
        );
        pipeline.shutdown().await;
    }
}
