// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! In-process participant transport.
//!
//! [`Transport::new`] splits a connection into two halves:
//!
//! - the pipeline side, a [`Transport`] whose [`input()`](Transport::input)
//!   and [`output()`](Transport::output) stages sit at the two ends of the
//!   chain, and
//! - the participant side, a [`TransportIo`] that whatever carries the media
//!   (a WebRTC bridge, a test, the local demo) uses to feed
//!   [`TransportInput`]s in and read [`OutboundMessage`]s out.
//!
//! # Example
//!
//! ```rust,no_run
//! use simple_chatbot::transports::{Transport, TransportInput, TransportParams};
//!
//! # fn example() -> Result<(), simple_chatbot::error::PipelineError> {
//! let (mut transport, io) = Transport::new(TransportParams::default());
//! let input = transport.input()?;
//! let output = transport.output();
//! io.send(TransportInput::participant_joined("alice"));
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::PipelineError;
use crate::frames::frame_enum::FrameEnum;
use crate::frames::{
    AudioRawData, ImageRawData, InputAudioRawFrame, InputImageRawFrame,
    InputTransportMessageFrame, ParticipantJoinedFrame, ParticipantLeftFrame,
};
use crate::impl_processor_display;
use crate::processors::processor::{FrameEmitter, Processor, ProcessorContext, ProcessorWeight};
use crate::processors::FrameDirection;
use crate::utils::base_object::obj_id;

/// Parameters for transport configuration.
#[derive(Debug, Clone)]
pub struct TransportParams {
    pub audio_out_enabled: bool,
    pub audio_out_sample_rate: Option<u32>,
    pub audio_out_channels: u32,
    pub audio_in_enabled: bool,
    pub audio_in_sample_rate: Option<u32>,
    pub audio_in_channels: u32,
    pub video_out_enabled: bool,
    pub video_out_width: u32,
    pub video_out_height: u32,
    /// Frames per second for looping sprites.
    pub video_out_framerate: u32,
}

impl Default for TransportParams {
    fn default() -> Self {
        Self {
            audio_out_enabled: true,
            audio_out_sample_rate: None,
            audio_out_channels: 1,
            audio_in_enabled: true,
            audio_in_sample_rate: None,
            audio_in_channels: 1,
            video_out_enabled: true,
            video_out_width: 1024,
            video_out_height: 576,
            video_out_framerate: 30,
        }
    }
}

impl TransportParams {
    fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.video_out_framerate.max(1)))
    }
}

/// Something the participant side delivers into the pipeline.
#[derive(Debug, Clone)]
pub enum TransportInput {
    /// Microphone audio, 16-bit little-endian PCM.
    Audio {
        audio: Vec<u8>,
        sample_rate: u32,
        num_channels: u32,
    },
    /// Camera image.
    Image(ImageRawData),
    /// App message from the client (RTVI and friends).
    Message(Value),
    ParticipantJoined {
        participant_id: String,
        name: Option<String>,
    },
    ParticipantLeft {
        participant_id: String,
        reason: String,
    },
}

impl TransportInput {
    pub fn participant_joined(participant_id: impl Into<String>) -> Self {
        TransportInput::ParticipantJoined {
            participant_id: participant_id.into(),
            name: None,
        }
    }

    pub fn participant_left(participant_id: impl Into<String>, reason: impl Into<String>) -> Self {
        TransportInput::ParticipantLeft {
            participant_id: participant_id.into(),
            reason: reason.into(),
        }
    }

    fn into_frame(self) -> FrameEnum {
        match self {
            TransportInput::Audio {
                audio,
                sample_rate,
                num_channels,
            } => FrameEnum::InputAudioRaw(InputAudioRawFrame::new(audio, sample_rate, num_channels)),
            TransportInput::Image(image) => FrameEnum::InputImageRaw(InputImageRawFrame::new(image)),
            TransportInput::Message(message) => {
                FrameEnum::InputTransportMessage(InputTransportMessageFrame::new(message))
            }
            TransportInput::ParticipantJoined {
                participant_id,
                name,
            } => FrameEnum::ParticipantJoined(ParticipantJoinedFrame::new(participant_id, name)),
            TransportInput::ParticipantLeft {
                participant_id,
                reason,
            } => FrameEnum::ParticipantLeft(ParticipantLeftFrame::new(participant_id, reason)),
        }
    }
}

/// Something the pipeline delivers to the participant.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Audio(AudioRawData),
    Image(ImageRawData),
    Message(Value),
}

/// Participant side of a transport.
#[derive(Debug)]
pub struct TransportIo {
    inbound: mpsc::UnboundedSender<TransportInput>,
    outbound: mpsc::UnboundedReceiver<OutboundMessage>,
}

impl TransportIo {
    /// Deliver `input` to the pipeline. Returns `false` once the input stage
    /// is gone.
    pub fn send(&self, input: TransportInput) -> bool {
        self.inbound.send(input).is_ok()
    }

    /// A cloneable sender for delivering input from other tasks.
    pub fn sender(&self) -> mpsc::UnboundedSender<TransportInput> {
        self.inbound.clone()
    }

    /// Next message for the participant; `None` once the output stage is gone.
    pub async fn recv(&mut self) -> Option<OutboundMessage> {
        self.outbound.recv().await
    }

    pub fn try_recv(&mut self) -> Option<OutboundMessage> {
        self.outbound.try_recv().ok()
    }
}

/// Pipeline side of a transport.
#[derive(Debug)]
pub struct Transport {
    params: TransportParams,
    inbound: Option<mpsc::UnboundedReceiver<TransportInput>>,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
}

impl Transport {
    pub fn new(params: TransportParams) -> (Self, TransportIo) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let transport = Self {
            params,
            inbound: Some(inbound_rx),
            outbound: outbound_tx,
        };
        let io = TransportIo {
            inbound: inbound_tx,
            outbound: outbound_rx,
        };
        (transport, io)
    }

    pub fn params(&self) -> &TransportParams {
        &self.params
    }

    /// The stage that turns participant input into frames. Can only be
    /// taken once.
    pub fn input(&mut self) -> Result<TransportInputStage, PipelineError> {
        let inbound = self
            .inbound
            .take()
            .ok_or_else(|| PipelineError::Transport("input stage already taken".into()))?;
        Ok(TransportInputStage::new(self.params.clone(), inbound))
    }

    /// The stage that delivers audio, video and messages to the participant.
    pub fn output(&self) -> TransportOutputStage {
        TransportOutputStage::new(self.params.clone(), self.outbound.clone())
    }
}

// ---------------------------------------------------------------------------
// Input stage
// ---------------------------------------------------------------------------

/// Head of the pipeline: pushes participant input downstream.
///
/// Reading starts when the `StartFrame` has been forwarded and stops at
/// `EndFrame` or `CancelFrame`.
pub struct TransportInputStage {
    id: u64,
    name: String,
    params: TransportParams,
    inbound: Option<mpsc::UnboundedReceiver<TransportInput>>,
    reader: Option<JoinHandle<()>>,
}

impl TransportInputStage {
    fn new(params: TransportParams, inbound: mpsc::UnboundedReceiver<TransportInput>) -> Self {
        Self {
            id: obj_id(),
            name: "TransportInput".to_string(),
            params,
            inbound: Some(inbound),
            reader: None,
        }
    }

    fn start_reading(&mut self, emitter: FrameEmitter) {
        let Some(mut inbound) = self.inbound.take() else {
            tracing::warn!(processor = %self.name, "input already started");
            return;
        };
        let audio_in_enabled = self.params.audio_in_enabled;
        let name = self.name.clone();
        self.reader = Some(tokio::spawn(async move {
            while let Some(input) = inbound.recv().await {
                if matches!(input, TransportInput::Audio { .. }) && !audio_in_enabled {
                    continue;
                }
                if !emitter.send_downstream(input.into_frame()) {
                    break;
                }
            }
            tracing::debug!(processor = %name, "input reader stopped");
        }));
    }

    fn stop_reading(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl_processor_display!(TransportInputStage);

#[async_trait]
impl Processor for TransportInputStage {
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
        match (&frame, direction) {
            (FrameEnum::Start(_), FrameDirection::Downstream) => {
                ctx.send_downstream(frame);
                self.start_reading(ctx.persistent_emitter());
            }
            (FrameEnum::End(_) | FrameEnum::Cancel(_), _) => {
                self.stop_reading();
                ctx.send(frame, direction);
            }
            _ => ctx.send(frame, direction),
        }
    }

    async fn cleanup(&mut self) {
        self.stop_reading();
    }
}

// ---------------------------------------------------------------------------
// Output stage
// ---------------------------------------------------------------------------

/// Near the tail of the pipeline: delivers media and messages to the
/// participant and forwards every frame.
///
/// A `SpriteFrame` plays in a loop at the configured framerate until the
/// next image or sprite replaces it.
pub struct TransportOutputStage {
    id: u64,
    name: String,
    params: TransportParams,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    sprite: Option<JoinHandle<()>>,
}

impl TransportOutputStage {
    fn new(params: TransportParams, outbound: mpsc::UnboundedSender<OutboundMessage>) -> Self {
        Self {
            id: obj_id(),
            name: "TransportOutput".to_string(),
            params,
            outbound,
            sprite: None,
        }
    }

    /// Whether a sprite loop is currently playing.
    pub fn is_animating(&self) -> bool {
        self.sprite.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn deliver(&self, message: OutboundMessage) {
        if self.outbound.send(message).is_err() {
            tracing::trace!(processor = %self.name, "participant side closed, message dropped");
        }
    }

    fn stop_sprite(&mut self) {
        if let Some(sprite) = self.sprite.take() {
            sprite.abort();
        }
    }

    fn play_sprite(&mut self, images: Vec<ImageRawData>) {
        self.stop_sprite();
        if images.is_empty() {
            return;
        }
        let outbound = self.outbound.clone();
        let period = self.params.frame_interval();
        self.sprite = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            for image in images.iter().cycle() {
                ticker.tick().await;
                if outbound.send(OutboundMessage::Image(image.clone())).is_err() {
                    break;
                }
            }
        }));
    }
}

impl_processor_display!(TransportOutputStage);

#[async_trait]
impl Processor for TransportOutputStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> u64 {
        self.id
    }

    async fn process(&mut self, frame: FrameEnum, direction: FrameDirection, ctx: &ProcessorContext) {
        if direction == FrameDirection::Downstream {
            match &frame {
                FrameEnum::TTSAudioRaw(f) if self.params.audio_out_enabled => {
                    self.deliver(OutboundMessage::Audio(f.audio.clone()));
                }
                FrameEnum::OutputAudioRaw(f) if self.params.audio_out_enabled => {
                    self.deliver(OutboundMessage::Audio(f.audio.clone()));
                }
                FrameEnum::OutputImageRaw(f) if self.params.video_out_enabled => {
                    self.stop_sprite();
                    self.deliver(OutboundMessage::Image(f.image.clone()));
                }
                FrameEnum::Sprite(f) if self.params.video_out_enabled => {
                    self.play_sprite(f.images.clone());
                }
                FrameEnum::OutputTransportMessage(f) => {
                    self.deliver(OutboundMessage::Message(f.message.clone()));
                }
                FrameEnum::OutputTransportMessageUrgent(f) => {
                    self.deliver(OutboundMessage::Message(f.message.clone()));
                }
                FrameEnum::End(_) | FrameEnum::Cancel(_) => self.stop_sprite(),
                _ => {}
            }
        } else if matches!(frame, FrameEnum::Cancel(_)) {
            self.stop_sprite();
        }
        ctx.send(frame, direction);
    }

    async fn cleanup(&mut self) {
        self.stop_sprite();
    }
}
