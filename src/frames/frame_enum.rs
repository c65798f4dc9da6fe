// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Frame enum: the closed set of frames that can travel through a pipeline.
//!
//! Stages match on [`FrameEnum`] exhaustively, so adding a frame type makes
//! the compiler point at every handler that has to consider it.

use std::fmt;

use super::*;

// ---------------------------------------------------------------------------
// The Frame enum
// ---------------------------------------------------------------------------

/// Concrete enum of all frame types in the pipeline.
///
/// Each variant wraps the corresponding frame struct directly.
#[derive(Debug, Clone)]
pub enum FrameEnum {
    // ===================== SYSTEM FRAMES =====================
    /// Initial frame to start pipeline processing.
    Start(StartFrame),
    /// Pipeline cancellation request.
    Cancel(CancelFrame),
    /// Error notification (may be fatal).
    Error(ErrorFrame),
    /// The user took the floor.
    Interruption(InterruptionFrame),
    /// User turn started.
    UserStartedSpeaking(UserStartedSpeakingFrame),
    /// User turn ended.
    UserStoppedSpeaking(UserStoppedSpeakingFrame),
    /// Bot started speaking.
    BotStartedSpeaking(BotStartedSpeakingFrame),
    /// Bot stopped speaking.
    BotStoppedSpeaking(BotStoppedSpeakingFrame),
    /// Performance metrics.
    Metrics(MetricsFrame),
    /// Raw audio input from transport.
    InputAudioRaw(InputAudioRawFrame),
    /// Raw image input from transport.
    InputImageRaw(InputImageRawFrame),
    /// Function calls requested by the model.
    FunctionCallsStarted(FunctionCallsStartedFrame),
    /// Function call cancelled.
    FunctionCallCancel(FunctionCallCancelFrame),
    /// Transport message received.
    InputTransportMessage(InputTransportMessageFrame),
    /// Urgent transport message for immediate sending.
    OutputTransportMessageUrgent(OutputTransportMessageUrgentFrame),
    /// A participant joined.
    ParticipantJoined(ParticipantJoinedFrame),
    /// A participant left.
    ParticipantLeft(ParticipantLeftFrame),

    // ===================== DATA FRAMES =====================
    /// Text content.
    Text(TextFrame),
    /// Streamed language-model text.
    LLMText(LLMTextFrame),
    /// Final speech transcription.
    Transcription(TranscriptionFrame),
    /// Interim speech transcription.
    InterimTranscription(InterimTranscriptionFrame),
    /// Text to speak right away.
    TTSSpeak(TTSSpeakFrame),
    /// Synthesized speech audio.
    TTSAudioRaw(TTSAudioRawFrame),
    /// Audio for the participant.
    OutputAudioRaw(OutputAudioRawFrame),
    /// Single image for the video track.
    OutputImageRaw(OutputImageRawFrame),
    /// Looping image sequence for the video track.
    Sprite(SpriteFrame),
    /// Append messages to the context.
    LLMMessagesAppend(LLMMessagesAppendFrame),
    /// Replace tool schemas.
    LLMSetTools(LLMSetToolsFrame),
    /// Context snapshot; triggers generation.
    LLMContext(LLMContextFrame),
    /// Function call result.
    FunctionCallResult(FunctionCallResultFrame),
    /// Queued transport message.
    OutputTransportMessage(OutputTransportMessageFrame),

    // ===================== CONTROL FRAMES =====================
    /// Graceful end of stream.
    End(EndFrame),
    /// Language-model response start.
    LLMFullResponseStart(LLMFullResponseStartFrame),
    /// Language-model response end.
    LLMFullResponseEnd(LLMFullResponseEndFrame),
    /// Synthesis started.
    TTSStarted(TTSStartedFrame),
    /// Synthesis stopped.
    TTSStopped(TTSStoppedFrame),
    /// Function call executing.
    FunctionCallInProgress(FunctionCallInProgressFrame),
}

/// Applies `$body` to the struct inside any variant, bound as `$f`.
macro_rules! dispatch {
    ($value:expr, $f:ident => $body:expr) => {
        match $value {
            FrameEnum::Start($f) => $body,
            FrameEnum::Cancel($f) => $body,
            FrameEnum::Error($f) => $body,
            FrameEnum::Interruption($f) => $body,
            FrameEnum::UserStartedSpeaking($f) => $body,
            FrameEnum::UserStoppedSpeaking($f) => $body,
            FrameEnum::BotStartedSpeaking($f) => $body,
            FrameEnum::BotStoppedSpeaking($f) => $body,
            FrameEnum::Metrics($f) => $body,
            FrameEnum::InputAudioRaw($f) => $body,
            FrameEnum::InputImageRaw($f) => $body,
            FrameEnum::FunctionCallsStarted($f) => $body,
            FrameEnum::FunctionCallCancel($f) => $body,
            FrameEnum::InputTransportMessage($f) => $body,
            FrameEnum::OutputTransportMessageUrgent($f) => $body,
            FrameEnum::ParticipantJoined($f) => $body,
            FrameEnum::ParticipantLeft($f) => $body,
            FrameEnum::Text($f) => $body,
            FrameEnum::LLMText($f) => $body,
            FrameEnum::Transcription($f) => $body,
            FrameEnum::InterimTranscription($f) => $body,
            FrameEnum::TTSSpeak($f) => $body,
            FrameEnum::TTSAudioRaw($f) => $body,
            FrameEnum::OutputAudioRaw($f) => $body,
            FrameEnum::OutputImageRaw($f) => $body,
            FrameEnum::Sprite($f) => $body,
            FrameEnum::LLMMessagesAppend($f) => $body,
            FrameEnum::LLMSetTools($f) => $body,
            FrameEnum::LLMContext($f) => $body,
            FrameEnum::FunctionCallResult($f) => $body,
            FrameEnum::OutputTransportMessage($f) => $body,
            FrameEnum::End($f) => $body,
            FrameEnum::LLMFullResponseStart($f) => $body,
            FrameEnum::LLMFullResponseEnd($f) => $body,
            FrameEnum::TTSStarted($f) => $body,
            FrameEnum::TTSStopped($f) => $body,
            FrameEnum::FunctionCallInProgress($f) => $body,
        }
    };
}

impl FrameEnum {
    /// Get the common frame fields.
    pub fn fields(&self) -> &FrameFields {
        dispatch!(self, f => &f.fields)
    }

    /// Get mutable access to the common frame fields.
    ///
    /// Only the producer of a frame should touch these, before sending it.
    pub fn fields_mut(&mut self) -> &mut FrameFields {
        dispatch!(self, f => &mut f.fields)
    }

    /// Get the frame's unique ID.
    pub fn id(&self) -> u64 {
        self.fields().id
    }

    /// Get the frame type name (e.g., `"TextFrame"`).
    pub fn name(&self) -> &'static str {
        dispatch!(self, f => f.name())
    }

    /// Get the frame category.
    pub fn kind(&self) -> FrameKind {
        dispatch!(self, f => f.kind())
    }

    /// Returns `true` if interruptions must not discard this frame.
    pub fn is_uninterruptible(&self) -> bool {
        dispatch!(self, f => f.is_uninterruptible())
    }

    /// Returns `true` for frames that travel on the out-of-band lane and
    /// may overtake frames already queued at a stage.
    pub fn is_urgent(&self) -> bool {
        matches!(self, FrameEnum::Interruption(_) | FrameEnum::Cancel(_))
    }

    pub fn is_system_frame(&self) -> bool {
        self.kind() == FrameKind::System
    }

    pub fn is_data_frame(&self) -> bool {
        self.kind() == FrameKind::Data
    }

    pub fn is_control_frame(&self) -> bool {
        self.kind() == FrameKind::Control
    }
}

impl fmt::Display for FrameEnum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        dispatch!(self, inner => fmt::Display::fmt(inner, f))
    }
}

// ---------------------------------------------------------------------------
// From conversions
// ---------------------------------------------------------------------------

macro_rules! impl_from_frame {
    ($variant:ident, $frame_type:ident) => {
        impl From<$frame_type> for FrameEnum {
            fn from(f: $frame_type) -> Self {
                FrameEnum::$variant(f)
            }
        }
    };
}

impl_from_frame!(Start, StartFrame);
impl_from_frame!(Cancel, CancelFrame);
impl_from_frame!(Error, ErrorFrame);
impl_from_frame!(Interruption, InterruptionFrame);
impl_from_frame!(UserStartedSpeaking, UserStartedSpeakingFrame);
impl_from_frame!(UserStoppedSpeaking, UserStoppedSpeakingFrame);
impl_from_frame!(BotStartedSpeaking, BotStartedSpeakingFrame);
impl_from_frame!(BotStoppedSpeaking, BotStoppedSpeakingFrame);
impl_from_frame!(Metrics, MetricsFrame);
impl_from_frame!(InputAudioRaw, InputAudioRawFrame);
impl_from_frame!(InputImageRaw, InputImageRawFrame);
impl_from_frame!(FunctionCallsStarted, FunctionCallsStartedFrame);
impl_from_frame!(FunctionCallCancel, FunctionCallCancelFrame);
impl_from_frame!(InputTransportMessage, InputTransportMessageFrame);
impl_from_frame!(OutputTransportMessageUrgent, OutputTransportMessageUrgentFrame);
impl_from_frame!(ParticipantJoined, ParticipantJoinedFrame);
impl_from_frame!(ParticipantLeft, ParticipantLeftFrame);
impl_from_frame!(Text, TextFrame);
impl_from_frame!(LLMText, LLMTextFrame);
impl_from_frame!(Transcription, TranscriptionFrame);
impl_from_frame!(InterimTranscription, InterimTranscriptionFrame);
impl_from_frame!(TTSSpeak, TTSSpeakFrame);
impl_from_frame!(TTSAudioRaw, TTSAudioRawFrame);
impl_from_frame!(OutputAudioRaw, OutputAudioRawFrame);
impl_from_frame!(OutputImageRaw, OutputImageRawFrame);
impl_from_frame!(Sprite, SpriteFrame);
impl_from_frame!(LLMMessagesAppend, LLMMessagesAppendFrame);
impl_from_frame!(LLMSetTools, LLMSetToolsFrame);
impl_from_frame!(LLMContext, LLMContextFrame);
impl_from_frame!(FunctionCallResult, FunctionCallResultFrame);
impl_from_frame!(OutputTransportMessage, OutputTransportMessageFrame);
impl_from_frame!(End, EndFrame);
impl_from_frame!(LLMFullResponseStart, LLMFullResponseStartFrame);
impl_from_frame!(LLMFullResponseEnd, LLMFullResponseEndFrame);
impl_from_frame!(TTSStarted, TTSStartedFrame);
impl_from_frame!(TTSStopped, TTSStoppedFrame);
impl_from_frame!(FunctionCallInProgress, FunctionCallInProgressFrame);

// ---------------------------------------------------------------------------
// Convenience constructors
// ---------------------------------------------------------------------------

impl FrameEnum {
    pub fn text(text: impl Into<String>) -> Self {
        FrameEnum::Text(TextFrame::new(text))
    }

    pub fn llm_text(text: impl Into<String>) -> Self {
        FrameEnum::LLMText(LLMTextFrame::new(text))
    }

    pub fn error(error: impl Into<String>, fatal: bool) -> Self {
        FrameEnum::Error(ErrorFrame::new(error, fatal))
    }

    pub fn cancel(reason: Option<String>) -> Self {
        FrameEnum::Cancel(CancelFrame::new(reason))
    }

    pub fn end() -> Self {
        FrameEnum::End(EndFrame::new())
    }
}
