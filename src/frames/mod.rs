// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Core frame definitions for the chatbot pipeline.
//!
//! Every unit of data that moves between stages is a frame. Frames are
//! immutable once built: stages consume them and may emit new ones, but never
//! edit a frame in place. All frame structs are wrapped by the closed
//! [`FrameEnum`] so every stage matches on them exhaustively.
//!
//! # Frame categories
//!
//! - **System** frames are lifecycle and signalling frames (start, cancel,
//!   speaking state, raw input).
//! - **Data** frames carry content (text, audio, images, context snapshots).
//! - **Control** frames bracket content (response start/end, TTS start/stop,
//!   end of stream).
//!
//! Independently of the category, a frame may be **uninterruptible** (never
//! discarded by an interruption flush) and **urgent** (travels on the
//! out-of-band lane and may overtake queued frames).

pub mod frame_enum;
pub use frame_enum::FrameEnum;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::metrics::MetricsData;
use crate::processors::aggregators::llm_context::{LLMContext, LLMMessage};
use crate::transcriptions::Language;
use crate::utils::base_object::obj_id;

// ---------------------------------------------------------------------------
// Presentation timestamp helpers
// ---------------------------------------------------------------------------

/// Format a presentation timestamp (nanoseconds) as `secs.nanos`.
pub fn format_pts(pts: Option<u64>) -> String {
    match pts {
        Some(ns) => format!("{}.{:09}", ns / 1_000_000_000, ns % 1_000_000_000),
        None => "None".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Frame category enum
// ---------------------------------------------------------------------------

/// Categorizes a frame into one of the primary processing categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameKind {
    /// Lifecycle and signalling frames.
    System,
    /// Content frames, discarded by interruptions unless uninterruptible.
    Data,
    /// Bracketing frames, discarded by interruptions unless uninterruptible.
    Control,
}

// ---------------------------------------------------------------------------
// Embedded payloads
// ---------------------------------------------------------------------------

/// Raw PCM audio carried by audio frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioRawData {
    /// Interleaved signed 16-bit little-endian samples.
    pub audio: Vec<u8>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of channels.
    pub num_channels: u32,
    /// Number of sample frames (samples per channel).
    pub num_frames: u32,
}

impl AudioRawData {
    /// Create audio data, computing `num_frames` from the byte length.
    pub fn new(audio: Vec<u8>, sample_rate: u32, num_channels: u32) -> Self {
        let bytes_per_frame = (num_channels as usize).saturating_mul(2);
        let num_frames = if bytes_per_frame == 0 {
            0
        } else {
            (audio.len() / bytes_per_frame).min(u32::MAX as usize) as u32
        };
        Self {
            audio,
            sample_rate,
            num_channels,
            num_frames,
        }
    }

    /// Playback duration of this chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.num_frames as f64 / self.sample_rate as f64
    }
}

/// Raw image carried by image frames.
///
/// Pixel buffers are reference counted because the avatar replays the same
/// images for every speaking turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRawData {
    /// Raw pixel bytes.
    pub image: Arc<[u8]>,
    /// Image dimensions as (width, height).
    pub size: (u32, u32),
    /// Pixel format (e.g. "RGB").
    pub format: Option<String>,
}

impl ImageRawData {
    pub fn new(image: impl Into<Arc<[u8]>>, size: (u32, u32), format: Option<String>) -> Self {
        Self {
            image: image.into(),
            size,
            format,
        }
    }
}

/// A function call requested by the language model.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCallFromLLM {
    /// Name of the function to call.
    pub function_name: String,
    /// Identifier the model assigned to this call.
    pub tool_call_id: String,
    /// Parsed JSON arguments.
    pub arguments: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Frame trait
// ---------------------------------------------------------------------------

/// Behaviour shared by every frame struct.
///
/// Implemented through the `impl_*_frame!` macros below; [`FrameEnum`]
/// dispatches to it.
pub trait Frame: fmt::Debug + fmt::Display + Send + Sync {
    /// Unique numeric identifier for this frame instance.
    fn id(&self) -> u64;

    /// Type name (e.g. `"TextFrame"`).
    fn name(&self) -> &'static str;

    /// Presentation timestamp in nanoseconds, or `None`.
    fn pts(&self) -> Option<u64>;

    /// The frame's category.
    fn kind(&self) -> FrameKind;

    /// Returns `true` if an interruption must not discard this frame.
    fn is_uninterruptible(&self) -> bool {
        false
    }
}

/// Identity and timing fields embedded in every frame struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameFields {
    pub id: u64,
    pub pts: Option<u64>,
}

impl FrameFields {
    /// Create fields with a fresh unique id.
    pub fn new() -> Self {
        Self {
            id: obj_id(),
            pts: None,
        }
    }
}

impl Default for FrameFields {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Macros for reducing frame boilerplate
// ---------------------------------------------------------------------------

macro_rules! impl_frame_common {
    ($name:ident) => {
        fn id(&self) -> u64 {
            self.fields.id
        }
        fn name(&self) -> &'static str {
            stringify!($name)
        }
        fn pts(&self) -> Option<u64> {
            self.fields.pts
        }
    };
}

/// Implements [`Frame`] for a system frame.
macro_rules! impl_system_frame {
    ($name:ident) => {
        impl Frame for $name {
            impl_frame_common!($name);
            fn kind(&self) -> FrameKind {
                FrameKind::System
            }
        }
    };
}

/// Implements [`Frame`] for a data frame.
macro_rules! impl_data_frame {
    ($name:ident) => {
        impl Frame for $name {
            impl_frame_common!($name);
            fn kind(&self) -> FrameKind {
                FrameKind::Data
            }
        }
    };
}

/// Implements [`Frame`] for a control frame.
macro_rules! impl_control_frame {
    ($name:ident) => {
        impl Frame for $name {
            impl_frame_common!($name);
            fn kind(&self) -> FrameKind {
                FrameKind::Control
            }
        }
    };
}

/// Implements [`Frame`] for a frame that survives interruptions.
macro_rules! impl_uninterruptible_frame {
    ($name:ident, $kind:ident) => {
        impl Frame for $name {
            impl_frame_common!($name);
            fn kind(&self) -> FrameKind {
                FrameKind::$kind
            }
            fn is_uninterruptible(&self) -> bool {
                true
            }
        }
    };
}

/// Display showing just the frame name.
macro_rules! impl_frame_display_simple {
    ($name:ident) => {
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", stringify!($name))
            }
        }
    };
}

/// Display showing the frame name and its `text` field.
macro_rules! impl_frame_display_text {
    ($name:ident) => {
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(text: [{}])", stringify!($name), self.text)
            }
        }
    };
}

/// Declares a payload-free frame struct with `new()`/`Default`.
macro_rules! declare_simple_frame {
    ($(#[$meta:meta])* $name:ident, $kind:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name {
            pub fields: FrameFields,
        }
        impl $name {
            pub fn new() -> Self {
                Self { fields: FrameFields::new() }
            }
        }
        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
        impl_frame_display_simple!($name);
        impl Frame for $name {
            impl_frame_common!($name);
            fn kind(&self) -> FrameKind {
                FrameKind::$kind
            }
        }
    };
}

// =========================================================================
// SYSTEM FRAMES
// =========================================================================

/// First frame pushed through a pipeline; carries the task parameters.
#[derive(Debug, Clone)]
pub struct StartFrame {
    pub fields: FrameFields,
    /// Input audio sample rate in Hz.
    pub audio_in_sample_rate: u32,
    /// Output audio sample rate in Hz.
    pub audio_out_sample_rate: u32,
    /// Whether a new user turn may interrupt the bot.
    pub allow_interruptions: bool,
    /// Whether stages should report TTFB metrics.
    pub enable_metrics: bool,
    /// Whether stages should report usage metrics.
    pub enable_usage_metrics: bool,
}

impl StartFrame {
    pub fn new(
        audio_in_sample_rate: u32,
        audio_out_sample_rate: u32,
        allow_interruptions: bool,
        enable_metrics: bool,
        enable_usage_metrics: bool,
    ) -> Self {
        Self {
            fields: FrameFields::new(),
            audio_in_sample_rate,
            audio_out_sample_rate,
            allow_interruptions,
            enable_metrics,
            enable_usage_metrics,
        }
    }
}

impl Default for StartFrame {
    fn default() -> Self {
        Self::new(16000, 24000, false, false, false)
    }
}

impl fmt::Display for StartFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StartFrame(in: {}, out: {}, interruptions: {})",
            self.audio_in_sample_rate, self.audio_out_sample_rate, self.allow_interruptions
        )
    }
}

impl_uninterruptible_frame!(StartFrame, System);

/// Request to stop the pipeline immediately.
#[derive(Debug, Clone)]
pub struct CancelFrame {
    pub fields: FrameFields,
    /// Optional reason for the cancellation.
    pub reason: Option<String>,
}

impl CancelFrame {
    pub fn new(reason: Option<String>) -> Self {
        Self {
            fields: FrameFields::new(),
            reason,
        }
    }
}

impl Default for CancelFrame {
    fn default() -> Self {
        Self::new(None)
    }
}

impl fmt::Display for CancelFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CancelFrame(reason: {:?})", self.reason)
    }
}

impl_system_frame!(CancelFrame);

/// Error notification, normally travelling upstream.
///
/// A fatal error ends the task.
#[derive(Debug, Clone)]
pub struct ErrorFrame {
    pub fields: FrameFields,
    /// Description of the error.
    pub error: String,
    /// Whether the error is unrecoverable.
    pub fatal: bool,
}

impl ErrorFrame {
    pub fn new(error: impl Into<String>, fatal: bool) -> Self {
        Self {
            fields: FrameFields::new(),
            error: error.into(),
            fatal,
        }
    }

    /// Convenience constructor for recoverable errors.
    pub fn non_fatal(error: impl Into<String>) -> Self {
        Self::new(error, false)
    }
}

impl fmt::Display for ErrorFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ErrorFrame(error: {}, fatal: {})", self.error, self.fatal)
    }
}

impl_system_frame!(ErrorFrame);

declare_simple_frame!(
    /// The user took the floor; in-flight bot output must stop.
    InterruptionFrame, System
);

declare_simple_frame!(
    /// The user started speaking.
    UserStartedSpeakingFrame, System
);

declare_simple_frame!(
    /// The user stopped speaking.
    UserStoppedSpeakingFrame, System
);

declare_simple_frame!(
    /// The bot started producing audio.
    BotStartedSpeakingFrame, System
);

declare_simple_frame!(
    /// The bot finished producing audio.
    BotStoppedSpeakingFrame, System
);

/// Performance and usage metrics.
#[derive(Debug, Clone)]
pub struct MetricsFrame {
    pub fields: FrameFields,
    pub data: Vec<MetricsData>,
}

impl MetricsFrame {
    pub fn new(data: Vec<MetricsData>) -> Self {
        Self {
            fields: FrameFields::new(),
            data,
        }
    }
}

impl_frame_display_simple!(MetricsFrame);
impl_system_frame!(MetricsFrame);

/// Raw audio received from the participant.
#[derive(Debug, Clone)]
pub struct InputAudioRawFrame {
    pub fields: FrameFields,
    pub audio: AudioRawData,
}

impl InputAudioRawFrame {
    pub fn new(audio: Vec<u8>, sample_rate: u32, num_channels: u32) -> Self {
        Self {
            fields: FrameFields::new(),
            audio: AudioRawData::new(audio, sample_rate, num_channels),
        }
    }
}

impl fmt::Display for InputAudioRawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InputAudioRawFrame(pts: {}, size: {}, frames: {}, sample_rate: {}, channels: {})",
            format_pts(self.fields.pts),
            self.audio.audio.len(),
            self.audio.num_frames,
            self.audio.sample_rate,
            self.audio.num_channels
        )
    }
}

impl_system_frame!(InputAudioRawFrame);

/// Raw video image received from the participant.
#[derive(Debug, Clone)]
pub struct InputImageRawFrame {
    pub fields: FrameFields,
    pub image: ImageRawData,
}

impl InputImageRawFrame {
    pub fn new(image: ImageRawData) -> Self {
        Self {
            fields: FrameFields::new(),
            image,
        }
    }
}

impl fmt::Display for InputImageRawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InputImageRawFrame(size: {:?}, format: {:?})",
            self.image.size, self.image.format
        )
    }
}

impl_system_frame!(InputImageRawFrame);

/// The language model requested one or more function calls.
#[derive(Debug, Clone)]
pub struct FunctionCallsStartedFrame {
    pub fields: FrameFields,
    pub function_calls: Vec<FunctionCallFromLLM>,
}

impl FunctionCallsStartedFrame {
    pub fn new(function_calls: Vec<FunctionCallFromLLM>) -> Self {
        Self {
            fields: FrameFields::new(),
            function_calls,
        }
    }
}

impl fmt::Display for FunctionCallsStartedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self
            .function_calls
            .iter()
            .map(|c| c.function_name.as_str())
            .collect();
        write!(f, "FunctionCallsStartedFrame(calls: {:?})", names)
    }
}

impl_system_frame!(FunctionCallsStartedFrame);

/// A running function call was abandoned.
#[derive(Debug, Clone)]
pub struct FunctionCallCancelFrame {
    pub fields: FrameFields,
    pub function_name: String,
    pub tool_call_id: String,
}

impl FunctionCallCancelFrame {
    pub fn new(function_name: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            fields: FrameFields::new(),
            function_name: function_name.into(),
            tool_call_id: tool_call_id.into(),
        }
    }
}

impl_frame_display_simple!(FunctionCallCancelFrame);
impl_system_frame!(FunctionCallCancelFrame);

/// Application message received from the client.
#[derive(Debug, Clone)]
pub struct InputTransportMessageFrame {
    pub fields: FrameFields,
    pub message: serde_json::Value,
}

impl InputTransportMessageFrame {
    pub fn new(message: serde_json::Value) -> Self {
        Self {
            fields: FrameFields::new(),
            message,
        }
    }
}

impl fmt::Display for InputTransportMessageFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InputTransportMessageFrame(message: {})", self.message)
    }
}

impl_system_frame!(InputTransportMessageFrame);

/// Application message for the client that skips queued output.
#[derive(Debug, Clone)]
pub struct OutputTransportMessageUrgentFrame {
    pub fields: FrameFields,
    pub message: serde_json::Value,
}

impl OutputTransportMessageUrgentFrame {
    pub fn new(message: serde_json::Value) -> Self {
        Self {
            fields: FrameFields::new(),
            message,
        }
    }
}

impl fmt::Display for OutputTransportMessageUrgentFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutputTransportMessageUrgentFrame(message: {})", self.message)
    }
}

impl_system_frame!(OutputTransportMessageUrgentFrame);

/// A participant joined the session.
#[derive(Debug, Clone)]
pub struct ParticipantJoinedFrame {
    pub fields: FrameFields,
    pub participant_id: String,
    pub name: Option<String>,
}

impl ParticipantJoinedFrame {
    pub fn new(participant_id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            fields: FrameFields::new(),
            participant_id: participant_id.into(),
            name,
        }
    }
}

impl fmt::Display for ParticipantJoinedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParticipantJoinedFrame(id: {})", self.participant_id)
    }
}

impl_system_frame!(ParticipantJoinedFrame);

/// A participant left the session.
#[derive(Debug, Clone)]
pub struct ParticipantLeftFrame {
    pub fields: FrameFields,
    pub participant_id: String,
    pub reason: String,
}

impl ParticipantLeftFrame {
    pub fn new(participant_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            fields: FrameFields::new(),
            participant_id: participant_id.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ParticipantLeftFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ParticipantLeftFrame(id: {}, reason: {})",
            self.participant_id, self.reason
        )
    }
}

impl_system_frame!(ParticipantLeftFrame);

// =========================================================================
// DATA FRAMES
// =========================================================================

/// Plain text flowing through the pipeline.
#[derive(Debug, Clone)]
pub struct TextFrame {
    pub fields: FrameFields,
    pub text: String,
}

impl TextFrame {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            fields: FrameFields::new(),
            text: text.into(),
        }
    }
}

impl From<&str> for TextFrame {
    fn from(text: &str) -> Self {
        TextFrame::new(text)
    }
}

impl_frame_display_text!(TextFrame);
impl_data_frame!(TextFrame);

/// One streamed segment of a language-model reply.
///
/// Segments already include their own inter-word spacing.
#[derive(Debug, Clone)]
pub struct LLMTextFrame {
    pub fields: FrameFields,
    pub text: String,
}

impl LLMTextFrame {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            fields: FrameFields::new(),
            text: text.into(),
        }
    }
}

impl_frame_display_text!(LLMTextFrame);
impl_data_frame!(LLMTextFrame);

/// Final transcript of a user utterance.
#[derive(Debug, Clone)]
pub struct TranscriptionFrame {
    pub fields: FrameFields,
    pub text: String,
    /// Identifier of the participant who spoke.
    pub user_id: String,
    /// When the transcript was produced.
    pub timestamp: String,
    /// Detected language, drawn from the configured hints.
    pub language: Option<Language>,
}

impl TranscriptionFrame {
    pub fn new(
        text: impl Into<String>,
        user_id: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            fields: FrameFields::new(),
            text: text.into(),
            user_id: user_id.into(),
            timestamp: timestamp.into(),
            language: None,
        }
    }

    pub fn with_language(mut self, language: Option<Language>) -> Self {
        self.language = language;
        self
    }
}

impl fmt::Display for TranscriptionFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TranscriptionFrame(user: {}, text: [{}], language: {:?}, timestamp: {})",
            self.user_id, self.text, self.language, self.timestamp
        )
    }
}

impl_data_frame!(TranscriptionFrame);

/// Partial (non-final) transcript that may still change.
#[derive(Debug, Clone)]
pub struct InterimTranscriptionFrame {
    pub fields: FrameFields,
    pub text: String,
    pub user_id: String,
    pub timestamp: String,
    pub language: Option<Language>,
}

impl InterimTranscriptionFrame {
    pub fn new(
        text: impl Into<String>,
        user_id: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            fields: FrameFields::new(),
            text: text.into(),
            user_id: user_id.into(),
            timestamp: timestamp.into(),
            language: None,
        }
    }

    pub fn with_language(mut self, language: Option<Language>) -> Self {
        self.language = language;
        self
    }
}

impl fmt::Display for InterimTranscriptionFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InterimTranscriptionFrame(user: {}, text: [{}], language: {:?})",
            self.user_id, self.text, self.language
        )
    }
}

impl_data_frame!(InterimTranscriptionFrame);

/// Text the bot should say out loud right away.
#[derive(Debug, Clone)]
pub struct TTSSpeakFrame {
    pub fields: FrameFields,
    pub text: String,
}

impl TTSSpeakFrame {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            fields: FrameFields::new(),
            text: text.into(),
        }
    }
}

impl_frame_display_text!(TTSSpeakFrame);
impl_data_frame!(TTSSpeakFrame);

/// Synthesized speech produced by the TTS stage.
#[derive(Debug, Clone)]
pub struct TTSAudioRawFrame {
    pub fields: FrameFields,
    pub audio: AudioRawData,
    /// The utterance this chunk belongs to.
    pub context_id: Option<String>,
}

impl TTSAudioRawFrame {
    pub fn new(audio: Vec<u8>, sample_rate: u32, num_channels: u32) -> Self {
        Self {
            fields: FrameFields::new(),
            audio: AudioRawData::new(audio, sample_rate, num_channels),
            context_id: None,
        }
    }
}

impl fmt::Display for TTSAudioRawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TTSAudioRawFrame(pts: {}, size: {}, sample_rate: {}, context: {:?})",
            format_pts(self.fields.pts),
            self.audio.audio.len(),
            self.audio.sample_rate,
            self.context_id
        )
    }
}

impl_data_frame!(TTSAudioRawFrame);

/// Audio to be played to the participant.
#[derive(Debug, Clone)]
pub struct OutputAudioRawFrame {
    pub fields: FrameFields,
    pub audio: AudioRawData,
}

impl OutputAudioRawFrame {
    pub fn new(audio: Vec<u8>, sample_rate: u32, num_channels: u32) -> Self {
        Self {
            fields: FrameFields::new(),
            audio: AudioRawData::new(audio, sample_rate, num_channels),
        }
    }
}

impl fmt::Display for OutputAudioRawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OutputAudioRawFrame(pts: {}, size: {}, sample_rate: {})",
            format_pts(self.fields.pts),
            self.audio.audio.len(),
            self.audio.sample_rate
        )
    }
}

impl_data_frame!(OutputAudioRawFrame);

/// A single image to show on the bot's video track.
#[derive(Debug, Clone)]
pub struct OutputImageRawFrame {
    pub fields: FrameFields,
    pub image: ImageRawData,
}

impl OutputImageRawFrame {
    pub fn new(image: ImageRawData) -> Self {
        Self {
            fields: FrameFields::new(),
            image,
        }
    }
}

impl fmt::Display for OutputImageRawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OutputImageRawFrame(size: {:?}, format: {:?})",
            self.image.size, self.image.format
        )
    }
}

impl_data_frame!(OutputImageRawFrame);

/// An image sequence the output transport plays in a loop.
#[derive(Debug, Clone)]
pub struct SpriteFrame {
    pub fields: FrameFields,
    pub images: Vec<ImageRawData>,
}

impl SpriteFrame {
    pub fn new(images: Vec<ImageRawData>) -> Self {
        Self {
            fields: FrameFields::new(),
            images,
        }
    }
}

impl fmt::Display for SpriteFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpriteFrame(size: {})", self.images.len())
    }
}

impl_data_frame!(SpriteFrame);

/// Messages to append to the conversation context.
#[derive(Debug, Clone)]
pub struct LLMMessagesAppendFrame {
    pub fields: FrameFields,
    pub messages: Vec<LLMMessage>,
    /// Whether appending should also trigger a generation.
    pub run_llm: bool,
}

impl LLMMessagesAppendFrame {
    pub fn new(messages: Vec<LLMMessage>) -> Self {
        Self {
            fields: FrameFields::new(),
            messages,
            run_llm: false,
        }
    }

    pub fn with_run_llm(mut self, run_llm: bool) -> Self {
        self.run_llm = run_llm;
        self
    }
}

impl fmt::Display for LLMMessagesAppendFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LLMMessagesAppendFrame(messages: {})", self.messages.len())
    }
}

impl_data_frame!(LLMMessagesAppendFrame);

/// Replaces the tool schemas offered to the language model.
#[derive(Debug, Clone)]
pub struct LLMSetToolsFrame {
    pub fields: FrameFields,
    pub tools: Vec<serde_json::Value>,
}

impl LLMSetToolsFrame {
    pub fn new(tools: Vec<serde_json::Value>) -> Self {
        Self {
            fields: FrameFields::new(),
            tools,
        }
    }
}

impl_frame_display_simple!(LLMSetToolsFrame);
impl_data_frame!(LLMSetToolsFrame);

/// Snapshot of the conversation context; starts or resumes a generation.
#[derive(Debug, Clone)]
pub struct LLMContextFrame {
    pub fields: FrameFields,
    pub context: LLMContext,
}

impl LLMContextFrame {
    pub fn new(context: LLMContext) -> Self {
        Self {
            fields: FrameFields::new(),
            context,
        }
    }
}

impl fmt::Display for LLMContextFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LLMContextFrame(messages: {}, tools: {})",
            self.context.message_count(),
            self.context.tools().len()
        )
    }
}

impl_data_frame!(LLMContextFrame);

/// Outcome of a function call, fed back into the conversation.
#[derive(Debug, Clone)]
pub struct FunctionCallResultFrame {
    pub fields: FrameFields,
    pub function_name: String,
    pub tool_call_id: String,
    pub arguments: serde_json::Value,
    /// The function's JSON result, or `{"error": ...}` on failure.
    pub result: serde_json::Value,
}

impl FunctionCallResultFrame {
    pub fn new(
        function_name: impl Into<String>,
        tool_call_id: impl Into<String>,
        arguments: serde_json::Value,
        result: serde_json::Value,
    ) -> Self {
        Self {
            fields: FrameFields::new(),
            function_name: function_name.into(),
            tool_call_id: tool_call_id.into(),
            arguments,
            result,
        }
    }

    /// Whether the result carries an error payload.
    pub fn is_error(&self) -> bool {
        self.result.get("error").is_some()
    }
}

impl fmt::Display for FunctionCallResultFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FunctionCallResultFrame(function: {}, id: {}, result: {})",
            self.function_name, self.tool_call_id, self.result
        )
    }
}

impl_uninterruptible_frame!(FunctionCallResultFrame, Data);

/// Application message for the client, queued behind other output.
#[derive(Debug, Clone)]
pub struct OutputTransportMessageFrame {
    pub fields: FrameFields,
    pub message: serde_json::Value,
}

impl OutputTransportMessageFrame {
    pub fn new(message: serde_json::Value) -> Self {
        Self {
            fields: FrameFields::new(),
            message,
        }
    }
}

impl fmt::Display for OutputTransportMessageFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutputTransportMessageFrame(message: {})", self.message)
    }
}

impl_data_frame!(OutputTransportMessageFrame);

// =========================================================================
// CONTROL FRAMES
// =========================================================================

/// Graceful end of the stream; stages finish pending work first.
#[derive(Debug, Clone)]
pub struct EndFrame {
    pub fields: FrameFields,
    pub reason: Option<String>,
}

impl EndFrame {
    pub fn new() -> Self {
        Self {
            fields: FrameFields::new(),
            reason: None,
        }
    }

    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            fields: FrameFields::new(),
            reason: Some(reason.into()),
        }
    }
}

impl Default for EndFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EndFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EndFrame(reason: {:?})", self.reason)
    }
}

impl_uninterruptible_frame!(EndFrame, Control);

declare_simple_frame!(
    /// A language-model reply begins.
    LLMFullResponseStartFrame, Control
);

declare_simple_frame!(
    /// A language-model reply is complete.
    LLMFullResponseEndFrame, Control
);

/// Synthesis of one utterance begins.
#[derive(Debug, Clone)]
pub struct TTSStartedFrame {
    pub fields: FrameFields,
    pub context_id: Option<String>,
}

impl TTSStartedFrame {
    pub fn new(context_id: Option<String>) -> Self {
        Self {
            fields: FrameFields::new(),
            context_id,
        }
    }
}

impl_frame_display_simple!(TTSStartedFrame);
impl_control_frame!(TTSStartedFrame);

/// Synthesis of one utterance is complete.
#[derive(Debug, Clone)]
pub struct TTSStoppedFrame {
    pub fields: FrameFields,
    pub context_id: Option<String>,
}

impl TTSStoppedFrame {
    pub fn new(context_id: Option<String>) -> Self {
        Self {
            fields: FrameFields::new(),
            context_id,
        }
    }
}

impl_frame_display_simple!(TTSStoppedFrame);
impl_control_frame!(TTSStoppedFrame);

/// A function call is executing.
#[derive(Debug, Clone)]
pub struct FunctionCallInProgressFrame {
    pub fields: FrameFields,
    pub function_name: String,
    pub tool_call_id: String,
    pub arguments: serde_json::Value,
    /// Whether an interruption abandons this call.
    pub cancel_on_interruption: bool,
}

impl FunctionCallInProgressFrame {
    pub fn new(
        function_name: impl Into<String>,
        tool_call_id: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            fields: FrameFields::new(),
            function_name: function_name.into(),
            tool_call_id: tool_call_id.into(),
            arguments,
            cancel_on_interruption: false,
        }
    }
}

impl fmt::Display for FunctionCallInProgressFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FunctionCallInProgressFrame(function: {}, id: {})",
            self.function_name, self.tool_call_id
        )
    }
}

impl_uninterruptible_frame!(FunctionCallInProgressFrame, Control);

// =========================================================================
// TESTS
// =========================================================================
