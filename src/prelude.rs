// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Common re-exports.
//!
//! ```
//! use simple_chatbot::prelude::*;
//! ```

pub use std::sync::Arc;

pub use crate::bot::{build_bot, Bot, BotProviders};
pub use crate::config::BotConfig;
pub use crate::error::{PipelineError, ProviderError};
pub use crate::frames::{
    AudioRawData, CancelFrame, EndFrame, ErrorFrame, FrameEnum, ImageRawData, InputAudioRawFrame,
    InterimTranscriptionFrame, InterruptionFrame, LLMContextFrame, LLMFullResponseEndFrame,
    LLMFullResponseStartFrame, LLMMessagesAppendFrame, LLMTextFrame, MetricsFrame,
    OutputAudioRawFrame, OutputImageRawFrame, SpriteFrame, StartFrame, TTSAudioRawFrame,
    TTSSpeakFrame, TTSStartedFrame, TTSStoppedFrame, TextFrame, TranscriptionFrame,
    UserStartedSpeakingFrame, UserStoppedSpeakingFrame,
};
pub use crate::observers::Observer;
pub use crate::pipeline::{
    ChannelPipeline, PipelineParams, PipelineRunner, PipelineTask, PipelineTaskHandle, TaskState,
};
pub use crate::processors::aggregators::context_aggregator_pair::LLMContextAggregatorPair;
pub use crate::processors::aggregators::llm_context::{LLMContext, LLMMessage};
pub use crate::processors::aggregators::sentence::SentenceAggregator;
pub use crate::processors::avatar::{AvatarAssets, TalkingAnimation};
pub use crate::processors::frameworks::{RTVIObserver, RTVIProcessor};
pub use crate::processors::function_calls::{FunctionCallBridge, FunctionOptions};
pub use crate::processors::processor::{Processor, ProcessorContext, ProcessorWeight};
pub use crate::processors::FrameDirection;
pub use crate::services::{LLMService, STTService, TTSService};
pub use crate::session::SessionRegistry;
pub use crate::transports::{Transport, TransportParams};
