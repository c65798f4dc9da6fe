// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Speech and language-model services.
//!
//! Each capability is split in two:
//!
//! - a **provider** trait ([`LlmProvider`], [`TtsProvider`], [`SttProvider`])
//!   that talks to one vendor API and knows nothing about frames, and
//! - a pipeline **stage** ([`llm::LLMService`], [`tts::TTSService`],
//!   [`stt::STTService`]) generic over its provider, which turns frames into
//!   provider calls and provider output back into frames.
//!
//! Tests and demos swap in mock providers without touching the stages.

pub mod cartesia;
pub mod llm;
pub mod openai;
pub mod shared;
pub mod soniox;
pub mod stt;
pub mod tts;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde_json::Value;

use crate::error::ProviderError;
use crate::frames::StartFrame;
use crate::metrics::LLMTokenUsage;
use crate::processors::aggregators::llm_context::LLMContext;
use crate::transcriptions::Language;

pub use cartesia::CartesiaProvider;
pub use llm::LLMService;
pub use openai::OpenAiProvider;
pub use soniox::SonioxProvider;
pub use stt::STTService;
pub use tts::TTSService;

/// Which metrics a service stage reports, taken from the `StartFrame`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSettings {
    pub ttfb: bool,
    pub usage: bool,
}

impl MetricsSettings {
    pub fn from_start(start: &StartFrame) -> Self {
        Self {
            ttfb: start.enable_metrics,
            usage: start.enable_usage_metrics,
        }
    }
}

// ---------------------------------------------------------------------------
// Language model
// ---------------------------------------------------------------------------

/// One item of a streamed model response.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmChunk {
    /// A piece of reply text.
    Text(String),
    /// A complete tool call.
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    /// Token usage for the whole generation.
    Usage(LLMTokenUsage),
}

/// Streamed model response.
pub type LlmStream = BoxStream<'static, Result<LlmChunk, ProviderError>>;

/// A chat-completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync + 'static {
    /// Vendor name for logs and metrics.
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Start generating a reply to `context`.
    async fn stream(&self, context: &LLMContext) -> Result<LlmStream, ProviderError>;
}

// ---------------------------------------------------------------------------
// Text to speech
// ---------------------------------------------------------------------------

/// Raw 16-bit mono PCM chunks at the provider's sample rate.
pub type AudioStream = BoxStream<'static, Result<Vec<u8>, ProviderError>>;

/// A speech synthesis backend.
#[async_trait]
pub trait TtsProvider: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn model(&self) -> Option<&str> {
        None
    }

    /// Sample rate of the audio returned by [`synthesize`](Self::synthesize).
    fn sample_rate(&self) -> u32;

    async fn synthesize(&self, text: &str) -> Result<AudioStream, ProviderError>;
}

// ---------------------------------------------------------------------------
// Speech to text
// ---------------------------------------------------------------------------

/// Settings for one transcription session.
#[derive(Debug, Clone, PartialEq)]
pub struct SttConfig {
    /// Sample rate of the audio that will be sent.
    pub sample_rate: u32,
    /// Languages the speaker is expected to use.
    pub language_hints: Vec<Language>,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            language_hints: vec![Language::En],
        }
    }
}

/// Transcription output.
#[derive(Debug, Clone, PartialEq)]
pub enum SttEvent {
    /// Text recognized so far in the current utterance; may still change.
    Interim {
        text: String,
        language: Option<Language>,
    },
    /// The finished utterance.
    Final {
        text: String,
        language: Option<Language>,
    },
}

/// Stream of transcription results for one session.
pub type SttEventStream = BoxStream<'static, Result<SttEvent, ProviderError>>;

/// The sending half of an open transcription session.
#[async_trait]
pub trait SttSession: Send {
    async fn send_audio(&mut self, audio: &[u8]) -> Result<(), ProviderError>;

    /// Flush pending audio and close the session.
    async fn finish(&mut self) -> Result<(), ProviderError>;
}

/// A streaming speech recognition backend.
#[async_trait]
pub trait SttProvider: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Open a session. Results arrive on the returned stream.
    async fn connect(
        &self,
        config: &SttConfig,
    ) -> Result<(Box<dyn SttSession>, SttEventStream), ProviderError>;
}
