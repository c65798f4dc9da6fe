// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Cartesia text-to-speech provider.
//!
//! [`CartesiaProvider`] calls `POST /tts/bytes` once per utterance and streams
//! the raw `pcm_s16le` body back as it downloads.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;

use crate::error::ProviderError;
use crate::services::{AudioStream, TtsProvider};
use crate::transcriptions::Language;

pub const DEFAULT_BASE_URL: &str = "https://api.cartesia.ai";
pub const DEFAULT_MODEL: &str = "sonic-2";
pub const DEFAULT_VOICE_ID: &str = "c45bc5ec-dc68-4feb-8829-6e6b2748095d";
pub const CARTESIA_VERSION: &str = "2024-11-13";
pub const DEFAULT_SAMPLE_RATE: u32 = 24000;

#[derive(Debug, Serialize)]
struct CartesiaVoice<'a> {
    mode: &'static str,
    id: &'a str,
}

#[derive(Debug, Serialize)]
struct CartesiaOutputFormat {
    container: &'static str,
    encoding: &'static str,
    sample_rate: u32,
}

/// JSON body for `POST /tts/bytes`.
#[derive(Debug, Serialize)]
struct CartesiaRequest<'a> {
    model_id: &'a str,
    transcript: &'a str,
    voice: CartesiaVoice<'a>,
    output_format: CartesiaOutputFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<&'static str>,
}

/// HTTP speech synthesis client.
#[derive(Clone)]
pub struct CartesiaProvider {
    api_key: String,
    voice_id: String,
    model: String,
    base_url: String,
    sample_rate: u32,
    language: Option<Language>,
    client: reqwest::Client,
}

impl CartesiaProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ProviderError::Config("Cartesia API key is empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            api_key,
            voice_id: DEFAULT_VOICE_ID.to_string(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            language: Some(Language::En),
            client,
        })
    }

    pub fn with_voice_id(mut self, voice_id: impl Into<String>) -> Self {
        self.voice_id = voice_id.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// `None` lets the service pick the language from the text.
    pub fn with_language(mut self, language: Option<Language>) -> Self {
        self.language = language;
        self
    }

    pub fn voice_id(&self) -> &str {
        &self.voice_id
    }

    fn build_request<'a>(&'a self, text: &'a str) -> CartesiaRequest<'a> {
        CartesiaRequest {
            model_id: &self.model,
            transcript: text,
            voice: CartesiaVoice {
                mode: "id",
                id: &self.voice_id,
            },
            output_format: CartesiaOutputFormat {
                container: "raw",
                encoding: "pcm_s16le",
                sample_rate: self.sample_rate,
            },
            language: self.language.map(|l| l.code()),
        }
    }
}

impl fmt::Debug for CartesiaProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CartesiaProvider")
            .field("voice_id", &self.voice_id)
            .field("model", &self.model)
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

#[async_trait]
impl TtsProvider for CartesiaProvider {
    fn name(&self) -> &str {
        "cartesia"
    }

    fn model(&self) -> Option<&str> {
        Some(&self.model)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn synthesize(&self, text: &str) -> Result<AudioStream, ProviderError> {
        let url = format!("{}/tts/bytes", self.base_url);
        tracing::debug!(voice = %self.voice_id, chars = text.chars().count(), "requesting speech");

        let response = self
            .client
            .post(&url)
            .header("Cartesia-Version", CARTESIA_VERSION)
            .header("X-API-Key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&self.build_request(text))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "unknown".to_string());
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut aligner = SampleAligner::default();
        let audio = response
            .bytes_stream()
            .map(move |chunk| {
                chunk
                    .map(|bytes| aligner.push(&bytes))
                    .map_err(ProviderError::from)
            })
            .filter(|chunk| {
                let keep = !matches!(chunk, Ok(audio) if audio.is_empty());
                async move { keep }
            });
        Ok(audio.boxed())
    }
}

/// Keeps 16-bit samples whole when the network splits a chunk mid-sample.
#[derive(Debug, Default)]
struct SampleAligner {
    carry: Option<u8>,
}

impl SampleAligner {
    fn push(&mut self, bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(bytes.len() + 1);
        out.extend(self.carry.take());
        out.extend_from_slice(bytes);
        if out.len() % 2 == 1 {
            self.carry = out.pop();
        }
        out
    }
}

/// A one-shot [`AudioStream`] over already-synthesized audio.
pub fn audio_stream(chunks: Vec<Vec<u8>>) -> AudioStream {
    stream::iter(chunks.into_iter().map(Ok)).boxed()
}
