// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Soniox real-time speech-to-text provider.
//!
//! Protocol: open a WebSocket, send one JSON configuration message, then
//! stream raw `pcm_s16le` audio as binary messages. The server answers with
//! JSON messages carrying recognized tokens; tokens marked final never
//! change, the rest are a running guess. An `<end>` token closes an
//! utterance when endpoint detection is on. An empty text message asks the
//! server to finish, and it replies with `finished: true`.

use std::collections::VecDeque;
use std::fmt;

use async_trait::async_trait;
use futures_util::stream::{self, SplitSink, Stream, StreamExt};
use futures_util::SinkExt;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::ProviderError;
use crate::services::{SttConfig, SttEvent, SttEventStream, SttProvider, SttSession};
use crate::transcriptions::Language;

pub const DEFAULT_URL: &str = "wss://stt-rt.speechdev.soniox.com/transcribe-websocket";
pub const DEFAULT_MODEL: &str = "stt-rt-preview";

/// Marks the end of an utterance.
const END_TOKEN: &str = "<end>";
/// Marks a manual finalization.
const FIN_TOKEN: &str = "<fin>";

type SonioxSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

#[derive(Debug, Serialize)]
struct SonioxConfig<'a> {
    api_key: &'a str,
    model: &'a str,
    audio_format: &'static str,
    num_channels: u32,
    sample_rate: u32,
    language_hints: Vec<&'static str>,
    enable_endpoint_detection: bool,
    enable_language_identification: bool,
}

#[derive(Debug, Deserialize)]
struct SonioxToken {
    text: String,
    #[serde(default)]
    is_final: bool,
    #[serde(default)]
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SonioxResponse {
    #[serde(default)]
    tokens: Vec<SonioxToken>,
    #[serde(default)]
    finished: bool,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    error_message: Option<String>,
}

/// WebSocket speech recognition client.
#[derive(Clone)]
pub struct SonioxProvider {
    api_key: String,
    url: String,
    model: String,
}

impl SonioxProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ProviderError::Config("Soniox API key is empty".into()));
        }
        Ok(Self {
            api_key,
            url: DEFAULT_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn config_message(&self, config: &SttConfig) -> Result<String, ProviderError> {
        let message = SonioxConfig {
            api_key: &self.api_key,
            model: &self.model,
            audio_format: "pcm_s16le",
            num_channels: 1,
            sample_rate: config.sample_rate,
            language_hints: config.language_hints.iter().map(|l| l.code()).collect(),
            enable_endpoint_detection: true,
            enable_language_identification: true,
        };
        Ok(serde_json::to_string(&message)?)
    }
}

impl fmt::Debug for SonioxProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SonioxProvider")
            .field("url", &self.url)
            .field("model", &self.model)
            .finish()
    }
}

#[async_trait]
impl SttProvider for SonioxProvider {
    fn name(&self) -> &str {
        "soniox"
    }

    async fn connect(
        &self,
        config: &SttConfig,
    ) -> Result<(Box<dyn SttSession>, SttEventStream), ProviderError> {
        let config_message = self.config_message(config)?;
        let (ws, _response) = connect_async(self.url.as_str()).await?;
        let (mut sink, source) = ws.split();
        sink.send(Message::Text(config_message)).await?;
        tracing::debug!(url = %self.url, sample_rate = config.sample_rate, "soniox session opened");
        Ok((
            Box::new(SonioxSession { sink, finished: false }),
            decode_events(source, config.language_hints.clone()),
        ))
    }
}

/// Sending half of a Soniox session.
pub struct SonioxSession {
    sink: SonioxSink,
    finished: bool,
}

#[async_trait]
impl SttSession for SonioxSession {
    async fn send_audio(&mut self, audio: &[u8]) -> Result<(), ProviderError> {
        if self.finished {
            return Ok(());
        }
        self.sink.send(Message::Binary(audio.to_vec())).await?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), ProviderError> {
        if std::mem::replace(&mut self.finished, true) {
            return Ok(());
        }
        self.sink.send(Message::Text(String::new())).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Token decoding
// ---------------------------------------------------------------------------

/// Folds token messages into utterance events.
///
/// A detected language outside the configured hints is reported as unknown.
/// Without hints every supported language is accepted.
#[derive(Debug, Default)]
struct TokenDecoder {
    final_text: String,
    language: Option<Language>,
    hints: Vec<Language>,
}

impl TokenDecoder {
    fn new(hints: Vec<Language>) -> Self {
        Self {
            hints,
            ..Self::default()
        }
    }

    fn hinted(&self, language: Language) -> bool {
        self.hints.is_empty() || self.hints.contains(&language)
    }

    fn handle(&mut self, response: SonioxResponse) -> Result<Vec<SttEvent>, ProviderError> {
        if let Some(code) = response.error_code {
            let message = response.error_message.unwrap_or_default();
            return Err(ProviderError::Status {
                status: u16::try_from(code).unwrap_or(500),
                body: message,
            });
        }

        let mut events = Vec::new();
        let mut interim = String::new();
        let mut changed = false;
        for token in response.tokens {
            if token.text == END_TOKEN || token.text == FIN_TOKEN {
                events.extend(self.take_final());
                interim.clear();
                changed = false;
                continue;
            }
            if let Some(language) = token.language.as_deref().and_then(Language::from_tag) {
                self.language = self.hinted(language).then_some(language);
            }
            if token.is_final {
                self.final_text.push_str(&token.text);
            } else {
                interim.push_str(&token.text);
            }
            changed = true;
        }

        if changed {
            let text = format!("{}{}", self.final_text, interim);
            let text = text.trim();
            if !text.is_empty() {
                events.push(SttEvent::Interim {
                    text: text.to_string(),
                    language: self.language,
                });
            }
        }
        if response.finished {
            events.extend(self.take_final());
        }
        Ok(events)
    }

    fn take_final(&mut self) -> Option<SttEvent> {
        let text = std::mem::take(&mut self.final_text);
        let language = self.language.take();
        let text = text.trim();
        (!text.is_empty()).then(|| SttEvent::Final {
            text: text.to_string(),
            language,
        })
    }
}

struct DecodeState<S> {
    source: S,
    decoder: TokenDecoder,
    queue: VecDeque<SttEvent>,
    ended: bool,
}

/// Turn server messages into an [`SttEventStream`].
///
/// Ends on `finished`, on close, or after yielding an error.
fn decode_events<S>(source: S, hints: Vec<Language>) -> SttEventStream
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Send + Unpin + 'static,
{
    let state = DecodeState {
        source,
        decoder: TokenDecoder::new(hints),
        queue: VecDeque::new(),
        ended: false,
    };
    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.queue.pop_front() {
                return Some((Ok(event), state));
            }
            if state.ended {
                return None;
            }
            let text = match state.source.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(_))) | None => {
                    state.queue.extend(state.decoder.take_final());
                    state.ended = true;
                    continue;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    state.ended = true;
                    return Some((Err(e.into()), state));
                }
            };
            let response: SonioxResponse = match serde_json::from_str(&text) {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed soniox message");
                    continue;
                }
            };
            let finished = response.finished;
            match state.decoder.handle(response) {
                Ok(events) => state.queue.extend(events),
                Err(e) => {
                    state.ended = true;
                    return Some((Err(e), state));
                }
            }
            state.ended = finished;
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(value: serde_json::Value) -> SonioxResponse {
        serde_json::from_value(value).unwrap()
    }

    fn text_messages(values: Vec<serde_json::Value>) -> Vec<Result<Message, tokio_tungstenite::tungstenite::Error>> {
        values
            .into_iter()
            .map(|v| Ok(Message::Text(v.to_string())))
            .collect()
    }

    #[test]
    fn test_config_message() {
        let provider = SonioxProvider::new("key").unwrap();
        let config = SttConfig {
            sample_rate: 16000,
            language_hints: vec![Language::En, Language::Es, Language::Ja, Language::Zh],
        };
        let message: serde_json::Value =
            serde_json::from_str(&provider.config_message(&config).unwrap()).unwrap();
        assert_eq!(message["api_key"], "key");
        assert_eq!(message["model"], DEFAULT_MODEL);
        assert_eq!(message["audio_format"], "pcm_s16le");
        assert_eq!(message["num_channels"], 1);
        assert_eq!(message["sample_rate"], 16000);
        assert_eq!(message["language_hints"], json!(["en", "es", "ja", "zh"]));
        assert_eq!(message["enable_endpoint_detection"], true);
        assert_eq!(provider.url(), DEFAULT_URL);
    }

    #[test]
    fn test_interim_then_final_on_end_token() {
        let mut decoder = TokenDecoder::default();
        let events = decoder
            .handle(response(json!({"tokens": [
                {"text": "Hola", "is_final": true, "language": "es"},
                {"text": " que", "is_final": false, "language": "es"}
            ]})))
            .unwrap();
        assert_eq!(
            events,
            vec![SttEvent::Interim {
                text: "Hola que".into(),
                language: Some(Language::Es),
            }]
        );

        let events = decoder
            .handle(response(json!({"tokens": [
                {"text": " tal", "is_final": true, "language": "es"},
                {"text": "<end>", "is_final": true}
            ]})))
            .unwrap();
        assert_eq!(
            events,
            vec![SttEvent::Final {
                text: "Hola tal".into(),
                language: Some(Language::Es),
            }]
        );
    }

    #[test]
    fn test_language_outside_hints_is_unknown() {
        let mut decoder = TokenDecoder::new(vec![Language::En, Language::Es]);
        let events = decoder
            .handle(response(json!({"tokens": [
                {"text": "Bonjour", "is_final": true, "language": "fr"},
                {"text": "<end>", "is_final": true}
            ]})))
            .unwrap();
        assert_eq!(
            events,
            vec![SttEvent::Final {
                text: "Bonjour".into(),
                language: None,
            }]
        );

        let events = decoder
            .handle(response(json!({"tokens": [
                {"text": "Hello", "is_final": true, "language": "en"},
                {"text": "<end>", "is_final": true}
            ]})))
            .unwrap();
        assert_eq!(
            events,
            vec![SttEvent::Final {
                text: "Hello".into(),
                language: Some(Language::En),
            }]
        );
    }

    #[test]
    fn test_end_token_without_text_is_silent() {
        let mut decoder = TokenDecoder::default();
        let events = decoder
            .handle(response(json!({"tokens": [{"text": "<end>", "is_final": true}]})))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_error_message_becomes_error() {
        let mut decoder = TokenDecoder::default();
        let err = decoder
            .handle(response(json!({"error_code": 401, "error_message": "Invalid API key"})))
            .unwrap_err();
        assert!(matches!(err, ProviderError::Status { status: 401, ref body } if body == "Invalid API key"));
    }

    #[tokio::test]
    async fn test_event_stream_flushes_on_finished() {
        let source = stream::iter(text_messages(vec![
            json!({"tokens": [{"text": "Hello", "is_final": true, "language": "en"}]}),
            json!({"tokens": [], "finished": true}),
            json!({"tokens": [{"text": "late", "is_final": true}]}),
        ]));
        let events: Vec<_> = decode_events(source, Vec::new()).collect().await;
        let events: Vec<SttEvent> = events.into_iter().map(Result::unwrap).collect();
        assert_eq!(
            events,
            vec![
                SttEvent::Interim {
                    text: "Hello".into(),
                    language: Some(Language::En),
                },
                SttEvent::Final {
                    text: "Hello".into(),
                    language: Some(Language::En),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_event_stream_skips_malformed_messages() {
        let mut messages = vec![Ok(Message::Text("not json".to_string()))];
        messages.extend(text_messages(vec![json!({"tokens": [
            {"text": "Hi", "is_final": true},
            {"text": "<end>", "is_final": true}
        ]})]));
        let events: Vec<_> = decode_events(stream::iter(messages), Vec::new()).collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Ok(SttEvent::Final { text, language: None }) if text == "Hi"));
    }
}
