// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Speech-to-text pipeline stage.
//!
//! [`STTService`] opens a transcription session when the pipeline starts and
//! streams every `InputAudioRawFrame` into it. Results come back on a
//! background task and are emitted downstream as
//!
//! ```text
//! UserStartedSpeaking, InterimTranscription*, UserStoppedSpeaking, Transcription
//! ```
//!
//! one group per utterance, each transcript tagged with the detected
//! language. Results survive interruptions; only a cancel stops them.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::frames::frame_enum::FrameEnum;
use crate::frames::{
    ErrorFrame, InterimTranscriptionFrame, TranscriptionFrame, UserStartedSpeakingFrame,
    UserStoppedSpeakingFrame,
};
use crate::processors::processor::{FrameEmitter, Processor, ProcessorContext, ProcessorWeight};
use crate::processors::FrameDirection;
use crate::services::{SttConfig, SttEvent, SttEventStream, SttProvider};
use crate::transcriptions::Language;
use crate::utils::base_object::obj_id;
use crate::utils::helpers::now_iso8601;

/// How long End waits for the provider to deliver its last results.
const FINISH_TIMEOUT: Duration = Duration::from_secs(5);

enum SessionCommand {
    Audio(Vec<u8>),
    Finish,
}

struct Session {
    commands: mpsc::UnboundedSender<SessionCommand>,
    handle: JoinHandle<()>,
}

/// Transcribes user audio through an [`SttProvider`].
pub struct STTService<P: SttProvider> {
    id: u64,
    name: String,
    provider: Arc<P>,
    language_hints: Vec<Language>,
    user_id: String,
    session: Option<Session>,
}

impl<P: SttProvider> STTService<P> {
    pub fn new(provider: P) -> Self {
        let name = format!("STTService({})", provider.name());
        Self {
            id: obj_id(),
            name,
            provider: Arc::new(provider),
            language_hints: SttConfig::default().language_hints,
            user_id: "user".to_string(),
            session: None,
        }
    }

    /// Languages the speaker is expected to use.
    pub fn with_language_hints(mut self, hints: Vec<Language>) -> Self {
        self.language_hints = hints;
        self
    }

    /// Identifier stamped on emitted transcripts.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn language_hints(&self) -> &[Language] {
        &self.language_hints
    }

    fn open_session(&mut self, sample_rate: u32, ctx: &ProcessorContext) {
        self.abort_session();
        let config = SttConfig {
            sample_rate,
            language_hints: self.language_hints.clone(),
        };
        let (commands, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_session(
            self.provider.clone(),
            config,
            rx,
            ctx.persistent_emitter(),
            self.name.clone(),
            self.user_id.clone(),
        ));
        self.session = Some(Session { commands, handle });
    }

    fn abort_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.handle.abort();
        }
    }

    /// Ask the provider for its last results and wait for them, bounded by
    /// [`FINISH_TIMEOUT`] and by urgent frames.
    async fn finish_session(&mut self, ctx: &ProcessorContext) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        let _ = session.commands.send(SessionCommand::Finish);
        tokio::select! {
            result = tokio::time::timeout(FINISH_TIMEOUT, &mut session.handle) => {
                if result.is_err() {
                    tracing::warn!(processor = %self.name, "transcription session did not finish in time");
                    session.handle.abort();
                }
            }
            _ = ctx.interruption_token().cancelled() => {
                session.handle.abort();
            }
        }
    }
}

async fn run_session<P: SttProvider>(
    provider: Arc<P>,
    config: SttConfig,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    emitter: FrameEmitter,
    name: String,
    user_id: String,
) {
    let (mut session, events) = match provider.connect(&config).await {
        Ok(connected) => connected,
        Err(e) => {
            tracing::error!(processor = %name, error = %e, "failed to open transcription session");
            emitter.send_upstream(FrameEnum::Error(ErrorFrame::non_fatal(format!("{name}: {e}"))));
            return;
        }
    };
    tracing::debug!(processor = %name, sample_rate = config.sample_rate, "transcription session started");

    let writer = async {
        while let Some(command) = commands.recv().await {
            let result = match command {
                SessionCommand::Audio(audio) => session.send_audio(&audio).await,
                SessionCommand::Finish => {
                    let result = session.finish().await;
                    if result.is_ok() {
                        break;
                    }
                    result
                }
            };
            if let Err(e) = result {
                tracing::error!(processor = %name, error = %e, "transcription session write failed");
                emitter.send_upstream(FrameEnum::Error(ErrorFrame::non_fatal(format!("{name}: {e}"))));
                break;
            }
        }
    };
    let reader = read_events(events, emitter.clone(), &name, &user_id);
    tokio::join!(writer, reader);
    tracing::debug!(processor = %name, "transcription session closed");
}

async fn read_events(mut events: SttEventStream, emitter: FrameEmitter, name: &str, user_id: &str) {
    let mut in_utterance = false;
    while let Some(event) = events.next().await {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(processor = %name, error = %e, "transcription stream failed");
                emitter.send_upstream(FrameEnum::Error(ErrorFrame::non_fatal(format!("{name}: {e}"))));
                break;
            }
        };
        if !in_utterance {
            in_utterance = true;
            emitter.send_downstream(FrameEnum::UserStartedSpeaking(UserStartedSpeakingFrame::new()));
        }
        match event {
            SttEvent::Interim { text, language } => {
                emitter.send_downstream(FrameEnum::InterimTranscription(
                    InterimTranscriptionFrame::new(text, user_id, now_iso8601()).with_language(language),
                ));
            }
            SttEvent::Final { text, language } => {
                tracing::debug!(processor = %name, text = %text, language = ?language, "final transcript");
                in_utterance = false;
                emitter.send_downstream(FrameEnum::UserStoppedSpeaking(UserStoppedSpeakingFrame::new()));
                emitter.send_downstream(FrameEnum::Transcription(
                    TranscriptionFrame::new(text, user_id, now_iso8601()).with_language(language),
                ));
            }
        }
    }
    if in_utterance {
        emitter.send_downstream(FrameEnum::UserStoppedSpeaking(UserStoppedSpeakingFrame::new()));
    }
}

impl<P: SttProvider> fmt::Debug for STTService<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("STTService")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("language_hints", &self.language_hints)
            .field("connected", &self.session.is_some())
            .finish()
    }
}

impl<P: SttProvider> fmt::Display for STTService<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[async_trait]
impl<P: SttProvider> Processor for STTService<P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> u64 {
        self.id
    }

    fn weight(&self) -> ProcessorWeight {
        ProcessorWeight::Heavy
    }

    async fn process(&mut self, frame: FrameEnum, direction: FrameDirection, ctx: &ProcessorContext) {
        match frame {
            FrameEnum::Start(start) => {
                self.open_session(start.audio_in_sample_rate, ctx);
                ctx.send(FrameEnum::Start(start), direction);
            }
            FrameEnum::InputAudioRaw(audio) if direction == FrameDirection::Downstream => {
                match &self.session {
                    Some(session) => {
                        if session
                            .commands
                            .send(SessionCommand::Audio(audio.audio.audio))
                            .is_err()
                        {
                            tracing::trace!(processor = %self.name, "transcription session gone, audio dropped");
                        }
                    }
                    None => tracing::trace!(processor = %self.name, "no transcription session, audio dropped"),
                }
            }
            FrameEnum::Cancel(cancel) => {
                self.abort_session();
                ctx.send(FrameEnum::Cancel(cancel), direction);
            }
            FrameEnum::End(end) => {
                self.finish_session(ctx).await;
                ctx.send(FrameEnum::End(end), direction);
            }
            other => ctx.send(other, direction),
        }
    }

    async fn cleanup(&mut self) {
        self.abort_session();
    }
}
