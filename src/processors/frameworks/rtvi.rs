// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! RTVI (Real-Time Voice Inference) client protocol.
//!
//! [`RTVIProcessor`] is the stage that speaks to the client UI. It exposes
//! named lifecycle hooks (`on_client_ready`, `on_first_participant_joined`,
//! `on_participant_joined`, `on_participant_left`) that the bot registers
//! through an [`RTVIHandle`] while it is being assembled, and it carries the
//! outgoing client messages: the `bot-ready` acknowledgement and the events
//! produced by [`RTVIObserver`].
//!
//! Every message is a JSON object labelled `rtvi-ai`:
//!
//! ```json
//! {"label": "rtvi-ai", "type": "bot-ready", "id": "1", "data": {"version": "0.3.0", "config": []}}
//! ```
//!
//! Outgoing messages travel downstream as `OutputTransportMessageUrgentFrame`s
//! so the output transport sends them ahead of queued media.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::frames::frame_enum::FrameEnum;
use crate::frames::OutputTransportMessageUrgentFrame;
use crate::impl_processor_display;
use crate::metrics::MetricsData;
use crate::observers::{FramePushed, Observer};
use crate::processors::processor::{FrameEmitter, Processor, ProcessorContext, ProcessorWeight};
use crate::processors::FrameDirection;
use crate::utils::base_object::{obj_id, EventDispatcher, EventHooks};

/// Protocol version announced in `bot-ready`.
pub const RTVI_PROTOCOL_VERSION: &str = "0.3.0";
/// Label carried by every RTVI message.
pub const RTVI_MESSAGE_LABEL: &str = "rtvi-ai";

pub const ON_CLIENT_READY: &str = "on_client_ready";
pub const ON_FIRST_PARTICIPANT_JOINED: &str = "on_first_participant_joined";
pub const ON_PARTICIPANT_JOINED: &str = "on_participant_joined";
pub const ON_PARTICIPANT_LEFT: &str = "on_participant_left";

const RTVI_EVENTS: &[&str] = &[
    ON_CLIENT_READY,
    ON_FIRST_PARTICIPANT_JOINED,
    ON_PARTICIPANT_JOINED,
    ON_PARTICIPANT_LEFT,
];

/// How many frame ids the observer remembers for de-duplication.
const SEEN_FRAME_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// One RTVI protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RTVIMessage {
    pub label: String,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl RTVIMessage {
    pub fn new(message_type: impl Into<String>, data: Value) -> Self {
        Self {
            label: RTVI_MESSAGE_LABEL.to_string(),
            message_type: message_type.into(),
            id: None,
            data,
        }
    }

    pub fn with_id(mut self, id: Option<String>) -> Self {
        self.id = id;
        self
    }

    /// Parse a transport message; `None` unless it is an RTVI message.
    pub fn parse(value: &Value) -> Option<Self> {
        if value.get("label").and_then(Value::as_str) != Some(RTVI_MESSAGE_LABEL) {
            return None;
        }
        match serde_json::from_value(value.clone()) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!("RTVI: malformed message: {e}");
                None
            }
        }
    }

    /// The JSON object sent to the client.
    pub fn to_value(&self) -> Value {
        let mut value = json!({
            "label": self.label,
            "type": self.message_type,
        });
        if let Some(id) = &self.id {
            value["id"] = json!(id);
        }
        if !self.data.is_null() {
            value["data"] = self.data.clone();
        }
        value
    }
}

/// Configuration reported to the client in `bot-ready`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RTVIConfig {
    pub config: Vec<Value>,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Shared {
    config: RTVIConfig,
    /// Installed when the pipeline starts; closed with the stage.
    outbox: Mutex<Option<FrameEmitter>>,
    client_ready_id: Mutex<Option<String>>,
    bot_ready: AtomicBool,
}

/// Cloneable access to an [`RTVIProcessor`] from outside the pipeline.
#[derive(Clone)]
pub struct RTVIHandle {
    hooks: EventHooks,
    shared: Arc<Shared>,
}

impl RTVIHandle {
    /// Register `handler` for one of the processor's events.
    ///
    /// Handlers for one event run in registration order; events run in the
    /// order they happened.
    pub fn on<F, Fut>(&self, event: &str, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks.add_event_handler(event, handler);
    }

    /// Send `message` to the client ahead of queued media.
    ///
    /// Returns `false` if the pipeline has not started or has been cancelled.
    pub fn send_message(&self, message: RTVIMessage) -> bool {
        let outbox = lock(&self.shared.outbox);
        let Some(emitter) = outbox.as_ref() else {
            tracing::warn!(message = %message.message_type, "RTVI: pipeline not running, message dropped");
            return false;
        };
        emitter.send_downstream(FrameEnum::OutputTransportMessageUrgent(
            OutputTransportMessageUrgentFrame::new(message.to_value()),
        ))
    }

    /// Tell the client the bot is ready.
    ///
    /// Call this before queueing the first context snapshot.
    pub fn set_bot_ready(&self) -> bool {
        let id = lock(&self.shared.client_ready_id).clone();
        let data = json!({
            "version": RTVI_PROTOCOL_VERSION,
            "config": self.shared.config.config,
        });
        let sent = self.send_message(RTVIMessage::new("bot-ready", data).with_id(id));
        if sent {
            self.shared.bot_ready.store(true, Ordering::SeqCst);
            tracing::info!("RTVI: bot ready");
        }
        sent
    }

    pub fn is_bot_ready(&self) -> bool {
        self.shared.bot_ready.load(Ordering::SeqCst)
    }

    pub fn hooks(&self) -> &EventHooks {
        &self.hooks
    }
}

impl std::fmt::Debug for RTVIHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RTVIHandle")
            .field("hooks", &self.hooks)
            .field("bot_ready", &self.is_bot_ready())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// Stage that bridges the pipeline and the RTVI client.
pub struct RTVIProcessor {
    id: u64,
    name: String,
    handle: RTVIHandle,
    dispatcher: Option<EventDispatcher>,
    first_participant_seen: bool,
}

impl RTVIProcessor {
    pub fn new(config: RTVIConfig) -> Self {
        let name = "RTVIProcessor".to_string();
        Self {
            id: obj_id(),
            handle: RTVIHandle {
                hooks: EventHooks::new(name.clone(), RTVI_EVENTS),
                shared: Arc::new(Shared {
                    config,
                    outbox: Mutex::new(None),
                    client_ready_id: Mutex::new(None),
                    bot_ready: AtomicBool::new(false),
                }),
            },
            name,
            dispatcher: None,
            first_participant_seen: false,
        }
    }

    pub fn handle(&self) -> RTVIHandle {
        self.handle.clone()
    }

    fn emit(&self, event: &str, arg: Value) {
        match &self.dispatcher {
            Some(dispatcher) => dispatcher.emit(event, arg),
            None => tracing::warn!(processor = %self.name, event, "event before setup ignored"),
        }
    }

    fn handle_client_message(&mut self, message: RTVIMessage) {
        match message.message_type.as_str() {
            "client-ready" => {
                tracing::debug!(processor = %self.name, id = ?message.id, "client ready");
                *lock(&self.handle.shared.client_ready_id) = message.id.clone();
                self.emit(ON_CLIENT_READY, json!({ "id": message.id }));
            }
            other => {
                tracing::debug!(processor = %self.name, message_type = other, "unsupported RTVI message");
                self.handle.send_message(
                    RTVIMessage::new(
                        "error-response",
                        json!({ "error": format!("unsupported message type '{other}'") }),
                    )
                    .with_id(message.id),
                );
            }
        }
    }
}

impl_processor_display!(RTVIProcessor);

#[async_trait]
impl Processor for RTVIProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> u64 {
        self.id
    }

    fn weight(&self) -> ProcessorWeight {
        ProcessorWeight::Light
    }

    async fn setup(&mut self) {
        self.dispatcher = Some(self.handle.hooks.start_dispatcher());
    }

    async fn cleanup(&mut self) {
        lock(&self.handle.shared.outbox).take();
        if let Some(mut dispatcher) = self.dispatcher.take() {
            dispatcher.shutdown().await;
        }
    }

    async fn process(&mut self, frame: FrameEnum, direction: FrameDirection, ctx: &ProcessorContext) {
        match frame {
            FrameEnum::Start(start) => {
                *lock(&self.handle.shared.outbox) = Some(ctx.persistent_emitter());
                ctx.send(FrameEnum::Start(start), direction);
            }
            FrameEnum::InputTransportMessage(input) if direction == FrameDirection::Downstream => {
                match RTVIMessage::parse(&input.message) {
                    Some(message) => self.handle_client_message(message),
                    None => ctx.send(FrameEnum::InputTransportMessage(input), direction),
                }
            }
            FrameEnum::ParticipantJoined(joined) => {
                let arg = json!({ "id": joined.participant_id, "name": joined.name });
                if !self.first_participant_seen {
                    self.first_participant_seen = true;
                    self.emit(ON_FIRST_PARTICIPANT_JOINED, arg.clone());
                }
                self.emit(ON_PARTICIPANT_JOINED, arg);
                ctx.send(FrameEnum::ParticipantJoined(joined), direction);
            }
            FrameEnum::ParticipantLeft(left) => {
                self.emit(
                    ON_PARTICIPANT_LEFT,
                    json!({ "id": left.participant_id, "reason": left.reason }),
                );
                ctx.send(FrameEnum::ParticipantLeft(left), direction);
            }
            other => ctx.send(other, direction),
        }
    }
}

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

/// Which client events [`RTVIObserver`] produces.
#[derive(Debug, Clone)]
pub struct RTVIObserverParams {
    pub bot_speaking_enabled: bool,
    pub user_speaking_enabled: bool,
    pub user_transcription_enabled: bool,
    pub bot_llm_enabled: bool,
    pub bot_tts_enabled: bool,
    pub metrics_enabled: bool,
    pub errors_enabled: bool,
}

impl Default for RTVIObserverParams {
    fn default() -> Self {
        Self {
            bot_speaking_enabled: true,
            user_speaking_enabled: true,
            user_transcription_enabled: true,
            bot_llm_enabled: true,
            bot_tts_enabled: true,
            metrics_enabled: true,
            errors_enabled: true,
        }
    }
}

/// Bounded memory of recently reported frame ids.
#[derive(Default)]
struct SeenFrames {
    order: VecDeque<u64>,
    ids: HashSet<u64>,
}

impl SeenFrames {
    /// Returns `true` the first time `id` is inserted.
    fn insert(&mut self, id: u64) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > SEEN_FRAME_CAPACITY {
            if let Some(old) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }
        true
    }
}

/// Turns pipeline traffic into RTVI client events.
///
/// A frame is reported once, however many stages pass it along.
pub struct RTVIObserver {
    handle: RTVIHandle,
    params: RTVIObserverParams,
    seen: Mutex<SeenFrames>,
}

impl RTVIObserver {
    pub fn new(handle: RTVIHandle) -> Self {
        Self::with_params(handle, RTVIObserverParams::default())
    }

    pub fn with_params(handle: RTVIHandle, params: RTVIObserverParams) -> Self {
        Self {
            handle,
            params,
            seen: Mutex::new(SeenFrames::default()),
        }
    }

    fn message_for(&self, frame: &FrameEnum, direction: FrameDirection) -> Option<RTVIMessage> {
        let p = &self.params;
        let downstream = direction == FrameDirection::Downstream;
        let message = match frame {
            // Output transports report speaking state upstream.
            FrameEnum::BotStartedSpeaking(_) if p.bot_speaking_enabled && !downstream => {
                RTVIMessage::new("bot-started-speaking", Value::Null)
            }
            FrameEnum::BotStoppedSpeaking(_) if p.bot_speaking_enabled && !downstream => {
                RTVIMessage::new("bot-stopped-speaking", Value::Null)
            }
            FrameEnum::UserStartedSpeaking(_) if p.user_speaking_enabled && downstream => {
                RTVIMessage::new("user-started-speaking", Value::Null)
            }
            FrameEnum::UserStoppedSpeaking(_) if p.user_speaking_enabled && downstream => {
                RTVIMessage::new("user-stopped-speaking", Value::Null)
            }
            FrameEnum::Transcription(t) if p.user_transcription_enabled && downstream => {
                RTVIMessage::new(
                    "user-transcription",
                    json!({
                        "text": t.text,
                        "user_id": t.user_id,
                        "timestamp": t.timestamp,
                        "final": true,
                        "language": t.language,
                    }),
                )
            }
            FrameEnum::InterimTranscription(t) if p.user_transcription_enabled && downstream => {
                RTVIMessage::new(
                    "user-transcription",
                    json!({
                        "text": t.text,
                        "user_id": t.user_id,
                        "timestamp": t.timestamp,
                        "final": false,
                        "language": t.language,
                    }),
                )
            }
            FrameEnum::LLMFullResponseStart(_) if p.bot_llm_enabled && downstream => {
                RTVIMessage::new("bot-llm-started", Value::Null)
            }
            FrameEnum::LLMFullResponseEnd(_) if p.bot_llm_enabled && downstream => {
                RTVIMessage::new("bot-llm-stopped", Value::Null)
            }
            FrameEnum::LLMText(t) if p.bot_llm_enabled && downstream => {
                RTVIMessage::new("bot-llm-text", json!({ "text": t.text }))
            }
            FrameEnum::TTSStarted(_) if p.bot_tts_enabled && downstream => {
                RTVIMessage::new("bot-tts-started", Value::Null)
            }
            FrameEnum::TTSStopped(_) if p.bot_tts_enabled && downstream => {
                RTVIMessage::new("bot-tts-stopped", Value::Null)
            }
            FrameEnum::Metrics(m) if p.metrics_enabled && downstream => {
                RTVIMessage::new("metrics", metrics_payload(&m.data))
            }
            FrameEnum::Error(e) if p.errors_enabled && !downstream => RTVIMessage::new(
                "error",
                json!({ "error": e.error, "fatal": e.fatal }),
            ),
            _ => return None,
        };
        Some(message)
    }
}

/// Group metric samples the way the client expects them.
fn metrics_payload(data: &[MetricsData]) -> Value {
    let mut payload = serde_json::Map::new();
    for sample in data {
        let (key, entry) = match sample {
            MetricsData::Ttfb { processor, model, value } => {
                ("ttfb", json!({ "processor": processor, "model": model, "value": value }))
            }
            MetricsData::Processing { processor, model, value } => (
                "processing",
                json!({ "processor": processor, "model": model, "value": value }),
            ),
            MetricsData::LlmUsage { processor, model, value } => {
                ("tokens", json!({ "processor": processor, "model": model, "value": value }))
            }
            MetricsData::TtsUsage { processor, model, value } => (
                "characters",
                json!({ "processor": processor, "model": model, "value": value }),
            ),
        };
        if let Value::Array(list) = payload
            .entry(key)
            .or_insert_with(|| Value::Array(Vec::new()))
        {
            list.push(entry);
        }
    }
    Value::Object(payload)
}

#[async_trait]
impl Observer for RTVIObserver {
    async fn on_push_frame(&self, data: &FramePushed<'_>) {
        let Some(message) = self.message_for(data.frame, data.direction) else {
            return;
        };
        if !lock(&self.seen).insert(data.frame.id()) {
            return;
        }
        self.handle.send_message(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{
        BotStartedSpeakingFrame, InputTransportMessageFrame, ParticipantJoinedFrame,
        ParticipantLeftFrame, StartFrame, TranscriptionFrame,
    };
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Harness {
        rtvi: RTVIProcessor,
        ctx: ProcessorContext,
        rx: mpsc::UnboundedReceiver<FrameEnum>,
    }

    impl Harness {
        async fn started() -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            let (utx, _urx) = mpsc::unbounded_channel();
            let ctx = ProcessorContext::for_test(tx, utx);
            let mut rtvi = RTVIProcessor::new(RTVIConfig::default());
            rtvi.setup().await;
            rtvi.process(FrameEnum::Start(StartFrame::default()), FrameDirection::Downstream, &ctx)
                .await;
            let mut harness = Self { rtvi, ctx, rx };
            assert!(matches!(harness.rx.try_recv(), Ok(FrameEnum::Start(_))));
            harness
        }

        async fn push(&mut self, frame: FrameEnum) {
            self.rtvi.process(frame, FrameDirection::Downstream, &self.ctx).await;
        }

        fn drain(&mut self) -> Vec<FrameEnum> {
            std::iter::from_fn(|| self.rx.try_recv().ok()).collect()
        }
    }

    fn client_message(value: Value) -> FrameEnum {
        FrameEnum::InputTransportMessage(InputTransportMessageFrame::new(value))
    }

    fn urgent_messages(frames: &[FrameEnum]) -> Vec<Value> {
        frames
            .iter()
            .filter_map(|f| match f {
                FrameEnum::OutputTransportMessageUrgent(m) => Some(m.message.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn message_parse_and_serialize() {
        let value = json!({"label": "rtvi-ai", "type": "client-ready", "id": "abc", "data": {}});
        let message = RTVIMessage::parse(&value).unwrap();
        assert_eq!(message.message_type, "client-ready");
        assert_eq!(message.id.as_deref(), Some("abc"));

        assert!(RTVIMessage::parse(&json!({"type": "client-ready"})).is_none());

        let out = RTVIMessage::new("bot-llm-started", Value::Null).to_value();
        assert_eq!(out, json!({"label": "rtvi-ai", "type": "bot-llm-started"}));
    }

    #[tokio::test]
    async fn client_ready_runs_hook_and_bot_ready_follows() {
        let mut h = Harness::started().await;
        let handle = h.rtvi.handle();
        let (ready_tx, mut ready_rx) = mpsc::unbounded_channel();
        let hook_handle = handle.clone();
        handle.on(ON_CLIENT_READY, move |_| {
            let handle = hook_handle.clone();
            let ready_tx = ready_tx.clone();
            async move {
                handle.set_bot_ready();
                let _ = ready_tx.send(());
            }
        });

        h.push(client_message(json!({"label": "rtvi-ai", "type": "client-ready", "id": "7"})))
            .await;
        tokio::time::timeout(Duration::from_secs(1), ready_rx.recv())
            .await
            .unwrap()
            .unwrap();

        let messages = urgent_messages(&h.drain());
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["type"], "bot-ready");
        assert_eq!(messages[0]["id"], "7");
        assert_eq!(messages[0]["data"]["version"], RTVI_PROTOCOL_VERSION);
        assert!(handle.is_bot_ready());
    }

    #[tokio::test]
    async fn non_rtvi_messages_pass_through() {
        let mut h = Harness::started().await;
        h.push(client_message(json!({"hello": "world"}))).await;
        let frames = h.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].name(), "InputTransportMessageFrame");
    }

    #[tokio::test]
    async fn participant_hooks_fire_in_order() {
        let mut h = Harness::started().await;
        let handle = h.rtvi.handle();
        let log = Arc::new(Mutex::new(Vec::new()));
        for event in [ON_FIRST_PARTICIPANT_JOINED, ON_PARTICIPANT_JOINED, ON_PARTICIPANT_LEFT] {
            let log = log.clone();
            handle.on(event, move |arg| {
                let log = log.clone();
                async move {
                    lock(&log).push(format!("{event}:{}", arg["id"].as_str().unwrap_or("")));
                }
            });
        }

        h.push(FrameEnum::ParticipantJoined(ParticipantJoinedFrame::new("a", None))).await;
        h.push(FrameEnum::ParticipantJoined(ParticipantJoinedFrame::new("b", None))).await;
        h.push(FrameEnum::ParticipantLeft(ParticipantLeftFrame::new("a", "left"))).await;
        h.rtvi.cleanup().await;

        assert_eq!(
            *lock(&log),
            vec![
                "on_first_participant_joined:a",
                "on_participant_joined:a",
                "on_participant_joined:b",
                "on_participant_left:a",
            ]
        );
        // Participant frames keep flowing.
        assert_eq!(h.drain().len(), 3);
    }

    #[tokio::test]
    async fn observer_reports_each_frame_once() {
        let mut h = Harness::started().await;
        let observer = RTVIObserver::new(h.rtvi.handle());
        let transcript = FrameEnum::Transcription(TranscriptionFrame::new("hi", "user", "0"));
        for _ in 0..3 {
            observer
                .on_push_frame(&FramePushed {
                    source_id: 1,
                    source_name: "stt",
                    destination_id: None,
                    destination_name: None,
                    frame: &transcript,
                    direction: FrameDirection::Downstream,
                    timestamp: 0,
                })
                .await;
        }

        let messages = urgent_messages(&h.drain());
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["type"], "user-transcription");
        assert_eq!(messages[0]["data"]["text"], "hi");
        assert_eq!(messages[0]["data"]["final"], true);
    }

    #[tokio::test]
    async fn bot_speaking_is_reported_from_upstream_only() {
        let mut h = Harness::started().await;
        let observer = RTVIObserver::new(h.rtvi.handle());
        for direction in [FrameDirection::Downstream, FrameDirection::Upstream] {
            let frame = FrameEnum::BotStartedSpeaking(BotStartedSpeakingFrame::new());
            observer
                .on_push_frame(&FramePushed {
                    source_id: 1,
                    source_name: "tts",
                    destination_id: None,
                    destination_name: None,
                    frame: &frame,
                    direction,
                    timestamp: 0,
                })
                .await;
        }
        let messages = urgent_messages(&h.drain());
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["type"], "bot-started-speaking");
    }

    #[test]
    fn metrics_are_grouped_by_type() {
        let payload = metrics_payload(&[
            MetricsData::Ttfb {
                processor: "llm".into(),
                model: Some("gpt-4.1-mini".into()),
                value: 0.2,
            },
            MetricsData::TtsUsage {
                processor: "tts".into(),
                model: None,
                value: 42,
            },
        ]);
        assert_eq!(payload["ttfb"][0]["processor"], "llm");
        assert_eq!(payload["characters"][0]["value"], 42);
    }

    #[test]
    fn seen_frames_are_bounded() {
        let mut seen = SeenFrames::default();
        for id in 0..(SEEN_FRAME_CAPACITY as u64 + 10) {
            assert!(seen.insert(id));
        }
        assert!(!seen.insert(SEEN_FRAME_CAPACITY as u64));
        // The oldest ids were forgotten.
        assert!(seen.insert(0));
        assert!(seen.ids.len() <= SEEN_FRAME_CAPACITY + 1);
    }
}
