// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! The simple chatbot: an animated talking robot.
//!
//! [`build_bot`] assembles the whole conversation pipeline around a
//! [`Transport`]:
//!
//! ```text
//! input -> rtvi -> stt -> user context -> llm -> functions -> tts
//!       -> talking animation -> output -> assistant context
//! ```
//!
//! and wires the client events: when the client is ready the bot announces
//! itself and starts talking, the first participant sees the quiet robot, and
//! the session ends when the participant leaves.

use std::future::Future;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::config::BotConfig;
use crate::error::{PipelineError, ProviderError};
use crate::frames::frame_enum::FrameEnum;
use crate::frames::LLMContextFrame;
use crate::observers::Observer;
use crate::pipeline::{PipelineParams, PipelineRunner, PipelineTask, PipelineTaskHandle, TaskState};
use crate::processors::aggregators::llm_context::{LLMContext, LLMMessage};
use crate::processors::aggregators::LLMContextAggregatorPair;
use crate::processors::avatar::{AvatarAssets, TalkingAnimation};
use crate::processors::frameworks::rtvi::{
    ON_CLIENT_READY, ON_FIRST_PARTICIPANT_JOINED, ON_PARTICIPANT_LEFT,
};
use crate::processors::frameworks::{RTVIConfig, RTVIHandle, RTVIObserver, RTVIProcessor};
use crate::processors::function_calls::{FunctionCallBridge, FunctionCallParams, FunctionOptions};
use crate::processors::processor::Processor;
use crate::services::{
    CartesiaProvider, LLMService, LlmProvider, OpenAiProvider, STTService, SonioxProvider,
    SttProvider, TTSService, TtsProvider,
};
use crate::transports::Transport;

/// Frames in the talking loop when no art is supplied.
const PLACEHOLDER_FRAMES: usize = 4;

/// The services and assets a bot is built from.
pub struct BotProviders<L, T, S> {
    pub llm: L,
    pub tts: T,
    pub stt: S,
    avatar: Option<AvatarAssets>,
    functions: FunctionCallBridge,
    tools: Vec<Value>,
}

impl<L, T, S> BotProviders<L, T, S>
where
    L: LlmProvider,
    T: TtsProvider,
    S: SttProvider,
{
    pub fn new(llm: L, tts: T, stt: S) -> Self {
        Self {
            llm,
            tts,
            stt,
            avatar: None,
            functions: FunctionCallBridge::new(),
            tools: Vec::new(),
        }
    }

    /// Use `avatar` instead of generated placeholder images.
    pub fn with_avatar(mut self, avatar: AvatarAssets) -> Self {
        self.avatar = Some(avatar);
        self
    }

    /// Offer a function to the model.
    ///
    /// `schema` is the tool definition sent to the model, e.g.
    /// `{"type": "function", "function": {"name": ..., "parameters": ...}}`.
    pub fn with_function<F, Fut>(
        mut self,
        schema: Value,
        handler: F,
        options: FunctionOptions,
    ) -> Self
    where
        F: Fn(FunctionCallParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        let name = schema["function"]["name"]
            .as_str()
            .or_else(|| schema["name"].as_str())
            .unwrap_or_default()
            .to_string();
        if name.is_empty() {
            tracing::warn!("function schema without a name ignored");
            return self;
        }
        self.functions.register_function(name, handler, options);
        self.tools.push(schema);
        self
    }
}

impl BotProviders<OpenAiProvider, CartesiaProvider, SonioxProvider> {
    /// The production services, configured from `config`.
    pub fn from_config(config: &BotConfig) -> Result<Self, ProviderError> {
        let llm = OpenAiProvider::new(&config.openai_api_key)?.with_model(&config.openai_model);
        let tts =
            CartesiaProvider::new(&config.cartesia_api_key)?.with_voice_id(&config.cartesia_voice_id);
        let stt = SonioxProvider::new(&config.soniox_api_key)?.with_url(&config.soniox_url);
        Ok(Self::new(llm, tts, stt))
    }
}

/// An assembled bot, ready to run.
pub struct Bot {
    task: PipelineTask,
    rtvi: RTVIHandle,
    context: Arc<Mutex<LLMContext>>,
}

impl Bot {
    /// Handle for queueing frames into, or cancelling, the bot's task.
    pub fn handle(&self) -> PipelineTaskHandle {
        self.task.handle()
    }

    pub fn rtvi(&self) -> &RTVIHandle {
        &self.rtvi
    }

    /// The conversation so far.
    pub fn context(&self) -> &Arc<Mutex<LLMContext>> {
        &self.context
    }

    pub fn name(&self) -> &str {
        self.task.name()
    }

    /// Run until the participant leaves or the task is stopped.
    pub async fn run(self) -> TaskState {
        PipelineRunner::new().run(self.task).await
    }

    pub fn into_task(self) -> PipelineTask {
        self.task
    }
}

impl std::fmt::Debug for Bot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bot")
            .field("task", &self.task)
            .field("rtvi", &self.rtvi)
            .finish()
    }
}

/// Assemble the chatbot pipeline around `transport`.
///
/// Takes the transport's input stage, so it can be called once per
/// transport. Must be called from within a tokio runtime.
pub fn build_bot<L, T, S>(
    config: &BotConfig,
    providers: BotProviders<L, T, S>,
    transport: &mut Transport,
) -> Result<Bot, PipelineError>
where
    L: LlmProvider,
    T: TtsProvider,
    S: SttProvider,
{
    let BotProviders {
        llm,
        tts,
        stt,
        avatar,
        functions,
        tools,
    } = providers;

    let avatar = match avatar {
        Some(avatar) => avatar,
        None => {
            let params = transport.params();
            AvatarAssets::placeholder(params.video_out_width, params.video_out_height, PLACEHOLDER_FRAMES)?
        }
    };
    let talking_animation = TalkingAnimation::new(avatar);
    let quiet_frame = talking_animation.quiet_frame();

    let context = LLMContext::with_tools(vec![LLMMessage::system(config.system_prompt.clone())], tools);
    let aggregators = LLMContextAggregatorPair::new(context);
    let shared_context = aggregators.context().clone();
    let (user_aggregator, assistant_aggregator) = aggregators.into_parts();

    let rtvi = RTVIProcessor::new(RTVIConfig::default());
    let rtvi_handle = rtvi.handle();

    let stages: Vec<Box<dyn Processor>> = vec![
        Box::new(transport.input()?),
        Box::new(rtvi),
        Box::new(STTService::new(stt).with_language_hints(config.language_hints.clone())),
        Box::new(user_aggregator),
        Box::new(LLMService::new(llm)),
        Box::new(functions),
        Box::new(TTSService::new(tts)),
        Box::new(talking_animation),
        Box::new(transport.output()),
        Box::new(assistant_aggregator),
    ];

    let params = PipelineParams {
        allow_interruptions: true,
        enable_metrics: true,
        enable_usage_metrics: true,
        ..PipelineParams::default()
    };
    let observers: Vec<Arc<dyn Observer>> = vec![Arc::new(RTVIObserver::new(rtvi_handle.clone()))];
    let task = PipelineTask::new(stages, params, observers)?;
    let task_handle = task.handle();

    {
        let rtvi = rtvi_handle.clone();
        let task = task_handle.clone();
        let context = shared_context.clone();
        rtvi_handle.on(ON_CLIENT_READY, move |_| {
            let rtvi = rtvi.clone();
            let task = task.clone();
            let context = context.clone();
            async move {
                rtvi.set_bot_ready();
                let snapshot = context.lock().await.clone();
                task.queue_frames([FrameEnum::LLMContext(LLMContextFrame::new(snapshot))]);
            }
        });
    }
    {
        let task = task_handle.clone();
        rtvi_handle.on(ON_FIRST_PARTICIPANT_JOINED, move |participant| {
            let task = task.clone();
            let quiet_frame = quiet_frame.clone();
            async move {
                tracing::debug!(participant = %participant, "first participant joined");
                task.queue_frame(FrameEnum::OutputImageRaw(quiet_frame));
            }
        });
    }
    {
        let task = task_handle.clone();
        rtvi_handle.on(ON_PARTICIPANT_LEFT, move |participant| {
            let task = task.clone();
            async move {
                tracing::debug!(participant = %participant, "participant left");
                task.cancel(Some("participant left".into()));
            }
        });
    }

    tracing::info!(
        bot = %config.bot_name,
        model = %config.openai_model,
        task = %task.name(),
        "bot assembled"
    );

    Ok(Bot {
        task,
        rtvi: rtvi_handle,
        context: shared_context,
    })
}

/// Tool schema in the chat-completions format.
pub fn function_schema(name: &str, description: &str, properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": {
                "type": "object",
                "properties": properties,
                "required": required,
            }
        }
    })
}
