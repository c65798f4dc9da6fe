// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Conversation flow through the context aggregators, the avatar and the
//! tool-call bridge.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use simple_chatbot::frames::*;
use simple_chatbot::pipeline::{PipelineParams, PipelineTask, TaskState};
use simple_chatbot::processors::aggregators::llm_context::{LLMContext, LLMMessage, Role};
use simple_chatbot::processors::aggregators::LLMContextAggregatorPair;
use simple_chatbot::processors::avatar::{AvatarAssets, TalkingAnimation};
use simple_chatbot::processors::function_calls::{FunctionCallBridge, FunctionOptions};
use simple_chatbot::processors::processor::Processor;
use simple_chatbot::processors::FrameDirection;
use simple_chatbot::services::{LLMService, LlmChunk, TTSService};
use simple_chatbot::tests::{
    run_test, MockLlmProvider, MockTtsProvider, QueuedFrameProcessor, TestStep,
};

fn transcription(text: &str) -> FrameEnum {
    FrameEnum::Transcription(TranscriptionFrame::new(text, "user", "2026-01-01T00:00:00Z"))
}

fn small_avatar() -> AvatarAssets {
    let frames = (1..=2u8)
        .map(|tag| ImageRawData::new(vec![tag; 3], (1, 1), Some("RGB".into())))
        .collect();
    AvatarAssets::from_frames(frames).unwrap()
}

#[tokio::test]
async fn test_final_transcript_appends_user_message_and_requests_reply() {
    let pair = LLMContextAggregatorPair::new(LLMContext::with_messages(vec![LLMMessage::system(
        "Be brief.",
    )]));
    let context = pair.context().clone();
    let (user, _assistant) = pair.into_parts();

    let result = run_test(
        vec![Box::new(user)],
        vec![transcription("hello").into()],
        Some(&["LLMContextFrame"]),
        Some(&[]),
        true,
        vec![],
        None,
    )
    .await
    .unwrap();

    let context = context.lock().await;
    assert_eq!(context.message_count(), 2);
    let last = context.last_message().unwrap();
    assert_eq!(last.role, Role::User);
    assert_eq!(last.content, "hello");

    match &result.downstream_frames[0] {
        FrameEnum::LLMContext(snapshot) => assert_eq!(snapshot.context.message_count(), 2),
        other => panic!("unexpected {other}"),
    }
}

#[tokio::test]
async fn test_interruption_precedes_snapshot_when_allowed() {
    let pair = LLMContextAggregatorPair::new(LLMContext::new());
    let (user, _assistant) = pair.into_parts();
    let params = PipelineParams {
        allow_interruptions: true,
        ..PipelineParams::default()
    };

    run_test(
        vec![Box::new(user)],
        vec![transcription("stop").into()],
        Some(&["InterruptionFrame", "LLMContextFrame"]),
        None,
        true,
        vec![],
        Some(params),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_reply_appends_exactly_one_assistant_message() {
    let messages = vec![
        LLMMessage::system("You are Chatbot."),
        LLMMessage::user("Hi"),
        LLMMessage::assistant("Hello!"),
        LLMMessage::user("How are you?"),
    ];
    let n = messages.len();
    let pair = LLMContextAggregatorPair::new(LLMContext::with_messages(messages));
    let context = pair.context().clone();
    let snapshot = context.lock().await.clone();
    let (_user, assistant) = pair.into_parts();
    let llm = LLMService::new(MockLlmProvider::with_reply(&["Doing ", "great, ", "thanks."]));

    run_test(
        vec![Box::new(llm), Box::new(assistant)],
        vec![FrameEnum::LLMContext(LLMContextFrame::new(snapshot)).into()],
        Some(&["LLMTextFrame", "LLMTextFrame", "LLMTextFrame"]),
        None,
        true,
        vec![],
        None,
    )
    .await
    .unwrap();

    let context = context.lock().await;
    assert_eq!(context.message_count(), n + 1);
    let last = context.last_message().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.content, "Doing great, thanks.");
}

#[tokio::test]
async fn test_avatar_emits_once_per_run_of_signals() {
    let animation = TalkingAnimation::new(small_avatar());

    run_test(
        vec![Box::new(animation)],
        vec![
            FrameEnum::BotStartedSpeaking(BotStartedSpeakingFrame::new()).into(),
            FrameEnum::BotStartedSpeaking(BotStartedSpeakingFrame::new()).into(),
            FrameEnum::BotStoppedSpeaking(BotStoppedSpeakingFrame::new()).into(),
        ],
        Some(&[
            "SpriteFrame",
            "BotStartedSpeakingFrame",
            "BotStartedSpeakingFrame",
            "OutputImageRawFrame",
            "BotStoppedSpeakingFrame",
        ]),
        None,
        true,
        vec![],
        None,
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_unregistered_function_reports_error_and_regenerates() {
    let pair = LLMContextAggregatorPair::new(LLMContext::with_messages(vec![LLMMessage::user(
        "What's the weather?",
    )]));
    let context = pair.context().clone();
    let (_user, assistant) = pair.into_parts();
    let provider = MockLlmProvider::with_reply(&["Sorry, ", "I can't check that."]);
    let llm = LLMService::new(provider.clone());
    let bridge = FunctionCallBridge::new();

    let call = FunctionCallFromLLM {
        function_name: "get_current_weather".into(),
        tool_call_id: "call_1".into(),
        arguments: json!({"location": "Paris"}),
    };
    let result = run_test(
        vec![Box::new(llm), Box::new(bridge), Box::new(assistant)],
        vec![FrameEnum::FunctionCallsStarted(FunctionCallsStartedFrame::new(vec![call])).into()],
        Some(&[
            "FunctionCallsStartedFrame",
            "FunctionCallInProgressFrame",
            "FunctionCallResultFrame",
            "LLMTextFrame",
            "LLMTextFrame",
        ]),
        Some(&[]),
        true,
        vec![],
        None,
    )
    .await
    .unwrap();
    assert_eq!(result.state, TaskState::Completed);

    match &result.downstream_frames[2] {
        FrameEnum::FunctionCallResult(f) => {
            assert_eq!(f.tool_call_id, "call_1");
            assert!(f.result["error"]
                .as_str()
                .unwrap()
                .contains("'get_current_weather' is not registered"));
        }
        other => panic!("unexpected {other}"),
    }

    let requests = provider.requests();
    assert_eq!(requests.len(), 1);
    let tool = requests[0].last_message().unwrap();
    assert_eq!(tool.role, Role::Tool);
    assert_eq!(tool.tool_call_id.as_deref(), Some("call_1"));
    assert!(tool.content.contains("not registered"));

    let context = context.lock().await;
    let last = context.last_message().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.content, "Sorry, I can't check that.");
}

#[tokio::test]
async fn test_registered_function_speaks_filler_and_returns_result() {
    let mut bridge = FunctionCallBridge::new();
    bridge.register_function(
        "get_current_weather",
        |_params| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, String>(json!({"conditions": "nice", "temperature": "75"}))
        },
        FunctionOptions {
            filler_text: Some("Let me check on that.".into()),
            cancel_on_interruption: true,
        },
    );
    let call = FunctionCallFromLLM {
        function_name: "get_current_weather".into(),
        tool_call_id: "call_9".into(),
        arguments: json!({"location": "Austin, TX", "format": "fahrenheit"}),
    };

    let result = run_test(
        vec![Box::new(bridge)],
        vec![FrameEnum::FunctionCallsStarted(FunctionCallsStartedFrame::new(vec![call])).into()],
        Some(&[
            "FunctionCallsStartedFrame",
            "TTSSpeakFrame",
            "FunctionCallInProgressFrame",
            "FunctionCallResultFrame",
        ]),
        None,
        true,
        vec![],
        None,
    )
    .await
    .unwrap();

    match &result.downstream_frames[3] {
        FrameEnum::FunctionCallResult(f) => assert_eq!(f.result["temperature"], "75"),
        other => panic!("unexpected {other}"),
    }
}

#[tokio::test]
async fn test_cancel_reaches_quiescence() {
    let captured: Arc<Mutex<Vec<FrameEnum>>> = Arc::default();
    let llm = LLMService::new(
        MockLlmProvider::with_reply(&["One. ", "Two. ", "Three. ", "Four. ", "Five."])
            .with_chunk_delay(Duration::from_millis(50)),
    );
    let tts = TTSService::new(MockTtsProvider::new().with_chunk_delay(Duration::from_millis(30)));
    let sink = QueuedFrameProcessor::new(FrameDirection::Downstream, true, captured.clone());
    let stages: Vec<Box<dyn Processor>> = vec![Box::new(llm), Box::new(tts), Box::new(sink)];
    let task = PipelineTask::new(stages, PipelineParams::default(), vec![]).unwrap();
    let handle = task.handle();
    let running = tokio::spawn(task.run());

    handle.queue_frame(FrameEnum::LLMContext(LLMContextFrame::new(LLMContext::with_messages(
        vec![LLMMessage::user("Count to five.")],
    ))));
    tokio::time::sleep(Duration::from_millis(120)).await;
    handle.cancel(Some("test".into()));

    let state = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("task did not stop")
        .unwrap();
    assert_eq!(state, TaskState::Cancelled);

    let seen = captured.lock().unwrap().len();
    assert!(captured
        .lock()
        .unwrap()
        .iter()
        .any(|f| matches!(f, FrameEnum::Cancel(_))));
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(captured.lock().unwrap().len(), seen, "frames emitted after cancel");
}

#[tokio::test]
async fn test_sleep_steps_pace_the_script() {
    let animation = TalkingAnimation::new(small_avatar());
    let result = run_test(
        vec![Box::new(animation)],
        vec![
            FrameEnum::BotStoppedSpeaking(BotStoppedSpeakingFrame::new()).into(),
            TestStep::Sleep(Duration::from_millis(20)),
            FrameEnum::BotStoppedSpeaking(BotStoppedSpeakingFrame::new()).into(),
        ],
        Some(&["OutputImageRawFrame", "BotStoppedSpeakingFrame", "BotStoppedSpeakingFrame"]),
        None,
        true,
        vec![],
        None,
    )
    .await
    .unwrap();
    assert_eq!(result.state, TaskState::Completed);
}

#[tokio::test]
async fn test_stop_when_done_keeps_reply_to_tool_result() {
    let pair = LLMContextAggregatorPair::new(LLMContext::with_messages(vec![LLMMessage::system(
        "Use tools when asked.",
    )]));
    let context = pair.context().clone();
    let (user, assistant) = pair.into_parts();
    let provider = MockLlmProvider::new(vec![
        vec![LlmChunk::ToolCall {
            id: "call_1".into(),
            name: "w".into(),
            arguments: json!({"city": "Oslo"}),
        }],
        vec![LlmChunk::Text("It is ".into()), LlmChunk::Text("nice.".into())],
    ])
    .with_chunk_delay(Duration::from_millis(30));
    let llm = LLMService::new(provider.clone());
    let mut bridge = FunctionCallBridge::new();
    bridge.register_function(
        "w",
        |_params| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, String>(json!({"c": "nice"}))
        },
        FunctionOptions::default(),
    );

    let stages: Vec<Box<dyn Processor>> =
        vec![Box::new(user), Box::new(llm), Box::new(bridge), Box::new(assistant)];
    let task = PipelineTask::new(stages, PipelineParams::default(), vec![]).unwrap();
    let handle = task.handle();
    handle.queue_frame(transcription("How is the weather in Oslo?"));
    handle.stop_when_done();

    let state = tokio::time::timeout(Duration::from_secs(5), task.run())
        .await
        .expect("task did not finish");
    assert_eq!(state, TaskState::Completed);
    assert_eq!(provider.requests().len(), 2);

    let context = context.lock().await;
    let last = context.last_message().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.content, "It is nice.");
}

#[tokio::test]
async fn test_new_transcript_supersedes_reply_in_flight() {
    let pair = LLMContextAggregatorPair::new(LLMContext::with_messages(vec![LLMMessage::system(
        "Be brief.",
    )]));
    let context = pair.context().clone();
    let (user, assistant) = pair.into_parts();
    let provider = MockLlmProvider::with_reply(&["alpha ", "beta ", "gamma"])
        .with_chunk_delay(Duration::from_millis(50));
    let llm = LLMService::new(provider.clone());
    let params = PipelineParams {
        allow_interruptions: true,
        ..PipelineParams::default()
    };

    let result = run_test(
        vec![Box::new(user), Box::new(llm), Box::new(assistant)],
        vec![
            transcription("first").into(),
            TestStep::Sleep(Duration::from_millis(80)),
            transcription("second").into(),
        ],
        None,
        None,
        true,
        vec![],
        Some(params),
    )
    .await
    .unwrap();
    assert_eq!(result.state, TaskState::Completed);

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].message_count(), 3);

    let context = context.lock().await;
    assert_eq!(
        context.messages(),
        &[
            LLMMessage::system("Be brief."),
            LLMMessage::user("first"),
            LLMMessage::user("second"),
            LLMMessage::assistant("alpha beta gamma"),
        ]
    );
}
