// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Pipeline construction, frame ordering, both flow directions, observers
//! and the task lifecycle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use simple_chatbot::error::PipelineError;
use simple_chatbot::frames::*;
use simple_chatbot::impl_processor_display;
use simple_chatbot::observers::{FramePushed, Observer};
use simple_chatbot::pipeline::{
    ChannelPipeline, PipelineParams, PipelineRunner, PipelineTask, TaskState,
};
use simple_chatbot::processors::processor::{Processor, ProcessorContext};
use simple_chatbot::processors::FrameDirection;
use simple_chatbot::tests::{run_test, TestStep};

struct Passthrough {
    id: u64,
    name: String,
}

impl Passthrough {
    fn boxed(id: u64) -> Box<dyn Processor> {
        Box::new(Self {
            id,
            name: format!("Passthrough#{id}"),
        })
    }
}

impl_processor_display!(Passthrough);

#[async_trait]
impl Processor for Passthrough {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> u64 {
        self.id
    }

    async fn process(&mut self, frame: FrameEnum, direction: FrameDirection, ctx: &ProcessorContext) {
        ctx.send(frame, direction);
    }
}

/// Answers every downstream "ping" with an upstream "pong".
struct Ponger {
    name: String,
}

impl_processor_display!(Ponger);

#[async_trait]
impl Processor for Ponger {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> u64 {
        99
    }

    async fn process(&mut self, frame: FrameEnum, direction: FrameDirection, ctx: &ProcessorContext) {
        if let FrameEnum::Text(text) = &frame {
            if text.text == "ping" && direction == FrameDirection::Downstream {
                ctx.send_upstream(FrameEnum::Text(TextFrame::new("pong")));
                return;
            }
        }
        ctx.send(frame, direction);
    }
}

#[derive(Default)]
struct TailCounter {
    texts: AtomicUsize,
}

#[async_trait]
impl Observer for TailCounter {
    async fn on_push_frame(&self, data: &FramePushed<'_>) {
        if data.destination_id.is_none()
            && data.direction == FrameDirection::Downstream
            && matches!(data.frame, FrameEnum::Text(_))
        {
            self.texts.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn text(s: &str) -> FrameEnum {
    FrameEnum::Text(TextFrame::new(s))
}

#[tokio::test]
async fn test_empty_pipeline_is_rejected() {
    let result = PipelineTask::new(vec![], PipelineParams::default(), vec![]);
    assert!(matches!(result, Err(PipelineError::Configuration(_))));

    let result = ChannelPipeline::new(vec![], vec![]);
    assert!(matches!(result, Err(PipelineError::Configuration(_))));
}

#[tokio::test]
async fn test_frames_keep_their_order_across_stages() {
    let steps: Vec<TestStep> = (0..50).map(|i| TestStep::from(text(&i.to_string()))).collect();
    let result = run_test(
        vec![Passthrough::boxed(1), Passthrough::boxed(2), Passthrough::boxed(3)],
        steps,
        None,
        Some(&[]),
        true,
        vec![],
        None,
    )
    .await
    .unwrap();

    let texts: Vec<String> = result
        .downstream_frames
        .iter()
        .filter_map(|f| match f {
            FrameEnum::Text(t) => Some(t.text.clone()),
            _ => None,
        })
        .collect();
    let expected: Vec<String> = (0..50).map(|i| i.to_string()).collect();
    assert_eq!(texts, expected);
    assert_eq!(result.state, TaskState::Completed);
}

#[tokio::test]
async fn test_upstream_frames_reach_the_head() {
    let ponger: Box<dyn Processor> = Box::new(Ponger {
        name: "Ponger".into(),
    });
    let result = run_test(
        vec![Passthrough::boxed(1), ponger],
        vec![text("ping").into(), text("other").into()],
        Some(&["TextFrame"]),
        Some(&["TextFrame"]),
        true,
        vec![],
        None,
    )
    .await
    .unwrap();

    match &result.upstream_frames[0] {
        FrameEnum::Text(t) => assert_eq!(t.text, "pong"),
        other => panic!("unexpected {other}"),
    }
}

#[tokio::test]
async fn test_observer_sees_frames_leave_the_tail() {
    let counter = Arc::new(TailCounter::default());
    let observer: Arc<dyn Observer> = counter.clone();
    run_test(
        vec![Passthrough::boxed(1)],
        vec![text("a").into(), text("b").into()],
        Some(&["TextFrame", "TextFrame"]),
        None,
        true,
        vec![observer],
        None,
    )
    .await
    .unwrap();
    assert_eq!(counter.texts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_without_end_frame_task_is_cancelled() {
    let result = run_test(
        vec![Passthrough::boxed(1)],
        vec![text("a").into()],
        Some(&["TextFrame"]),
        None,
        false,
        vec![],
        None,
    )
    .await
    .unwrap();
    assert_eq!(result.state, TaskState::Cancelled);
}

#[tokio::test]
async fn test_runner_runs_tasks_concurrently() {
    let tasks: Vec<PipelineTask> = (0..3)
        .map(|i| {
            let task =
                PipelineTask::new(vec![Passthrough::boxed(i)], PipelineParams::default(), vec![])
                    .unwrap();
            let handle = task.handle();
            handle.queue_frames(vec![text("hello"), text("world")]);
            handle.stop_when_done();
            task
        })
        .collect();

    let states = PipelineRunner::new().run_all(tasks).await;
    assert_eq!(states, vec![TaskState::Completed; 3]);
}

#[tokio::test]
async fn test_cancelled_handle_is_reported() {
    let task =
        PipelineTask::new(vec![Passthrough::boxed(1)], PipelineParams::default(), vec![]).unwrap();
    let handle = task.handle();
    assert!(!handle.is_cancelled());
    handle.cancel(Some("shutting down".into()));
    assert!(handle.is_cancelled());
    assert_eq!(task.run().await, TaskState::Cancelled);
}
