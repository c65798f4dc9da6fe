// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Pipeline orchestration for connecting and managing processors.
//!
//! - [`ChannelPipeline`]: the chain itself, one tokio task per stage.
//! - [`PipelineTask`]: owns a pipeline, its frame queue and its lifecycle.
//! - [`PipelineRunner`]: drives one or more tasks to a terminal state.

pub mod channel;
pub mod runner;
pub mod task;

pub use channel::{ChannelPipeline, DirectedFrame, PriorityReceiver, PrioritySender};
pub use runner::PipelineRunner;
pub use task::{PipelineParams, PipelineTask, PipelineTaskHandle, TaskState};
