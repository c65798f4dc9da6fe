// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Pipeline runner that drives tasks to a terminal state.

use crate::pipeline::task::{PipelineTask, TaskState};
use crate::utils::base_object::obj_id;

/// Runs [`PipelineTask`]s to completion.
///
/// Tasks never share state, so any number of them can run concurrently
/// under one runner.
#[derive(Debug)]
pub struct PipelineRunner {
    name: String,
}

impl PipelineRunner {
    pub fn new() -> Self {
        Self {
            name: format!("PipelineRunner#{}", obj_id()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run one task until it completes or is cancelled.
    pub async fn run(&self, task: PipelineTask) -> TaskState {
        tracing::debug!("Runner {} started running {}", self.name, task);
        let task_name = task.name().to_string();
        let state = task.run().await;
        tracing::debug!("Runner {} finished running {} ({})", self.name, task_name, state);
        state
    }

    /// Run several tasks concurrently, each on its own tokio task.
    ///
    /// Returns the terminal states in the order the tasks were given. A task
    /// whose tokio task panicked is reported as `Cancelled`.
    pub async fn run_all(&self, tasks: Vec<PipelineTask>) -> Vec<TaskState> {
        let handles: Vec<_> = tasks
            .into_iter()
            .map(|task| {
                tracing::debug!("Runner {} started running {}", self.name, task);
                tokio::spawn(task.run())
            })
            .collect();

        let mut states = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(state) => states.push(state),
                Err(e) => {
                    tracing::error!("Runner {}: task failed: {e}", self.name);
                    states.push(TaskState::Cancelled);
                }
            }
        }
        tracing::debug!("Runner {} finished {} tasks", self.name, states.len());
        states
    }
}

impl Default for PipelineRunner {
    fn default() -> Self {
        Self::new()
    }
}
