// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Base observer types for watching frame flow.
//!
//! Observers see every frame a stage handles and every frame it passes to a
//! neighbour, without being part of the chain.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use simple_chatbot::observers::{FramePushed, Observer};
//!
//! struct DebugObserver;
//!
//! #[async_trait]
//! impl Observer for DebugObserver {
//!     async fn on_push_frame(&self, data: &FramePushed<'_>) {
//!         println!("{} -> {:?}: {}", data.source_name, data.destination_name, data.frame);
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::frames::FrameEnum;
use crate::processors::FrameDirection;

/// A stage is about to handle a frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameProcessed<'a> {
    pub processor_id: u64,
    pub processor_name: &'a str,
    pub frame: &'a FrameEnum,
    pub direction: FrameDirection,
    /// Nanoseconds since the pipeline started.
    pub timestamp: u64,
}

/// A stage passed a frame to its neighbour.
///
/// `destination_*` is `None` when the frame leaves the chain at either end.
#[derive(Debug, Clone, Copy)]
pub struct FramePushed<'a> {
    pub source_id: u64,
    pub source_name: &'a str,
    pub destination_id: Option<u64>,
    pub destination_name: Option<&'a str>,
    pub frame: &'a FrameEnum,
    pub direction: FrameDirection,
    /// Nanoseconds since the pipeline started.
    pub timestamp: u64,
}

/// Watches frame flow without modifying it.
///
/// Callbacks run inline on the stage's task, so implementations must return
/// quickly. Both methods default to no-ops.
#[async_trait]
pub trait Observer: Send + Sync {
    /// Called before a stage handles `data.frame`.
    async fn on_process_frame(&self, _data: &FrameProcessed<'_>) {}

    /// Called when a stage forwards `data.frame`.
    async fn on_push_frame(&self, _data: &FramePushed<'_>) {}
}
