// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Pipeline observers for monitoring frame flow.
//!
//! Observers are handed to a `PipelineTask` and receive a callback for every
//! frame a stage processes and every frame it pushes to a neighbour.

pub mod base_observer;

pub use base_observer::{FrameProcessed, FramePushed, Observer};
