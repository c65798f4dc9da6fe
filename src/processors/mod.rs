// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Frame processing stages.
//!
//! Every stage implements [`processor::Processor`]: it receives one frame at
//! a time together with the direction it travels in, and emits zero or more
//! frames through the [`processor::ProcessorContext`]. Stages are wired into
//! a chain by [`crate::pipeline::channel::ChannelPipeline`], which runs each
//! one on its own tokio task.

pub mod aggregators;
pub mod avatar;
pub mod frameworks;
pub mod function_calls;
pub mod processor;

use serde::{Deserialize, Serialize};

/// Implement `Debug` and `Display` for a stage with a `name: String` field.
///
/// `Debug` prints `TypeName(name)`; `Display` prints just the name.
#[macro_export]
macro_rules! impl_processor_display {
    ($struct_name:ident $(<$($gen:ident: $bound:path),+>)?) => {
        impl$(<$($gen: $bound),+>)? std::fmt::Debug for $struct_name$(<$($gen),+>)? {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($struct_name), self.name)
            }
        }

        impl$(<$($gen: $bound),+>)? std::fmt::Display for $struct_name$(<$($gen),+>)? {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.name)
            }
        }
    };
}

/// Direction of frame flow in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameDirection {
    /// Frames flowing from input to output.
    Downstream,
    /// Frames flowing back from output to input.
    Upstream,
}

impl FrameDirection {
    /// The opposite direction.
    pub fn reverse(self) -> Self {
        match self {
            FrameDirection::Downstream => FrameDirection::Upstream,
            FrameDirection::Upstream => FrameDirection::Downstream,
        }
    }
}
