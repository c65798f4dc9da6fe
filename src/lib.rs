// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Simple Chatbot - a real-time voice assistant with an animated avatar.
//!
//! A participant talks to a robot over a live audio/video connection. Their
//! speech is transcribed, answered by a language model, spoken back, and the
//! robot's image animates while it talks. Everything runs as a chain of
//! stages exchanging frames in both directions:
//!
//! - [`frames`] defines the closed set of frames,
//! - [`processors`] the stage trait and the conversation stages,
//! - [`pipeline`] the channel pipeline, task and runner,
//! - [`services`] the speech and language-model providers and their stages,
//! - [`transports`] the participant connection,
//! - [`bot`] assembles all of it; [`session`] tracks running bots.

pub mod bot;
pub mod config;
pub mod error;
pub mod frames;
pub mod metrics;
pub mod observers;
pub mod pipeline;
pub mod prelude;
pub mod processors;
pub mod services;
pub mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod tests;
pub mod transcriptions;
pub mod transports;
pub mod utils;
