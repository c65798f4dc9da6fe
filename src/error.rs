// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Error types.
//!
//! Failures inside a running pipeline are turned into `ErrorFrame`s or
//! function-call results by the stage that hit them. The types here cover
//! what is returned to callers: assembly problems before a task starts,
//! provider call failures, and session bookkeeping.

/// Errors raised while assembling or running a pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Invalid pipeline assembly, e.g. an empty stage list.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// An external provider failed and the task could not recover.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    /// The task was cancelled. Not a failure; never surfaced as one.
    #[error("pipeline cancelled: {0}")]
    Cancelled(String),
    /// The participant-facing transport is gone.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors from speech, language-model and transport providers.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("stream error: {0}")]
    Stream(String),
    #[error("failed to parse provider response: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid provider configuration: {0}")]
    Config(String),
}

/// Errors from the session registry.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session '{0}' already exists")]
    AlreadyExists(String),
    #[error("session '{0}' not found")]
    NotFound(String),
}

/// Errors while loading bot configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),
    #[error("invalid value for '{key}': {reason}")]
    Invalid { key: String, reason: String },
}

impl From<ConfigError> for PipelineError {
    fn from(err: ConfigError) -> Self {
        PipelineError::Configuration(err.to_string())
    }
}
