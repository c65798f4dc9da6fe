// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Metrics reported by service stages.
//!
//! Services emit [`MetricsData`] inside `MetricsFrame`s when the task enables
//! metrics; the RTVI observer forwards them to the client.

use serde::{Deserialize, Serialize};

/// The kind of metric being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    /// Time to first byte from a provider.
    Ttfb,
    /// Wall time spent on one request.
    Processing,
    /// Language-model token usage.
    LlmUsage,
    /// Text-to-speech character usage.
    TtsUsage,
}

/// Token usage statistics for one generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LLMTokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// One metric sample, tagged with the stage and model that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricsData {
    /// Seconds until the first response byte.
    Ttfb {
        processor: String,
        model: Option<String>,
        value: f64,
    },
    /// Seconds spent handling one request.
    Processing {
        processor: String,
        model: Option<String>,
        value: f64,
    },
    /// Token usage for one generation.
    LlmUsage {
        processor: String,
        model: Option<String>,
        value: LLMTokenUsage,
    },
    /// Characters synthesized for one utterance.
    TtsUsage {
        processor: String,
        model: Option<String>,
        value: u64,
    },
}

impl MetricsData {
    pub fn metric_type(&self) -> MetricType {
        match self {
            MetricsData::Ttfb { .. } => MetricType::Ttfb,
            MetricsData::Processing { .. } => MetricType::Processing,
            MetricsData::LlmUsage { .. } => MetricType::LlmUsage,
            MetricsData::TtsUsage { .. } => MetricType::TtsUsage,
        }
    }

    /// Name of the stage that produced the sample.
    pub fn processor(&self) -> &str {
        match self {
            MetricsData::Ttfb { processor, .. }
            | MetricsData::Processing { processor, .. }
            | MetricsData::LlmUsage { processor, .. }
            | MetricsData::TtsUsage { processor, .. } => processor,
        }
    }
}
