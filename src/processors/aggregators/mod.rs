// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Aggregators that turn streamed frames into conversation state.

pub mod context_aggregator_pair;
pub mod llm_context;
pub mod llm_response;
pub mod sentence;

pub use context_aggregator_pair::LLMContextAggregatorPair;
pub use llm_context::{LLMContext, LLMMessage, Role, ToolCall};
pub use llm_response::{
    AssistantAggregatorParams, LLMAssistantContextAggregator, LLMUserContextAggregator,
    UserAggregatorParams,
};
pub use sentence::SentenceAggregator;
