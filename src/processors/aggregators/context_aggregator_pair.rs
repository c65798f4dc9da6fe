// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Factory for creating paired user/assistant context aggregators.
//!
//! # Usage
//!
//! ```
//! use simple_chatbot::processors::aggregators::context_aggregator_pair::LLMContextAggregatorPair;
//! use simple_chatbot::processors::aggregators::llm_context::{LLMContext, LLMMessage};
//!
//! let context = LLMContext::with_messages(vec![LLMMessage::system("Be brief.")]);
//! let pair = LLMContextAggregatorPair::new(context);
//!
//! // pair.user() goes right after speech-to-text,
//! // pair.assistant() goes after the output transport.
//! let (_user, _assistant) = pair.into_parts();
//! ```

use std::sync::Arc;

use tokio::sync::Mutex;

use super::llm_context::LLMContext;
use super::llm_response::{
    AssistantAggregatorParams, LLMAssistantContextAggregator, LLMUserContextAggregator,
    UserAggregatorParams,
};

/// A user and an assistant aggregator sharing one [`LLMContext`].
///
/// The two aggregators are the only writers of the context.
pub struct LLMContextAggregatorPair {
    context: Arc<Mutex<LLMContext>>,
    user: LLMUserContextAggregator,
    assistant: LLMAssistantContextAggregator,
}

impl LLMContextAggregatorPair {
    /// Create a pair with default parameters.
    pub fn new(context: LLMContext) -> Self {
        Self::with_params(context, UserAggregatorParams::default(), AssistantAggregatorParams::default())
    }

    pub fn with_params(
        context: LLMContext,
        user_params: UserAggregatorParams,
        assistant_params: AssistantAggregatorParams,
    ) -> Self {
        let context = Arc::new(Mutex::new(context));
        Self {
            user: LLMUserContextAggregator::new(context.clone(), user_params),
            assistant: LLMAssistantContextAggregator::new(context.clone(), assistant_params),
            context,
        }
    }

    /// The shared context, for reading snapshots outside the pipeline.
    pub fn context(&self) -> &Arc<Mutex<LLMContext>> {
        &self.context
    }

    pub fn user(&self) -> &LLMUserContextAggregator {
        &self.user
    }

    pub fn assistant(&self) -> &LLMAssistantContextAggregator {
        &self.assistant
    }

    /// Split into the two stages, ready to be placed in a pipeline.
    pub fn into_parts(self) -> (LLMUserContextAggregator, LLMAssistantContextAggregator) {
        (self.user, self.assistant)
    }
}
