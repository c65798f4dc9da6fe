// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Bot configuration.
//!
//! [`BotConfig::from_env`] reads provider credentials and optional settings
//! from the process environment. A session may then adjust the result with
//! [`BotConfig::apply_overrides`], using the JSON body it was started with.
//!
//! | Variable            | Required | Default                        |
//! |---------------------|----------|--------------------------------|
//! | `OPENAI_API_KEY`    | yes      |                                |
//! | `CARTESIA_API_KEY`  | yes      |                                |
//! | `SONIOX_API_KEY`    | yes      |                                |
//! | `OPENAI_MODEL`      | no       | `gpt-4.1-mini`                 |
//! | `CARTESIA_VOICE_ID` | no       | the "Movieman" voice           |
//! | `SONIOX_URL`        | no       | the Soniox real-time endpoint  |

use serde_json::Value;

use crate::error::ConfigError;
use crate::services::{cartesia, openai, soniox};
use crate::transcriptions::Language;

/// Opening instructions for the language model.
pub const SYSTEM_PROMPT: &str = "You are Chatbot, a friendly, helpful robot. Your goal is to demonstrate your capabilities in a succinct way. Your output will be converted to audio so don't include special characters in your answers. Respond to what the user said in a creative and helpful way, but keep your responses brief. Start by introducing yourself.";

/// Name the bot joins the call with.
pub const BOT_NAME: &str = "Simple Chatbot";

/// Everything needed to assemble one bot.
#[derive(Clone, PartialEq)]
pub struct BotConfig {
    pub openai_api_key: String,
    pub cartesia_api_key: String,
    pub soniox_api_key: String,
    pub openai_model: String,
    pub cartesia_voice_id: String,
    pub soniox_url: String,
    /// Languages the speaker is expected to use.
    pub language_hints: Vec<Language>,
    pub system_prompt: String,
    pub bot_name: String,
}

impl BotConfig {
    /// A config with the given credentials and every other field at its
    /// default.
    pub fn new(
        openai_api_key: impl Into<String>,
        cartesia_api_key: impl Into<String>,
        soniox_api_key: impl Into<String>,
    ) -> Self {
        Self {
            openai_api_key: openai_api_key.into(),
            cartesia_api_key: cartesia_api_key.into(),
            soniox_api_key: soniox_api_key.into(),
            openai_model: openai::DEFAULT_MODEL.to_string(),
            cartesia_voice_id: cartesia::DEFAULT_VOICE_ID.to_string(),
            soniox_url: soniox::DEFAULT_URL.to_string(),
            language_hints: vec![Language::En, Language::Es, Language::Ja, Language::Zh],
            system_prompt: SYSTEM_PROMPT.to_string(),
            bot_name: BOT_NAME.to_string(),
        }
    }

    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` in place of the environment. Empty values count
    /// as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &'static str| get(key).ok_or(ConfigError::MissingVar(key));

        let mut config = Self::new(
            require("OPENAI_API_KEY")?,
            require("CARTESIA_API_KEY")?,
            require("SONIOX_API_KEY")?,
        );
        if let Some(model) = get("OPENAI_MODEL") {
            config.openai_model = model;
        }
        if let Some(voice_id) = get("CARTESIA_VOICE_ID") {
            config.cartesia_voice_id = voice_id;
        }
        if let Some(url) = get("SONIOX_URL") {
            config.soniox_url = url;
        }
        Ok(config)
    }

    /// Apply settings from a session's JSON body.
    ///
    /// Recognized keys: `model`, `voice_id`, `system_prompt`, `bot_name`
    /// (strings) and `language_hints` (array of language tags). Unknown keys
    /// are ignored; a recognized key with the wrong type is an error.
    pub fn apply_overrides(&mut self, body: &Value) -> Result<(), ConfigError> {
        let Some(body) = body.as_object() else {
            if body.is_null() {
                return Ok(());
            }
            return Err(invalid("body", "expected a JSON object"));
        };

        for (key, target) in [
            ("model", &mut self.openai_model),
            ("voice_id", &mut self.cartesia_voice_id),
            ("system_prompt", &mut self.system_prompt),
            ("bot_name", &mut self.bot_name),
        ] {
            if let Some(value) = body.get(key) {
                let text = value
                    .as_str()
                    .filter(|s| !s.trim().is_empty())
                    .ok_or_else(|| invalid(key, "expected a non-empty string"))?;
                *target = text.to_string();
            }
        }

        if let Some(value) = body.get("language_hints") {
            let tags = value
                .as_array()
                .ok_or_else(|| invalid("language_hints", "expected an array"))?;
            let mut hints = Vec::with_capacity(tags.len());
            for tag in tags {
                let tag = tag
                    .as_str()
                    .ok_or_else(|| invalid("language_hints", "expected language tags"))?;
                let language = Language::from_tag(tag)
                    .ok_or_else(|| invalid("language_hints", &format!("unknown language '{tag}'")))?;
                if !hints.contains(&language) {
                    hints.push(language);
                }
            }
            if hints.is_empty() {
                return Err(invalid("language_hints", "at least one language is required"));
            }
            self.language_hints = hints;
        }

        tracing::debug!(keys = ?body.keys().collect::<Vec<_>>(), "applied session overrides");
        Ok(())
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

impl std::fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotConfig")
            .field("openai_model", &self.openai_model)
            .field("cartesia_voice_id", &self.cartesia_voice_id)
            .field("soniox_url", &self.soniox_url)
            .field("language_hints", &self.language_hints)
            .field("bot_name", &self.bot_name)
            .finish_non_exhaustive()
    }
}
