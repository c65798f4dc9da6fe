// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Languages used for speech recognition hints and transcript tagging.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A spoken language, identified by its ISO 639-1 code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Es,
    Ja,
    Zh,
    Fr,
    De,
    It,
    Pt,
}

impl Language {
    /// The ISO 639-1 code, e.g. `"en"`.
    pub fn code(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Es => "es",
            Language::Ja => "ja",
            Language::Zh => "zh",
            Language::Fr => "fr",
            Language::De => "de",
            Language::It => "it",
            Language::Pt => "pt",
        }
    }

    /// Resolve a provider language tag, accepting regional variants
    /// such as `"en-US"` or `"zh_CN"`.
    pub fn from_tag(tag: &str) -> Option<Language> {
        let primary = tag
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match primary.as_str() {
            "en" => Some(Language::En),
            "es" => Some(Language::Es),
            "ja" => Some(Language::Ja),
            "zh" => Some(Language::Zh),
            "fr" => Some(Language::Fr),
            "de" => Some(Language::De),
            "it" => Some(Language::It),
            "pt" => Some(Language::Pt),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::from_tag(s).ok_or_else(|| format!("unsupported language '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tag_accepts_regional_variants() {
        assert_eq!(Language::from_tag("en"), Some(Language::En));
        assert_eq!(Language::from_tag("en-US"), Some(Language::En));
        assert_eq!(Language::from_tag("ZH_cn"), Some(Language::Zh));
        assert_eq!(Language::from_tag("xx"), None);
        assert_eq!(Language::from_tag(""), None);
    }

    #[test]
    fn test_serde_uses_codes() {
        assert_eq!(serde_json::to_string(&Language::Ja).unwrap(), "\"ja\"");
        let lang: Language = serde_json::from_str("\"es\"").unwrap();
        assert_eq!(lang, Language::Es);
        assert_eq!("zh".parse::<Language>().unwrap(), Language::Zh);
    }
}
