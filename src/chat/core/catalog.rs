//! Static provider, model and prompt catalogs.
//!
//! Catalogs are fixed enumerations: the settings validator checks user input
//! against them and the UI lists them. Order matters, the first model of a
//! provider is its fallback.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Models served through the OpenAI-style API.
pub const OPENAI_MODELS: &[&str] = &[
    "gpt-4-turbo-preview",
    "gpt-4",
    "gpt-3.5-turbo",
    "gpt-3.5-turbo-16k",
];

/// Models served through the Gemini-style API.
pub const GEMINI_MODELS: &[&str] = &["gemini-pro", "gemini-pro-vision"];

/// Hosted LLM vendor.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// OpenAI chat completions.
    OpenAi,
    /// Google Gemini `generateContent`.
    Gemini,
}

impl Provider {
    /// Every supported provider, baseline first.
    pub const ALL: &'static [Self] = &[Self::OpenAi, Self::Gemini];

    /// Stable identifier (`openai`, `gemini`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
        }
    }

    /// Name used in user-facing messages.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::OpenAi => "OpenAI",
            Self::Gemini => "Gemini",
        }
    }

    /// Model catalog of this provider.
    #[must_use]
    pub const fn models(self) -> &'static [&'static str] {
        match self {
            Self::OpenAi => OPENAI_MODELS,
            Self::Gemini => GEMINI_MODELS,
        }
    }

    /// First model of the catalog, used when a requested model is not served.
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => OPENAI_MODELS[0],
            Self::Gemini => GEMINI_MODELS[0],
        }
    }

    /// Cheap model used by the connection test.
    #[must_use]
    pub const fn connection_test_model(self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-3.5-turbo",
            Self::Gemini => "gemini-pro",
        }
    }

    /// Whether `model` belongs to this provider's catalog.
    #[must_use]
    pub fn serves(self, model: &str) -> bool {
        self.models().contains(&model)
    }

    /// Environment variable holding this provider's API key.
    #[must_use]
    pub const fn api_key_env(self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown provider name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProviderParseError {
    value: String,
}

impl ProviderParseError {
    /// The raw value that failed parsing.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for ProviderParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown provider: {}", self.value)
    }
}

impl std::error::Error for ProviderParseError {}

impl FromStr for Provider {
    type Err = ProviderParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "openai" => Ok(Self::OpenAi),
            "gemini" => Ok(Self::Gemini),
            other => Err(ProviderParseError {
                value: other.to_string(),
            }),
        }
    }
}

/// Named system prompts offered by the UI.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemPromptPreset {
    /// General helpful assistant; the only preset whose text the user may edit.
    Default,
    /// Imaginative answers.
    Creative,
    /// Detailed, reasoned answers.
    Analytical,
    /// Short answers.
    Concise,
    /// Warm, conversational tone.
    Friendly,
}

impl SystemPromptPreset {
    /// Every preset in display order.
    pub const ALL: &'static [Self] = &[
        Self::Default,
        Self::Creative,
        Self::Analytical,
        Self::Concise,
        Self::Friendly,
    ];

    /// Stable identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Creative => "creative",
            Self::Analytical => "analytical",
            Self::Concise => "concise",
            Self::Friendly => "friendly",
        }
    }

    /// Prompt text of the preset.
    #[must_use]
    pub const fn text(self) -> &'static str {
        match self {
            Self::Default => {
                "You are a helpful AI assistant. Provide clear, accurate, and helpful responses."
            }
            Self::Creative => {
                "You are a creative AI assistant. Think outside the box and provide imaginative, innovative responses."
            }
            Self::Analytical => {
                "You are an analytical AI assistant. Provide detailed, logical, and well-reasoned responses with supporting evidence."
            }
            Self::Concise => {
                "You are a concise AI assistant. Provide brief, to-the-point responses while maintaining accuracy."
            }
            Self::Friendly => {
                "You are a friendly AI assistant. Respond in a warm, conversational, and approachable manner."
            }
        }
    }
}

impl FromStr for SystemPromptPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|preset| preset.as_str() == raw)
            .ok_or_else(|| s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parse() {
        assert_eq!("openai".parse::<Provider>().ok(), Some(Provider::OpenAi));
        assert_eq!(" gemini ".parse::<Provider>().ok(), Some(Provider::Gemini));
        let err = "anthropic".parse::<Provider>().err();
        assert_eq!(err.as_ref().map(ProviderParseError::value), Some("anthropic"));
    }

    #[test]
    fn test_default_model_is_first_in_catalog() {
        assert_eq!(Provider::OpenAi.default_model(), "gpt-4-turbo-preview");
        assert_eq!(Provider::Gemini.default_model(), "gemini-pro");
        for provider in Provider::ALL {
            assert!(provider.serves(provider.default_model()));
            assert!(provider.serves(provider.connection_test_model()));
        }
        assert!(!Provider::Gemini.serves("gpt-4"));
    }

    #[test]
    fn test_provider_serde_names() {
        let json = serde_json::to_string(&Provider::OpenAi).unwrap_or_default();
        assert_eq!(json, "\"openai\"");
    }

    #[test]
    fn test_preset_parse() {
        assert_eq!(
            "Creative".parse::<SystemPromptPreset>().ok(),
            Some(SystemPromptPreset::Creative)
        );
        assert!("pirate".parse::<SystemPromptPreset>().is_err());
        assert!(SystemPromptPreset::Concise.text().contains("concise"));
    }
}
