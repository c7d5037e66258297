//! Generation settings and their validator.
//!
//! User input arrives as loosely typed JSON ([`RawSettings`]); the
//! [`SettingsValidator`] turns any such input into a [`ModelSettings`] that
//! satisfies every invariant. It clamps and falls back, it never rejects.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::core::catalog::{Provider, SystemPromptPreset};

/// Lowest accepted sampling temperature.
pub const MIN_TEMPERATURE: f64 = 0.0;
/// Highest accepted sampling temperature.
pub const MAX_TEMPERATURE: f64 = 2.0;
/// Lowest accepted completion token budget.
pub const MIN_MAX_TOKENS: u32 = 1;
/// Highest accepted completion token budget.
pub const MAX_MAX_TOKENS: u32 = 4000;

/// Validated generation settings.
///
/// Invariants: `model` is served by `provider`, `temperature` lies in
/// `[0.0, 2.0]`, `max_tokens` in `[1, 4000]`, `system_prompt` is not blank.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Hosted provider.
    pub provider: Provider,
    /// Model id from the provider's catalog.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Completion token budget.
    pub max_tokens: u32,
    /// Whether retrieved context is spliced into prompts.
    pub use_context: bool,
    /// System prompt sent ahead of the conversation.
    pub system_prompt: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAi,
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.7,
            max_tokens: 2000,
            use_context: true,
            system_prompt: SystemPromptPreset::Default.text().to_string(),
        }
    }
}

/// Unvalidated settings as submitted by a client.
///
/// Every field is optional and may hold any JSON type.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawSettings {
    /// Requested provider name.
    pub provider: Option<Value>,
    /// Requested model id.
    pub model: Option<Value>,
    /// Requested temperature.
    pub temperature: Option<Value>,
    /// Requested token budget.
    pub max_tokens: Option<Value>,
    /// Context toggle.
    pub use_context: Option<Value>,
    /// Custom system prompt.
    pub system_prompt: Option<Value>,
    /// Named preset overriding the custom prompt.
    pub prompt_preset: Option<Value>,
}

impl RawSettings {
    /// Build raw settings from any JSON value.
    ///
    /// Non-object input yields empty settings.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let Some(map) = value.as_object() else {
            return Self::default();
        };
        let field = |name: &str| map.get(name).filter(|v| !v.is_null()).cloned();
        Self {
            provider: field("provider"),
            model: field("model"),
            temperature: field("temperature"),
            max_tokens: field("max_tokens"),
            use_context: field("use_context"),
            system_prompt: field("system_prompt"),
            prompt_preset: field("prompt_preset"),
        }
    }
}

impl From<&ModelSettings> for RawSettings {
    fn from(settings: &ModelSettings) -> Self {
        Self {
            provider: Some(Value::from(settings.provider.as_str())),
            model: Some(Value::from(settings.model.as_str())),
            temperature: Some(Value::from(settings.temperature)),
            max_tokens: Some(Value::from(settings.max_tokens)),
            use_context: Some(Value::from(settings.use_context)),
            system_prompt: Some(Value::from(settings.system_prompt.as_str())),
            prompt_preset: None,
        }
    }
}

/// Normalizes raw settings against the static catalog.
#[derive(Clone, Debug, Default)]
pub struct SettingsValidator {
    baseline: ModelSettings,
}

impl SettingsValidator {
    /// Create a validator whose fallbacks come from `baseline`.
    ///
    /// The baseline is itself normalized first, so a misconfigured baseline
    /// cannot leak invalid values.
    #[must_use]
    pub fn new(baseline: ModelSettings) -> Self {
        let validator = Self {
            baseline: ModelSettings::default(),
        };
        let baseline = validator.validate(&RawSettings::from(&baseline), Provider::ALL);
        Self { baseline }
    }

    /// Baseline settings used for absent or unusable fields.
    #[must_use]
    pub const fn baseline(&self) -> &ModelSettings {
        &self.baseline
    }

    /// Validate raw settings. Never fails.
    ///
    /// - Unknown or absent provider: the baseline provider.
    /// - Model not served by the provider: the provider's first model.
    /// - Temperature and token budget are clamped; unparsable values fall
    ///   back to the baseline.
    /// - A non-default preset replaces the prompt; a blank prompt falls back
    ///   to the baseline prompt.
    /// - `use_context` is coerced to a boolean, absent means `true`.
    #[must_use]
    pub fn validate(&self, raw: &RawSettings, known_providers: &[Provider]) -> ModelSettings {
        let provider = raw
            .provider
            .as_ref()
            .and_then(Value::as_str)
            .and_then(|name| name.parse::<Provider>().ok())
            .filter(|provider| known_providers.contains(provider))
            .unwrap_or(self.baseline.provider);

        let model = raw
            .model
            .as_ref()
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|model| provider.serves(model))
            .unwrap_or_else(|| provider.default_model())
            .to_string();

        let temperature = raw
            .temperature
            .as_ref()
            .and_then(coerce_f64)
            .map_or(self.baseline.temperature, |t| {
                t.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE)
            });

        let max_tokens = raw
            .max_tokens
            .as_ref()
            .and_then(coerce_i64)
            .map_or(self.baseline.max_tokens, clamp_max_tokens);

        let use_context = raw.use_context.as_ref().is_none_or(coerce_bool);

        let preset = raw
            .prompt_preset
            .as_ref()
            .and_then(Value::as_str)
            .and_then(|name| name.parse::<SystemPromptPreset>().ok())
            .filter(|preset| *preset != SystemPromptPreset::Default);

        let system_prompt = match preset {
            Some(preset) => preset.text().to_string(),
            None => raw
                .system_prompt
                .as_ref()
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|prompt| !prompt.is_empty())
                .map_or_else(|| self.baseline.system_prompt.clone(), str::to_string),
        };

        ModelSettings {
            provider,
            model,
            temperature,
            max_tokens,
            use_context,
            system_prompt,
        }
    }
}

fn clamp_max_tokens(value: i64) -> u32 {
    let clamped = value.clamp(i64::from(MIN_MAX_TOKENS), i64::from(MAX_MAX_TOKENS));
    u32::try_from(clamped).unwrap_or(MAX_MAX_TOKENS)
}

fn coerce_f64(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    number.filter(|n| !n.is_nan())
}

#[allow(clippy::cast_possible_truncation)]
fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|_| i64::MAX))
            .or_else(|| n.as_f64().filter(|f| !f.is_nan()).map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| !f.is_nan())
                    .map(|f| f.trunc() as i64)
            })
        }
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn coerce_bool(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "" | "false" | "0" | "no" | "off"
        ),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
