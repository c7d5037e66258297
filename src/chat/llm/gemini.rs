//! Gemini-style `generateContent` and `embedContent`.
//!
//! Gemini has no system role and names the assistant `model`, so an
//! assembled prompt is reshaped by [`GeminiTurns::shape`] before sending.
//! Replies are not streamed incrementally; [`LlmProvider::stream`] replays
//! the complete reply in fixed-size chunks.

use serde::{Deserialize, Serialize};

use crate::chat::core::catalog::Provider;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::http::{ensure_success, join_url};
use crate::chat::core::message::{Message, Role};
use crate::chat::core::settings::ModelSettings;
use crate::chat::llm::provider::{
    Completion, EmbeddingPurpose, LlmProvider, ProviderFuture, Usage,
};
use crate::chat::llm::stream::{TextStream, chunked_stream};

/// Embedding model (768 dimensions).
pub const EMBEDDING_MODEL: &str = "embedding-001";

/// Prompt sent when the conversation holds no turns at all.
pub const EMPTY_PROMPT: &str = "Hello";

const SERVICE: &str = "Gemini";
const API_KEY_HEADER: &str = "x-goog-api-key";

/// One part of a Gemini turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeminiPart {
    /// Text payload.
    pub text: String,
}

/// One Gemini turn (`user` or `model`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GeminiContent {
    /// `user` or `model`.
    pub role: &'static str,
    /// Turn payload.
    pub parts: Vec<GeminiPart>,
}

impl GeminiContent {
    fn new(role: &'static str, text: String) -> Self {
        Self {
            role,
            parts: vec![GeminiPart { text }],
        }
    }

    /// Text of the first part.
    #[must_use]
    pub fn text(&self) -> &str {
        self.parts.first().map_or("", |part| part.text.as_str())
    }
}

/// A prompt reshaped for Gemini.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GeminiTurns {
    /// Several turns: prior history plus the live turn.
    Chat {
        /// Every turn except the last.
        history: Vec<GeminiContent>,
        /// The last turn.
        live: GeminiContent,
    },
    /// A single-shot prompt.
    Single {
        /// Prompt text.
        prompt: String,
    },
}

impl GeminiTurns {
    /// Reshape an assembled prompt.
    ///
    /// System messages are joined by a blank line and prepended, separated by
    /// a blank line, to the first user turn; they are dropped when there is
    /// no user turn.
    #[must_use]
    pub fn shape(messages: &[Message]) -> Self {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        let mut turns: Vec<GeminiContent> = messages
            .iter()
            .filter_map(|m| match m.role {
                Role::User => Some(GeminiContent::new("user", m.content.clone())),
                Role::Assistant => Some(GeminiContent::new("model", m.content.clone())),
                Role::System => None,
            })
            .collect();

        if !system.is_empty() {
            let preamble = system.join("\n\n");
            if let Some(part) = turns
                .iter_mut()
                .find(|turn| turn.role == "user")
                .and_then(|turn| turn.parts.first_mut())
            {
                part.text = format!("{preamble}\n\n{}", part.text);
            }
        }

        match turns.len() {
            0 => Self::Single {
                prompt: EMPTY_PROMPT.to_string(),
            },
            1 => Self::Single {
                prompt: turns.remove(0).text().to_string(),
            },
            _ => match turns.pop() {
                Some(live) => Self::Chat {
                    history: turns,
                    live,
                },
                None => Self::Single {
                    prompt: EMPTY_PROMPT.to_string(),
                },
            },
        }
    }

    /// Flatten into the `contents` array of a `generateContent` request.
    #[must_use]
    pub fn into_contents(self) -> Vec<GeminiContent> {
        match self {
            Self::Chat { mut history, live } => {
                history.push(live);
                history
            }
            Self::Single { prompt } => vec![GeminiContent::new("user", prompt)],
        }
    }
}

/// Client for a Gemini-compatible API.
#[derive(Clone)]
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiProvider {
    /// Create a client for `base_url` (e.g. `https://generativelanguage.googleapis.com/v1beta`).
    #[must_use]
    pub fn new(client: reqwest::Client, api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    async fn complete_inner(
        &self,
        messages: &[Message],
        settings: &ModelSettings,
    ) -> ChatResult<Completion> {
        let turns = GeminiTurns::shape(messages);
        if matches!(turns, GeminiTurns::Chat { .. }) {
            tracing::debug!("gemini chat request with {} turns", messages.len());
        }

        let body = GenerateContentRequest {
            contents: turns.into_contents(),
            generation_config: GenerationConfig {
                temperature: settings.temperature,
                max_output_tokens: settings.max_tokens,
            },
        };

        let url = join_url(&self.base_url, &format!("models/{}:generateContent", settings.model));
        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await?;
        let response = ensure_success(response, SERVICE).await?;
        let parsed: GenerateContentResponse = response.json().await?;
        parsed.into_completion()
    }

    async fn embed_inner(&self, text: &str, purpose: EmbeddingPurpose) -> ChatResult<Vec<f32>> {
        let model = format!("models/{EMBEDDING_MODEL}");
        let body = EmbedContentRequest {
            model: &model,
            content: EmbedContent {
                parts: vec![GeminiPart {
                    text: text.to_string(),
                }],
            },
            task_type: task_type(purpose),
        };

        let url = join_url(&self.base_url, &format!("{model}:embedContent"));
        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await?;
        let response = ensure_success(response, SERVICE).await?;
        let parsed: EmbedContentResponse = response.json().await?;
        Ok(parsed.embedding.values)
    }
}

impl LlmProvider for GeminiProvider {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    fn complete<'a>(
        &'a self,
        messages: &'a [Message],
        settings: &'a ModelSettings,
    ) -> ProviderFuture<'a, ChatResult<Completion>> {
        Box::pin(self.complete_inner(messages, settings))
    }

    fn stream(&self, messages: Vec<Message>, settings: ModelSettings) -> TextStream {
        let this = self.clone();
        chunked_stream(Provider::Gemini, async move {
            this.complete_inner(&messages, &settings)
                .await
                .map(|completion| completion.content)
        })
    }

    fn embed<'a>(
        &'a self,
        text: &'a str,
        purpose: EmbeddingPurpose,
    ) -> ProviderFuture<'a, ChatResult<Vec<f32>>> {
        Box::pin(self.embed_inner(text, purpose))
    }
}

const fn task_type(purpose: EmbeddingPurpose) -> &'static str {
    match purpose {
        EmbeddingPurpose::Document => "RETRIEVAL_DOCUMENT",
        EmbeddingPurpose::Query => "RETRIEVAL_QUERY",
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    max_output_tokens: u32,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct GenerateContentResponse {
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    prompt_feedback: Option<PromptFeedback>,
}

impl GenerateContentResponse {
    fn into_completion(self) -> ChatResult<Completion> {
        let Some(candidate) = self.candidates.into_iter().next() else {
            let reason = self
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .map_or_else(String::new, |r| format!(" (blocked: {r})"));
            return Err(ChatError::MalformedResponse(format!(
                "response has no candidates{reason}"
            )));
        };

        let content = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<String>()
            })
            .unwrap_or_default();
        let usage = self.usage_metadata.unwrap_or_default();

        Ok(Completion {
            content,
            usage: Usage {
                prompt_tokens: usage.prompt_token_count,
                completion_tokens: usage.candidates_token_count,
                total_tokens: usage.total_token_count,
            },
        })
    }
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: u32,
    candidates_token_count: u32,
    total_token_count: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: &'a str,
    content: EmbedContent,
    task_type: &'static str,
}

#[derive(Serialize)]
struct EmbedContent {
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct EmbedContentResponse {
    embedding: EmbeddingValues,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_is_prepended_to_first_user_turn() {
        let turns = GeminiTurns::shape(&[Message::system("Be terse"), Message::user("Hi")]);
        assert_eq!(
            turns,
            GeminiTurns::Single {
                prompt: "Be terse\n\nHi".to_string()
            }
        );
    }

    #[test]
    fn test_multiple_system_messages_are_joined() {
        let turns = GeminiTurns::shape(&[
            Message::system("Be terse"),
            Message::system("Context: parks"),
            Message::user("Hi"),
        ]);
        assert_eq!(
            turns,
            GeminiTurns::Single {
                prompt: "Be terse\n\nContext: parks\n\nHi".to_string()
            }
        );
    }

    #[test]
    fn test_chat_mode_splits_history_and_live_turn() {
        let turns = GeminiTurns::shape(&[
            Message::system("S"),
            Message::user("one"),
            Message::assistant("two"),
            Message::user("three"),
        ]);
        let GeminiTurns::Chat { history, live } = turns else {
            unreachable!("three turns shape into chat mode");
        };
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].text(), "S\n\none");
        assert_eq!(history[1].role, "model");
        assert_eq!(live.role, "user");
        assert_eq!(live.text(), "three");
    }

    #[test]
    fn test_no_turns_sends_hello() {
        let turns = GeminiTurns::shape(&[Message::system("only system")]);
        assert_eq!(
            turns,
            GeminiTurns::Single {
                prompt: EMPTY_PROMPT.to_string()
            }
        );
        assert_eq!(GeminiTurns::shape(&[]).into_contents()[0].text(), "Hello");
    }

    #[test]
    fn test_parse_generate_content_response() {
        let body = r#"{
            "candidates": [{"content": {"role": "model", "parts": [{"text": "Hello "}, {"text": "there"}]}}],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2, "totalTokenCount": 6}
        }"#;
        let completion = serde_json::from_str::<GenerateContentResponse>(body)
            .ok()
            .and_then(|r| r.into_completion().ok())
            .unwrap_or_default();
        assert_eq!(completion.content, "Hello there");
        assert_eq!(completion.usage.prompt_tokens, 4);
        assert_eq!(completion.usage.total_tokens, 6);
    }

    #[test]
    fn test_blocked_prompt_is_malformed() {
        let body = r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#;
        let result = serde_json::from_str::<GenerateContentResponse>(body)
            .map(GenerateContentResponse::into_completion)
            .ok();
        let Some(Err(ChatError::MalformedResponse(message))) = result else {
            unreachable!("blocked prompt yields a malformed response error");
        };
        assert!(message.contains("SAFETY"));
    }

    #[test]
    fn test_generation_config_field_names() {
        let body = GenerateContentRequest {
            contents: GeminiTurns::shape(&[Message::user("Hi")]).into_contents(),
            generation_config: GenerationConfig {
                temperature: 0.5,
                max_output_tokens: 100,
            },
        };
        let value = serde_json::to_value(&body).unwrap_or_default();
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 100);
        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(value["contents"][0]["parts"][0]["text"], "Hi");
    }

    mod over_http {
        use axum::extract::Path;
        use axum::http::{HeaderMap, StatusCode};
        use axum::response::{IntoResponse, Response};
        use axum::routing::post;
        use axum::{Json, Router};
        use serde_json::{Value, json};

        use super::*;
        use crate::chat::testing::serve;

        const KEY: &str = "g-test";

        async fn models(
            Path(call): Path<String>,
            headers: HeaderMap,
            Json(body): Json<Value>,
        ) -> Response {
            if headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) != Some(KEY) {
                let error = json!({"error": {"message": "API key not valid"}});
                return (StatusCode::BAD_REQUEST, Json(error)).into_response();
            }
            match call.as_str() {
                "gemini-pro:generateContent" => {
                    let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap_or_default();
                    let budget = &body["generationConfig"]["maxOutputTokens"];
                    Json(json!({
                        "candidates": [{"content": {"role": "model", "parts": [{"text": format!("{prompt} ({budget})")}]}}],
                        "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 4, "totalTokenCount": 7}
                    }))
                    .into_response()
                }
                "embedding-001:embedContent" => {
                    let marker = if body["taskType"] == "RETRIEVAL_QUERY" { 1.0 } else { 2.0 };
                    Json(json!({"embedding": {"values": [marker]}})).into_response()
                }
                _ => StatusCode::NOT_FOUND.into_response(),
            }
        }

        async fn mock_api() -> String {
            serve(Router::new().route("/models/{call}", post(models))).await
        }

        fn gemini_settings() -> ModelSettings {
            ModelSettings {
                provider: Provider::Gemini,
                model: "gemini-pro".to_string(),
                max_tokens: 64,
                ..ModelSettings::default()
            }
        }

        #[tokio::test]
        async fn test_generate_content_route_and_key_header() {
            let provider = GeminiProvider::new(reqwest::Client::new(), KEY, mock_api().await);
            let completion = provider
                .complete(&[Message::system("Be terse"), Message::user("Hi")], &gemini_settings())
                .await
                .unwrap_or_default();
            assert_eq!(completion.content, "Be terse\n\nHi (64)");
            assert_eq!(completion.usage.total_tokens, 7);
        }

        #[tokio::test]
        async fn test_unknown_model_route_is_an_api_error() {
            let provider = GeminiProvider::new(reqwest::Client::new(), KEY, mock_api().await);
            let settings = ModelSettings {
                model: "gemini-pro-vision".to_string(),
                ..gemini_settings()
            };
            let result = provider.complete(&[Message::user("Hi")], &settings).await;
            assert!(matches!(result, Err(ChatError::Api { status: 404, .. })));
        }

        #[tokio::test]
        async fn test_embedding_task_type_follows_purpose() {
            let provider = GeminiProvider::new(reqwest::Client::new(), KEY, mock_api().await);
            let query = provider.embed("parks", EmbeddingPurpose::Query).await.ok();
            let document = provider.embed("parks", EmbeddingPurpose::Document).await.ok();
            assert_eq!(query, Some(vec![1.0]));
            assert_eq!(document, Some(vec![2.0]));
        }
    }
}
