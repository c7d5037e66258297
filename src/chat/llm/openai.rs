//! OpenAI-style chat completions and embeddings.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::core::catalog::Provider;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::http::{ensure_success, join_url};
use crate::chat::core::message::Message;
use crate::chat::core::settings::ModelSettings;
use crate::chat::llm::provider::{
    Completion, EmbeddingPurpose, LlmProvider, ProviderFuture, Usage,
};
use crate::chat::llm::stream::{TextStream, sse_stream};

/// Embedding model used for the vector store (1536 dimensions).
pub const EMBEDDING_MODEL: &str = "text-embedding-ada-002";

const SERVICE: &str = "OpenAI";

/// Client for an OpenAI-compatible API.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    /// Create a client for `base_url` (e.g. `https://api.openai.com/v1`).
    #[must_use]
    pub fn new(client: reqwest::Client, api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    fn chat_request(
        &self,
        messages: &[Message],
        settings: &ModelSettings,
        stream: bool,
    ) -> reqwest::RequestBuilder {
        let body = ChatCompletionRequest {
            model: &settings.model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            stream,
        };

        self.client
            .post(join_url(&self.base_url, "chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&body)
    }

    async fn complete_inner(
        &self,
        messages: &[Message],
        settings: &ModelSettings,
    ) -> ChatResult<Completion> {
        let response = self.chat_request(messages, settings, false).send().await?;
        let response = ensure_success(response, SERVICE).await?;
        let parsed: ChatCompletionResponse = response.json().await?;
        parsed.into_completion()
    }

    async fn embed_inner(&self, text: &str) -> ChatResult<Vec<f32>> {
        let response = self
            .client
            .post(join_url(&self.base_url, "embeddings"))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: EMBEDDING_MODEL,
                input: text,
            })
            .send()
            .await?;
        let response = ensure_success(response, SERVICE).await?;
        let parsed: EmbeddingResponse = response.json().await?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ChatError::MalformedResponse("embedding response has no data".to_string()))
    }
}

impl LlmProvider for OpenAiProvider {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    fn complete<'a>(
        &'a self,
        messages: &'a [Message],
        settings: &'a ModelSettings,
    ) -> ProviderFuture<'a, ChatResult<Completion>> {
        Box::pin(self.complete_inner(messages, settings))
    }

    fn stream(&self, messages: Vec<Message>, settings: ModelSettings) -> TextStream {
        let request = self.chat_request(&messages, &settings, true);
        sse_stream(Provider::OpenAi, async move { request.send().await }, stream_delta)
    }

    fn embed<'a>(
        &'a self,
        text: &'a str,
        _purpose: EmbeddingPurpose,
    ) -> ProviderFuture<'a, ChatResult<Vec<f32>>> {
        Box::pin(self.embed_inner(text))
    }
}

/// Text delta of one streamed chunk.
fn stream_delta(value: &Value) -> Option<String> {
    value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

impl ChatCompletionResponse {
    fn into_completion(self) -> ChatResult<Completion> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::MalformedResponse("response has no choices".to_string()))?;
        let usage = self.usage.unwrap_or_default();
        Ok(Completion {
            content: choice.message.content.unwrap_or_default(),
            usage: Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            },
        })
    }
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completion_with_usage() {
        let body = r#"{
            "choices": [{"message": {"role": "assistant", "content": "Bonjour"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        }"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(body).unwrap_or(ChatCompletionResponse {
            choices: Vec::new(),
            usage: None,
        });
        let completion = parsed.into_completion().ok().unwrap_or_default();
        assert_eq!(completion.content, "Bonjour");
        assert_eq!(completion.usage.total_tokens, 15);
    }

    #[test]
    fn test_missing_usage_defaults_to_zero() {
        let body = r#"{"choices": [{"message": {"content": "ok"}}]}"#;
        let completion = serde_json::from_str::<ChatCompletionResponse>(body)
            .ok()
            .and_then(|r| r.into_completion().ok())
            .unwrap_or_default();
        assert_eq!(completion.content, "ok");
        assert_eq!(completion.usage, Usage::default());
    }

    #[test]
    fn test_no_choices_is_malformed() {
        let parsed = serde_json::from_str::<ChatCompletionResponse>(r#"{"choices": []}"#).ok();
        let result = parsed.map(ChatCompletionResponse::into_completion);
        assert!(matches!(result, Some(Err(ChatError::MalformedResponse(_)))));
    }

    #[test]
    fn test_stream_delta() {
        let chunk = serde_json::json!({"choices": [{"delta": {"content": "Hel"}}]});
        assert_eq!(stream_delta(&chunk), Some("Hel".to_string()));
        let role_only = serde_json::json!({"choices": [{"delta": {"role": "assistant"}}]});
        assert_eq!(stream_delta(&role_only), None);
    }

    #[test]
    fn test_request_body_shape() {
        let body = ChatCompletionRequest {
            model: "gpt-4",
            messages: vec![WireMessage {
                role: "system",
                content: "Be terse",
            }],
            temperature: 0.2,
            max_tokens: 10,
            stream: true,
        };
        let value = serde_json::to_value(&body).unwrap_or_default();
        assert_eq!(value["model"], "gpt-4");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["max_tokens"], 10);
        assert_eq!(value["stream"], true);
    }

    mod over_http {
        use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
        use axum::http::{HeaderMap, StatusCode};
        use axum::response::{IntoResponse, Response};
        use axum::routing::post;
        use axum::{Json, Router};
        use futures::StreamExt;
        use serde_json::json;

        use super::*;
        use crate::chat::llm::stream::StreamChunk;
        use crate::chat::testing::serve;

        const KEY: &str = "sk-test";

        async fn completions(headers: HeaderMap, Json(body): Json<Value>) -> Response {
            let bearer = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
            if bearer != Some("Bearer sk-test") {
                let error = json!({"error": {"message": "Incorrect API key provided"}});
                return (StatusCode::UNAUTHORIZED, Json(error)).into_response();
            }
            if body["stream"] == true {
                let events = "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n\
                              data: {\"choices\":[{\"delta\":{\"content\":\"Le march\"}}]}\n\n\
                              data: {\"choices\":[{\"delta\":{\"content\":\"é ouvre\"}}]}\n\n\
                              data: [DONE]\n\n";
                return ([(CONTENT_TYPE, "text/event-stream")], events).into_response();
            }
            Json(json!({
                "choices": [{"message": {"role": "assistant", "content": format!("model={}", body["model"].as_str().unwrap_or_default())}}],
                "usage": {"prompt_tokens": 7, "completion_tokens": 2, "total_tokens": 9}
            }))
            .into_response()
        }

        async fn embeddings(Json(body): Json<Value>) -> Json<Value> {
            let dims = if body["model"] == EMBEDDING_MODEL { 3 } else { 1 };
            Json(json!({"data": [{"embedding": vec![0.5_f32; dims]}]}))
        }

        async fn mock_api() -> String {
            let router = Router::new()
                .route("/v1/chat/completions", post(completions))
                .route("/v1/embeddings", post(embeddings));
            format!("{}/v1", serve(router).await)
        }

        #[tokio::test]
        async fn test_complete_round_trip() {
            let provider = OpenAiProvider::new(reqwest::Client::new(), KEY, mock_api().await);
            let completion = provider
                .complete(&[Message::user("Hi")], &ModelSettings::default())
                .await
                .unwrap_or_default();
            assert_eq!(completion.content, "model=gpt-3.5-turbo");
            assert_eq!(completion.usage.total_tokens, 9);
        }

        #[tokio::test]
        async fn test_rejected_key_is_an_api_error() {
            let provider = OpenAiProvider::new(reqwest::Client::new(), "wrong", mock_api().await);
            let result = provider
                .complete(&[Message::user("Hi")], &ModelSettings::default())
                .await;
            let Err(ChatError::Api { status, message, .. }) = result else {
                unreachable!("a 401 maps to an API error");
            };
            assert_eq!(status, 401);
            assert_eq!(message, "Incorrect API key provided");
        }

        #[tokio::test]
        async fn test_stream_over_sse() {
            let provider = OpenAiProvider::new(reqwest::Client::new(), KEY, mock_api().await);
            let chunks: Vec<StreamChunk> = provider
                .stream(vec![Message::user("Hi")], ModelSettings::default())
                .collect()
                .await;
            assert_eq!(
                chunks,
                vec![
                    StreamChunk::Text("Le march".to_string()),
                    StreamChunk::Text("é ouvre".to_string()),
                ]
            );
        }

        #[tokio::test]
        async fn test_stream_with_rejected_key_yields_one_error() {
            let provider = OpenAiProvider::new(reqwest::Client::new(), "wrong", mock_api().await);
            let chunks: Vec<StreamChunk> = provider
                .stream(vec![Message::user("Hi")], ModelSettings::default())
                .collect()
                .await;
            assert_eq!(chunks.len(), 1);
            assert!(chunks[0].as_text().starts_with("Error: OpenAI API error: "));
        }

        #[tokio::test]
        async fn test_embed_uses_ada() {
            let provider = OpenAiProvider::new(reqwest::Client::new(), KEY, mock_api().await);
            let values = provider
                .embed("parks", EmbeddingPurpose::Query)
                .await
                .unwrap_or_default();
            assert_eq!(values.len(), 3);
        }
    }
}
