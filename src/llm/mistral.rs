//! Mistral chat-completions provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{AiAnswer, AiProvider, AiRequest, ProviderKind, TokenUsage, costs, status_error, to_plain_text};
use crate::error::LlmError;

const PROVIDER: &str = "mistral";

#[derive(Debug, Clone)]
pub struct MistralConfig {
    pub api_key: SecretString,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl MistralConfig {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            model: "mistral-large-latest".to_string(),
            base_url: "https://api.mistral.ai".to_string(),
            temperature: 0.7,
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct MistralProvider {
    client: Client,
    config: MistralConfig,
    input_cost: Decimal,
    output_cost: Decimal,
}

impl MistralProvider {
    pub fn new(config: MistralConfig) -> Self {
        let (input_cost, output_cost) =
            costs::model_cost(&config.model).unwrap_or_else(costs::default_cost);
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            config,
            input_cost,
            output_cost,
        }
    }

    fn api_url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl AiProvider for MistralProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mistral
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        (self.input_cost, self.output_cost)
    }

    async fn ask(&self, request: &AiRequest) -> Result<AiAnswer, LlmError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system.as_deref() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        let body = ChatRequest {
            model: &self.config.model,
            messages,
            max_tokens: request.max_output_tokens,
            temperature: self.config.temperature,
        };

        tracing::debug!(model = %self.config.model, chars = request.prompt.len(), "Sending question to Mistral");

        let response = self
            .client
            .post(self.api_url())
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(status_error(PROVIDER, status, &text));
        }

        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|e| LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: format!("JSON parse error: {e}"),
            })?;

        let raw = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: "No choices in response".to_string(),
            })?;

        let usage = TokenUsage {
            input_tokens: parsed.usage.prompt_tokens,
            output_tokens: parsed.usage.completion_tokens,
        };
        let cost = costs::cost_of(&usage, self.cost_per_token());
        tracing::info!(
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            %cost,
            "Mistral answered"
        );

        Ok(AiAnswer {
            text: to_plain_text(&raw),
            usage,
            cost,
        })
    }
}

// ── Chat Completions API types ───────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;
    use rust_decimal_macros::dec;
    use serde_json::json;

    use super::*;

    fn provider(server: &mockito::Server) -> MistralProvider {
        let mut config = MistralConfig::new(SecretString::from("mk-test".to_string()));
        config.base_url = server.url();
        MistralProvider::new(config)
    }

    #[tokio::test]
    async fn test_ask_sends_system_and_user_messages() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer mk-test")
            .match_body(Matcher::AllOf(vec![
                Matcher::PartialJson(json!({ "model": "mistral-large-latest" })),
                Matcher::Regex(r#""role":"system""#.to_string()),
            ]))
            .with_status(200)
            .with_body(
                json!({
                    "choices": [{ "message": { "role": "assistant", "content": "Cap au 270, $v^{2}$ faible." } }],
                    "usage": { "prompt_tokens": 500, "completion_tokens": 100 }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let answer = provider(&server)
            .ask(&AiRequest::with_word_limit("Quel cap ?", 40))
            .await
            .unwrap();

        assert_eq!(answer.text, "Cap au 270, v2 faible.");
        // 500 × 2e-6 + 100 × 6e-6
        assert_eq!(answer.cost, dec!(0.0016));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_ask_rate_limited() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(429)
            .create_async()
            .await;

        let err = provider(&server)
            .ask(&AiRequest::with_word_limit("q", 10))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn test_ask_without_choices_is_invalid() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(json!({ "choices": [] }).to_string())
            .create_async()
            .await;

        let err = provider(&server)
            .ask(&AiRequest::with_word_limit("q", 10))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse { .. }));
    }
}
