//! Conversational AI providers.
//!
//! Each provider answers one question per request and reports token usage,
//! from which the cost charged to that provider's ledger is computed.

pub mod anthropic;
pub mod costs;
pub mod mistral;
pub mod plain_text;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

pub use anthropic::{AnthropicConfig, AnthropicProvider};
pub use mistral::{MistralConfig, MistralProvider};
pub use plain_text::to_plain_text;

/// Which provider a device asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Claude,
    Mistral,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Mistral => "mistral",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    /// `gpt` is accepted as an alias for Claude; devices have it on a
    /// preset button.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "claude" | "gpt" => Ok(Self::Claude),
            "mistral" => Ok(Self::Mistral),
            other => Err(format!("unknown provider '{other}'")),
        }
    }
}

/// Instruction sent with every question.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a marine assistant for sailors at sea. \
The user reads your answer on a satellite messenger where every character is expensive. \
Answer concisely and precisely with practical, actionable advice and precise nautical \
vocabulary. Plain text only: no LaTeX, no Markdown, no lists. \
Answer in the language of the question.";

/// A single question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiRequest {
    pub prompt: String,
    pub max_output_tokens: u32,
    pub system: Option<String>,
}

impl AiRequest {
    /// Question capped at roughly `max_words` words of answer.
    pub fn with_word_limit(prompt: impl Into<String>, max_words: u32) -> Self {
        let system = format!("{DEFAULT_SYSTEM_PROMPT} Use at most {max_words} words.");
        Self {
            prompt: prompt.into(),
            max_output_tokens: max_words.saturating_mul(2).clamp(64, 1024),
            system: Some(system),
        }
    }
}

/// Token counters reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A provider's answer, already reduced to plain text.
#[derive(Debug, Clone, PartialEq)]
pub struct AiAnswer {
    pub text: String,
    pub usage: TokenUsage,
    pub cost: Decimal,
}

#[async_trait]
pub trait AiProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn model_name(&self) -> &str;

    /// `(input, output)` USD per token.
    fn cost_per_token(&self) -> (Decimal, Decimal);

    async fn ask(&self, request: &AiRequest) -> Result<AiAnswer, LlmError>;
}

/// Map a non-success HTTP status to the provider error taxonomy.
pub(crate) fn status_error(provider: &str, status: reqwest::StatusCode, body: &str) -> LlmError {
    match status.as_u16() {
        401 | 403 => LlmError::AuthFailed {
            provider: provider.to_string(),
        },
        429 => LlmError::RateLimited {
            provider: provider.to_string(),
        },
        _ => LlmError::RequestFailed {
            provider: provider.to_string(),
            reason: format!("HTTP {status}: {body}"),
        },
    }
}
