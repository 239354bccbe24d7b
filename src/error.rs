//! Error types for satrelay.

use std::time::Duration;

/// Top-level error type for a relay run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    #[error("Correlation error: {0}")]
    Correlation(#[from] CorrelationError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mailbox and outbound mail errors.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Mail request to {operation} failed: {reason}")]
    RequestFailed { operation: String, reason: String },

    #[error("Mail API rejected {operation} with HTTP {status}: {body}")]
    Rejected {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("Mail API authentication failed")]
    AuthFailed,

    #[error("Invalid mail payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid recipient address: {0}")]
    InvalidRecipient(String),

    #[error("Mail operation {operation} timed out after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },
}

/// Errors from dispatching a request to an asynchronous provider.
///
/// A provider that simply never answers is not an error; see
/// [`crate::mail::Correlation::Expired`].
#[derive(Debug, thiserror::Error)]
pub enum CorrelationError {
    #[error("Dispatch of request {request_key} failed: {source}")]
    Dispatch {
        request_key: String,
        #[source]
        source: MailError,
    },
}

/// AI provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} is not configured")]
    NotConfigured { provider: String },

    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited")]
    RateLimited { provider: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

/// Fragment encoding/decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    #[error("Fragment budget {budget} is below the envelope minimum of {minimum}")]
    BudgetTooSmall { budget: usize, minimum: usize },

    #[error("Malformed fragment envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Fragment {index} of {total} is missing")]
    MissingFragment { index: usize, total: usize },

    #[error("Fragments disagree on total count: {first} vs {other}")]
    InconsistentTotal { first: usize, other: usize },

    #[error("No fragments supplied")]
    Empty,

    #[error("Base64 decoding failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Decompression failed: {0}")]
    Decompress(#[from] std::io::Error),
}

/// Per-fragment delivery errors.
///
/// These never escape a delivery run; executors fold them into a
/// [`crate::delivery::DeliveryOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to send fragment on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Channel {name} answered with HTTP {status}")]
    Status { name: String, status: u16 },

    #[error("Endpoint {url} has no {missing}")]
    MissingPrerequisite { url: String, missing: String },

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Headless-browser errors.
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("Browser launch failed: {0}")]
    LaunchFailed(String),

    #[error("Navigation to {url} failed: {reason}")]
    NavigationFailed { url: String, reason: String },

    #[error("Element {selector} not found")]
    ElementNotFound { selector: String },

    #[error("Step {step} timed out after {timeout:?}")]
    Timeout { step: String, timeout: Duration },

    #[error("Authentication did not complete: {0}")]
    AuthFailed(String),

    #[error("Browser command failed: {0}")]
    Command(String),
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;
