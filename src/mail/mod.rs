//! Mail collaborators.
//!
//! The relay talks to the outside world through one mailbox: device
//! messages and weather replies arrive there, and weather requests and
//! fallback deliveries leave from it. [`Mailbox`] and [`MailSender`] are the
//! seams; [`gmail::GmailClient`] implements both over the Gmail REST API and
//! [`memory::InMemoryMailbox`] implements both in memory.

pub mod correlator;
pub mod gmail;
pub mod memory;
pub mod weather;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MailError;

pub use correlator::{Artifact, ArtifactFilter, Correlation, PendingRequest, ReplyCorrelator};
pub use gmail::GmailClient;
pub use memory::InMemoryMailbox;
pub use weather::WeatherProvider;

/// A binary attachment on an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: Option<String>,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// One unread message as seen by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxMessage {
    /// Mailbox-specific identifier, used to mark the message consumed.
    pub id: String,
    /// Raw `From` header.
    pub from: String,
    pub reply_to: Option<String>,
    pub subject: String,
    /// Plain-text body.
    pub body: String,
    pub attachments: Vec<Attachment>,
    pub received_at: Option<DateTime<Utc>>,
}

impl InboxMessage {
    /// Bare address of the sender, lowercased.
    pub fn sender_address(&self) -> String {
        bare_address(&self.from)
    }

    /// Address replies should go to: `Reply-To` if present, else the sender.
    pub fn reply_address(&self) -> String {
        self.reply_to
            .as_deref()
            .map(bare_address)
            .unwrap_or_else(|| self.sender_address())
    }
}

/// Selection of unread messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MailFilter {
    /// Only messages from this address.
    pub from: Option<String>,
    /// Only senders whose address contains one of these substrings.
    #[serde(default)]
    pub sender_markers: Vec<String>,
}

impl MailFilter {
    pub fn from_sender(address: impl Into<String>) -> Self {
        Self {
            from: Some(address.into()),
            ..Self::default()
        }
    }

    pub fn from_sender_markers(markers: &[String]) -> Self {
        Self {
            sender_markers: markers.iter().map(|m| m.to_ascii_lowercase()).collect(),
            ..Self::default()
        }
    }

    pub fn matches(&self, message: &InboxMessage) -> bool {
        let sender = message.sender_address();
        if let Some(from) = &self.from
            && sender != bare_address(from)
        {
            return false;
        }
        self.sender_markers.is_empty()
            || self
                .sender_markers
                .iter()
                .any(|m| sender.contains(m.as_str()))
    }
}

/// A plain-text message to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Read side of the shared mailbox.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Unread messages matching `filter`, oldest first.
    async fn unread(&self, filter: &MailFilter) -> Result<Vec<InboxMessage>, MailError>;

    /// Mark a message consumed so later polls no longer see it.
    async fn mark_consumed(&self, id: &str) -> Result<(), MailError>;
}

/// Write side of the shared mailbox.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError>;
}

/// Extract `user@host` from a header value such as `"Name" <user@host>`.
pub fn bare_address(header: &str) -> String {
    let trimmed = header.trim();
    let inner = match (trimmed.rfind('<'), trimmed.rfind('>')) {
        (Some(start), Some(end)) if start < end => &trimmed[start + 1..end],
        _ => trimmed,
    };
    inner.trim().to_ascii_lowercase()
}

/// Whether `value` looks like a deliverable address.
pub fn is_email_address(value: &str) -> bool {
    let value = value.trim();
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !value.contains(char::is_whitespace)
                && !value.contains('/')
        }
        None => false,
    }
}
