//! Device mail intake.
//!
//! Satellite devices forward their messages as email wrapped in fixed
//! boilerplate (reply link, "View the location…", "Do not reply…"). The
//! scanner strips it, finds the reply endpoint and turns the remaining
//! text into a [`RelayRequest`].

use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::delivery::DeliveryEndpoint;
use crate::error::MailError;
use crate::llm::ProviderKind;
use crate::mail::{InboxMessage, MailFilter, Mailbox};

static SESSION_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)https://inreachlink\.com/[A-Za-z0-9_-]+").expect("valid regex")
});
static FORM_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)https://[^\s]+garmin\.com/[^\s]+").expect("valid regex"));
static BOILERPLATE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)https?://inreachlink\.com/\S+",
        r"(?i)https?://\S*explore\.garmin\.com/\S+",
        r"(?i)View the location or send a reply to",
        r"(?i)Do not reply directly to this message",
        r"(?i)This message was sent to you using",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});
static QUESTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\b(claude|mistral|gpt)\s+(\d+)\s*:\s*(.+)").expect("valid regex")
});
static WEATHER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(ecmwf|gfs|icon):\S+").expect("valid regex"));

/// What the device asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayRequest {
    /// Weather file request in responder syntax, e.g. `gfs:8N,9N,80W,79W|0.25,0.25|0,3,6|WIND`.
    Weather { request: String },
    Question {
        provider: ProviderKind,
        max_words: u32,
        question: String,
    },
}

/// A classified device message with its reply endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRequest {
    pub message_id: String,
    pub request: RelayRequest,
    pub reply: DeliveryEndpoint,
}

/// Remove device boilerplate and collapse whitespace.
pub fn clean_body(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !BOILERPLATE.iter().any(|re| re.is_match(line)))
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// First reply link in `raw`: a short-token link wins over a form URL.
pub fn extract_reply_url(raw: &str) -> Option<String> {
    if let Some(m) = SESSION_LINK.find(raw) {
        return Some(m.as_str().to_string());
    }
    FORM_LINK.find(raw).map(|m| {
        m.as_str()
            .trim_end_matches(['.', ',', ';', ')', '\'', '"', '<', '>'])
            .to_string()
    })
}

/// Classify already-cleaned text. A question wins over a weather request.
pub fn classify(cleaned: &str) -> Option<RelayRequest> {
    if let Some(caps) = QUESTION.captures(cleaned) {
        let provider = caps[1].parse::<ProviderKind>().ok()?;
        let max_words = match caps[2].parse::<u32>() {
            Ok(n) if n > 0 => n,
            _ => {
                tracing::debug!(words = &caps[2], "Unusable word limit");
                return None;
            }
        };
        let question = caps[3].split_whitespace().collect::<Vec<_>>().join(" ");
        if question.is_empty() {
            return None;
        }
        return Some(RelayRequest::Question {
            provider,
            max_words,
            question,
        });
    }

    WEATHER.find(cleaned).map(|m| RelayRequest::Weather {
        request: m.as_str().to_string(),
    })
}

/// Lists unread device mail and yields relay requests.
pub struct InboundScanner {
    mailbox: Arc<dyn Mailbox>,
    sender_markers: Vec<String>,
}

impl InboundScanner {
    pub fn new(mailbox: Arc<dyn Mailbox>) -> Self {
        Self {
            mailbox,
            sender_markers: vec!["inreach".to_string(), "garmin".to_string()],
        }
    }

    /// Substrings that identify a device sender address.
    pub fn with_sender_markers(mut self, markers: Vec<String>) -> Self {
        self.sender_markers = markers
            .into_iter()
            .map(|m| m.to_ascii_lowercase())
            .collect();
        self
    }

    pub fn is_device_sender(&self, message: &InboxMessage) -> bool {
        self.device_filter().matches(message)
    }

    fn device_filter(&self) -> MailFilter {
        MailFilter::from_sender_markers(&self.sender_markers)
    }

    /// Turn one device message into a request, if it holds one.
    pub fn parse(message: &InboxMessage) -> Option<InboundRequest> {
        let fallback = Some(message.reply_address());
        let reply_url = extract_reply_url(&message.body);
        let reply = match reply_url.as_deref() {
            Some(url) => DeliveryEndpoint::classify(url, fallback),
            None => DeliveryEndpoint::classify(&message.reply_address(), None),
        };
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(id = %message.id, error = %e, "Device message has no usable reply endpoint");
                return None;
            }
        };

        let Some(request) = classify(&clean_body(&message.body)) else {
            tracing::info!(id = %message.id, "Device message holds no recognised request");
            return None;
        };

        Some(InboundRequest {
            message_id: message.id.clone(),
            request,
            reply,
        })
    }

    /// Consume every unread device message and return the requests found.
    ///
    /// Mail from other senders is left unread.
    pub async fn scan(&self) -> Result<Vec<InboundRequest>, MailError> {
        let messages = self.mailbox.unread(&self.device_filter()).await?;
        let mut requests = Vec::new();

        for message in &messages {
            if let Err(e) = self.mailbox.mark_consumed(&message.id).await {
                tracing::warn!(id = %message.id, error = %e, "Failed to mark device message consumed");
            }
            if let Some(request) = Self::parse(message) {
                tracing::info!(
                    id = %message.id,
                    channel = %request.reply.kind(),
                    "Device request received"
                );
                requests.push(request);
            }
        }

        tracing::debug!(device_mail = messages.len(), requests = requests.len(), "Inbox scanned");
        Ok(requests)
    }
}
