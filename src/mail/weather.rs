//! Weather files by mail (Saildocs-style responder).
//!
//! The responder parses the request from the message body, so the body is
//! exactly `send <request>` with nothing else in it.

use std::sync::Arc;
use std::time::Duration;

use super::correlator::{Correlation, PendingRequest, ReplyCorrelator};
use super::{MailSender, OutgoingMail};
use crate::error::CorrelationError;

pub const REQUEST_SUBJECT: &str = "send";

/// Requests weather files and waits for the reply.
pub struct WeatherProvider {
    sender: Arc<dyn MailSender>,
    correlator: ReplyCorrelator,
    address: String,
    timeout: Duration,
    poll_interval: Duration,
}

impl WeatherProvider {
    pub fn new(
        sender: Arc<dyn MailSender>,
        correlator: ReplyCorrelator,
        address: impl Into<String>,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            sender,
            correlator,
            address: address.into(),
            timeout,
            poll_interval,
        }
    }

    /// Mail sent to the responder for `request`.
    pub fn request_mail(&self, request: &str) -> OutgoingMail {
        OutgoingMail {
            to: self.address.clone(),
            subject: REQUEST_SUBJECT.to_string(),
            body: format!("send {}", request.trim()),
        }
    }

    /// Send `request` and wait for the artifact.
    pub async fn fetch(&self, request: &str) -> Result<Correlation, CorrelationError> {
        let mail = self.request_mail(request);
        let pending = PendingRequest::new(request.trim(), self.timeout, self.poll_interval);
        tracing::info!(request = %pending.request_key, to = %self.address, "Requesting weather file");

        let sender = Arc::clone(&self.sender);
        self.correlator
            .submit_and_wait(pending, || async move { sender.send(&mail).await })
            .await
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::mail::{ArtifactFilter, Attachment, InMemoryMailbox, InboxMessage};

    fn provider(mailbox: Arc<InMemoryMailbox>) -> WeatherProvider {
        let correlator = ReplyCorrelator::new(
            Arc::clone(&mailbox) as Arc<dyn crate::mail::Mailbox>,
            ArtifactFilter::grib("query-reply@saildocs.com"),
        );
        WeatherProvider::new(
            mailbox,
            correlator,
            "query@saildocs.com",
            Duration::from_secs(30),
            Duration::from_secs(10),
        )
    }

    #[test]
    fn test_request_body_is_exactly_send_plus_request() {
        let provider = provider(Arc::new(InMemoryMailbox::new()));
        let mail = provider.request_mail("  gfs:8N,9N,80W,79W|0.25,0.25|0,3,6|WIND \n");
        assert_eq!(
            mail,
            OutgoingMail {
                to: "query@saildocs.com".into(),
                subject: "send".into(),
                body: "send gfs:8N,9N,80W,79W|0.25,0.25|0,3,6|WIND".into(),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_sends_and_collects_reply() {
        let mailbox = Arc::new(InMemoryMailbox::new());
        mailbox.push(InboxMessage {
            id: "reply".into(),
            from: "query-reply@saildocs.com".into(),
            reply_to: None,
            subject: "Re: send".into(),
            body: String::new(),
            attachments: vec![Attachment {
                filename: Some("gfs.grb".into()),
                content_type: "application/octet-stream".into(),
                data: b"GRIB....7777".to_vec(),
            }],
            received_at: None,
        });

        let result = provider(Arc::clone(&mailbox))
            .fetch("gfs:8N,9N,80W,79W")
            .await
            .unwrap();

        assert!(matches!(result, Correlation::Fulfilled(ref a) if a.bytes == b"GRIB....7777"));
        assert_eq!(mailbox.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_send_failure_is_dispatch_error() {
        let mailbox = Arc::new(InMemoryMailbox::new());
        mailbox.fail_sends(1);
        let err = provider(mailbox).fetch("gfs:8N,9N,80W,79W").await.unwrap_err();
        assert!(matches!(err, CorrelationError::Dispatch { .. }));
    }
}
