//! Email fallback: the whole sequence in one message.

use std::sync::Arc;

use async_trait::async_trait;

use super::{DeliveryEndpoint, DeliveryExecutor, DeliveryOutcome, DeliveryRetryManager, EndpointKind};
use crate::encoding::Fragment;
use crate::error::ChannelError;
use crate::mail::{MailSender, OutgoingMail};

const CHANNEL: &str = "email_fallback";
pub const REPLY_SUBJECT: &str = "Relay reply";

pub struct EmailExecutor {
    sender: Arc<dyn MailSender>,
    retry: Arc<DeliveryRetryManager>,
}

impl EmailExecutor {
    pub fn new(sender: Arc<dyn MailSender>, retry: Arc<DeliveryRetryManager>) -> Self {
        Self { sender, retry }
    }

    /// Fragments joined one per line, in sequence order.
    pub fn compose(to: &str, fragments: &[Fragment]) -> OutgoingMail {
        let body = fragments
            .iter()
            .map(Fragment::as_str)
            .collect::<Vec<_>>()
            .join("\n");
        OutgoingMail {
            to: to.to_string(),
            subject: REPLY_SUBJECT.to_string(),
            body,
        }
    }
}

#[async_trait]
impl DeliveryExecutor for EmailExecutor {
    fn kind(&self) -> EndpointKind {
        EndpointKind::EmailFallback
    }

    async fn deliver(&self, endpoint: &DeliveryEndpoint, fragments: &[Fragment]) -> DeliveryOutcome {
        let Some(to) = endpoint.fallback_address() else {
            tracing::warn!(channel = CHANNEL, url = %endpoint.raw_url(), "No fallback address");
            return DeliveryOutcome::all_failed(self.kind(), fragments);
        };
        if fragments.is_empty() {
            return DeliveryOutcome::new(self.kind());
        }

        let mail = Self::compose(to, fragments);
        let attempt = self
            .retry
            .send_with_retry(self.kind(), || async {
                self.sender
                    .send(&mail)
                    .await
                    .map_err(|e| ChannelError::SendFailed {
                        name: CHANNEL.to_string(),
                        reason: e.to_string(),
                    })
            })
            .await;

        let delivered = attempt.is_delivered();
        if delivered {
            tracing::info!(channel = CHANNEL, to, fragments = fragments.len(), "Sequence mailed");
        } else {
            tracing::warn!(channel = CHANNEL, to, ?attempt, "Fallback mail not sent");
        }

        // One message carries every fragment, so they share its fate.
        let mut outcome = DeliveryOutcome::new(self.kind());
        for fragment in fragments {
            outcome.record(fragment.sequence_index(), delivered);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::delivery::RetryConfig;
    use crate::encoding::PayloadEncoder;
    use crate::mail::InMemoryMailbox;

    fn executor(mailbox: Arc<InMemoryMailbox>) -> EmailExecutor {
        let retry = DeliveryRetryManager::with_default_config(RetryConfig {
            max_retries: 1,
            base_delay_ms: 1,
            max_delay_ms: 5,
            jitter_factor: 0.0,
            enabled: true,
        });
        EmailExecutor::new(mailbox, Arc::new(retry))
    }

    fn fragments() -> Vec<Fragment> {
        let bytes: Vec<u8> = (0u32..400).map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8).collect();
        let fragments = PayloadEncoder::new(120).unwrap().encode(&bytes).unwrap();
        assert!(fragments.len() > 1);
        fragments
    }

    #[tokio::test]
    async fn test_sends_one_mail_with_all_fragments() {
        let mailbox = Arc::new(InMemoryMailbox::new());
        let frags = fragments();
        let endpoint = DeliveryEndpoint::classify("skipper@example.org", None).unwrap();

        let outcome = executor(Arc::clone(&mailbox)).deliver(&endpoint, &frags).await;

        assert!(outcome.is_full_success());
        assert_eq!(outcome.attempted, frags.len());
        let sent = mailbox.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "skipper@example.org");
        assert!(sent[0].body.starts_with("msg 1/"));
        assert!(sent[0].body.ends_with("end"));
        assert_eq!(sent[0].body.matches("\nend").count(), frags.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_fails_every_index() {
        let mailbox = Arc::new(InMemoryMailbox::new());
        mailbox.fail_sends(5);
        let frags = fragments();
        let endpoint = DeliveryEndpoint::classify("skipper@example.org", None).unwrap();

        let outcome = executor(mailbox).deliver(&endpoint, &frags).await;

        assert!(outcome.is_total_failure());
        assert_eq!(
            outcome.failed_indices,
            (1..=frags.len()).collect::<Vec<_>>()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_send_failure_is_retried() {
        let mailbox = Arc::new(InMemoryMailbox::new());
        mailbox.fail_sends(1);
        let frags = fragments();
        let endpoint = DeliveryEndpoint::classify("skipper@example.org", None).unwrap();

        let outcome = executor(Arc::clone(&mailbox)).deliver(&endpoint, &frags).await;

        assert!(outcome.is_full_success());
        assert_eq!(mailbox.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_without_address_nothing_is_sent() {
        let mailbox = Arc::new(InMemoryMailbox::new());
        let frags = fragments();
        let endpoint = DeliveryEndpoint::new(
            "https://inreachlink.com/Tok",
            EndpointKind::InteractiveSession,
            None,
        );

        let outcome = executor(Arc::clone(&mailbox)).deliver(&endpoint, &frags).await;

        assert!(outcome.is_total_failure());
        assert!(mailbox.sent().is_empty());
    }
}
