//! In-memory mailbox for tests and local experiments.

use std::sync::Mutex;

use async_trait::async_trait;

use super::{InboxMessage, MailFilter, MailSender, Mailbox, OutgoingMail};
use crate::error::MailError;

#[derive(Debug, Default)]
struct State {
    inbox: Vec<(InboxMessage, bool)>,
    sent: Vec<OutgoingMail>,
    failing_polls: usize,
    failing_sends: usize,
}

/// Mailbox and sender backed by vectors.
#[derive(Debug, Default)]
pub struct InMemoryMailbox {
    state: Mutex<State>,
}

impl InMemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add an unread message.
    pub fn push(&self, message: InboxMessage) {
        self.state().inbox.push((message, false));
    }

    /// Make the next `n` calls to [`Mailbox::unread`] fail.
    pub fn fail_polls(&self, n: usize) {
        self.state().failing_polls = n;
    }

    /// Make the next `n` calls to [`MailSender::send`] fail.
    pub fn fail_sends(&self, n: usize) {
        self.state().failing_sends = n;
    }

    /// Messages sent so far, in order.
    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.state().sent.clone()
    }

    pub fn is_consumed(&self, id: &str) -> bool {
        self.state()
            .inbox
            .iter()
            .any(|(m, consumed)| m.id == id && *consumed)
    }
}

#[async_trait]
impl Mailbox for InMemoryMailbox {
    async fn unread(&self, filter: &MailFilter) -> Result<Vec<InboxMessage>, MailError> {
        let mut state = self.state();
        if state.failing_polls > 0 {
            state.failing_polls -= 1;
            return Err(MailError::RequestFailed {
                operation: "list".to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(state
            .inbox
            .iter()
            .filter(|(m, consumed)| !consumed && filter.matches(m))
            .map(|(m, _)| m.clone())
            .collect())
    }

    async fn mark_consumed(&self, id: &str) -> Result<(), MailError> {
        let mut state = self.state();
        match state.inbox.iter_mut().find(|(m, _)| m.id == id) {
            Some((_, consumed)) => {
                *consumed = true;
                Ok(())
            }
            None => Err(MailError::InvalidPayload(format!("unknown message {id}"))),
        }
    }
}

#[async_trait]
impl MailSender for InMemoryMailbox {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        let mut state = self.state();
        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            return Err(MailError::RequestFailed {
                operation: "send".to_string(),
                reason: "injected failure".to_string(),
            });
        }
        if !super::is_email_address(&mail.to) {
            return Err(MailError::InvalidRecipient(mail.to.clone()));
        }
        state.sent.push(mail.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, from: &str) -> InboxMessage {
        InboxMessage {
            id: id.into(),
            from: from.into(),
            reply_to: None,
            subject: String::new(),
            body: String::new(),
            attachments: vec![],
            received_at: None,
        }
    }

    #[tokio::test]
    async fn test_consumed_messages_disappear() {
        let mailbox = InMemoryMailbox::new();
        mailbox.push(message("a", "x@example.org"));
        mailbox.push(message("b", "y@example.org"));

        mailbox.mark_consumed("a").await.unwrap();
        let unread = mailbox.unread(&MailFilter::default()).await.unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].id, "b");
        assert!(mailbox.is_consumed("a"));
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let mailbox = InMemoryMailbox::new();
        mailbox.fail_polls(1);
        assert!(mailbox.unread(&MailFilter::default()).await.is_err());
        assert!(mailbox.unread(&MailFilter::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_send_rejects_bad_recipient() {
        let mailbox = InMemoryMailbox::new();
        let mail = OutgoingMail {
            to: "not an address".into(),
            subject: "s".into(),
            body: "b".into(),
        };
        assert!(matches!(
            mailbox.send(&mail).await,
            Err(MailError::InvalidRecipient(_))
        ));
        assert!(mailbox.sent().is_empty());
    }
}
