//! Request/reply correlation over a shared mailbox.
//!
//! A provider without a synchronous API is asked by mail and answers by
//! mail, minutes later. The correlator dispatches the request once, then
//! polls the mailbox at a fixed cadence for the first unconsumed message
//! from the provider that carries the expected artifact. Unrelated traffic
//! is left untouched. A provider that never answers yields
//! [`Correlation::Expired`], which is a normal outcome and not an error.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use super::{Attachment, InboxMessage, MailFilter, Mailbox};
use crate::error::{CorrelationError, MailError};

/// Per-operation bound on a single dispatch or poll.
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Replies stamped up to this many seconds before submission are still
/// accepted, to absorb clock skew between the mail server and this host.
const CLOCK_SKEW_GRACE_SECS: i64 = 30;

/// An outbound request waiting for its reply.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    /// What was asked, e.g. `gfs:8N,9N,80W,79W|0.25,0.25|0,3,6|WIND`.
    pub request_key: String,
    pub submitted_at: DateTime<Utc>,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl PendingRequest {
    pub fn new(request_key: impl Into<String>, timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            request_key: request_key.into(),
            submitted_at: Utc::now(),
            timeout,
            poll_interval,
        }
    }
}

/// The artifact carried by a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub message_id: String,
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
}

/// Terminal state of a [`PendingRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correlation {
    Fulfilled(Artifact),
    Expired { waited: Duration },
}

/// Which replies count as an answer.
#[derive(Debug, Clone)]
pub struct ArtifactFilter {
    /// Expected reply sender.
    pub sender: String,
    /// Accepted filename extensions, lowercase, without dot.
    pub extensions: Vec<String>,
    /// Accepted content types, lowercase.
    pub content_types: Vec<String>,
}

impl ArtifactFilter {
    /// GRIB files, which providers label inconsistently.
    pub fn grib(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            extensions: vec!["grb".into(), "grib".into(), "grb2".into(), "grib2".into()],
            content_types: vec![
                "application/octet-stream".into(),
                "application/x-grib".into(),
                "application/grib".into(),
            ],
        }
    }

    pub fn accepts(&self, attachment: &Attachment) -> bool {
        let by_name = attachment
            .filename
            .as_deref()
            .and_then(|name| name.rsplit_once('.'))
            .is_some_and(|(_, ext)| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)));
        let content_type = attachment
            .content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim();
        let by_type = self
            .content_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(content_type));
        by_name || by_type
    }

    fn pick<'a>(&self, message: &'a InboxMessage) -> Option<&'a Attachment> {
        message
            .attachments
            .iter()
            .find(|a| !a.data.is_empty() && self.accepts(a))
    }
}

/// Dispatches requests and waits for their replies.
pub struct ReplyCorrelator {
    mailbox: Arc<dyn Mailbox>,
    filter: ArtifactFilter,
    operation_timeout: Duration,
}

impl ReplyCorrelator {
    pub fn new(mailbox: Arc<dyn Mailbox>, filter: ArtifactFilter) -> Self {
        Self {
            mailbox,
            filter,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    /// Bound on each dispatch and each poll.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Run `dispatch` once, then wait for the reply.
    ///
    /// A dispatch failure is returned immediately and never retried. Poll
    /// failures are logged and the loop keeps going until `timeout`.
    pub async fn submit_and_wait<F, Fut>(
        &self,
        request: PendingRequest,
        dispatch: F,
    ) -> Result<Correlation, CorrelationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), MailError>>,
    {
        let dispatch_failed = |source| CorrelationError::Dispatch {
            request_key: request.request_key.clone(),
            source,
        };

        match tokio::time::timeout(self.operation_timeout, dispatch()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(dispatch_failed(e)),
            Err(_) => {
                return Err(dispatch_failed(MailError::Timeout {
                    operation: "dispatch".to_string(),
                    timeout: self.operation_timeout,
                }));
            }
        }

        tracing::info!(
            request = %request.request_key,
            timeout_secs = request.timeout.as_secs(),
            "Request dispatched, waiting for reply"
        );

        let started = Instant::now();
        let deadline = started + request.timeout;
        let mut polls = 0u32;

        loop {
            polls += 1;
            if let Some(artifact) = self.poll_once(&request).await {
                tracing::info!(
                    request = %request.request_key,
                    bytes = artifact.bytes.len(),
                    polls,
                    "Reply received"
                );
                return Ok(Correlation::Fulfilled(artifact));
            }

            let now = Instant::now();
            if now >= deadline {
                let waited = now - started;
                tracing::warn!(
                    request = %request.request_key,
                    waited_secs = waited.as_secs(),
                    polls,
                    "No reply before timeout"
                );
                return Ok(Correlation::Expired { waited });
            }

            let remaining = deadline - now;
            tokio::time::sleep(request.poll_interval.min(remaining)).await;
        }
    }

    async fn poll_once(&self, request: &PendingRequest) -> Option<Artifact> {
        let filter = MailFilter::from_sender(&self.filter.sender);
        let messages = match tokio::time::timeout(self.operation_timeout, self.mailbox.unread(&filter)).await {
            Ok(Ok(messages)) => messages,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Mailbox poll failed");
                return None;
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.operation_timeout, "Mailbox poll timed out");
                return None;
            }
        };

        let not_before = request.submitted_at - chrono::Duration::seconds(CLOCK_SKEW_GRACE_SECS);
        let (message, attachment) = messages
            .iter()
            .filter(|m| m.received_at.is_none_or(|at| at >= not_before))
            .find_map(|m| self.filter.pick(m).map(|a| (m, a)))?;

        let artifact = Artifact {
            message_id: message.id.clone(),
            filename: attachment.filename.clone(),
            bytes: attachment.data.clone(),
        };

        if let Err(e) = self.mailbox.mark_consumed(&message.id).await {
            tracing::warn!(message_id = %message.id, error = %e, "Failed to mark reply consumed");
        }
        Some(artifact)
    }
}
