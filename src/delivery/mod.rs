//! Fragment delivery to the device.
//!
//! A [`DeliveryEndpoint`] is classified once from the reply link, then the
//! [`ChannelRouter`] hands the fragment list to the matching
//! [`DeliveryExecutor`]. Executors send fragments one at a time, in
//! ascending index order, paced by [`Pacing`] and retried per fragment by
//! [`DeliveryRetryManager`]. Failures never escape as errors: every run
//! ends in a [`DeliveryOutcome`].

pub mod email;
pub mod endpoint;
pub mod form_post;
pub mod pacing;
pub mod retry;
pub mod router;
pub mod session;

#[cfg(feature = "browser")]
pub mod chromium;

use async_trait::async_trait;
use serde::Serialize;

use crate::encoding::Fragment;
use crate::error::ChannelError;

pub use email::EmailExecutor;
pub use endpoint::{DeliveryEndpoint, EndpointKind};
pub use form_post::{FormPostConfig, FormPostExecutor};
pub use pacing::Pacing;
pub use retry::{DeliveryMetrics, DeliveryRetryManager, DeliverySnapshot, RetryConfig, SendAttempt};
pub use router::ChannelRouter;
pub use session::{
    BrowserDriver, BrowserLauncher, DeviceCredentials, SessionExecutor, SessionSelectors,
    SessionTimings,
};

/// Aggregate result of one delivery run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryOutcome {
    /// Channel that produced this outcome.
    pub channel: EndpointKind,
    pub attempted: usize,
    pub succeeded: usize,
    /// 1-based sequence indices that did not go through.
    pub failed_indices: Vec<usize>,
    /// Whether the router re-sent the sequence by email.
    pub fell_back: bool,
}

impl DeliveryOutcome {
    pub fn new(channel: EndpointKind) -> Self {
        Self {
            channel,
            attempted: 0,
            succeeded: 0,
            failed_indices: Vec::new(),
            fell_back: false,
        }
    }

    /// Every fragment of `fragments` marked failed without an attempt.
    pub fn all_failed(channel: EndpointKind, fragments: &[Fragment]) -> Self {
        Self {
            channel,
            attempted: fragments.len(),
            succeeded: 0,
            failed_indices: fragments.iter().map(Fragment::sequence_index).collect(),
            fell_back: false,
        }
    }

    pub fn record(&mut self, index: usize, delivered: bool) {
        self.attempted += 1;
        if delivered {
            self.succeeded += 1;
        } else {
            self.failed_indices.push(index);
        }
    }

    pub fn is_full_success(&self) -> bool {
        self.succeeded == self.attempted
    }

    pub fn is_total_failure(&self) -> bool {
        self.attempted > 0 && self.succeeded == 0
    }
}

/// One transport strategy.
#[async_trait]
pub trait DeliveryExecutor: Send + Sync {
    fn kind(&self) -> EndpointKind;

    /// Send `fragments` in order. Never fails; per-fragment failures are
    /// recorded in the outcome.
    async fn deliver(&self, endpoint: &DeliveryEndpoint, fragments: &[Fragment]) -> DeliveryOutcome;
}

/// Shared per-fragment loop: pace, send with retry, record, continue.
pub(crate) async fn send_each<F, Fut>(
    kind: EndpointKind,
    fragments: &[Fragment],
    pacing: &Pacing,
    retry: &DeliveryRetryManager,
    send: F,
) -> DeliveryOutcome
where
    F: Fn(&Fragment) -> Fut,
    Fut: Future<Output = Result<(), ChannelError>>,
{
    let mut outcome = DeliveryOutcome::new(kind);
    let total = fragments.len();

    for (position, fragment) in fragments.iter().enumerate() {
        pacing.wait_before(position).await;
        let attempt = retry.send_with_retry(kind, || send(fragment)).await;
        let index = fragment.sequence_index();
        if attempt.is_delivered() {
            tracing::info!(channel = %kind, index, total, chars = fragment.len(), "Fragment sent");
        } else {
            tracing::warn!(channel = %kind, index, total, ?attempt, "Fragment not delivered");
        }
        outcome.record(index, attempt.is_delivered());
    }

    outcome
}
