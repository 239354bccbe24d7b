//! Picks the executor for an endpoint and applies the email fallback.

use std::collections::HashMap;
use std::sync::Arc;

use super::{
    DeliveryEndpoint, DeliveryExecutor, DeliveryOutcome, DeliveryRetryManager, DeliverySnapshot,
    EndpointKind,
};
use crate::encoding::Fragment;

/// Routes a fragment sequence to the executor matching its endpoint kind.
///
/// When the primary channel delivered nothing and the endpoint has a
/// fallback address, the whole sequence is re-sent by email. A partial
/// delivery is final: no fragment leaves the channel that attempted it.
pub struct ChannelRouter {
    executors: HashMap<EndpointKind, Arc<dyn DeliveryExecutor>>,
    retry: Arc<DeliveryRetryManager>,
}

impl ChannelRouter {
    pub fn new(retry: Arc<DeliveryRetryManager>) -> Self {
        Self {
            executors: HashMap::new(),
            retry,
        }
    }

    /// Register `executor` under its own kind, replacing any previous one.
    pub fn with_executor(mut self, executor: Arc<dyn DeliveryExecutor>) -> Self {
        self.executors.insert(executor.kind(), executor);
        self
    }

    pub fn has_channel(&self, kind: EndpointKind) -> bool {
        self.executors.contains_key(&kind)
    }

    pub async fn deliver(&self, endpoint: &DeliveryEndpoint, fragments: &[Fragment]) -> DeliveryOutcome {
        let kind = endpoint.kind();
        tracing::info!(channel = %kind, fragments = fragments.len(), "Routing delivery");

        let primary = match self.executors.get(&kind) {
            Some(executor) => executor.deliver(endpoint, fragments).await,
            None => {
                tracing::warn!(channel = %kind, "No executor registered for channel");
                DeliveryOutcome::all_failed(kind, fragments)
            }
        };

        if !primary.is_total_failure() || kind == EndpointKind::EmailFallback {
            return primary;
        }
        let Some(address) = endpoint.fallback_address() else {
            return primary;
        };
        let Some(email) = self.executors.get(&EndpointKind::EmailFallback) else {
            return primary;
        };

        tracing::warn!(
            channel = %kind,
            fallback = address,
            "Primary channel delivered nothing, falling back to email"
        );
        let fallback_endpoint = DeliveryEndpoint::new(
            endpoint.raw_url(),
            EndpointKind::EmailFallback,
            Some(address.to_string()),
        );
        let mut outcome = email.deliver(&fallback_endpoint, fragments).await;
        outcome.fell_back = true;
        outcome
    }

    pub async fn metrics(&self) -> HashMap<EndpointKind, DeliverySnapshot> {
        self.retry.get_all_metrics().await
    }
}
