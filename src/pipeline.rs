//! One end-to-end relay run.
//!
//! A device request is answered by a provider (weather file by mail, or an
//! AI answer), encoded into fragments and handed to the [`ChannelRouter`].
//! When the provider fails or stays silent, a short notice goes back through
//! the same delivery path instead; it is never charged.

use std::collections::HashMap;
use std::sync::Arc;

use crate::delivery::{ChannelRouter, DeliveryEndpoint, DeliveryOutcome};
use crate::encoding::{BalanceLedger, Fragment, PayloadEncoder, TextBalancer};
use crate::error::{Error, LlmError};
use crate::inbound::{InboundRequest, InboundScanner, RelayRequest};
use crate::llm::{AiProvider, AiRequest, ProviderKind};
use crate::mail::{Correlation, WeatherProvider};

/// An AI provider with the ledger its costs are charged to.
#[derive(Clone)]
pub struct ProviderSlot {
    pub provider: Arc<dyn AiProvider>,
    pub ledger: Arc<dyn BalanceLedger>,
}

/// How a request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The answer was handed to the router.
    Delivered(DeliveryOutcome),
    /// The provider never answered; `notice` is the delivery of the
    /// explanation sent instead.
    NoAnswer { notice: DeliveryOutcome },
}

/// Result of one request inside a scan.
#[derive(Debug)]
pub struct RunReport {
    pub message_id: String,
    pub result: Result<RunOutcome, Error>,
}

pub struct RelayPipeline {
    weather: WeatherProvider,
    providers: HashMap<ProviderKind, ProviderSlot>,
    encoder: PayloadEncoder,
    balancer: TextBalancer,
    router: ChannelRouter,
}

impl RelayPipeline {
    pub fn new(
        weather: WeatherProvider,
        encoder: PayloadEncoder,
        balancer: TextBalancer,
        router: ChannelRouter,
    ) -> Self {
        Self {
            weather,
            providers: HashMap::new(),
            encoder,
            balancer,
            router,
        }
    }

    pub fn with_provider(mut self, slot: ProviderSlot) -> Self {
        self.providers.insert(slot.provider.kind(), slot);
        self
    }

    pub fn router(&self) -> &ChannelRouter {
        &self.router
    }

    /// Answer one request.
    ///
    /// Dispatch and provider failures are returned as errors after a
    /// best-effort notice; delivery problems are reported in the outcome.
    pub async fn handle(&self, request: &InboundRequest) -> Result<RunOutcome, Error> {
        match &request.request {
            RelayRequest::Weather { request: query } => self.handle_weather(query, &request.reply).await,
            RelayRequest::Question {
                provider,
                max_words,
                question,
            } => {
                self.handle_question(*provider, *max_words, question, &request.reply)
                    .await
            }
        }
    }

    async fn handle_weather(&self, query: &str, reply: &DeliveryEndpoint) -> Result<RunOutcome, Error> {
        match self.weather.fetch(query).await {
            Ok(Correlation::Fulfilled(artifact)) => {
                tracing::info!(
                    request = query,
                    bytes = artifact.bytes.len(),
                    file = ?artifact.filename,
                    "Weather file received"
                );
                let fragments = self.encoder.encode(&artifact.bytes)?;
                Ok(RunOutcome::Delivered(self.deliver(reply, &fragments).await))
            }
            Ok(Correlation::Expired { waited }) => {
                tracing::warn!(request = query, ?waited, "Weather provider did not answer");
                let minutes = waited.as_secs().div_ceil(60);
                let notice = self
                    .notify(reply, &format!("No weather reply after {minutes} min. Try again later."))
                    .await;
                Ok(RunOutcome::NoAnswer { notice })
            }
            Err(e) => {
                tracing::error!(request = query, error = %e, "Weather request could not be sent");
                self.notify(reply, "Weather request could not be sent. Try again later.")
                    .await;
                Err(e.into())
            }
        }
    }

    async fn handle_question(
        &self,
        kind: ProviderKind,
        max_words: u32,
        question: &str,
        reply: &DeliveryEndpoint,
    ) -> Result<RunOutcome, Error> {
        let Some(slot) = self.providers.get(&kind) else {
            tracing::error!(provider = %kind, "Provider not configured");
            self.notify(reply, &format!("{kind} is not available on this relay."))
                .await;
            return Err(LlmError::NotConfigured {
                provider: kind.to_string(),
            }
            .into());
        };

        let answer = match slot.provider.ask(&AiRequest::with_word_limit(question, max_words)).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::error!(provider = %kind, error = %e, "Provider failed");
                self.notify(reply, &format!("{kind} did not answer. Try again later."))
                    .await;
                return Err(e.into());
            }
        };

        let fragments = self
            .balancer
            .balance_charged(&answer.text, answer.cost, slot.ledger.as_ref());
        tracing::info!(
            provider = %kind,
            cost = %answer.cost,
            balance = %slot.ledger.balance(),
            fragments = fragments.len(),
            "Answer encoded"
        );
        Ok(RunOutcome::Delivered(self.deliver(reply, &fragments).await))
    }

    async fn deliver(&self, reply: &DeliveryEndpoint, fragments: &[Fragment]) -> DeliveryOutcome {
        let outcome = self.router.deliver(reply, fragments).await;
        if outcome.is_full_success() {
            tracing::info!(channel = %outcome.channel, sent = outcome.succeeded, "Delivery complete");
        } else {
            tracing::warn!(
                channel = %outcome.channel,
                sent = outcome.succeeded,
                attempted = outcome.attempted,
                failed = ?outcome.failed_indices,
                "Delivery incomplete"
            );
        }
        outcome
    }

    /// Best-effort short text to the device, uncharged.
    async fn notify(&self, reply: &DeliveryEndpoint, text: &str) -> DeliveryOutcome {
        let fragments = self.balancer.balance(text, None);
        self.deliver(reply, &fragments).await
    }

    /// Scan the inbox once and handle every request found.
    pub async fn run_once(&self, scanner: &InboundScanner) -> Result<Vec<RunReport>, Error> {
        let requests = scanner.scan().await?;
        if requests.is_empty() {
            tracing::debug!("No new requests");
        }

        let mut reports = Vec::with_capacity(requests.len());
        for request in &requests {
            let result = self.handle(request).await;
            if let Err(ref e) = result {
                tracing::error!(id = %request.message_id, error = %e, "Request failed");
            }
            reports.push(RunReport {
                message_id: request.message_id.clone(),
                result,
            });
        }
        Ok(reports)
    }
}
