//! Per-fragment send retry with exponential backoff.
//!
//! Retries stay inside the channel that made the attempt: a fragment that
//! exhausts its retries is recorded as failed by that channel and the run
//! moves on to the next fragment.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::EndpointKind;
use crate::error::ChannelError;

/// Retry behavior for one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base delay for exponential backoff (milliseconds).
    pub base_delay_ms: u64,
    /// Maximum delay cap (milliseconds).
    pub max_delay_ms: u64,
    /// Jitter factor (0.0 to 1.0) added on top of the computed delay.
    pub jitter_factor: f64,
    pub enabled: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 2_000,
            max_delay_ms: 30_000,
            jitter_factor: 0.25,
            enabled: true,
        }
    }
}

impl RetryConfig {
    /// Single attempt, used by channels that run their own recheck loop.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Result of sending one fragment through the retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendAttempt {
    Delivered {
        /// 1 = first try succeeded.
        attempts: u32,
    },
    Failed {
        attempts: u32,
        last_error: String,
    },
    /// Retry disabled and the single attempt failed.
    NotRetried { error: String },
}

impl SendAttempt {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Counters for one channel.
#[derive(Debug, Default)]
pub struct DeliveryMetrics {
    pub total_attempts: AtomicU64,
    pub successful: AtomicU64,
    /// Fragments that failed after all retries.
    pub failed: AtomicU64,
    /// Fragments that needed at least one retry.
    pub retried: AtomicU64,
    pub total_retry_delay_ms: AtomicU64,
}

impl DeliveryMetrics {
    pub fn snapshot(&self) -> DeliverySnapshot {
        let total_attempts = self.total_attempts.load(Ordering::Relaxed);
        let successful = self.successful.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let retried = self.retried.load(Ordering::Relaxed);
        let total_retry_delay_ms = self.total_retry_delay_ms.load(Ordering::Relaxed);

        let total_fragments = successful + failed;
        let success_rate = if total_fragments > 0 {
            successful as f64 / total_fragments as f64
        } else {
            0.0
        };
        let avg_retry_delay_ms = if retried > 0 {
            total_retry_delay_ms as f64 / retried as f64
        } else {
            0.0
        };

        DeliverySnapshot {
            total_attempts,
            successful,
            failed,
            retried,
            avg_retry_delay_ms,
            success_rate,
        }
    }
}

/// Point-in-time copy of [`DeliveryMetrics`].
#[derive(Debug, Clone, Serialize)]
pub struct DeliverySnapshot {
    pub total_attempts: u64,
    pub successful: u64,
    pub failed: u64,
    pub retried: u64,
    pub avg_retry_delay_ms: f64,
    /// Fraction in `0.0..=1.0`.
    pub success_rate: f64,
}

/// Retry configuration and metrics, per channel.
pub struct DeliveryRetryManager {
    configs: Arc<RwLock<HashMap<EndpointKind, RetryConfig>>>,
    metrics: Arc<RwLock<HashMap<EndpointKind, Arc<DeliveryMetrics>>>>,
    default_config: RetryConfig,
}

impl DeliveryRetryManager {
    /// Defaults for the relay: the interactive session gets a single
    /// attempt per fragment since its executor already re-checks each step.
    pub fn new() -> Self {
        let mut configs = HashMap::new();
        configs.insert(EndpointKind::InteractiveSession, RetryConfig::no_retry());
        Self {
            configs: Arc::new(RwLock::new(configs)),
            metrics: Arc::new(RwLock::new(HashMap::new())),
            default_config: RetryConfig::default(),
        }
    }

    /// Same config for every channel.
    pub fn with_default_config(config: RetryConfig) -> Self {
        Self {
            configs: Arc::new(RwLock::new(HashMap::new())),
            metrics: Arc::new(RwLock::new(HashMap::new())),
            default_config: config,
        }
    }

    pub async fn set_channel_config(&self, channel: EndpointKind, config: RetryConfig) {
        self.configs.write().await.insert(channel, config);
    }

    /// Config for `channel`, falling back to the default.
    pub async fn get_config(&self, channel: EndpointKind) -> RetryConfig {
        self.configs
            .read()
            .await
            .get(&channel)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone())
    }

    /// `base_delay * 2^attempt`, capped at `max_delay`, plus up to
    /// `jitter_factor * delay` of random jitter.
    pub fn calculate_delay(config: &RetryConfig, attempt: u32) -> Duration {
        let exp_delay_ms = config
            .base_delay_ms
            .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
        let capped_delay_ms = exp_delay_ms.min(config.max_delay_ms);

        let jitter_range = (capped_delay_ms as f64 * config.jitter_factor.clamp(0.0, 1.0)) as u64;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..=jitter_range)
        } else {
            0
        };

        Duration::from_millis(capped_delay_ms.saturating_add(jitter))
    }

    async fn ensure_metrics(&self, channel: EndpointKind) -> Arc<DeliveryMetrics> {
        {
            let metrics = self.metrics.read().await;
            if let Some(m) = metrics.get(&channel) {
                return Arc::clone(m);
            }
        }

        let mut metrics = self.metrics.write().await;
        Arc::clone(metrics.entry(channel).or_default())
    }

    /// Run `operation` until it succeeds or the channel's retries run out.
    pub async fn send_with_retry<F, Fut>(&self, channel: EndpointKind, operation: F) -> SendAttempt
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(), ChannelError>>,
    {
        let config = self.get_config(channel).await;
        let metrics = self.ensure_metrics(channel).await;

        metrics.total_attempts.fetch_add(1, Ordering::Relaxed);
        let first_error = match operation().await {
            Ok(()) => {
                metrics.successful.fetch_add(1, Ordering::Relaxed);
                return SendAttempt::Delivered { attempts: 1 };
            }
            Err(e) => e.to_string(),
        };

        if !config.enabled || config.max_retries == 0 {
            metrics.failed.fetch_add(1, Ordering::Relaxed);
            return if config.enabled {
                SendAttempt::Failed {
                    attempts: 1,
                    last_error: first_error,
                }
            } else {
                SendAttempt::NotRetried { error: first_error }
            };
        }

        tracing::debug!(%channel, error = %first_error, "Send attempt 1 failed, will retry");

        let mut last_error = first_error;
        let mut total_delay_ms: u64 = 0;

        for attempt in 0..config.max_retries {
            let delay = Self::calculate_delay(&config, attempt);
            total_delay_ms = total_delay_ms.saturating_add(delay.as_millis() as u64);
            tokio::time::sleep(delay).await;

            metrics.total_attempts.fetch_add(1, Ordering::Relaxed);
            match operation().await {
                Ok(()) => {
                    metrics.successful.fetch_add(1, Ordering::Relaxed);
                    metrics.retried.fetch_add(1, Ordering::Relaxed);
                    metrics
                        .total_retry_delay_ms
                        .fetch_add(total_delay_ms, Ordering::Relaxed);
                    tracing::debug!(%channel, attempts = attempt + 2, "Send succeeded after retry");
                    return SendAttempt::Delivered {
                        attempts: attempt + 2,
                    };
                }
                Err(e) => {
                    tracing::debug!(%channel, attempt = attempt + 2, error = %e, "Send retry failed");
                    last_error = e.to_string();
                }
            }
        }

        metrics.failed.fetch_add(1, Ordering::Relaxed);
        metrics.retried.fetch_add(1, Ordering::Relaxed);
        metrics
            .total_retry_delay_ms
            .fetch_add(total_delay_ms, Ordering::Relaxed);

        tracing::warn!(
            %channel,
            attempts = config.max_retries + 1,
            last_error = %last_error,
            "Send failed after all retries"
        );

        SendAttempt::Failed {
            attempts: config.max_retries + 1,
            last_error,
        }
    }

    pub async fn get_metrics(&self, channel: EndpointKind) -> Option<DeliverySnapshot> {
        self.metrics.read().await.get(&channel).map(|m| m.snapshot())
    }

    pub async fn get_all_metrics(&self) -> HashMap<EndpointKind, DeliverySnapshot> {
        self.metrics
            .read()
            .await
            .iter()
            .map(|(kind, m)| (*kind, m.snapshot()))
            .collect()
    }
}

impl Default for DeliveryRetryManager {
    fn default() -> Self {
        Self::new()
    }
}
