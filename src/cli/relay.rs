//! `run` and `once`: wire the configured components and scan the inbox.

use std::sync::Arc;

use anyhow::Context;
use rust_decimal::Decimal;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::delivery::{
    ChannelRouter, DeliveryRetryManager, EmailExecutor, FormPostConfig, FormPostExecutor, Pacing,
};
use crate::encoding::{
    BalanceLedger, BalancerConfig, FileLedger, InMemoryLedger, PayloadEncoder, TextBalancer,
};
use crate::inbound::InboundScanner;
use crate::llm::{
    AnthropicConfig, AnthropicProvider, MistralConfig, MistralProvider, ProviderKind,
};
use crate::mail::{ArtifactFilter, GmailClient, Mailbox, MailSender, ReplyCorrelator, WeatherProvider};
use crate::pipeline::{ProviderSlot, RelayPipeline, RunOutcome, RunReport};

/// Everything a relay loop needs.
pub struct Relay {
    pub pipeline: RelayPipeline,
    pub scanner: InboundScanner,
}

/// Build the relay from configuration.
pub fn build_relay(config: &Config) -> anyhow::Result<Relay> {
    let gmail = Arc::new(GmailClient::with_base_url(
        &config.gmail.api_base,
        &config.relay_account,
        config.gmail.access_token.clone(),
    ));
    let mailbox: Arc<dyn Mailbox> = gmail.clone();
    let sender: Arc<dyn MailSender> = gmail;

    let correlator = ReplyCorrelator::new(
        Arc::clone(&mailbox),
        ArtifactFilter::grib(&config.weather.reply_sender),
    );
    let weather = WeatherProvider::new(
        Arc::clone(&sender),
        correlator,
        &config.weather.provider_address,
        config.weather.timeout,
        config.weather.poll_interval,
    );

    let encoder = PayloadEncoder::new(config.fragment_char_budget)
        .context("invalid fragment budget")?;
    let balancer = TextBalancer::new(BalancerConfig::with_max_chars(config.fragment_char_budget));
    let router = build_router(config, sender);

    let mut pipeline = RelayPipeline::new(weather, encoder, balancer, router);
    if let Some(ref key) = config.anthropic_api_key {
        let provider = AnthropicProvider::new(AnthropicConfig::new(key.clone()));
        pipeline = pipeline.with_provider(ProviderSlot {
            provider: Arc::new(provider),
            ledger: open_ledger(config, ProviderKind::Claude, config.claude_balance)?,
        });
    }
    if let Some(ref key) = config.mistral_api_key {
        let provider = MistralProvider::new(MistralConfig::new(key.clone()));
        pipeline = pipeline.with_provider(ProviderSlot {
            provider: Arc::new(provider),
            ledger: open_ledger(config, ProviderKind::Mistral, config.mistral_balance)?,
        });
    }

    Ok(Relay {
        pipeline,
        scanner: InboundScanner::new(mailbox),
    })
}

fn build_router(config: &Config, sender: Arc<dyn MailSender>) -> ChannelRouter {
    let retry = Arc::new(DeliveryRetryManager::new());
    let pacing = Pacing::new(config.fragment_delay);

    let form = FormPostExecutor::new(
        FormPostConfig::new(&config.relay_account),
        pacing.clone(),
        Arc::clone(&retry),
    );
    let email = EmailExecutor::new(sender, Arc::clone(&retry));
    let router = ChannelRouter::new(Arc::clone(&retry))
        .with_executor(Arc::new(form))
        .with_executor(Arc::new(email));

    #[cfg(feature = "browser")]
    let router = {
        use crate::delivery::SessionExecutor;
        use crate::delivery::chromium::ChromiumLauncher;

        let session = SessionExecutor::new(
            Arc::new(ChromiumLauncher::default()),
            config.device.clone(),
            pacing,
            Arc::clone(&retry),
        );
        router.with_executor(Arc::new(session))
    };
    #[cfg(not(feature = "browser"))]
    tracing::warn!("Built without the browser feature; session links fall back to email");

    router
}

fn open_ledger(
    config: &Config,
    kind: ProviderKind,
    initial: Decimal,
) -> anyhow::Result<Arc<dyn BalanceLedger>> {
    Ok(match config.ledger_path {
        Some(ref path) => Arc::new(
            FileLedger::open(path, kind.as_str(), initial)
                .with_context(|| format!("failed to open {kind} ledger at {}", path.display()))?,
        ),
        None => Arc::new(InMemoryLedger::new(initial)),
    })
}

/// Run one scan, or keep scanning every `CHECK_INTERVAL_SECS` until Ctrl-C.
pub async fn run_relay_command(config: Config, once: bool) -> anyhow::Result<()> {
    let relay = build_relay(&config)?;
    tracing::info!(
        account = %config.relay_account,
        interval_secs = config.check_interval.as_secs(),
        once,
        "Relay starting"
    );

    if once {
        let reports = scan(&relay).await?;
        summarize(&reports);
        return Ok(());
    }

    let mut ticker = tokio::time::interval(config.check_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match scan(&relay).await {
                    Ok(reports) => summarize(&reports),
                    Err(e) => tracing::error!(error = %e, "Scan failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    for (channel, snapshot) in relay.pipeline.router().metrics().await {
        tracing::info!(
            %channel,
            attempted = snapshot.total_attempts,
            delivered = snapshot.successful,
            failed = snapshot.failed,
            retried = snapshot.retried,
            "Delivery totals"
        );
    }
    Ok(())
}

async fn scan(relay: &Relay) -> anyhow::Result<Vec<RunReport>> {
    let run_id = Uuid::new_v4();
    let reports = relay
        .pipeline
        .run_once(&relay.scanner)
        .instrument(tracing::info_span!("scan", %run_id))
        .await?;
    Ok(reports)
}

fn summarize(reports: &[RunReport]) {
    for report in reports {
        match &report.result {
            Ok(RunOutcome::Delivered(outcome)) => tracing::info!(
                id = %report.message_id,
                channel = %outcome.channel,
                succeeded = outcome.succeeded,
                attempted = outcome.attempted,
                fell_back = outcome.fell_back,
                "Answer delivered"
            ),
            Ok(RunOutcome::NoAnswer { notice }) => tracing::warn!(
                id = %report.message_id,
                channel = %notice.channel,
                "No answer; notice sent"
            ),
            Err(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(extra: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = [
            ("RELAY_ACCOUNT", "relay@example.com"),
            ("GMAIL_ACCESS_TOKEN", "token"),
        ]
        .iter()
        .chain(extra)
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Config::from_lookup(move |key| map.get(key).cloned()).unwrap()
    }

    #[test]
    fn test_build_relay_registers_channels() {
        let relay = build_relay(&config(&[])).unwrap();
        let router = relay.pipeline.router();
        assert!(router.has_channel(crate::delivery::EndpointKind::FormPost));
        assert!(router.has_channel(crate::delivery::EndpointKind::EmailFallback));
        #[cfg(feature = "browser")]
        assert!(router.has_channel(crate::delivery::EndpointKind::InteractiveSession));
    }

    #[test]
    fn test_file_ledger_used_when_path_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let path_str = path.to_string_lossy().to_string();
        let cfg = config(&[("LEDGER_PATH", path_str.as_str()), ("CLAUDE_BALANCE", "3.50")]);

        let ledger = open_ledger(&cfg, ProviderKind::Claude, cfg.claude_balance).unwrap();
        assert_eq!(ledger.balance(), rust_decimal_macros::dec!(3.50));
    }
}
