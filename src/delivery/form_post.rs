//! Direct form submission to the device reply page.
//!
//! The reply page posts `ReplyMessage`, `Guid` and `ReplyAddress` as a
//! urlencoded form from an XHR; the relay does the same, one request per
//! fragment.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, COOKIE, HeaderMap, HeaderValue, ORIGIN, USER_AGENT};

use super::{
    DeliveryEndpoint, DeliveryExecutor, DeliveryOutcome, DeliveryRetryManager, EndpointKind,
    Pacing, send_each,
};
use crate::encoding::Fragment;
use crate::error::ChannelError;

const CHANNEL: &str = "form_post";
const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

#[derive(Debug, Clone)]
pub struct FormPostConfig {
    /// Used as `ReplyAddress` when the link carries no `adr`.
    pub relay_account: String,
    pub request_timeout: Duration,
}

impl FormPostConfig {
    pub fn new(relay_account: impl Into<String>) -> Self {
        Self {
            relay_account: relay_account.into(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct FormPostExecutor {
    client: Client,
    config: FormPostConfig,
    pacing: Pacing,
    retry: Arc<DeliveryRetryManager>,
}

impl FormPostExecutor {
    pub fn new(config: FormPostConfig, pacing: Pacing, retry: Arc<DeliveryRetryManager>) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            config,
            pacing,
            retry,
        }
    }

    fn headers(origin: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(USER_AGENT, HeaderValue::from_static(DESKTOP_USER_AGENT));
        headers.insert("x-requested-with", HeaderValue::from_static("XMLHttpRequest"));
        headers.insert(COOKIE, HeaderValue::from_static("BrowsingMode=Desktop"));
        if let Ok(value) = HeaderValue::from_str(origin) {
            headers.insert(ORIGIN, value);
        }
        headers
    }
}

/// Everything needed to post to one endpoint.
struct FormTarget {
    url: String,
    origin: String,
    guid: String,
    reply_address: String,
}

impl FormTarget {
    fn resolve(endpoint: &DeliveryEndpoint, relay_account: &str) -> Result<Self, ChannelError> {
        let missing = |what: &str| ChannelError::MissingPrerequisite {
            url: endpoint.raw_url().to_string(),
            missing: what.to_string(),
        };
        Ok(Self {
            url: endpoint.form_post_url().ok_or_else(|| missing("form URL"))?,
            origin: endpoint.origin().ok_or_else(|| missing("origin"))?,
            guid: endpoint
                .correlation_token()
                .ok_or_else(|| missing("extId token"))?,
            reply_address: endpoint
                .reply_address()
                .unwrap_or_else(|| relay_account.to_string()),
        })
    }
}

#[async_trait]
impl DeliveryExecutor for FormPostExecutor {
    fn kind(&self) -> EndpointKind {
        EndpointKind::FormPost
    }

    async fn deliver(&self, endpoint: &DeliveryEndpoint, fragments: &[Fragment]) -> DeliveryOutcome {
        let target = match FormTarget::resolve(endpoint, &self.config.relay_account) {
            Ok(target) => target,
            Err(e) => {
                tracing::warn!(channel = CHANNEL, error = %e, "Form target unusable");
                return DeliveryOutcome::all_failed(self.kind(), fragments);
            }
        };
        let headers = Self::headers(&target.origin);

        tracing::info!(
            channel = CHANNEL,
            url = %target.url,
            fragments = fragments.len(),
            "Posting fragments"
        );

        send_each(self.kind(), fragments, &self.pacing, &self.retry, |fragment| {
            let request = self
                .client
                .post(&target.url)
                .headers(headers.clone())
                .form(&[
                    ("ReplyMessage", fragment.as_str()),
                    ("Guid", target.guid.as_str()),
                    ("ReplyAddress", target.reply_address.as_str()),
                ]);
            async move {
                let response = request.send().await.map_err(|e| ChannelError::SendFailed {
                    name: CHANNEL.to_string(),
                    reason: e.to_string(),
                })?;
                let status = response.status();
                if status == reqwest::StatusCode::OK {
                    Ok(())
                } else {
                    Err(ChannelError::Status {
                        name: CHANNEL.to_string(),
                        status: status.as_u16(),
                    })
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::delivery::RetryConfig;
    use crate::encoding::{BalancerConfig, TextBalancer};

    fn executor(max_retries: u32) -> FormPostExecutor {
        let retry = DeliveryRetryManager::with_default_config(RetryConfig {
            max_retries,
            base_delay_ms: 1,
            max_delay_ms: 5,
            jitter_factor: 0.0,
            enabled: true,
        });
        FormPostExecutor::new(
            FormPostConfig::new("relay@example.com"),
            Pacing::immediate(),
            Arc::new(retry),
        )
    }

    fn endpoint(server: &mockito::Server, query: &str) -> DeliveryEndpoint {
        DeliveryEndpoint::new(
            format!("{}/textmessage/txtmsg?{query}", server.url()),
            EndpointKind::FormPost,
            None,
        )
    }

    fn two_fragments() -> Vec<Fragment> {
        let text = "Vent d'ouest 25 noeuds rafales 35, mer forte, houle 3 m. \
                    Reduire la toile avant la nuit et garder le cap au 210 jusqu'a demain midi.";
        let fragments = TextBalancer::new(BalancerConfig::default()).balance(text, None);
        assert_eq!(fragments.len(), 2);
        fragments
    }

    #[tokio::test]
    async fn test_posts_each_fragment_as_form() {
        let mut server = mockito::Server::new_async().await;
        let fragments = two_fragments();
        let mock = server
            .mock("POST", "/textmessage/txtmsg")
            .match_header("x-requested-with", "XMLHttpRequest")
            .match_header("cookie", "BrowsingMode=Desktop")
            .match_header("origin", server.url().as_str())
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("Guid".into(), "abc-123".into()),
                Matcher::UrlEncoded("ReplyAddress".into(), "skipper@example.org".into()),
                Matcher::Regex("ReplyMessage=".into()),
            ]))
            .with_status(200)
            .expect(2)
            .create_async()
            .await;

        let outcome = executor(0)
            .deliver(
                &endpoint(&server, "extId=abc-123&adr=skipper%40example.org"),
                &fragments,
            )
            .await;

        assert!(outcome.is_full_success());
        assert_eq!(outcome.attempted, 2);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_adr_uses_relay_account() {
        let mut server = mockito::Server::new_async().await;
        let fragments = two_fragments();
        let mock = server
            .mock("POST", "/textmessage/txtmsg")
            .match_body(Matcher::UrlEncoded(
                "ReplyAddress".into(),
                "relay@example.com".into(),
            ))
            .with_status(200)
            .expect(2)
            .create_async()
            .await;

        let outcome = executor(0)
            .deliver(&endpoint(&server, "extId=abc-123"), &fragments)
            .await;
        assert!(outcome.is_full_success());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_200_marks_fragment_failed() {
        let mut server = mockito::Server::new_async().await;
        let fragments = two_fragments();
        let _mock = server
            .mock("POST", "/textmessage/txtmsg")
            .with_status(500)
            .create_async()
            .await;

        let outcome = executor(1)
            .deliver(&endpoint(&server, "extId=abc-123"), &fragments)
            .await;

        assert_eq!(outcome.succeeded, 0);
        assert_eq!(outcome.failed_indices, vec![1, 2]);
        assert!(outcome.is_total_failure());
    }

    #[tokio::test]
    async fn test_missing_token_fails_every_fragment_without_request() {
        let mut server = mockito::Server::new_async().await;
        let fragments = two_fragments();
        let mock = server
            .mock("POST", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let outcome = executor(0)
            .deliver(&endpoint(&server, "adr=x%40y.z"), &fragments)
            .await;

        assert_eq!(outcome.failed_indices, vec![1, 2]);
        mock.assert_async().await;
    }
}
