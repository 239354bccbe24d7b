//! Reply-endpoint classification.
//!
//! A device reply link comes in two shapes: a short-token redirect link
//! (`https://inreachlink.com/<token>`) that only works through a browser
//! session, and a direct form URL carrying the conversation token as the
//! `extId` query parameter. Anything else is only reachable by mail.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ChannelError;
use crate::mail::is_email_address;

const SESSION_HOST: &str = "inreachlink.com";
const FORM_HOST: &str = "garmin.com";
const FORM_TOKEN_PARAM: &str = "extId";
const FORM_REPLY_PARAM: &str = "adr";

/// Delivery strategy chosen for an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    FormPost,
    InteractiveSession,
    EmailFallback,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FormPost => "form_post",
            Self::InteractiveSession => "interactive_session",
            Self::EmailFallback => "email_fallback",
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a fragment sequence must go.
///
/// `kind` is decided once at construction and never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryEndpoint {
    raw_url: String,
    kind: EndpointKind,
    fallback_address: Option<String>,
}

impl DeliveryEndpoint {
    /// Classify `raw` by shape.
    ///
    /// Priority: session link, then form URL, then email. A bare email
    /// address in `raw` doubles as its own fallback address.
    pub fn classify(raw: &str, fallback_address: Option<String>) -> Result<Self, ChannelError> {
        let raw = raw.trim();
        let fallback_address = fallback_address
            .map(|a| a.trim().to_string())
            .filter(|a| is_email_address(a));

        let kind = match Url::parse(raw) {
            Ok(url) if is_session_link(&url) => Some(EndpointKind::InteractiveSession),
            Ok(url) if is_form_url(&url) => Some(EndpointKind::FormPost),
            _ => None,
        };

        if let Some(kind) = kind {
            return Ok(Self::new(raw, kind, fallback_address));
        }

        if is_email_address(raw) {
            let fallback = fallback_address.or_else(|| Some(raw.to_string()));
            return Ok(Self::new(raw, EndpointKind::EmailFallback, fallback));
        }

        if fallback_address.is_some() {
            return Ok(Self::new(raw, EndpointKind::EmailFallback, fallback_address));
        }

        Err(ChannelError::MissingPrerequisite {
            url: raw.to_string(),
            missing: "session token, form token or fallback address".to_string(),
        })
    }

    /// Build an endpoint with an explicit kind, skipping classification.
    pub fn new(raw_url: impl Into<String>, kind: EndpointKind, fallback_address: Option<String>) -> Self {
        Self {
            raw_url: raw_url.into(),
            kind,
            fallback_address,
        }
    }

    pub fn raw_url(&self) -> &str {
        &self.raw_url
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    pub fn fallback_address(&self) -> Option<&str> {
        self.fallback_address.as_deref()
    }

    /// Conversation token: the `extId` parameter for form URLs, the path
    /// token for session links.
    pub fn correlation_token(&self) -> Option<String> {
        let url = Url::parse(&self.raw_url).ok()?;
        match self.kind {
            EndpointKind::FormPost => {
                query_param(&url, FORM_TOKEN_PARAM).filter(|token| !token.is_empty())
            }
            EndpointKind::InteractiveSession => {
                let token = url.path().trim_matches('/');
                (!token.is_empty()).then(|| token.to_string())
            }
            EndpointKind::EmailFallback => None,
        }
    }

    /// Form target: the URL without its query string.
    pub fn form_post_url(&self) -> Option<String> {
        let mut url = Url::parse(&self.raw_url).ok()?;
        url.set_query(None);
        url.set_fragment(None);
        Some(url.to_string())
    }

    /// Origin header value for the form target.
    pub fn origin(&self) -> Option<String> {
        let url = Url::parse(&self.raw_url).ok()?;
        match url.origin() {
            origin @ url::Origin::Tuple(..) => Some(origin.ascii_serialization()),
            url::Origin::Opaque(_) => None,
        }
    }

    /// Reply address the form URL carries in `adr`, if any.
    pub fn reply_address(&self) -> Option<String> {
        let url = Url::parse(&self.raw_url).ok()?;
        query_param(&url, FORM_REPLY_PARAM).filter(|a| !a.is_empty())
    }
}

fn host_matches(url: &Url, domain: &str) -> bool {
    url.host_str().is_some_and(|host| {
        let host = host.to_ascii_lowercase();
        host == domain || host.ends_with(&format!(".{domain}"))
    })
}

fn is_session_link(url: &Url) -> bool {
    host_matches(url, SESSION_HOST) && !url.path().trim_matches('/').is_empty()
}

fn is_form_url(url: &Url) -> bool {
    host_matches(url, FORM_HOST)
        && query_param(url, FORM_TOKEN_PARAM).is_some_and(|token| !token.is_empty())
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const FORM_URL: &str = "https://eur.explore.garmin.com/textmessage/txtmsg?extId=08db1f5a-0000-4c5e&adr=relay%40example.com";

    // ── classification ──

    #[test]
    fn test_session_link_routes_to_interactive_session() {
        let endpoint = DeliveryEndpoint::classify("https://inreachlink.com/AbC123", None).unwrap();
        assert_eq!(endpoint.kind(), EndpointKind::InteractiveSession);
        assert_eq!(endpoint.correlation_token().as_deref(), Some("AbC123"));
    }

    #[test]
    fn test_form_url_routes_to_form_post() {
        let endpoint = DeliveryEndpoint::classify(FORM_URL, None).unwrap();
        assert_eq!(endpoint.kind(), EndpointKind::FormPost);
        assert_eq!(
            endpoint.correlation_token().as_deref(),
            Some("08db1f5a-0000-4c5e")
        );
        assert_eq!(endpoint.reply_address().as_deref(), Some("relay@example.com"));
        assert_eq!(
            endpoint.form_post_url().as_deref(),
            Some("https://eur.explore.garmin.com/textmessage/txtmsg")
        );
        assert_eq!(
            endpoint.origin().as_deref(),
            Some("https://eur.explore.garmin.com")
        );
    }

    #[test]
    fn test_bare_email_routes_to_email_fallback() {
        let endpoint = DeliveryEndpoint::classify("skipper@example.org", None).unwrap();
        assert_eq!(endpoint.kind(), EndpointKind::EmailFallback);
        assert_eq!(endpoint.fallback_address(), Some("skipper@example.org"));
    }

    #[test]
    fn test_session_link_wins_over_form_token() {
        let endpoint =
            DeliveryEndpoint::classify("https://inreachlink.com/Tok?extId=abc", None).unwrap();
        assert_eq!(endpoint.kind(), EndpointKind::InteractiveSession);
    }

    #[test]
    fn test_form_host_without_token_needs_fallback() {
        let url = "https://explore.garmin.com/textmessage/txtmsg";
        assert!(matches!(
            DeliveryEndpoint::classify(url, None),
            Err(ChannelError::MissingPrerequisite { .. })
        ));

        let endpoint =
            DeliveryEndpoint::classify(url, Some("skipper@example.org".into())).unwrap();
        assert_eq!(endpoint.kind(), EndpointKind::EmailFallback);
        assert_eq!(endpoint.fallback_address(), Some("skipper@example.org"));
    }

    #[test]
    fn test_session_link_without_token_is_not_a_session() {
        assert!(DeliveryEndpoint::classify("https://inreachlink.com/", None).is_err());
    }

    #[test]
    fn test_lookalike_host_is_rejected() {
        let url = "https://inreachlink.com.evil.test/AbC123";
        assert!(DeliveryEndpoint::classify(url, None).is_err());
        let url = "https://notgarmin.com/txtmsg?extId=abc";
        assert!(DeliveryEndpoint::classify(url, None).is_err());
    }

    #[test]
    fn test_invalid_fallback_is_dropped() {
        let endpoint =
            DeliveryEndpoint::classify(FORM_URL, Some("not an address".into())).unwrap();
        assert_eq!(endpoint.fallback_address(), None);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(EndpointKind::FormPost.to_string(), "form_post");
        assert_eq!(
            EndpointKind::InteractiveSession.to_string(),
            "interactive_session"
        );
        assert_eq!(EndpointKind::EmailFallback.to_string(), "email_fallback");
    }
}
