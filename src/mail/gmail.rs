//! Gmail REST API mailbox.
//!
//! Reads unread mail with `users.messages.list`/`get`, fetches attachment
//! bodies separately, marks messages consumed by removing the `UNREAD`
//! label, and sends plain-text mail as base64url-encoded RFC 822.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{Attachment, InboxMessage, MailFilter, MailSender, Mailbox, OutgoingMail, is_email_address};
use crate::error::MailError;

pub const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Gmail mailbox for the relay account.
pub struct GmailClient {
    client: Client,
    base_url: String,
    account: String,
    access_token: SecretString,
}

impl GmailClient {
    pub fn new(account: impl Into<String>, access_token: SecretString) -> Self {
        Self::with_base_url(DEFAULT_API_BASE, account, access_token)
    }

    /// Point the client at another API root (used against mock servers).
    pub fn with_base_url(
        base_url: impl Into<String>,
        account: impl Into<String>,
        access_token: SecretString,
    ) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.into(),
            account: account.into(),
            access_token,
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/gmail/v1/users/me/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        req.header(
            "Authorization",
            format!("Bearer {}", self.access_token.expose_secret()),
        )
    }

    async fn execute<R: DeserializeOwned>(
        &self,
        operation: &str,
        req: RequestBuilder,
    ) -> Result<R, MailError> {
        let response = self.authorized(req).send().await.map_err(|e| {
            if e.is_timeout() {
                MailError::Timeout {
                    operation: operation.to_string(),
                    timeout: REQUEST_TIMEOUT,
                }
            } else {
                MailError::RequestFailed {
                    operation: operation.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(MailError::AuthFailed);
            }
            return Err(MailError::Rejected {
                operation: operation.to_string(),
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| {
            MailError::InvalidPayload(format!("{operation}: JSON parse error: {e}"))
        })
    }

    async fn fetch_message(&self, id: &str) -> Result<InboxMessage, MailError> {
        let msg: GmailMessage = self
            .execute(
                "get",
                self.client
                    .get(self.api_url(&format!("messages/{id}")))
                    .query(&[("format", "full")]),
            )
            .await?;

        let payload = msg.payload.unwrap_or_default();
        let header = |name: &str| {
            payload
                .headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case(name))
                .map(|h| h.value.clone())
        };

        let from = header("From").unwrap_or_default();
        let reply_to = header("Reply-To");
        let subject = header("Subject").unwrap_or_default();

        let mut parts = Vec::new();
        flatten_parts(&payload, &mut parts);

        let body = parts
            .iter()
            .find(|p| p.mime_type.eq_ignore_ascii_case("text/plain") && p.filename.is_empty())
            .and_then(|p| p.body.data.as_deref())
            .and_then(|data| decode_base64url(data).ok())
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_else(|| msg.snippet.clone().unwrap_or_default());

        let mut attachments = Vec::new();
        for part in parts.iter().filter(|p| p.is_attachment()) {
            let data = match (&part.body.data, &part.body.attachment_id) {
                (Some(data), _) => decode_base64url(data)?,
                (None, Some(attachment_id)) => self.fetch_attachment(id, attachment_id).await?,
                (None, None) => continue,
            };
            attachments.push(Attachment {
                filename: (!part.filename.is_empty()).then(|| part.filename.clone()),
                content_type: part.mime_type.clone(),
                data,
            });
        }

        let received_at = msg
            .internal_date
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());

        Ok(InboxMessage {
            id: msg.id,
            from,
            reply_to,
            subject,
            body,
            attachments,
            received_at,
        })
    }

    async fn fetch_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>, MailError> {
        let body: GmailBody = self
            .execute(
                "attachment",
                self.client.get(self.api_url(&format!(
                    "messages/{message_id}/attachments/{attachment_id}"
                ))),
            )
            .await?;
        match body.data {
            Some(data) => decode_base64url(&data),
            None => Ok(Vec::new()),
        }
    }
}

/// Gmail search expression for a filter, so the server does the narrowing.
fn search_query(filter: &MailFilter) -> String {
    let mut terms = Vec::new();
    if let Some(from) = &filter.from {
        terms.push(format!("from:{from}"));
    }
    match filter.sender_markers.as_slice() {
        [] => {}
        [marker] => terms.push(format!("from:{marker}")),
        markers => {
            let any: Vec<String> = markers.iter().map(|m| format!("from:{m}")).collect();
            terms.push(format!("{{{}}}", any.join(" ")));
        }
    }
    terms.push("is:unread".to_string());
    terms.join(" ")
}

#[async_trait]
impl Mailbox for GmailClient {
    async fn unread(&self, filter: &MailFilter) -> Result<Vec<InboxMessage>, MailError> {
        let query = search_query(filter);

        let list: GmailList = self
            .execute(
                "list",
                self.client
                    .get(self.api_url("messages"))
                    .query(&[("q", query.as_str())]),
            )
            .await?;

        let mut messages = Vec::new();
        for entry in list.messages {
            match self.fetch_message(&entry.id).await {
                Ok(message) if filter.matches(&message) => messages.push(message),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(message_id = %entry.id, error = %e, "Skipping unreadable message");
                }
            }
        }

        // The API lists newest first.
        messages.sort_by_key(|m| m.received_at.unwrap_or(DateTime::<Utc>::MAX_UTC));
        tracing::debug!(query = %query, count = messages.len(), "Listed unread mail");
        Ok(messages)
    }

    async fn mark_consumed(&self, id: &str) -> Result<(), MailError> {
        let _: serde_json::Value = self
            .execute(
                "modify",
                self.client
                    .post(self.api_url(&format!("messages/{id}/modify")))
                    .json(&serde_json::json!({ "removeLabelIds": ["UNREAD"] })),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MailSender for GmailClient {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        let raw = build_raw_message(&self.account, mail)?;
        let sent: serde_json::Value = self
            .execute(
                "send",
                self.client
                    .post(self.api_url("messages/send"))
                    .json(&serde_json::json!({ "raw": raw })),
            )
            .await?;
        tracing::info!(
            to = %mail.to,
            id = sent.get("id").and_then(|v| v.as_str()).unwrap_or_default(),
            "Mail sent"
        );
        Ok(())
    }
}

/// Base64url-encoded RFC 822 message, as the `send` endpoint expects.
pub fn build_raw_message(from: &str, mail: &OutgoingMail) -> Result<String, MailError> {
    if !is_email_address(&mail.to) {
        return Err(MailError::InvalidRecipient(mail.to.clone()));
    }
    if [from, mail.to.as_str(), mail.subject.as_str()]
        .iter()
        .any(|v| v.contains(['\r', '\n']))
    {
        return Err(MailError::InvalidPayload(
            "header values must not contain line breaks".to_string(),
        ));
    }

    let subject = if mail.subject.is_ascii() {
        mail.subject.clone()
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(mail.subject.as_bytes()))
    };

    let message = format!(
        "From: {from}\r\n\
         To: {to}\r\n\
         Subject: {subject}\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: text/plain; charset=\"UTF-8\"\r\n\
         Content-Transfer-Encoding: 8bit\r\n\
         \r\n\
         {body}",
        to = mail.to,
        body = mail.body,
    );
    Ok(URL_SAFE.encode(message.as_bytes()))
}

/// Decode Gmail's base64url, with or without padding.
fn decode_base64url(data: &str) -> Result<Vec<u8>, MailError> {
    URL_SAFE_NO_PAD
        .decode(data.trim().trim_end_matches('='))
        .map_err(|e| MailError::InvalidPayload(format!("base64url: {e}")))
}

fn flatten_parts<'a>(part: &'a GmailPart, out: &mut Vec<&'a GmailPart>) {
    out.push(part);
    for child in &part.parts {
        flatten_parts(child, out);
    }
}

// ── Gmail API types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GmailList {
    #[serde(default)]
    messages: Vec<GmailListEntry>,
}

#[derive(Debug, Deserialize)]
struct GmailListEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    #[serde(default)]
    snippet: Option<String>,
    #[serde(default)]
    internal_date: Option<String>,
    #[serde(default)]
    payload: Option<GmailPart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailPart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    headers: Vec<GmailHeader>,
    #[serde(default)]
    body: GmailBody,
    #[serde(default)]
    parts: Vec<GmailPart>,
}

impl GmailPart {
    fn is_attachment(&self) -> bool {
        !self.filename.is_empty() || self.body.attachment_id.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct GmailHeader {
    name: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailBody {
    #[serde(default)]
    attachment_id: Option<String>,
    #[serde(default)]
    data: Option<String>,
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn client(server: &mockito::Server) -> GmailClient {
        GmailClient::with_base_url(
            server.url(),
            "relay@example.org",
            SecretString::from("token-123".to_string()),
        )
    }

    fn b64url(data: &[u8]) -> String {
        URL_SAFE_NO_PAD.encode(data)
    }

    // ── raw message ──

    #[test]
    fn test_raw_message_headers_and_body() {
        let mail = OutgoingMail {
            to: "query@saildocs.com".into(),
            subject: "send".into(),
            body: "send gfs:8N,9N,80W,79W".into(),
        };
        let raw = build_raw_message("relay@example.org", &mail).unwrap();
        let decoded = String::from_utf8(URL_SAFE.decode(raw).unwrap()).unwrap();
        assert!(decoded.starts_with("From: relay@example.org\r\nTo: query@saildocs.com\r\n"));
        assert!(decoded.contains("Subject: send\r\n"));
        assert!(decoded.ends_with("\r\n\r\nsend gfs:8N,9N,80W,79W"));
    }

    #[test]
    fn test_raw_message_encodes_non_ascii_subject() {
        let mail = OutgoingMail {
            to: "skipper@example.org".into(),
            subject: "Réponse".into(),
            body: "ok".into(),
        };
        let raw = build_raw_message("relay@example.org", &mail).unwrap();
        let decoded = String::from_utf8(URL_SAFE.decode(raw).unwrap()).unwrap();
        assert!(decoded.contains("Subject: =?UTF-8?B?"));
    }

    #[test]
    fn test_raw_message_rejects_header_injection() {
        let mail = OutgoingMail {
            to: "skipper@example.org".into(),
            subject: "hi\r\nBcc: someone@example.org".into(),
            body: "ok".into(),
        };
        assert!(matches!(
            build_raw_message("relay@example.org", &mail),
            Err(MailError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_search_query_narrows_by_sender() {
        assert_eq!(search_query(&MailFilter::default()), "is:unread");
        assert_eq!(
            search_query(&MailFilter::from_sender("query-reply@saildocs.com")),
            "from:query-reply@saildocs.com is:unread"
        );
        let markers = vec!["inReach".to_string(), "garmin".to_string()];
        assert_eq!(
            search_query(&MailFilter::from_sender_markers(&markers)),
            "{from:inreach from:garmin} is:unread"
        );
    }

    #[test]
    fn test_decode_base64url_with_and_without_padding() {
        assert_eq!(decode_base64url("aGk").unwrap(), b"hi");
        assert_eq!(decode_base64url("aGk=").unwrap(), b"hi");
    }

    // ── HTTP ──

    #[tokio::test]
    async fn test_unread_fetches_body_and_attachment() {
        let mut server = mockito::Server::new_async().await;
        let list = server
            .mock("GET", "/gmail/v1/users/me/messages")
            .match_query(Matcher::UrlEncoded(
                "q".into(),
                "from:query-reply@saildocs.com is:unread".into(),
            ))
            .match_header("authorization", "Bearer token-123")
            .with_status(200)
            .with_body(json!({ "messages": [{ "id": "m1", "threadId": "t1" }] }).to_string())
            .create_async()
            .await;
        let get = server
            .mock("GET", "/gmail/v1/users/me/messages/m1")
            .match_query(Matcher::UrlEncoded("format".into(), "full".into()))
            .with_status(200)
            .with_body(
                json!({
                    "id": "m1",
                    "internalDate": "1760000000000",
                    "payload": {
                        "mimeType": "multipart/mixed",
                        "headers": [
                            { "name": "From", "value": "Saildocs <query-reply@saildocs.com>" },
                            { "name": "Subject", "value": "Re: send" }
                        ],
                        "parts": [
                            { "mimeType": "text/plain", "body": { "data": b64url(b"Your file") } },
                            {
                                "mimeType": "application/octet-stream",
                                "filename": "gfs.grb",
                                "body": { "attachmentId": "att1", "size": 4 }
                            }
                        ]
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;
        let attachment = server
            .mock("GET", "/gmail/v1/users/me/messages/m1/attachments/att1")
            .with_status(200)
            .with_body(json!({ "data": b64url(b"GRIB"), "size": 4 }).to_string())
            .create_async()
            .await;

        let messages = client(&server)
            .unread(&MailFilter::from_sender("query-reply@saildocs.com"))
            .await
            .unwrap();

        assert_eq!(messages.len(), 1);
        let m = &messages[0];
        assert_eq!(m.body, "Your file");
        assert_eq!(m.subject, "Re: send");
        assert_eq!(m.attachments.len(), 1);
        assert_eq!(m.attachments[0].data, b"GRIB".to_vec());
        assert_eq!(m.attachments[0].filename.as_deref(), Some("gfs.grb"));
        assert!(m.received_at.is_some());

        list.assert_async().await;
        get.assert_async().await;
        attachment.assert_async().await;
    }

    #[tokio::test]
    async fn test_unread_empty_inbox() {
        let mut server = mockito::Server::new_async().await;
        let _list = server
            .mock("GET", "/gmail/v1/users/me/messages")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(json!({ "resultSizeEstimate": 0 }).to_string())
            .create_async()
            .await;

        let messages = client(&server).unread(&MailFilter::default()).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_unread_device_mail_is_narrowed_by_query() {
        let mut server = mockito::Server::new_async().await;
        let list = server
            .mock("GET", "/gmail/v1/users/me/messages")
            .match_query(Matcher::UrlEncoded(
                "q".into(),
                "{from:inreach from:garmin} is:unread".into(),
            ))
            .with_status(200)
            .with_body(json!({ "resultSizeEstimate": 0 }).to_string())
            .create_async()
            .await;

        let markers = vec!["inreach".to_string(), "garmin".to_string()];
        let messages = client(&server)
            .unread(&MailFilter::from_sender_markers(&markers))
            .await
            .unwrap();
        assert!(messages.is_empty());
        list.assert_async().await;
    }

    #[tokio::test]
    async fn test_auth_failure_maps_to_auth_failed() {
        let mut server = mockito::Server::new_async().await;
        let _list = server
            .mock("GET", "/gmail/v1/users/me/messages")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body("unauthorized")
            .create_async()
            .await;

        let err = client(&server).unread(&MailFilter::default()).await.unwrap_err();
        assert!(matches!(err, MailError::AuthFailed));
    }

    #[tokio::test]
    async fn test_mark_consumed_removes_unread_label() {
        let mut server = mockito::Server::new_async().await;
        let modify = server
            .mock("POST", "/gmail/v1/users/me/messages/m1/modify")
            .match_body(Matcher::Json(json!({ "removeLabelIds": ["UNREAD"] })))
            .with_status(200)
            .with_body(json!({ "id": "m1" }).to_string())
            .create_async()
            .await;

        client(&server).mark_consumed("m1").await.unwrap();
        modify.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_posts_raw_message() {
        let mut server = mockito::Server::new_async().await;
        let mail = OutgoingMail {
            to: "query@saildocs.com".into(),
            subject: "send".into(),
            body: "send gfs:8N,9N,80W,79W".into(),
        };
        let raw = build_raw_message("relay@example.org", &mail).unwrap();
        let send = server
            .mock("POST", "/gmail/v1/users/me/messages/send")
            .match_body(Matcher::Json(json!({ "raw": raw })))
            .with_status(200)
            .with_body(json!({ "id": "sent1" }).to_string())
            .create_async()
            .await;

        client(&server).send(&mail).await.unwrap();
        send.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_rejection_keeps_status() {
        let mut server = mockito::Server::new_async().await;
        let _send = server
            .mock("POST", "/gmail/v1/users/me/messages/send")
            .with_status(500)
            .with_body("backend error")
            .create_async()
            .await;

        let mail = OutgoingMail {
            to: "query@saildocs.com".into(),
            subject: "send".into(),
            body: "send x".into(),
        };
        let err = client(&server).send(&mail).await.unwrap_err();
        assert!(matches!(err, MailError::Rejected { status: 500, .. }));
    }
}
