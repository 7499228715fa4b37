use super::{MailboxClient, MailboxError, MessageHeader, RawMessage, SENT_QUERY};
use crate::api::auth::Session;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

/// Default Gmail REST endpoint.
pub const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com";

/// Gmail REST API client, authenticated per call with the session's
/// mailbox token.
#[derive(Clone)]
pub struct GmailClient {
    http: reqwest::Client,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    id: String,
    #[serde(default)]
    payload: Option<Payload>,
}

#[derive(Debug, Deserialize)]
struct Payload {
    #[serde(default)]
    headers: Vec<MessageHeader>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorReason>,
}

#[derive(Debug, Deserialize)]
struct ErrorReason {
    #[serde(default)]
    reason: String,
}

impl GmailClient {
    pub fn new(api_base: impl Into<String>, timeout: Duration) -> Result<Self, MailboxError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("mailpulse/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/gmail/v1/users/me/messages", self.api_base)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        account: &Session,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, MailboxError> {
        let token = account
            .mailbox_token
            .as_deref()
            .ok_or(MailboxError::MissingCredentials)?;

        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();
        Err(classify_error(status, retry_after, &body))
    }
}

/// Map a non-success Gmail response to a [`MailboxError`].
///
/// Gmail signals quota exhaustion with 429, or with 403 and a
/// `rateLimitExceeded` / `userRateLimitExceeded` reason.
fn classify_error(status: StatusCode, retry_after: Option<Duration>, body: &str) -> MailboxError {
    let envelope = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let rate_limit_reason = envelope.as_ref().is_some_and(|e| {
        e.error
            .errors
            .iter()
            .any(|r| matches!(r.reason.as_str(), "rateLimitExceeded" | "userRateLimitExceeded"))
    });

    if status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && rate_limit_reason)
    {
        return MailboxError::RateLimited { retry_after };
    }

    let message = envelope.map_or_else(
        || status.canonical_reason().unwrap_or("unknown").to_string(),
        |e| e.error.message,
    );
    MailboxError::Status {
        status: status.as_u16(),
        message,
    }
}

#[async_trait::async_trait]
impl MailboxClient for GmailClient {
    async fn list_sent_messages(
        &self,
        account: &Session,
        max_results: u32,
    ) -> Result<Vec<String>, MailboxError> {
        let max = max_results.to_string();
        let list: ListResponse = self
            .get_json(
                account,
                &self.messages_url(),
                &[("q", SENT_QUERY), ("maxResults", max.as_str())],
            )
            .await?;
        Ok(list.messages.into_iter().map(|m| m.id).collect())
    }

    async fn get_message(&self, account: &Session, id: &str) -> Result<RawMessage, MailboxError> {
        let url = format!("{}/{id}", self.messages_url());
        let message: MessageResponse = self
            .get_json(
                account,
                &url,
                &[("format", "metadata"), ("metadataHeaders", "To")],
            )
            .await?;
        Ok(RawMessage {
            id: message.id,
            headers: message.payload.map(|p| p.headers).unwrap_or_default(),
        })
    }
}
