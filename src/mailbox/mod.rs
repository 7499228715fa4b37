//! Mailbox provider access: listing sent messages and reading their headers.

pub mod gmail;

use crate::api::auth::Session;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Gmail search query selecting the sent folder.
pub const SENT_QUERY: &str = "in:sent";

/// A single message header as returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageHeader {
    pub name: String,
    pub value: String,
}

/// A message as fetched from the provider, headers only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub id: String,
    pub headers: Vec<MessageHeader>,
}

/// Header fields extracted from a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedHeaders {
    pub to: Option<String>,
}

/// A fetched message plus its extracted headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    pub message: RawMessage,
    pub headers: ParsedHeaders,
}

/// Extract the header fields the recipient tally needs.
///
/// Header names match case-insensitively; RFC 2047 encoded words in the
/// value are decoded.
pub fn parse_message(message: RawMessage) -> ParsedMessage {
    let to = message
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("to"))
        .map(|h| decode_header_value(&h.value))
        .filter(|v| !v.is_empty());

    ParsedMessage {
        headers: ParsedHeaders { to },
        message,
    }
}

fn decode_header_value(value: &str) -> String {
    let line = format!("To: {value}");
    mailparse::parse_header(line.as_bytes())
        .map_or_else(|_| value.trim().to_string(), |(h, _)| h.get_value().trim().to_string())
}

/// Mailbox provider failure.
#[derive(Debug)]
pub enum MailboxError {
    /// The session carries no mailbox provider token.
    MissingCredentials,
    /// The provider asked us to slow down.
    RateLimited { retry_after: Option<Duration> },
    /// Any other non-success response.
    Status { status: u16, message: String },
    Transport(String),
}

impl MailboxError {
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Provider-supplied wait before the next attempt, if any.
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl fmt::Display for MailboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCredentials => write!(f, "session has no mailbox token"),
            Self::RateLimited {
                retry_after: Some(d),
            } => write!(f, "rate limited, retry after {}s", d.as_secs()),
            Self::RateLimited { retry_after: None } => write!(f, "rate limited"),
            Self::Status { status, message } => write!(f, "provider returned {status}: {message}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

impl std::error::Error for MailboxError {}

impl From<reqwest::Error> for MailboxError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Access to an account's sent mail.
#[async_trait::async_trait]
pub trait MailboxClient: Send + Sync {
    /// Ids of up to `max_results` sent messages, newest first.
    async fn list_sent_messages(
        &self,
        account: &Session,
        max_results: u32,
    ) -> Result<Vec<String>, MailboxError>;

    async fn get_message(&self, account: &Session, id: &str) -> Result<RawMessage, MailboxError>;
}
