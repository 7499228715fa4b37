//! Recipient statistics strategies.
//!
//! A [`RecipientSource`] turns an authenticated session plus a validated
//! [`RecipientStatsQuery`] into a [`RecipientsResponse`]. Two implementations
//! exist: [`analytics::AnalyticsSource`] queries the precomputed analytics
//! store, [`mailbox::MailboxSource`] pages through the mailbox provider and
//! tallies recipients in-process. Exactly one is active per process.

pub mod analytics;
pub mod mailbox;

use crate::api::auth::Session;
use crate::mailbox::MailboxError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named time-bucket window used to scope analytics aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Day,
    Week,
    Month,
    Year,
}

impl Period {
    pub const ALL: [Self; 4] = [Self::Day, Self::Week, Self::Month, Self::Year];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| {
                format!("Invalid period: {s}. Use 'day', 'week', 'month' or 'year'.")
            })
    }
}

/// Validated recipient stats request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecipientStatsQuery {
    pub period: Period,
    pub from_date: Option<i64>,
    pub to_date: Option<i64>,
}

/// One ranked name/count pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub name: String,
    pub value: u64,
}

/// The endpoint's response body: two ranked lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientsResponse {
    pub most_active_recipient_emails: Vec<RankedEntry>,
    pub most_active_recipient_domains: Vec<RankedEntry>,
}

/// Aggregate row returned by the analytics store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentToRow {
    pub to: String,
    pub count: u64,
}

impl From<SentToRow> for RankedEntry {
    fn from(row: SentToRow) -> Self {
        Self {
            name: row.to,
            value: row.count,
        }
    }
}

/// Arguments shared by both analytics aggregates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientScope {
    pub owner_email: String,
    pub period: Period,
    pub from_date: Option<i64>,
    pub to_date: Option<i64>,
    pub limit: usize,
}

/// Which strategy serves recipient stats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Analytics,
    Mailbox,
}

impl SourceKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Analytics => "analytics",
            Self::Mailbox => "mailbox",
        }
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "analytics" => Ok(Self::Analytics),
            "mailbox" => Ok(Self::Mailbox),
            other => Err(format!(
                "Unknown recipient source: {other}. Use 'analytics' or 'mailbox'."
            )),
        }
    }
}

/// Failure of an upstream collaborator while computing recipient stats.
#[derive(Debug)]
pub enum SourceError {
    Database(duckdb::Error),
    Mailbox(MailboxError),
    Task(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Database(e) => write!(f, "Database error: {e}"),
            Self::Mailbox(e) => write!(f, "Mailbox error: {e}"),
            Self::Task(msg) => write!(f, "Query task failed: {msg}"),
        }
    }
}

impl std::error::Error for SourceError {}

impl From<duckdb::Error> for SourceError {
    fn from(e: duckdb::Error) -> Self {
        Self::Database(e)
    }
}

impl From<MailboxError> for SourceError {
    fn from(e: MailboxError) -> Self {
        Self::Mailbox(e)
    }
}

impl From<tokio::task::JoinError> for SourceError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}

/// Strategy that computes recipient stats for an authenticated owner.
#[async_trait::async_trait]
pub trait RecipientSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    async fn recipients(
        &self,
        session: &Session,
        query: &RecipientStatsQuery,
    ) -> Result<RecipientsResponse, SourceError>;
}
