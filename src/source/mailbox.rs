use super::{
    RankedEntry, RecipientSource, RecipientStatsQuery, RecipientsResponse, SourceError,
    SourceKind,
};
use crate::address::{self, UNKNOWN_DOMAIN};
use crate::api::auth::Session;
use crate::mailbox::{self, MailboxClient, MailboxError, ParsedMessage};
use futures::{StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

/// Fixed page size for the sent-folder listing.
pub const SENT_PAGE_SIZE: u32 = 50;

/// Exponential backoff for rate-limited provider calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based). A provider-supplied
    /// `Retry-After` wins over the computed backoff, capped at `max_delay`.
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let backoff = self
            .base_delay
            .saturating_mul(2_u32.saturating_pow(attempt));
        retry_after.unwrap_or(backoff).min(self.max_delay)
    }

    async fn run<T, F, Fut>(&self, what: &str, mut call: F) -> Result<T, MailboxError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, MailboxError>> + Send,
        T: Send,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Err(err) if err.is_rate_limited() && attempt < self.max_retries => {
                    let delay = self.delay(attempt, err.retry_after());
                    tracing::warn!(
                        call = what,
                        attempt = attempt + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Mailbox provider rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

/// Serves recipient stats by reading the sent folder directly.
///
/// Lists up to [`SENT_PAGE_SIZE`] sent messages and fetches each one, at most
/// `concurrency` at a time. Every fetch is a provider API call, so large
/// windows risk hitting the provider's rate limit.
pub struct MailboxSource<C> {
    client: C,
    concurrency: usize,
    retry: RetryPolicy,
}

impl<C: MailboxClient> MailboxSource<C> {
    pub fn new(client: C, concurrency: usize, retry: RetryPolicy) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
            retry,
        }
    }

    async fn fetch_sent(&self, session: &Session) -> Result<Vec<ParsedMessage>, MailboxError> {
        let ids = self
            .retry
            .run("list", || {
                self.client.list_sent_messages(session, SENT_PAGE_SIZE)
            })
            .await?;

        tracing::debug!(
            owner = %session.user.email,
            messages = ids.len(),
            window = self.concurrency,
            "Fetching sent messages"
        );

        futures::stream::iter(ids)
            .map(|id| async move {
                let message = self
                    .retry
                    .run("get", || self.client.get_message(session, &id))
                    .await?;
                Ok::<_, MailboxError>(mailbox::parse_message(message))
            })
            .buffered(self.concurrency)
            .try_collect()
            .await
    }
}

#[async_trait::async_trait]
impl<C: MailboxClient> RecipientSource for MailboxSource<C> {
    fn kind(&self) -> SourceKind {
        SourceKind::Mailbox
    }

    async fn recipients(
        &self,
        session: &Session,
        query: &RecipientStatsQuery,
    ) -> Result<RecipientsResponse, SourceError> {
        // The sent listing is not date-scoped; period and bounds only apply
        // to the analytics store.
        tracing::debug!(period = %query.period, "Computing recipients from mailbox");
        let messages = self.fetch_sent(session).await?;
        Ok(tally_recipients(&messages))
    }
}

/// Count recipients and recipient domains across parsed messages.
///
/// Messages without a `To` header are skipped. Recipients are counted by
/// their exact header string; domains come from [`address::parse_domain`].
/// Both lists are sorted by descending count with ties in first-seen order.
pub fn tally_recipients(messages: &[ParsedMessage]) -> RecipientsResponse {
    let mut by_recipient = Counter::default();
    let mut by_domain = Counter::default();

    for to in messages.iter().filter_map(|m| m.headers.to.as_deref()) {
        by_recipient.add(to);
        let domain = address::parse_domain(to);
        by_domain.add(domain.as_deref().unwrap_or(UNKNOWN_DOMAIN));
    }

    RecipientsResponse {
        most_active_recipient_emails: by_recipient.into_ranked(),
        most_active_recipient_domains: by_domain.into_ranked(),
    }
}

/// Occurrence counter that remembers first-seen order.
#[derive(Default)]
struct Counter {
    index: HashMap<String, usize>,
    entries: Vec<RankedEntry>,
}

impl Counter {
    fn add(&mut self, key: &str) {
        if let Some(&i) = self.index.get(key) {
            self.entries[i].value += 1;
        } else {
            self.index.insert(key.to_string(), self.entries.len());
            self.entries.push(RankedEntry {
                name: key.to_string(),
                value: 1,
            });
        }
    }

    fn into_ranked(mut self) -> Vec<RankedEntry> {
        // Stable sort keeps first-seen order among equal counts
        self.entries.sort_by(|a, b| b.value.cmp(&a.value));
        self.entries
    }
}
