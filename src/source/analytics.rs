use super::{
    RankedEntry, RecipientScope, RecipientSource, RecipientStatsQuery, RecipientsResponse,
    SentToRow, SourceError, SourceKind,
};
use crate::api::auth::Session;
use crate::query::recipients;
use crate::storage::store::AnalyticsStore;

/// Precomputed aggregate queries over an owner's sent mail.
#[async_trait::async_trait]
pub trait RecipientAnalytics: Send + Sync {
    async fn most_sent_to(&self, scope: &RecipientScope) -> Result<Vec<SentToRow>, SourceError>;

    async fn domains_most_sent_to(
        &self,
        scope: &RecipientScope,
    ) -> Result<Vec<SentToRow>, SourceError>;
}

#[async_trait::async_trait]
impl RecipientAnalytics for AnalyticsStore {
    async fn most_sent_to(&self, scope: &RecipientScope) -> Result<Vec<SentToRow>, SourceError> {
        let conn = self.connect()?;
        let scope = scope.clone();
        let rows = tokio::task::spawn_blocking(move || {
            recipients::query_most_sent_to(&conn, &scope)
        })
        .await??;
        Ok(rows)
    }

    async fn domains_most_sent_to(
        &self,
        scope: &RecipientScope,
    ) -> Result<Vec<SentToRow>, SourceError> {
        let conn = self.connect()?;
        let scope = scope.clone();
        let rows = tokio::task::spawn_blocking(move || {
            recipients::query_domains_most_sent_to(&conn, &scope)
        })
        .await??;
        Ok(rows)
    }
}

/// Serves recipient stats from the analytics store.
///
/// Both aggregates are issued concurrently; if either fails the whole fetch
/// fails. Rows keep the order the store ranked them in.
pub struct AnalyticsSource<A> {
    analytics: A,
    limit: usize,
}

impl<A: RecipientAnalytics> AnalyticsSource<A> {
    pub const fn new(analytics: A, limit: usize) -> Self {
        Self { analytics, limit }
    }
}

#[async_trait::async_trait]
impl<A: RecipientAnalytics> RecipientSource for AnalyticsSource<A> {
    fn kind(&self) -> SourceKind {
        SourceKind::Analytics
    }

    async fn recipients(
        &self,
        session: &Session,
        query: &RecipientStatsQuery,
    ) -> Result<RecipientsResponse, SourceError> {
        let scope = RecipientScope {
            owner_email: session.user.email.clone(),
            period: query.period,
            from_date: query.from_date,
            to_date: query.to_date,
            limit: self.limit,
        };

        let (emails, domains) = tokio::try_join!(
            self.analytics.most_sent_to(&scope),
            self.analytics.domains_most_sent_to(&scope),
        )?;

        Ok(RecipientsResponse {
            most_active_recipient_emails: emails.into_iter().map(RankedEntry::from).collect(),
            most_active_recipient_domains: domains.into_iter().map(RankedEntry::from).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Period;
    use duckdb::Connection;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Barrier;

    #[derive(Default)]
    struct FakeAnalytics {
        emails: Vec<SentToRow>,
        domains: Vec<SentToRow>,
        fail_domains: bool,
        calls: AtomicUsize,
        scopes: Mutex<Vec<RecipientScope>>,
        barrier: Option<Arc<Barrier>>,
    }

    impl FakeAnalytics {
        async fn rendezvous(&self, scope: &RecipientScope) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.scopes.lock().push(scope.clone());
            if let Some(barrier) = &self.barrier {
                barrier.wait().await;
            }
        }
    }

    #[async_trait::async_trait]
    impl RecipientAnalytics for FakeAnalytics {
        async fn most_sent_to(
            &self,
            scope: &RecipientScope,
        ) -> Result<Vec<SentToRow>, SourceError> {
            self.rendezvous(scope).await;
            Ok(self.emails.clone())
        }

        async fn domains_most_sent_to(
            &self,
            scope: &RecipientScope,
        ) -> Result<Vec<SentToRow>, SourceError> {
            self.rendezvous(scope).await;
            if self.fail_domains {
                return Err(SourceError::Task("domains query rejected".to_string()));
            }
            Ok(self.domains.clone())
        }
    }

    fn row(to: &str, count: u64) -> SentToRow {
        SentToRow {
            to: to.to_string(),
            count,
        }
    }

    fn entry(name: &str, value: u64) -> RankedEntry {
        RankedEntry {
            name: name.to_string(),
            value,
        }
    }

    fn session(email: &str) -> Session {
        Session::new(email, None)
    }

    const WEEK: RecipientStatsQuery = RecipientStatsQuery {
        period: Period::Week,
        from_date: None,
        to_date: None,
    };

    #[tokio::test]
    async fn test_maps_rows_preserving_store_order() {
        // Store order is authoritative even when it is not sorted by count
        let source = AnalyticsSource::new(
            FakeAnalytics {
                emails: vec![row("x@y.com", 5), row("z@y.com", 2), row("w@y.com", 9)],
                domains: vec![row("y.com", 7)],
                ..FakeAnalytics::default()
            },
            50,
        );

        let response = source.recipients(&session("a@b.com"), &WEEK).await.unwrap();
        assert_eq!(
            response,
            RecipientsResponse {
                most_active_recipient_emails: vec![
                    entry("x@y.com", 5),
                    entry("z@y.com", 2),
                    entry("w@y.com", 9),
                ],
                most_active_recipient_domains: vec![entry("y.com", 7)],
            }
        );
    }

    #[tokio::test]
    async fn test_scope_carries_owner_period_and_bounds() {
        let source = AnalyticsSource::new(FakeAnalytics::default(), 25);
        let query = RecipientStatsQuery {
            period: Period::Month,
            from_date: Some(1_700_000_000),
            to_date: Some(1_700_100_000),
        };

        source.recipients(&session("a@b.com"), &query).await.unwrap();

        let scopes = source.analytics.scopes.lock();
        assert_eq!(scopes.len(), 2);
        for scope in scopes.iter() {
            assert_eq!(scope.owner_email, "a@b.com");
            assert_eq!(scope.period, Period::Month);
            assert_eq!(scope.from_date, Some(1_700_000_000));
            assert_eq!(scope.to_date, Some(1_700_100_000));
            assert_eq!(scope.limit, 25);
        }
    }

    #[tokio::test]
    async fn test_domain_failure_fails_whole_fetch() {
        let source = AnalyticsSource::new(
            FakeAnalytics {
                emails: vec![row("x@y.com", 5)],
                fail_domains: true,
                ..FakeAnalytics::default()
            },
            50,
        );

        let result = source.recipients(&session("a@b.com"), &WEEK).await;
        assert!(matches!(result, Err(SourceError::Task(_))));
    }

    #[tokio::test]
    async fn test_queries_run_concurrently() {
        // Each query waits for the other; sequential execution would never finish
        let source = AnalyticsSource::new(
            FakeAnalytics {
                barrier: Some(Arc::new(Barrier::new(2))),
                ..FakeAnalytics::default()
            },
            50,
        );

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            source.recipients(&session("a@b.com"), &WEEK),
        )
        .await
        .expect("aggregate queries did not run concurrently");
        assert!(result.is_ok());
        assert_eq!(source.analytics.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_duckdb_store_end_to_end() {
        let conn = Connection::open_in_memory().unwrap();
        crate::storage::migrations::run_migrations(&conn).unwrap();
        let store = AnalyticsStore::new(Arc::new(Mutex::new(conn)));
        let sent = |to: &str| crate::storage::store::SentEmail {
            owner_email: "a@b.com".to_string(),
            recipient: to.to_string(),
            timestamp_ms: 1_700_000_000_000,
        };
        store
            .record_sent(&[sent("x@y.com"), sent("x@y.com"), sent("z@w.org")])
            .unwrap();

        let source = AnalyticsSource::new(store, 50);
        let response = source.recipients(&session("a@b.com"), &WEEK).await.unwrap();
        assert_eq!(
            response.most_active_recipient_emails,
            vec![entry("x@y.com", 2), entry("z@w.org", 1)]
        );
        assert_eq!(
            response.most_active_recipient_domains,
            vec![entry("y.com", 2), entry("w.org", 1)]
        );
    }

    #[test]
    fn test_kind() {
        let source = AnalyticsSource::new(FakeAnalytics::default(), 50);
        assert_eq!(source.kind(), SourceKind::Analytics);
    }
}
