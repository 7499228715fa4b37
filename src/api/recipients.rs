use crate::api::auth::Session;
use crate::api::errors::ApiError;
use crate::query::cache::{CacheKey, ResponseCache};
use crate::server::AppState;
use crate::source::{Period, RecipientSource, RecipientStatsQuery};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::Arc;

/// Body returned, with status 200, when the request carries no session.
pub const NOT_AUTHENTICATED: &str = "Not authenticated";

/// Raw query-string parameters, exactly as sent.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RecipientParams {
    pub period: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
}

impl RecipientParams {
    /// Collect the known keys from decoded query pairs.
    ///
    /// A repeated key keeps its first value. Unknown keys are ignored.
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut params = Self::default();
        for (key, value) in pairs {
            let slot = match key.as_str() {
                "period" => &mut params.period,
                "fromDate" => &mut params.from_date,
                "toDate" => &mut params.to_date,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value);
            }
        }
        params
    }

    /// Period as sent, or `week` when absent or empty.
    fn period_or_default(&self) -> &str {
        self.period
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(Period::Week.as_str())
    }
}

/// Parse raw inputs into a [`RecipientStatsQuery`].
///
/// Dates that are absent or blank become `None`; anything else must be a
/// base-10 integer. No default is applied to `period` here.
pub fn validate_query(
    period: Option<&str>,
    from_date: Option<&str>,
    to_date: Option<&str>,
) -> Result<RecipientStatsQuery, ApiError> {
    let period = period
        .ok_or_else(|| ApiError::BadRequest("period is required".to_string()))?
        .parse::<Period>()
        .map_err(ApiError::BadRequest)?;

    Ok(RecipientStatsQuery {
        period,
        from_date: parse_date("fromDate", from_date)?,
        to_date: parse_date("toDate", to_date)?,
    })
}

fn parse_date(field: &str, raw: Option<&str>) -> Result<Option<i64>, ApiError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse::<i64>().map(Some).map_err(|_| {
            ApiError::BadRequest(format!("{field} must be an integer timestamp, got '{value}'"))
        }),
    }
}

/// Core of the recipients endpoint, independent of request extraction.
///
/// Without a session the response is a 200 carrying
/// `{"error":"Not authenticated"}` and `source` is never called.
pub async fn recipients_response(
    session: Option<&Session>,
    params: &RecipientParams,
    source: &dyn RecipientSource,
    cache: &ResponseCache,
) -> Result<Response, ApiError> {
    let Some(session) = session else {
        return Ok(Json(serde_json::json!({ "error": NOT_AUTHENTICATED })).into_response());
    };

    let query = validate_query(
        Some(params.period_or_default()),
        params.from_date.as_deref(),
        params.to_date.as_deref(),
    )?;

    let key = CacheKey::new(&session.user.email, query);
    if let Some(cached) = cache.get(&key) {
        return Ok(Json(cached).into_response());
    }
    let generation = cache.generation(&session.user.email);

    let response = source.recipients(session, &query).await?;
    tracing::debug!(
        owner = %session.user.email,
        period = %query.period,
        source = source.kind().as_str(),
        emails = response.most_active_recipient_emails.len(),
        domains = response.most_active_recipient_domains.len(),
        "Computed recipient stats"
    );

    cache.insert(key, response.clone(), generation);
    Ok(Json(response).into_response())
}

/// GET /api/user/stats/recipients — Most-contacted recipients and domains.
///
/// The query string is taken as plain pairs so extraction cannot reject a
/// request before the session check runs.
pub async fn get_recipients(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    let session = state.sessions.resolve(&headers).await;
    let params = RecipientParams::from_pairs(pairs);
    recipients_response(
        session.as_ref(),
        &params,
        state.source.as_ref(),
        &state.response_cache,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{RankedEntry, RecipientsResponse, SourceError, SourceKind};
    use http_body_util::BodyExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingSource {
        const fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait::async_trait]
    impl RecipientSource for CountingSource {
        fn kind(&self) -> SourceKind {
            SourceKind::Analytics
        }

        async fn recipients(
            &self,
            session: &Session,
            query: &RecipientStatsQuery,
        ) -> Result<RecipientsResponse, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SourceError::Task("store down".to_string()));
            }
            Ok(RecipientsResponse {
                most_active_recipient_emails: vec![RankedEntry {
                    name: format!("{}:{}", session.user.email, query.period),
                    value: 1,
                }],
                most_active_recipient_domains: Vec::new(),
            })
        }
    }

    fn params(period: Option<&str>, from: Option<&str>, to: Option<&str>) -> RecipientParams {
        RecipientParams {
            period: period.map(str::to_string),
            from_date: from.map(str::to_string),
            to_date: to.map(str::to_string),
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[test]
    fn test_validate_all_periods() {
        for period in ["day", "week", "month", "year"] {
            let query = validate_query(Some(period), None, None).unwrap();
            assert_eq!(query.period.as_str(), period);
            assert_eq!(query.from_date, None);
            assert_eq!(query.to_date, None);
        }
    }

    #[test]
    fn test_validate_bogus_period() {
        let err = validate_query(Some("bogus"), None, None).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn test_validate_missing_period() {
        assert!(validate_query(None, None, None).is_err());
    }

    #[test]
    fn test_validate_coerces_dates() {
        let query = validate_query(Some("week"), Some("1700000000"), Some("1700100000")).unwrap();
        assert_eq!(query.from_date, Some(1_700_000_000));
        assert_eq!(query.to_date, Some(1_700_100_000));
    }

    #[test]
    fn test_validate_blank_dates_are_none() {
        let query = validate_query(Some("day"), Some(""), Some("  ")).unwrap();
        assert_eq!(query.from_date, None);
        assert_eq!(query.to_date, None);
    }

    #[test]
    fn test_validate_rejects_non_numeric_date() {
        let err = validate_query(Some("week"), Some("yesterday"), None).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(ref msg) if msg.contains("fromDate")));
        assert!(validate_query(Some("week"), None, Some("12abc")).is_err());
    }

    #[test]
    fn test_period_defaults_to_week() {
        assert_eq!(params(None, None, None).period_or_default(), "week");
        assert_eq!(params(Some(""), None, None).period_or_default(), "week");
        assert_eq!(params(Some("year"), None, None).period_or_default(), "year");
    }

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_from_pairs_first_value_wins() {
        let parsed = RecipientParams::from_pairs(pairs(&[
            ("period", "week"),
            ("fromDate", "1"),
            ("period", "day"),
            ("fromDate", "2"),
            ("toDate", "9"),
        ]));
        assert_eq!(parsed, params(Some("week"), Some("1"), Some("9")));
    }

    #[test]
    fn test_from_pairs_ignores_unknown_keys() {
        let parsed = RecipientParams::from_pairs(pairs(&[("utm_source", "x"), ("toDate", "")]));
        assert_eq!(parsed, params(None, None, Some("")));
    }

    #[tokio::test]
    async fn test_unauthenticated_short_circuits() {
        let source = CountingSource::new(false);
        let cache = ResponseCache::new(0);

        let response = recipients_response(None, &params(None, None, None), &source, &cache)
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], br#"{"error":"Not authenticated"}"#);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unauthenticated_checked_before_validation() {
        let source = CountingSource::new(false);
        let cache = ResponseCache::new(0);
        let response = recipients_response(
            None,
            &params(Some("bogus"), Some("x"), None),
            &source,
            &cache,
        )
        .await
        .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn test_authenticated_uses_default_period() {
        let source = CountingSource::new(false);
        let cache = ResponseCache::new(0);
        let session = Session::new("a@b.com", None);

        let response =
            recipients_response(Some(&session), &params(None, None, None), &source, &cache)
                .await
                .unwrap();

        let json = body_json(response).await;
        assert_eq!(json["mostActiveRecipientEmails"][0]["name"], "a@b.com:week");
        assert_eq!(json["mostActiveRecipientDomains"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_invalid_period_rejected() {
        let source = CountingSource::new(false);
        let cache = ResponseCache::new(0);
        let session = Session::new("a@b.com", None);

        let result = recipients_response(
            Some(&session),
            &params(Some("bogus"), None, None),
            &source,
            &cache,
        )
        .await;

        assert!(matches!(result, Err(ApiError::BadRequest(_))));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_source_failure_propagates() {
        let source = CountingSource::new(true);
        let cache = ResponseCache::new(60);
        let session = Session::new("a@b.com", None);

        let result =
            recipients_response(Some(&session), &params(None, None, None), &source, &cache).await;

        assert!(matches!(result, Err(ApiError::Upstream(_))));
        assert!(cache.is_empty());
    }

    /// Source that invalidates the owner mid-computation, as an ingest would.
    struct IngestDuringFetch {
        cache: ResponseCache,
    }

    #[async_trait::async_trait]
    impl RecipientSource for IngestDuringFetch {
        fn kind(&self) -> SourceKind {
            SourceKind::Analytics
        }

        async fn recipients(
            &self,
            session: &Session,
            _query: &RecipientStatsQuery,
        ) -> Result<RecipientsResponse, SourceError> {
            self.cache.invalidate_owner(&session.user.email);
            Ok(RecipientsResponse::default())
        }
    }

    #[tokio::test]
    async fn test_response_not_cached_across_concurrent_ingest() {
        let cache = ResponseCache::new(60);
        let source = IngestDuringFetch {
            cache: cache.clone(),
        };
        let session = Session::new("a@b.com", None);

        let response =
            recipients_response(Some(&session), &params(None, None, None), &source, &cache)
                .await
                .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::OK);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_cached_response_reused() {
        let source = CountingSource::new(false);
        let cache = ResponseCache::new(60);
        let session = Session::new("a@b.com", None);
        let p = params(Some("month"), Some("1"), None);

        for _ in 0..3 {
            recipients_response(Some(&session), &p, &source, &cache)
                .await
                .unwrap();
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }
}
