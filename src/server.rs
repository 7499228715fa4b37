use crate::api::auth::SessionResolver;
use crate::api::{ingest, recipients};
use crate::config::Config;
use crate::mailbox::gmail::GmailClient;
use crate::mailbox::MailboxError;
use crate::query::cache::ResponseCache;
use crate::source::analytics::AnalyticsSource;
use crate::source::mailbox::{MailboxSource, RetryPolicy};
use crate::source::{RecipientSource, SourceKind};
use crate::storage::store::AnalyticsStore;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderValue, Method};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Per-request deadline enforced by the router.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state.
pub struct AppState {
    pub sessions: Arc<dyn SessionResolver>,
    pub source: Arc<dyn RecipientSource>,
    pub store: AnalyticsStore,
    pub response_cache: ResponseCache,
    pub dashboard_origin: Option<String>,
}

/// Construct the recipient source selected in the configuration.
pub fn build_source(
    config: &Config,
    store: AnalyticsStore,
) -> Result<Arc<dyn RecipientSource>, MailboxError> {
    let source: Arc<dyn RecipientSource> = match config.recipient_source {
        SourceKind::Analytics => Arc::new(AnalyticsSource::new(store, config.top_recipients_limit)),
        SourceKind::Mailbox => {
            let client = GmailClient::new(config.mailbox_api_base.clone(), REQUEST_TIMEOUT)?;
            let retry = RetryPolicy {
                max_retries: config.mailbox_max_retries,
                ..RetryPolicy::default()
            };
            Arc::new(MailboxSource::new(
                client,
                config.mailbox_fetch_concurrency,
                retry,
            ))
        }
    };
    Ok(source)
}

/// Build the Axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = build_cors(state.dashboard_origin.as_deref());

    // 1 MiB covers a full batch of maximum-length recipients
    let ingest_routes = Router::new()
        .route("/user/stats/sent", post(ingest::record_sent))
        .layer(DefaultBodyLimit::max(1_048_576));

    let api_routes = Router::new()
        .route("/user/stats/recipients", get(recipients::get_recipients))
        .merge(ingest_routes)
        .layer(cors);

    Router::new()
        .route("/health", get(health_check))
        .route("/health/detailed", get(detailed_health_check))
        .nest("/api", api_routes)
        .layer(axum::middleware::map_response(add_security_headers))
        .layer(TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            REQUEST_TIMEOUT,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Inject security headers on every HTTP response.
async fn add_security_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    // Per-user stats must never land in a shared cache
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

/// Build CORS layer for API routes based on configured origin.
fn build_cors(dashboard_origin: Option<&str>) -> CorsLayer {
    dashboard_origin.map_or_else(
        || {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        },
        |origin| match origin.parse::<HeaderValue>() {
            Ok(allowed) => CorsLayer::new()
                .allow_origin(allowed)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::COOKIE])
                .allow_credentials(true),
            Err(_) => {
                tracing::warn!(origin, "Invalid dashboard origin, cross-origin requests disabled");
                CorsLayer::new()
            }
        },
    )
}

/// GET /health — Simple health check endpoint.
async fn health_check() -> &'static str {
    "ok"
}

/// GET /health/detailed — Health check with runtime info.
async fn detailed_health_check(
    State(state): State<Arc<AppState>>,
) -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "source": state.source.kind().as_str(),
        "cache_enabled": state.response_cache.is_enabled(),
        "cache_entries": state.response_cache.len(),
    }))
}
