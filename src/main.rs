use duckdb::Connection;
use mailpulse::api::auth::SessionStore;
use mailpulse::config::Config;
use mailpulse::query::cache::ResponseCache;
use mailpulse::server::{self, AppState};
use mailpulse::storage::migrations;
use mailpulse::storage::store::AnalyticsStore;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[tokio::main]
async fn main() {
    init_tracing();

    // Load configuration
    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref().map(std::path::Path::new));

    tracing::info!(
        host = %config.host,
        port = config.port,
        source = config.recipient_source.as_str(),
        "Starting mailpulse"
    );

    // Initialize DuckDB
    let conn = match &config.database_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).expect("Failed to create database directory");
            }
            Connection::open(path).expect("Failed to open DuckDB")
        }
        None => Connection::open_in_memory().expect("Failed to open DuckDB"),
    };
    migrations::run_migrations(&conn).expect("Failed to run migrations");
    let store = AnalyticsStore::new(Arc::new(Mutex::new(conn)));

    let sessions = SessionStore::from_accounts(&config.accounts);
    if sessions.is_empty() {
        tracing::warn!("No accounts configured; every request will be unauthenticated");
    }

    let source = server::build_source(&config, store.clone())
        .unwrap_or_else(|e| panic!("Failed to build recipient source: {e}"));

    let response_cache = ResponseCache::new(config.cache_ttl_secs);

    // Periodic sweep of expired cache entries
    if response_cache.is_enabled() {
        let sweep_cache = response_cache.clone();
        let sweep_every = Duration::from_secs(config.cache_ttl_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_every);
            loop {
                interval.tick().await;
                sweep_cache.cleanup_expired();
            }
        });
    }

    let state = Arc::new(AppState {
        sessions: Arc::new(sessions),
        source,
        store,
        response_cache,
        dashboard_origin: config.dashboard_origin.clone(),
    });

    let app = server::build_router(state);
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {addr}: {e}"));

    tracing::info!(addr = %addr, "Listening");

    let shutdown_started = Arc::new(Notify::new());
    let notify = Arc::clone(&shutdown_started);
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                notify.notify_one();
            })
            .await
    });

    let grace = Duration::from_secs(config.shutdown_timeout_secs);
    tokio::select! {
        result = &mut server => match result {
            Ok(Ok(())) => tracing::info!("Server stopped"),
            Ok(Err(e)) => tracing::error!(error = %e, "Server error"),
            Err(e) => tracing::error!(error = %e, "Server task failed"),
        },
        () = async {
            shutdown_started.notified().await;
            tokio::time::sleep(grace).await;
        } => {
            tracing::warn!(
                timeout_secs = config.shutdown_timeout_secs,
                "Graceful shutdown timed out, dropping open connections"
            );
            server.abort();
        }
    }
}

/// Plain text logs by default; `MAILPULSE_LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "mailpulse=info,tower_http=info".into());

    let json = std::env::var("MAILPULSE_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining connections");
}
