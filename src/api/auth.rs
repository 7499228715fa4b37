use crate::config::AccountConfig;
use axum::http::{header, HeaderMap};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Cookie carrying the session token for browser clients.
pub const SESSION_COOKIE: &str = "mailpulse_session";

/// The authenticated user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub email: String,
}

/// An authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user: SessionUser,
    /// OAuth access token for the user's mailbox provider, if linked.
    pub mailbox_token: Option<String>,
}

impl Session {
    pub fn new(email: impl Into<String>, mailbox_token: Option<String>) -> Self {
        Self {
            user: SessionUser {
                email: email.into(),
            },
            mailbox_token,
        }
    }
}

/// Resolves the session for an incoming request, if any.
#[async_trait::async_trait]
pub trait SessionResolver: Send + Sync {
    async fn resolve(&self, headers: &HeaderMap) -> Option<Session>;
}

/// Static token table loaded from configuration.
///
/// Only SHA-256 digests of the tokens are kept in memory.
pub struct SessionStore {
    sessions: HashMap<String, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    pub fn from_accounts(accounts: &[AccountConfig]) -> Self {
        let mut store = Self::new();
        for account in accounts {
            if account.token.is_empty() || account.email.is_empty() {
                tracing::warn!("Skipping account with empty token or email");
                continue;
            }
            store.insert(
                &account.token,
                Session::new(account.email.clone(), account.mailbox_token.clone()),
            );
        }
        store
    }

    pub fn insert(&mut self, token: &str, session: Session) {
        self.sessions.insert(hash_token(token), session);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Look up a session by its plaintext token.
    pub fn get(&self, token: &str) -> Option<Session> {
        self.sessions.get(&hash_token(token)).cloned()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SessionResolver for SessionStore {
    async fn resolve(&self, headers: &HeaderMap) -> Option<Session> {
        extract_token(headers).and_then(|token| self.get(&token))
    }
}

/// Hex-encoded SHA-256 of a session token.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Read the session token from `Authorization: Bearer` or the session cookie.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}
