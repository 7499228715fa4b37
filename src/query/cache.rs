use crate::source::{RecipientStatsQuery, RecipientsResponse};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Identifies one owner's response for one validated query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub owner_email: String,
    pub query: RecipientStatsQuery,
}

impl CacheKey {
    pub fn new(owner_email: &str, query: RecipientStatsQuery) -> Self {
        Self {
            owner_email: owner_email.to_string(),
            query,
        }
    }
}

/// Thread-safe recipient response cache with TTL-based expiration.
///
/// Each owner carries a generation that [`ResponseCache::invalidate_owner`]
/// bumps. A response computed under an older generation is never stored, so
/// a read that overlaps an ingest cannot cache pre-ingest results.
#[derive(Clone)]
pub struct ResponseCache {
    state: Arc<Mutex<CacheState>>,
    ttl: Duration,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    generations: HashMap<String, u64>,
}

struct CacheEntry {
    response: RecipientsResponse,
    inserted_at: Instant,
}

impl ResponseCache {
    /// Create a new cache with the given TTL in seconds.
    /// A TTL of 0 disables caching (all lookups miss).
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::default())),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    pub const fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Returns `None` if missing or expired.
    pub fn get(&self, key: &CacheKey) -> Option<RecipientsResponse> {
        if !self.is_enabled() {
            return None;
        }
        self.state
            .lock()
            .entries
            .get(key)
            .filter(|entry| entry.inserted_at.elapsed() <= self.ttl)
            .map(|entry| entry.response.clone())
    }

    /// Current generation for `owner_email`. Read it before computing a
    /// response and hand it back to [`ResponseCache::insert`].
    pub fn generation(&self, owner_email: &str) -> u64 {
        self.state
            .lock()
            .generations
            .get(owner_email)
            .copied()
            .unwrap_or(0)
    }

    /// Store `response` unless the owner was invalidated since `generation`
    /// was read. Returns whether the entry was stored.
    pub fn insert(&self, key: CacheKey, response: RecipientsResponse, generation: u64) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let mut state = self.state.lock();
        let current = state
            .generations
            .get(&key.owner_email)
            .copied()
            .unwrap_or(0);
        if current != generation {
            return false;
        }
        state.entries.insert(
            key,
            CacheEntry {
                response,
                inserted_at: Instant::now(),
            },
        );
        true
    }

    /// Drop every cached response for `owner_email`. Returns how many were removed.
    pub fn invalidate_owner(&self, owner_email: &str) -> usize {
        let mut state = self.state.lock();
        let generation = state
            .generations
            .entry(owner_email.to_string())
            .or_default();
        *generation = generation.wrapping_add(1);
        let before = state.entries.len();
        state.entries.retain(|key, _| key.owner_email != owner_email);
        before - state.entries.len()
    }

    /// Remove expired entries from the cache.
    pub fn cleanup_expired(&self) {
        let ttl = self.ttl;
        self.state
            .lock()
            .entries
            .retain(|_, entry| entry.inserted_at.elapsed() <= ttl);
    }

    /// Returns the number of entries currently in the cache.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns `true` if the cache contains no entries.
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }
}
