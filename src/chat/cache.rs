//! Process-local TTL cache of model answers, keyed by normalised question.
//!
//! Only answers that did not depend on tool calls are inserted, and the
//! system prompt carries no customer data, so a cached answer is safe to
//! hand to any customer asking the same question.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Questions longer than this are too specific to be worth caching.
pub const MAX_CACHEABLE_CHARS: usize = 300;

/// Cache counters for the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that found nothing usable.
    pub misses: u64,
    /// Entries currently held, including not yet purged expired ones.
    pub entries: usize,
}

#[derive(Debug)]
struct CacheEntry {
    answer: String,
    inserted_at: Instant,
}

/// TTL cache with a bounded number of entries.
#[derive(Debug)]
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Normalise a question into a cache key: lowercase, trimmed, inner
/// whitespace collapsed and trailing punctuation removed. Returns `None` for
/// empty or over-long questions.
pub fn normalize_key(text: &str) -> Option<String> {
    if text.chars().count() > MAX_CACHEABLE_CHARS {
        return None;
    }
    let collapsed = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let key = collapsed
        .trim_end_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_owned();
    (!key.is_empty()).then_some(key)
}

impl ResponseCache {
    /// Create a cache whose entries live for `ttl`, holding at most
    /// `max_entries` (at least one).
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// The cached answer for `question`, if present and fresh. An expired
    /// entry is evicted on the spot.
    pub fn get(&self, question: &str) -> Option<String> {
        let found = normalize_key(question).and_then(|key| {
            let mut entries = self.entries.lock().ok()?;
            match entries.get(&key) {
                Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                    Some(entry.answer.clone())
                }
                Some(_) => {
                    entries.remove(&key);
                    None
                }
                None => None,
            }
        });

        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Store an answer. Expired entries are purged first; if the cache is
    /// still full the oldest entry makes room.
    pub fn insert(&self, question: &str, answer: &str) {
        let Some(key) = normalize_key(question) else {
            return;
        };
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };

        let ttl = self.ttl;
        entries.retain(|_, entry| entry.inserted_at.elapsed() < ttl);

        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key,
            CacheEntry {
                answer: answer.to_owned(),
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
        before.saturating_sub(entries.len())
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.lock().map(|e| e.len()).unwrap_or(0),
        }
    }
}
