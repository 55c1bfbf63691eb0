//! Response cache with exact and similarity lookup.
//!
//! Lookup runs in two passes. The exact pass hashes the whole transcript
//! into a user-scoped key and is O(1). The similarity pass compares the
//! latest human message against the stored probe text of every live entry
//! belonging to the same user and returns the best match at or above the
//! threshold. Expiry is lazy: expired entries are deleted when a lookup
//! trips over them, there is no background sweeper.
//!
//! There is no cross-entry concurrency control. Concurrent writers to the
//! same key race with last-write-wins, and eviction is not exclusive with
//! concurrent inserts. Both are acceptable here: a lost cache write costs
//! one extra model call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::engine::types::{latest_human_content, Message, ToolCall};

use super::similarity::similarity;

// ─── Keys ────────────────────────────────────────────────────────────────────

/// Cache key for a transcript: `user:<user_id>:<hex sha-256>`.
///
/// The digest covers the user id and the pipe-joined content of every
/// message in order, so the key is a pure function of
/// `(user_id, ordered message contents)` and two users can never collide,
/// even on identical transcripts.
pub fn cache_key(user_id: &str, messages: &[Message]) -> String {
    let joined = messages
        .iter()
        .map(Message::content)
        .collect::<Vec<_>>()
        .join("|");
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(b":");
    hasher.update(joined.as_bytes());
    let digest = hasher.finalize();
    format!("user:{user_id}:{digest:x}")
}

fn user_prefix(user_id: &str) -> String {
    format!("user:{user_id}:")
}

// ─── Entries ─────────────────────────────────────────────────────────────────

/// One cached response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub response: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Latest human message at store time; the similarity probe target.
    pub original_message: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hit_count: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// How a lookup matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Similar,
}

/// A successful lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub response: String,
    pub tool_calls: Vec<ToolCall>,
    pub kind: MatchKind,
}

/// Errors from the storage backend. The engine treats any of these as a
/// forced miss.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {reason}")]
    Backend { reason: String },
}

// ─── Backend ─────────────────────────────────────────────────────────────────

/// Storage abstraction for cache entries.
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;
    fn put(&self, entry: CacheEntry) -> Result<(), CacheError>;
    fn remove(&self, key: &str) -> Result<(), CacheError>;
    /// Every entry whose key carries the user's prefix.
    fn user_entries(&self, user_id: &str) -> Result<Vec<CacheEntry>, CacheError>;
    fn len(&self) -> Result<usize, CacheError>;
    /// Key of the entry with the earliest `created_at` (ties broken by key).
    fn oldest_key(&self) -> Result<Option<String>, CacheError>;
}

impl<B: CacheBackend + ?Sized> CacheBackend for Arc<B> {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        (**self).get(key)
    }
    fn put(&self, entry: CacheEntry) -> Result<(), CacheError> {
        (**self).put(entry)
    }
    fn remove(&self, key: &str) -> Result<(), CacheError> {
        (**self).remove(key)
    }
    fn user_entries(&self, user_id: &str) -> Result<Vec<CacheEntry>, CacheError> {
        (**self).user_entries(user_id)
    }
    fn len(&self) -> Result<usize, CacheError> {
        (**self).len()
    }
    fn oldest_key(&self) -> Result<Option<String>, CacheError> {
        (**self).oldest_key()
    }
}

/// In-process backend over a plain map.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CacheBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.entries().get(key).cloned())
    }

    fn put(&self, entry: CacheEntry) -> Result<(), CacheError> {
        self.entries().insert(entry.key.clone(), entry);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries().remove(key);
        Ok(())
    }

    fn user_entries(&self, user_id: &str) -> Result<Vec<CacheEntry>, CacheError> {
        let prefix = user_prefix(user_id);
        Ok(self
            .entries()
            .values()
            .filter(|e| e.key.starts_with(&prefix))
            .cloned()
            .collect())
    }

    fn len(&self) -> Result<usize, CacheError> {
        Ok(self.entries().len())
    }

    fn oldest_key(&self) -> Result<Option<String>, CacheError> {
        Ok(self
            .entries()
            .values()
            .min_by(|a, b| (a.created_at, &a.key).cmp(&(b.created_at, &b.key)))
            .map(|e| e.key.clone()))
    }
}

// ─── Cache ───────────────────────────────────────────────────────────────────

/// Tuning for a `ResponseCache`.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Entry lifetime in seconds.
    pub ttl_seconds: u64,
    /// Minimum similarity score for the fallback pass.
    pub similarity_threshold: f64,
    /// Whether the similarity pass runs at all.
    pub similarity_enabled: bool,
    /// Entry budget across all users.
    pub max_entries: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        CacheOptions {
            ttl_seconds: 30 * 60,
            similarity_threshold: 0.8,
            similarity_enabled: true,
            max_entries: 256,
        }
    }
}

/// The response cache.
pub struct ResponseCache {
    backend: Box<dyn CacheBackend>,
    options: CacheOptions,
}

impl ResponseCache {
    pub fn new(backend: Box<dyn CacheBackend>, options: CacheOptions) -> Self {
        ResponseCache { backend, options }
    }

    /// An in-memory cache with default options.
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBackend::new()), CacheOptions::default())
    }

    /// Look up a response for this transcript: exact key first, similarity
    /// on the latest human message second. Hits bump `hit_count`.
    pub fn lookup(
        &self,
        user_id: &str,
        messages: &[Message],
    ) -> Result<Option<CacheHit>, CacheError> {
        let now = Utc::now();
        let key = cache_key(user_id, messages);

        if let Some(entry) = self.backend.get(&key)? {
            if entry.is_expired(now) {
                self.backend.remove(&key)?;
            } else {
                self.touch(&entry)?;
                tracing::debug!(key = %key, hits = entry.hit_count + 1, "exact cache hit");
                return Ok(Some(CacheHit {
                    response: entry.response,
                    tool_calls: entry.tool_calls,
                    kind: MatchKind::Exact,
                }));
            }
        }

        if !self.options.similarity_enabled {
            return Ok(None);
        }
        let Some(probe) = latest_human_content(messages) else {
            return Ok(None);
        };

        let prefix = user_prefix(user_id);
        let mut best: Option<(f64, CacheEntry)> = None;
        for entry in self.backend.user_entries(user_id)? {
            // The prefix alone is not ownership: `user:alice:` also prefixes
            // keys written by a user id `alice:x`. An owned key ends in the
            // bare hex digest, which never contains `:`.
            let owned = entry
                .key
                .strip_prefix(&prefix)
                .map_or(false, |digest| !digest.contains(':'));
            if !owned {
                continue;
            }
            if entry.is_expired(now) {
                self.backend.remove(&entry.key)?;
                continue;
            }
            let score = similarity(probe, &entry.original_message);
            if score >= self.options.similarity_threshold
                && best.as_ref().map_or(true, |(top, _)| score > *top)
            {
                best = Some((score, entry));
            }
        }

        if let Some((score, entry)) = best {
            self.touch(&entry)?;
            tracing::debug!(key = %entry.key, score, "similarity cache hit");
            return Ok(Some(CacheHit {
                response: entry.response,
                tool_calls: entry.tool_calls,
                kind: MatchKind::Similar,
            }));
        }
        Ok(None)
    }

    /// Store a response for this transcript. Empty responses are not worth
    /// caching and are skipped. At capacity, the single oldest entry (by
    /// `created_at`) is evicted first.
    pub fn store(
        &self,
        user_id: &str,
        messages: &[Message],
        response: &str,
        tool_calls: &[ToolCall],
    ) -> Result<(), CacheError> {
        if response.trim().is_empty() {
            tracing::debug!("empty response, not caching");
            return Ok(());
        }

        let key = cache_key(user_id, messages);
        let replacing = self.backend.get(&key)?.is_some();
        if !replacing && self.backend.len()? >= self.options.max_entries {
            if let Some(oldest) = self.backend.oldest_key()? {
                tracing::debug!(evicted = %oldest, "cache at capacity, evicting oldest");
                self.backend.remove(&oldest)?;
            }
        }

        let now = Utc::now();
        self.backend.put(CacheEntry {
            key,
            response: response.to_string(),
            tool_calls: tool_calls.to_vec(),
            original_message: latest_human_content(messages).unwrap_or("").to_string(),
            created_at: now,
            expires_at: now + Duration::seconds(self.options.ttl_seconds as i64),
            hit_count: 0,
        })
    }

    /// Number of live-or-expired entries currently held.
    pub fn len(&self) -> Result<usize, CacheError> {
        self.backend.len()
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.backend.len()? == 0)
    }

    fn touch(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let mut bumped = entry.clone();
        bumped.hit_count += 1;
        self.backend.put(bumped)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
