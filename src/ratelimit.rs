//! Cross-process rate limiting via a shared token bucket.
//!
//! Multiple independent processes throttle against the same logical
//! resource (one `"<platform>/<model>"` pair) by sharing bucket state in a
//! small SQLite database. `BEGIN IMMEDIATE` takes SQLite's write lock and
//! serves as the advisory exclusive lock; `SQLITE_BUSY` means another
//! process holds it. Lock acquisition retries a bounded number of times
//! with a fixed backoff, then gives up: non-blocking callers get `false`,
//! blocking callers get `LockUnavailable`.
//!
//! State that fails to parse, or parses to something impossible (negative
//! tokens, NaN, more than the bucket holds), is treated as corrupt and
//! reset to a full bucket rather than wedging every process that shares it.
//!
//! The API is synchronous and sleeps the calling thread in blocking mode.
//! Async callers should wrap `acquire` in `tokio::task::spawn_blocking`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Lock acquisition attempts beyond the first.
const LOCK_RETRIES: u32 = 3;

/// Fixed pause between lock attempts.
const LOCK_RETRY_BACKOFF: Duration = Duration::from_millis(50);

// ─── Configuration ───────────────────────────────────────────────────────────

/// Token bucket parameters for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Refill rate.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,
    /// Bucket capacity; also the largest burst a caller can draw.
    #[serde(default = "default_max_bucket_size")]
    pub max_bucket_size: f64,
    /// How long a blocking caller sleeps between attempts.
    #[serde(default = "default_check_every_n_seconds")]
    pub check_every_n_seconds: f64,
}

fn default_requests_per_second() -> f64 {
    1.0
}

fn default_max_bucket_size() -> f64 {
    1.0
}

fn default_check_every_n_seconds() -> f64 {
    1.0
}

impl Default for BucketConfig {
    fn default() -> Self {
        BucketConfig {
            requests_per_second: default_requests_per_second(),
            max_bucket_size: default_max_bucket_size(),
            check_every_n_seconds: default_check_every_n_seconds(),
        }
    }
}

/// Per-resource bucket configuration, keyed `"<platform>/<model>"`.
///
/// Unconfigured resources fall back to the conservative default of one
/// request per second with a bucket of one.
#[derive(Debug, Clone, Default)]
pub struct RateLimitRegistry {
    resources: HashMap<String, BucketConfig>,
}

impl RateLimitRegistry {
    pub fn new(resources: HashMap<String, BucketConfig>) -> Self {
        RateLimitRegistry { resources }
    }

    pub fn config_for(&self, resource: &str) -> BucketConfig {
        match self.resources.get(resource) {
            Some(config) => *config,
            None => {
                tracing::debug!(resource, "no rate limit configured, using default bucket");
                BucketConfig::default()
            }
        }
    }
}

// ─── State ───────────────────────────────────────────────────────────────────

/// The persisted bucket state, stored as a JSON blob per resource.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenBucketState {
    pub tokens: f64,
    /// Unix timestamp (seconds, fractional) of the last refill.
    pub last_update: f64,
    /// Bumped on every persist.
    pub version: u64,
}

impl TokenBucketState {
    fn full(config: &BucketConfig) -> Self {
        TokenBucketState {
            tokens: config.max_bucket_size,
            last_update: unix_now(),
            version: 0,
        }
    }

    /// Parse persisted state, rejecting anything impossible so corrupt rows
    /// repair themselves instead of poisoning every sharer.
    fn parse(json: &str, config: &BucketConfig) -> Option<Self> {
        let state: TokenBucketState = serde_json::from_str(json).ok()?;
        if !state.tokens.is_finite()
            || state.tokens < 0.0
            || state.tokens > config.max_bucket_size
        {
            return None;
        }
        if !state.last_update.is_finite() || state.last_update < 0.0 {
            return None;
        }
        Some(state)
    }

    /// Advance to now, adding `elapsed * rate` tokens, capped at capacity.
    fn refill(&mut self, config: &BucketConfig) {
        let now = unix_now();
        let elapsed = (now - self.last_update).max(0.0);
        self.tokens =
            (self.tokens + elapsed * config.requests_per_second).min(config.max_bucket_size);
        self.last_update = now;
    }
}

fn unix_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Rate limiter failures.
#[derive(Debug, Error)]
pub enum LimiterError {
    /// The shared lock stayed busy through every bounded retry.
    #[error("rate limiter lock unavailable for '{resource}'")]
    LockUnavailable { resource: String },

    /// One lock attempt found the state locked. Internal signal for the
    /// retry loop; `acquire` never returns it.
    #[error("rate limiter state locked")]
    Contended,

    /// The state store itself failed.
    #[error("rate limiter store error: {reason}")]
    Store { reason: String },
}

impl From<rusqlite::Error> for LimiterError {
    fn from(e: rusqlite::Error) -> Self {
        if is_busy(&e) {
            LimiterError::Contended
        } else {
            LimiterError::Store {
                reason: e.to_string(),
            }
        }
    }
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}

// ─── Limiter ─────────────────────────────────────────────────────────────────

/// Token bucket limiter shared across processes through one SQLite file.
///
/// Cheap to clone; every acquisition opens its own connection so the write
/// lock is held only for the read-modify-write window.
#[derive(Debug, Clone)]
pub struct SharedRateLimiter {
    db_path: PathBuf,
    registry: RateLimitRegistry,
    lock_retries: u32,
    lock_backoff: Duration,
}

impl SharedRateLimiter {
    pub fn new(db_path: impl Into<PathBuf>, registry: RateLimitRegistry) -> Self {
        SharedRateLimiter {
            db_path: db_path.into(),
            registry,
            lock_retries: LOCK_RETRIES,
            lock_backoff: LOCK_RETRY_BACKOFF,
        }
    }

    /// Take `tokens` from the bucket for `resource`.
    ///
    /// Non-blocking: returns `Ok(false)` when tokens are short or the lock
    /// cannot be taken, with no side effects beyond persisting the refill.
    /// Blocking: sleeps `check_every_n_seconds` between attempts until the
    /// debit succeeds; only lock exhaustion or a store failure errors out.
    pub fn acquire(
        &self,
        resource: &str,
        tokens: f64,
        blocking: bool,
    ) -> Result<bool, LimiterError> {
        let config = self.registry.config_for(resource);
        if tokens > config.max_bucket_size {
            return Err(LimiterError::Store {
                reason: format!(
                    "requested {tokens} tokens but bucket for '{resource}' holds {}",
                    config.max_bucket_size
                ),
            });
        }

        loop {
            match self.take_with_lock(resource, tokens, &config) {
                Ok(true) => return Ok(true),
                Ok(false) => {
                    if !blocking {
                        return Ok(false);
                    }
                    tracing::debug!(
                        resource,
                        wait_secs = config.check_every_n_seconds,
                        "bucket empty, waiting for refill"
                    );
                    std::thread::sleep(Duration::from_secs_f64(config.check_every_n_seconds));
                }
                Err(LimiterError::LockUnavailable { resource }) if !blocking => {
                    tracing::debug!(resource = %resource, "lock unavailable, denying acquire");
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One locked read-modify-write round, with bounded lock retries.
    fn take_with_lock(
        &self,
        resource: &str,
        requested: f64,
        config: &BucketConfig,
    ) -> Result<bool, LimiterError> {
        let mut conn = self.open_connection()?;
        let mut attempt = 0;
        loop {
            match Self::take_once(&mut conn, resource, requested, config) {
                Ok(granted) => return Ok(granted),
                Err(LimiterError::Contended) => {
                    if attempt >= self.lock_retries {
                        tracing::warn!(
                            resource,
                            retries = self.lock_retries,
                            "bucket lock still busy after retries"
                        );
                        return Err(LimiterError::LockUnavailable {
                            resource: resource.to_string(),
                        });
                    }
                    attempt += 1;
                    std::thread::sleep(self.lock_backoff);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// A single lock attempt plus the guarded state update. The transaction
    /// commit persists the state and releases the lock together; any error
    /// rolls back, leaving the stored state untouched.
    fn take_once(
        conn: &mut Connection,
        resource: &str,
        requested: f64,
        config: &BucketConfig,
    ) -> Result<bool, LimiterError> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let stored: Option<String> = tx
            .query_row(
                "SELECT state FROM bucket_state WHERE resource = ?1",
                params![resource],
                |row| row.get(0),
            )
            .optional()?;

        let mut state = match stored {
            Some(json) => TokenBucketState::parse(&json, config).unwrap_or_else(|| {
                tracing::warn!(resource, "corrupt bucket state, resetting to full");
                TokenBucketState::full(config)
            }),
            None => TokenBucketState::full(config),
        };

        state.refill(config);
        let granted = state.tokens >= requested;
        if granted {
            state.tokens -= requested;
        }
        state.tokens = state.tokens.clamp(0.0, config.max_bucket_size);
        state.version += 1;

        let json = serde_json::to_string(&state).map_err(|e| LimiterError::Store {
            reason: e.to_string(),
        })?;
        tx.execute(
            "INSERT OR REPLACE INTO bucket_state (resource, state, updated_at)
             VALUES (?1, ?2, datetime('now'))",
            params![resource, json],
        )?;
        tx.commit()?;
        Ok(granted)
    }

    /// Open (or create) the shared state database.
    fn open_connection(&self) -> Result<Connection, LimiterError> {
        if let Some(parent) = self.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| LimiterError::Store {
                    reason: format!("cannot create state directory: {e}"),
                })?;
            }
        }
        let conn = Connection::open(&self.db_path)?;
        // Manual retry loop owns the busy policy.
        conn.busy_timeout(Duration::ZERO)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS bucket_state (
                resource TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )?;
        Ok(conn)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
