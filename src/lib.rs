//! Colloquy — conversational turn orchestration with tool-call review.
//!
//! Modules:
//! - `engine`: Turn pipeline, suspend/resume, compaction, review routing
//! - `model`: Model client trait, replies, and API selection types
//! - `gateway`: Tool gateway trait, safety tiers, and the API catalog
//! - `cache`: Similarity-aware response cache over pluggable backends
//! - `checkpoint`: Versioned conversation snapshots with user-scoped keys
//! - `ratelimit`: Cross-process token bucket over a shared SQLite state file
//! - `audit`: Review decision audit records and sinks
//! - `config`: YAML engine configuration with env var interpolation

pub mod audit;
pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod gateway;
pub mod model;
pub mod ratelimit;

// Re-exports for convenience
pub use audit::{AuditSink, TracingAuditSink};
pub use cache::ResponseCache;
pub use checkpoint::CheckpointStore;
pub use config::EngineConfig;
pub use engine::{
    ConversationState, ConversationStatus, EngineError, Identity, Message, ReviewAction,
    ToolCall, ToolCallDecision, TurnEngine, TurnOptions, TurnOutcome, TurnRequest,
};
pub use gateway::{ApiCatalog, ApiSpec, ApiSummary, ToolGateway, ToolSafety};
pub use model::{ModelClient, ModelError, ModelReply, SelectedApis};
pub use ratelimit::SharedRateLimiter;

/// Return the platform-standard data directory for Colloquy.
///
/// - macOS: `~/Library/Application Support/colloquy/`
/// - Windows: `{FOLDERID_RoamingAppData}\colloquy\`
/// - Linux: `$XDG_DATA_HOME/colloquy/` (fallback `~/.local/share/colloquy/`)
///
/// Falls back to `~/.colloquy/` only if none of the above can be resolved.
/// Embedders that keep the checkpoint, cache, and rate limiter databases in
/// one place can root them here; the directory is created on first call.
pub fn data_dir() -> std::path::PathBuf {
    let dir = if let Some(base) = dirs::data_dir() {
        base.join("colloquy")
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join(".colloquy")
    };
    if let Err(e) = std::fs::create_dir_all(&dir) {
        tracing::warn!(path = %dir.display(), error = %e, "failed to create data directory");
    }
    dir
}
