//! Engine configuration loading and validation.
//!
//! Reads a YAML document (string or file) and resolves environment
//! variables. Config is the single source of truth for model profiles,
//! cache behavior, compaction thresholds and rate limits.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::cache::CacheOptions;
use crate::ratelimit::{BucketConfig, RateLimitRegistry};

// ─── Public Types ────────────────────────────────────────────────────────────

/// Platform assumed for models with no configured profile.
const DEFAULT_PLATFORM: &str = "openai";

/// Context window assumed for models with no configured profile.
const DEFAULT_CONTEXT_WINDOW: u32 = 8_192;

/// A single model's runtime profile.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelProfile {
    /// Serving platform, e.g. `openai` or `azure`. Combined with the model
    /// name it forms the rate-limit resource (`platform/model`).
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default = "default_context_window")]
    pub context_window: u32,
}

fn default_platform() -> String {
    DEFAULT_PLATFORM.to_string()
}
fn default_context_window() -> u32 {
    DEFAULT_CONTEXT_WINDOW
}

impl Default for ModelProfile {
    fn default() -> Self {
        ModelProfile {
            platform: default_platform(),
            context_window: default_context_window(),
        }
    }
}

/// Response cache behavior.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub similarity_enabled: bool,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_similarity_threshold() -> f64 {
    0.8
}
fn default_ttl_seconds() -> u64 {
    1_800
}
fn default_max_entries() -> usize {
    256
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            enabled: true,
            similarity_enabled: true,
            similarity_threshold: default_similarity_threshold(),
            ttl_seconds: default_ttl_seconds(),
            max_entries: default_max_entries(),
        }
    }
}

/// History compression behavior.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CompactionSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Fraction of the model's context window that triggers compression.
    #[serde(default = "default_threshold_percent")]
    pub threshold_percent: f64,
    /// Token budget for the generated summary.
    #[serde(default = "default_max_summary_tokens")]
    pub max_summary_tokens: u32,
}

fn default_threshold_percent() -> f64 {
    0.8
}
fn default_max_summary_tokens() -> u32 {
    512
}

impl Default for CompactionSettings {
    fn default() -> Self {
        CompactionSettings {
            enabled: true,
            threshold_percent: default_threshold_percent(),
            max_summary_tokens: default_max_summary_tokens(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Model used when a request names none.
    #[serde(default = "default_model_name")]
    pub default_model: String,
    #[serde(default)]
    pub models: HashMap<String, ModelProfile>,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub compaction: CompactionSettings,
    /// When `false`, model tool calls end the turn instead of executing.
    #[serde(default = "default_true")]
    pub tool_calls_enabled: bool,
    /// Upper bound on tool executions within one turn.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    /// Token bucket parameters per resource (`platform/model`).
    #[serde(default)]
    pub rate_limits: HashMap<String, BucketConfig>,
}

fn default_model_name() -> String {
    "gpt-4o".to_string()
}
fn default_max_tool_rounds() -> u32 {
    8
}
fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            default_model: default_model_name(),
            models: HashMap::new(),
            cache: CacheSettings::default(),
            compaction: CompactionSettings::default(),
            tool_calls_enabled: true,
            max_tool_rounds: default_max_tool_rounds(),
            rate_limits: HashMap::new(),
        }
    }
}

/// Configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {reason}")]
    Read { reason: String },

    #[error("failed to parse config: {reason}")]
    Parse { reason: String },
}

// ─── Loading ─────────────────────────────────────────────────────────────────

impl EngineConfig {
    /// Parse a YAML document, interpolating `${VAR}` and `${VAR:-default}`
    /// expressions from the environment first.
    pub fn from_yaml_str(raw: &str) -> Result<EngineConfig, ConfigError> {
        let interpolated = interpolate_env_vars(raw);
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })
    }

    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<EngineConfig, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            reason: format!("{}: {e}", path.display()),
        })?;
        EngineConfig::from_yaml_str(&raw)
    }

    /// The model a request should run against.
    pub fn resolve_model<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        requested.unwrap_or(&self.default_model)
    }

    /// Runtime profile for a model.
    ///
    /// Unknown models fall back to the default model's profile, then to a
    /// conservative built-in one; both fallbacks are logged.
    pub fn profile_for(&self, model: &str) -> ModelProfile {
        if let Some(profile) = self.models.get(model) {
            return profile.clone();
        }
        if let Some(profile) = self.models.get(&self.default_model) {
            tracing::warn!(
                model = %model,
                default_model = %self.default_model,
                "no profile for model, using default model's profile"
            );
            return profile.clone();
        }
        tracing::warn!(model = %model, "no profile for model, using built-in profile");
        ModelProfile::default()
    }

    /// Rate-limit resource name for a model, `platform/model`.
    pub fn model_resource(&self, model: &str) -> String {
        format!("{}/{model}", self.profile_for(model).platform)
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            ttl_seconds: self.cache.ttl_seconds,
            similarity_threshold: self.cache.similarity_threshold,
            similarity_enabled: self.cache.similarity_enabled,
            max_entries: self.cache.max_entries,
        }
    }

    pub fn rate_limit_registry(&self) -> RateLimitRegistry {
        RateLimitRegistry::new(self.rate_limits.clone())
    }
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let expr = &rest[start + 2..];
        match expr.find('}') {
            Some(end) => {
                out.push_str(&resolve_var_expr(&expr[..end]));
                rest = &expr[end + 1..];
            }
            None => {
                // unterminated expression, keep verbatim
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => std::env::var(name).unwrap_or_else(|_| expand_tilde(default)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
