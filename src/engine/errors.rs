//! Engine error taxonomy.
//!
//! These are the only errors a caller of the turn engine sees. Leaf modules
//! (cache, checkpoint, rate limiter) have their own error types; the `From`
//! impls here fold them into the caller-facing taxonomy. Cache and catalog
//! failures never appear at this surface: the engine degrades them to a
//! forced miss / empty summary list instead.

use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::ratelimit::LimiterError;

/// Errors surfaced by `run_turn` and `resume_turn`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input: empty transcript, resume without a suspended turn,
    /// decision id mismatch, blank user id.
    #[error("validation error: {reason}")]
    Validation { reason: String },

    /// The conversation key belongs to a different user.
    #[error("access denied for conversation '{conversation_id}'")]
    AccessDenied { conversation_id: String },

    /// No checkpoint exists for the conversation.
    #[error("conversation not found: '{conversation_id}'")]
    ConversationNotFound { conversation_id: String },

    /// The model rejected the request (4xx-class). The upstream message is
    /// surfaced verbatim so the caller can fix the request.
    #[error("model rejected the request: {message}")]
    ClientInvocation { message: String },

    /// The model failed for an upstream or unknown reason. The original
    /// error is logged; callers get this generic form.
    #[error("model invocation failed")]
    Invocation,

    /// Checkpoint persistence failed.
    #[error("checkpoint backend error: {reason}")]
    CheckpointBackend { reason: String },

    /// The shared rate limiter lock could not be acquired within its
    /// bounded retries, or its state store failed outright.
    #[error("rate limiter unavailable: {reason}")]
    RateLimiterUnavailable { reason: String },
}

impl EngineError {
    /// Shorthand for a validation failure.
    pub fn validation(reason: impl Into<String>) -> Self {
        EngineError::Validation {
            reason: reason.into(),
        }
    }
}

impl From<CheckpointError> for EngineError {
    fn from(e: CheckpointError) -> Self {
        match e {
            CheckpointError::AccessDenied { conversation_id } => {
                EngineError::AccessDenied { conversation_id }
            }
            CheckpointError::Validation { reason } => EngineError::Validation { reason },
            CheckpointError::Backend { reason } => EngineError::CheckpointBackend { reason },
            CheckpointError::Serialization { reason } => {
                EngineError::CheckpointBackend { reason }
            }
        }
    }
}

impl From<LimiterError> for EngineError {
    fn from(e: LimiterError) -> Self {
        EngineError::RateLimiterUnavailable {
            reason: e.to_string(),
        }
    }
}
