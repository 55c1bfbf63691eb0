//! Model invocation contract.
//!
//! The engine never talks to a model provider directly; it calls through
//! `ModelClient`, injected at construction. Implementations own transport,
//! authentication and any retry policy. The engine adds none of its own
//! retries: it only distinguishes client-class failures (surfaced verbatim)
//! from upstream failures (logged, wrapped generic).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::types::{ApiSelection, Message, ToolCall};
use crate::gateway::{ApiSpec, ApiSummary};

/// A model response: text plus any tool calls the model requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelReply {
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl ModelReply {
    /// A plain text reply.
    pub fn text(content: impl Into<String>) -> Self {
        ModelReply {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }
}

/// The structured decision returned by the API selection call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectedApis {
    #[serde(default)]
    pub apis: Vec<ApiSelection>,
}

/// Errors from a model invocation.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The request itself was rejected (4xx-class: malformed input, context
    /// overflow, bad model parameters). The message reaches the caller
    /// verbatim.
    #[error("model rejected the request: {message}")]
    Client {
        /// Provider status code, when the implementation has one.
        status: Option<u16>,
        message: String,
    },

    /// The provider failed or something unclassifiable happened. Callers
    /// see a generic invocation failure; the detail here goes to the log.
    #[error("model invocation failed: {reason}")]
    Upstream { reason: String },
}

impl ModelError {
    /// Whether this is a client-class failure the caller can act on.
    pub fn is_client(&self) -> bool {
        matches!(self, ModelError::Client { .. })
    }
}

/// The injected model seam.
///
/// `select_apis` is the structured-output counterpart of `invoke`: one call,
/// one typed decision, no retry. It is a dedicated method rather than a
/// generic schema-driven invoke so the trait stays object-safe.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// One conversational model call over the transcript, with the loaded
    /// API specs as context.
    async fn invoke(
        &self,
        messages: &[Message],
        api_specs: &[ApiSpec],
    ) -> Result<ModelReply, ModelError>;

    /// One structured call asking the model which APIs the turn needs.
    async fn select_apis(
        &self,
        messages: &[Message],
        summaries: &[ApiSummary],
    ) -> Result<SelectedApis, ModelError>;
}

// ─── Tests ───────────────────────────────────────────────────────────────────
