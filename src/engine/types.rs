//! Core conversation types shared across the engine.
//!
//! Responsibilities:
//! - The closed `Message` enum (human / assistant / tool)
//! - Per-turn conversation state and status
//! - Turn request/outcome surface types
//! - The suspension payload handed out when a turn pauses for review

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Messages ────────────────────────────────────────────────────────────────

/// A single message in a conversation transcript.
///
/// The role set is closed: anything that is not a human prompt or a tool
/// result is an assistant message. Serialized with a lowercase `role` tag so
/// stored transcripts read naturally (`{"role": "human", "content": ...}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    /// A message authored by the end user.
    Human { content: String },
    /// A model response. `tool_calls` is empty for plain text replies.
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    /// A tool result, tied back to the call that produced it.
    Tool {
        content: String,
        tool_call_id: String,
    },
}

impl Message {
    /// Build a human message.
    pub fn human(content: impl Into<String>) -> Self {
        Message::Human {
            content: content.into(),
        }
    }

    /// Build a plain assistant message with no tool calls.
    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    /// Build an assistant message carrying tool calls.
    pub fn assistant_with_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Message::Assistant {
            content: content.into(),
            tool_calls,
        }
    }

    /// Build a tool result message.
    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Message::Tool {
            content: content.into(),
            tool_call_id: tool_call_id.into(),
        }
    }

    /// The textual content of the message, whatever the role.
    pub fn content(&self) -> &str {
        match self {
            Message::Human { content }
            | Message::Assistant { content, .. }
            | Message::Tool { content, .. } => content,
        }
    }

    /// Whether this is a human message.
    pub fn is_human(&self) -> bool {
        matches!(self, Message::Human { .. })
    }

    /// Tool calls attached to this message (empty for non-assistant roles).
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }
}

/// The content of the most recent human message, if any.
pub fn latest_human_content(messages: &[Message]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.is_human())
        .map(|m| m.content())
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique ID for this call, echoed back on the tool result.
    pub id: String,
    /// Tool name as the gateway knows it, e.g. `"delete_http_requests"`.
    pub name: String,
    /// JSON arguments for the call.
    pub arguments: serde_json::Value,
}

// ─── Conversation State ──────────────────────────────────────────────────────

/// Lifecycle status of a conversation after a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    /// Mid-turn; also the status of a freshly constructed state.
    Active,
    /// The turn produced a final assistant response.
    Completed,
    /// The turn is suspended awaiting a review decision.
    Interrupted,
    /// The turn failed; the transcript reflects progress up to the failure.
    Error,
}

/// A tool call parked at the review gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingReview {
    /// The call awaiting a decision.
    pub call: ToolCall,
    /// Human-readable question shown to the reviewer.
    pub question: String,
    /// When the turn suspended. No expiry is enforced; callers that want a
    /// review deadline can impose one from this timestamp.
    pub suspended_at: DateTime<Utc>,
}

/// The full mutable state of one conversation during a turn.
///
/// Owned by exactly one conversation and mutated only by the engine while a
/// turn runs. The engine assumes a single writer per conversation; running
/// two turns concurrently on the same conversation is not detected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    /// Ordered transcript.
    pub messages: Vec<Message>,
    /// APIs selected for this turn (survivors of summary filtering).
    #[serde(default)]
    pub selected_apis: Vec<ApiSelection>,
    /// Set when CheckCache answered the turn.
    #[serde(default)]
    pub cache_hit: bool,
    /// Set when CheckCache ran and found nothing.
    #[serde(default)]
    pub cache_miss: bool,
    /// Where the turn ended up.
    pub status: ConversationStatus,
    /// Present exactly when `status` is `Interrupted`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_review: Option<PendingReview>,
}

impl ConversationState {
    /// Fresh state for a turn over the given transcript.
    pub fn new(messages: Vec<Message>) -> Self {
        ConversationState {
            messages,
            selected_apis: Vec::new(),
            cache_hit: false,
            cache_miss: false,
            status: ConversationStatus::Active,
            pending_review: None,
        }
    }

    /// The empty snapshot used to clear a conversation in the checkpoint
    /// store. A real turn never produces one (turns require a transcript).
    pub fn empty() -> Self {
        ConversationState::new(Vec::new())
    }

    /// Whether this is the empty (cleared) snapshot.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// An API chosen by the selection stage, identified by title and version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiSelection {
    pub title: String,
    pub version: String,
}

// ─── Turn Surface ────────────────────────────────────────────────────────────

/// The caller's resolved identity. Consumed for storage scoping and audit
/// masking only; the engine performs no authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    /// Organizational unit, when the embedder tracks one. Audit-logged in
    /// masked form alongside the user id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_unit: Option<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Identity {
            user_id: user_id.into(),
            org_unit: None,
        }
    }
}

/// Per-request knobs for a single turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnOptions {
    /// Skip CheckCache (and response caching) for this turn only.
    #[serde(default)]
    pub cache_disabled: bool,
    /// Model key override; falls back to the configured default model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Input for one turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// Full ordered transcript for this turn, ending in the new human
    /// message. Must not be empty.
    pub messages: Vec<Message>,
    /// Stable conversation id for checkpointing. Generated when absent.
    pub conversation_id: Option<String>,
    pub identity: Identity,
    pub options: TurnOptions,
}

impl TurnRequest {
    pub fn new(messages: Vec<Message>, identity: Identity) -> Self {
        TurnRequest {
            messages,
            conversation_id: None,
            identity,
            options: TurnOptions::default(),
        }
    }
}

/// What the caller gets back from a turn (or a resume).
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub conversation_id: String,
    /// The state as checkpointed; `state.status` distinguishes a completed
    /// turn from a suspended one.
    pub state: ConversationState,
    /// Present iff the turn suspended for review.
    pub suspension: Option<SuspensionPayload>,
}

/// Everything a reviewer needs to decide on a suspended tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspensionPayload {
    pub tool_call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    /// Human-readable description of the call awaiting approval.
    pub question: String,
}

impl SuspensionPayload {
    /// Derive the payload from a parked review.
    pub fn from_pending(pending: &PendingReview) -> Self {
        SuspensionPayload {
            tool_call_id: pending.call.id.clone(),
            tool_name: pending.call.name.clone(),
            arguments: pending.call.arguments.clone(),
            question: pending.question.clone(),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
