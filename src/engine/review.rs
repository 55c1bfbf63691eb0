//! Human review gate for unsafe tool calls.
//!
//! When the model requests a tool classified as unsafe, the turn suspends
//! and a human decides what happens. The decision vocabulary is a closed
//! enum: an action string outside it fails at the deserialization boundary,
//! so nothing unknown can ever reach the dispatcher.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audit::{mask_identifier, ReviewAuditRecord};
use crate::engine::tokens::truncate_utf8;
use crate::engine::types::{Identity, ToolCall};

/// Longest argument rendering shown in a review question.
const ARGUMENT_PREVIEW_BYTES: usize = 200;

// ─── Decisions ───────────────────────────────────────────────────────────────

/// What the human decided about a suspended tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ReviewAction {
    /// Execute the call with its original arguments.
    Accept,
    /// Execute the call with these arguments instead.
    Edit { arguments: Value },
    /// Do not execute; optionally tell the model why.
    Reject { message: Option<String> },
    /// Do not execute; hand the model free-text guidance instead.
    Feedback { message: String },
}

impl ReviewAction {
    /// Stable action name for audit records.
    pub fn label(&self) -> &'static str {
        match self {
            ReviewAction::Accept => "accept",
            ReviewAction::Edit { .. } => "edit",
            ReviewAction::Reject { .. } => "reject",
            ReviewAction::Feedback { .. } => "feedback",
        }
    }
}

/// A decision tied to the specific call it answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDecision {
    pub tool_call_id: String,
    #[serde(flatten)]
    pub action: ReviewAction,
}

// ─── Question text ───────────────────────────────────────────────────────────

/// Human-readable description of a call awaiting approval.
pub fn review_question(call: &ToolCall) -> String {
    let rendered = serde_json::to_string(&call.arguments).unwrap_or_default();
    let preview = truncate_utf8(&rendered, ARGUMENT_PREVIEW_BYTES);
    let ellipsis = if preview.len() < rendered.len() {
        "…"
    } else {
        ""
    };
    format!(
        "The assistant wants to run `{}` with arguments {preview}{ellipsis}. \
         Approve, edit or reject this call.",
        call.name
    )
}

// ─── Audit ───────────────────────────────────────────────────────────────────

/// Build the audit record for a decision, with identity fields masked.
pub fn audit_record(
    identity: &Identity,
    conversation_id: &str,
    call: &ToolCall,
    action: &ReviewAction,
) -> ReviewAuditRecord {
    ReviewAuditRecord {
        user_id: mask_identifier(&identity.user_id),
        org_unit: identity.org_unit.as_deref().map(mask_identifier),
        conversation_id: conversation_id.to_string(),
        tool_call_id: call.id.clone(),
        tool_name: call.name.clone(),
        action: action.label().to_string(),
        decided_at: chrono::Utc::now(),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
