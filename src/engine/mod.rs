//! Turn engine — orchestration layer for Colloquy.
//!
//! Submodules:
//! - `types`: Conversation, identity, and turn types shared across the engine
//! - `errors`: Engine-level error taxonomy surfaced to embedders
//! - `machine`: Pipeline stages and the typed routing decisions between them
//! - `tokens`: Token estimation for context window budgets
//! - `compaction`: Transcript summarization when the context window runs tight
//! - `review`: Review actions and audit records for gated tool calls
//! - `turn`: Drives a conversation turn end to end, including suspend/resume

pub mod compaction;
pub mod errors;
pub mod machine;
pub mod review;
pub mod tokens;
pub mod turn;
pub mod types;

// Re-exports for convenience
pub use errors::EngineError;
pub use review::{ReviewAction, ToolCallDecision};
pub use turn::TurnEngine;
pub use types::{
    ApiSelection, ConversationState, ConversationStatus, Identity, Message, PendingReview,
    SuspensionPayload, ToolCall, TurnOptions, TurnOutcome, TurnRequest,
};
