//! Token estimation for context window management.
//!
//! Uses character-based heuristics calibrated for LLM tokenizers:
//! - English prose: ~3.2 chars/token, rounded low so estimates run high
//! - JSON/structured content: ~2.8 chars/token (denser due to punctuation, short keys)
//!
//! A real tokenizer can replace this once the serving platforms are pinned.

use crate::engine::types::Message;
use crate::gateway::ApiSpec;

// ─── Constants ──────────────────────────────────────────────────────────────

/// Average characters per token for English prose.
///
/// Most LLM tokenizers produce ~3.5-4.0 chars/token for English text. We use
/// 3.2 to err on the side of overestimation, which is safer than
/// underestimating and overflowing the context window.
const CHARS_PER_TOKEN: f64 = 3.2;

/// Average characters per token for JSON/structured content.
///
/// JSON tokenizes more densely than prose due to punctuation, short keys,
/// braces, and colons. Tool arguments, tool results, and API specs all fall
/// into this category.
const JSON_CHARS_PER_TOKEN: f64 = 2.8;

/// Per-message overhead (role label, formatting tokens).
const MESSAGE_OVERHEAD_TOKENS: u32 = 4;

/// Overhead for tool call JSON structure (per call).
const TOOL_CALL_OVERHEAD_TOKENS: u32 = 10;

// ─── UTF-8 Safe Truncation ──────────────────────────────────────────────────

/// Truncate a string to at most `max_bytes` bytes on a valid UTF-8 char boundary.
///
/// If the byte at `max_bytes` lands inside a multi-byte character, the slice
/// is shortened to the preceding character boundary.
pub(crate) fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ─── Public API ─────────────────────────────────────────────────────────────

/// Estimate the token count for a string of natural language text.
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.len() as f64;
    (chars / CHARS_PER_TOKEN).ceil() as u32
}

/// Estimate the token count for JSON/structured content.
pub fn estimate_json_tokens(json_text: &str) -> u32 {
    let chars = json_text.len() as f64;
    (chars / JSON_CHARS_PER_TOKEN).ceil() as u32
}

/// Estimate the token count for one conversation message.
///
/// Accounts for content, tool calls, and per-message overhead. Tool results
/// and tool call arguments use the JSON estimator; everything else is prose.
pub fn estimate_message_tokens(message: &Message) -> u32 {
    let mut total = MESSAGE_OVERHEAD_TOKENS;

    match message {
        Message::Human { content } => {
            total += estimate_tokens(content);
        }
        Message::Assistant {
            content,
            tool_calls,
        } => {
            total += estimate_tokens(content);
            for call in tool_calls {
                total += TOOL_CALL_OVERHEAD_TOKENS;
                total += estimate_tokens(&call.name);
                let arguments = serde_json::to_string(&call.arguments).unwrap_or_default();
                total += estimate_json_tokens(&arguments);
            }
        }
        Message::Tool {
            content,
            tool_call_id,
        } => {
            total += estimate_json_tokens(content);
            total += estimate_tokens(tool_call_id);
        }
    }

    total
}

/// Estimate the token count for a whole transcript.
pub fn estimate_transcript_tokens(messages: &[Message]) -> u32 {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Estimate the token count contributed by loaded API specs.
pub fn estimate_spec_tokens(specs: &[ApiSpec]) -> u32 {
    specs
        .iter()
        .map(|spec| MESSAGE_OVERHEAD_TOKENS + estimate_json_tokens(&spec.content))
        .sum()
}

// ─── Tests ──────────────────────────────────────────────────────────────────
