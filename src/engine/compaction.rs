//! Transcript compression for context window management.
//!
//! When the projected prompt size crosses the configured fraction of the
//! model's context window, everything before the latest human message is
//! summarized through the model and replaced by a single assistant message.
//! Compression is best-effort: any failure leaves the transcript untouched
//! and the turn proceeds uncompressed.

use crate::config::CompactionSettings;
use crate::engine::tokens;
use crate::engine::types::Message;
use crate::gateway::ApiSpec;
use crate::model::ModelClient;

/// Transcripts with fewer messages before the latest human message are
/// never worth compressing.
const MIN_PREFIX_MESSAGES: usize = 3;

/// Whether the projected prompt crosses the compression threshold.
pub(crate) fn needs_compression(
    messages: &[Message],
    specs: &[ApiSpec],
    settings: &CompactionSettings,
    context_window: u32,
) -> bool {
    if !settings.enabled {
        return false;
    }
    let projected =
        tokens::estimate_transcript_tokens(messages) + tokens::estimate_spec_tokens(specs);
    f64::from(projected) > settings.threshold_percent * f64::from(context_window)
}

/// Compress the transcript when it is over budget.
///
/// The latest human message and everything after it survive verbatim; the
/// prefix is replaced by one assistant-role summary. On any failure the
/// original transcript is returned unchanged.
pub(crate) async fn compress_if_needed(
    model: &dyn ModelClient,
    messages: Vec<Message>,
    specs: &[ApiSpec],
    settings: &CompactionSettings,
    context_window: u32,
) -> Vec<Message> {
    if !needs_compression(&messages, specs, settings, context_window) {
        return messages;
    }

    let Some(split) = messages.iter().rposition(Message::is_human) else {
        return messages;
    };
    if split < MIN_PREFIX_MESSAGES {
        tracing::debug!(split, "transcript over budget but prefix too short to compress");
        return messages;
    }

    let rendered = render_for_summary(&messages[..split]);
    let request = vec![Message::human(format!(
        "{}\n\n{rendered}",
        summary_instruction(settings.max_summary_tokens)
    ))];

    match model.invoke(&request, &[]).await {
        Ok(reply) if !reply.content.trim().is_empty() => {
            let summary = cap_summary(&reply.content, settings.max_summary_tokens);
            let mut compressed = Vec::with_capacity(messages.len() - split + 1);
            compressed.push(Message::assistant(format!(
                "Summary of the conversation so far: {summary}"
            )));
            compressed.extend_from_slice(&messages[split..]);
            tracing::info!(
                before = messages.len(),
                after = compressed.len(),
                "compressed transcript"
            );
            compressed
        }
        Ok(_) => {
            tracing::warn!("summarization returned empty text, continuing uncompressed");
            messages
        }
        Err(e) => {
            tracing::warn!(error = %e, "transcript compression failed, continuing uncompressed");
            messages
        }
    }
}

fn summary_instruction(max_summary_tokens: u32) -> String {
    format!(
        "Summarize the conversation below in at most {max_summary_tokens} tokens. \
         Keep facts, identifiers, decisions and any unanswered questions. \
         Reply with the summary only."
    )
}

fn render_for_summary(messages: &[Message]) -> String {
    let lines: Vec<String> = messages
        .iter()
        .map(|message| match message {
            Message::Human { content } => format!("Human: {content}"),
            Message::Assistant {
                content,
                tool_calls,
            } => {
                if tool_calls.is_empty() {
                    format!("Assistant: {content}")
                } else {
                    let names: Vec<&str> =
                        tool_calls.iter().map(|call| call.name.as_str()).collect();
                    format!("Assistant (called {}): {content}", names.join(", "))
                }
            }
            Message::Tool { content, .. } => format!("Tool result: {content}"),
        })
        .collect();
    lines.join("\n")
}

/// Hard cap in case the model ignores the token budget in the instruction.
fn cap_summary(summary: &str, max_summary_tokens: u32) -> &str {
    if tokens::estimate_tokens(summary) <= max_summary_tokens {
        return summary;
    }
    let target_bytes = (f64::from(max_summary_tokens) * 3.2) as usize;
    tokens::truncate_utf8(summary, target_bytes)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
