//! Pure stage routing for the turn pipeline.
//!
//! The engine drives a small explicit pipeline; every branch decision is a
//! typed routing value produced here and matched exhaustively by the turn
//! loop. Keeping the decisions pure makes them testable without any model,
//! gateway or storage in play.

use crate::cache::{CacheError, CacheHit};
use crate::engine::types::{ApiSelection, ToolCall};
use crate::gateway::{ApiSummary, ToolSafety};
use crate::model::{ModelReply, SelectedApis};

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    CheckCache,
    LoadSummaries,
    SelectApis,
    LoadSpecs,
    CallModel,
    CallApi,
    HumanReview,
    End,
}

/// Outcome of the cache stage.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheRouting {
    /// Serve the cached response; the model is never called.
    Hit(CacheHit),
    Miss,
}

/// Outcome of the API selection stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionRouting {
    /// Load the specs for these selections before calling the model.
    LoadSpecs(Vec<ApiSelection>),
    /// Nothing selected (or nothing to select from).
    SkipToModel,
}

/// Route a cache lookup result to the next stage.
///
/// A failing cache backend must never fail the turn, so lookup errors
/// degrade to a forced miss.
pub fn route_cache(lookup: Result<Option<CacheHit>, CacheError>) -> CacheRouting {
    match lookup {
        Ok(Some(hit)) => CacheRouting::Hit(hit),
        Ok(None) => CacheRouting::Miss,
        Err(e) => {
            tracing::warn!(error = %e, "cache lookup failed, treating as miss");
            CacheRouting::Miss
        }
    }
}

/// Route the model's API selection to the next stage.
///
/// Selections the catalog never offered are dropped; an empty surviving
/// set skips spec loading entirely.
pub fn route_selection(selected: SelectedApis, summaries: &[ApiSummary]) -> SelectionRouting {
    let surviving: Vec<ApiSelection> = selected
        .apis
        .into_iter()
        .filter(|selection| {
            let known = summaries
                .iter()
                .any(|s| s.title == selection.title && s.version == selection.version);
            if !known {
                tracing::warn!(
                    title = %selection.title,
                    version = %selection.version,
                    "model selected an unknown API, dropping it"
                );
            }
            known
        })
        .collect();

    if surviving.is_empty() {
        SelectionRouting::SkipToModel
    } else {
        SelectionRouting::LoadSpecs(surviving)
    }
}

/// Outcome of a model reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelRouting {
    /// No tool calls: the reply text ends the turn.
    Complete,
    /// The model asked for tools but execution is disabled.
    ToolsDisabled,
    /// Execute this call immediately.
    ExecuteSafe(ToolCall),
    /// Suspend and ask a human about this call.
    Review(ToolCall),
    /// The model asked for a tool nobody registered.
    UnknownTool { name: String },
}

/// Route a model reply to the next stage.
///
/// Replies carry at most one actionable call per round; when a model emits
/// several, the first is processed and the rest are dropped (they will be
/// re-requested on the next round if still wanted).
pub fn route_model_reply(
    reply: &ModelReply,
    tools_enabled: bool,
    safety_of: impl Fn(&str) -> Option<ToolSafety>,
) -> ModelRouting {
    let Some(call) = reply.tool_calls.first() else {
        return ModelRouting::Complete;
    };

    if !tools_enabled {
        return ModelRouting::ToolsDisabled;
    }

    match safety_of(&call.name) {
        None => ModelRouting::UnknownTool {
            name: call.name.clone(),
        },
        Some(ToolSafety::Safe) => ModelRouting::ExecuteSafe(call.clone()),
        Some(ToolSafety::Unsafe) => ModelRouting::Review(call.clone()),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
