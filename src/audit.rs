//! Review decision audit trail.
//!
//! Every decision that resumes a suspended turn is recorded before the
//! engine acts on it, whatever the decision was. Identity fields are masked
//! at record construction so no sink ever sees the raw values. Sinks are
//! fire-and-forget from the engine's perspective: a sink failure is logged
//! and never blocks the resume.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One audited review decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewAuditRecord {
    /// Masked user id (`al***`).
    pub user_id: String,
    /// Masked org unit, when the caller supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_unit: Option<String>,
    pub conversation_id: String,
    pub tool_call_id: String,
    pub tool_name: String,
    /// Decision action name: `accept`, `edit`, `reject` or `feedback`.
    pub action: String,
    pub decided_at: DateTime<Utc>,
}

/// Mask an identifier for audit storage: keep the first two characters,
/// replace the rest. Identifiers too short to partially reveal are fully
/// masked.
pub fn mask_identifier(raw: &str) -> String {
    let mut chars = raw.chars();
    let head: String = chars.by_ref().take(2).collect();
    if head.len() < 2 || chars.next().is_none() {
        "***".to_string()
    } else {
        format!("{head}***")
    }
}

/// Errors a sink may report. The engine logs these and moves on.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit sink failure: {reason}")]
    Sink { reason: String },
}

/// Destination for review audit records.
pub trait AuditSink: Send + Sync {
    fn log_decision(&self, record: ReviewAuditRecord) -> Result<(), AuditError>;
}

/// In-process sink that keeps records in memory. Intended for tests and
/// embedders that forward records themselves.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Arc<Mutex<Vec<ReviewAuditRecord>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn records(&self) -> Vec<ReviewAuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn log_decision(&self, record: ReviewAuditRecord) -> Result<(), AuditError> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record);
        Ok(())
    }
}

/// Sink that writes records into the tracing pipeline as structured events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn log_decision(&self, record: ReviewAuditRecord) -> Result<(), AuditError> {
        tracing::info!(
            user = %record.user_id,
            org_unit = record.org_unit.as_deref().unwrap_or("-"),
            conversation = %record.conversation_id,
            tool_call = %record.tool_call_id,
            tool = %record.tool_name,
            action = %record.action,
            "review decision"
        );
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
