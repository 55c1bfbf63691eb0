//! Tool gateway and API catalog contracts.
//!
//! Both collaborators are injected into the engine as trait objects. The
//! gateway executes approved tool calls against whatever backend the
//! embedder wires up; the catalog serves API summaries for the selection
//! stage and full specs for the chosen ones. Neither trait prescribes a
//! transport.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::types::ToolCall;

// ─── Tool Gateway ────────────────────────────────────────────────────────────

/// Safety classification for a recognized tool.
///
/// Unsafe tools are routed through the human review gate before execution;
/// safe tools execute immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolSafety {
    Safe,
    Unsafe,
}

/// Errors from tool execution.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The call reached the tool but the tool failed.
    #[error("tool execution failed: {reason}")]
    ExecutionFailed { reason: String },

    /// The gateway does not know this tool.
    #[error("unknown tool: {name}")]
    UnknownTool { name: String },
}

/// Executes tool calls and classifies tool names.
#[async_trait]
pub trait ToolGateway: Send + Sync {
    /// Run an approved call and return its result payload.
    async fn execute(&self, call: &ToolCall) -> Result<serde_json::Value, GatewayError>;

    /// Classify a tool name. `None` means the name is unrecognized, which
    /// ends the turn without execution.
    fn safety(&self, tool_name: &str) -> Option<ToolSafety>;
}

// ─── API Catalog ─────────────────────────────────────────────────────────────

/// A lightweight catalog entry offered to the selection stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiSummary {
    pub title: String,
    pub version: String,
    pub description: String,
}

/// A full API spec loaded for the model's context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiSpec {
    pub title: String,
    pub version: String,
    /// Spec body, passed to the model verbatim.
    pub content: String,
}

/// Errors from catalog reads. The engine degrades these to an empty summary
/// list rather than failing the turn.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Serves API summaries and full specs.
#[async_trait]
pub trait ApiCatalog: Send + Sync {
    /// All known API summaries.
    async fn summaries(&self) -> Result<Vec<ApiSummary>, CatalogError>;

    /// The full spec for one API, `None` when the catalog cannot resolve it.
    async fn load_spec(&self, title: &str, version: &str)
        -> Result<Option<ApiSpec>, CatalogError>;
}

/// A fixed in-memory catalog. Useful for embedders with a static API set
/// and for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    specs: Vec<ApiSpec>,
}

impl StaticCatalog {
    pub fn new(specs: Vec<ApiSpec>) -> Self {
        StaticCatalog { specs }
    }
}

#[async_trait]
impl ApiCatalog for StaticCatalog {
    async fn summaries(&self) -> Result<Vec<ApiSummary>, CatalogError> {
        Ok(self
            .specs
            .iter()
            .map(|s| ApiSummary {
                title: s.title.clone(),
                version: s.version.clone(),
                description: s.content.chars().take(120).collect(),
            })
            .collect())
    }

    async fn load_spec(
        &self,
        title: &str,
        version: &str,
    ) -> Result<Option<ApiSpec>, CatalogError> {
        Ok(self
            .specs
            .iter()
            .find(|s| s.title == title && s.version == version)
            .cloned())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn orders_spec() -> ApiSpec {
        ApiSpec {
            title: "orders".to_string(),
            version: "v1".to_string(),
            content: "openapi: 3.0.0\ninfo:\n  title: orders".to_string(),
        }
    }

    #[tokio::test]
    async fn test_static_catalog_summaries() {
        let catalog = StaticCatalog::new(vec![orders_spec()]);
        let summaries = catalog.summaries().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].title, "orders");
        assert_eq!(summaries[0].version, "v1");
    }

    #[tokio::test]
    async fn test_static_catalog_load_spec() {
        let catalog = StaticCatalog::new(vec![orders_spec()]);
        let spec = catalog.load_spec("orders", "v1").await.unwrap();
        assert!(spec.is_some());

        let missing = catalog.load_spec("orders", "v2").await.unwrap();
        assert!(missing.is_none(), "unknown version should resolve to None");
    }
}
