//! The four external capabilities the core consumes but does not
//! implement (spec.md §1 "Out of scope: external collaborators"):
//! `Planner`, `ActionExecutor`, `Embedder`, and `Observer`.
//!
//! These mirror the shape of the teacher's `EmbeddingProvider`
//! (`querymt::embedding::EmbeddingProvider`) and `Tool`
//! (`querymt_agent::tools::context::Tool`) traits: a thin async trait at
//! the boundary, implementations supplied by the binary that wires the
//! core together.

use crate::error::{ExecutionError, PlanningError};
use crate::plan::{Embedding, Plan, ToolCall};
use async_trait::async_trait;

/// The closed catalog of tools the executor exposes, handed to the
/// planner so it only ever proposes calls the executor can run.
#[derive(Debug, Clone)]
pub struct ToolCatalogEntry {
    pub tool_name: String,
    pub description: String,
}

/// Remote large-model planner: turns an instruction into an ordered
/// plan. Treated as opaque (spec §1); the core only needs this
/// contract.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(
        &self,
        original_instruction: &str,
        tool_catalog: &[ToolCatalogEntry],
    ) -> Result<Plan, PlanningError>;
}

/// The result of one attempt to execute a tool call.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub output: String,
}

/// Desktop automation backend. Treated as opaque (spec §1): mouse,
/// keyboard, window, and screen primitives live behind this single
/// method.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, call: &ToolCall) -> Result<ExecutionOutcome, ExecutionError>;
}

/// Embedding/similarity computation for the plan cache. Treated as
/// opaque (spec §1).
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding, String>;
}

/// Per-tool-class verification predicate (spec §4.4.1). Pure over
/// executor output; must never itself drive the desktop.
#[async_trait]
pub trait Observer: Send + Sync {
    async fn verify(&self, call: &ToolCall, outcome: &ExecutionOutcome) -> Result<(), String>;
}

/// An `Observer` that accepts every outcome unconditionally — the
/// default when no tool-class-specific verification is configured.
pub struct NoopObserver;

#[async_trait]
impl Observer for NoopObserver {
    async fn verify(&self, _call: &ToolCall, _outcome: &ExecutionOutcome) -> Result<(), String> {
        Ok(())
    }
}
