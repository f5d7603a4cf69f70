//! Error taxonomy for the orchestration core.
//!
//! Mirrors the teacher crate's split between a caller-visible error
//! (`AdmissionError`) and an internal taxonomy the runner discriminates
//! on (`CoreError`) that never crosses the session boundary directly —
//! it is always mapped to a [`crate::event::ProgressEvent`] or a
//! terminal session state before a caller observes it.

use thiserror::Error;

/// Reasons the admission gate rejects an instruction. Caller-visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("instruction is empty")]
    Empty,
    #[error("instruction exceeds the maximum length")]
    TooLong,
    #[error("instruction has no meaningful content")]
    NoContent,
    #[error("instruction contains disallowed characters")]
    Forbidden,
}

/// Errors returned by [`crate::session_manager::SessionManager::start`].
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("rejected: {0}")]
    Rejected(#[from] RejectReason),
    #[error("admission queue is at capacity")]
    BackpressureFull,
    #[error("could not open a durable record for the session: {0}")]
    HistoryUnavailable(#[from] HistoryError),
}

/// Infrastructure errors from the durable history store.
#[derive(Debug, Error, Clone)]
pub enum HistoryError {
    #[error("i/o error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("session not found: {0}")]
    NotFound(String),
}

impl From<std::io::Error> for HistoryError {
    fn from(err: std::io::Error) -> Self {
        HistoryError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for HistoryError {
    fn from(err: serde_json::Error) -> Self {
        HistoryError::Serialization(err.to_string())
    }
}

/// Infrastructure errors from the plan cache's optional embedding step.
#[derive(Debug, Error, Clone)]
pub enum CacheError {
    #[error("embedding provider failed: {0}")]
    EmbeddingFailed(String),
}

/// Planning-phase failures (§7: Planning kind). Retried internally by the
/// runner up to `R_PLAN` times; only exhaustion is ever observed outside
/// the runner, as [`AgentFailure::PlanningFailed`].
#[derive(Debug, Error, Clone)]
pub enum PlanningError {
    #[error("planner timed out")]
    Timeout,
    #[error("planner refused: {0}")]
    Refused(String),
    #[error("planner returned a malformed plan: {0}")]
    Malformed(String),
}

/// Execution-phase failures (§7: Execution kind) for a single attempt at
/// a subtask.
#[derive(Debug, Error, Clone)]
pub enum ExecutionError {
    /// Retryable: executor reported a transient failure.
    #[error("executor transient error: {0}")]
    Transient(String),
    /// Not retryable: executor rejected the tool call on shape, or policy
    /// refused it outright.
    #[error("executor fatal error: {0}")]
    Fatal(String),
    /// Retryable: the observer's post-condition check did not hold.
    #[error("verification failed: {0}")]
    VerificationFailed(String),
    /// Retryable: the per-step deadline elapsed.
    #[error("step deadline exceeded")]
    Deadline,
}

impl ExecutionError {
    /// Whether this attempt failure should consume a retry (vs. fail the
    /// subtask immediately). See spec §4.4 "Failure semantics".
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ExecutionError::Fatal(_))
    }
}

/// The reason a whole session failed, attached to its terminal event.
#[derive(Debug, Error, Clone)]
pub enum AgentFailure {
    #[error("planning failed: {0}")]
    PlanningFailed(PlanningError),
    #[error("subtask {index} failed: {source}")]
    SubtaskFailed { index: usize, source: ExecutionError },
    #[error("could not open a durable record for the session: {0}")]
    HistoryUnavailable(HistoryError),
}
