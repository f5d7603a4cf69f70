//! Progress events (spec.md §3, §4.5).

use crate::session::{SessionState, SubtaskState};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Advisory UI signal emitted when the runner is about to drive the
/// desktop, and again once it finishes (spec §3, §4.4 Phase 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowHint {
    Compact,
    Normal,
}

/// A point-in-time fact about one subtask, carried on subtask-scoped
/// events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskInfo {
    pub id: String,
    pub index: usize,
    pub description: String,
    pub state: SubtaskState,
    pub attempt_count: usize,
    pub error: Option<String>,
}

/// The discriminant of a [`ProgressEvent`] (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    SessionStarted,
    SubtaskStarted,
    SubtaskProgress,
    SubtaskCompleted,
    SubtaskFailed,
    SessionCompleted,
    SessionFailed,
    SessionCancelled,
    WindowHint { window_hint: WindowHint },
}

/// One ordered fact about a session's progress (spec.md §3, §4.5).
/// `sequence` is monotonic per session starting at 1, with no gaps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub session_id: String,
    pub sequence: u64,
    #[serde(flatten)]
    pub kind: EventKind,
    pub subtask: Option<SubtaskInfo>,
    pub session_state: SessionState,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub emitted_at: OffsetDateTime,
}

impl ProgressEvent {
    /// Whether this event is the final event of a session's life — the
    /// bus's replay/grace-period logic treats these specially (spec
    /// §4.5 "Termination").
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SessionCompleted | EventKind::SessionFailed | EventKind::SessionCancelled
        )
    }
}
