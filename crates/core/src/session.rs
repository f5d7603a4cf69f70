//! Session and Subtask data model (spec.md §3).

use crate::error::AgentFailure;
use crate::instruction::{NormalizedInstruction, RawInstruction};
use crate::plan::ToolCall;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Session lifecycle state (spec.md §3, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    Planning,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Cancelled
        )
    }
}

/// Subtask lifecycle state (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskState {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// One tool invocation within a session's plan, with execution
/// bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub session_id: String,
    pub index: usize,
    pub description: String,
    pub tool_call: ToolCall,
    pub state: SubtaskState,
    pub attempt_count: usize,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl Subtask {
    pub fn new(session_id: String, index: usize, tool_call: ToolCall) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id,
            index,
            description: tool_call.description.clone(),
            tool_call,
            state: SubtaskState::Pending,
            attempt_count: 0,
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        }
    }
}

/// One end-to-end run of an instruction (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub instruction: RawInstruction,
    pub normalized_instruction: NormalizedInstruction,
    pub state: SessionState,
    pub subtasks: Vec<Subtask>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub error: Option<String>,
}

impl Session {
    pub fn new(id: String, instruction: RawInstruction, normalized_instruction: NormalizedInstruction) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id,
            instruction,
            normalized_instruction,
            state: SessionState::Pending,
            subtasks: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            error: None,
        }
    }

    /// Transition to a new state. Panics if the session is already
    /// terminal — by invariant (spec §3) a terminal session never
    /// mutates again, and only the owning runner (which tracks this
    /// itself) calls this, so a violation here is a runner bug, not a
    /// recoverable condition.
    pub fn transition(&mut self, new_state: SessionState) {
        assert!(
            !self.state.is_terminal(),
            "session {} is already terminal ({:?}), cannot transition to {:?}",
            self.id,
            self.state,
            new_state
        );
        self.state = new_state;
        self.updated_at = OffsetDateTime::now_utc();
        if new_state.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
    }

    pub fn fail(&mut self, failure: &AgentFailure) {
        self.error = Some(failure.to_string());
        self.transition(SessionState::Failed);
    }

    /// An immutable, copy-by-value snapshot of the session's observable
    /// fields at the call instant (spec §4.3 "SessionSnapshot").
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            instruction: self.instruction.0.clone(),
            state: self.state,
            subtask_count: self.subtasks.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
            error: self.error.clone(),
        }
    }
}

/// Immutable copy-by-value view of a session's observable fields
/// (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub instruction: String,
    pub state: SessionState,
    pub subtask_count: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn fresh_session() -> Session {
        Session::new(
            "sess-1".into(),
            RawInstruction("open notepad".into()),
            NormalizedInstruction("open notepad".into()),
        )
    }

    #[test]
    fn subtask_index_matches_vec_position() {
        let mut session = fresh_session();
        for i in 0..3 {
            let call = ToolCall {
                tool_name: "noop".into(),
                arguments: BTreeMap::new(),
                description: String::new(),
                element_locator: None,
                coordinates: None,
                drives_desktop: false,
            };
            session.subtasks.push(Subtask::new(session.id.clone(), i, call));
        }
        for (i, sub) in session.subtasks.iter().enumerate() {
            assert_eq!(sub.index, i);
        }
    }

    #[test]
    #[should_panic(expected = "already terminal")]
    fn cannot_transition_out_of_terminal_state() {
        let mut session = fresh_session();
        session.transition(SessionState::Planning);
        session.transition(SessionState::Running);
        session.transition(SessionState::Completed);
        session.transition(SessionState::Failed);
    }

    #[test]
    fn terminal_transition_sets_completed_at() {
        let mut session = fresh_session();
        assert!(session.completed_at.is_none());
        session.transition(SessionState::Planning);
        session.transition(SessionState::Cancelled);
        assert!(session.completed_at.is_some());
    }
}
