//! Plan Runner (spec.md §4.4): obtain a plan, then execute it end to
//! end against one session, emitting progress events and honoring
//! cancellation.
//!
//! The state-machine shape (an explicit loop matching on phase/attempt
//! outcome, rather than exceptions for control flow) is grounded on the
//! teacher's `agent::execution` module; the retry/backoff numbers come
//! from [`crate::retry`].

use crate::config::Config;
use crate::error::{AgentFailure, ExecutionError, PlanningError};
use crate::event::{EventKind, ProgressEvent, SubtaskInfo, WindowHint};
use crate::event_bus::EventBus;
use crate::history::HistoryStore;
use crate::plan::{FailurePolicy, Plan, ToolCall};
use crate::session::{Session, SessionSnapshot, SessionState, Subtask, SubtaskState};
use crate::traits::{ActionExecutor, Embedder, ExecutionOutcome, Observer, Planner, ToolCatalogEntry};
use crate::{cache::PlanCache, retry::backoff_delay};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::watch;

/// The cancellable half of a session's cancel token (spec §4.3, §5).
/// `cancel()` is idempotent — sending `true` twice has the same effect
/// as sending it once, matching `watch`'s last-value-wins semantics.
#[derive(Clone)]
pub struct CancelToken(watch::Sender<bool>);

impl CancelToken {
    pub fn new() -> (CancelToken, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (CancelToken(tx), CancelSignal(rx))
    }

    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

/// The read-only half of a session's cancel token, polled by the
/// runner at suspension points (spec §5 "Suspension points").
#[derive(Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

/// Invoked by the runner at each event boundary with an immutable
/// snapshot of the session (spec §9: "handlers receive immutable
/// snapshots published at each event boundary"). The Session Manager
/// uses this to keep its registry's view of a live session current
/// without taking a lock the runner would have to contend on.
pub type SnapshotSink = Arc<dyn Fn(SessionSnapshot) + Send + Sync>;

enum PlanOutcome {
    Ready(Plan),
    Cancelled,
}

enum AttemptOutcome {
    Success(ExecutionOutcome),
    Failed(ExecutionError),
    Cancelled,
}

pub struct PlanRunner {
    config: Arc<Config>,
    cache: Arc<PlanCache>,
    history: Arc<HistoryStore>,
    bus: Arc<EventBus>,
    planner: Arc<dyn Planner>,
    executor: Arc<dyn ActionExecutor>,
    embedder: Arc<dyn Embedder>,
    observer: Arc<dyn Observer>,
    tool_catalog: Vec<ToolCatalogEntry>,
}

impl PlanRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        cache: Arc<PlanCache>,
        history: Arc<HistoryStore>,
        bus: Arc<EventBus>,
        planner: Arc<dyn Planner>,
        executor: Arc<dyn ActionExecutor>,
        embedder: Arc<dyn Embedder>,
        observer: Arc<dyn Observer>,
        tool_catalog: Vec<ToolCatalogEntry>,
    ) -> Self {
        Self {
            config,
            cache,
            history,
            bus,
            planner,
            executor,
            embedder,
            observer,
            tool_catalog,
        }
    }

    /// Drive one session from Planning through to a terminal state.
    /// Takes ownership of the session for the duration of the run, per
    /// spec's single-writer invariant; returns the finalized session.
    pub async fn run(&self, mut session: Session, cancel: CancelSignal, on_update: SnapshotSink) -> Session {
        let mut seq = 0u64;
        session.transition(SessionState::Planning);
        self.emit(&session, &mut seq, EventKind::SessionStarted, None, "session started")
            .await;
        on_update(session.snapshot());

        let plan = match self.obtain_plan(&session, &cancel, &mut seq, &on_update).await {
            Ok(PlanOutcome::Ready(plan)) => plan,
            Ok(PlanOutcome::Cancelled) => return self.finish_cancelled(session, &mut seq, &on_update).await,
            Err(reason) => {
                return self
                    .finish_failed(session, &mut seq, AgentFailure::PlanningFailed(reason), &on_update)
                    .await;
            }
        };

        if cancel.is_cancelled() {
            return self.finish_cancelled(session, &mut seq, &on_update).await;
        }

        session.transition(SessionState::Running);
        on_update(session.snapshot());
        self.run_execution(session, plan, cancel, &mut seq, &on_update).await
    }

    /// Phase 1: consult the cache, else invoke the planner with retry.
    async fn obtain_plan(
        &self,
        session: &Session,
        cancel: &CancelSignal,
        seq: &mut u64,
        on_update: &SnapshotSink,
    ) -> Result<PlanOutcome, PlanningError> {
        let normalized = &session.normalized_instruction;
        let embedding = match self.embedder.embed(&session.instruction.0).await {
            Ok(emb) => Some(emb),
            Err(e) => {
                log::warn!("embedding failed for session {}: {e}", session.id);
                None
            }
        };

        if let Some((plan, origin)) = self.cache.lookup(normalized, embedding.as_ref()) {
            log::info!("session {}: plan cache {:?}", session.id, origin);
            self.emit(
                session,
                seq,
                EventKind::SubtaskProgress,
                None,
                format!("plan cache hit ({origin:?})"),
            )
            .await;
            on_update(session.snapshot());
            return Ok(PlanOutcome::Ready(plan));
        }

        let mut last_err = PlanningError::Timeout;
        let attempts = self.config.r_plan.max(1);
        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Ok(PlanOutcome::Cancelled);
            }
            let result = tokio::time::timeout(
                self.config.t_plan(),
                self.planner.plan(&session.instruction.0, &self.tool_catalog),
            )
            .await;
            match result {
                Ok(Ok(plan)) => {
                    self.cache.insert(normalized, embedding, plan.clone());
                    return Ok(PlanOutcome::Ready(plan));
                }
                Ok(Err(e)) => last_err = e,
                Err(_elapsed) => last_err = PlanningError::Timeout,
            }
            if attempt < attempts {
                if cancel.is_cancelled() {
                    return Ok(PlanOutcome::Cancelled);
                }
                tokio::time::sleep(backoff_delay(self.config.b_plan(), attempt)).await;
            }
        }
        Err(last_err)
    }

    /// Phase 2: execute each step in order, with per-step retry and
    /// failure-policy dispatch.
    async fn run_execution(
        &self,
        mut session: Session,
        plan: Plan,
        cancel: CancelSignal,
        seq: &mut u64,
        on_update: &SnapshotSink,
    ) -> Session {
        let mut window_compact_emitted = false;

        for (index, call) in plan.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                return self.finish_cancelled(session, seq, on_update).await;
            }

            if !window_compact_emitted && call.drives_desktop {
                self.emit(
                    &session,
                    seq,
                    EventKind::WindowHint { window_hint: WindowHint::Compact },
                    None,
                    "now driving the desktop",
                )
                .await;
                window_compact_emitted = true;
            }

            let mut subtask = Subtask::new(session.id.clone(), index, call.clone());
            subtask.state = SubtaskState::InProgress;
            subtask.started_at = Some(OffsetDateTime::now_utc());
            session.subtasks.push(subtask);

            self.emit(
                &session,
                seq,
                EventKind::SubtaskStarted,
                Some(subtask_info(&session.subtasks[index])),
                "subtask started",
            )
            .await;
            on_update(session.snapshot());

            let (outcome, attempts) = self.run_attempts(call, &cancel).await;
            session.subtasks[index].attempt_count = attempts;

            match outcome {
                AttemptOutcome::Cancelled => return self.finish_cancelled(session, seq, on_update).await,
                AttemptOutcome::Success(result) => {
                    let subtask = &mut session.subtasks[index];
                    subtask.state = SubtaskState::Completed;
                    subtask.finished_at = Some(OffsetDateTime::now_utc());
                    subtask.result = Some(result.output);
                    self.emit(
                        &session,
                        seq,
                        EventKind::SubtaskCompleted,
                        Some(subtask_info(&session.subtasks[index])),
                        "subtask completed",
                    )
                    .await;
                    on_update(session.snapshot());
                }
                AttemptOutcome::Failed(err) => {
                    let subtask = &mut session.subtasks[index];
                    subtask.state = SubtaskState::Failed;
                    subtask.finished_at = Some(OffsetDateTime::now_utc());
                    subtask.error = Some(err.to_string());
                    let info = subtask_info(&session.subtasks[index]);
                    let message = err.to_string();
                    self.emit(&session, seq, EventKind::SubtaskFailed, Some(info), message)
                        .await;
                    on_update(session.snapshot());

                    if plan.failure_policy == FailurePolicy::FailFast {
                        return self
                            .finish_failed(session, seq, AgentFailure::SubtaskFailed { index, source: err }, on_update)
                            .await;
                    }
                }
            }
        }

        self.emit(
            &session,
            seq,
            EventKind::WindowHint { window_hint: WindowHint::Normal },
            None,
            "desktop released",
        )
        .await;
        self.finish_completed(session, seq, on_update).await
    }

    /// Run up to `R_STEP` attempts of one subtask's tool call, trying
    /// the element strategy before the coordinate fallback within each
    /// attempt (spec §4.4 "Strategy selection" — the fallback shares the
    /// attempt's retry budget rather than consuming one of its own).
    async fn run_attempts(&self, call: &ToolCall, cancel: &CancelSignal) -> (AttemptOutcome, usize) {
        let mut last_err = ExecutionError::Transient("no attempts executed".to_string());
        let attempts_budget = self.config.r_step.max(1);
        let mut attempts_used = 0usize;

        for attempt in 1..=attempts_budget {
            attempts_used = attempt;
            match self.execute_one_attempt(call).await {
                Ok(outcome) => return (AttemptOutcome::Success(outcome), attempts_used),
                Err(err) => {
                    if !err.is_retryable() {
                        return (AttemptOutcome::Failed(err), attempts_used);
                    }
                    last_err = err;
                    if attempt < attempts_budget {
                        if cancel.is_cancelled() {
                            return (AttemptOutcome::Cancelled, attempts_used);
                        }
                        tokio::time::sleep(backoff_delay(self.config.b_step(), attempt)).await;
                        if cancel.is_cancelled() {
                            return (AttemptOutcome::Cancelled, attempts_used);
                        }
                    }
                }
            }
        }
        (AttemptOutcome::Failed(last_err), attempts_used)
    }

    async fn execute_one_attempt(&self, call: &ToolCall) -> Result<ExecutionOutcome, ExecutionError> {
        let primary_call = match call.primary_strategy() {
            Some(strategy) => call.with_strategy(strategy),
            None => call.clone(),
        };
        match self.try_strategy(&primary_call).await {
            Ok(outcome) => Ok(outcome),
            Err(err) if !err.is_retryable() => Err(err),
            Err(err) => match call.fallback_strategy() {
                Some(fallback) => self.try_strategy(&call.with_strategy(fallback)).await,
                None => Err(err),
            },
        }
    }

    async fn try_strategy(&self, call: &ToolCall) -> Result<ExecutionOutcome, ExecutionError> {
        let result = tokio::time::timeout(self.config.t_step(), self.executor.execute(call)).await;
        let outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => return Err(e),
            Err(_elapsed) => return Err(ExecutionError::Deadline),
        };
        match self.observer.verify(call, &outcome).await {
            Ok(()) => Ok(outcome),
            Err(msg) => Err(ExecutionError::VerificationFailed(msg)),
        }
    }

    async fn emit(
        &self,
        session: &Session,
        seq: &mut u64,
        kind: EventKind,
        subtask: Option<SubtaskInfo>,
        message: impl Into<String>,
    ) -> ProgressEvent {
        *seq += 1;
        let event = ProgressEvent {
            session_id: session.id.clone(),
            sequence: *seq,
            kind,
            subtask,
            session_state: session.state,
            message: message.into(),
            emitted_at: OffsetDateTime::now_utc(),
        };
        // Append happens-before publish (spec §5): a subscriber that
        // reconnects must always be able to recover from the store what
        // it was just sent on the bus.
        if let Err(e) = self.history.append(&session.id, &event).await {
            log::error!("history append failed for session {}: {e}", session.id);
        }
        self.bus.publish(event.clone());
        event
    }

    async fn finish_cancelled(&self, mut session: Session, seq: &mut u64, on_update: &SnapshotSink) -> Session {
        session.transition(SessionState::Cancelled);
        self.emit(&session, seq, EventKind::SessionCancelled, None, "session cancelled")
            .await;
        on_update(session.snapshot());
        self.finalize_history(&session).await;
        session
    }

    async fn finish_failed(
        &self,
        mut session: Session,
        seq: &mut u64,
        failure: AgentFailure,
        on_update: &SnapshotSink,
    ) -> Session {
        let message = failure.to_string();
        session.fail(&failure);
        self.emit(&session, seq, EventKind::SessionFailed, None, message).await;
        on_update(session.snapshot());
        self.finalize_history(&session).await;
        session
    }

    async fn finish_completed(&self, mut session: Session, seq: &mut u64, on_update: &SnapshotSink) -> Session {
        session.transition(SessionState::Completed);
        self.emit(&session, seq, EventKind::SessionCompleted, None, "session completed")
            .await;
        on_update(session.snapshot());
        self.finalize_history(&session).await;
        session
    }

    async fn finalize_history(&self, session: &Session) {
        let completed_at = session.completed_at.unwrap_or_else(OffsetDateTime::now_utc);
        if let Err(e) = self.history.finalize(&session.id, session.state, completed_at).await {
            log::error!("history finalize failed for session {}: {e}", session.id);
        }
    }
}

fn subtask_info(subtask: &Subtask) -> SubtaskInfo {
    SubtaskInfo {
        id: subtask.id.clone(),
        index: subtask.index,
        description: subtask.description.clone(),
        state: subtask.state,
        attempt_count: subtask.attempt_count,
        error: subtask.error.clone(),
    }
}
