//! Session Manager (spec.md §4.3): session identity, lifecycle,
//! concurrency admission, and cancellation.
//!
//! Owns the process-wide session registry under a single lock (spec
//! §5 "Shared resources and mutation rules"), grounded on the same
//! `parking_lot::Mutex`-guarded-registry shape as [`crate::event_bus`].

use crate::admission;
use crate::config::Config;
use crate::error::AdmissionError;
use crate::event_bus::{EventBus, EventStream};
use crate::history::HistoryStore;
use crate::runner::{CancelSignal, CancelToken, PlanRunner, SnapshotSink};
use crate::session::{Session, SessionSnapshot, SessionState};
use crate::event::{EventKind, ProgressEvent};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use time::OffsetDateTime;

/// Outcome of a `cancel` request (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Accepted,
    NotFound,
    AlreadyTerminal,
}

struct QueuedSession {
    session: Session,
    cancel: CancelSignal,
}

struct SessionHandle {
    snapshot: Arc<Mutex<SessionSnapshot>>,
    cancel: CancelToken,
}

#[derive(Default)]
struct Inner {
    active_count: usize,
    queue: VecDeque<QueuedSession>,
    sessions: HashMap<String, SessionHandle>,
}

pub struct SessionManager {
    config: Arc<Config>,
    history: Arc<HistoryStore>,
    bus: Arc<EventBus>,
    runner: Arc<PlanRunner>,
    inner: Mutex<Inner>,
}

impl SessionManager {
    pub fn new(config: Arc<Config>, history: Arc<HistoryStore>, bus: Arc<EventBus>, runner: Arc<PlanRunner>) -> Arc<Self> {
        Arc::new(Self {
            config,
            history,
            bus,
            runner,
            inner: Mutex::new(Inner::default()),
        })
    }

    /// Admit a new instruction. Validates it, opens its durable record,
    /// and either starts it immediately (a Planning/Running slot is
    /// free) or enqueues it FIFO (spec §4.3 "Admission policy").
    pub async fn start(self: &Arc<Self>, instruction: &str) -> Result<String, AdmissionError> {
        let admitted = admission::admit(instruction, self.config.n_max)?;
        let session_id = uuid::Uuid::new_v4().to_string();
        let session = Session::new(session_id.clone(), admitted.original, admitted.normalized);

        self.history
            .open(&session_id, &session.instruction.0, session.created_at)
            .await?;

        let (token, signal) = CancelToken::new();
        let snapshot = Arc::new(Mutex::new(session.snapshot()));

        enum Admission {
            Immediate,
            Queued,
        }

        // Decide admission and apply it to the registry/queue under one
        // lock acquisition: splitting this into a decide-then-mutate pair
        // of separate locks lets two concurrent `start()` calls both
        // observe a free queue slot before either pushes, overshooting
        // `queue_cap`.
        let decision = {
            let mut inner = self.inner.lock();
            let decision = if inner.active_count < self.config.max_concurrent {
                inner.active_count += 1;
                Admission::Immediate
            } else if inner.queue.len() < self.config.queue_cap {
                Admission::Queued
            } else {
                return Err(AdmissionError::BackpressureFull);
            };

            inner.sessions.insert(
                session_id.clone(),
                SessionHandle {
                    snapshot: snapshot.clone(),
                    cancel: token,
                },
            );
            if matches!(decision, Admission::Queued) {
                inner.queue.push_back(QueuedSession {
                    session: session.clone(),
                    cancel: signal.clone(),
                });
            }
            decision
        };

        if matches!(decision, Admission::Immediate) {
            self.clone().spawn_runner(session_id.clone(), session, signal);
        }

        Ok(session_id)
    }

    fn spawn_runner(self: Arc<Self>, session_id: String, session: Session, cancel: CancelSignal) {
        let manager = self;
        let on_update = manager.snapshot_sink(session_id.clone());
        tokio::spawn(async move {
            let finished = manager.runner.run(session, cancel, on_update).await;
            manager.on_session_finished(&session_id, finished);
        });
    }

    fn snapshot_sink(self: &Arc<Self>, session_id: String) -> SnapshotSink {
        let manager = self.clone();
        Arc::new(move |snapshot: SessionSnapshot| {
            if let Some(handle) = manager.inner.lock().sessions.get(&session_id) {
                *handle.snapshot.lock() = snapshot;
            }
        })
    }

    fn on_session_finished(self: &Arc<Self>, session_id: &str, finished: Session) {
        if let Some(handle) = self.inner.lock().sessions.get(session_id) {
            *handle.snapshot.lock() = finished.snapshot();
        }

        let next = {
            let mut inner = self.inner.lock();
            inner.active_count = inner.active_count.saturating_sub(1);
            match inner.queue.pop_front() {
                Some(next) => {
                    inner.active_count += 1;
                    Some(next)
                }
                None => None,
            }
        };

        if let Some(next) = next {
            self.clone().spawn_runner(next.session.id.clone(), next.session, next.cancel);
        }
    }

    /// Request cancellation. Cancellation from Pending (still queued,
    /// no runner yet) is immediate: the session is pulled out of the
    /// queue and finalized as Cancelled here. Cancellation of a
    /// Planning/Running session is cooperative: the runner observes the
    /// token at its next polling point (spec §4.3, §5).
    pub async fn cancel(self: &Arc<Self>, session_id: &str) -> CancelOutcome {
        let queued = {
            let mut inner = self.inner.lock();
            let pos = inner.queue.iter().position(|q| q.session.id == session_id);
            pos.map(|i| inner.queue.remove(i).unwrap())
        };
        if let Some(queued) = queued {
            self.finalize_pending_cancel(queued.session).await;
            return CancelOutcome::Accepted;
        }

        let outcome = {
            let inner = self.inner.lock();
            inner.sessions.get(session_id).map(|h| {
                let terminal = h.snapshot.lock().state.is_terminal();
                (terminal, h.cancel.clone())
            })
        };
        match outcome {
            None => CancelOutcome::NotFound,
            Some((true, _)) => CancelOutcome::AlreadyTerminal,
            Some((false, token)) => {
                token.cancel();
                CancelOutcome::Accepted
            }
        }
    }

    async fn finalize_pending_cancel(self: &Arc<Self>, mut session: Session) {
        session.transition(SessionState::Cancelled);
        let event = ProgressEvent {
            session_id: session.id.clone(),
            sequence: 1,
            kind: EventKind::SessionCancelled,
            subtask: None,
            session_state: session.state,
            message: "cancelled before planning began".to_string(),
            emitted_at: OffsetDateTime::now_utc(),
        };
        if let Err(e) = self.history.append(&session.id, &event).await {
            log::error!("history append failed for session {}: {e}", session.id);
        }
        self.bus.publish(event);
        let completed_at = session.completed_at.expect("transition sets completed_at");
        if let Err(e) = self.history.finalize(&session.id, SessionState::Cancelled, completed_at).await {
            log::error!("history finalize failed for session {}: {e}", session.id);
        }
        if let Some(handle) = self.inner.lock().sessions.get(&session.id) {
            *handle.snapshot.lock() = session.snapshot();
        }
    }

    /// The live view of a session known to this process. `None` means
    /// the session id was never admitted in this process's lifetime;
    /// callers wanting historical detail for a past process should
    /// consult the History Store instead.
    pub fn get(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.inner.lock().sessions.get(session_id).map(|h| h.snapshot.lock().clone())
    }

    pub fn subscribe(&self, session_id: &str) -> Option<EventStream> {
        self.bus.subscribe(session_id)
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }
}
