//! End-to-end scenarios against the public `SessionManager` surface,
//! wiring mock `Planner`/`ActionExecutor`/`Embedder`/`Observer`
//! implementations the way a caller outside this crate would.

use async_trait::async_trait;
use deskagent_core::config::Config;
use deskagent_core::error::{AdmissionError, ExecutionError, PlanningError};
use deskagent_core::event::EventKind;
use deskagent_core::event_bus::{EventBus, NextEvent};
use deskagent_core::history::HistoryStore;
use deskagent_core::plan::{ArgValue, Embedding, FailurePolicy, Plan, ToolCall};
use deskagent_core::session::SessionState;
use deskagent_core::traits::{ActionExecutor, Embedder, ExecutionOutcome, NoopObserver, Observer, Planner, ToolCatalogEntry};
use deskagent_core::{CancelOutcome, PlanCache, PlanRunner, SessionManager};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn call(name: &str) -> ToolCall {
    ToolCall {
        tool_name: name.to_string(),
        arguments: BTreeMap::new(),
        description: format!("run {name}"),
        element_locator: None,
        coordinates: None,
        drives_desktop: true,
    }
}

struct OneStepPlanner {
    tool_name: String,
    policy: FailurePolicy,
}

#[async_trait]
impl Planner for OneStepPlanner {
    async fn plan(&self, _instruction: &str, _catalog: &[ToolCatalogEntry]) -> Result<Plan, PlanningError> {
        Ok(Plan::new(vec![call(&self.tool_name)], self.policy).unwrap())
    }
}

struct FlakyExecutor {
    fail_times: Mutex<usize>,
}

#[async_trait]
impl ActionExecutor for FlakyExecutor {
    async fn execute(&self, _call: &ToolCall) -> Result<ExecutionOutcome, ExecutionError> {
        let mut remaining = self.fail_times.lock();
        if *remaining > 0 {
            *remaining -= 1;
            Err(ExecutionError::Transient("flaky".to_string()))
        } else {
            Ok(ExecutionOutcome { output: "ok".to_string() })
        }
    }
}

struct AlwaysFailExecutor;
#[async_trait]
impl ActionExecutor for AlwaysFailExecutor {
    async fn execute(&self, _call: &ToolCall) -> Result<ExecutionOutcome, ExecutionError> {
        Err(ExecutionError::Transient("down".to_string()))
    }
}

struct NoEmbedder;
#[async_trait]
impl Embedder for NoEmbedder {
    async fn embed(&self, _text: &str) -> Result<Embedding, String> {
        Err("no embedder".to_string())
    }
}

fn harness(
    config: Config,
    planner: Arc<dyn Planner>,
    executor: Arc<dyn ActionExecutor>,
) -> (Arc<SessionManager>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(config);
    let history = Arc::new(HistoryStore::new(dir.path().to_path_buf()));
    let bus = Arc::new(EventBus::new(config.sub_buf, config.t_grace()));
    let cache = Arc::new(PlanCache::new(config.max_cache_size, config.sim_threshold, config.cache_ttl()));
    let embedder: Arc<dyn Embedder> = Arc::new(NoEmbedder);
    let observer: Arc<dyn Observer> = Arc::new(NoopObserver);
    let runner = Arc::new(PlanRunner::new(
        config.clone(),
        cache,
        history.clone(),
        bus.clone(),
        planner,
        executor,
        embedder,
        observer,
        vec![ToolCatalogEntry {
            tool_name: "launch_app".to_string(),
            description: "launch an application".to_string(),
        }],
    ));
    (SessionManager::new(config, history, bus, runner), dir)
}

async fn drain_until_terminal(manager: &Arc<SessionManager>, session_id: &str) -> Vec<EventKind> {
    let mut stream = manager.subscribe(session_id).expect("session has a live stream");
    let mut kinds = Vec::new();
    loop {
        match stream.next().await {
            NextEvent::Event(event) => {
                let terminal = event.is_terminal();
                kinds.push(event.kind);
                if terminal {
                    break;
                }
            }
            NextEvent::Lagged | NextEvent::Closed => break,
        }
    }
    kinds
}

fn fast_config() -> Config {
    Config {
        r_plan: 3,
        r_step: 3,
        b_plan_ms: 1,
        b_step_ms: 1,
        t_plan_secs: 5,
        t_step_secs: 5,
        ..Config::default()
    }
}

/// Scenario: plain success, one subtask, no retries needed.
#[tokio::test]
async fn plain_success_runs_to_completion() {
    let planner: Arc<dyn Planner> = Arc::new(OneStepPlanner {
        tool_name: "launch_app".to_string(),
        policy: FailurePolicy::FailFast,
    });
    let executor: Arc<dyn ActionExecutor> = Arc::new(FlakyExecutor { fail_times: Mutex::new(0) });
    let (manager, _dir) = harness(fast_config(), planner, executor);

    let session_id = manager.start("open notepad").await.unwrap();
    let kinds = drain_until_terminal(&manager, &session_id).await;

    assert!(matches!(kinds.last(), Some(EventKind::SessionCompleted)));
    let snapshot = manager.get(&session_id).unwrap();
    assert_eq!(snapshot.state, SessionState::Completed);

    let record = manager.history().get(&session_id).await.unwrap();
    assert_eq!(record.terminal_state, Some(SessionState::Completed));
}

/// Scenario: the admission gate rejects before any session is created.
#[tokio::test]
async fn validation_rejects_empty_instruction() {
    let planner: Arc<dyn Planner> = Arc::new(OneStepPlanner {
        tool_name: "launch_app".to_string(),
        policy: FailurePolicy::FailFast,
    });
    let executor: Arc<dyn ActionExecutor> = Arc::new(AlwaysFailExecutor);
    let (manager, _dir) = harness(fast_config(), planner, executor);

    let err = manager.start("   ").await.unwrap_err();
    assert!(matches!(err, AdmissionError::Rejected(_)));
}

/// Scenario: the concurrency slot and queue are both exhausted.
#[tokio::test]
async fn backpressure_rejects_once_queue_is_full() {
    let planner: Arc<dyn Planner> = Arc::new(OneStepPlanner {
        tool_name: "launch_app".to_string(),
        policy: FailurePolicy::FailFast,
    });
    // An executor that never returns keeps the one concurrency slot
    // occupied indefinitely so the queue fills deterministically.
    struct Never;
    #[async_trait]
    impl ActionExecutor for Never {
        async fn execute(&self, _call: &ToolCall) -> Result<ExecutionOutcome, ExecutionError> {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }
    let config = Config {
        max_concurrent: 1,
        queue_cap: 1,
        ..fast_config()
    };
    let (manager, _dir) = harness(config, planner, Arc::new(Never));

    let _first = manager.start("first").await.unwrap();
    let _second = manager.start("second").await.unwrap();
    let third = manager.start("third").await;
    assert!(matches!(third, Err(AdmissionError::BackpressureFull)));
}

/// Scenario: a subtask fails twice then succeeds, within the retry budget.
#[tokio::test]
async fn retry_then_succeed_within_budget() {
    let planner: Arc<dyn Planner> = Arc::new(OneStepPlanner {
        tool_name: "launch_app".to_string(),
        policy: FailurePolicy::FailFast,
    });
    let executor: Arc<dyn ActionExecutor> = Arc::new(FlakyExecutor { fail_times: Mutex::new(2) });
    let (manager, _dir) = harness(fast_config(), planner, executor);

    let session_id = manager.start("open notepad").await.unwrap();
    let kinds = drain_until_terminal(&manager, &session_id).await;
    assert!(matches!(kinds.last(), Some(EventKind::SessionCompleted)));

    let record = manager.history().get(&session_id).await.unwrap();
    assert_eq!(record.terminal_state, Some(SessionState::Completed));
}

/// Scenario: retries exhaust and the fail-fast policy ends the session.
#[tokio::test]
async fn retry_exhausted_fails_fast() {
    let planner: Arc<dyn Planner> = Arc::new(OneStepPlanner {
        tool_name: "launch_app".to_string(),
        policy: FailurePolicy::FailFast,
    });
    let executor: Arc<dyn ActionExecutor> = Arc::new(AlwaysFailExecutor);
    let (manager, _dir) = harness(fast_config(), planner, executor);

    let session_id = manager.start("open notepad").await.unwrap();
    let kinds = drain_until_terminal(&manager, &session_id).await;
    assert!(matches!(kinds.last(), Some(EventKind::SessionFailed)));

    let snapshot = manager.get(&session_id).unwrap();
    assert_eq!(snapshot.state, SessionState::Failed);
    assert!(snapshot.error.is_some());
}

/// Scenario: cancellation mid-run is observed cooperatively by the
/// runner and the session ends Cancelled, not Completed or Failed.
#[tokio::test]
async fn cancellation_mid_run_yields_cancelled() {
    struct SlowExecutor;
    #[async_trait]
    impl ActionExecutor for SlowExecutor {
        async fn execute(&self, _call: &ToolCall) -> Result<ExecutionOutcome, ExecutionError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(ExecutionOutcome { output: "ok".to_string() })
        }
    }
    let planner: Arc<dyn Planner> = Arc::new(OneStepPlanner {
        tool_name: "launch_app".to_string(),
        policy: FailurePolicy::FailFast,
    });
    let (manager, _dir) = harness(fast_config(), planner, Arc::new(SlowExecutor));

    let session_id = manager.start("open notepad").await.unwrap();
    let outcome = manager.cancel(&session_id).await;
    assert_eq!(outcome, CancelOutcome::Accepted);

    for _ in 0..200 {
        if let Some(snap) = manager.get(&session_id)
            && snap.state.is_terminal()
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let snapshot = manager.get(&session_id).unwrap();
    assert_eq!(snapshot.state, SessionState::Cancelled);
}

/// Scenario: cancelling a still-queued (Pending) session is immediate —
/// it never reaches Planning at all.
#[tokio::test]
async fn cancellation_of_pending_session_is_immediate() {
    struct Never;
    #[async_trait]
    impl ActionExecutor for Never {
        async fn execute(&self, _call: &ToolCall) -> Result<ExecutionOutcome, ExecutionError> {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }
    let planner: Arc<dyn Planner> = Arc::new(OneStepPlanner {
        tool_name: "launch_app".to_string(),
        policy: FailurePolicy::FailFast,
    });
    let config = Config {
        max_concurrent: 1,
        queue_cap: 5,
        ..fast_config()
    };
    let (manager, _dir) = harness(config, planner, Arc::new(Never));

    let _occupying = manager.start("occupying").await.unwrap();
    let queued_id = manager.start("queued").await.unwrap();

    let outcome = manager.cancel(&queued_id).await;
    assert_eq!(outcome, CancelOutcome::Accepted);
    let snapshot = manager.get(&queued_id).unwrap();
    assert_eq!(snapshot.state, SessionState::Cancelled);

    let record = manager.history().get(&queued_id).await.unwrap();
    assert!(!record.events.iter().any(|e| matches!(e.kind, EventKind::SessionStarted)));
}

/// Scenario: a semantically equivalent instruction hits the plan cache
/// and skips the planner on the second submission.
#[tokio::test]
async fn semantic_cache_hit_skips_replanning() {
    struct CountingPlanner {
        calls: Mutex<usize>,
    }
    #[async_trait]
    impl Planner for CountingPlanner {
        async fn plan(&self, _instruction: &str, _catalog: &[ToolCatalogEntry]) -> Result<Plan, PlanningError> {
            *self.calls.lock() += 1;
            Ok(Plan::new(vec![call("launch_app")], FailurePolicy::FailFast).unwrap())
        }
    }
    let planner = Arc::new(CountingPlanner { calls: Mutex::new(0) });
    let executor: Arc<dyn ActionExecutor> = Arc::new(FlakyExecutor { fail_times: Mutex::new(0) });
    let (manager, _dir) = harness(fast_config(), planner.clone(), executor);

    let first = manager.start("open notepad").await.unwrap();
    drain_until_terminal(&manager, &first).await;
    let second = manager.start("open notepad").await.unwrap();
    let kinds = drain_until_terminal(&manager, &second).await;

    // Exact-match fingerprint hit on the second call: the planner is
    // only ever invoked for the first submission.
    assert_eq!(*planner.calls.lock(), 1);
    assert_eq!(manager.get(&second).unwrap().state, SessionState::Completed);
    // The cache hit is observable as a progress event, not just a log line.
    assert!(kinds.iter().any(|k| matches!(k, EventKind::SubtaskProgress)));
}

/// Scenario: ContinueOnError runs every subtask even after one fails.
#[tokio::test]
async fn continue_on_error_runs_every_subtask() {
    struct TwoStepPlanner;
    #[async_trait]
    impl Planner for TwoStepPlanner {
        async fn plan(&self, _instruction: &str, _catalog: &[ToolCatalogEntry]) -> Result<Plan, PlanningError> {
            Ok(Plan::new(vec![call("click"), call("type_text")], FailurePolicy::ContinueOnError).unwrap())
        }
    }
    let planner: Arc<dyn Planner> = Arc::new(TwoStepPlanner);
    let executor: Arc<dyn ActionExecutor> = Arc::new(AlwaysFailExecutor);
    let (manager, _dir) = harness(fast_config(), planner, executor);

    let session_id = manager.start("do two things").await.unwrap();
    let kinds = drain_until_terminal(&manager, &session_id).await;
    let failed_count = kinds.iter().filter(|k| matches!(k, EventKind::SubtaskFailed)).count();
    assert_eq!(failed_count, 2);
    assert!(matches!(kinds.last(), Some(EventKind::SessionCompleted)));
}
