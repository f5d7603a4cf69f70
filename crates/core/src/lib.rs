//! Execution-orchestration core of a desktop automation agent:
//! admission, semantic plan caching, session running with retry and
//! verification, per-session event broadcast, and durable history.
//!
//! External collaborators — the desktop automation backend, the remote
//! planner, the embedding provider, and the HTTP/WebSocket transport —
//! are not implemented here; see [`traits`] for the capability
//! boundaries this crate consumes.

pub mod admission;
pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod event_bus;
pub mod history;
pub mod instruction;
pub mod plan;
pub mod retry;
pub mod runner;
pub mod session;
pub mod session_manager;
pub mod traits;

pub use cache::PlanCache;
pub use config::Config;
pub use event_bus::EventBus;
pub use history::HistoryStore;
pub use runner::{CancelSignal, CancelToken, PlanRunner};
pub use session_manager::{CancelOutcome, SessionManager};
