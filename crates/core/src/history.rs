//! History Store (spec.md §4.6): durable, append-only, per-session
//! record.
//!
//! Encoded as one JSON-lines file per session under a configured root
//! directory, in the spirit of the teacher's file-oriented session
//! persistence. One JSON object per line tolerates partial writes: a
//! truncated trailing line simply fails to parse and is skipped, per
//! spec's "readers never see a truncated event".

use crate::error::HistoryError;
use crate::event::ProgressEvent;
use crate::session::SessionState;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "record_type", rename_all = "snake_case")]
enum Line {
    Header {
        session_id: String,
        instruction: String,
        #[serde(with = "time::serde::rfc3339")]
        created_at: OffsetDateTime,
    },
    Event {
        event: ProgressEvent,
    },
    Finalize {
        terminal_state: SessionState,
        #[serde(with = "time::serde::rfc3339")]
        completed_at: OffsetDateTime,
    },
}

/// Newest-first listing entry (spec §4.6 "list").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub instruction: String,
    pub state: Option<SessionState>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub subtask_count: usize,
}

/// Full, reconstructed session record (spec §4.6 "get").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullSession {
    pub session_id: String,
    pub instruction: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub events: Vec<ProgressEvent>,
    pub terminal_state: Option<SessionState>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

/// Per-session write-side bookkeeping, held only in memory: the
/// authoritative state always lives in the file, but idempotent append
/// needs to know the last sequence written without re-reading the file
/// on every call.
#[derive(Default)]
struct SessionMeta {
    last_sequence: u64,
}

pub struct HistoryStore {
    root: PathBuf,
    write_state: Mutex<HashMap<String, SessionMeta>>,
}

impl HistoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_state: Mutex::new(HashMap::new()),
        }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("{session_id}.jsonl"))
    }

    async fn append_line(&self, session_id: &str, line: &Line) -> Result<(), HistoryError> {
        let text = serde_json::to_string(line)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(session_id))
            .await?;
        file.write_all(text.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }

    /// Read every parseable line of a session's file, silently dropping
    /// any line that fails to deserialize (a crash mid-write leaves at
    /// most one such trailing line).
    async fn read_lines(&self, session_id: &str) -> Result<Vec<Line>, HistoryError> {
        let file = match tokio::fs::File::open(self.path_for(session_id)).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(HistoryError::NotFound(session_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let mut reader = BufReader::new(file).lines();
        let mut out = Vec::new();
        while let Some(raw) = reader.next_line().await? {
            if let Ok(line) = serde_json::from_str::<Line>(&raw) {
                out.push(line);
            }
        }
        Ok(out)
    }

    /// Create a new durable record for a session. Creates the root
    /// directory on first use.
    pub async fn open(
        &self,
        session_id: &str,
        instruction: &str,
        created_at: OffsetDateTime,
    ) -> Result<(), HistoryError> {
        tokio::fs::create_dir_all(&self.root).await?;
        self.append_line(
            session_id,
            &Line::Header {
                session_id: session_id.to_string(),
                instruction: instruction.to_string(),
                created_at,
            },
        )
        .await?;
        self.write_state
            .lock()
            .insert(session_id.to_string(), SessionMeta::default());
        Ok(())
    }

    /// Append an event. Idempotent on `(session_id, sequence)`: a
    /// sequence number at or below the last one written for this
    /// session in this process is a silent no-op.
    pub async fn append(&self, session_id: &str, event: &ProgressEvent) -> Result<(), HistoryError> {
        {
            let mut state = self.write_state.lock();
            let meta = state.entry(session_id.to_string()).or_default();
            if event.sequence <= meta.last_sequence && meta.last_sequence != 0 {
                return Ok(());
            }
            meta.last_sequence = event.sequence;
        }
        self.append_line(session_id, &Line::Event { event: event.clone() }).await
    }

    /// Write the terminal marker.
    pub async fn finalize(
        &self,
        session_id: &str,
        terminal_state: SessionState,
        completed_at: OffsetDateTime,
    ) -> Result<(), HistoryError> {
        self.append_line(
            session_id,
            &Line::Finalize {
                terminal_state,
                completed_at,
            },
        )
        .await
    }

    /// Full reconstructed record for one session.
    pub async fn get(&self, session_id: &str) -> Result<FullSession, HistoryError> {
        let lines = self.read_lines(session_id).await?;
        let mut header = None;
        let mut events = Vec::new();
        let mut terminal_state = None;
        let mut completed_at = None;
        for line in lines {
            match line {
                Line::Header {
                    session_id,
                    instruction,
                    created_at,
                } => header = Some((session_id, instruction, created_at)),
                Line::Event { event } => events.push(event),
                Line::Finalize {
                    terminal_state: ts,
                    completed_at: ca,
                } => {
                    terminal_state = Some(ts);
                    completed_at = Some(ca);
                }
            }
        }
        let (session_id, instruction, created_at) =
            header.ok_or_else(|| HistoryError::NotFound(session_id.to_string()))?;
        Ok(FullSession {
            session_id,
            instruction,
            created_at,
            events,
            terminal_state,
            completed_at,
        })
    }

    /// Newest-first listing, paged by `created_at`.
    pub async fn list(&self, limit: Option<usize>, before: Option<OffsetDateTime>) -> Result<Vec<SessionSummary>, HistoryError> {
        let mut entries = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Some(session_id) = name.strip_suffix(".jsonl") else {
                continue;
            };
            let Ok(full) = self.get(session_id).await else {
                continue;
            };
            if let Some(cutoff) = before
                && full.created_at >= cutoff
            {
                continue;
            }
            let subtask_count = full
                .events
                .iter()
                .filter_map(|e| e.subtask.as_ref().map(|s| s.index))
                .max()
                .map(|m| m + 1)
                .unwrap_or(0);
            entries.push(SessionSummary {
                session_id: full.session_id,
                instruction: full.instruction,
                state: full.terminal_state,
                created_at: full.created_at,
                completed_at: full.completed_at,
                subtask_count,
            });
        }
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
