//! Event Bus (spec.md §4.5): per-session ordered broadcast with replay.
//!
//! Grounded directly on the teacher's `agent::event_bus::EventBus`: a
//! `tokio::sync::broadcast` channel per session for live fan-out, guarded
//! by a `parking_lot::Mutex` registry. Unlike the teacher's bus, this one
//! also retains a bounded in-memory ring per session so a late subscriber
//! can replay everything emitted so far before splicing onto live
//! delivery, and keeps a terminated session's channel around for
//! `T_GRACE` before discarding it.

use crate::event::ProgressEvent;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

struct SessionChannel {
    sender: broadcast::Sender<ProgressEvent>,
    ring: VecDeque<ProgressEvent>,
    terminal_since: Option<Instant>,
}

impl SessionChannel {
    fn new(sub_buf: usize) -> Self {
        let (sender, _) = broadcast::channel(sub_buf.max(1));
        Self {
            sender,
            ring: VecDeque::new(),
            terminal_since: None,
        }
    }
}

/// The outcome of awaiting the next event on an [`EventStream`].
#[derive(Debug)]
pub enum NextEvent {
    Event(ProgressEvent),
    /// The subscriber fell behind the bus's per-subscriber buffer and was
    /// ejected (spec §4.5 "Backpressure"). The subscriber is responsible
    /// for reconnecting and replaying from the History Store.
    Lagged,
    /// The session's channel has been discarded (past `T_GRACE`, or the
    /// publisher dropped without emitting a terminal event).
    Closed,
}

/// A live subscription to one session's events: first drains the replay
/// buffer captured at subscribe time, then splices to live delivery with
/// no gap and no duplicate (spec §4.5 "Replay").
pub struct EventStream {
    replay: VecDeque<ProgressEvent>,
    pivot: u64,
    receiver: broadcast::Receiver<ProgressEvent>,
}

impl EventStream {
    pub async fn next(&mut self) -> NextEvent {
        if let Some(event) = self.replay.pop_front() {
            return NextEvent::Event(event);
        }
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.sequence > self.pivot => return NextEvent::Event(event),
                // Already delivered via the replay snapshot; skip the duplicate.
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => return NextEvent::Lagged,
                Err(broadcast::error::RecvError::Closed) => return NextEvent::Closed,
            }
        }
    }
}

pub struct EventBus {
    sessions: Mutex<HashMap<String, SessionChannel>>,
    sub_buf: usize,
    t_grace: Duration,
}

impl EventBus {
    pub fn new(sub_buf: usize, t_grace: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            sub_buf,
            t_grace,
        }
    }

    /// Opportunistic cleanup of sessions whose grace period has elapsed.
    /// Mirrors the cache's lazy TTL expiry: no background sweep, checked
    /// on the next access instead.
    fn prune_expired(&self, sessions: &mut HashMap<String, SessionChannel>) {
        let now = Instant::now();
        sessions.retain(|_, channel| match channel.terminal_since {
            Some(since) => now.saturating_duration_since(since) <= self.t_grace,
            None => true,
        });
    }

    /// Publish one event for its session, creating the session's channel
    /// on first use. Never blocks on subscribers (spec §4.5
    /// "Publication is non-blocking for the runner").
    pub fn publish(&self, event: ProgressEvent) {
        let mut sessions = self.sessions.lock();
        self.prune_expired(&mut sessions);
        let channel = sessions
            .entry(event.session_id.clone())
            .or_insert_with(|| SessionChannel::new(self.sub_buf));

        channel.ring.push_back(event.clone());
        while channel.ring.len() > self.sub_buf {
            channel.ring.pop_front();
        }
        if event.is_terminal() {
            channel.terminal_since = Some(Instant::now());
        }
        // No receivers is not an error here; the runner must not care
        // whether anyone is listening.
        let _ = channel.sender.send(event);
    }

    /// Subscribe to a session's events. Returns `None` if the session is
    /// unknown to the bus — either it never existed, or its grace
    /// period has elapsed (spec §8 "Subscribe after T_GRACE"); the
    /// caller falls through to the History Store.
    pub fn subscribe(&self, session_id: &str) -> Option<EventStream> {
        let mut sessions = self.sessions.lock();
        self.prune_expired(&mut sessions);
        let channel = sessions.get_mut(session_id)?;
        let replay: VecDeque<ProgressEvent> = channel.ring.iter().cloned().collect();
        let pivot = replay.back().map(|e| e.sequence).unwrap_or(0);
        let receiver = channel.sender.subscribe();
        Some(EventStream { replay, pivot, receiver })
    }
}
