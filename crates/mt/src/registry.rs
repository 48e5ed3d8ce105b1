// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordinator session registry.
//!
//! The single piece of shared mutable state: an insertion-ordered map of
//! session records behind one lock. Mutations are serialized; readers get
//! cloned snapshots for fan-out. Every mutation emits a [`RegistryEvent`]
//! that drives the state channel and the mux SessionState frames.
//!
//! Per-session phases advance `Spawning → Handshaking → Running → Exiting →
//! Closed`; failures in the first two collapse straight to `Closed`.
//! Spawning and Handshaking sessions are hidden from snapshots, so clients
//! see a session appear atomically in `Running`.

use std::time::Instant;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use mtwire::ipc::StateChange;
use mtwire::session::{ForegroundProcess, SessionId, SessionInfo};

/// Exit code synthesized when a host dies without reporting one.
pub const EXIT_CODE_HOST_LOST: i32 = 255;

/// Lifecycle phase of a session inside the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Spawning,
    Handshaking,
    Running,
    Exiting,
    Closed,
}

impl SessionPhase {
    /// Whether `self → next` is a legal transition.
    pub fn can_advance(self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        matches!(
            (self, next),
            (Spawning, Handshaking)
                | (Handshaking, Running)
                | (Running, Exiting)
                | (Exiting, Running) // reattached host that is still running
                | (_, Closed)
        )
    }

    /// Hidden phases never appear in client-facing snapshots.
    pub fn visible(self) -> bool {
        matches!(self, SessionPhase::Running | SessionPhase::Exiting)
    }
}

/// Registry-internal record for one session.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub info: SessionInfo,
    pub phase: SessionPhase,
    pub detached: bool,
    pub detached_at: Option<Instant>,
}

/// Client-facing snapshot of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    #[serde(flatten)]
    pub info: SessionInfo,
    pub detached: bool,
    pub active: bool,
}

/// Broadcast on every registry mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Created(SessionId),
    Removed(SessionId),
    Updated(SessionId),
    Reordered,
    ActiveChanged(Option<SessionId>),
}

#[derive(Default)]
struct RegistryInner {
    sessions: IndexMap<SessionId, SessionRecord>,
    active: Option<SessionId>,
}

pub struct Registry {
    inner: RwLock<RegistryInner>,
    events: broadcast::Sender<RegistryEvent>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self { inner: RwLock::new(RegistryInner::default()), events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: RegistryEvent) {
        let _ = self.events.send(event);
    }

    /// Reserve an id for a session being spawned.
    ///
    /// Fails when the id is already present: ids are unique per
    /// coordinator lifetime and reused only after close.
    pub fn reserve(&self, id: &SessionId) -> anyhow::Result<()> {
        let mut inner = self.inner.write();
        if inner.sessions.contains_key(id) {
            anyhow::bail!("session id already registered: {id}");
        }
        inner.sessions.insert(
            id.clone(),
            SessionRecord {
                info: placeholder_info(id),
                phase: SessionPhase::Spawning,
                detached: false,
                detached_at: None,
            },
        );
        Ok(())
    }

    /// Generate an id not currently in the registry.
    pub fn fresh_id(&self) -> SessionId {
        let inner = self.inner.read();
        loop {
            let id = SessionId::generate();
            if !inner.sessions.contains_key(&id) {
                return id;
            }
        }
    }

    /// Mark a reserved session as mid-handshake.
    pub fn begin_handshake(&self, id: &SessionId) {
        let mut inner = self.inner.write();
        if let Some(record) = inner.sessions.get_mut(id) {
            if record.phase.can_advance(SessionPhase::Handshaking) {
                record.phase = SessionPhase::Handshaking;
            }
        }
    }

    /// Attach a host: store its descriptor and make the session visible.
    ///
    /// Used both after a fresh spawn handshake and for adopted orphans.
    pub fn attach_host(&self, id: &SessionId, info: SessionInfo) -> anyhow::Result<()> {
        let mut inner = self.inner.write();
        let Some(record) = inner.sessions.get_mut(id) else {
            anyhow::bail!("attach_host: unknown session {id}");
        };
        let target =
            if info.running { SessionPhase::Running } else { SessionPhase::Exiting };
        if record.phase == SessionPhase::Spawning {
            record.phase = SessionPhase::Handshaking;
        }
        if !record.phase.can_advance(target) && record.phase != target {
            anyhow::bail!("attach_host: illegal transition {:?} → {target:?}", record.phase);
        }
        record.info = info;
        record.phase = target;
        record.detached = false;
        record.detached_at = None;
        drop(inner);

        info!(session = %id, "host attached");
        self.emit(RegistryEvent::Created(id.clone()));
        Ok(())
    }

    /// Collapse a session that failed during spawn or handshake.
    pub fn abort_spawn(&self, id: &SessionId) {
        let removed = {
            let mut inner = self.inner.write();
            inner.sessions.shift_remove(id).is_some()
        };
        if removed {
            warn!(session = %id, "session spawn aborted");
        }
    }

    /// Apply a host state change. Running=false advances to Exiting; the
    /// exit code is recorded once and never changes afterwards.
    pub fn update_state(&self, id: &SessionId, change: &StateChange) {
        let mut inner = self.inner.write();
        let Some(record) = inner.sessions.get_mut(id) else { return };

        if let Some(ref cwd) = change.cwd {
            record.info.cwd = Some(cwd.clone());
        }
        record.info.name = change.name.clone().or_else(|| record.info.name.take());

        if record.info.running && !change.running {
            record.info.running = false;
            if record.info.exit_code.is_none() {
                record.info.exit_code = change.exit_code.or(Some(EXIT_CODE_HOST_LOST));
            }
            if record.phase.can_advance(SessionPhase::Exiting) {
                record.phase = SessionPhase::Exiting;
            }
        }
        drop(inner);
        self.emit(RegistryEvent::Updated(id.clone()));
    }

    /// Record acked dims.
    pub fn update_dims(&self, id: &SessionId, cols: u16, rows: u16) {
        {
            let mut inner = self.inner.write();
            let Some(record) = inner.sessions.get_mut(id) else { return };
            if (record.info.cols, record.info.rows) == (cols, rows) {
                return;
            }
            record.info.cols = cols;
            record.info.rows = rows;
        }
        self.emit(RegistryEvent::Updated(id.clone()));
    }

    /// Record a new foreground descriptor.
    pub fn set_foreground(&self, id: &SessionId, foreground: Option<ForegroundProcess>) {
        {
            let mut inner = self.inner.write();
            let Some(record) = inner.sessions.get_mut(id) else { return };
            if record.info.foreground == foreground {
                return;
            }
            record.info.foreground = foreground;
        }
        self.emit(RegistryEvent::Updated(id.clone()));
    }

    /// Record a rename (already acked by the host).
    pub fn rename(&self, id: &SessionId, name: Option<String>) {
        {
            let mut inner = self.inner.write();
            let Some(record) = inner.sessions.get_mut(id) else { return };
            record.info.name = name;
        }
        self.emit(RegistryEvent::Updated(id.clone()));
    }

    /// Mark a session's coordinator↔host connection as lost.
    pub fn detach(&self, id: &SessionId) {
        {
            let mut inner = self.inner.write();
            let Some(record) = inner.sessions.get_mut(id) else { return };
            record.detached = true;
            record.detached_at = Some(Instant::now());
        }
        debug!(session = %id, "host detached");
        self.emit(RegistryEvent::Updated(id.clone()));
    }

    /// Reattach a recovered host with its fresh descriptor.
    pub fn reattach(&self, id: &SessionId, info: SessionInfo) {
        {
            let mut inner = self.inner.write();
            let Some(record) = inner.sessions.get_mut(id) else { return };
            record.info = info;
            record.detached = false;
            record.detached_at = None;
            if !record.info.running && record.phase.can_advance(SessionPhase::Exiting) {
                record.phase = SessionPhase::Exiting;
            }
        }
        info!(session = %id, "host reattached");
        self.emit(RegistryEvent::Updated(id.clone()));
    }

    /// The host process died without a close handshake: the session stops
    /// running with a synthesized exit code and waits out the grace period.
    pub fn mark_lost(&self, id: &SessionId) {
        {
            let mut inner = self.inner.write();
            let Some(record) = inner.sessions.get_mut(id) else { return };
            record.detached = true;
            record.detached_at.get_or_insert_with(Instant::now);
            if record.info.running {
                record.info.running = false;
                record.info.exit_code.get_or_insert(EXIT_CODE_HOST_LOST);
            }
            if record.phase.can_advance(SessionPhase::Exiting) {
                record.phase = SessionPhase::Exiting;
            }
        }
        warn!(session = %id, "host lost");
        self.emit(RegistryEvent::Updated(id.clone()));
    }

    /// Remove a session after close acknowledgement (or forced close).
    pub fn close(&self, id: &SessionId) -> bool {
        let removed = {
            let mut inner = self.inner.write();
            let removed = inner.sessions.shift_remove(id).is_some();
            if inner.active.as_ref() == Some(id) {
                inner.active = None;
            }
            removed
        };
        if removed {
            info!(session = %id, "session closed");
            self.emit(RegistryEvent::Removed(id.clone()));
        }
        removed
    }

    /// Detached sessions whose grace period expired.
    pub fn expired_detached(&self, grace: std::time::Duration) -> Vec<SessionId> {
        let inner = self.inner.read();
        inner
            .sessions
            .iter()
            .filter(|(_, r)| {
                r.detached && r.detached_at.map(|t| t.elapsed() >= grace).unwrap_or(false)
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Explicit reorder. Ids absent from `order` keep their relative order
    /// behind the listed ones; unknown ids are ignored.
    pub fn reorder(&self, order: &[SessionId]) {
        {
            let mut inner = self.inner.write();
            let mut next = IndexMap::with_capacity(inner.sessions.len());
            for id in order {
                if let Some(record) = inner.sessions.shift_remove(id) {
                    next.insert(id.clone(), record);
                }
            }
            for (id, record) in inner.sessions.drain(..) {
                next.insert(id, record);
            }
            inner.sessions = next;
        }
        self.emit(RegistryEvent::Reordered);
    }

    /// Set (or clear) the active-session hint.
    pub fn set_active(&self, id: Option<SessionId>) {
        {
            let mut inner = self.inner.write();
            if let Some(ref id) = id {
                if !inner.sessions.contains_key(id) {
                    return;
                }
            }
            if inner.active == id {
                return;
            }
            inner.active = id.clone();
        }
        self.emit(RegistryEvent::ActiveChanged(id));
    }

    pub fn active(&self) -> Option<SessionId> {
        self.inner.read().active.clone()
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.inner.read().sessions.contains_key(id)
    }

    /// Snapshot of one visible session.
    pub fn get(&self, id: &SessionId) -> Option<SessionSnapshot> {
        let inner = self.inner.read();
        let record = inner.sessions.get(id)?;
        if !record.phase.visible() {
            return None;
        }
        Some(SessionSnapshot {
            info: record.info.clone(),
            detached: record.detached,
            active: inner.active.as_ref() == Some(id),
        })
    }

    /// Host pid for a session (any phase).
    pub fn host_pid(&self, id: &SessionId) -> Option<u32> {
        self.inner.read().sessions.get(id).map(|r| r.info.host_pid)
    }

    /// Insertion-ordered snapshot of all visible sessions.
    pub fn list(&self) -> Vec<SessionSnapshot> {
        let inner = self.inner.read();
        inner
            .sessions
            .iter()
            .filter(|(_, r)| r.phase.visible())
            .map(|(id, r)| SessionSnapshot {
                info: r.info.clone(),
                detached: r.detached,
                active: inner.active.as_ref() == Some(id),
            })
            .collect()
    }
}

/// Record contents before the host handshake fills in real data.
fn placeholder_info(id: &SessionId) -> SessionInfo {
    SessionInfo {
        id: id.clone(),
        shell: mtwire::session::ShellKind::Bash,
        cols: 0,
        rows: 0,
        running: false,
        exit_code: None,
        name: None,
        host_pid: 0,
        pty_pid: None,
        created_at_ms: 0,
        host_version: String::new(),
        cwd: None,
        foreground: None,
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
