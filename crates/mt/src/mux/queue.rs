// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection prioritized send queue.
//!
//! Output is partitioned by session and drained FIFO within each
//! partition. The active session gets a weighted share of the socket;
//! background sessions round-robin the rest. Under a soft watermark the
//! queue coalesces adjacent background chunks with equal dims, and a
//! coalesced batch past the compression threshold is flagged for gzip.
//! A session whose backlog exceeds the hard limit has its queue dropped
//! and a single Resync scheduled; the client recovers via BufferRequest.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use indexmap::IndexMap;

use mtwire::session::SessionId;

/// Tuning knobs, all exposed through the coordinator CLI.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Total queued bytes above which background output is coalesced.
    pub soft_watermark: usize,
    /// Coalesced batch size at which compression kicks in.
    pub compress_min: usize,
    /// Per-session queued-byte cap; past it the backlog is dropped.
    pub session_hard_limit: usize,
    /// Frames the active session may send per background frame.
    pub active_weight: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            soft_watermark: 256 * 1024,
            compress_min: 4 * 1024,
            session_hard_limit: 1024 * 1024,
            active_weight: 4,
        }
    }
}

/// One frame ready to encode onto the socket.
#[derive(Debug, PartialEq)]
pub enum OutFrame {
    Resync { session: SessionId },
    Output { session: SessionId, cols: u16, rows: u16, data: Bytes, compress: bool },
}

#[derive(Debug)]
struct Chunk {
    cols: u16,
    rows: u16,
    data: BytesMut,
    coalesced: bool,
}

#[derive(Debug, Default)]
struct SessionQueue {
    chunks: VecDeque<Chunk>,
    bytes: usize,
    /// A Resync frame must be sent before any further output.
    resync_pending: bool,
    /// Resync was issued and BufferRequest has not arrived yet; suppresses
    /// further Resyncs so overflow emits exactly one.
    awaiting_replay: bool,
}

pub struct SendQueue {
    sessions: IndexMap<SessionId, SessionQueue>,
    total_bytes: usize,
    active: Option<SessionId>,
    active_credit: u32,
    rr_cursor: usize,
    config: QueueConfig,
}

impl SendQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            sessions: IndexMap::new(),
            total_bytes: 0,
            active: None,
            active_credit: config.active_weight,
            rr_cursor: 0,
            config,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.values().all(|q| q.chunks.is_empty() && !q.resync_pending)
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn set_active(&mut self, id: Option<SessionId>) {
        self.active = id;
        self.active_credit = self.config.active_weight;
    }

    pub fn active(&self) -> Option<&SessionId> {
        self.active.as_ref()
    }

    /// A BufferRequest arrived: replay is being served, re-arm the
    /// overflow-resync for this session.
    pub fn clear_resync(&mut self, id: &SessionId) {
        if let Some(queue) = self.sessions.get_mut(id) {
            queue.awaiting_replay = false;
        }
    }

    /// Force a resync for a session (used when the broker feed lagged and
    /// frames were lost upstream of the queue).
    pub fn force_resync(&mut self, id: &SessionId) {
        let queue = self.sessions.entry(id.clone()).or_default();
        if !queue.awaiting_replay {
            queue.resync_pending = true;
            queue.awaiting_replay = true;
        }
        self.total_bytes -= queue.bytes;
        queue.bytes = 0;
        queue.chunks.clear();
    }

    /// Remove a closed session's partition entirely.
    pub fn drop_session(&mut self, id: &SessionId) {
        if let Some(queue) = self.sessions.shift_remove(id) {
            self.total_bytes -= queue.bytes;
        }
    }

    /// Enqueue one output chunk.
    pub fn push(&mut self, id: &SessionId, cols: u16, rows: u16, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let over_soft = self.total_bytes > self.config.soft_watermark;
        let background = self.active.as_ref() != Some(id);
        let hard = self.config.session_hard_limit;

        let queue = self.sessions.entry(id.clone()).or_default();

        // Hard limit: drop this session's backlog, schedule one Resync.
        if queue.bytes + data.len() > hard {
            self.total_bytes -= queue.bytes;
            queue.bytes = 0;
            queue.chunks.clear();
            if !queue.awaiting_replay {
                queue.resync_pending = true;
                queue.awaiting_replay = true;
            }
            if data.len() > hard {
                // A single chunk larger than the cap cannot be queued at
                // all; the replay covers it.
                return;
            }
        }

        // Soft watermark: coalesce adjacent background chunks with equal
        // dims instead of growing the frame count.
        if over_soft && background {
            if let Some(last) = queue.chunks.back_mut() {
                if (last.cols, last.rows) == (cols, rows) {
                    last.data.extend_from_slice(data);
                    last.coalesced = true;
                    queue.bytes += data.len();
                    self.total_bytes += data.len();
                    return;
                }
            }
        }

        queue.chunks.push_back(Chunk {
            cols,
            rows,
            data: BytesMut::from(data),
            coalesced: false,
        });
        queue.bytes += data.len();
        self.total_bytes += data.len();
    }

    /// Dequeue the next frame to send, honoring priorities:
    /// resyncs first, then the weighted active session, then background
    /// round-robin.
    pub fn pop(&mut self) -> Option<OutFrame> {
        // Pending resyncs outrank everything.
        if let Some(id) = self
            .sessions
            .iter()
            .find(|(_, q)| q.resync_pending)
            .map(|(id, _)| id.clone())
        {
            if let Some(queue) = self.sessions.get_mut(&id) {
                queue.resync_pending = false;
            }
            return Some(OutFrame::Resync { session: id });
        }

        let active_has_data = self
            .active
            .as_ref()
            .and_then(|id| self.sessions.get(id))
            .map(|q| !q.chunks.is_empty())
            .unwrap_or(false);

        let serve_active = if active_has_data {
            if self.active_credit > 0 {
                true
            } else {
                // Credit exhausted: give one background frame a turn if
                // any exists, then refill.
                !self.background_has_data()
            }
        } else {
            false
        };

        let id = if serve_active {
            self.active_credit = self.active_credit.saturating_sub(1);
            self.active.clone()?
        } else {
            if active_has_data {
                self.active_credit = self.config.active_weight;
            }
            self.next_background()?
        };

        let queue = self.sessions.get_mut(&id)?;
        let chunk = queue.chunks.pop_front()?;
        queue.bytes -= chunk.data.len();
        self.total_bytes -= chunk.data.len();

        let compress = chunk.coalesced && chunk.data.len() >= self.config.compress_min;
        Some(OutFrame::Output {
            session: id,
            cols: chunk.cols,
            rows: chunk.rows,
            data: chunk.data.freeze(),
            compress,
        })
    }

    fn background_has_data(&self) -> bool {
        self.sessions
            .iter()
            .any(|(id, q)| Some(id) != self.active.as_ref() && !q.chunks.is_empty())
    }

    /// Next background session with data, round-robin from the cursor.
    fn next_background(&mut self) -> Option<SessionId> {
        let n = self.sessions.len();
        if n == 0 {
            return None;
        }
        for step in 0..n {
            let idx = (self.rr_cursor + step) % n;
            let Some((id, queue)) = self.sessions.get_index(idx) else { continue };
            if Some(id) != self.active.as_ref() && !queue.chunks.is_empty() {
                self.rr_cursor = (idx + 1) % n;
                return Some(id.clone());
            }
        }
        // Only the active session has data.
        self.active
            .as_ref()
            .filter(|id| {
                self.sessions.get(*id).map(|q| !q.chunks.is_empty()).unwrap_or(false)
            })
            .cloned()
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
