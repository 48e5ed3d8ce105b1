// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Output fan-out broker.
//!
//! Per-session IPC clients publish PTY output here; every browser mux
//! connection subscribes. A slow connection lags the broadcast channel and
//! recovers through the resync path; it never stalls the hosts or the
//! other connections.

use bytes::Bytes;
use tokio::sync::broadcast;

use mtwire::session::SessionId;

/// PTY output tagged with its session and the dims at write time.
#[derive(Debug, Clone)]
pub struct OutputEvent {
    pub id: SessionId,
    pub cols: u16,
    pub rows: u16,
    pub data: Bytes,
}

#[derive(Clone)]
pub struct Broker {
    tx: broadcast::Sender<OutputEvent>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutputEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: OutputEvent) {
        let _ = self.tx.send(event);
    }
}
