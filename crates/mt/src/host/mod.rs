// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host-side plumbing inside the coordinator: subprocess launch, the
//! per-session IPC client, orphan reclaim, and the session task that routes
//! host events into the registry and broker.

pub mod client;
pub mod reclaim;
pub mod spawn;

pub use client::{HostClient, HostEvent};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use mtwire::session::SessionId;

use crate::broker::OutputEvent;
use crate::store::Store;

/// Reconnect attempt cadence while a live host is detached.
const RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// Live IPC clients, one per attached session.
#[derive(Default)]
pub struct ClientMap {
    inner: RwLock<HashMap<SessionId, HostClient>>,
}

impl ClientMap {
    pub fn get(&self, id: &SessionId) -> Option<HostClient> {
        self.inner.read().get(id).cloned()
    }

    pub fn insert(&self, id: SessionId, client: HostClient) {
        if let Some(prev) = self.inner.write().insert(id, client) {
            // Invariant: one coordinator↔host connection per session.
            prev.cancel();
        }
    }

    pub fn remove(&self, id: &SessionId) -> Option<HostClient> {
        self.inner.write().remove(id)
    }

    pub fn cancel_all(&self) {
        for client in self.inner.write().values() {
            client.cancel();
        }
    }
}

/// Spawn the task that owns a session's event stream.
pub fn spawn_session_task(
    store: Arc<Store>,
    id: SessionId,
    events: mpsc::Receiver<HostEvent>,
) {
    tokio::spawn(async move {
        run_session_task(store, id, events).await;
    });
}

/// Route host events into the broker and registry until the connection
/// ends, then run the detach/reclaim policy.
async fn run_session_task(
    store: Arc<Store>,
    id: SessionId,
    mut events: mpsc::Receiver<HostEvent>,
) {
    loop {
        let event = tokio::select! {
            _ = store.shutdown.cancelled() => return,
            event = events.recv() => event,
        };

        match event {
            Some(HostEvent::Output { cols, rows, data }) => {
                store.broker.publish(OutputEvent { id: id.clone(), cols, rows, data });
            }
            Some(HostEvent::State(change)) => {
                store.registry.update_state(&id, &change);
            }
            Some(HostEvent::Foreground(fg)) => {
                store.registry.set_foreground(&id, fg);
            }
            Some(HostEvent::Process(event)) => {
                trace!(session = %id, ?event, "process event");
            }
            Some(HostEvent::Snapshot(tree)) => {
                trace!(session = %id, descendants = tree.descendants.len(), "process snapshot");
            }
            Some(HostEvent::Disconnected) | None => break,
        }
    }

    if store.shutdown.is_cancelled() || !store.registry.contains(&id) {
        // Deliberate close or coordinator shutdown; nothing to recover.
        store.clients.remove(&id);
        return;
    }

    handle_detach(store, id).await;
}

/// Connection lost: reattach while the host process is alive, otherwise
/// mark the session lost and let the janitor collect it after the grace
/// period.
async fn handle_detach(store: Arc<Store>, id: SessionId) {
    store.clients.remove(&id);

    let Some(pid) = store.registry.host_pid(&id) else { return };
    if !spawn::host_alive(pid) {
        store.registry.mark_lost(&id);
        return;
    }

    info!(session = %id, pid, "host connection lost, will reattach");
    store.registry.detach(&id);

    let socket = spawn::socket_path(&store.config, &id);
    let deadline = tokio::time::Instant::now() + store.config.detach_grace();

    loop {
        tokio::select! {
            _ = store.shutdown.cancelled() => return,
            _ = tokio::time::sleep(RECONNECT_INTERVAL) => {}
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(session = %id, "reattach window expired");
            store.registry.mark_lost(&id);
            return;
        }
        if !spawn::host_alive(pid) {
            store.registry.mark_lost(&id);
            return;
        }

        match HostClient::connect(id.clone(), &socket).await {
            Ok((client, events)) => match client.get_info().await {
                Ok(info) => {
                    store.registry.reattach(&id, info);
                    store.clients.insert(id.clone(), client);
                    spawn_session_task(store, id, events);
                    return;
                }
                Err(e) => {
                    debug!(session = %id, "reattach handshake failed: {e}");
                    client.cancel();
                }
            },
            Err(e) => {
                debug!(session = %id, "reattach connect failed: {e}");
            }
        }
    }
}

/// Janitor: remove detached sessions whose grace period expired.
pub async fn run_janitor(store: Arc<Store>) {
    loop {
        tokio::select! {
            _ = store.shutdown.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
        }
        for id in store.registry.expired_detached(store.config.detach_grace()) {
            info!(session = %id, "removing session after detach grace period");
            if let Some(client) = store.clients.remove(&id) {
                client.cancel();
            }
            store.registry.close(&id);
        }
    }
}
