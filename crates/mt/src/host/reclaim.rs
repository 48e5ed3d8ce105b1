// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orphan reclaim.
//!
//! Hosts outlive the coordinator. On startup the coordinator enumerates the
//! runtime directory for `midterm-tty-*` sockets, dials each, and adopts
//! every host that answers the `GetInfo` handshake. Stale socket files left
//! by dead hosts are removed.

use std::sync::Arc;

use tracing::{debug, info, warn};

use mtwire::endpoint;

use crate::host::{spawn_session_task, HostClient};
use crate::store::Store;

/// Adopt every reachable orphan host. Returns how many were reclaimed.
pub async fn reclaim_orphans(store: &Arc<Store>) -> usize {
    let runtime_dir = store.config.runtime_dir();
    let mut adopted = 0;

    for (id, path) in endpoint::enumerate_sockets(&runtime_dir) {
        if store.registry.contains(&id) {
            continue;
        }

        let (client, events) = match HostClient::connect(id.clone(), &path).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(session = %id, "stale endpoint, removing: {e}");
                let _ = std::fs::remove_file(&path);
                continue;
            }
        };

        let info = match client.get_info().await {
            Ok(info) => info,
            Err(e) => {
                warn!(session = %id, "orphan handshake failed: {e}");
                client.cancel();
                continue;
            }
        };

        if info.id != id {
            warn!(session = %id, reported = %info.id, "endpoint/session id mismatch, skipping");
            client.cancel();
            continue;
        }

        if store.registry.reserve(&id).is_err() {
            client.cancel();
            continue;
        }
        if let Err(e) = store.registry.attach_host(&id, info) {
            warn!(session = %id, "orphan adoption failed: {e}");
            store.registry.abort_spawn(&id);
            client.cancel();
            continue;
        }
        store.clients.insert(id.clone(), client);
        spawn_session_task(Arc::clone(store), id.clone(), events);
        info!(session = %id, "orphan session reclaimed");
        adopted += 1;
    }

    adopted
}
