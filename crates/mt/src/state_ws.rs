// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! State channel: JSON session-list updates over `GET /ws/state`.
//!
//! Late subscribers get a full snapshot on connect; afterwards every
//! registry mutation schedules an emission, coalesced in a ~50 ms debounce
//! window so a burst of changes produces one frame.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tracing::debug;

use crate::mux::MuxQuery;
use crate::registry::SessionSnapshot;
use crate::store::Store;

/// Mutation-burst coalesce window.
pub const DEBOUNCE: Duration = Duration::from_millis(50);

/// Full state-channel payload.
#[derive(Debug, Serialize)]
pub struct StateSnapshot {
    pub sessions: Vec<SessionSnapshot>,
}

/// WebSocket upgrade handler for `GET /ws/state`.
pub async fn ws_state_handler(
    State(store): State<Arc<Store>>,
    Query(query): Query<MuxQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    store.reload_settings();
    if !store.authorized(query.token.as_deref()) {
        return (
            axum::http::StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({"error": "unauthorized"})),
        )
            .into_response();
    }
    ws.on_upgrade(move |socket| handle_state_connection(store, socket)).into_response()
}

async fn handle_state_connection(store: Arc<Store>, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut registry_rx = store.registry.subscribe();

    // Full snapshot on connect.
    if send_snapshot(&store, &mut ws_tx).await.is_err() {
        return;
    }

    let mut deadline: Option<tokio::time::Instant> = None;

    loop {
        tokio::select! {
            _ = store.shutdown.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                return;
            }

            event = registry_rx.recv() => {
                use tokio::sync::broadcast::error::RecvError;
                match event {
                    // Any mutation (or a lag, which implies mutations were
                    // missed) schedules a debounced snapshot.
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        deadline.get_or_insert_with(|| tokio::time::Instant::now() + DEBOUNCE);
                    }
                    Err(RecvError::Closed) => return,
                }
            }

            _ = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            }, if deadline.is_some() => {
                deadline = None;
                if send_snapshot(&store, &mut ws_tx).await.is_err() {
                    return;
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(_)) => {} // state channel is server → client only
                    Some(Err(e)) => {
                        debug!("state socket error: {e}");
                        return;
                    }
                }
            }
        }
    }
}

async fn send_snapshot<S>(store: &Store, ws_tx: &mut S) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let snapshot = StateSnapshot { sessions: store.list_sessions() };
    let Ok(json) = serde_json::to_string(&snapshot) else {
        return Err(());
    };
    ws_tx.send(Message::Text(json.into())).await.map_err(|_| ())
}
