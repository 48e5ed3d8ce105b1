// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broadcast channels for external collaborators.
//!
//! Settings, Git, and auth surfaces live outside the core; the core only
//! provides the registration API: a named channel whose publisher fans
//! typed JSON messages out to every authenticated client, each client
//! served by its own send queue with the same serialized-writes discipline
//! as the mux channel (one writer task per connection).

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::mux::MuxQuery;
use crate::store::Store;

/// Per-channel fan-out capacity.
const CHANNEL_CAPACITY: usize = 256;

/// Registry of named collaborator channels.
#[derive(Default)]
pub struct ChannelHub {
    channels: RwLock<HashMap<String, broadcast::Sender<Arc<str>>>>,
}

/// Publisher handle returned by [`ChannelHub::register`].
#[derive(Clone)]
pub struct ChannelPublisher {
    tx: broadcast::Sender<Arc<str>>,
}

impl ChannelPublisher {
    /// Publish a typed message to every connected client of this channel.
    pub fn publish<T: Serialize>(&self, message: &T) -> anyhow::Result<usize> {
        let json: Arc<str> = serde_json::to_string(message)?.into();
        Ok(self.tx.send(json).unwrap_or(0))
    }

    /// Currently connected client count.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl ChannelHub {
    /// Register (or look up) a named channel and get its publisher.
    pub fn register(&self, name: &str) -> ChannelPublisher {
        let mut channels = self.channels.write();
        let tx = channels
            .entry(name.to_owned())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone();
        ChannelPublisher { tx }
    }

    fn subscribe(&self, name: &str) -> Option<broadcast::Receiver<Arc<str>>> {
        self.channels.read().get(name).map(|tx| tx.subscribe())
    }
}

#[cfg(test)]
#[path = "channel_tests.rs"]
mod tests;

/// WebSocket upgrade handler for `GET /ws/channel/{name}`.
pub async fn ws_channel_handler(
    State(store): State<Arc<Store>>,
    Path(name): Path<String>,
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
    let Some(rx) = store.channels.subscribe(&name) else {
        return (
            axum::http::StatusCode::NOT_FOUND,
            axum::Json(serde_json::json!({"error": "unknown channel"})),
        )
            .into_response();
    };
    ws.on_upgrade(move |socket| handle_channel_connection(store, socket, rx)).into_response()
}

async fn handle_channel_connection(
    store: Arc<Store>,
    socket: WebSocket,
    mut rx: broadcast::Receiver<Arc<str>>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    loop {
        tokio::select! {
            _ = store.shutdown.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                return;
            }
            msg = rx.recv() => {
                use tokio::sync::broadcast::error::RecvError;
                match msg {
                    Ok(json) => {
                        if ws_tx.send(Message::Text(json.to_string().into())).await.is_err() {
                            return;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        debug!("channel client lagged by {n} messages");
                    }
                    Err(RecvError::Closed) => return,
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => return,
                }
            }
        }
    }
}
