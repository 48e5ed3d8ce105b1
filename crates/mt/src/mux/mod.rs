// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Browser mux endpoint: one binary WebSocket per tab carrying all
//! sessions.
//!
//! Inbound frames are demuxed by session id and forwarded to the
//! per-session IPC clients; outbound output flows through a prioritized
//! [`SendQueue`] that applies the active-session weighting, coalescing,
//! compression, and resync policies.

pub mod queue;

use std::collections::VecDeque;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use mtwire::mux::{self, MuxFrameType, SessionStateEvent};
use mtwire::session::{SessionId, TermSize};

use crate::error::CLOSE_PROTOCOL_VIOLATION;
use crate::registry::RegistryEvent;
use crate::store::Store;
use queue::{OutFrame, SendQueue};

/// Query parameters for the mux WebSocket upgrade.
#[derive(Debug, Deserialize)]
pub struct MuxQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler for `GET /ws/mux`.
///
/// Auth failures are rejected before the upgrade with HTTP 401.
pub async fn ws_mux_handler(
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
    ws.on_upgrade(move |socket| handle_mux_connection(store, socket)).into_response()
}

/// Per-connection loop.
async fn handle_mux_connection(store: Arc<Store>, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut output_rx = store.broker.subscribe();
    let mut registry_rx = store.registry.subscribe();
    let mut queue = SendQueue::new(store.config.queue_config());
    let mut control: VecDeque<Message> = VecDeque::new();
    // Scrollback replays fetched off-loop arrive through this channel.
    let (replay_tx, mut replay_rx) = mpsc::channel::<(SessionId, Bytes)>(16);

    queue.set_active(store.registry.active());

    loop {
        let has_work = !control.is_empty() || !queue.is_empty();
        tokio::select! {
            _ = store.shutdown.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                return;
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Binary(raw))) => {
                        if let Err(violation) =
                            handle_client_frame(&store, &raw, &mut queue, &replay_tx).await
                        {
                            warn!("mux protocol violation: {violation}");
                            let _ = ws_tx
                                .send(Message::Close(Some(CloseFrame {
                                    code: CLOSE_PROTOCOL_VIOLATION,
                                    reason: "protocol violation".into(),
                                })))
                                .await;
                            return;
                        }
                    }
                    Some(Ok(Message::Text(_))) => {
                        // Binary frames only on this endpoint.
                        let _ = ws_tx
                            .send(Message::Close(Some(CloseFrame {
                                code: CLOSE_PROTOCOL_VIOLATION,
                                reason: "binary frames only".into(),
                            })))
                            .await;
                        return;
                    }
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("mux socket error: {e}");
                        return;
                    }
                }
            }

            event = output_rx.recv() => {
                use tokio::sync::broadcast::error::RecvError;
                match event {
                    Ok(event) => {
                        queue.push(&event.id, event.cols, event.rows, &event.data);
                    }
                    Err(RecvError::Lagged(n)) => {
                        // Frames were lost upstream of the queue; every
                        // session this client renders needs a resync.
                        warn!("mux connection lagged by {n} events, forcing resync");
                        for snapshot in store.registry.list() {
                            queue.force_resync(&snapshot.info.id);
                        }
                    }
                    Err(RecvError::Closed) => return,
                }
            }

            event = registry_rx.recv() => {
                use tokio::sync::broadcast::error::RecvError;
                match event {
                    Ok(RegistryEvent::Created(id)) => {
                        if let Some(frame) = session_state_frame(&id, SessionStateEvent::Created) {
                            control.push_back(frame);
                        }
                    }
                    Ok(RegistryEvent::Removed(id)) => {
                        queue.drop_session(&id);
                        if let Some(frame) = session_state_frame(&id, SessionStateEvent::Closed) {
                            control.push_back(frame);
                        }
                    }
                    Ok(RegistryEvent::ActiveChanged(id)) => {
                        queue.set_active(id);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => return,
                }
            }

            replay = replay_rx.recv() => {
                if let Some((id, data)) = replay {
                    queue.clear_resync(&id);
                    let dims = store
                        .registry
                        .get(&id)
                        .map(|s| (s.info.cols, s.info.rows))
                        .unwrap_or((80, 24));
                    queue.push(&id, dims.0, dims.1, &data);
                }
            }

            // Drain one frame per turn so inbound traffic and fresh events
            // stay interleaved with sends.
            _ = futures_util::future::ready(()), if has_work => {
                let message = match control.pop_front() {
                    Some(message) => Some(message),
                    None => queue.pop().map(encode_out_frame),
                };
                if let Some(message) = message {
                    if ws_tx.send(message).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// Demux one inbound client frame. `Err` means protocol violation.
async fn handle_client_frame(
    store: &Arc<Store>,
    raw: &[u8],
    queue: &mut SendQueue,
    replay_tx: &mpsc::Sender<(SessionId, Bytes)>,
) -> anyhow::Result<()> {
    let frame = mux::decode(raw)?;
    match frame.frame_type {
        MuxFrameType::TerminalInput => {
            // Detached sessions reject input; the store logs the drop.
            let _ = store.send_input(&frame.session, frame.payload).await;
        }
        MuxFrameType::Resize => {
            let (cols, rows) = mux::decode_resize_payload(&frame.payload)?;
            let store = Arc::clone(store);
            let id = frame.session;
            tokio::spawn(async move {
                let _ = store.resize_session(&id, TermSize { cols, rows }).await;
            });
        }
        MuxFrameType::BufferRequest => {
            let store = Arc::clone(store);
            let id = frame.session;
            let replay_tx = replay_tx.clone();
            tokio::spawn(async move {
                match store.fetch_buffer(&id).await {
                    Ok(data) => {
                        let _ = replay_tx.send((id, data)).await;
                    }
                    Err(_) => debug!(session = %id, "buffer replay unavailable"),
                }
            });
        }
        MuxFrameType::SelectSession => {
            queue.set_active(Some(frame.session.clone()));
            store.registry.set_active(Some(frame.session));
        }
        // Server→client types are never valid inbound.
        MuxFrameType::TerminalOutput
        | MuxFrameType::SessionState
        | MuxFrameType::Resync
        | MuxFrameType::CompressedOutput => {
            anyhow::bail!("client sent server-only frame {:?}", frame.frame_type);
        }
    }
    Ok(())
}

/// Encode a queue frame for the socket.
fn encode_out_frame(frame: OutFrame) -> Message {
    match frame {
        OutFrame::Resync { session } => {
            Message::Binary(mux::encode(MuxFrameType::Resync, &session, &[]))
        }
        OutFrame::Output { session, cols, rows, data, compress } => {
            if compress {
                match mux::encode_compressed_output(&session, cols, rows, &data) {
                    Ok(encoded) => return Message::Binary(encoded),
                    Err(e) => debug!("compression failed, sending plain: {e}"),
                }
            }
            Message::Binary(mux::encode_output(&session, cols, rows, &data))
        }
    }
}

fn session_state_frame(id: &SessionId, event: SessionStateEvent) -> Option<Message> {
    let payload = mux::encode_session_state(event).ok()?;
    Some(Message::Binary(mux::encode(MuxFrameType::SessionState, id, &payload)))
}
