// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session IPC client.
//!
//! One connection per live session. Writes are serialized by an async
//! mutex so frame headers and payloads never interleave; the read loop
//! resolves outstanding request futures by reply type and routes
//! host-initiated streams to the session task.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use mtwire::ipc::{
    self, FrameType, HostMessage, HostRequest, ProcessEvent, StateChange,
};
use mtwire::session::{ForegroundProcess, ProcessTree, SessionId, SessionInfo, TermSize};

/// Default request-reply timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Host-initiated traffic surfaced to the coordinator's session task.
#[derive(Debug)]
pub enum HostEvent {
    Output { cols: u16, rows: u16, data: Bytes },
    State(StateChange),
    Process(ProcessEvent),
    Foreground(Option<ForegroundProcess>),
    Snapshot(ProcessTree),
    /// The connection ended (EOF, read error, or cancellation).
    Disconnected,
}

#[derive(Clone)]
pub struct HostClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    id: SessionId,
    writer: Mutex<OwnedWriteHalf>,
    pending: parking_lot::Mutex<HashMap<FrameType, oneshot::Sender<HostMessage>>>,
    cancel: CancellationToken,
}

impl HostClient {
    /// Dial a host endpoint. The returned receiver carries host-initiated
    /// events until the connection ends (terminated by a `Disconnected`).
    pub async fn connect(
        id: SessionId,
        path: &Path,
    ) -> anyhow::Result<(Self, mpsc::Receiver<HostEvent>)> {
        let stream = UnixStream::connect(path)
            .await
            .with_context(|| format!("connect {}", path.display()))?;
        Ok(Self::from_stream(id, stream))
    }

    /// Wrap an already-connected stream (tests use a socketpair).
    pub fn from_stream(
        id: SessionId,
        stream: UnixStream,
    ) -> (Self, mpsc::Receiver<HostEvent>) {
        let (read_half, write_half) = stream.into_split();

        let (event_tx, event_rx) = mpsc::channel(256);
        let inner = Arc::new(ClientInner {
            id,
            writer: Mutex::new(write_half),
            pending: parking_lot::Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        });

        let reader_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            read_loop(reader_inner, read_half, event_tx).await;
        });

        (Self { inner }, event_rx)
    }

    pub fn session_id(&self) -> &SessionId {
        &self.inner.id
    }

    /// Tear the connection down. The read loop emits `Disconnected`.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    /// Fire-and-forget PTY input. Arrival order is preserved per session by
    /// the writer lock.
    pub async fn input(&self, data: Bytes) -> anyhow::Result<()> {
        let encoded = ipc::encode_request(&HostRequest::Input(data))?;
        let mut writer = self.inner.writer.lock().await;
        ipc::write_frame(&mut *writer, &encoded).await?;
        Ok(())
    }

    /// `GetInfo → Info` handshake.
    pub async fn get_info(&self) -> anyhow::Result<SessionInfo> {
        match self.request(HostRequest::GetInfo).await? {
            HostMessage::Info(info) => Ok(info),
            other => anyhow::bail!("unexpected reply to GetInfo: {other:?}"),
        }
    }

    /// `Resize → ResizeAck`, returning the applied (clamped) dims.
    pub async fn resize(&self, size: TermSize) -> anyhow::Result<TermSize> {
        let req = HostRequest::Resize { cols: size.cols, rows: size.rows };
        match self.request(req).await? {
            HostMessage::ResizeAck { cols, rows } => Ok(TermSize { cols, rows }),
            other => anyhow::bail!("unexpected reply to Resize: {other:?}"),
        }
    }

    /// `GetBuffer → Buffer`: the host's full scrollback ring.
    pub async fn get_buffer(&self) -> anyhow::Result<Bytes> {
        match self.request(HostRequest::GetBuffer).await? {
            HostMessage::Buffer(data) => Ok(data),
            other => anyhow::bail!("unexpected reply to GetBuffer: {other:?}"),
        }
    }

    /// `SetName → SetNameAck`.
    pub async fn set_name(&self, name: String) -> anyhow::Result<()> {
        match self.request(HostRequest::SetName(name)).await? {
            HostMessage::SetNameAck => Ok(()),
            other => anyhow::bail!("unexpected reply to SetName: {other:?}"),
        }
    }

    /// `SetLogLevel → SetLogLevelAck`.
    pub async fn set_log_level(&self, level: u8) -> anyhow::Result<()> {
        match self.request(HostRequest::SetLogLevel(level)).await? {
            HostMessage::SetLogLevelAck => Ok(()),
            other => anyhow::bail!("unexpected reply to SetLogLevel: {other:?}"),
        }
    }

    /// `Close → CloseAck`.
    pub async fn close(&self) -> anyhow::Result<()> {
        match self.request(HostRequest::Close).await? {
            HostMessage::CloseAck => Ok(()),
            other => anyhow::bail!("unexpected reply to Close: {other:?}"),
        }
    }

    /// Send a request and await its reply, resolved by reply frame type.
    ///
    /// On timeout the client is torn down so the session can detach and
    /// later reattach; a hung host must not wedge the coordinator.
    async fn request(&self, req: HostRequest) -> anyhow::Result<HostMessage> {
        let reply = reply_type(&req)
            .ok_or_else(|| anyhow::anyhow!("request {req:?} has no reply type"))?;

        let (tx, rx) = oneshot::channel();
        if self.inner.pending.lock().insert(reply, tx).is_some() {
            debug!(session = %self.inner.id, "replacing stale pending {reply:?} request");
        }

        let encoded = ipc::encode_request(&req)?;
        {
            let mut writer = self.inner.writer.lock().await;
            ipc::write_frame(&mut *writer, &encoded).await?;
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(msg)) => Ok(msg),
            Ok(Err(_)) => anyhow::bail!("host connection closed awaiting {reply:?}"),
            Err(_) => {
                self.inner.pending.lock().remove(&reply);
                self.cancel();
                anyhow::bail!("host request timed out awaiting {reply:?}")
            }
        }
    }
}

/// Reply frame type a request resolves with.
fn reply_type(req: &HostRequest) -> Option<FrameType> {
    match req {
        HostRequest::GetInfo => Some(FrameType::Info),
        HostRequest::Resize { .. } => Some(FrameType::ResizeAck),
        HostRequest::GetBuffer => Some(FrameType::Buffer),
        HostRequest::SetName(_) => Some(FrameType::SetNameAck),
        HostRequest::SetLogLevel(_) => Some(FrameType::SetLogLevelAck),
        HostRequest::Close => Some(FrameType::CloseAck),
        HostRequest::Input(_) => None,
    }
}

async fn read_loop(
    inner: Arc<ClientInner>,
    mut reader: tokio::net::unix::OwnedReadHalf,
    event_tx: mpsc::Sender<HostEvent>,
) {
    loop {
        let frame = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            frame = ipc::read_frame(&mut reader) => frame,
        };

        let (type_byte, payload) = match frame {
            Ok(Some(f)) => f,
            Ok(None) => {
                debug!(session = %inner.id, "host connection closed");
                break;
            }
            Err(e) => {
                warn!(session = %inner.id, "host read error: {e}");
                break;
            }
        };

        let Some(frame_type) = FrameType::from_u8(type_byte) else {
            warn!(session = %inner.id, "unknown host frame type 0x{type_byte:02x}, ignoring");
            continue;
        };

        let msg = match ipc::decode_message(frame_type, payload) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(session = %inner.id, "malformed {frame_type:?} frame, dropping host: {e}");
                break;
            }
        };

        if frame_type.is_reply() {
            if let Some(tx) = inner.pending.lock().remove(&frame_type) {
                let _ = tx.send(msg);
            } else {
                debug!(session = %inner.id, "unsolicited {frame_type:?} reply");
            }
            continue;
        }

        let event = match msg {
            HostMessage::Output { cols, rows, data } => HostEvent::Output { cols, rows, data },
            HostMessage::StateChange(change) => HostEvent::State(change),
            HostMessage::ProcessEvent(event) => HostEvent::Process(event),
            HostMessage::ForegroundChange(fg) => HostEvent::Foreground(fg),
            HostMessage::ProcessSnapshot(tree) => HostEvent::Snapshot(tree),
            other => {
                debug!(session = %inner.id, "ignoring host message {other:?}");
                continue;
            }
        };
        if event_tx.send(event).await.is_err() {
            break;
        }
    }

    // Wake any waiter still parked on a reply.
    inner.pending.lock().clear();
    let _ = event_tx.send(HostEvent::Disconnected).await;
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
