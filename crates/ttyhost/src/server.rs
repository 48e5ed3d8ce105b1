// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IPC server for the host's Unix-domain endpoint.
//!
//! One client at a time: a second connect cancels the first. After a client
//! connects, no Output or StateChange frame is written until the
//! `GetInfo → Info` handshake completes; frames produced in that window are
//! buffered and flushed in order behind the Info reply.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mtwire::ipc::{self, FrameType, HostMessage, HostRequest};
use mtwire::session::TermSize;

use crate::host::HostState;
use crate::procmon::Telemetry;

/// Accept loop. Runs until the host shutdown token fires.
pub async fn serve(state: Arc<HostState>, listener: UnixListener) {
    let mut current: Option<CancellationToken> = None;

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                if let Some(token) = current.take() {
                    token.cancel();
                }
                return;
            }
            accept = listener.accept() => {
                match accept {
                    Ok((stream, _)) => {
                        // At most one attached client: cancel the previous
                        // connection before serving the new one.
                        if let Some(prev) = current.take() {
                            debug!("new client connected, cancelling previous");
                            prev.cancel();
                        }
                        let token = state.shutdown.child_token();
                        current = Some(token.clone());
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            handle_client(state, stream, token).await;
                        });
                    }
                    Err(e) => {
                        debug!("accept error: {e}");
                    }
                }
            }
        }
    }
}

/// Per-connection loop: request dispatch plus gated event fan-out.
async fn handle_client(state: Arc<HostState>, stream: UnixStream, cancel: CancellationToken) {
    info!("IPC client connected");
    let (mut reader, mut writer) = stream.into_split();

    // Subscribe before the handshake so nothing is missed; frames are held
    // back until the Info reply has been written.
    let mut output_rx = state.channels.output_tx.subscribe();
    let mut state_rx = state.channels.state_tx.subscribe();
    let mut tel_rx = state.channels.telemetry_tx.subscribe();
    let mut handshook = false;
    let mut pending: Vec<Bytes> = Vec::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("IPC client cancelled");
                return;
            }

            frame = ipc::read_frame(&mut reader) => {
                match frame {
                    Ok(Some((type_byte, payload))) => {
                        match handle_frame(
                            &state, &mut writer, type_byte, payload,
                            &mut handshook, &mut pending,
                        ).await {
                            Ok(true) => {}
                            Ok(false) => return,
                            Err(e) => {
                                warn!("IPC write failed, dropping client: {e}");
                                return;
                            }
                        }
                    }
                    Ok(None) => {
                        debug!("IPC client disconnected");
                        return;
                    }
                    Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                        warn!("oversized IPC frame, closing client: {e}");
                        return;
                    }
                    Err(e) => {
                        debug!("IPC read error: {e}");
                        return;
                    }
                }
            }

            chunk = output_rx.recv() => {
                match chunk {
                    Ok(chunk) => {
                        let msg = HostMessage::Output {
                            cols: chunk.cols,
                            rows: chunk.rows,
                            data: chunk.data,
                        };
                        if let Err(e) = emit(&mut writer, &msg, handshook, &mut pending).await {
                            warn!("IPC write failed, dropping client: {e}");
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("output fan-out lagged by {n} chunks");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }

            change = state_rx.recv() => {
                match change {
                    Ok(change) => {
                        let msg = HostMessage::StateChange(change);
                        if let Err(e) = emit(&mut writer, &msg, handshook, &mut pending).await {
                            warn!("IPC write failed, dropping client: {e}");
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("state fan-out lagged by {n} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }

            telemetry = tel_rx.recv() => {
                match telemetry {
                    Ok(telemetry) => {
                        let msg = match telemetry {
                            Telemetry::Process(event) => HostMessage::ProcessEvent(event),
                            Telemetry::Foreground(fg) => HostMessage::ForegroundChange(fg),
                            Telemetry::Snapshot(tree) => HostMessage::ProcessSnapshot(tree),
                        };
                        if let Err(e) = emit(&mut writer, &msg, handshook, &mut pending).await {
                            warn!("IPC write failed, dropping client: {e}");
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("telemetry fan-out lagged by {n} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        }
    }
}

/// Write a host message, or buffer it while the handshake is outstanding.
async fn emit(
    writer: &mut OwnedWriteHalf,
    msg: &HostMessage,
    handshook: bool,
    pending: &mut Vec<Bytes>,
) -> anyhow::Result<()> {
    let encoded = ipc::encode_message(msg)?;
    if handshook {
        ipc::write_frame(writer, &encoded).await?;
    } else {
        pending.push(encoded);
    }
    Ok(())
}

/// Dispatch one inbound frame.
///
/// Returns `Ok(false)` when the connection must close (protocol violation),
/// `Err` on write failure. Unknown frame types are logged and ignored.
async fn handle_frame(
    state: &Arc<HostState>,
    writer: &mut OwnedWriteHalf,
    type_byte: u8,
    payload: Bytes,
    handshook: &mut bool,
    pending: &mut Vec<Bytes>,
) -> anyhow::Result<bool> {
    let Some(frame_type) = FrameType::from_u8(type_byte) else {
        warn!("unknown IPC frame type 0x{type_byte:02x}, ignoring");
        return Ok(true);
    };

    let request = match ipc::decode_request(frame_type, payload) {
        Ok(req) => req,
        Err(e) => {
            warn!("malformed {frame_type:?} frame, closing client: {e}");
            return Ok(false);
        }
    };

    match request {
        HostRequest::GetInfo => {
            let info = state.info.read().await.clone();
            reply(writer, &HostMessage::Info(info)).await?;
            if !*handshook {
                *handshook = true;
                for frame in pending.drain(..) {
                    ipc::write_frame(writer, &frame).await?;
                }
            }
        }
        HostRequest::Input(data) => {
            if state.info.read().await.running {
                if state.channels.input_tx.send(data).await.is_err() {
                    debug!("PTY input channel closed, dropping input");
                }
            } else {
                debug!("session not running, dropping {} input bytes", data.len());
            }
        }
        HostRequest::Resize { cols, rows } => {
            let applied = state.apply_resize(TermSize { cols, rows }).await;
            match applied {
                Ok(size) => {
                    reply(writer, &HostMessage::ResizeAck { cols: size.cols, rows: size.rows })
                        .await?;
                }
                Err(e) => {
                    warn!("resize failed: {e}");
                    let current = state.resizer.dims();
                    reply(
                        writer,
                        &HostMessage::ResizeAck { cols: current.cols, rows: current.rows },
                    )
                    .await?;
                }
            }
        }
        HostRequest::GetBuffer => {
            let contents = state.scrollback.lock().contents();
            reply(writer, &HostMessage::Buffer(Bytes::from(contents))).await?;
        }
        HostRequest::SetName(name) => {
            state.set_name(name).await;
            reply(writer, &HostMessage::SetNameAck).await?;
        }
        HostRequest::SetLogLevel(level) => {
            (state.set_log_level)(level);
            reply(writer, &HostMessage::SetLogLevelAck).await?;
        }
        HostRequest::Close => {
            reply(writer, &HostMessage::CloseAck).await?;
            state.begin_close().await;
        }
    }
    Ok(true)
}

async fn reply(writer: &mut OwnedWriteHalf, msg: &HostMessage) -> anyhow::Result<()> {
    let encoded = ipc::encode_message(msg)?;
    ipc::write_frame(writer, &encoded).await?;
    Ok(())
}
