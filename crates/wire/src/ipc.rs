// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host-side IPC framing: `[type:u8][length:u32 LE][payload]`.
//!
//! Structured payloads are a fixed, enumerated set of JSON schemas; raw
//! terminal bytes (`Input`, `Output`, `Buffer`) skip JSON entirely. Payloads
//! larger than [`MAX_PAYLOAD`] are a protocol violation and close the
//! connection.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::session::{ForegroundProcess, ProcessInfo, ProcessTree, SessionInfo};

/// Maximum IPC payload size (1 MiB).
pub const MAX_PAYLOAD: usize = 1024 * 1024;

/// Frame header size: type byte + u32 LE length.
pub const HEADER_LEN: usize = 5;

/// IPC frame type codes. Requests are 0x0_, replies mirror them in 0x8_,
/// host-initiated streams live in 0x9_.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    GetInfo = 0x01,
    Input = 0x02,
    Resize = 0x03,
    GetBuffer = 0x04,
    SetName = 0x05,
    SetLogLevel = 0x06,
    Close = 0x07,

    Info = 0x81,
    ResizeAck = 0x83,
    Buffer = 0x84,
    SetNameAck = 0x85,
    SetLogLevelAck = 0x86,
    CloseAck = 0x87,

    Output = 0x90,
    StateChange = 0x91,
    ProcessEvent = 0x92,
    ForegroundChange = 0x93,
    ProcessSnapshot = 0x94,
}

impl FrameType {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::GetInfo),
            0x02 => Some(Self::Input),
            0x03 => Some(Self::Resize),
            0x04 => Some(Self::GetBuffer),
            0x05 => Some(Self::SetName),
            0x06 => Some(Self::SetLogLevel),
            0x07 => Some(Self::Close),
            0x81 => Some(Self::Info),
            0x83 => Some(Self::ResizeAck),
            0x84 => Some(Self::Buffer),
            0x85 => Some(Self::SetNameAck),
            0x86 => Some(Self::SetLogLevelAck),
            0x87 => Some(Self::CloseAck),
            0x90 => Some(Self::Output),
            0x91 => Some(Self::StateChange),
            0x92 => Some(Self::ProcessEvent),
            0x93 => Some(Self::ForegroundChange),
            0x94 => Some(Self::ProcessSnapshot),
            _ => None,
        }
    }

    /// Whether this is a reply the client resolves a pending request with.
    pub fn is_reply(&self) -> bool {
        matches!(
            self,
            Self::Info
                | Self::ResizeAck
                | Self::Buffer
                | Self::SetNameAck
                | Self::SetLogLevelAck
                | Self::CloseAck
        )
    }
}

/// Coordinator → host messages.
#[derive(Debug, Clone, PartialEq)]
pub enum HostRequest {
    GetInfo,
    Input(Bytes),
    Resize { cols: u16, rows: u16 },
    GetBuffer,
    SetName(String),
    SetLogLevel(u8),
    Close,
}

/// Host → coordinator messages (replies and host-initiated streams).
#[derive(Debug, Clone, PartialEq)]
pub enum HostMessage {
    Info(SessionInfo),
    ResizeAck { cols: u16, rows: u16 },
    Buffer(Bytes),
    SetNameAck,
    SetLogLevelAck,
    CloseAck,
    Output { cols: u16, rows: u16, data: Bytes },
    StateChange(StateChange),
    ProcessEvent(ProcessEvent),
    ForegroundChange(Option<ForegroundProcess>),
    ProcessSnapshot(ProcessTree),
}

/// Running/exit/cwd/name change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A descendant process entered or left the session's tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessEvent {
    pub kind: ProcessEventKind,
    pub process: ProcessInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessEventKind {
    Started,
    Exited,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResizePayload {
    cols: u16,
    rows: u16,
}

#[derive(Debug, Serialize, Deserialize)]
struct SetNamePayload {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SetLogLevelPayload {
    level: u8,
}

#[derive(Debug, Serialize, Deserialize)]
struct ForegroundChangePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    foreground: Option<ForegroundProcess>,
}

fn frame(frame_type: FrameType, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u8(frame_type as u8);
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

fn json_frame<T: Serialize>(frame_type: FrameType, value: &T) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(value)?;
    if payload.len() > MAX_PAYLOAD {
        anyhow::bail!("{frame_type:?} payload exceeds {MAX_PAYLOAD} bytes");
    }
    Ok(frame(frame_type, &payload))
}

/// Encode a coordinator → host request.
pub fn encode_request(req: &HostRequest) -> anyhow::Result<Bytes> {
    match req {
        HostRequest::GetInfo => Ok(frame(FrameType::GetInfo, &[])),
        HostRequest::Input(data) => {
            if data.len() > MAX_PAYLOAD {
                anyhow::bail!("input payload exceeds {MAX_PAYLOAD} bytes");
            }
            Ok(frame(FrameType::Input, data))
        }
        HostRequest::Resize { cols, rows } => {
            json_frame(FrameType::Resize, &ResizePayload { cols: *cols, rows: *rows })
        }
        HostRequest::GetBuffer => Ok(frame(FrameType::GetBuffer, &[])),
        HostRequest::SetName(name) => {
            json_frame(FrameType::SetName, &SetNamePayload { name: name.clone() })
        }
        HostRequest::SetLogLevel(level) => {
            json_frame(FrameType::SetLogLevel, &SetLogLevelPayload { level: *level })
        }
        HostRequest::Close => Ok(frame(FrameType::Close, &[])),
    }
}

/// Encode a host → coordinator message.
pub fn encode_message(msg: &HostMessage) -> anyhow::Result<Bytes> {
    match msg {
        HostMessage::Info(info) => json_frame(FrameType::Info, info),
        HostMessage::ResizeAck { cols, rows } => {
            json_frame(FrameType::ResizeAck, &ResizePayload { cols: *cols, rows: *rows })
        }
        HostMessage::Buffer(data) => {
            if data.len() > MAX_PAYLOAD {
                anyhow::bail!("buffer payload exceeds {MAX_PAYLOAD} bytes");
            }
            Ok(frame(FrameType::Buffer, data))
        }
        HostMessage::SetNameAck => Ok(frame(FrameType::SetNameAck, &[])),
        HostMessage::SetLogLevelAck => Ok(frame(FrameType::SetLogLevelAck, &[])),
        HostMessage::CloseAck => Ok(frame(FrameType::CloseAck, &[])),
        HostMessage::Output { cols, rows, data } => {
            if data.len() + 4 > MAX_PAYLOAD {
                anyhow::bail!("output payload exceeds {MAX_PAYLOAD} bytes");
            }
            let mut buf = BytesMut::with_capacity(HEADER_LEN + 4 + data.len());
            buf.put_u8(FrameType::Output as u8);
            buf.put_u32_le((4 + data.len()) as u32);
            buf.put_u16_le(*cols);
            buf.put_u16_le(*rows);
            buf.put_slice(data);
            Ok(buf.freeze())
        }
        HostMessage::StateChange(change) => json_frame(FrameType::StateChange, change),
        HostMessage::ProcessEvent(event) => json_frame(FrameType::ProcessEvent, event),
        HostMessage::ForegroundChange(fg) => json_frame(
            FrameType::ForegroundChange,
            &ForegroundChangePayload { foreground: fg.clone() },
        ),
        HostMessage::ProcessSnapshot(tree) => json_frame(FrameType::ProcessSnapshot, tree),
    }
}

/// Decode a coordinator → host request from a raw frame.
pub fn decode_request(frame_type: FrameType, payload: Bytes) -> anyhow::Result<HostRequest> {
    match frame_type {
        FrameType::GetInfo => Ok(HostRequest::GetInfo),
        FrameType::Input => Ok(HostRequest::Input(payload)),
        FrameType::Resize => {
            let p: ResizePayload = serde_json::from_slice(&payload)?;
            Ok(HostRequest::Resize { cols: p.cols, rows: p.rows })
        }
        FrameType::GetBuffer => Ok(HostRequest::GetBuffer),
        FrameType::SetName => {
            let p: SetNamePayload = serde_json::from_slice(&payload)?;
            Ok(HostRequest::SetName(p.name))
        }
        FrameType::SetLogLevel => {
            let p: SetLogLevelPayload = serde_json::from_slice(&payload)?;
            Ok(HostRequest::SetLogLevel(p.level))
        }
        FrameType::Close => Ok(HostRequest::Close),
        other => anyhow::bail!("not a request frame type: {other:?}"),
    }
}

/// Decode a host → coordinator message from a raw frame.
pub fn decode_message(frame_type: FrameType, payload: Bytes) -> anyhow::Result<HostMessage> {
    match frame_type {
        FrameType::Info => Ok(HostMessage::Info(serde_json::from_slice(&payload)?)),
        FrameType::ResizeAck => {
            let p: ResizePayload = serde_json::from_slice(&payload)?;
            Ok(HostMessage::ResizeAck { cols: p.cols, rows: p.rows })
        }
        FrameType::Buffer => Ok(HostMessage::Buffer(payload)),
        FrameType::SetNameAck => Ok(HostMessage::SetNameAck),
        FrameType::SetLogLevelAck => Ok(HostMessage::SetLogLevelAck),
        FrameType::CloseAck => Ok(HostMessage::CloseAck),
        FrameType::Output => {
            if payload.len() < 4 {
                anyhow::bail!("output payload shorter than dimension preface");
            }
            let cols = u16::from_le_bytes([payload[0], payload[1]]);
            let rows = u16::from_le_bytes([payload[2], payload[3]]);
            Ok(HostMessage::Output { cols, rows, data: payload.slice(4..) })
        }
        FrameType::StateChange => Ok(HostMessage::StateChange(serde_json::from_slice(&payload)?)),
        FrameType::ProcessEvent => Ok(HostMessage::ProcessEvent(serde_json::from_slice(&payload)?)),
        FrameType::ForegroundChange => {
            let p: ForegroundChangePayload = serde_json::from_slice(&payload)?;
            Ok(HostMessage::ForegroundChange(p.foreground))
        }
        FrameType::ProcessSnapshot => {
            Ok(HostMessage::ProcessSnapshot(serde_json::from_slice(&payload)?))
        }
        other => anyhow::bail!("not a host message frame type: {other:?}"),
    }
}

/// Read one raw frame.
///
/// Returns `Ok(None)` on clean EOF at a frame boundary. An oversized length
/// yields `InvalidData` and the caller must close the connection. Unknown type
/// bytes are returned as-is so the receiver can log and ignore them.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<(u8, Bytes)>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let frame_type = header[0];
    let len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if len > MAX_PAYLOAD {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame payload {len} exceeds {MAX_PAYLOAD} byte cap"),
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some((frame_type, Bytes::from(payload))))
}

/// Write one pre-encoded frame and flush.
///
/// The caller must hold the connection's write lock across this call so
/// header and payload bytes never interleave with another frame.
pub async fn write_frame<W>(writer: &mut W, encoded: &Bytes) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(encoded).await?;
    writer.flush().await
}

#[cfg(test)]
#[path = "ipc_tests.rs"]
mod tests;
