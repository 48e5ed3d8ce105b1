// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Browser-facing mux framing: `[type:u8][session-id:8 NUL-padded][payload]`.
//!
//! Output payloads prepend `[cols:u16 LE][rows:u16 LE]`; compressed output
//! additionally prepends `[uncompressed-len:u32 LE]` before the gzip bytes.

use bytes::{BufMut, Bytes, BytesMut};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use crate::session::{SessionId, SESSION_ID_LEN};

/// Mux frame header size: type byte + padded session id.
pub const MUX_HEADER_LEN: usize = 1 + SESSION_ID_LEN;

/// Mux frame type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MuxFrameType {
    /// C→S: bytes for the session's PTY stdin.
    TerminalInput = 0x01,
    /// S→C: PTY output with current dims.
    TerminalOutput = 0x02,
    /// C→S: set dims.
    Resize = 0x03,
    /// S→C: session created/destroyed.
    SessionState = 0x04,
    /// S→C: clear client buffers and pending queues.
    Resync = 0x05,
    /// C→S: request scrollback resend for a session.
    BufferRequest = 0x06,
    /// S→C: gzip-wrapped output batch.
    CompressedOutput = 0x07,
    /// C→S: mark a session as the active (foreground) one.
    SelectSession = 0x08,
}

impl MuxFrameType {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::TerminalInput),
            0x02 => Some(Self::TerminalOutput),
            0x03 => Some(Self::Resize),
            0x04 => Some(Self::SessionState),
            0x05 => Some(Self::Resync),
            0x06 => Some(Self::BufferRequest),
            0x07 => Some(Self::CompressedOutput),
            0x08 => Some(Self::SelectSession),
            _ => None,
        }
    }
}

/// A decoded mux frame.
#[derive(Debug, Clone, PartialEq)]
pub struct MuxFrame {
    pub frame_type: MuxFrameType,
    pub session: SessionId,
    pub payload: Bytes,
}

/// SessionState payload: whether the session appeared or went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStateEvent {
    Created,
    Closed,
}

/// Encode a mux frame from its parts.
pub fn encode(frame_type: MuxFrameType, session: &SessionId, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(MUX_HEADER_LEN + payload.len());
    buf.put_u8(frame_type as u8);
    buf.put_slice(&session.to_wire());
    buf.put_slice(payload);
    buf.freeze()
}

/// Decode a mux frame. Unknown type or malformed id is a protocol violation.
pub fn decode(raw: &[u8]) -> anyhow::Result<MuxFrame> {
    if raw.len() < MUX_HEADER_LEN {
        anyhow::bail!("mux frame shorter than header: {} bytes", raw.len());
    }
    let frame_type = MuxFrameType::from_u8(raw[0])
        .ok_or_else(|| anyhow::anyhow!("unknown mux frame type 0x{:02x}", raw[0]))?;
    let mut id_bytes = [0u8; SESSION_ID_LEN];
    id_bytes.copy_from_slice(&raw[1..MUX_HEADER_LEN]);
    let session = SessionId::from_wire(&id_bytes)?;
    Ok(MuxFrame {
        frame_type,
        session,
        payload: Bytes::copy_from_slice(&raw[MUX_HEADER_LEN..]),
    })
}

/// Encode a TerminalOutput frame: dims preface + raw bytes.
pub fn encode_output(session: &SessionId, cols: u16, rows: u16, data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(MUX_HEADER_LEN + 4 + data.len());
    buf.put_u8(MuxFrameType::TerminalOutput as u8);
    buf.put_slice(&session.to_wire());
    buf.put_u16_le(cols);
    buf.put_u16_le(rows);
    buf.put_slice(data);
    buf.freeze()
}

/// Encode a CompressedOutput frame: dims + uncompressed length + gzip bytes.
pub fn encode_compressed_output(
    session: &SessionId,
    cols: u16,
    rows: u16,
    data: &[u8],
) -> anyhow::Result<Bytes> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::fast());
    encoder.write_all(data)?;
    let compressed = encoder.finish()?;

    let mut buf = BytesMut::with_capacity(MUX_HEADER_LEN + 8 + compressed.len());
    buf.put_u8(MuxFrameType::CompressedOutput as u8);
    buf.put_slice(&session.to_wire());
    buf.put_u16_le(cols);
    buf.put_u16_le(rows);
    buf.put_u32_le(data.len() as u32);
    buf.put_slice(&compressed);
    Ok(buf.freeze())
}

/// Decode a TerminalOutput payload into dims + data.
pub fn decode_output_payload(payload: &[u8]) -> anyhow::Result<(u16, u16, Bytes)> {
    if payload.len() < 4 {
        anyhow::bail!("output payload shorter than dimension preface");
    }
    let cols = u16::from_le_bytes([payload[0], payload[1]]);
    let rows = u16::from_le_bytes([payload[2], payload[3]]);
    Ok((cols, rows, Bytes::copy_from_slice(&payload[4..])))
}

/// Decode and decompress a CompressedOutput payload into dims + data.
pub fn decode_compressed_payload(payload: &[u8]) -> anyhow::Result<(u16, u16, Bytes)> {
    if payload.len() < 8 {
        anyhow::bail!("compressed payload shorter than preface");
    }
    let cols = u16::from_le_bytes([payload[0], payload[1]]);
    let rows = u16::from_le_bytes([payload[2], payload[3]]);
    let expected = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]) as usize;

    let mut decoder = GzDecoder::new(&payload[8..]);
    let mut data = Vec::with_capacity(expected);
    decoder.read_to_end(&mut data)?;
    if data.len() != expected {
        anyhow::bail!("decompressed length {} != declared {expected}", data.len());
    }
    Ok((cols, rows, Bytes::from(data)))
}

/// Encode a Resize payload: `[cols:u16 LE][rows:u16 LE]`.
pub fn encode_resize_payload(cols: u16, rows: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u16_le(cols);
    buf.put_u16_le(rows);
    buf.freeze()
}

/// Decode a Resize payload.
pub fn decode_resize_payload(payload: &[u8]) -> anyhow::Result<(u16, u16)> {
    if payload.len() != 4 {
        anyhow::bail!("resize payload must be 4 bytes, got {}", payload.len());
    }
    let cols = u16::from_le_bytes([payload[0], payload[1]]);
    let rows = u16::from_le_bytes([payload[2], payload[3]]);
    Ok((cols, rows))
}

/// Encode a SessionState payload.
pub fn encode_session_state(event: SessionStateEvent) -> anyhow::Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(&event)?))
}

/// Decode a SessionState payload.
pub fn decode_session_state(payload: &[u8]) -> anyhow::Result<SessionStateEvent> {
    Ok(serde_json::from_slice(payload)?)
}

#[cfg(test)]
#[path = "mux_tests.rs"]
mod tests;
