// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::session::{SessionId, SessionInfo, ShellKind};
use proptest::prelude::*;

fn sample_info() -> SessionInfo {
    SessionInfo {
        id: SessionId::parse("abc123xy").expect("id"),
        shell: ShellKind::Zsh,
        cols: 120,
        rows: 40,
        running: true,
        exit_code: None,
        name: Some("build".to_owned()),
        host_pid: 100,
        pty_pid: Some(101),
        created_at_ms: 1_750_000_000_000,
        host_version: "0.4.2".to_owned(),
        cwd: Some("/home/dev".to_owned()),
        foreground: None,
    }
}

async fn round_trip_message(msg: HostMessage) -> HostMessage {
    let encoded = encode_message(&msg).expect("encode");
    let mut reader = encoded.as_ref();
    let (t, payload) = read_frame(&mut reader).await.expect("read").expect("frame");
    let frame_type = FrameType::from_u8(t).expect("known type");
    decode_message(frame_type, payload).expect("decode")
}

async fn round_trip_request(req: HostRequest) -> HostRequest {
    let encoded = encode_request(&req).expect("encode");
    let mut reader = encoded.as_ref();
    let (t, payload) = read_frame(&mut reader).await.expect("read").expect("frame");
    let frame_type = FrameType::from_u8(t).expect("known type");
    decode_request(frame_type, payload).expect("decode")
}

#[tokio::test]
async fn info_round_trip() {
    let msg = HostMessage::Info(sample_info());
    assert_eq!(round_trip_message(msg.clone()).await, msg);
}

#[tokio::test]
async fn output_preserves_dims_and_bytes() {
    let msg = HostMessage::Output {
        cols: 132,
        rows: 43,
        data: Bytes::from_static(b"\x1b[1mhello\x1b[0m\r\n"),
    };
    match round_trip_message(msg).await {
        HostMessage::Output { cols, rows, data } => {
            assert_eq!((cols, rows), (132, 43));
            assert_eq!(&data[..], b"\x1b[1mhello\x1b[0m\r\n");
        }
        other => panic!("expected Output, got {other:?}"),
    }
}

#[tokio::test]
async fn input_is_raw_bytes() {
    let req = HostRequest::Input(Bytes::from_static(b"echo hi\n"));
    assert_eq!(round_trip_request(req.clone()).await, req);
}

#[tokio::test]
async fn resize_and_acks_round_trip() {
    let req = HostRequest::Resize { cols: 132, rows: 40 };
    assert_eq!(round_trip_request(req.clone()).await, req);

    for msg in [
        HostMessage::ResizeAck { cols: 132, rows: 40 },
        HostMessage::SetNameAck,
        HostMessage::SetLogLevelAck,
        HostMessage::CloseAck,
    ] {
        assert_eq!(round_trip_message(msg.clone()).await, msg);
    }
}

#[tokio::test]
async fn state_change_round_trip() {
    let msg = HostMessage::StateChange(StateChange {
        running: false,
        exit_code: Some(130),
        cwd: Some("/tmp".to_owned()),
        name: None,
    });
    assert_eq!(round_trip_message(msg.clone()).await, msg);
}

#[tokio::test]
async fn oversized_length_is_invalid_data() {
    let mut raw = Vec::new();
    raw.push(FrameType::Input as u8);
    raw.extend_from_slice(&((MAX_PAYLOAD as u32) + 1).to_le_bytes());
    let mut reader = raw.as_slice();
    let err = read_frame(&mut reader).await.expect_err("oversize must fail");
    assert_eq!(err.kind(), io::ErrorKind::InvalidData);
}

#[tokio::test]
async fn clean_eof_returns_none() {
    let mut reader: &[u8] = &[];
    assert!(read_frame(&mut reader).await.expect("eof ok").is_none());
}

#[tokio::test]
async fn truncated_payload_is_unexpected_eof() {
    let mut raw = Vec::new();
    raw.push(FrameType::Input as u8);
    raw.extend_from_slice(&10u32.to_le_bytes());
    raw.extend_from_slice(b"abc"); // 3 of 10 bytes
    let mut reader = raw.as_slice();
    let err = read_frame(&mut reader).await.expect_err("truncation must fail");
    assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
}

#[tokio::test]
async fn unknown_type_byte_passes_through() {
    let mut raw = Vec::new();
    raw.push(0x7f);
    raw.extend_from_slice(&0u32.to_le_bytes());
    let mut reader = raw.as_slice();
    let (t, payload) = read_frame(&mut reader).await.expect("read").expect("frame");
    assert_eq!(t, 0x7f);
    assert!(payload.is_empty());
    assert!(FrameType::from_u8(t).is_none());
}

#[test]
fn reply_classification() {
    assert!(FrameType::Info.is_reply());
    assert!(FrameType::CloseAck.is_reply());
    assert!(!FrameType::Output.is_reply());
    assert!(!FrameType::GetInfo.is_reply());
}

proptest! {
    #[test]
    fn output_round_trip_any_bytes(data in proptest::collection::vec(any::<u8>(), 0..4096),
                                   cols in 1u16..=500, rows in 1u16..=500) {
        let msg = HostMessage::Output { cols, rows, data: Bytes::from(data.clone()) };
        let encoded = encode_message(&msg).expect("encode");
        // Parse synchronously: header then payload.
        let t = encoded[0];
        let len = u32::from_le_bytes([encoded[1], encoded[2], encoded[3], encoded[4]]) as usize;
        prop_assert_eq!(t, FrameType::Output as u8);
        prop_assert_eq!(len, 4 + data.len());
        let payload = Bytes::copy_from_slice(&encoded[HEADER_LEN..]);
        match decode_message(FrameType::Output, payload).expect("decode") {
            HostMessage::Output { cols: c, rows: r, data: d } => {
                prop_assert_eq!((c, r), (cols, rows));
                prop_assert_eq!(&d[..], &data[..]);
            }
            other => prop_assert!(false, "expected Output, got {:?}", other),
        }
    }
}
