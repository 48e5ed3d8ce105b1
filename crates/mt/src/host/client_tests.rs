// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use mtwire::session::ShellKind;
use tokio::net::UnixStream;

fn sid(s: &str) -> SessionId {
    SessionId::parse(s).expect("session id")
}

fn sample_info(id: &SessionId) -> SessionInfo {
    SessionInfo {
        id: id.clone(),
        shell: ShellKind::Bash,
        cols: 80,
        rows: 24,
        running: true,
        exit_code: None,
        name: None,
        host_pid: 777,
        pty_pid: Some(778),
        created_at_ms: 0,
        host_version: "0.4.2".to_owned(),
        cwd: None,
        foreground: None,
    }
}

/// Read one request frame from the fake-host side.
async fn host_recv(stream: &mut UnixStream) -> HostRequest {
    let (t, payload) = ipc::read_frame(stream)
        .await
        .expect("host read")
        .expect("unexpected EOF");
    let frame_type = FrameType::from_u8(t).expect("known type");
    ipc::decode_request(frame_type, payload).expect("decode request")
}

/// Write one host message from the fake-host side.
async fn host_send(stream: &mut UnixStream, msg: &HostMessage) {
    let encoded = ipc::encode_message(msg).expect("encode");
    ipc::write_frame(stream, &encoded).await.expect("write");
}

#[tokio::test]
async fn request_resolves_by_reply_type() {
    let (client_stream, mut host) = UnixStream::pair().expect("socketpair");
    let id = sid("cli1aaaa");
    let (client, _events) = HostClient::from_stream(id.clone(), client_stream);

    let info = sample_info(&id);
    let server = tokio::spawn(async move {
        match host_recv(&mut host).await {
            HostRequest::GetInfo => {}
            other => panic!("expected GetInfo, got {other:?}"),
        }
        host_send(&mut host, &HostMessage::Info(sample_info(&sid("cli1aaaa")))).await;
        host
    });

    let got = client.get_info().await.expect("handshake");
    assert_eq!(got, info);
    drop(server.await.expect("server"));
}

#[tokio::test]
async fn replies_interleaved_with_output_still_resolve() {
    let (client_stream, mut host) = UnixStream::pair().expect("socketpair");
    let id = sid("cli2aaaa");
    let (client, mut events) = HostClient::from_stream(id.clone(), client_stream);

    let server = tokio::spawn(async move {
        match host_recv(&mut host).await {
            HostRequest::Resize { cols: 132, rows: 40 } => {}
            other => panic!("expected Resize, got {other:?}"),
        }
        // Stream traffic lands between the request and its ack.
        host_send(
            &mut host,
            &HostMessage::Output { cols: 80, rows: 24, data: Bytes::from_static(b"noise") },
        )
        .await;
        host_send(&mut host, &HostMessage::ResizeAck { cols: 132, rows: 40 }).await;
        host
    });

    let applied = client
        .resize(TermSize { cols: 132, rows: 40 })
        .await
        .expect("resize acked");
    assert_eq!((applied.cols, applied.rows), (132, 40));

    match events.recv().await {
        Some(HostEvent::Output { data, .. }) => assert_eq!(&data[..], b"noise"),
        other => panic!("expected Output event, got {other:?}"),
    }
    drop(server.await.expect("server"));
}

#[tokio::test]
async fn input_frames_arrive_in_order() {
    let (client_stream, mut host) = UnixStream::pair().expect("socketpair");
    let (client, _events) = HostClient::from_stream(sid("cli3aaaa"), client_stream);

    for chunk in [&b"one"[..], b"two", b"three"] {
        client.input(Bytes::copy_from_slice(chunk)).await.expect("input");
    }

    for expected in [&b"one"[..], b"two", b"three"] {
        match host_recv(&mut host).await {
            HostRequest::Input(data) => assert_eq!(&data[..], expected),
            other => panic!("expected Input, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn log_level_and_name_acks_resolve() {
    let (client_stream, mut host) = UnixStream::pair().expect("socketpair");
    let (client, _events) = HostClient::from_stream(sid("cli7aaaa"), client_stream);

    let server = tokio::spawn(async move {
        match host_recv(&mut host).await {
            HostRequest::SetLogLevel(3) => {}
            other => panic!("expected SetLogLevel, got {other:?}"),
        }
        host_send(&mut host, &HostMessage::SetLogLevelAck).await;
        match host_recv(&mut host).await {
            HostRequest::SetName(name) => assert_eq!(name, "deploy"),
            other => panic!("expected SetName, got {other:?}"),
        }
        host_send(&mut host, &HostMessage::SetNameAck).await;
        host
    });

    client.set_log_level(3).await.expect("log level acked");
    client.set_name("deploy".to_owned()).await.expect("name acked");
    drop(server.await.expect("server"));
}

#[tokio::test]
async fn host_disconnect_surfaces_event_and_fails_requests() {
    let (client_stream, host) = UnixStream::pair().expect("socketpair");
    let (client, mut events) = HostClient::from_stream(sid("cli4aaaa"), client_stream);

    drop(host);

    match events.recv().await {
        Some(HostEvent::Disconnected) => {}
        other => panic!("expected Disconnected, got {other:?}"),
    }
    assert!(client.get_info().await.is_err());
}

#[tokio::test]
async fn state_and_telemetry_route_as_events() {
    let (client_stream, mut host) = UnixStream::pair().expect("socketpair");
    let (_client, mut events) = HostClient::from_stream(sid("cli5aaaa"), client_stream);

    host_send(
        &mut host,
        &HostMessage::StateChange(StateChange {
            running: false,
            exit_code: Some(0),
            cwd: None,
            name: None,
        }),
    )
    .await;
    host_send(&mut host, &HostMessage::ForegroundChange(None)).await;

    match events.recv().await {
        Some(HostEvent::State(change)) => {
            assert!(!change.running);
            assert_eq!(change.exit_code, Some(0));
        }
        other => panic!("expected State, got {other:?}"),
    }
    match events.recv().await {
        Some(HostEvent::Foreground(None)) => {}
        other => panic!("expected Foreground, got {other:?}"),
    }
}

#[tokio::test]
async fn cancel_tears_down_the_read_loop() {
    let (client_stream, _host) = UnixStream::pair().expect("socketpair");
    let (client, mut events) = HostClient::from_stream(sid("cli6aaaa"), client_stream);

    client.cancel();
    match events.recv().await {
        Some(HostEvent::Disconnected) | None => {}
        other => panic!("expected Disconnected, got {other:?}"),
    }
}
