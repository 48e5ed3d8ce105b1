// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordinator end-to-end tests.
//!
//! A fake host serves the real IPC protocol on a Unix socket in a scratch
//! runtime directory; the coordinator adopts it through the orphan-reclaim
//! path and browser clients drive it over the mux and state WebSockets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpStream, UnixListener, UnixStream};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use clap::Parser;

use mt::config::Config;
use mt::run;
use mt::store::Store;
use mtwire::ipc::{self, FrameType, HostMessage, HostRequest};
use mtwire::mux::{self, MuxFrameType};
use mtwire::session::{SessionId, SessionInfo, ShellKind};

const TIMEOUT: Duration = Duration::from_secs(10);

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn fake_info(id: &SessionId) -> SessionInfo {
    SessionInfo {
        id: id.clone(),
        shell: ShellKind::Bash,
        cols: 80,
        rows: 24,
        running: true,
        exit_code: None,
        name: None,
        // Must look alive to the coordinator's liveness probe.
        host_pid: std::process::id(),
        pty_pid: Some(std::process::id()),
        created_at_ms: 1_750_000_000_000,
        host_version: "0.4.2".to_owned(),
        cwd: Some("/tmp".to_owned()),
        foreground: None,
    }
}

/// Serve the host IPC protocol for one session until the listener drops.
fn spawn_fake_host(listener: UnixListener, id: SessionId) {
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { return };
            let id = id.clone();
            tokio::spawn(async move {
                let _ = serve_fake_client(stream, id).await;
            });
        }
    });
}

async fn serve_fake_client(mut stream: UnixStream, id: SessionId) -> anyhow::Result<()> {
    let mut dims = (80u16, 24u16);
    loop {
        let Some((t, payload)) = ipc::read_frame(&mut stream).await? else {
            return Ok(());
        };
        let Some(frame_type) = FrameType::from_u8(t) else { continue };
        let request = ipc::decode_request(frame_type, payload)?;
        match request {
            HostRequest::GetInfo => {
                let mut info = fake_info(&id);
                info.cols = dims.0;
                info.rows = dims.1;
                send_msg(&mut stream, &HostMessage::Info(info)).await?;
            }
            HostRequest::Input(data) => {
                if &data[..] == b"ping" {
                    send_msg(
                        &mut stream,
                        &HostMessage::Output {
                            cols: dims.0,
                            rows: dims.1,
                            data: Bytes::from_static(b"pong"),
                        },
                    )
                    .await?;
                }
            }
            HostRequest::Resize { cols, rows } => {
                dims = (cols.clamp(1, 500), rows.clamp(1, 500));
                send_msg(&mut stream, &HostMessage::ResizeAck { cols: dims.0, rows: dims.1 })
                    .await?;
            }
            HostRequest::GetBuffer => {
                send_msg(&mut stream, &HostMessage::Buffer(Bytes::from_static(b"scrollback-bytes")))
                    .await?;
            }
            HostRequest::SetName(_) => {
                send_msg(&mut stream, &HostMessage::SetNameAck).await?;
            }
            HostRequest::SetLogLevel(_) => {
                send_msg(&mut stream, &HostMessage::SetLogLevelAck).await?;
            }
            HostRequest::Close => {
                send_msg(&mut stream, &HostMessage::CloseAck).await?;
                return Ok(());
            }
        }
    }
}

async fn send_msg(stream: &mut UnixStream, msg: &HostMessage) -> anyhow::Result<()> {
    let encoded = ipc::encode_message(msg)?;
    ipc::write_frame(stream, &encoded).await?;
    Ok(())
}

struct Coordinator {
    addr: SocketAddr,
    store: Arc<Store>,
    _dir: tempfile::TempDir,
    handle: tokio::task::JoinHandle<anyhow::Result<run::RunResult>>,
}

/// Start a coordinator over a scratch runtime dir holding one fake host.
async fn start_coordinator(session: &str) -> Coordinator {
    let dir = tempfile::tempdir().expect("tempdir");
    let id = SessionId::parse(session).expect("session id");
    let socket = mtwire::endpoint::socket_path(dir.path(), &id);
    let listener = UnixListener::bind(&socket).expect("bind fake host");
    spawn_fake_host(listener, id);

    let mut config = Config::try_parse_from(["mt", "--port", "0", "--bind", "127.0.0.1"])
        .expect("config");
    config.runtime_dir = Some(dir.path().to_path_buf());
    config.settings_path = Some(dir.path().join("settings.json"));

    let prepared = run::prepare(config, false).await.expect("prepare coordinator");
    let addr = prepared.local_addr;
    let store = Arc::clone(&prepared.store);
    let handle = tokio::spawn(prepared.run());
    Coordinator { addr, store, _dir: dir, handle }
}

impl Coordinator {
    async fn shutdown(self) {
        self.store.shutdown.cancel();
        let _ = tokio::time::timeout(TIMEOUT, self.handle).await;
    }
}

async fn connect_ws(addr: SocketAddr, path: &str) -> Ws {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}{path}"))
        .await
        .expect("ws connect");
    ws
}

/// Next binary frame, skipping everything else.
async fn next_binary(ws: &mut Ws) -> Bytes {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        assert!(tokio::time::Instant::now() < deadline, "timed out awaiting binary frame");
        match tokio::time::timeout(TIMEOUT, ws.next()).await {
            Ok(Some(Ok(WsMessage::Binary(raw)))) => return raw,
            Ok(Some(Ok(_))) => continue,
            other => panic!("mux stream ended: {other:?}"),
        }
    }
}

/// Next text frame parsed as JSON, skipping everything else.
async fn next_json(ws: &mut Ws) -> serde_json::Value {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        assert!(tokio::time::Instant::now() < deadline, "timed out awaiting text frame");
        match tokio::time::timeout(TIMEOUT, ws.next()).await {
            Ok(Some(Ok(WsMessage::Text(text)))) => {
                return serde_json::from_str(&text).expect("valid JSON")
            }
            Ok(Some(Ok(_))) => continue,
            other => panic!("state stream ended: {other:?}"),
        }
    }
}

#[tokio::test]
async fn reclaimed_session_appears_on_state_channel() {
    let coordinator = start_coordinator("fakesess").await;

    let mut state = connect_ws(coordinator.addr, "/ws/state").await;
    let snapshot = next_json(&mut state).await;
    let sessions = snapshot["sessions"].as_array().expect("sessions array");
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["id"], "fakesess");
    assert_eq!(sessions[0]["running"], true);
    assert_eq!(sessions[0]["cols"], 80);
    assert_eq!(sessions[0]["host_pid"], std::process::id());

    coordinator.shutdown().await;
}

#[tokio::test]
async fn mux_input_output_round_trip() {
    let coordinator = start_coordinator("fakesess").await;
    let id = SessionId::parse("fakesess").expect("id");

    let mut ws = connect_ws(coordinator.addr, "/ws/mux").await;
    ws.send(WsMessage::Binary(mux::encode(MuxFrameType::TerminalInput, &id, b"ping")))
        .await
        .expect("send input");

    let raw = next_binary(&mut ws).await;
    let frame = mux::decode(&raw).expect("decode");
    assert_eq!(frame.frame_type, MuxFrameType::TerminalOutput);
    assert_eq!(frame.session, id);
    let (cols, rows, data) = mux::decode_output_payload(&frame.payload).expect("payload");
    assert_eq!((cols, rows), (80, 24));
    assert_eq!(&data[..], b"pong");

    coordinator.shutdown().await;
}

#[tokio::test]
async fn buffer_request_replays_scrollback() {
    let coordinator = start_coordinator("fakesess").await;
    let id = SessionId::parse("fakesess").expect("id");

    let mut ws = connect_ws(coordinator.addr, "/ws/mux").await;
    ws.send(WsMessage::Binary(mux::encode(MuxFrameType::BufferRequest, &id, &[])))
        .await
        .expect("send buffer request");

    let raw = next_binary(&mut ws).await;
    let frame = mux::decode(&raw).expect("decode");
    assert_eq!(frame.frame_type, MuxFrameType::TerminalOutput);
    let (_, _, data) = mux::decode_output_payload(&frame.payload).expect("payload");
    assert_eq!(&data[..], b"scrollback-bytes");

    coordinator.shutdown().await;
}

#[tokio::test]
async fn two_clients_see_identical_output() {
    let coordinator = start_coordinator("fakesess").await;
    let id = SessionId::parse("fakesess").expect("id");

    let mut first = connect_ws(coordinator.addr, "/ws/mux").await;
    let mut second = connect_ws(coordinator.addr, "/ws/mux").await;
    // Both connection tasks must have subscribed before output is produced.
    tokio::time::sleep(Duration::from_millis(200)).await;

    first
        .send(WsMessage::Binary(mux::encode(MuxFrameType::TerminalInput, &id, b"ping")))
        .await
        .expect("send input");

    let raw_first = next_binary(&mut first).await;
    let raw_second = next_binary(&mut second).await;
    assert_eq!(raw_first, raw_second, "fan-out must deliver identical frames");

    coordinator.shutdown().await;
}

#[tokio::test]
async fn resize_round_trips_into_state_snapshots() {
    let coordinator = start_coordinator("fakesess").await;
    let id = SessionId::parse("fakesess").expect("id");

    let mut state = connect_ws(coordinator.addr, "/ws/state").await;
    let _ = next_json(&mut state).await; // initial snapshot

    let mut ws = connect_ws(coordinator.addr, "/ws/mux").await;
    let payload = mux::encode_resize_payload(132, 40);
    ws.send(WsMessage::Binary(mux::encode(MuxFrameType::Resize, &id, &payload)))
        .await
        .expect("send resize");

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        assert!(tokio::time::Instant::now() < deadline, "dims never updated");
        let snapshot = next_json(&mut state).await;
        let sessions = snapshot["sessions"].as_array().expect("sessions");
        if sessions.first().map(|s| (s["cols"].as_u64(), s["rows"].as_u64()))
            == Some((Some(132), Some(40)))
        {
            break;
        }
    }

    coordinator.shutdown().await;
}

#[tokio::test]
async fn text_frame_on_mux_is_a_protocol_violation() {
    let coordinator = start_coordinator("fakesess").await;

    let mut ws = connect_ws(coordinator.addr, "/ws/mux").await;
    ws.send(WsMessage::Text("not binary".into())).await.expect("send text");

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        assert!(tokio::time::Instant::now() < deadline, "no close frame received");
        match tokio::time::timeout(TIMEOUT, ws.next()).await {
            Ok(Some(Ok(WsMessage::Close(Some(frame))))) => {
                assert_eq!(u16::from(frame.code), 1011);
                break;
            }
            Ok(Some(Ok(_))) => continue,
            Ok(None) | Ok(Some(Err(_))) => break, // peer closed abruptly; acceptable
            Err(_) => panic!("timed out awaiting close"),
        }
    }

    coordinator.shutdown().await;
}

#[tokio::test]
async fn auth_gates_websocket_upgrades() {
    let dir = tempfile::tempdir().expect("tempdir");
    let id = SessionId::parse("authsess").expect("id");
    let socket = mtwire::endpoint::socket_path(dir.path(), &id);
    let listener = UnixListener::bind(&socket).expect("bind fake host");
    spawn_fake_host(listener, id);

    let settings_path = dir.path().join("settings.json");
    std::fs::write(
        &settings_path,
        serde_json::json!({
            "authenticationEnabled": true,
            "passwordHash": mt::settings::hash_password("secret"),
        })
        .to_string(),
    )
    .expect("write settings");

    let mut config = Config::try_parse_from(["mt", "--port", "0", "--bind", "127.0.0.1"])
        .expect("config");
    config.runtime_dir = Some(dir.path().to_path_buf());
    config.settings_path = Some(settings_path);

    let prepared = run::prepare(config, false).await.expect("prepare");
    let addr = prepared.local_addr;
    let store = Arc::clone(&prepared.store);
    let handle = tokio::spawn(prepared.run());

    // No token: rejected before upgrade with HTTP 401.
    let denied = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/state")).await;
    assert!(denied.is_err(), "unauthenticated upgrade must fail");

    // Correct token: accepted.
    let (mut ws, _) =
        tokio_tungstenite::connect_async(format!("ws://{addr}/ws/state?token=secret"))
            .await
            .expect("authenticated connect");
    let snapshot = next_json(&mut ws).await;
    assert!(snapshot["sessions"].is_array());

    store.shutdown.cancel();
    let _ = tokio::time::timeout(TIMEOUT, handle).await;
}
