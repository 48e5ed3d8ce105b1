// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host bootstrap, used by `main` and by the integration tests.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::UnixListener;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter};

use mtwire::endpoint;
use mtwire::session::SessionInfo;

use crate::config::Config;
use crate::host::{HostChannels, HostState, LogLevelFn};
use crate::procmon::{PollingMonitor, ProcessMonitor};
use crate::pty::spawn::terminate_shell;
use crate::pty::HostPty;
use crate::scrollback::Scrollback;
use crate::server;
use crate::shell;

/// Map a wire log level byte onto a tracing filter directive.
fn level_directive(level: u8) -> &'static str {
    match level {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    }
}

/// Initialize tracing on stderr (stdout carries the launch line) and return
/// the callback that `SetLogLevel` applies through the reload handle.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &Config) -> LogLevelFn {
    let default = if config.debug { "debug" } else { "info" };
    let directive = std::env::var("MIDTERM_LOG_LEVEL").unwrap_or_else(|_| default.to_owned());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

    let (filter_layer, handle) = reload::Layer::new(filter);
    let result = tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
    drop(result);

    Box::new(move |level| {
        let directive = level_directive(level);
        if handle.reload(EnvFilter::new(directive)).is_ok() {
            tracing::info!("log level set to {directive}");
        }
    })
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Run a session host to completion. Returns the process exit code.
pub async fn run(config: Config) -> anyhow::Result<i32> {
    let set_log_level = init_tracing(&config);
    prepare(config, set_log_level).await?.run().await
}

/// A bound, spawned host ready to serve IPC clients.
pub struct PreparedHost {
    pub state: Arc<HostState>,
    pub socket: PathBuf,
    listener: UnixListener,
    monitor: PollingMonitor,
}

/// Spawn the shell, bind the IPC endpoint, and start the host tasks.
pub async fn prepare(config: Config, set_log_level: LogLevelFn) -> anyhow::Result<PreparedHost> {
    let session_id = config.session_id()?;
    let shell_kind = config.shell_kind();
    let resolved = shell::resolve(shell_kind)?;
    let cwd = match config.cwd.clone() {
        Some(dir) => dir,
        None => dirs_home().or_else(|| std::env::current_dir().ok()).unwrap_or_else(|| "/".into()),
    };
    let size = config.term_size();

    let pty = HostPty::spawn(&resolved, &cwd, size).context("PTY allocation failed")?;
    let shell_pid = pty.child_pid();
    let resizer = pty.resizer();
    info!(session = %session_id, shell = %shell_kind, pid = shell_pid, "shell spawned");

    let socket = endpoint::socket_path(&config.runtime_dir(), &session_id);
    let _ = std::fs::remove_file(&socket);
    let listener = UnixListener::bind(&socket)
        .with_context(|| format!("bind {}", socket.display()))?;
    info!("IPC listening on {}", socket.display());

    let (output_tx, _) = broadcast::channel(1024);
    let (state_tx, _) = broadcast::channel(64);
    let (telemetry_tx, _) = broadcast::channel(256);
    let (input_tx, input_rx) = mpsc::channel(256);
    let (pty_out_tx, pty_out_rx) = mpsc::channel(256);

    let info = SessionInfo {
        id: session_id,
        shell: shell_kind,
        cols: size.cols,
        rows: size.rows,
        running: true,
        exit_code: None,
        name: None,
        host_pid: std::process::id(),
        pty_pid: Some(shell_pid),
        created_at_ms: now_ms(),
        host_version: env!("CARGO_PKG_VERSION").to_owned(),
        cwd: Some(cwd.display().to_string()),
        foreground: None,
    };

    let state = Arc::new(HostState {
        info: RwLock::new(info),
        scrollback: parking_lot::Mutex::new(Scrollback::new(config.scrollback_bytes)),
        channels: HostChannels { output_tx, state_tx, telemetry_tx: telemetry_tx.clone(), input_tx },
        resizer,
        shell_pid,
        shutdown: CancellationToken::new(),
        close_requested: AtomicBool::new(false),
        set_log_level,
    });

    let pty_handle = tokio::spawn(pty.run(pty_out_tx, input_rx));
    tokio::spawn(crate::host::pump_output(Arc::clone(&state), pty_out_rx));
    tokio::spawn(crate::host::watch_exit(Arc::clone(&state), pty_handle));
    tokio::spawn(crate::host::track_foreground(Arc::clone(&state)));

    let monitor = PollingMonitor::new(telemetry_tx);
    monitor.start(shell_pid);

    // SIGTERM/SIGINT tear the host down; the PTY exit path handles SIGHUP
    // to the shell on close.
    {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
            let mut sigint =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();
            tokio::select! {
                _ = async {
                    if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
                } => {
                    info!("received SIGTERM");
                }
                _ = async {
                    if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
                } => {
                    info!("received SIGINT");
                }
            }
            state.shutdown.cancel();
        });
    }

    Ok(PreparedHost { state, socket, listener, monitor })
}

impl PreparedHost {
    /// Serve IPC clients until shutdown; clean up the endpoint on exit.
    pub async fn run(self) -> anyhow::Result<i32> {
        server::serve(Arc::clone(&self.state), self.listener).await;

        self.monitor.stop();
        if self.state.info.read().await.running {
            warn!("shutting down with shell still running, terminating");
            terminate_shell(self.state.shell_pid);
        }
        let _ = std::fs::remove_file(&self.socket);
        Ok(0)
    }
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}
