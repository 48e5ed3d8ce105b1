// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared host state and the output pump connecting the PTY to scrollback,
//! CWD tracking, and the IPC fan-out channels.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mtwire::ipc::StateChange;
use mtwire::session::{SessionInfo, TermSize};

use crate::osc::OscScanner;
use crate::procmon::Telemetry;
use crate::pty::{ExitStatus, OutputChunk, PtyResizer};
use crate::scrollback::Scrollback;

/// Channel endpoints connecting the PTY, the monitor, and IPC clients.
pub struct HostChannels {
    pub output_tx: broadcast::Sender<OutputChunk>,
    pub state_tx: broadcast::Sender<StateChange>,
    pub telemetry_tx: broadcast::Sender<Telemetry>,
    pub input_tx: mpsc::Sender<Bytes>,
}

/// Callback applying a new log level (wired to the tracing reload handle).
pub type LogLevelFn = Box<dyn Fn(u8) + Send + Sync>;

/// Shared state for one hosted session.
pub struct HostState {
    pub info: RwLock<SessionInfo>,
    pub scrollback: parking_lot::Mutex<Scrollback>,
    pub channels: HostChannels,
    pub resizer: PtyResizer,
    pub shell_pid: u32,
    pub shutdown: CancellationToken,
    pub close_requested: AtomicBool,
    pub set_log_level: LogLevelFn,
}

impl HostState {
    /// Current state-change payload from the descriptor.
    pub async fn state_change(&self) -> StateChange {
        let info = self.info.read().await;
        StateChange {
            running: info.running,
            exit_code: info.exit_code,
            cwd: info.cwd.clone(),
            name: info.name.clone(),
        }
    }

    /// Clamp and apply a resize, recording the new dims on the descriptor.
    pub async fn apply_resize(&self, size: TermSize) -> anyhow::Result<TermSize> {
        let applied = self.resizer.resize(size)?;
        let mut info = self.info.write().await;
        info.cols = applied.cols;
        info.rows = applied.rows;
        Ok(applied)
    }

    /// Update the display name and notify subscribers.
    pub async fn set_name(&self, name: String) {
        {
            let mut info = self.info.write().await;
            info.name = if name.is_empty() { None } else { Some(name) };
        }
        let _ = self.channels.state_tx.send(self.state_change().await);
    }

    /// Record the exit exactly once and notify subscribers.
    ///
    /// Later calls are ignored so the exit code can never change.
    pub async fn mark_exited(&self, status: ExitStatus) {
        {
            let mut info = self.info.write().await;
            if !info.running {
                return;
            }
            info.running = false;
            info.exit_code = Some(status.unix_code());
        }
        info!(code = status.unix_code(), "shell exited");
        let _ = self.channels.state_tx.send(self.state_change().await);

        if self.close_requested.load(Ordering::Acquire) {
            self.shutdown.cancel();
        }
    }

    /// Handle a `Close` request: terminate the shell and prepare exit.
    pub async fn begin_close(&self) {
        self.close_requested.store(true, Ordering::Release);
        let running = self.info.read().await.running;
        if running {
            debug!(pid = self.shell_pid, "close requested, signalling shell");
            let _ = kill(Pid::from_raw(self.shell_pid as i32), Signal::SIGHUP);
        } else {
            self.shutdown.cancel();
        }
    }
}

/// Pump PTY output into scrollback, the OSC-7 scanner, and the fan-out
/// channel. Returns when the PTY side closes.
pub async fn pump_output(state: Arc<HostState>, mut pty_rx: mpsc::Receiver<OutputChunk>) {
    let mut scanner = OscScanner::new();
    while let Some(chunk) = pty_rx.recv().await {
        state.scrollback.lock().write(&chunk.data);

        if let Some(cwd) = scanner.feed(&chunk.data) {
            let changed = {
                let mut info = state.info.write().await;
                if info.cwd.as_deref() != Some(cwd.as_str()) {
                    info.cwd = Some(cwd);
                    true
                } else {
                    false
                }
            };
            if changed {
                let _ = state.channels.state_tx.send(state.state_change().await);
            }
        }

        let _ = state.channels.output_tx.send(chunk);
    }
    debug!("PTY output channel closed");
}

/// Await the PTY task and record the exit.
pub async fn watch_exit(state: Arc<HostState>, handle: JoinHandle<anyhow::Result<ExitStatus>>) {
    let status = match handle.await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            warn!("PTY task failed: {e:#}");
            ExitStatus { code: Some(1), signal: None }
        }
        Err(e) => {
            warn!("PTY task panicked: {e}");
            ExitStatus { code: Some(1), signal: None }
        }
    };
    state.mark_exited(status).await;
}

/// Mirror foreground telemetry onto the session descriptor.
pub async fn track_foreground(state: Arc<HostState>) {
    let mut tel_rx = state.channels.telemetry_tx.subscribe();
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => return,
            event = tel_rx.recv() => match event {
                Ok(Telemetry::Foreground(fg)) => {
                    state.info.write().await.foreground = fg;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("foreground tracker lagged by {n}");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
        }
    }
}
