// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host subprocess launch.
//!
//! The coordinator spawns one `ttyhost` per session and verifies the
//! deterministic first stdout line before dialing its IPC endpoint. The
//! host is intentionally left unsupervised by the OS: it must survive a
//! coordinator restart.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use mtwire::session::{SessionId, ShellKind, TermSize};

use crate::config::{run_as_identity, Config};

/// How long the host gets to print its launch line.
pub const LAUNCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Options for a new session's host.
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    pub shell: Option<ShellKind>,
    pub cwd: Option<PathBuf>,
    pub size: Option<TermSize>,
}

/// Locate the ttyhost binary: explicit config, then next to the current
/// executable, then PATH.
pub fn host_binary(config: &Config) -> PathBuf {
    if let Some(ref path) = config.host_binary {
        return path.clone();
    }
    if let Ok(exe) = std::env::current_exe() {
        let sibling = exe.with_file_name("ttyhost");
        if sibling.is_file() {
            return sibling;
        }
    }
    PathBuf::from("ttyhost")
}

/// Check the deterministic launch line: `tty-host <version> starting for
/// session <id>`.
pub fn verify_launch_line(line: &str, id: &SessionId) -> bool {
    let line = line.trim_end();
    let Some(rest) = line.strip_prefix("tty-host ") else {
        return false;
    };
    let mut parts = rest.splitn(2, ' ');
    let version = parts.next().unwrap_or_default();
    let tail = parts.next().unwrap_or_default();
    !version.is_empty() && tail == format!("starting for session {id}")
}

/// Spawn a host for `id` and wait for its launch line. Returns the host pid.
pub async fn spawn_host(
    config: &Config,
    id: &SessionId,
    opts: &SpawnOptions,
) -> anyhow::Result<u32> {
    let binary = host_binary(config);
    let mut command = Command::new(&binary);
    command
        .arg("--session")
        .arg(id.as_str())
        .arg("--runtime-dir")
        .arg(config.runtime_dir())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());

    if let Some(shell) = opts.shell {
        command.arg("--shell").arg(shell.as_str());
    }
    if let Some(ref cwd) = opts.cwd {
        command.arg("--cwd").arg(cwd);
    }
    if let Some(size) = opts.size {
        let size = size.clamped();
        command.arg("--cols").arg(size.cols.to_string());
        command.arg("--rows").arg(size.rows.to_string());
    }

    if let Some(identity) = run_as_identity() {
        debug!(uid = identity.uid, gid = ?identity.gid, "spawning host de-elevated");
        apply_identity(&mut command, identity.uid, identity.gid);
    }

    let mut child = command
        .spawn()
        .with_context(|| format!("spawn host binary {}", binary.display()))?;
    let pid = child
        .id()
        .ok_or_else(|| anyhow::anyhow!("host exited before reporting a pid"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow::anyhow!("host stdout not captured"))?;
    let mut lines = BufReader::new(stdout).lines();

    let first = tokio::time::timeout(LAUNCH_TIMEOUT, lines.next_line())
        .await
        .context("host launch line timed out")?
        .context("read host launch line")?
        .ok_or_else(|| anyhow::anyhow!("host exited without a launch line"))?;
    if !verify_launch_line(&first, id) {
        let _ = child.start_kill();
        anyhow::bail!("unexpected host launch line: {first:?}");
    }
    info!(session = %id, pid, "host launched");

    // Detach: keep draining stdout and reap the child if it dies while we
    // are still alive, but never kill it with us.
    tokio::spawn(async move {
        while let Ok(Some(_)) = lines.next_line().await {}
        let _ = child.wait().await;
    });

    Ok(pid)
}

fn apply_identity(command: &mut Command, uid: u32, gid: Option<u32>) {
    command.uid(uid);
    if let Some(gid) = gid {
        command.gid(gid);
    }
}

/// Liveness probe for a host pid (signal 0).
pub fn host_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

/// Socket path for a session under this coordinator's runtime dir.
pub fn socket_path(config: &Config, id: &SessionId) -> PathBuf {
    mtwire::endpoint::socket_path(&config.runtime_dir(), id)
}

#[cfg(test)]
#[path = "spawn_tests.rs"]
mod tests;
