// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-tree telemetry.
//!
//! There is no portable process-lifecycle event API, so the monitor polls:
//! every 500 ms it enumerates the shell's descendants, set-diffs against the
//! previous poll for enter/exit events, and applies a leaf-of-descendants
//! heuristic to pick the foreground process. Snapshots are pushed on diff
//! only. A poll that runs longer than 2 s is abandoned and retried next
//! cycle.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sysinfo::{ProcessesToUpdate, System};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use mtwire::ipc::{ProcessEvent, ProcessEventKind};
use mtwire::session::{ForegroundProcess, ProcessInfo, ProcessTree};

/// Poll cadence.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A single poll is abandoned after this long.
pub const POLL_DEADLINE: Duration = Duration::from_secs(2);

/// Host-initiated process telemetry.
#[derive(Debug, Clone)]
pub enum Telemetry {
    Process(ProcessEvent),
    Foreground(Option<ForegroundProcess>),
    Snapshot(ProcessTree),
}

/// Process monitor capability set.
pub trait ProcessMonitor: Send + Sync {
    /// Begin monitoring the tree rooted at `root_pid`.
    fn start(&self, root_pid: u32);
    /// Stop monitoring.
    fn stop(&self);
    /// Foreground descriptor from the most recent observation.
    fn foreground(&self) -> Option<ForegroundProcess>;
    /// Tree snapshot from the most recent observation.
    fn snapshot(&self) -> Option<ProcessTree>;
}

/// Poll-and-diff monitor backed by `sysinfo`.
pub struct PollingMonitor {
    telemetry_tx: broadcast::Sender<Telemetry>,
    cancel: Mutex<Option<CancellationToken>>,
    last: Arc<Mutex<Option<ProcessTree>>>,
    interval: Duration,
}

impl PollingMonitor {
    pub fn new(telemetry_tx: broadcast::Sender<Telemetry>) -> Self {
        Self {
            telemetry_tx,
            cancel: Mutex::new(None),
            last: Arc::new(Mutex::new(None)),
            interval: POLL_INTERVAL,
        }
    }

    #[cfg(test)]
    fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl ProcessMonitor for PollingMonitor {
    fn start(&self, root_pid: u32) {
        let token = CancellationToken::new();
        {
            let mut cancel = self.cancel.lock();
            if let Some(prev) = cancel.take() {
                prev.cancel();
            }
            *cancel = Some(token.clone());
        }

        let tx = self.telemetry_tx.clone();
        let last = Arc::clone(&self.last);
        let interval = self.interval;
        tokio::spawn(async move {
            poll_loop(root_pid, tx, last, interval, token).await;
        });
    }

    fn stop(&self) {
        if let Some(token) = self.cancel.lock().take() {
            token.cancel();
        }
    }

    fn foreground(&self) -> Option<ForegroundProcess> {
        self.last.lock().as_ref().and_then(|t| t.foreground.clone())
    }

    fn snapshot(&self) -> Option<ProcessTree> {
        self.last.lock().clone()
    }
}

async fn poll_loop(
    root_pid: u32,
    tx: broadcast::Sender<Telemetry>,
    last: Arc<Mutex<Option<ProcessTree>>>,
    interval: Duration,
    cancel: CancellationToken,
) {
    debug!(root_pid, "process monitor started");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => {
                debug!(root_pid, "process monitor stopped");
                return;
            }
        }

        let scan = tokio::task::spawn_blocking(move || scan_tree(root_pid));
        let tree = match tokio::time::timeout(POLL_DEADLINE, scan).await {
            Ok(Ok(tree)) => tree,
            Ok(Err(e)) => {
                warn!(root_pid, "process scan panicked: {e}");
                continue;
            }
            Err(_) => {
                warn!(root_pid, "process scan exceeded {POLL_DEADLINE:?}, retrying next cycle");
                continue;
            }
        };

        let prev = last.lock().replace(tree.clone());
        let prev_descendants = prev.as_ref().map(|t| t.descendants.as_slice()).unwrap_or(&[]);

        let events = diff_descendants(prev_descendants, &tree.descendants);
        let changed = !events.is_empty();
        for event in events {
            let _ = tx.send(Telemetry::Process(event));
        }

        let prev_fg = prev.as_ref().and_then(|t| t.foreground.as_ref());
        if prev_fg != tree.foreground.as_ref() {
            let _ = tx.send(Telemetry::Foreground(tree.foreground.clone()));
            let _ = tx.send(Telemetry::Snapshot(tree));
        } else if changed {
            let _ = tx.send(Telemetry::Snapshot(tree));
        }
    }
}

/// Enumerate the tree rooted at `root_pid` via a fresh sysinfo scan.
fn scan_tree(root_pid: u32) -> ProcessTree {
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);

    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (pid, proc_) in sys.processes() {
        if let Some(parent) = proc_.parent() {
            children.entry(parent.as_u32()).or_default().push(pid.as_u32());
        }
    }

    // BFS from the root, excluding the root itself.
    let mut descendants = Vec::new();
    let mut queue: Vec<u32> = children.get(&root_pid).cloned().unwrap_or_default();
    let mut seen = HashSet::new();
    while let Some(pid) = queue.pop() {
        if !seen.insert(pid) {
            continue;
        }
        if let Some(proc_) = sys.process(sysinfo::Pid::from_u32(pid)) {
            descendants.push(ProcessInfo {
                pid,
                parent_pid: proc_.parent().map(|p| p.as_u32()).unwrap_or(root_pid),
                name: proc_.name().to_string_lossy().into_owned(),
                command_line: proc_
                    .cmd()
                    .iter()
                    .map(|a| a.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(" "),
            });
        }
        queue.extend(children.get(&pid).cloned().unwrap_or_default());
    }
    descendants.sort_by_key(|p| p.pid);

    let shell_cwd = sys
        .process(sysinfo::Pid::from_u32(root_pid))
        .and_then(|p| p.cwd())
        .map(|p| p.display().to_string());

    let foreground = pick_foreground(root_pid, &descendants).map(|info| {
        let cwd = sys
            .process(sysinfo::Pid::from_u32(info.pid))
            .and_then(|p| p.cwd())
            .map(|p| p.display().to_string());
        ForegroundProcess {
            pid: info.pid,
            name: info.name.clone(),
            command_line: info.command_line.clone(),
            cwd,
        }
    });

    ProcessTree { shell_pid: root_pid, shell_cwd, foreground, descendants }
}

/// Set-diff two descendant lists into enter/exit events.
pub fn diff_descendants(prev: &[ProcessInfo], cur: &[ProcessInfo]) -> Vec<ProcessEvent> {
    let prev_pids: HashSet<u32> = prev.iter().map(|p| p.pid).collect();
    let cur_pids: HashSet<u32> = cur.iter().map(|p| p.pid).collect();

    let mut events = Vec::new();
    for p in cur {
        if !prev_pids.contains(&p.pid) {
            events.push(ProcessEvent { kind: ProcessEventKind::Started, process: p.clone() });
        }
    }
    for p in prev {
        if !cur_pids.contains(&p.pid) {
            events.push(ProcessEvent { kind: ProcessEventKind::Exited, process: p.clone() });
        }
    }
    events
}

/// Leaf-of-descendants heuristic: the deepest process with no children of
/// its own is the best guess at what currently owns the terminal. Ties go
/// to the highest pid (most recently spawned on the platforms we poll).
pub fn pick_foreground(root_pid: u32, descendants: &[ProcessInfo]) -> Option<&ProcessInfo> {
    if descendants.is_empty() {
        return None;
    }
    let parents: HashSet<u32> = descendants.iter().map(|p| p.parent_pid).collect();
    let depth_of = |p: &ProcessInfo| {
        let by_pid: HashMap<u32, &ProcessInfo> =
            descendants.iter().map(|d| (d.pid, d)).collect();
        let mut depth = 0usize;
        let mut cursor = p.parent_pid;
        while cursor != root_pid {
            match by_pid.get(&cursor) {
                Some(parent) => {
                    depth += 1;
                    cursor = parent.parent_pid;
                }
                None => break,
            }
            if depth > descendants.len() {
                break; // cycle guard
            }
        }
        depth
    };

    descendants
        .iter()
        .filter(|p| !parents.contains(&p.pid))
        .max_by_key(|p| (depth_of(p), p.pid))
}

#[cfg(test)]
#[path = "procmon_tests.rs"]
mod tests;
