// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::ffi::CString;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use bytes::Bytes;
use nix::libc;
use nix::pty::{forkpty, ForkptyResult, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execvp, Pid};
use tokio::sync::mpsc;

use mtwire::session::TermSize;

use super::nbio::Master;
use super::ExitStatus;
use crate::shell::ResolvedShell;

/// One chunk of PTY output stamped with the dims in effect when it was read.
#[derive(Debug, Clone)]
pub struct OutputChunk {
    pub cols: u16,
    pub rows: u16,
    pub data: Bytes,
}

/// PTY read buffer size.
const READ_BUF: usize = 8192;

/// The PTY this host exclusively owns, with the shell spawned on it.
pub struct HostPty {
    shared: Arc<PtyShared>,
    child_pid: Pid,
}

struct PtyShared {
    master: Master,
    cols: AtomicU16,
    rows: AtomicU16,
}

/// Cheap handle for applying resizes while [`HostPty::run`] owns the I/O loop.
#[derive(Clone)]
pub struct PtyResizer {
    shared: Arc<PtyShared>,
}

impl HostPty {
    /// Fork a shell onto a fresh PTY of the given size.
    // forkpty requires unsafe: post-fork child is partially initialized
    #[allow(unsafe_code)]
    pub fn spawn(shell: &ResolvedShell, cwd: &Path, size: TermSize) -> anyhow::Result<Self> {
        let size = size.clamped();
        let winsize = Winsize {
            ws_col: size.cols,
            ws_row: size.rows,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        // SAFETY: forkpty is unsafe because the child is in a
        // partially-initialized state after fork. We immediately exec.
        let result = unsafe { forkpty(&winsize, None) }.context("forkpty failed")?;

        match result {
            ForkptyResult::Child => {
                for (key, value) in &shell.env {
                    std::env::set_var(key, value);
                }
                let _ = std::env::set_current_dir(cwd);

                let mut argv: Vec<CString> = Vec::with_capacity(1 + shell.args.len());
                argv.push(
                    CString::new(shell.program.as_os_str().as_encoded_bytes())
                        .context("shell path contains NUL")?,
                );
                for arg in &shell.args {
                    argv.push(CString::new(arg.as_bytes()).context("shell arg contains NUL")?);
                }

                execvp(&argv[0], &argv).context("execvp failed")?;
                unreachable!();
            }
            ForkptyResult::Parent { child, master } => {
                let master = Master::new(master).context("PTY master setup failed")?;
                Ok(Self {
                    shared: Arc::new(PtyShared {
                        master,
                        cols: AtomicU16::new(size.cols),
                        rows: AtomicU16::new(size.rows),
                    }),
                    child_pid: child,
                })
            }
        }
    }

    pub fn child_pid(&self) -> u32 {
        self.child_pid.as_raw() as u32
    }

    pub fn resizer(&self) -> PtyResizer {
        PtyResizer { shared: Arc::clone(&self.shared) }
    }

    /// Pump the PTY until the shell exits.
    ///
    /// Output chunks are stamped with the dims in effect at read time, so a
    /// resize is visible on the very next chunk. Returns the shell's exit
    /// status after reaping.
    pub async fn run(
        self,
        output_tx: mpsc::Sender<OutputChunk>,
        mut input_rx: mpsc::Receiver<Bytes>,
    ) -> anyhow::Result<ExitStatus> {
        let pid = self.child_pid;
        let shared = self.shared;
        let mut buf = vec![0u8; READ_BUF];
        let mut input_open = true;

        loop {
            tokio::select! {
                result = shared.master.read_chunk(&mut buf) => {
                    match result {
                        Ok(0) => break,
                        Ok(n) => {
                            let chunk = OutputChunk {
                                cols: shared.cols.load(Ordering::Acquire),
                                rows: shared.rows.load(Ordering::Acquire),
                                data: Bytes::copy_from_slice(&buf[..n]),
                            };
                            if output_tx.send(chunk).await.is_err() {
                                break;
                            }
                        }
                        Err(e) if e.raw_os_error() == Some(libc::EIO) => break,
                        Err(e) => return Err(e.into()),
                    }
                }
                input = input_rx.recv(), if input_open => {
                    match input {
                        Some(data) => shared.master.write_all(&data).await?,
                        None => input_open = false,
                    }
                }
            }
        }

        // Reap on a blocking thread to keep the runtime free.
        let status = tokio::task::spawn_blocking(move || wait_for_exit(pid))
            .await
            .context("join wait thread")??;
        Ok(status)
    }
}

/// Best-effort shell termination: SIGHUP, short grace, then SIGKILL.
pub fn terminate_shell(pid: u32) {
    let pid = Pid::from_raw(pid as i32);
    let _ = kill(pid, Signal::SIGHUP);
    std::thread::sleep(std::time::Duration::from_millis(50));
    let _ = kill(pid, Signal::SIGKILL);
    let _ = waitpid(pid, Some(WaitPidFlag::WNOHANG));
}

impl PtyResizer {
    /// Clamp, apply via TIOCSWINSZ, and record the new dims.
    ///
    /// The dim store happens before returning, so any output chunk read
    /// after the ack carries the new size.
    // TIOCSWINSZ ioctl requires unsafe for the libc::ioctl call
    #[allow(unsafe_code)]
    pub fn resize(&self, size: TermSize) -> anyhow::Result<TermSize> {
        let size = size.clamped();
        let ws = Winsize {
            ws_col: size.cols,
            ws_row: size.rows,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        // SAFETY: TIOCSWINSZ is a well-defined ioctl that sets the window
        // size on the PTY master fd. The Winsize struct is fully initialized.
        let ret =
            unsafe { libc::ioctl(self.shared.master.as_raw_fd(), libc::TIOCSWINSZ, &ws) };
        if ret < 0 {
            bail!("TIOCSWINSZ ioctl failed: {}", std::io::Error::last_os_error());
        }

        self.shared.cols.store(size.cols, Ordering::Release);
        self.shared.rows.store(size.rows, Ordering::Release);
        Ok(size)
    }

    /// Current dims as last applied.
    pub fn dims(&self) -> TermSize {
        TermSize {
            cols: self.shared.cols.load(Ordering::Acquire),
            rows: self.shared.rows.load(Ordering::Acquire),
        }
    }
}

/// Block until the child exits and convert to our `ExitStatus`.
fn wait_for_exit(pid: Pid) -> anyhow::Result<ExitStatus> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => {
                return Ok(ExitStatus { code: Some(code), signal: None });
            }
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                return Ok(ExitStatus { code: None, signal: Some(sig as i32) });
            }
            Ok(_) => continue,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(nix::errno::Errno::ECHILD) => {
                return Ok(ExitStatus { code: None, signal: None });
            }
            Err(e) => bail!("waitpid failed: {e}"),
        }
    }
}
