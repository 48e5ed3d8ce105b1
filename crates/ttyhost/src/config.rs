// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;

use mtwire::session::{SessionId, ShellKind, TermSize};

/// Per-session terminal host.
#[derive(Debug, Parser)]
#[command(name = "ttyhost", version, about)]
pub struct Config {
    /// Session id this host serves (8 ASCII characters).
    #[arg(long, env = "MIDTERM_SESSION")]
    pub session: String,

    /// Shell to spawn (pwsh, powershell, cmd, bash, zsh). Default: platform shell.
    #[arg(long, env = "MIDTERM_SHELL")]
    pub shell: Option<String>,

    /// Working directory for the shell.
    #[arg(long, env = "MIDTERM_CWD")]
    pub cwd: Option<PathBuf>,

    /// Initial terminal columns.
    #[arg(long, default_value = "80")]
    pub cols: u16,

    /// Initial terminal rows.
    #[arg(long, default_value = "24")]
    pub rows: u16,

    /// Enable debug logging.
    #[arg(long)]
    pub debug: bool,

    /// Directory for the IPC socket (default: $XDG_RUNTIME_DIR or /tmp).
    #[arg(long, env = "MIDTERM_RUNTIME_DIR")]
    pub runtime_dir: Option<PathBuf>,

    /// Scrollback ring capacity in bytes.
    #[arg(long, env = "MIDTERM_SCROLLBACK", default_value = "102400")]
    pub scrollback_bytes: usize,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.session_id()?;
        if let Some(ref shell) = self.shell {
            if ShellKind::from_name(shell).is_none() {
                anyhow::bail!("invalid shell: {shell}");
            }
        }
        if let Some(ref cwd) = self.cwd {
            if !cwd.is_dir() {
                anyhow::bail!("cwd is not a directory: {}", cwd.display());
            }
        }
        Ok(())
    }

    pub fn session_id(&self) -> anyhow::Result<SessionId> {
        SessionId::parse(&self.session)
    }

    /// Shell kind from the flag, falling back to the platform default.
    pub fn shell_kind(&self) -> ShellKind {
        self.shell
            .as_deref()
            .and_then(ShellKind::from_name)
            .unwrap_or_else(crate::shell::default_shell)
    }

    /// Requested terminal size, clamped into the supported range.
    pub fn term_size(&self) -> TermSize {
        TermSize { cols: self.cols, rows: self.rows }.clamped()
    }

    pub fn runtime_dir(&self) -> PathBuf {
        self.runtime_dir.clone().unwrap_or_else(mtwire::endpoint::default_runtime_dir)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
