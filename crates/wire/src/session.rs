// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session identity and descriptor types shared across both wire boundaries.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of bytes a session id occupies inside a mux frame.
pub const SESSION_ID_LEN: usize = 8;

/// Terminal dimensions are clamped into this range on every resize.
pub const DIM_MIN: u16 = 1;
pub const DIM_MAX: u16 = 500;

/// 8-character ASCII session identifier.
///
/// Generated ids are exactly 8 lowercase alphanumeric characters. Parsed ids
/// (from mux frames or socket names) may be shorter; they are NUL-padded to
/// [`SESSION_ID_LEN`] on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random id (8 lowercase alphanumeric characters).
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let id: String = (0..SESSION_ID_LEN)
            .map(|_| {
                let chars = b"abcdefghijklmnopqrstuvwxyz0123456789";
                chars[rng.random_range(0..chars.len())] as char
            })
            .collect();
        Self(id)
    }

    /// Validate and wrap an id string.
    ///
    /// Accepts 1..=8 ASCII graphic characters (no NULs, no whitespace).
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        if s.is_empty() || s.len() > SESSION_ID_LEN {
            anyhow::bail!("session id must be 1..={SESSION_ID_LEN} characters: {s:?}");
        }
        if !s.bytes().all(|b| b.is_ascii_graphic()) {
            anyhow::bail!("session id must be ASCII graphic characters: {s:?}");
        }
        Ok(Self(s.to_owned()))
    }

    /// Decode an id from the NUL-padded 8-byte wire form.
    pub fn from_wire(bytes: &[u8; SESSION_ID_LEN]) -> anyhow::Result<Self> {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(SESSION_ID_LEN);
        let s = std::str::from_utf8(&bytes[..end])?;
        Self::parse(s)
    }

    /// Encode the id into the NUL-padded 8-byte wire form.
    pub fn to_wire(&self) -> [u8; SESSION_ID_LEN] {
        let mut out = [0u8; SESSION_ID_LEN];
        out[..self.0.len()].copy_from_slice(self.0.as_bytes());
        out
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s).map_err(|e| e.to_string())
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

/// Closed set of supported shells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellKind {
    Pwsh,
    Powershell,
    Cmd,
    Bash,
    Zsh,
}

impl ShellKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pwsh => "pwsh",
            Self::Powershell => "powershell",
            Self::Cmd => "cmd",
            Self::Bash => "bash",
            Self::Zsh => "zsh",
        }
    }

    /// Parse a shell name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "pwsh" => Some(Self::Pwsh),
            "powershell" => Some(Self::Powershell),
            "cmd" => Some(Self::Cmd),
            "bash" => Some(Self::Bash),
            "zsh" => Some(Self::Zsh),
            _ => None,
        }
    }

    /// Whether this shell's prompt can be augmented to emit OSC-7 CWD reports.
    pub fn supports_osc7(&self) -> bool {
        match self {
            Self::Bash | Self::Zsh | Self::Pwsh | Self::Powershell => true,
            Self::Cmd => false,
        }
    }
}

impl fmt::Display for ShellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermSize {
    pub cols: u16,
    pub rows: u16,
}

impl TermSize {
    /// Clamp both dimensions into the supported 1..=500 range.
    pub fn clamped(self) -> Self {
        Self {
            cols: self.cols.clamp(DIM_MIN, DIM_MAX),
            rows: self.rows.clamp(DIM_MIN, DIM_MAX),
        }
    }
}

impl Default for TermSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// Full session descriptor returned by the `GetInfo → Info` handshake and
/// fanned out on the state channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub shell: ShellKind,
    pub cols: u16,
    pub rows: u16,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Pid of the ttyhost process serving this session.
    pub host_pid: u32,
    /// Pid of the shell child on the PTY.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pty_pid: Option<u32>,
    pub created_at_ms: u64,
    pub host_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foreground: Option<ForegroundProcess>,
}

/// Descriptor of the process currently considered foreground on a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForegroundProcess {
    pub pid: u32,
    pub name: String,
    pub command_line: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

/// One descendant in a process-tree snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub parent_pid: u32,
    pub name: String,
    pub command_line: String,
}

/// Flat process-tree snapshot rooted at the session's shell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessTree {
    pub shell_pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell_cwd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foreground: Option<ForegroundProcess>,
    pub descendants: Vec<ProcessInfo>,
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
