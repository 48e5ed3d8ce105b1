// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deterministic IPC endpoint naming.
//!
//! Each host binds a Unix-domain socket named from its session id in the
//! runtime directory. The coordinator discovers orphaned hosts by
//! enumerating the directory and matching the prefix.

use std::path::{Path, PathBuf};

use crate::session::SessionId;

/// Prefix for host IPC socket files.
pub const SOCKET_PREFIX: &str = "midterm-tty-";

/// Suffix for host IPC socket files.
pub const SOCKET_SUFFIX: &str = ".sock";

/// Directory where host sockets live: `$XDG_RUNTIME_DIR`, else `/tmp`.
pub fn default_runtime_dir() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

/// Socket path for a session id inside the given runtime directory.
pub fn socket_path(runtime_dir: &Path, id: &SessionId) -> PathBuf {
    runtime_dir.join(format!("{SOCKET_PREFIX}{id}{SOCKET_SUFFIX}"))
}

/// Recover the session id from a socket file name, if it matches the scheme.
pub fn session_from_socket_name(name: &str) -> Option<SessionId> {
    let id = name.strip_prefix(SOCKET_PREFIX)?.strip_suffix(SOCKET_SUFFIX)?;
    SessionId::parse(id).ok()
}

/// Enumerate host sockets in a runtime directory.
pub fn enumerate_sockets(runtime_dir: &Path) -> Vec<(SessionId, PathBuf)> {
    let Ok(entries) = std::fs::read_dir(runtime_dir) else {
        return Vec::new();
    };
    let mut found = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(id) = session_from_socket_name(name) {
            found.push((id, entry.path()));
        }
    }
    found.sort_by(|a, b| a.0.cmp(&b.0));
    found
}

#[cfg(test)]
#[path = "endpoint_tests.rs"]
mod tests;
