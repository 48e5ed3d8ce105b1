// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Settings JSON blob.
//!
//! The full option set belongs to the settings UI; the coordinator core
//! reads only `defaultShell`, `authenticationEnabled`, `passwordHash`, and
//! `logLevel`. Unknown keys are preserved so a core round-trip never drops
//! UI options.

use std::path::{Path, PathBuf};

use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use mtwire::session::ShellKind;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_shell: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_user: Option<String>,
    #[serde(default)]
    pub authentication_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

impl Settings {
    /// Default shell from settings, when it names a supported shell.
    pub fn default_shell_kind(&self) -> Option<ShellKind> {
        self.default_shell.as_deref().and_then(ShellKind::from_name)
    }

    /// Whether the given password matches the stored hash.
    ///
    /// Always false when auth is enabled but no hash is stored.
    pub fn password_matches(&self, password: &str) -> bool {
        match self.password_hash.as_deref() {
            Some(stored) => constant_time_eq(&hash_password(password), stored),
            None => false,
        }
    }
}

/// Platform settings path: `<config dir>/midterm/settings.json`.
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("midterm")
        .join("settings.json")
}

/// Platform log directory: `<data dir>/midterm/logs`.
pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("midterm")
        .join("logs")
}

/// Load settings, returning defaults when the file is absent.
///
/// A present-but-malformed file is an operator error and fails loudly.
pub fn load(path: &Path) -> anyhow::Result<Settings> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(serde_json::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Settings::default()),
        Err(e) => Err(e.into()),
    }
}

/// SHA-256 password hash, base64-encoded (the stored `passwordHash` format).
pub fn hash_password(password: &str) -> String {
    let digest = Sha256::digest(password.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// Constant-time string comparison for credential checks.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
