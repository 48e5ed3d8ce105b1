// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;

use crate::mux::queue::QueueConfig;

/// Terminal multiplexer coordinator.
#[derive(Debug, Parser)]
#[command(name = "mt", version, about)]
pub struct Config {
    /// HTTP port to listen on (0 = ephemeral).
    #[arg(long, env = "MIDTERM_PORT", default_value = "2000")]
    pub port: u16,

    /// Address to bind to.
    #[arg(long, env = "MIDTERM_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// Run as a launcher: supervise a coordinator child and restart it on crash.
    #[arg(long)]
    pub launcher: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "MIDTERM_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (json or text).
    #[arg(long, env = "MIDTERM_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Directory for host IPC sockets (default: $XDG_RUNTIME_DIR or /tmp).
    #[arg(long, env = "MIDTERM_RUNTIME_DIR")]
    pub runtime_dir: Option<PathBuf>,

    /// Path to the ttyhost binary (default: next to this executable, then PATH).
    #[arg(long, env = "MIDTERM_HOST_BINARY")]
    pub host_binary: Option<PathBuf>,

    /// Path to the settings JSON blob.
    #[arg(long, env = "MIDTERM_SETTINGS")]
    pub settings_path: Option<PathBuf>,

    /// Directory for log files (default: platform data dir).
    #[arg(long, env = "MIDTERM_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Seconds a detached session is kept before removal.
    #[arg(long, default_value = "30")]
    pub detach_grace_secs: u64,

    /// Queued bytes per connection above which background output is coalesced.
    #[arg(long, default_value = "262144")]
    pub soft_watermark: usize,

    /// Coalesced batch size above which output is gzip-compressed.
    #[arg(long, default_value = "4096")]
    pub compress_min: usize,

    /// Queued bytes per session above which the queue is dropped and a
    /// resync is issued.
    #[arg(long, default_value = "1048576")]
    pub session_hard_limit: usize,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind.parse::<std::net::IpAddr>().is_err() {
            anyhow::bail!("invalid bind address: {}", self.bind);
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        if self.session_hard_limit < self.soft_watermark {
            anyhow::bail!("--session-hard-limit must be >= --soft-watermark");
        }
        Ok(())
    }

    pub fn runtime_dir(&self) -> PathBuf {
        self.runtime_dir.clone().unwrap_or_else(mtwire::endpoint::default_runtime_dir)
    }

    pub fn detach_grace(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.detach_grace_secs)
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            soft_watermark: self.soft_watermark,
            compress_min: self.compress_min,
            session_hard_limit: self.session_hard_limit,
            ..QueueConfig::default()
        }
    }

    /// Developer mode: `MIDTERM_ENVIRONMENT=THELAIR`.
    pub fn developer_mode() -> bool {
        std::env::var("MIDTERM_ENVIRONMENT").as_deref() == Ok("THELAIR")
    }
}

#[cfg(test)]
impl Config {
    /// Default config for unit tests.
    pub fn try_parse_for_test() -> Self {
        match Self::try_parse_from(["mt"]) {
            Ok(config) => config,
            Err(e) => panic!("default config parse failed: {e}"),
        }
    }
}

/// De-elevation identity for spawning hosts, from `MM_RUN_AS_UID`/`MM_RUN_AS_GID`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunAsIdentity {
    pub uid: u32,
    pub gid: Option<u32>,
}

/// Read the de-elevation identity from the environment.
pub fn run_as_identity() -> Option<RunAsIdentity> {
    run_as_identity_with(|name| std::env::var(name).ok())
}

/// Inner implementation that accepts a lookup function for testability.
pub fn run_as_identity_with(get_env: impl Fn(&str) -> Option<String>) -> Option<RunAsIdentity> {
    let uid = get_env("MM_RUN_AS_UID")?.parse().ok()?;
    let gid = get_env("MM_RUN_AS_GID").and_then(|g| g.parse().ok());
    Some(RunAsIdentity { uid, gid })
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
