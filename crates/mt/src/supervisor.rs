// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Launcher mode: supervise a coordinator child.
//!
//! `mt --launcher` spawns the coordinator (this same executable, minus the
//! flag) and restarts it on non-zero exit with exponential backoff, giving
//! up when the circuit breaker trips.

use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{error, info, warn};

use crate::config::Config;

/// Restart policy knobs.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Trip after this many failures inside `window`.
    pub max_failures: u32,
    pub window: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_failures: 5,
            window: Duration::from_secs(60),
        }
    }
}

/// Backoff state across restarts.
#[derive(Debug)]
pub struct Backoff {
    policy: RestartPolicy,
    current: Duration,
    failures: Vec<Instant>,
}

impl Backoff {
    pub fn new(policy: RestartPolicy) -> Self {
        let current = policy.initial_delay;
        Self { policy, current, failures: Vec::new() }
    }

    /// Record a failure at `now` and return the delay before the next
    /// attempt, or `None` when the circuit breaker has tripped.
    pub fn on_failure(&mut self, now: Instant) -> Option<Duration> {
        self.failures.push(now);
        let window = self.policy.window;
        self.failures.retain(|&t| now.duration_since(t) <= window);
        if self.failures.len() as u32 >= self.policy.max_failures {
            return None;
        }
        let delay = self.current;
        self.current = (self.current * 2).min(self.policy.max_delay);
        Some(delay)
    }

    /// A healthy run resets the delay curve (failures keep aging out of
    /// the window on their own).
    pub fn on_success(&mut self) {
        self.current = self.policy.initial_delay;
    }

    pub fn recent_failures(&self) -> usize {
        self.failures.len()
    }
}

/// Run the launcher loop. Returns the final child exit code.
pub async fn run_launcher(config: &Config) -> anyhow::Result<i32> {
    let exe = std::env::current_exe().context("resolve current executable")?;
    let policy = RestartPolicy::default();
    let healthy_run = policy.window;
    let mut backoff = Backoff::new(policy);

    loop {
        info!("launcher: starting coordinator");
        let started = Instant::now();
        let mut child = tokio::process::Command::new(&exe)
            .arg("--port")
            .arg(config.port.to_string())
            .arg("--bind")
            .arg(&config.bind)
            .spawn()
            .context("spawn coordinator child")?;

        let status = child.wait().await.context("wait for coordinator child")?;
        let code = status.code().unwrap_or(1);

        if code == 0 {
            info!("launcher: coordinator exited cleanly");
            return Ok(0);
        }

        // A run that survived a full breaker window counts as healthy.
        if started.elapsed() > healthy_run {
            backoff.on_success();
        }

        match backoff.on_failure(Instant::now()) {
            Some(delay) => {
                warn!(code, "launcher: coordinator crashed, restarting in {delay:?}");
                tokio::time::sleep(delay).await;
            }
            None => {
                error!(
                    code,
                    failures = backoff.recent_failures(),
                    "launcher: circuit breaker tripped, giving up"
                );
                return Ok(code);
            }
        }
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
