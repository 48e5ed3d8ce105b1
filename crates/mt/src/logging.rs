// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tracing setup with a context ring.
//!
//! Every severity is recorded into a bounded in-memory ring; when an ERROR
//! event fires, the ring is flushed to the persisted log ahead of the error
//! line so the file carries the lead-up, not just the failure. A cooldown
//! prevents an error storm from flushing the ring on every line.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::io::Write;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Entries retained for context.
pub const RING_CAPACITY: usize = 1000;

/// Minimum gap between two context flushes.
pub const FLUSH_COOLDOWN: Duration = Duration::from_secs(30);

/// Bounded ring of recently formatted log lines.
pub struct ContextRing {
    entries: Mutex<VecDeque<String>>,
    capacity: usize,
    cooldown: Duration,
    last_flush: Mutex<Option<Instant>>,
}

impl ContextRing {
    pub fn new(capacity: usize, cooldown: Duration) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            cooldown,
            last_flush: Mutex::new(None),
        }
    }

    /// Record one line, discarding the oldest past capacity.
    pub fn push(&self, line: String) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(line);
    }

    /// Drain the ring for an error flush, honoring the cooldown.
    ///
    /// Returns `None` while a previous flush is cooling down (the ring is
    /// still cleared so stale context is never re-flushed later).
    pub fn take_for_flush(&self) -> Option<Vec<String>> {
        let drained: Vec<String> = self.entries.lock().drain(..).collect();

        let mut last = self.last_flush.lock();
        let now = Instant::now();
        if let Some(prev) = *last {
            if now.duration_since(prev) < self.cooldown {
                return None;
            }
        }
        if drained.is_empty() {
            return None;
        }
        *last = Some(now);
        Some(drained)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Layer feeding the ring and flushing it ahead of error lines.
///
/// Must be registered before the fmt layer writing to the same sink so the
/// flushed context lands ahead of the error line itself.
pub struct ContextRingLayer<W> {
    ring: std::sync::Arc<ContextRing>,
    sink: Mutex<W>,
}

impl<W: Write> ContextRingLayer<W> {
    pub fn new(ring: std::sync::Arc<ContextRing>, sink: W) -> Self {
        Self { ring, sink: Mutex::new(sink) }
    }
}

impl<S, W> Layer<S> for ContextRingLayer<W>
where
    S: Subscriber,
    W: Write + Send + 'static,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::ERROR {
            if let Some(context) = self.ring.take_for_flush() {
                let mut sink = self.sink.lock();
                let _ = writeln!(sink, "---- context ring ({} entries) ----", context.len());
                for entry in context {
                    let _ = writeln!(sink, "{entry}");
                }
                let _ = writeln!(sink, "---- end context ring ----");
                let _ = sink.flush();
            }
        } else {
            self.ring.push(format_event(event));
        }
    }
}

/// Render an event as `LEVEL target: message field=value …`.
fn format_event(event: &Event<'_>) -> String {
    let meta = event.metadata();
    let mut line = format!("{} {}: ", meta.level(), meta.target());
    let mut visitor = LineVisitor { line: &mut line };
    event.record(&mut visitor);
    line
}

struct LineVisitor<'a> {
    line: &'a mut String,
}

impl Visit for LineVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.line, "{value:?} ");
        } else {
            let _ = write!(self.line, "{}={value:?} ", field.name());
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            let _ = write!(self.line, "{value} ");
        } else {
            let _ = write!(self.line, "{}={value} ", field.name());
        }
    }
}

#[cfg(test)]
#[path = "logging_tests.rs"]
mod tests;
