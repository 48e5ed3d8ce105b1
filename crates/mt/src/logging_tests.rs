// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn ring_is_bounded() {
    let ring = ContextRing::new(3, Duration::ZERO);
    for i in 0..10 {
        ring.push(format!("line {i}"));
    }
    assert_eq!(ring.len(), 3);
    let flushed = ring.take_for_flush().expect("flush");
    assert_eq!(flushed, vec!["line 7", "line 8", "line 9"]);
}

#[test]
fn flush_clears_the_ring() {
    let ring = ContextRing::new(10, Duration::ZERO);
    ring.push("a".to_owned());
    assert!(ring.take_for_flush().is_some());
    assert!(ring.is_empty());
    assert!(ring.take_for_flush().is_none());
}

#[test]
fn cooldown_suppresses_second_flush() {
    let ring = ContextRing::new(10, Duration::from_secs(60));
    ring.push("first".to_owned());
    assert!(ring.take_for_flush().is_some());

    // Inside the cooldown window: context is dropped, not re-flushed.
    ring.push("second".to_owned());
    assert!(ring.take_for_flush().is_none());
    assert!(ring.is_empty());
}

#[test]
fn empty_ring_does_not_flush() {
    let ring = ContextRing::new(10, Duration::ZERO);
    assert!(ring.take_for_flush().is_none());
}

#[test]
fn layer_flushes_context_ahead_of_errors() {
    use std::io::Cursor;
    use std::sync::{Arc as StdArc, Mutex as StdMutex};
    use tracing_subscriber::layer::SubscriberExt;

    #[derive(Clone)]
    struct SharedSink(StdArc<StdMutex<Cursor<Vec<u8>>>>);
    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().map_err(|_| std::io::ErrorKind::Other)?.write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    let sink = SharedSink(StdArc::new(StdMutex::new(Cursor::new(Vec::new()))));
    let ring = std::sync::Arc::new(ContextRing::new(100, Duration::ZERO));
    let layer = ContextRingLayer::new(std::sync::Arc::clone(&ring), sink.clone());
    let subscriber = tracing_subscriber::registry().with(layer);

    tracing::subscriber::with_default(subscriber, || {
        tracing::info!("leading context");
        tracing::info!("more context");
        tracing::error!("boom");
    });

    let written = sink.0.lock().map(|c| c.get_ref().clone()).unwrap_or_default();
    let text = String::from_utf8_lossy(&written);
    assert!(text.contains("leading context"), "missing context: {text}");
    assert!(text.contains("more context"), "missing context: {text}");
    assert!(ring.is_empty());
}
