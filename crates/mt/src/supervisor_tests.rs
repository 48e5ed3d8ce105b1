// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn policy() -> RestartPolicy {
    RestartPolicy {
        initial_delay: Duration::from_millis(500),
        max_delay: Duration::from_secs(30),
        max_failures: 5,
        window: Duration::from_secs(60),
    }
}

#[test]
fn delays_double_up_to_the_cap() {
    let mut backoff = Backoff::new(policy());
    let t0 = Instant::now();

    let mut delays = Vec::new();
    for _ in 0..4 {
        match backoff.on_failure(t0) {
            Some(d) => delays.push(d),
            None => break,
        }
    }
    assert_eq!(
        delays,
        vec![
            Duration::from_millis(500),
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4),
        ]
    );
}

#[test]
fn delay_caps_at_max() {
    let mut backoff = Backoff::new(RestartPolicy {
        max_failures: 100,
        ..policy()
    });
    let t0 = Instant::now();
    let mut last = Duration::ZERO;
    for i in 0..20 {
        // Spread failures out so the window never accumulates five.
        let at = t0 + Duration::from_secs(i * 120);
        if let Some(d) = backoff.on_failure(at) {
            last = d;
        }
    }
    assert_eq!(last, Duration::from_secs(30));
}

#[test]
fn breaker_trips_after_max_failures_in_window() {
    let mut backoff = Backoff::new(policy());
    let t0 = Instant::now();

    for i in 0..4 {
        assert!(
            backoff.on_failure(t0 + Duration::from_secs(i)).is_some(),
            "failure {i} should not trip"
        );
    }
    assert!(backoff.on_failure(t0 + Duration::from_secs(4)).is_none());
}

#[test]
fn old_failures_age_out_of_the_window() {
    let mut backoff = Backoff::new(policy());
    let t0 = Instant::now();

    for i in 0..4 {
        assert!(backoff.on_failure(t0 + Duration::from_secs(i)).is_some());
    }
    // Fifth failure far enough out that the first four left the window.
    assert!(backoff.on_failure(t0 + Duration::from_secs(300)).is_some());
    assert_eq!(backoff.recent_failures(), 1);
}

#[test]
fn success_resets_the_delay_curve() {
    let mut backoff = Backoff::new(policy());
    let t0 = Instant::now();
    let _ = backoff.on_failure(t0);
    let _ = backoff.on_failure(t0 + Duration::from_secs(1));

    backoff.on_success();
    assert_eq!(
        backoff.on_failure(t0 + Duration::from_secs(200)),
        Some(Duration::from_millis(500))
    );
}
