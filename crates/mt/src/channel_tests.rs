// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde::Serialize;

#[derive(Serialize)]
struct ThemeChanged {
    theme: String,
}

#[tokio::test]
async fn publish_reaches_all_subscribers() {
    let hub = ChannelHub::default();
    let publisher = hub.register("settings");

    let mut first = hub.subscribe("settings").expect("subscribe");
    let mut second = hub.subscribe("settings").expect("subscribe");
    assert_eq!(publisher.receiver_count(), 2);

    let delivered = publisher
        .publish(&ThemeChanged { theme: "dark".to_owned() })
        .expect("publish");
    assert_eq!(delivered, 2);

    for rx in [&mut first, &mut second] {
        let json = rx.recv().await.expect("recv");
        assert_eq!(&*json, r#"{"theme":"dark"}"#);
    }
}

#[tokio::test]
async fn register_is_idempotent() {
    let hub = ChannelHub::default();
    let first = hub.register("git");
    let second = hub.register("git");

    let mut rx = hub.subscribe("git").expect("subscribe");
    first.publish(&serde_json::json!({"n": 1})).expect("publish");
    second.publish(&serde_json::json!({"n": 2})).expect("publish");

    assert_eq!(&*rx.recv().await.expect("recv"), r#"{"n":1}"#);
    assert_eq!(&*rx.recv().await.expect("recv"), r#"{"n":2}"#);
}

#[test]
fn unknown_channel_has_no_receiver() {
    let hub = ChannelHub::default();
    assert!(hub.subscribe("nope").is_none());
}

#[test]
fn publish_without_subscribers_is_ok() {
    let hub = ChannelHub::default();
    let publisher = hub.register("auth");
    assert_eq!(publisher.publish(&serde_json::json!({})).expect("publish"), 0);
}
