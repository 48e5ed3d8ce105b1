// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use clap::Parser;

fn parse(args: &[&str]) -> Config {
    Config::try_parse_from(std::iter::once("mt").chain(args.iter().copied()))
        .expect("parse failed")
}

#[test]
fn defaults() {
    let config = parse(&[]);
    assert_eq!(config.port, 2000);
    assert_eq!(config.bind, "0.0.0.0");
    assert!(!config.launcher);
    assert_eq!(config.detach_grace_secs, 30);
    config.validate().expect("default config valid");
}

#[test]
fn invalid_bind_rejected() {
    let config = parse(&["--bind", "not-an-address"]);
    assert!(config.validate().is_err());
}

#[test]
fn invalid_log_format_rejected() {
    let config = parse(&["--log-format", "xml"]);
    assert!(config.validate().is_err());
}

#[test]
fn hard_limit_below_soft_watermark_rejected() {
    let config = parse(&["--soft-watermark", "1000", "--session-hard-limit", "100"]);
    assert!(config.validate().is_err());
}

#[test]
fn queue_config_uses_flags() {
    let config = parse(&[
        "--soft-watermark",
        "1000",
        "--compress-min",
        "100",
        "--session-hard-limit",
        "5000",
    ]);
    let queue = config.queue_config();
    assert_eq!(queue.soft_watermark, 1000);
    assert_eq!(queue.compress_min, 100);
    assert_eq!(queue.session_hard_limit, 5000);
}

#[test]
fn run_as_identity_requires_uid() {
    assert_eq!(run_as_identity_with(|_| None), None);

    let identity = run_as_identity_with(|name| match name {
        "MM_RUN_AS_UID" => Some("1000".to_owned()),
        "MM_RUN_AS_GID" => Some("1001".to_owned()),
        _ => None,
    })
    .expect("identity");
    assert_eq!(identity.uid, 1000);
    assert_eq!(identity.gid, Some(1001));

    let uid_only = run_as_identity_with(|name| match name {
        "MM_RUN_AS_UID" => Some("1000".to_owned()),
        _ => None,
    })
    .expect("identity");
    assert_eq!(uid_only.gid, None);
}

#[test]
fn run_as_identity_rejects_garbage() {
    assert_eq!(
        run_as_identity_with(|name| match name {
            "MM_RUN_AS_UID" => Some("root".to_owned()),
            _ => None,
        }),
        None
    );
}
