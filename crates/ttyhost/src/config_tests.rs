// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use clap::Parser;
use yare::parameterized;

fn parse(args: &[&str]) -> Config {
    Config::try_parse_from(std::iter::once("ttyhost").chain(args.iter().copied()))
        .expect("parse failed")
}

#[test]
fn session_is_required() {
    assert!(Config::try_parse_from(["ttyhost"]).is_err());
}

#[test]
fn defaults() {
    let config = parse(&["--session", "ab12cd34"]);
    assert_eq!(config.cols, 80);
    assert_eq!(config.rows, 24);
    assert!(!config.debug);
    assert_eq!(config.scrollback_bytes, 102_400);
    config.validate().expect("valid");
}

#[test]
fn invalid_session_id_rejected() {
    let config = parse(&["--session", "way-too-long-for-an-id"]);
    assert!(config.validate().is_err());
}

#[test]
fn invalid_shell_rejected() {
    let config = parse(&["--session", "ab12cd34", "--shell", "fish"]);
    assert!(config.validate().is_err());
}

#[test]
fn missing_cwd_rejected() {
    let config = parse(&["--session", "ab12cd34", "--cwd", "/definitely/not/here"]);
    assert!(config.validate().is_err());
}

#[parameterized(
    oversized = { "9999", "0", 500, 1 },
    in_range = { "120", "30", 120, 30 },
    both_zero = { "0", "0", 1, 1 },
)]
fn dims_are_clamped(cols: &str, rows: &str, want_cols: u16, want_rows: u16) {
    let config = parse(&["--session", "ab12cd34", "--cols", cols, "--rows", rows]);
    let size = config.term_size();
    assert_eq!((size.cols, size.rows), (want_cols, want_rows));
}

#[test]
fn explicit_shell_wins() {
    let config = parse(&["--session", "ab12cd34", "--shell", "zsh"]);
    assert_eq!(config.shell_kind(), mtwire::session::ShellKind::Zsh);
}
