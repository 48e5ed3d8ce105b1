// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

fn sid(s: &str) -> SessionId {
    SessionId::parse(s).expect("session id")
}

#[parameterized(
    exact = { "tty-host 0.4.2 starting for session ab12cd34", true },
    trailing_newline = { "tty-host 0.4.2 starting for session ab12cd34\n", true },
    other_version = { "tty-host 9.9.9-dev starting for session ab12cd34", true },
    wrong_session = { "tty-host 0.4.2 starting for session zzzzzzzz", false },
    wrong_prefix = { "ttyhost 0.4.2 starting for session ab12cd34", false },
    missing_version = { "tty-host  starting for session ab12cd34", false },
    garbage = { "bash: ttyhost: command not found", false },
    empty = { "", false },
)]
fn launch_line_verification(line: &str, ok: bool) {
    assert_eq!(verify_launch_line(line, &sid("ab12cd34")), ok);
}

#[test]
fn explicit_host_binary_wins() {
    let mut config = crate::config::Config::try_parse_for_test();
    config.host_binary = Some(PathBuf::from("/opt/midterm/ttyhost"));
    assert_eq!(host_binary(&config), PathBuf::from("/opt/midterm/ttyhost"));
}

#[test]
fn host_alive_detects_own_process() {
    assert!(host_alive(std::process::id()));
    // Pid far above any default pid_max.
    assert!(!host_alive(0x3fff_fff0));
}

#[test]
fn socket_path_respects_runtime_dir() {
    let mut config = crate::config::Config::try_parse_for_test();
    config.runtime_dir = Some(PathBuf::from("/run/midterm"));
    assert_eq!(
        socket_path(&config, &sid("ab12cd34")),
        PathBuf::from("/run/midterm/midterm-tty-ab12cd34.sock")
    );
}
