// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn bel_terminated_sequence() {
    let mut scanner = OscScanner::new();
    let cwd = scanner.feed(b"\x1b]7;file://myhost/home/dev\x07");
    assert_eq!(cwd.as_deref(), Some("/home/dev"));
}

#[test]
fn st_terminated_sequence() {
    let mut scanner = OscScanner::new();
    let cwd = scanner.feed(b"\x1b]7;file://myhost/srv/data\x1b\\");
    assert_eq!(cwd.as_deref(), Some("/srv/data"));
}

#[test]
fn sequence_split_across_chunks() {
    let mut scanner = OscScanner::new();
    assert_eq!(scanner.feed(b"prompt$ \x1b]7;fi"), None);
    assert_eq!(scanner.feed(b"le://host/ho"), None);
    let cwd = scanner.feed(b"me/dev\x07more output");
    assert_eq!(cwd.as_deref(), Some("/home/dev"));
}

#[test]
fn split_at_every_position() {
    let seq = b"\x1b]7;file://h/a/b\x07";
    for cut in 1..seq.len() {
        let mut scanner = OscScanner::new();
        let first = scanner.feed(&seq[..cut]);
        let second = scanner.feed(&seq[cut..]);
        assert_eq!(
            first.or(second).as_deref(),
            Some("/a/b"),
            "failed when split at {cut}"
        );
    }
}

#[test]
fn percent_decoding() {
    let mut scanner = OscScanner::new();
    let cwd = scanner.feed(b"\x1b]7;file://h/home/dev/my%20project\x07");
    assert_eq!(cwd.as_deref(), Some("/home/dev/my project"));
}

#[test]
fn windows_drive_leading_slash_stripped() {
    let mut scanner = OscScanner::new();
    let cwd = scanner.feed(b"\x1b]7;file://pc/C:/Users/dev\x07");
    assert_eq!(cwd.as_deref(), Some("C:/Users/dev"));
}

#[test]
fn other_osc_numbers_are_skipped() {
    let mut scanner = OscScanner::new();
    assert_eq!(scanner.feed(b"\x1b]0;window title\x07"), None);
    assert_eq!(scanner.feed(b"\x1b]133;A\x07"), None);
    // Scanner must still be in ground state afterwards.
    let cwd = scanner.feed(b"\x1b]7;file://h/ok\x07");
    assert_eq!(cwd.as_deref(), Some("/ok"));
}

#[test]
fn last_sequence_in_chunk_wins() {
    let mut scanner = OscScanner::new();
    let cwd = scanner
        .feed(b"\x1b]7;file://h/first\x07middle\x1b]7;file://h/second\x07");
    assert_eq!(cwd.as_deref(), Some("/second"));
}

#[test]
fn malformed_uri_is_ignored() {
    let mut scanner = OscScanner::new();
    assert_eq!(scanner.feed(b"\x1b]7;not-a-uri\x07"), None);
    assert_eq!(scanner.feed(b"\x1b]7;file://hostonly\x07"), None);
    assert_eq!(scanner.feed(b"\x1b]7;file://h/bad%zz\x07"), None);
}

#[test]
fn bracketed_paste_bytes_do_not_confuse_scanner() {
    let mut scanner = OscScanner::new();
    assert_eq!(scanner.feed(b"\x1b[?2004h\x1b[?2004l"), None);
}

#[test]
fn runaway_sequence_is_abandoned() {
    let mut scanner = OscScanner::new();
    let mut chunk = b"\x1b]7;file://h/".to_vec();
    chunk.extend(std::iter::repeat_n(b'x', 8192));
    assert_eq!(scanner.feed(&chunk), None);
    // Terminator for the abandoned run, then a fresh valid sequence.
    let cwd = scanner.feed(b"\x07\x1b]7;file://h/ok\x07");
    assert_eq!(cwd.as_deref(), Some("/ok"));
}
