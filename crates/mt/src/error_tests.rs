// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    unauthorized = { ErrorCode::Unauthorized, 401 },
    bad_request = { ErrorCode::BadRequest, 400 },
    not_found = { ErrorCode::NotFound, 404 },
    detached = { ErrorCode::SessionDetached, 409 },
    spawn_failed = { ErrorCode::SpawnFailed, 502 },
    internal = { ErrorCode::Internal, 500 },
)]
fn http_status_mapping(code: ErrorCode, status: u16) {
    assert_eq!(code.http_status(), status);
}

#[test]
fn display_matches_as_str() {
    assert_eq!(ErrorCode::SessionDetached.to_string(), "SESSION_DETACHED");
}

#[test]
fn http_response_carries_code_and_message() {
    let (status, body) = ErrorCode::NotFound.to_http_response("no such session");
    assert_eq!(status.as_u16(), 404);
    assert_eq!(body.error.code, "NOT_FOUND");
    assert_eq!(body.error.message, "no such session");
}
