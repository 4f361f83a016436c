// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    ok = { 0, SessionStatus::Ok },
    failure = { 1, SessionStatus::Failed },
    timeout_rc = { 142, SessionStatus::Failed },
)]
fn status_from_exit_code(code: i32, expected: SessionStatus) {
    assert_eq!(SessionStatus::from_exit_code(code), expected);
}

#[test]
fn status_display() {
    assert_eq!(SessionStatus::Ok.to_string(), "ok");
    assert_eq!(SessionStatus::Failed.to_string(), "failed");
    assert_eq!(SessionStatus::Cancelled.to_string(), "cancelled");
}

#[test]
fn cancelled_is_not_ok_and_not_failed() {
    let status = SessionStatus::Cancelled;
    assert!(!status.is_ok());
    assert_ne!(status, SessionStatus::Failed);
}

#[test]
fn current_ok_requires_both_flags() {
    let r = SessionResult::builder().current(true).build();
    assert!(r.is_current_ok());

    let r = SessionResult::builder().current(false).build();
    assert!(!r.is_current_ok());

    let r = SessionResult::builder().current(true).status(SessionStatus::Failed).build();
    assert!(!r.is_current_ok());
}

#[test]
fn result_serde_roundtrip() {
    let r = SessionResult::builder()
        .name("s")
        .output(vec!["line".to_string()])
        .timing(Timing { elapsed_ms: 10, cpu_ms: 8, gc_ms: 1 })
        .build();
    let json = serde_json::to_string(&r).unwrap();
    let parsed: SessionResult = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, r);
}
