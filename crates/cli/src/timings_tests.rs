// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use kiln_core::test_support::ok_result;
use kiln_core::{BuildId, BuildRecord, Timing};
use kiln_store::Db;

#[test]
fn missing_store_yields_no_history() {
    let dir = tempfile::tempdir().unwrap();
    let timings = from_store(&dir.path().join("nope")).unwrap();
    assert!(timings.is_empty());
}

#[test]
fn takes_elapsed_from_most_recent_ok_result() {
    let dir = tempfile::tempdir().unwrap();
    let db = Db::open(dir.path()).unwrap();
    let mut guard = db.lock().unwrap();

    let old = BuildId::new();
    let new = BuildId::new();
    guard.put_build(BuildRecord::new(old.clone(), "p", "", 100)).unwrap();
    guard.put_build(BuildRecord::new(new.clone(), "p", "", 200)).unwrap();

    let mut first = ok_result("s", &old);
    first.timing = Timing { elapsed_ms: 1_000, ..Default::default() };
    guard.insert_result(first).unwrap();

    let mut second = ok_result("s", &new);
    second.timing = Timing { elapsed_ms: 2_500, ..Default::default() };
    guard.insert_result(second).unwrap();
    drop(guard);

    let timings = from_store(dir.path()).unwrap();
    assert_eq!(timings[&SessionName::new("s")], 2_500);
}

#[test]
fn cache_hits_and_failures_do_not_count() {
    let dir = tempfile::tempdir().unwrap();
    let db = Db::open(dir.path()).unwrap();
    let mut guard = db.lock().unwrap();

    let build = BuildId::new();
    guard.put_build(BuildRecord::new(build.clone(), "p", "", 100)).unwrap();

    let mut cached = ok_result("s", &build);
    cached.current = true;
    cached.timing = Timing { elapsed_ms: 9_999, ..Default::default() };
    guard.insert_result(cached).unwrap();

    guard.insert_result(kiln_core::test_support::cancelled_result("t", &build)).unwrap();
    drop(guard);

    let timings = from_store(dir.path()).unwrap();
    assert!(timings.is_empty());
}
