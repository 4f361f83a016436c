// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::state::BuildState;
use kiln_core::test_support::{ok_result, session_meta};
use kiln_core::BuildId;

struct Fixture {
    meta: kiln_core::SessionMeta,
    state: BuildState,
    previous: kiln_core::SessionResult,
    dir: tempfile::TempDir,
}

/// Session `b` depending on `a`, with a prior build whose hashes all match.
fn fixture() -> Fixture {
    let build = BuildId::from_string("bld-current");
    let prior = BuildId::from_string("bld-prior");

    let meta = session_meta("b", &["a"], &build);
    let mut state = BuildState::default();
    let mut a_result = ok_result("a", &build);
    a_result.current = true;
    state.results.insert(a_result.name.clone(), a_result);

    let input = input_hash(&meta, &state.results);
    let mut previous = ok_result("b", &prior);
    previous.options_hash = meta.options_hash.clone();
    previous.sources_hash = meta.sources_hash.clone();
    previous.input_hash = input;

    Fixture { meta, state, previous, dir: tempfile::tempdir().unwrap() }
}

fn decide(f: &Fixture, fresh: bool, no_build: bool, stopped: bool) -> StartDecision {
    start_decision(
        &f.meta,
        &f.state,
        Some(&f.previous),
        f.dir.path(),
        fresh,
        no_build,
        stopped,
    )
}

#[test]
fn bootstrap_hash_for_root_sessions() {
    let build = BuildId::from_string("bld-test");
    let meta = session_meta("root", &[], &build);
    assert_eq!(input_hash(&meta, &BTreeMap::new()), ContentHash::bootstrap());
}

#[test]
fn input_hash_follows_ancestor_outputs() {
    let f = fixture();
    let before = input_hash(&f.meta, &f.state.results);

    let mut state = f.state.clone();
    if let Some(r) = state.results.get_mut(&kiln_core::SessionName::new("a")) {
        r.output_hash = ContentHash::of_str("different");
    }
    assert_ne!(input_hash(&f.meta, &state.results), before);
}

#[test]
fn unchanged_session_is_a_cache_hit() {
    let f = fixture();
    let decision = decide(&f, false, false, false);
    let StartDecision::CacheHit { output_hash, .. } = decision else {
        panic!("expected CacheHit, got {decision:?}");
    };
    assert_eq!(output_hash, f.previous.output_hash);
}

#[test]
fn fresh_forces_a_run() {
    let f = fixture();
    assert!(matches!(decide(&f, true, false, false), StartDecision::Run { .. }));
}

#[test]
fn cache_hit_wins_over_no_build() {
    // The session is already built; no-build mode has nothing to refuse.
    let f = fixture();
    assert!(matches!(decide(&f, false, true, false), StartDecision::CacheHit { .. }));
}

#[test]
fn no_build_refuses_stale_sessions() {
    let mut f = fixture();
    f.meta.sources_hash = ContentHash::of_str("edited");
    assert!(matches!(decide(&f, false, true, false), StartDecision::NoBuild { .. }));
}

#[test]
fn stopped_build_yields_undefined() {
    let f = fixture();
    assert!(matches!(decide(&f, false, false, true), StartDecision::Undefined { .. }));
}

#[test]
fn failed_ancestor_yields_undefined() {
    let mut f = fixture();
    if let Some(r) = f.state.results.get_mut(&kiln_core::SessionName::new("a")) {
        r.status = kiln_core::SessionStatus::Failed;
    }
    assert!(matches!(decide(&f, false, false, false), StartDecision::Undefined { .. }));
}

#[test]
fn source_change_misses_the_cache() {
    let mut f = fixture();
    f.meta.sources_hash = ContentHash::of_str("edited");
    assert!(matches!(decide(&f, false, false, false), StartDecision::Run { .. }));
}

#[test]
fn option_change_misses_the_cache() {
    let mut f = fixture();
    f.meta.options_hash = ContentHash::of_str("threads=8");
    assert!(matches!(decide(&f, false, false, false), StartDecision::Run { .. }));
}

#[test]
fn ancestor_rebuild_invalidates_dependents() {
    // a rebuilt with a new output hash: b's recorded input hash no longer
    // matches, so b cannot be current.
    let mut f = fixture();
    if let Some(r) = f.state.results.get_mut(&kiln_core::SessionName::new("a")) {
        r.output_hash = ContentHash::of_str("rebuilt-output");
    }
    assert!(matches!(decide(&f, false, false, false), StartDecision::Run { .. }));
}

#[test]
fn non_current_ancestor_blocks_cache_hit() {
    let mut f = fixture();
    if let Some(r) = f.state.results.get_mut(&kiln_core::SessionName::new("a")) {
        r.current = false;
    }
    // a was rebuilt this build (same output), so b reruns too unless its
    // input hash still matches — the ancestor current flag gates the hit.
    assert!(matches!(decide(&f, false, false, false), StartDecision::Run { .. }));
}

#[test]
fn failed_previous_build_misses() {
    let mut f = fixture();
    f.previous.status = kiln_core::SessionStatus::Failed;
    assert!(matches!(decide(&f, false, false, false), StartDecision::Run { .. }));
}

#[test]
fn no_previous_build_misses() {
    let f = fixture();
    let decision = start_decision(
        &f.meta,
        &f.state,
        None,
        f.dir.path(),
        false,
        false,
        false,
    );
    assert!(matches!(decision, StartDecision::Run { .. }));
}

#[test]
fn kept_artifact_must_be_present_and_match() {
    let mut f = fixture();
    f.meta.keep_artifact = true;

    // Absent artifact: miss.
    assert!(matches!(decide(&f, false, false, false), StartDecision::Run { .. }));

    // Artifact present with matching hash: hit.
    std::fs::write(artifact_path(f.dir.path(), &f.meta.name), b"image").unwrap();
    f.previous.output_hash = ContentHash::of_bytes(b"image");
    assert!(matches!(decide(&f, false, false, false), StartDecision::CacheHit { .. }));

    // Artifact tampered with: miss again.
    std::fs::write(artifact_path(f.dir.path(), &f.meta.name), b"corrupt").unwrap();
    assert!(matches!(decide(&f, false, false, false), StartDecision::Run { .. }));
}

#[test]
fn reset_artifact_removes_file_and_tolerates_absence() {
    let dir = tempfile::tempdir().unwrap();
    let name = kiln_core::SessionName::new("s");

    reset_artifact(dir.path(), &name).unwrap();

    std::fs::write(artifact_path(dir.path(), &name), b"old").unwrap();
    reset_artifact(dir.path(), &name).unwrap();
    assert!(artifact_hash(dir.path(), &name).is_none());
}
