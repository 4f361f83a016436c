//! Incremental cache specs: current sessions, invalidation cascades.

use crate::prelude::*;
use kiln_core::{ContentHash, SessionName};
use kiln_engine::{FakeRunner, ScriptedJob};

#[tokio::test]
async fn identical_second_build_is_fully_current() {
    let project = abc_project();
    project.build(&FakeRunner::new()).await;

    let second = FakeRunner::new();
    let results = project.build(&second).await;

    assert!(second.spawned().is_empty(), "no jobs may spawn on a full cache hit");
    for result in results.values() {
        assert_eq!(result.status, SessionStatus::Ok);
        assert!(result.current);
    }
}

#[tokio::test]
async fn source_change_rebuilds_the_session() {
    let project = abc_project();
    project.build(&FakeRunner::new()).await;

    project.write_source("a", "a.src", "session a v2");
    let second = FakeRunner::new();
    let results = project.build(&second).await;

    assert!(second.spawned().contains(&SessionName::new("a")));
    assert!(!results[&SessionName::new("a")].current);
}

#[tokio::test]
async fn changed_output_invalidates_dependents() {
    let project = abc_project();
    project.build(&FakeRunner::new()).await;

    // a's sources change and its rebuild produces a different output hash,
    // so b and c were built against a stale input hash and must rerun.
    project.write_source("a", "a.src", "session a v2");
    let second = FakeRunner::new();
    second.script(
        "a",
        ScriptedJob { output_hash: Some(ContentHash::of_str("a-output-v2")), ..Default::default() },
    );
    let results = project.build(&second).await;

    let spawned = second.spawned();
    for name in ["a", "b", "c"] {
        assert!(spawned.contains(&SessionName::new(name)), "{name} must rebuild");
        assert!(!results[&SessionName::new(name)].current);
    }
}

#[tokio::test]
async fn rebuilt_ancestor_breaks_dependents_cache() {
    // Even when the rebuilt ancestor produces identical output, a cache hit
    // requires every ancestor result to be current, not merely successful.
    let project = abc_project();
    let first = FakeRunner::new();
    first.script(
        "a",
        ScriptedJob { output_hash: Some(ContentHash::of_str("a-output-px")), ..Default::default() },
    );
    project.build(&first).await;

    project.write_source("a", "a.src", "session a v2");
    let second = FakeRunner::new();
    second.script(
        "a",
        ScriptedJob { output_hash: Some(ContentHash::of_str("a-output-px")), ..Default::default() },
    );
    let results = project.build(&second).await;

    assert_eq!(second.spawned().len(), 3);
    assert!(results.values().all(|r| !r.current));
}

#[tokio::test]
async fn kept_artifacts_gate_the_cache() {
    let project = Project::new(
        r#"
        [sessions.solo]
        sources = "sources/solo"
        keep_artifact = true
        "#,
    );
    project.write_source("solo", "solo.src", "v1");

    // The scripted runner does not write artifact files, so a session that
    // must retain one can never be current.
    project.build(&FakeRunner::new()).await;
    let second = FakeRunner::new();
    let results = project.build(&second).await;

    assert_eq!(second.spawned(), vec![SessionName::new("solo")]);
    assert!(!results[&SessionName::new("solo")].current);
}

#[tokio::test]
async fn failed_build_is_not_a_cache_basis() {
    let project = abc_project();
    let first = FakeRunner::new();
    first.script("a", ScriptedJob::failing(1));
    project.build(&first).await;

    let second = FakeRunner::new();
    let results = project.build(&second).await;

    // Everything reruns; nothing can be current on top of a failure.
    assert_eq!(second.spawned().len(), 3);
    assert!(results.values().all(|r| r.status == SessionStatus::Ok && !r.current));
}
