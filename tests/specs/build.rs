//! Build scheduling specs: ordering, gating, and cancellation.

use crate::prelude::*;
use kiln_core::SessionName;
use kiln_engine::{FakeRunner, ScriptedJob};
use kiln_graph::graph::Timings;

#[tokio::test]
async fn every_session_gets_exactly_one_result() {
    let project = abc_project();
    let results = project.build(&FakeRunner::new()).await;

    assert_eq!(results.len(), 3);
    assert!(results.values().all(|r| r.status == SessionStatus::Ok));

    let snapshot = project.snapshot();
    assert_eq!(snapshot.results.len(), 3);
    // No duplicate (session, build) rows.
    let mut keys: Vec<_> =
        snapshot.results.iter().map(|r| (r.name.clone(), r.build_id.clone())).collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), 3);
}

#[tokio::test]
async fn scheduler_runs_the_root_before_its_dependents() {
    // Equal timeouts; history makes a's remaining subtree the largest.
    let project = abc_project();
    let timings: Timings = [("a", 2_000u64), ("b", 1_000), ("c", 1_000)]
        .into_iter()
        .map(|(n, ms)| (SessionName::new(n), ms))
        .collect();

    let runner = FakeRunner::new();
    let results = project
        .engine_with(runner.clone(), &timings, |config| config)
        .run()
        .await
        .expect("build");

    let spawned = runner.spawned();
    assert_eq!(spawned[0], SessionName::new("a"));
    assert_eq!(spawned.len(), 3);
    assert!(results.values().all(|r| r.status == SessionStatus::Ok));
}

#[tokio::test]
async fn dependents_start_only_after_the_dependency_result_exists() {
    let project = abc_project();
    let runner = FakeRunner::new();
    // a takes a few polls, so b/c would jump the queue if gating failed.
    runner.script("a", ScriptedJob { polls: 3, ..Default::default() });

    project.build(&runner).await;

    let spawned = runner.spawned();
    assert_eq!(spawned[0], SessionName::new("a"));
    assert!(spawned[1..].iter().all(|name| name != "a"));
}

#[tokio::test]
async fn cancel_while_running_yields_cancelled_not_failed() {
    let project = abc_project();
    let runner = FakeRunner::new();
    runner.script("a", ScriptedJob::hanging());

    let engine = project.engine(runner.clone());
    let stop = engine.stop_token();
    let task = tokio::spawn(engine.run());

    for _ in 0..200 {
        if !runner.spawned().is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    stop.cancel();

    let results = task.await.expect("join").expect("build");
    for name in ["a", "b", "c"] {
        assert_eq!(
            results[&SessionName::new(name)].status,
            SessionStatus::Cancelled,
            "session {name}",
        );
    }
    // Only a ever started.
    assert_eq!(runner.spawned(), vec![SessionName::new("a")]);
}

#[tokio::test]
async fn failed_root_fails_the_build_but_finishes_it() {
    let project = abc_project();
    let runner = FakeRunner::new();
    runner.script("a", ScriptedJob::failing(2));

    let results = project.build(&runner).await;

    // The run completes with a full result mapping, never a partial drop.
    assert_eq!(results.len(), 3);
    assert_eq!(results[&SessionName::new("a")].status, SessionStatus::Failed);
    assert_eq!(results[&SessionName::new("a")].exit_code, Some(2));
    assert_eq!(results[&SessionName::new("b")].status, SessionStatus::Cancelled);
    assert_eq!(results[&SessionName::new("c")].status, SessionStatus::Cancelled);
}
