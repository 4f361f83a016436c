//! Multi-worker specs: store convergence, progress replay, cleanup.

use crate::prelude::*;
use kiln_core::SessionName;
use kiln_engine::{FakeRunner, ScriptedJob};
use serial_test::serial;

const WIDE: &str = r#"
[sessions.s1]
[sessions.s2]
[sessions.s3]
[sessions.s4]
[sessions.s5]
[sessions.s6]
"#;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn two_workers_converge_on_one_build() {
    let project = Project::new(WIDE);

    let runner1 = FakeRunner::new();
    let runner2 = FakeRunner::new();
    for name in ["s1", "s2", "s3", "s4", "s5", "s6"] {
        runner1.script(name, ScriptedJob { polls: 5, ..Default::default() });
        runner2.script(name, ScriptedJob { polls: 5, ..Default::default() });
    }

    let worker1 = project.engine(runner1.clone());
    let worker2 = project.engine(runner2.clone());

    let (one, two) = tokio::join!(tokio::spawn(worker1.run()), tokio::spawn(worker2.run()));
    let one = one.expect("join").expect("worker1");
    let two = two.expect("join").expect("worker2");

    // One build, two workers, and both report the same complete mapping.
    let snapshot = project.snapshot();
    assert_eq!(snapshot.builds.len(), 1);
    assert_eq!(snapshot.workers.len(), 2);
    assert_eq!(one.len(), 6);
    assert_eq!(two.len(), 6);
    assert_eq!(snapshot.results.len(), 6);

    // No session was spawned by both workers.
    let mut all_spawned = runner1.spawned();
    all_spawned.extend(runner2.spawned());
    let total = all_spawned.len();
    all_spawned.sort();
    all_spawned.dedup();
    assert_eq!(all_spawned.len(), total, "a session ran twice");
    assert_eq!(total, 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn joining_worker_replays_the_shared_progress_log() {
    let project = abc_project();

    let runner1 = FakeRunner::new();
    runner1.script("a", ScriptedJob::hanging());
    let worker1 = project.engine(runner1.clone());
    let stop = worker1.stop_token();
    let task1 = tokio::spawn(worker1.run());

    // Wait until worker1 has started `a` and published progress.
    for _ in 0..200 {
        if !runner1.spawned().is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    let runner2 = FakeRunner::new();
    let sink2 = kiln_engine::MemorySink::new();
    let desc = kiln_graph::ProjectDesc::parse(ABC, project.dir.path()).expect("desc");
    let build = kiln_core::BuildId::new();
    let graph =
        kiln_graph::SessionGraph::load(&desc, &kiln_graph::graph::Timings::new(), &build)
            .expect("graph");
    let worker2 = kiln_engine::Engine::with_parts(
        project.config(),
        graph,
        runner2,
        build,
        kiln_core::FakeClock::new(),
        Box::new(sink2.clone()),
    )
    .expect("engine");
    let task2 = tokio::spawn(worker2.run());

    // Give worker2 a moment to join and drain, then stop the build.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    stop.cancel();

    task1.await.expect("join1").expect("worker1");
    task2.await.expect("join2").expect("worker2");

    // Worker2 replayed messages it never wrote: worker1's start of `a`.
    assert!(
        sink2.texts().iter().any(|t| t.contains("building a")),
        "worker2 must replay worker1's progress, saw: {:?}",
        sink2.texts(),
    );
}

#[tokio::test]
#[serial]
async fn clean_removes_only_stopped_builds() {
    let project = abc_project();

    // Build 1: cancelled mid-flight, marked progress-stopped.
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
    task.await.expect("join").expect("build");

    // Build 2: clean success.
    project.build(&FakeRunner::new()).await;

    let before = project.snapshot();
    assert_eq!(before.builds.len(), 2);

    let db = kiln_store::Db::open(project.store_dir()).expect("open");
    let removed = db.lock().expect("lock").clean().expect("clean");
    assert_eq!(removed.len(), 1);

    let after = project.snapshot();
    assert_eq!(after.builds.len(), 1);
    assert!(after.builds.values().all(|b| !b.progress_stopped));
    // The surviving build keeps its full result set.
    assert_eq!(after.results.len(), 3);
}

#[tokio::test]
#[serial]
async fn worker_heartbeats_track_the_serial() {
    let project = abc_project();
    project.build(&FakeRunner::new()).await;

    let snapshot = project.snapshot();
    for worker in snapshot.workers.values() {
        assert!(worker.last_serial <= snapshot.serial);
        assert!(worker.stopped_at.is_some());
        assert!(worker.heartbeat_at >= worker.registered_at);
    }
    // The store serial dominates every progress serial.
    let max_progress = snapshot.progress.iter().map(|m| m.serial).max().unwrap_or(0);
    assert!(snapshot.serial >= max_progress);
}
