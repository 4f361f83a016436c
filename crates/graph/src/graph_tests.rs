// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::descriptor::ProjectDesc;

fn load(text: &str) -> Result<SessionGraph, GraphError> {
    load_with_timings(text, &Timings::new())
}

fn load_with_timings(text: &str, timings: &Timings) -> Result<SessionGraph, GraphError> {
    let desc = ProjectDesc::parse(text, "/proj").unwrap();
    SessionGraph::load(&desc, timings, &BuildId::from_string("bld-test"))
}

#[test]
fn linear_chain_resolves() {
    let graph = load(
        r#"
        [sessions.a]
        [sessions.b]
        parent = "a"
        [sessions.c]
        parent = "b"
        "#,
    )
    .unwrap();

    assert_eq!(graph.len(), 3);
    let order: Vec<&str> = graph.topological_order().iter().map(|s| s.as_str()).collect();
    assert_eq!(order, ["a", "b", "c"]);

    let c = graph.get(&SessionName::new("c")).unwrap();
    let deps: Vec<&SessionName> = c.deps.iter().collect();
    assert_eq!(deps, [&SessionName::new("b")]);
    let ancestors: Vec<&SessionName> = c.ancestors.iter().collect();
    assert_eq!(ancestors, [&SessionName::new("a"), &SessionName::new("b")]);
}

#[test]
fn diamond_ancestors_are_a_set() {
    let graph = load(
        r#"
        [sessions.a]
        [sessions.b]
        parent = "a"
        [sessions.c]
        parent = "a"
        [sessions.d]
        parent = "b"
        imports = ["c"]
        "#,
    )
    .unwrap();

    let d = graph.get(&SessionName::new("d")).unwrap();
    let expected: std::collections::BTreeSet<SessionName> =
        ["a", "b", "c"].into_iter().map(SessionName::new).collect();
    assert_eq!(d.ancestors, expected);
}

#[test]
fn unknown_reference_is_fatal() {
    let err = load(
        r#"
        [sessions.a]
        parent = "ghost"
        "#,
    )
    .unwrap_err();

    let GraphError::Invalid { issues } = err else { panic!("expected Invalid") };
    assert_eq!(issues.len(), 1);
    assert!(issues[0].contains("session a"));
    assert!(issues[0].contains("ghost"));
}

#[test]
fn duplicate_dependency_is_fatal() {
    let err = load(
        r#"
        [sessions.a]
        [sessions.b]
        parent = "a"
        imports = ["a"]
        "#,
    )
    .unwrap_err();

    let GraphError::Invalid { issues } = err else { panic!("expected Invalid") };
    assert!(issues.iter().any(|i| i.contains("duplicate dependency a")));
}

#[test]
fn self_dependency_is_fatal() {
    let err = load(
        r#"
        [sessions.a]
        parent = "a"
        "#,
    )
    .unwrap_err();

    let GraphError::Invalid { issues } = err else { panic!("expected Invalid") };
    assert!(issues.iter().any(|i| i.contains("depends on itself")));
}

#[test]
fn cycle_is_fatal_and_names_members() {
    let err = load(
        r#"
        [sessions.a]
        parent = "c"
        [sessions.b]
        parent = "a"
        [sessions.c]
        parent = "b"
        "#,
    )
    .unwrap_err();

    let GraphError::Invalid { issues } = err else { panic!("expected Invalid") };
    assert_eq!(issues.len(), 1);
    assert!(issues[0].contains("cycle"));
    assert!(issues[0].contains('a') && issues[0].contains('b') && issues[0].contains('c'));
}

#[test]
fn validation_aggregates_all_issues() {
    let err = load(
        r#"
        [sessions.a]
        parent = "ghost"
        [sessions.b]
        parent = "phantom"
        "#,
    )
    .unwrap_err();

    let GraphError::Invalid { issues } = err else { panic!("expected Invalid") };
    assert_eq!(issues.len(), 2);
}

#[test]
fn remaining_work_sums_descendants_once() {
    // Diamond: d is a descendant of a through both b and c, counted once.
    let mut timings = Timings::new();
    timings.insert(SessionName::new("a"), 10);
    timings.insert(SessionName::new("b"), 20);
    timings.insert(SessionName::new("c"), 30);
    timings.insert(SessionName::new("d"), 40);

    let graph = load_with_timings(
        r#"
        [sessions.a]
        [sessions.b]
        parent = "a"
        [sessions.c]
        parent = "a"
        [sessions.d]
        parent = "b"
        imports = ["c"]
        "#,
        &timings,
    )
    .unwrap();

    assert_eq!(graph.remaining_ms(&SessionName::new("a")), 100);
    assert_eq!(graph.remaining_ms(&SessionName::new("b")), 60);
    assert_eq!(graph.remaining_ms(&SessionName::new("c")), 70);
    assert_eq!(graph.remaining_ms(&SessionName::new("d")), 40);
}

#[test]
fn sessions_without_history_estimate_zero() {
    let graph = load(
        r#"
        [sessions.a]
        "#,
    )
    .unwrap();
    assert_eq!(graph.get(&SessionName::new("a")).unwrap().estimate_ms, 0);
    assert_eq!(graph.remaining_ms(&SessionName::new("a")), 0);
}
