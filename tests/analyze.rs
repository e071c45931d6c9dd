//! Integration tests driving the text frontend end to end.

use floe::analyses::liveness::LivenessAnalysis;
use floe::analyses::nullness::{Nullness, NullnessAnalysis};
use floe::frontend::parse_module;
use floe::loc::shared_store;
use floe::solver::solve;
use floe::{NodeKind, ProcBody};
use std::path::PathBuf;

fn fixture_dir() -> PathBuf {
    std::env::current_dir().unwrap().join("tests").join("flow")
}

fn load(name: &str) -> ProcBody {
    let path = fixture_dir().join(name);
    let text = std::fs::read_to_string(&path).unwrap();
    let mut procs = parse_module(&text).unwrap();
    assert_eq!(procs.len(), 1, "{} should hold one proc", name);
    procs.remove(0)
}

/// Every fixture converges under both shipped analyses.
#[test]
fn all_fixtures_converge() {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(fixture_dir())
        .unwrap()
        .map(|item| item.unwrap().path())
        .filter(|path| path.extension().and_then(|s| s.to_str()) == Some("flow"))
        .collect();
    paths.sort(); // Deterministic test order.
    assert!(!paths.is_empty());

    for path in paths {
        let text = std::fs::read_to_string(&path).unwrap();
        let procs = parse_module(&text).unwrap();
        for body in &procs {
            solve(NullnessAnalysis::new(body, shared_store()), body)
                .unwrap_or_else(|e| panic!("nullness diverged on {:?}: {}", path, e));
            solve(LivenessAnalysis::new(), body)
                .unwrap_or_else(|e| panic!("liveness diverged on {:?}: {}", path, e));
        }
    }
}

#[test]
fn guarded_use_is_not_null() {
    let body = load("guard.flow");
    let results = solve(NullnessAnalysis::new(&body, shared_store()), &body).unwrap();

    // The argument of the `use` call reads `p` after the guard.
    let arg_value = body
        .nodes
        .iter()
        .find_map(|node| match body.nodes[node].kind {
            NodeKind::Argument { value, .. } => Some(value),
            _ => None,
        })
        .expect("fixture has one argument node");
    assert_eq!(results.value_of(arg_value), Some(&Nullness::NotNull));
}

#[test]
fn disagreeing_writes_read_as_maybe() {
    let body = load("branches.flow");
    let results = solve(NullnessAnalysis::new(&body, shared_store()), &body).unwrap();

    // The bare read of `x` is the only LocalRef statement in the join block.
    let join_read = body
        .blocks
        .iter()
        .flat_map(|b| body.blocks[b].stmts.clone())
        .find(|&stmt| matches!(body.nodes[stmt].kind, NodeKind::LocalRef(_)))
        .expect("fixture reads x as a bare statement");
    assert_eq!(results.value_of(join_read), Some(&Nullness::Maybe));
}

#[test]
fn loop_converges_and_keeps_counter_live() {
    let body = load("loop.flow");
    let results = solve(LivenessAnalysis::new(), &body).unwrap();

    let x = body
        .symbols
        .entries()
        .find(|(_, data)| data.name == "x")
        .map(|(s, _)| s)
        .unwrap();
    // The loop-header comparison keeps x live around the back edge.
    let header = body
        .blocks
        .iter()
        .find(|&b| body.blocks[b].branch.is_some())
        .unwrap();
    assert!(results.input_of(header).unwrap().contains(&x));
}
