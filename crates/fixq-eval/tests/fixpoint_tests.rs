use fixq_dsl::{parse_expr, parse_program};
use fixq_eval::{EvalConfig, Evaluator, Value};
use proptest::prelude::*;
use std::collections::BTreeSet;

const CLOSURE_STEP: &str =
    "fn (old, new) => from (x, z) in edges, (z_1, y) in new where z = z_1 yield (x, y)";

fn edges_value(edges: &[(i64, i64)]) -> Value {
    Value::List(edges.iter().map(|&(a, b)| Value::pair(a, b)).collect())
}

fn pairs(v: &Value) -> BTreeSet<(i64, i64)> {
    v.elements()
        .expect("collection")
        .iter()
        .map(|row| match row {
            Value::Tuple(items) => match items.as_slice() {
                [Value::Int(a), Value::Int(b)] => (*a, *b),
                other => panic!("unexpected row {other:?}"),
            },
            other => panic!("unexpected row {other:?}"),
        })
        .collect()
}

fn reachability(edges: &[(i64, i64)]) -> BTreeSet<(i64, i64)> {
    let mut out: BTreeSet<(i64, i64)> = edges.iter().copied().collect();
    loop {
        let mut added = false;
        let snapshot: Vec<_> = out.iter().copied().collect();
        for &(a, b) in &snapshot {
            for &(c, d) in edges {
                if b == c && out.insert((a, d)) {
                    added = true;
                }
            }
        }
        if !added {
            return out;
        }
    }
}

fn closure_of(edges: &[(i64, i64)], iterate: &str) -> Value {
    let program = parse_program("val edges : (int * int) list;").expect("parses");
    let mut ev = Evaluator::new(&program, EvalConfig::default()).expect("loads");
    ev.bind("edges", edges_value(edges));
    let call = parse_expr(&format!("{iterate} edges ({CLOSURE_STEP})")).expect("parses");
    ev.eval(&call).expect("evaluates")
}

#[test]
fn chain_closure_in_discovery_order() {
    let v = closure_of(&[(1, 2), (2, 3)], "List.iterate");
    assert_eq!(v, edges_value(&[(1, 2), (2, 3), (1, 3)]));
}

#[test]
fn empty_base_is_empty_fixpoint() {
    assert_eq!(closure_of(&[], "List.iterate"), Value::List(vec![]));
}

#[test]
fn self_loop_terminates() {
    assert_eq!(closure_of(&[(1, 1)], "List.iterate"), edges_value(&[(1, 1)]));
}

#[test]
fn duplicate_base_rows_are_collapsed() {
    let v = closure_of(&[(1, 2), (1, 2)], "List.iterate");
    assert_eq!(v, edges_value(&[(1, 2)]));
}

#[test]
fn bag_overload_over_bag_base() {
    let program = parse_program("val edges : (int * int) bag;").expect("parses");
    let mut ev = Evaluator::new(&program, EvalConfig::default()).expect("loads");
    ev.bind("edges", edges_value(&[(1, 2), (2, 3)]));
    let call = parse_expr(&format!("Bag.iterate edges ({CLOSURE_STEP})")).expect("parses");
    let v = ev.eval(&call).expect("evaluates");
    assert!(v.is_bag());
    assert_eq!(pairs(&v), BTreeSet::from([(1, 2), (2, 3), (1, 3)]));
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn iterate_matches_reachability(edges in prop::collection::vec((0i64..6, 0i64..6), 0..12)) {
        let v = closure_of(&edges, "List.iterate");
        prop_assert_eq!(pairs(&v), reachability(&edges));
    }
}
