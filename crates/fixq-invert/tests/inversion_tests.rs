use fixq_dsl::{parse_expr, parse_program, Expr, Program};
use fixq_eval::{EvalConfig, Evaluator, Value};
use fixq_invert::builder::InvertContext;
use fixq_invert::tree::Inversion;
use fixq_invert::{
    ActiveFunctions, BaseInverter, CollectionKind, DisjunctionPolicy, Environment, InvertConfig, Inverted,
    JoinSource, NotInvertible, PredicateInverter,
};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

const RIGHT_LINEAR: &str = "fun edge (x, y) = (x, y) elem edges;
fun path (x, y) = edge (x, y) orelse (exists z where edge (x, z) andalso path (z, y));";

const LEFT_LINEAR: &str = "fun edge (x, y) = (x, y) elem edges;
fun path (x, y) = edge (x, y) orelse (exists z where path (x, z) andalso edge (z, y));";

fn edges_decl(edges: &[(i64, i64)]) -> String {
    let rows: Vec<String> = edges.iter().map(|(a, b)| format!("({a}, {b})")).collect();
    format!("val edges = [{}];", rows.join(", "))
}

fn program(edges: &[(i64, i64)], predicate: &str) -> Program {
    parse_program(&format!("{}\n{predicate}", edges_decl(edges))).expect("program parses")
}

fn goals(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn invert_path(program: &Program, config: InvertConfig) -> Result<Inverted, NotInvertible> {
    let call = parse_expr("path (x, y)").expect("call parses");
    PredicateInverter::with_config(program, config).invert(&call, &goals(&["x", "y"]), &BTreeMap::new())
}

fn eval(program: &Program, expr: &Expr) -> Value {
    let ev = Evaluator::new(program, EvalConfig::default()).expect("program loads");
    ev.eval(expr).expect("evaluates")
}

fn pair_list(edges: &[(i64, i64)]) -> Value {
    Value::List(edges.iter().map(|&(a, b)| Value::pair(a, b)).collect())
}

fn pair_set(v: &Value) -> BTreeSet<(i64, i64)> {
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

fn closure(edges: &[(i64, i64)], predicate: &str) -> Value {
    let program = program(edges, predicate);
    let inverted = invert_path(&program, InvertConfig::default()).expect("inverts");
    assert!(inverted.generator.is_finite());
    eval(&program, &inverted.generator.source)
}

fn reachability(edges: &[(i64, i64)]) -> BTreeSet<(i64, i64)> {
    let mut out: BTreeSet<(i64, i64)> = edges.iter().copied().collect();
    let mut frontier: Vec<(i64, i64)> = out.iter().copied().collect();
    while let Some((a, b)) = frontier.pop() {
        for &(c, d) in edges {
            if b == c && out.insert((a, d)) {
                frontier.push((a, d));
            }
        }
    }
    out
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn chain_gains_the_composed_edge() {
    assert_eq!(closure(&[(1, 2), (2, 3)], RIGHT_LINEAR), pair_list(&[(1, 2), (2, 3), (1, 3)]));
}

#[test]
fn empty_relation_has_empty_closure() {
    assert_eq!(closure(&[], RIGHT_LINEAR), Value::List(vec![]));
}

#[test]
fn self_loop_terminates() {
    assert_eq!(closure(&[(1, 1)], RIGHT_LINEAR), pair_list(&[(1, 1)]));
}

#[test]
fn two_cycle_reaches_both_self_pairs() {
    assert_eq!(
        closure(&[(1, 2), (2, 1)], RIGHT_LINEAR),
        pair_list(&[(1, 2), (2, 1), (1, 1), (2, 2)])
    );
}

#[test]
fn two_recursive_calls_are_non_linear() {
    let program = program(
        &[(1, 2)],
        "fun edge (x, y) = (x, y) elem edges;
fun path (x, y) = edge (x, y) orelse (exists z where path (x, z) andalso path (z, y));",
    );
    assert_eq!(
        invert_path(&program, InvertConfig::default()),
        Err(NotInvertible::NonLinearRecursion { count: 2 })
    );
}

#[test]
fn runtime_only_relation_is_unbounded() {
    let program = parse_program(&format!("val edges : (int * int) list;\n{RIGHT_LINEAR}")).expect("parses");
    assert!(matches!(
        invert_path(&program, InvertConfig::default()),
        Err(NotInvertible::UnboundedBase { .. })
    ));
}

// ============================================================================
// Shapes
// ============================================================================

#[test]
fn emitted_step_joins_on_a_renamed_variable() {
    let program = program(&[(1, 2)], RIGHT_LINEAR);
    let inverted = invert_path(&program, InvertConfig::default()).expect("inverts");
    assert_eq!(
        inverted.generator.source.to_string(),
        "List.iterate edges (fn (old, new) => from (x, z) in edges, (z_1, y) in new where z = z_1 yield (x, y))"
    );
    assert!(inverted.residual.is_empty());
}

#[test]
fn left_linear_recursion_scans_new_first() {
    let program = program(&[(1, 2), (2, 3), (3, 4)], LEFT_LINEAR);
    let inverted = invert_path(&program, InvertConfig::default()).expect("inverts");
    assert_eq!(
        inverted.generator.source.to_string(),
        "List.iterate edges (fn (old, new) => from (x, z) in new, (z_1, y) in edges where z_1 = z yield (x, y))"
    );
    let v = eval(&program, &inverted.generator.source);
    assert_eq!(pair_set(&v), reachability(&[(1, 2), (2, 3), (3, 4)]));
}

#[test]
fn base_case_may_come_second() {
    let edges = [(1, 2), (2, 3), (3, 1)];
    let v = closure(
        &edges,
        "fun edge (x, y) = (x, y) elem edges;
fun path (x, y) = (exists z where edge (x, z) andalso path (z, y)) orelse edge (x, y);",
    );
    assert_eq!(pair_set(&v), reachability(&edges));
}

#[test]
fn several_recursive_arms_are_appended() {
    let edges = [(1, 2), (2, 3), (3, 4), (4, 5)];
    let predicate = "fun edge (x, y) = (x, y) elem edges;
fun path (x, y) = edge (x, y)
  orelse (exists z where edge (x, z) andalso path (z, y))
  orelse (exists z where path (x, z) andalso edge (z, y));";
    let v = closure(&edges, predicate);
    assert_eq!(pair_set(&v), reachability(&edges));

    let program = program(&edges, predicate);
    let binary = InvertConfig {
        disjunction_policy: DisjunctionPolicy::BinaryOnly,
        ..InvertConfig::default()
    };
    assert!(matches!(invert_path(&program, binary), Err(NotInvertible::NoMatch { .. })));
}

#[test]
fn bound_step_condition_becomes_a_filter() {
    let predicate = "fun edge (x, y) = (x, y) elem edges;
fun path (x, y) = edge (x, y) orelse (exists z where edge (x, z) andalso x <> z andalso path (z, y));";
    let program = program(&[(1, 1), (1, 2), (2, 3)], predicate);
    let inverted = invert_path(&program, InvertConfig::default()).expect("inverts");
    assert!(inverted.generator.source.to_string().contains("where x <> z andalso z = z_1"));
    let v = eval(&program, &inverted.generator.source);
    assert_eq!(pair_set(&v), BTreeSet::from([(1, 1), (1, 2), (2, 3), (1, 3)]));
}

#[test]
fn direct_membership_without_helper() {
    let v = closure(
        &[(5, 6), (6, 7)],
        "fun path (x, y) = (x, y) elem edges orelse (exists z where (x, z) elem edges andalso path (z, y));",
    );
    assert_eq!(pair_set(&v), BTreeSet::from([(5, 6), (6, 7), (5, 7)]));
}

#[test]
fn recursion_without_a_shared_variable_is_rejected() {
    let program = program(
        &[(1, 2)],
        "fun edge (x, y) = (x, y) elem edges;
fun path (x, y) = edge (x, y) orelse (edge (x, y) andalso path (x, y));",
    );
    assert_eq!(
        invert_path(&program, InvertConfig::default()),
        Err(NotInvertible::NoJoinVariable)
    );
}

#[test]
fn opaque_base_is_unbounded() {
    let program = parse_program(
        "fun path (x, y) = mystery (x, y) orelse (exists z where mystery (x, z) andalso path (z, y));",
    )
    .expect("parses");
    assert!(matches!(
        invert_path(&program, InvertConfig::default()),
        Err(NotInvertible::UnboundedBase { .. })
    ));
}

#[test]
fn plain_disjunction_is_not_a_closure() {
    let program = program(
        &[(1, 2)],
        "fun edge (x, y) = (x, y) elem edges;
fun either (x, y) = edge (x, y) orelse edge (y, x);",
    );
    let call = parse_expr("either (x, y)").expect("parses");
    let err = PredicateInverter::new(&program)
        .invert(&call, &goals(&["x", "y"]), &BTreeMap::new())
        .unwrap_err();
    assert!(matches!(err, NotInvertible::NoMatch { .. }));
}

#[test]
fn unknown_and_value_names_are_unresolved() {
    let program = program(&[(1, 2)], RIGHT_LINEAR);
    let inverter = PredicateInverter::new(&program);
    for name in ["nowhere", "edges"] {
        let call = parse_expr(&format!("{name} (x, y)")).expect("parses");
        assert_eq!(
            inverter.invert(&call, &goals(&["x", "y"]), &BTreeMap::new()),
            Err(NotInvertible::UnresolvedBinding { name: name.to_string() })
        );
    }
}

#[test]
fn disabled_config_forces_fallback() {
    let program = program(&[(1, 2)], RIGHT_LINEAR);
    let config = InvertConfig {
        enabled: false,
        ..InvertConfig::default()
    };
    assert_eq!(
        invert_path(&program, config),
        Err(NotInvertible::NoMatch {
            reason: "disabled".into()
        })
    );
}

#[test]
fn accumulated_join_source_scans_old() {
    let edges = [(1, 2), (2, 3), (3, 4)];
    let program = program(&edges, RIGHT_LINEAR);
    let config = InvertConfig {
        join_source: JoinSource::Accumulated,
        ..InvertConfig::default()
    };
    let inverted = invert_path(&program, config).expect("inverts");
    assert!(inverted.generator.source.to_string().contains("(x, z) in old"));
    let v = eval(&program, &inverted.generator.source);
    assert_eq!(pair_set(&v), reachability(&edges));
}

fn accumulated() -> InvertConfig {
    InvertConfig {
        join_source: JoinSource::Accumulated,
        ..InvertConfig::default()
    }
}

fn enumerate(program: &Program, hi: i64) -> BTreeSet<(i64, i64)> {
    let query = parse_expr("from (x, y) where path (x, y)").expect("parses");
    let v = Evaluator::new(program, EvalConfig::default().with_int_extent(0, hi))
        .expect("loads")
        .eval(&query)
        .expect("enumerates");
    pair_set(&v)
}

#[test]
fn filtered_step_keeps_its_own_relation_when_accumulating() {
    let edges = [(0, 5), (5, 1), (1, 2), (2, 3)];
    let program = program(
        &edges,
        "fun path (x, y) = (x, y) elem edges orelse (exists z where (x, z) elem edges andalso x < z andalso path (z, y));",
    );
    let expected = BTreeSet::from([(0, 1), (0, 5), (1, 2), (1, 3), (2, 3), (5, 1)]);
    assert_eq!(enumerate(&program, 5), expected);

    let default = invert_path(&program, InvertConfig::default()).expect("inverts");
    let over_old = invert_path(&program, accumulated()).expect("inverts");
    assert!(!over_old.generator.source.to_string().contains(" in old"));
    assert_eq!(pair_set(&eval(&program, &default.generator.source)), expected);
    assert_eq!(pair_set(&eval(&program, &over_old.generator.source)), expected);
}

#[test]
fn left_linear_step_is_not_accumulated() {
    let edges = [(1, 2), (2, 3), (3, 4)];
    let program = program(&edges, LEFT_LINEAR);
    let inverted = invert_path(&program, accumulated()).expect("inverts");
    assert!(inverted.generator.source.to_string().contains("in edges"));
    assert_eq!(pair_set(&eval(&program, &inverted.generator.source)), reachability(&edges));
}

#[test]
fn sibling_existentials_stay_independent() {
    let edges = [(0, 1), (1, 2), (2, 3)];
    let program = program(
        &edges,
        "fun path (x, y) = (x, y) elem edges orelse
            ((exists z where (x, z) elem edges andalso path (z, y)) andalso (exists z where (z, x) elem edges));",
    );
    let expected = BTreeSet::from([(0, 1), (1, 2), (1, 3), (2, 3)]);
    assert_eq!(enumerate(&program, 3), expected);

    let inverted = invert_path(&program, InvertConfig::default()).expect("inverts");
    assert_eq!(pair_set(&eval(&program, &inverted.generator.source)), expected);
}

#[test]
fn bag_relation_selects_bag_iterate() {
    let program = parse_program(&format!(
        "val edges : (int * int) bag = [(1, 2), (2, 3)];\n{RIGHT_LINEAR}"
    ))
    .expect("parses");
    let inverted = invert_path(&program, InvertConfig::default()).expect("inverts");
    assert_eq!(inverted.generator.kind, CollectionKind::Bag);
    assert!(inverted.generator.source.to_string().starts_with("Bag.iterate edges "));
    let v = eval(&program, &inverted.generator.source);
    assert!(v.is_bag());
    assert_eq!(pair_set(&v), BTreeSet::from([(1, 2), (2, 3), (1, 3)]));
}

#[test]
fn custom_base_inverter_is_consulted() {
    struct Refuse;
    impl BaseInverter for Refuse {
        fn invert(
            &self,
            term: &Expr,
            _env: &Environment,
            _active: &ActiveFunctions,
            _cx: &mut InvertContext<'_>,
        ) -> Inversion {
            Inversion::failed(format!("refused `{term}`"))
        }
    }

    let program = program(&[(1, 2)], RIGHT_LINEAR);
    let call = parse_expr("path (x, y)").expect("parses");
    let err = PredicateInverter::new(&program)
        .with_base_inverter(Refuse)
        .invert(&call, &goals(&["x", "y"]), &BTreeMap::new())
        .unwrap_err();
    assert_eq!(
        err,
        NotInvertible::NoMatch {
            reason: "refused `edge (x, y)`".into()
        }
    );
}

#[test]
fn rerunning_yields_identical_output() {
    let program = program(&[(1, 2), (2, 3)], RIGHT_LINEAR);
    let first = invert_path(&program, InvertConfig::default()).expect("inverts");
    let second = invert_path(&program, InvertConfig::default()).expect("inverts");
    assert_eq!(first, second);
    assert_eq!(first.digest(), second.digest());
}

// ============================================================================
// Call sites
// ============================================================================

fn rewrite(program: &Program, query: &str) -> Expr {
    let query = parse_expr(query).expect("query parses");
    PredicateInverter::new(program).rewrite(&query).expect("rewrites")
}

#[test]
fn whole_row_goal_keeps_the_callers_pattern() {
    let program = program(&[(1, 2), (2, 3)], RIGHT_LINEAR);
    let rewritten = rewrite(&program, "from p where path p");
    assert_eq!(
        rewritten.to_string(),
        "from p in List.iterate edges (fn (old, new) => from (x, z) in edges, (z_1, y) in new where z = z_1 yield (x, y))"
    );
    assert_eq!(eval(&program, &rewritten), pair_list(&[(1, 2), (2, 3), (1, 3)]));
}

#[test]
fn caller_variables_replace_parameters() {
    let program = program(&[(1, 2), (2, 3)], RIGHT_LINEAR);
    let rewritten = rewrite(&program, "from (a, b) where path (a, b)");
    assert_eq!(
        rewritten.to_string(),
        "from (a, b) in List.iterate edges (fn (old, new) => from (a, z) in edges, (z_1, b) in new where z = z_1 yield (a, b))"
    );
    assert_eq!(eval(&program, &rewritten), pair_list(&[(1, 2), (2, 3), (1, 3)]));
}

#[test]
fn literal_argument_becomes_a_residual_filter() {
    let program = program(&[(1, 2), (2, 3), (4, 5)], RIGHT_LINEAR);
    let rewritten = rewrite(&program, "from x where path (x, 3)");
    let text = rewritten.to_string();
    assert!(text.starts_with("from (x, y_1) in List.iterate edges "), "{text}");
    assert!(text.ends_with(" where y_1 = 3 yield x"), "{text}");
    assert_eq!(eval(&program, &rewritten), Value::List(vec![Value::Int(2), Value::Int(1)]));
}

#[test]
fn other_conjuncts_stay_as_filters() {
    let program = program(&[(1, 2), (2, 3), (3, 4)], RIGHT_LINEAR);
    let rewritten = rewrite(&program, "from (x, y) where x > 1 andalso path (x, y) yield y");
    let text = rewritten.to_string();
    assert!(text.ends_with(" where x > 1 yield y"), "{text}");
    let mut got: Vec<i64> = eval(&program, &rewritten)
        .into_elements()
        .expect("list")
        .into_iter()
        .map(|v| match v {
            Value::Int(n) => n,
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    got.sort();
    assert_eq!(got, vec![3, 4, 4]);
}

#[test]
fn sourced_or_multi_scan_queries_are_left_alone() {
    let program = program(&[(1, 2)], RIGHT_LINEAR);
    let inverter = PredicateInverter::new(&program);
    for query in ["from p in edges where path p", "from a, b where path (a, b)", "from p yield p"] {
        let query = parse_expr(query).expect("parses");
        assert!(matches!(inverter.rewrite(&query), Err(NotInvertible::NoMatch { .. })));
    }
}

// ============================================================================
// Properties
// ============================================================================

fn graph() -> impl Strategy<Value = Vec<(i64, i64)>> {
    prop::collection::vec((0i64..6, 0i64..6), 0..12)
}

fn dag() -> impl Strategy<Value = Vec<(i64, i64)>> {
    prop::collection::vec((0i64..5, 1i64..4).prop_map(|(a, d)| (a, a + d)), 0..8)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn closure_matches_reachability(edges in graph()) {
        let right = closure(&edges, RIGHT_LINEAR);
        let left = closure(&edges, LEFT_LINEAR);
        prop_assert_eq!(pair_set(&right), reachability(&edges));
        prop_assert_eq!(pair_set(&left), reachability(&edges));
    }

    #[test]
    fn inversion_is_deterministic(edges in graph()) {
        let program = program(&edges, RIGHT_LINEAR);
        let a = invert_path(&program, InvertConfig::default()).expect("inverts");
        let b = invert_path(&program, InvertConfig::default()).expect("inverts");
        prop_assert_eq!(a.digest(), b.digest());
        prop_assert_eq!(a, b);
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 24,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn closure_matches_enumerate_and_filter_on_dags(edges in dag()) {
        let program = program(&edges, RIGHT_LINEAR);
        let query = parse_expr("from (x, y) where path (x, y)").expect("parses");

        let fallback = Evaluator::new(&program, EvalConfig::default().with_int_extent(0, 8))
            .expect("loads")
            .eval(&query)
            .expect("enumerates");
        let rewritten = PredicateInverter::new(&program).rewrite(&query).expect("rewrites");
        let fixpoint = eval(&program, &rewritten);

        prop_assert_eq!(pair_set(&fixpoint), pair_set(&fallback));
    }

    #[test]
    fn filtered_closure_matches_enumerate_and_filter_for_both_join_sources(edges in dag()) {
        let program = program(
            &edges,
            "fun path (x, y) = (x, y) elem edges orelse (exists z where (x, z) elem edges andalso z <> 4 andalso path (z, y));",
        );
        let expected = enumerate(&program, 8);
        for config in [InvertConfig::default(), accumulated()] {
            let inverted = invert_path(&program, config).expect("inverts");
            prop_assert_eq!(pair_set(&eval(&program, &inverted.generator.source)), expected.clone());
        }
    }
}
