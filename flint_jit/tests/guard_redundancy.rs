//! Dominated checks disappear; the graph matches the hand-reduced one.

use flint_jit::ir::builder::{ArithmeticBuilder, ControlBuilder, GraphBuilder, GuardBuilder, MemoryBuilder};
use flint_jit::ir::interp::{Heap, Interpreter, Outcome, Value};
use flint_jit::ir::{structurally_equal, LocationId, Operator};
use flint_jit::opt::pipeline::optimize_full;
use flint_jit::{Graph, Stamp};

const SINK: LocationId = LocationId(1);
const FIELD: LocationId = LocationId(2);

fn count(graph: &Graph, pred: impl Fn(&Operator) -> bool) -> usize {
    graph.iter().filter(|(_, n)| pred(&n.op)).count()
}

/// `if (a == 0) { if (a == 0) sink = 1; }` with the inner test written
/// out `repeat` times.
fn nested_sink(repeat: bool) -> Graph {
    let mut b = GraphBuilder::with_int_parameters(1);
    let a = b.parameter(0).unwrap();
    let zero = b.const_int(0);
    let one = b.const_int(1);
    let c = b.int_eq(a, zero);
    let (_, outer_false) = b.branch(c);
    if repeat {
        let again = b.int_eq(a, zero);
        let (_, inner_false) = b.branch(again);
        b.store_static(SINK, one);
        let stored = b.control();
        let inner = b.merge(&[stored, inner_false]);
        b.merge(&[inner, outer_false]);
    } else {
        b.store_static(SINK, one);
        let stored = b.control();
        b.merge(&[stored, outer_false]);
    }
    b.return_void();
    b.finish()
}

#[test]
fn test_inner_check_removed() {
    let mut graph = nested_sink(true);
    optimize_full(&mut graph).unwrap();
    let expected = nested_sink(false);
    assert!(structurally_equal(&graph, &expected), "{graph:?}");

    for arg in [0, 1, -1] {
        let mut before = Heap::new();
        let mut after = Heap::new();
        let original = nested_sink(true);
        let want = Interpreter::new(&original, &flint_jit::DefaultProviders)
            .run(&[Value::int(arg)], &mut before)
            .unwrap();
        let got = Interpreter::new(&graph, &flint_jit::DefaultProviders)
            .run(&[Value::int(arg)], &mut after)
            .unwrap();
        assert_eq!(got, want);
        assert_eq!(after.static_value(SINK), before.static_value(SINK));
    }
}

#[test]
fn test_hand_reduced_graph_is_fixed_point() {
    let mut graph = nested_sink(false);
    optimize_full(&mut graph).unwrap();
    assert!(structurally_equal(&graph, &nested_sink(false)));
}

/// `x.f` twice, each behind its own null check.
fn double_null_check(second_check: bool) -> Graph {
    let mut b = GraphBuilder::new(&[Stamp::object()]);
    let x = b.parameter(0).unwrap();
    let first = b.null_check(x, None);
    let a = b.load_field(first, FIELD, Stamp::int(32));
    let second = if second_check { b.null_check(x, None) } else { first };
    b.store_static(SINK, a);
    let c = b.load_field(second, FIELD, Stamp::int(32));
    b.return_value(c);
    b.finish()
}

#[test]
fn test_dominated_null_check_removed() {
    let mut graph = double_null_check(true);
    assert_eq!(count(&graph, |op| matches!(op, Operator::Guard(_))), 2);
    optimize_full(&mut graph).unwrap();
    assert_eq!(count(&graph, |op| matches!(op, Operator::Guard(_))), 1);

    let original = double_null_check(true);
    let mut heap = Heap::new();
    let object = heap.new_object(None);
    let want = Interpreter::new(&original, &flint_jit::DefaultProviders)
        .run(&[object.clone()], &mut heap.clone())
        .unwrap();
    let got = Interpreter::new(&graph, &flint_jit::DefaultProviders)
        .run(&[object], &mut heap)
        .unwrap();
    assert_eq!(got, want);

    let null = Interpreter::new(&graph, &flint_jit::DefaultProviders)
        .run(&[Value::Null], &mut Heap::new())
        .unwrap();
    assert!(matches!(null, Outcome::Deoptimized(_)));
}
