//! Counted loops through the public interface: detection, trip counts,
//! and agreement with the interpreter after optimization.

use std::sync::Arc;

use flint_jit::ir::builder::{ArithmeticBuilder, ControlBuilder, GraphBuilder};
use flint_jit::ir::interp::{Heap, Interpreter, Outcome, Value};
use flint_jit::ir::Condition;
use flint_jit::opt::canonicalize::canonicalize;
use flint_jit::opt::LoopsData;
use flint_jit::{Compiler, DefaultProviders, Graph, NodeId, PipelineConfig, SpeculationLog, Stamp};
use proptest::prelude::*;

/// `s = 0; for (i = start; i < limit; i++) s += i; return s;`
/// with `limit` taken from parameter 0 when `None`.
fn summing(start: i32, limit: Option<i32>) -> (Graph, NodeId) {
    let mut b = GraphBuilder::new(&[Stamp::int(32)]);
    let limit = match limit {
        Some(v) => b.const_int(v),
        None => b.parameter(0).unwrap(),
    };
    let init = b.const_int(start);
    let zero = b.const_int(0);
    let one = b.const_int(1);
    let header = b.loop_begin();
    let i = b.loop_phi(header, init);
    let s = b.loop_phi(header, zero);
    let test = b.compare(Condition::Lt, i, limit);
    let (_, exit) = b.branch(test);
    let s_next = b.int_add(s, i);
    let i_next = b.int_add(i, one);
    b.set_loop_phi_back(i, i_next);
    b.set_loop_phi_back(s, s_next);
    b.loop_end(header);
    b.set_control(exit);
    b.return_value(s);
    (b.finish(), header)
}

fn run(graph: &Graph, arg: i32) -> Outcome {
    Interpreter::new(graph, &DefaultProviders)
        .run(&[Value::int(arg)], &mut Heap::new())
        .unwrap()
}

#[test]
fn test_zero_to_hundred() {
    let (graph, header) = summing(0, Some(100));
    let data = LoopsData::compute(&graph);
    let lp = data.loop_for(header).unwrap();
    assert!(lp.is_counted());
    assert_eq!(lp.counted().unwrap().constant_max_trip_count(&graph), Some(100));
    assert_eq!(run(&graph, 0), Outcome::Returned(Some(Value::int(4950))));

    let log = SpeculationLog::new();
    let compiler = Compiler::new(PipelineConfig::full(), Arc::new(DefaultProviders));
    let result = compiler.compile(&|_: &SpeculationLog| summing(0, Some(100)).0, &log).unwrap();
    assert_eq!(result.loops.loops, 1);
    assert_eq!(result.loops.counted, 1);
    assert_eq!(result.loops.constant_trip_counts.len(), 1);
    assert_eq!(result.loops.constant_trip_counts[0].1, 100);
    assert_eq!(run(&result.graph, 0), Outcome::Returned(Some(Value::int(4950))));
}

#[test]
fn test_parameter_limit_is_counted() {
    let log = SpeculationLog::new();
    let compiler = Compiler::new(PipelineConfig::full(), Arc::new(DefaultProviders));
    let result = compiler.compile(&|_: &SpeculationLog| summing(0, None).0, &log).unwrap();
    assert_eq!(result.loops.counted, 1);
    assert!(result.loops.constant_trip_counts.is_empty());

    assert_eq!(run(&result.graph, 10), Outcome::Returned(Some(Value::int(45))));
    assert_eq!(run(&result.graph, -3), Outcome::Returned(Some(Value::int(0))));
}

#[test]
fn test_trip_count_node_evaluates() {
    let (mut graph, header) = summing(0, None);
    let data = LoopsData::compute(&graph);
    let count = data.loop_for(header).unwrap().counted().unwrap().max_trip_count_node(&mut graph);

    // Return the trip count instead of the sum.
    let ret = graph
        .iter()
        .find(|(_, n)| matches!(n.op, flint_jit::ir::Operator::Control(flint_jit::ir::ControlOp::Return)))
        .map(|(id, _)| id)
        .unwrap();
    graph.replace_input(ret, 1, count);
    for (limit, want) in [(100, 100), (0, 0), (-5, 0), (1, 1)] {
        assert_eq!(run(&graph, limit), Outcome::Returned(Some(Value::int(want))), "limit {limit}");
    }
}

/// `for (i = start; i < limit; i += stride) {}` returning the loop's
/// trip-count expression, plus the trip count computed from constants.
fn trip_count_returned(start: i32, limit: i32, stride: i32) -> (Graph, u64) {
    let mut b = GraphBuilder::with_int_parameters(0);
    let limit = b.const_int(limit);
    let init = b.const_int(start);
    let step = b.const_int(stride);
    let zero = b.const_int(0);
    let header = b.loop_begin();
    let i = b.loop_phi(header, init);
    let test = b.compare(Condition::Lt, i, limit);
    let (_, exit) = b.branch(test);
    let i_next = b.int_add(i, step);
    b.set_loop_phi_back(i, i_next);
    b.loop_end(header);
    b.set_control(exit);
    let ret = b.return_value(zero);
    let mut graph = b.finish();

    let data = LoopsData::compute(&graph);
    let info = data.loop_for(header).and_then(|l| l.counted()).unwrap();
    assert!(info.is_overflow_safe());
    let expected = info.constant_max_trip_count(&graph).unwrap();
    let count = info.max_trip_count_node(&mut graph);
    graph.replace_input(ret, 1, count);
    (graph, expected)
}

fn returned_unsigned(graph: &Graph) -> u64 {
    match run(graph, 0) {
        Outcome::Returned(Some(Value::Int { value, .. })) => u64::from(value as u32),
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn test_trip_count_beyond_signed_range() {
    let cases = [
        (-10, i32::MAX - 1, 2, 1_073_741_828),
        (i32::MIN, i32::MAX - 2, 3, 1_431_655_765),
        (i32::MIN, i32::MAX, 1, u64::from(u32::MAX)),
        (0, 100, 7, 15),
    ];
    for (start, limit, stride, want) in cases {
        let (mut graph, expected) = trip_count_returned(start, limit, stride);
        assert_eq!(expected, want, "{start}..{limit} by {stride}");
        assert_eq!(returned_unsigned(&graph), want, "{start}..{limit} by {stride}");

        canonicalize(&mut graph);
        assert_eq!(returned_unsigned(&graph), want, "folded {start}..{limit} by {stride}");
    }
}

proptest! {
    #[test]
    fn prop_trip_count_matches_range(start in -50i32..50, limit in -50i32..50) {
        let (graph, header) = summing(start, Some(limit));
        let data = LoopsData::compute(&graph);
        let info = data.loop_for(header).and_then(|l| l.counted()).unwrap();
        let expected = (i64::from(limit) - i64::from(start)).max(0) as u64;
        prop_assert_eq!(info.constant_max_trip_count(&graph), Some(expected));

        let sum: i32 = (start..limit).sum();
        prop_assert_eq!(run(&graph, 0), Outcome::Returned(Some(Value::int(sum))));
    }
}
