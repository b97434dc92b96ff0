use super::*;
use crate::ir::builder::{ArithmeticBuilder, ControlBuilder, GraphBuilder, MemoryBuilder};
use crate::ir::condition::Condition;
use crate::ir::interp::{Heap, Interpreter, Outcome, Value};
use crate::ir::stamp::Stamp;
use crate::opt::canonicalize::canonicalize;
use crate::providers::DefaultProviders;

/// `s = 0; for (i = init; i cond limit; i += stride) s += i; return s;`
/// with `limit` given as a constant or, when `None`, parameter 0.
struct Counting {
    graph: Graph,
    header: NodeId,
    i: NodeId,
    ret: NodeId,
}

fn counting(init: i32, cond: Condition, limit: Option<i32>, stride: i32, limit_stamp: Stamp) -> Counting {
    let mut b = GraphBuilder::new(&[limit_stamp]);
    let limit = match limit {
        Some(v) => b.const_int(v),
        None => b.parameter(0).unwrap(),
    };
    let start = b.const_int(init);
    let step = b.const_int(stride);
    let zero = b.const_int(0);
    let header = b.loop_begin();
    let i = b.loop_phi(header, start);
    let s = b.loop_phi(header, zero);
    let test = b.compare(cond, i, limit);
    let (_, exit) = b.branch(test);
    let s_next = b.int_add(s, i);
    let i_next = b.int_add(i, step);
    b.set_loop_phi_back(i, i_next);
    b.set_loop_phi_back(s, s_next);
    b.loop_end(header);
    b.set_control(exit);
    let ret = b.return_value(s);
    let graph = b.finish();
    assert!(graph.verify().is_ok());
    Counting { graph, header, i, ret }
}

fn run(graph: &Graph, arg: i32) -> Outcome {
    Interpreter::new(graph, &DefaultProviders)
        .run(&[Value::int(arg)], &mut Heap::new())
        .unwrap()
}

// =============================================================================
// Detection
// =============================================================================

#[test]
fn test_counted_loop_trip_count() {
    let l = counting(0, Condition::Lt, Some(100), 1, Stamp::int(32));
    let data = LoopsData::compute(&l.graph);
    assert_eq!(data.len(), 1);
    let lp = data.loop_for(l.header).unwrap();
    assert!(lp.is_counted());
    let info = lp.counted().unwrap();
    assert_eq!(info.iv.phi, l.i);
    assert_eq!(info.condition, Condition::Lt);
    assert_eq!(info.overflow, OverflowCheck::Proven);
    assert_eq!(info.constant_max_trip_count(&l.graph), Some(100));

    // 0 + 1 + ... + 99
    assert_eq!(run(&l.graph, 0), Outcome::Returned(Some(Value::int(4950))));
}

#[test]
fn test_trip_count_node_folds_to_constant() {
    let mut l = counting(0, Condition::Lt, Some(100), 1, Stamp::int(32));
    let data = LoopsData::compute(&l.graph);
    let count = data.loop_for(l.header).unwrap().max_trip_count_node(&mut l.graph).unwrap();
    l.graph.replace_input(l.ret, 1, count);
    canonicalize(&mut l.graph);
    let value = l.graph.inputs(l.ret)[1];
    assert_eq!(l.graph[value].as_int(), Some(100));
}

#[test]
fn test_descending_and_inclusive_trip_counts() {
    // 10, 8, 6, 4, 2
    let down = counting(10, Condition::Gt, Some(0), -2, Stamp::int(32));
    let data = LoopsData::compute(&down.graph);
    let info = data.loop_for(down.header).and_then(LoopEx::counted).unwrap();
    assert_eq!(info.direction(), Direction::Down);
    assert_eq!(info.constant_max_trip_count(&down.graph), Some(5));
    assert_eq!(run(&down.graph, 0), Outcome::Returned(Some(Value::int(30))));

    // 0, 3, 6, 9
    let incl = counting(0, Condition::Le, Some(9), 3, Stamp::int(32));
    let data = LoopsData::compute(&incl.graph);
    let info = data.loop_for(incl.header).and_then(LoopEx::counted).unwrap();
    assert!(info.is_inclusive());
    assert_eq!(info.constant_max_trip_count(&incl.graph), Some(4));

    let never = counting(5, Condition::Lt, Some(5), 1, Stamp::int(32));
    let data = LoopsData::compute(&never.graph);
    let info = data.loop_for(never.header).and_then(LoopEx::counted).unwrap();
    assert_eq!(info.constant_max_trip_count(&never.graph), Some(0));
}

#[test]
fn test_unsigned_loop_is_counted() {
    let l = counting(0, Condition::Bt, None, 1, Stamp::int(32));
    let data = LoopsData::compute(&l.graph);
    let lp = data.loop_for(l.header).unwrap();
    assert!(lp.is_counted());
    assert!(lp.counted().unwrap().is_unsigned());
    assert!(lp.counted().unwrap().iv_range(&l.graph).is_none());
}

#[test]
fn test_not_equal_needs_start_below_limit() {
    let known = counting(0, Condition::Ne, Some(10), 1, Stamp::int(32));
    assert!(LoopsData::compute(&known.graph).loop_for(known.header).unwrap().is_counted());

    let unknown = counting(0, Condition::Ne, None, 1, Stamp::int(32));
    assert!(LoopsData::compute(&unknown.graph).loop_for(unknown.header).unwrap().counted().is_none());

    let wrong_stride = counting(0, Condition::Ne, Some(10), 2, Stamp::int(32));
    assert!(LoopsData::compute(&wrong_stride.graph)
        .loop_for(wrong_stride.header)
        .unwrap()
        .counted()
        .is_none());
}

#[test]
fn test_direction_must_match_test() {
    let l = counting(0, Condition::Gt, Some(10), 1, Stamp::int(32));
    assert!(LoopsData::compute(&l.graph).loop_for(l.header).unwrap().counted().is_none());
}

#[test]
fn test_iv_range_at_header() {
    let l = counting(0, Condition::Lt, None, 1, Stamp::for_integer(32, 0, 50));
    let data = LoopsData::compute(&l.graph);
    let info = data.loop_for(l.header).and_then(LoopEx::counted).unwrap();
    let range = info.iv_range(&l.graph).unwrap();
    assert_eq!((range.lower(), range.upper()), (0, 50));
}

// =============================================================================
// Overflow
// =============================================================================

#[test]
fn test_unknown_limit_needs_guard() {
    let mut l = counting(0, Condition::Le, None, 1, Stamp::int(32));
    let log = SpeculationLog::new();
    let mut data = LoopsData::compute(&l.graph);
    let lp = data.loop_for(l.header).unwrap();
    assert!(!lp.is_counted());
    assert!(matches!(lp.counted().unwrap().overflow, OverflowCheck::Required(_)));

    assert_eq!(data.guard_overflow(&mut l.graph, &log), 1);
    assert!(l.graph.verify().is_ok());
    let lp = data.loop_for(l.header).unwrap();
    assert!(lp.is_counted());
    let OverflowCheck::Guarded(guard) = lp.counted().unwrap().overflow else {
        panic!("expected a loop-limit guard");
    };
    assert_eq!(l.graph.next(guard), Some(l.header));

    // Already guarded.
    assert_eq!(data.guard_overflow(&mut l.graph, &log), 0);

    assert_eq!(run(&l.graph, 4), Outcome::Returned(Some(Value::int(10))));
    assert!(matches!(run(&l.graph, i32::MAX), Outcome::Deoptimized(info) if info.reason == DeoptReason::LoopLimitCheck));
}

#[test]
fn test_failed_speculation_keeps_loop_uncounted() {
    let mut l = counting(0, Condition::Le, None, 1, Stamp::int(32));
    let log = SpeculationLog::new();
    let reason = SpeculationReason::new(LOOP_LIMIT_SPECULATION, l.header.as_usize() as u64);
    log.record_failure(log.speculate(reason).unwrap());

    let mut data = LoopsData::compute(&l.graph);
    assert_eq!(data.guard_overflow(&mut l.graph, &log), 0);
    assert!(!data.loop_for(l.header).unwrap().is_counted());
    assert_eq!(data.summary(&l.graph).counted, 0);
}

#[test]
fn test_counted_loops_phase() {
    let mut l = counting(0, Condition::Le, None, 1, Stamp::int(32));
    let log = SpeculationLog::new();
    let ctx = PhaseContext::new(&DefaultProviders, &log);
    let mut phase = CountedLoops::new();
    assert!(phase.run(&mut l.graph, &ctx).unwrap());
    assert!(!phase.run(&mut l.graph, &ctx).unwrap());
    assert_eq!(phase.guards_inserted(), 1);
}

// =============================================================================
// Structure
// =============================================================================

#[test]
fn test_nested_loops_outer_first() {
    // for (i = 0; i < 4; i++) for (j = 0; j < 3; j++) x.f = j;
    let mut b = GraphBuilder::new(&[Stamp::object_non_null()]);
    let x = b.parameter(0).unwrap();
    let zero = b.const_int(0);
    let one = b.const_int(1);
    let three = b.const_int(3);
    let four = b.const_int(4);

    let outer = b.loop_begin();
    let i = b.loop_phi(outer, zero);
    let ci = b.int_lt(i, four);
    let (_, outer_exit) = b.branch(ci);
    let inner = b.loop_begin();
    let j = b.loop_phi(inner, zero);
    let cj = b.int_lt(j, three);
    let (_, inner_exit) = b.branch(cj);
    b.store_field(x, LocationId(7), j);
    let j_next = b.int_add(j, one);
    b.set_loop_phi_back(j, j_next);
    b.loop_end(inner);
    b.set_control(inner_exit);
    let i_next = b.int_add(i, one);
    b.set_loop_phi_back(i, i_next);
    b.loop_end(outer);
    b.set_control(outer_exit);
    b.return_void();
    let g = b.finish();
    assert!(g.verify().is_ok());

    let data = LoopsData::compute(&g);
    let headers: Vec<NodeId> = data.loops().map(LoopEx::header).collect();
    assert_eq!(headers, vec![outer, inner]);
    let inner_loop = data.loop_for(inner).unwrap();
    assert_eq!(inner_loop.depth(), 2);
    assert_eq!(inner_loop.parent(), Some(outer));
    assert!(inner_loop.writes().may_write(LocationId(7)));
    assert!(!inner_loop.writes().may_write(LocationId(8)));
    assert!(data.loop_for(outer).unwrap().writes().may_write(LocationId(7)));

    let summary = data.summary(&g);
    assert_eq!(summary.loops, 2);
    assert_eq!(summary.counted, 2);
    assert_eq!(summary.max_depth, 2);
    assert!(summary.constant_trip_counts.contains(&(outer, 4)));
    assert!(summary.constant_trip_counts.contains(&(inner, 3)));
}

#[test]
fn test_limit_varying_in_loop_is_not_counted() {
    // for (i = 0; i < n; i++) n = n - 1;
    let mut b = GraphBuilder::with_int_parameters(1);
    let n0 = b.parameter(0).unwrap();
    let zero = b.const_int(0);
    let one = b.const_int(1);
    let header = b.loop_begin();
    let i = b.loop_phi(header, zero);
    let n = b.loop_phi(header, n0);
    let test = b.int_lt(i, n);
    let (_, exit) = b.branch(test);
    let i_next = b.int_add(i, one);
    let n_next = b.int_sub(n, one);
    b.set_loop_phi_back(i, i_next);
    b.set_loop_phi_back(n, n_next);
    b.loop_end(header);
    b.set_control(exit);
    b.return_value(i);
    let g = b.finish();

    let data = LoopsData::compute(&g);
    assert!(data.loop_for(header).unwrap().counted().is_none());
    assert_eq!(data.loop_for(header).unwrap().induction_variables().len(), 2);
}
