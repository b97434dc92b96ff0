//! Unit tests for the graph builder.
//!
//! Tests are organized by builder trait:
//! - ArithmeticBuilder: constants, uniquing, canonical comparisons
//! - ControlBuilder: branches, merges, loops
//! - GuardBuilder / MemoryBuilder: guards, pis, fixed memory nodes

use super::*;
use crate::ir::condition::Condition;
use crate::ir::operators::{CmpOp, ControlOp, DeoptAction, DeoptReason, GuardInfo, LocationId};

// =============================================================================
// ArithmeticBuilder Tests
// =============================================================================

#[test]
fn test_builder_basic() {
    let mut builder = GraphBuilder::with_int_parameters(2);
    let p0 = builder.parameter(0).unwrap();
    let p1 = builder.parameter(1).unwrap();
    let sum = builder.int_add(p0, p1);
    builder.return_value(sum);
    let graph = builder.finish();
    // start, 2 params, add, return
    assert_eq!(graph.len(), 5);
    assert!(graph.verify().is_ok());
}

#[test]
fn test_builder_constants_are_uniqued() {
    let mut builder = GraphBuilder::with_int_parameters(0);
    let a = builder.const_int(10);
    let b = builder.const_int(10);
    let c = builder.const_long(10);
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(builder.graph().stamp(a).as_int_constant(), Some(10));
}

#[test]
fn test_builder_infers_stamps() {
    let mut builder = GraphBuilder::new(&[Stamp::for_integer(32, 0, 100)]);
    let p = builder.parameter(0).unwrap();
    let one = builder.const_int(1);
    let sum = builder.int_add(p, one);
    assert_eq!(builder.stamp_of(sum), Stamp::for_integer(32, 1, 101));
}

#[test]
fn test_compare_builds_canonical_forms() {
    let mut builder = GraphBuilder::with_int_parameters(2);
    let a = builder.parameter(0).unwrap();
    let b = builder.parameter(1).unwrap();

    let le = builder.compare(Condition::Le, a, b);
    let g = builder.graph();
    assert_eq!(g.op(le), &Operator::LogicNot);
    let lt = g.inputs(le)[0];
    assert_eq!(g.op(lt), &Operator::IntCmp(CmpOp::Lt));
    assert_eq!(g.inputs(lt), &[b, a]);

    let gt = builder.int_gt(a, b);
    assert_eq!(gt, lt);
    let ne = builder.int_ne(a, b);
    assert_eq!(builder.graph().op(ne), &Operator::LogicNot);
}

// =============================================================================
// ControlBuilder Tests
// =============================================================================

#[test]
fn test_branch_and_merge() {
    let mut builder = GraphBuilder::with_int_parameters(1);
    let a = builder.parameter(0).unwrap();
    let zero = builder.const_int(0);
    let cond = builder.int_eq(a, zero);
    let (t, f) = builder.branch(cond);
    assert_eq!(builder.control(), t);
    let merge = builder.merge(&[t, f]);
    let one = builder.const_int(1);
    let phi = builder.phi(merge, &[one, zero]);
    builder.return_value(phi);
    assert!(builder.is_terminated());

    let g = builder.finish();
    assert_eq!(g.op(t), &Operator::Control(ControlOp::IfTrue));
    assert_eq!(g.stamp(phi), &Stamp::for_integer(32, 0, 1));
    assert!(g.verify().is_ok());
}

#[test]
fn test_loop_phi_starts_unrestricted() {
    let mut builder = GraphBuilder::with_int_parameters(0);
    let zero = builder.const_int(0);
    let header = builder.loop_begin();
    let i = builder.loop_phi(header, zero);
    assert_eq!(builder.stamp_of(i), Stamp::int(32));
    let one = builder.const_int(1);
    let next = builder.int_add(i, one);
    let limit = builder.const_int(10);
    let cond = builder.int_lt(i, limit);
    let (_, exit) = builder.branch(cond);
    builder.loop_end(header);
    builder.set_loop_phi_back(i, next);
    builder.set_control(exit);
    builder.return_value(i);
    let g = builder.finish();
    assert_eq!(g.inputs(header).len(), 2);
    assert!(g.verify().is_ok());
}

// =============================================================================
// GuardBuilder / MemoryBuilder Tests
// =============================================================================

#[test]
fn test_null_check_narrows() {
    let mut builder = GraphBuilder::new(&[Stamp::object()]);
    let obj = builder.parameter(0).unwrap();
    let checked = builder.null_check(obj, None);
    let g = builder.graph();
    assert_eq!(g.op(checked), &Operator::Pi);
    assert!(g.stamp(checked).as_object().is_some_and(|s| s.is_non_null()));
    let guard = g.inputs(checked)[1];
    assert!(g.op(guard).guard_info().is_some_and(|i| i.negated));
}

#[test]
fn test_memory_nodes_are_fixed() {
    let mut builder = GraphBuilder::new(&[Stamp::object_non_null()]);
    let obj = builder.parameter(0).unwrap();
    let v = builder.load_field(obj, LocationId(3), Stamp::int(32));
    assert_eq!(builder.control(), v);
    let store = builder.store_static(LocationId(4), v);
    assert_eq!(builder.graph().control_pred(store), Some(v));
    let zero = builder.const_int(0);
    let cond = builder.int_eq(v, zero);
    let guard = builder.fixed_guard(cond, GuardInfo::new(DeoptReason::BoundsCheck, DeoptAction::Retry, false));
    assert_eq!(builder.graph().control_pred(guard), Some(store));
    builder.return_void();
    assert!(builder.finish().verify().is_ok());
}
