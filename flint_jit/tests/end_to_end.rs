//! Whole-pipeline scenarios on small methods.

use std::sync::Arc;

use flint_jit::ir::builder::{ArithmeticBuilder, ControlBuilder, GraphBuilder};
use flint_jit::ir::interp::{Heap, Interpreter, Outcome, Value};
use flint_jit::ir::structurally_equal;
use flint_jit::opt::pipeline::optimize_full;
use flint_jit::{Compiler, DefaultProviders, Graph, PipelineConfig, SchedulePolicy, SpeculationLog};

fn run(graph: &Graph, arg: i32) -> Outcome {
    Interpreter::new(graph, &DefaultProviders)
        .run(&[Value::int(arg)], &mut Heap::new())
        .unwrap()
}

/// `int f(int a) { if (a == 0) { if (a == 5) return 100; if (a != 2) return 1; } return 0; }`
fn contradicting(_: &SpeculationLog) -> Graph {
    let mut b = GraphBuilder::with_int_parameters(1);
    let a = b.parameter(0).unwrap();
    let zero = b.const_int(0);
    let one = b.const_int(1);
    let two = b.const_int(2);
    let five = b.const_int(5);
    let hundred = b.const_int(100);
    let is_zero = b.int_eq(a, zero);
    let (_, outer_false) = b.branch(is_zero);
    let is_five = b.int_eq(a, five);
    let (_, not_five) = b.branch(is_five);
    b.return_value(hundred);
    b.set_control(not_five);
    let not_two = b.int_ne(a, two);
    let (_, is_two) = b.branch(not_two);
    b.return_value(one);
    b.set_control(is_two);
    b.merge(&[is_two, outer_false]);
    b.return_value(zero);
    b.finish()
}

/// `int f(int a) { if (a == 0) return 1; return 0; }`
fn reduced() -> Graph {
    let mut b = GraphBuilder::with_int_parameters(1);
    let a = b.parameter(0).unwrap();
    let zero = b.const_int(0);
    let one = b.const_int(1);
    let is_zero = b.int_eq(a, zero);
    let (_, f) = b.branch(is_zero);
    b.return_value(one);
    b.set_control(f);
    b.return_value(zero);
    b.finish()
}

#[test]
fn test_contradicting_branches_reduce_to_single_test() {
    let log = SpeculationLog::new();
    let compiler = Compiler::new(PipelineConfig::full(), Arc::new(DefaultProviders));
    let result = compiler.compile(&contradicting, &log).unwrap();

    assert_eq!(result.attempts, 1);
    assert!(structurally_equal(&result.graph, &reduced()), "{:?}", result.graph);
    assert!(result.schedule.verify(&result.graph).is_ok());

    let original = contradicting(&log);
    for arg in [i32::MIN, -1, 0, 1, 2, 5, 100, i32::MAX] {
        assert_eq!(run(&result.graph, arg), run(&original, arg), "a = {arg}");
    }
}

#[test]
fn test_every_policy_schedules_result() {
    for policy in [SchedulePolicy::Earliest, SchedulePolicy::Latest, SchedulePolicy::LatestWithGuardOrder] {
        let config = PipelineConfig {
            schedule_policy: policy,
            verify: true,
            ..PipelineConfig::default()
        };
        let compiler = Compiler::new(config, Arc::new(DefaultProviders));
        let result = compiler.compile(&contradicting, &SpeculationLog::new()).unwrap();
        assert_eq!(result.schedule.policy(), policy);

        // Every def reaches its uses.
        let graph = &result.graph;
        for (id, _) in graph.iter() {
            let Some(def_block) = result.schedule.block_of(id) else { continue };
            for &user in graph.usages(id) {
                if graph.op(user).is_merge() || matches!(graph.op(user), flint_jit::ir::Operator::Phi) {
                    continue;
                }
                let use_block = result.schedule.block_of(user).unwrap();
                if def_block == use_block {
                    assert!(result.schedule.position(id) < result.schedule.position(user));
                } else {
                    assert!(result.schedule.dominators().dominates(def_block, use_block));
                }
            }
        }
    }
}

#[test]
fn test_select_after_diamond() {
    // r = a < 0 ? -a : a; return r + 1;
    let mut b = GraphBuilder::with_int_parameters(1);
    let a = b.parameter(0).unwrap();
    let zero = b.const_int(0);
    let one = b.const_int(1);
    let negative = b.int_lt(a, zero);
    let (t, f) = b.branch(negative);
    let negated = b.int_neg(a);
    b.set_control(f);
    let merge = b.merge(&[t, f]);
    let r = b.phi(merge, &[negated, a]);
    let inc = b.int_add(r, one);
    b.return_value(inc);
    let original = b.finish();

    let mut optimized = original.clone();
    let result = optimize_full(&mut optimized).unwrap();
    assert!(result.stats.final_size <= result.stats.initial_size);
    let ifs = optimized.iter().filter(|(_, n)| n.op.is_if()).count();
    assert_eq!(ifs, 0, "{optimized:?}");
    for arg in [i32::MIN, -7, -1, 0, 1, 7, i32::MAX] {
        assert_eq!(run(&optimized, arg), run(&original, arg), "a = {arg}");
    }
}
