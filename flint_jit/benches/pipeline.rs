//! Optimization Pipeline Benchmarks
//!
//! Measures the compiler core on generated methods of growing size.
//!
//! # Benchmark Categories
//!
//! 1. **Canonicalization**: folding and value numbering on straight-line code
//! 2. **Conditional Elimination**: chains of redundant nested tests
//! 3. **Scheduling**: each policy on the same branchy graph
//! 4. **Full Pipeline**: counted loops through the whole driver

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use flint_jit::ir::builder::{ArithmeticBuilder, ControlBuilder, GraphBuilder};
use flint_jit::ir::Condition;
use flint_jit::opt::canonicalize::canonicalize;
use flint_jit::opt::pipeline::{optimize_full, optimize_minimal};
use flint_jit::{Graph, Schedule, SchedulePolicy};

// =============================================================================
// Benchmark Helpers
// =============================================================================

/// `n` arithmetic steps mixing a parameter with constants.
fn straight_line(n: usize) -> Graph {
    let mut b = GraphBuilder::with_int_parameters(1);
    let mut acc = b.parameter(0).unwrap();
    for i in 0..n {
        let k = b.const_int(i as i32);
        let sum = b.int_add(acc, k);
        let zero = b.const_int(0);
        acc = match i % 3 {
            0 => b.int_mul(sum, k),
            1 => b.xor(sum, zero),
            _ => b.int_sub(sum, k),
        };
    }
    b.return_value(acc);
    b.finish()
}

/// `depth` nested tests of `a < i`, each re-tested inside.
fn nested_tests(depth: usize) -> Graph {
    let mut b = GraphBuilder::with_int_parameters(1);
    let a = b.parameter(0).unwrap();
    let mut exits = Vec::with_capacity(depth * 2);
    for i in 0..depth {
        let k = b.const_int(i as i32);
        let test = b.compare(Condition::Lt, a, k);
        let (_, f) = b.branch(test);
        exits.push(f);
        let again = b.compare(Condition::Lt, a, k);
        let (_, f) = b.branch(again);
        exits.push(f);
    }
    let inner = b.control();
    exits.push(inner);
    b.merge(&exits);
    let one = b.const_int(1);
    b.return_value(one);
    b.finish()
}

/// `s = 0; for (i = 0; i < limit; i++) s += i * k;` repeated `count` times.
fn loops(count: usize) -> Graph {
    let mut b = GraphBuilder::with_int_parameters(1);
    let limit = b.parameter(0).unwrap();
    let zero = b.const_int(0);
    let one = b.const_int(1);
    let mut total = zero;
    for k in 0..count {
        let scale = b.const_int(k as i32 + 1);
        let header = b.loop_begin();
        let i = b.loop_phi(header, zero);
        let s = b.loop_phi(header, total);
        let test = b.compare(Condition::Lt, i, limit);
        let (_, exit) = b.branch(test);
        let term = b.int_mul(i, scale);
        let s_next = b.int_add(s, term);
        let i_next = b.int_add(i, one);
        b.set_loop_phi_back(i, i_next);
        b.set_loop_phi_back(s, s_next);
        b.loop_end(header);
        b.set_control(exit);
        total = s;
    }
    b.return_value(total);
    b.finish()
}

// =============================================================================
// Canonicalization Benchmarks
// =============================================================================

fn bench_canonicalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("canonicalize");

    for size in [16, 128, 1024] {
        let graph = straight_line(size);
        group.throughput(Throughput::Elements(graph.len() as u64));
        group.bench_with_input(BenchmarkId::new("straight_line", size), &graph, |b, graph| {
            b.iter(|| {
                let mut g = graph.clone();
                black_box(canonicalize(&mut g))
            });
        });
    }

    group.finish();
}

// =============================================================================
// Conditional Elimination Benchmarks
// =============================================================================

fn bench_conditional_elimination(c: &mut Criterion) {
    let mut group = c.benchmark_group("conditional_elimination");

    for depth in [4, 32, 128] {
        let graph = nested_tests(depth);
        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::new("full", depth), &graph, |b, graph| {
            b.iter(|| {
                let mut g = graph.clone();
                black_box(optimize_full(&mut g).unwrap().stats.final_size)
            });
        });
        group.bench_with_input(BenchmarkId::new("minimal", depth), &graph, |b, graph| {
            b.iter(|| {
                let mut g = graph.clone();
                black_box(optimize_minimal(&mut g).unwrap().stats.final_size)
            });
        });
    }

    group.finish();
}

// =============================================================================
// Scheduling Benchmarks
// =============================================================================

fn bench_schedule(c: &mut Criterion) {
    let mut group = c.benchmark_group("schedule");
    let graph = nested_tests(64);

    for (name, policy) in [
        ("earliest", SchedulePolicy::Earliest),
        ("latest", SchedulePolicy::Latest),
        ("latest_guard_order", SchedulePolicy::LatestWithGuardOrder),
    ] {
        group.bench_function(name, |b| {
            b.iter(|| black_box(Schedule::compute(&graph, policy).unwrap().len()));
        });
    }

    group.finish();
}

// =============================================================================
// Full Pipeline Benchmarks
// =============================================================================

fn bench_counted_loops(c: &mut Criterion) {
    let mut group = c.benchmark_group("counted_loops");

    for count in [1, 8, 32] {
        let graph = loops(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &graph, |b, graph| {
            b.iter(|| {
                let mut g = graph.clone();
                black_box(optimize_full(&mut g).unwrap().stats.scheduled_nodes)
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_canonicalize,
    bench_conditional_elimination,
    bench_schedule,
    bench_counted_loops,
);
criterion_main!(benches);
