//! Property tests over generated straight-line and diamond programs:
//! canonicalization reaches a fixed point and optimization keeps results
//! bit-for-bit, NaN payloads and integer wraparound included.

use flint_jit::ir::builder::{ArithmeticBuilder, ControlBuilder, GraphBuilder};
use flint_jit::ir::interp::{Heap, Interpreter, Outcome, Value};
use flint_jit::ir::{structurally_equal, Condition};
use flint_jit::opt::canonicalize::canonicalize;
use flint_jit::opt::pipeline::optimize_full;
use flint_jit::{DefaultProviders, Graph, NodeId};
use proptest::prelude::*;

const BOUNDARY: [i32; 7] = [i32::MIN, i32::MIN + 1, -1, 0, 1, i32::MAX - 1, i32::MAX];

#[derive(Debug, Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Ushr,
}

#[derive(Debug, Clone)]
enum Step {
    Const(i32),
    Bin(BinOp, usize, usize),
    Neg(usize),
    Not(usize),
    Div(usize, i32),
    Select(Condition, usize, usize, usize, usize),
    Diamond(Condition, usize, usize, usize, usize),
    /// Reinterpret as float, negate, reinterpret back.
    FloatNeg(usize),
    FloatAdd(usize, usize),
    /// A float NaN with the given payload, as raw bits.
    NanBits(u32),
}

fn operand() -> impl Strategy<Value = i32> {
    prop_oneof![prop::sample::select(BOUNDARY.to_vec()), any::<i32>()]
}

fn step() -> impl Strategy<Value = Step> {
    let idx = || 0usize..64;
    let cond = || prop::sample::select(Condition::ALL.to_vec());
    let bin = prop::sample::select(vec![
        BinOp::Add,
        BinOp::Sub,
        BinOp::Mul,
        BinOp::And,
        BinOp::Or,
        BinOp::Xor,
        BinOp::Shl,
        BinOp::Shr,
        BinOp::Ushr,
    ]);
    prop_oneof![
        operand().prop_map(Step::Const),
        (bin, idx(), idx()).prop_map(|(op, a, b)| Step::Bin(op, a, b)),
        idx().prop_map(Step::Neg),
        idx().prop_map(Step::Not),
        (idx(), operand().prop_filter("non-zero divisor", |d| *d != 0)).prop_map(|(a, d)| Step::Div(a, d)),
        (cond(), idx(), idx(), idx(), idx()).prop_map(|(c, a, b, x, y)| Step::Select(c, a, b, x, y)),
        (cond(), idx(), idx(), idx(), idx()).prop_map(|(c, a, b, x, y)| Step::Diamond(c, a, b, x, y)),
        idx().prop_map(Step::FloatNeg),
        (idx(), idx()).prop_map(|(a, b)| Step::FloatAdd(a, b)),
        any::<u32>().prop_map(Step::NanBits),
    ]
}

fn build(steps: &[Step]) -> Graph {
    let mut b = GraphBuilder::with_int_parameters(2);
    let mut values: Vec<NodeId> = vec![b.parameter(0).unwrap(), b.parameter(1).unwrap()];
    for step in steps {
        let pick = |i: usize| values[i % values.len()];
        let value = match *step {
            Step::Const(v) => b.const_int(v),
            Step::Bin(op, x, y) => {
                let (x, y) = (pick(x), pick(y));
                match op {
                    BinOp::Add => b.int_add(x, y),
                    BinOp::Sub => b.int_sub(x, y),
                    BinOp::Mul => b.int_mul(x, y),
                    BinOp::And => b.and(x, y),
                    BinOp::Or => b.or(x, y),
                    BinOp::Xor => b.xor(x, y),
                    BinOp::Shl => b.shl(x, y),
                    BinOp::Shr => b.shr(x, y),
                    BinOp::Ushr => b.ushr(x, y),
                }
            }
            Step::Neg(x) => b.int_neg(pick(x)),
            Step::Not(x) => b.not(pick(x)),
            Step::Div(x, d) => b.int_div(pick(x), i64::from(d)),
            Step::Select(c, x, y, t, f) => {
                let test = b.compare(c, pick(x), pick(y));
                b.conditional(test, pick(t), pick(f))
            }
            Step::Diamond(c, x, y, t, f) => {
                let (vt, vf) = (pick(t), pick(f));
                let test = b.compare(c, pick(x), pick(y));
                let (if_true, if_false) = b.branch(test);
                let merge = b.merge(&[if_true, if_false]);
                b.phi(merge, &[vt, vf])
            }
            Step::FloatNeg(x) => {
                let f = b.raw_bits_to_float(pick(x));
                let negated = b.float_neg(f);
                b.float_to_raw_bits(negated)
            }
            Step::FloatAdd(x, y) => {
                let fx = b.raw_bits_to_float(pick(x));
                let fy = b.raw_bits_to_float(pick(y));
                let sum = b.float_add(fx, fy);
                b.float_to_raw_bits(sum)
            }
            Step::NanBits(payload) => {
                let raw = 0x7f80_0000 | (payload & 0x807f_ffff) | 1;
                let nan = b.const_float_bits(32, u64::from(raw));
                b.float_to_raw_bits(nan)
            }
        };
        values.push(value);
    }
    let result = values[values.len() - 1];
    b.return_value(result);
    b.finish()
}

fn run(graph: &Graph, x: i32, y: i32) -> Outcome {
    Interpreter::new(graph, &DefaultProviders)
        .run(&[Value::int(x), Value::int(y)], &mut Heap::new())
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_canonicalize_is_idempotent(steps in prop::collection::vec(step(), 1..24)) {
        let mut once = build(&steps);
        canonicalize(&mut once);
        prop_assert!(once.verify().is_ok());

        let mut twice = once.clone();
        canonicalize(&mut twice);
        prop_assert!(structurally_equal(&once, &twice), "{:?}\n{:?}", once, twice);
    }

    #[test]
    fn prop_optimization_preserves_results(
        steps in prop::collection::vec(step(), 1..24),
        x in operand(),
        y in operand(),
    ) {
        let original = build(&steps);
        let mut optimized = original.clone();
        let result = optimize_full(&mut optimized).unwrap();
        prop_assert!(result.schedule.verify(&optimized).is_ok());
        prop_assert_eq!(run(&optimized, x, y), run(&original, x, y));
    }

    #[test]
    fn prop_nan_payload_survives_folding(payload in any::<u32>(), negate in any::<bool>()) {
        let raw = 0x7f80_0000 | (payload & 0x807f_ffff) | 1;
        let mut b = GraphBuilder::with_int_parameters(2);
        let nan = b.const_float_bits(32, u64::from(raw));
        let value = if negate { b.float_neg(nan) } else { nan };
        let bits = b.float_to_raw_bits(value);
        b.return_value(bits);
        let original = b.finish();

        let mut optimized = original.clone();
        optimize_full(&mut optimized).unwrap();
        let want = if negate { raw ^ 0x8000_0000 } else { raw };
        let Outcome::Returned(Some(Value::Int { value, .. })) = run(&optimized, 0, 0) else {
            panic!("expected an integer result");
        };
        prop_assert_eq!(value as u32, want);
        prop_assert_eq!(run(&optimized, 0, 0), run(&original, 0, 0));
    }
}

#[test]
fn test_wraparound_is_kept() {
    // (MAX + p0) * 2 with p0 = 1 wraps.
    let mut b = GraphBuilder::with_int_parameters(2);
    let p = b.parameter(0).unwrap();
    let max = b.const_int(i32::MAX);
    let two = b.const_int(2);
    let sum = b.int_add(max, p);
    let product = b.int_mul(sum, two);
    b.return_value(product);
    let original = b.finish();

    let mut optimized = original.clone();
    optimize_full(&mut optimized).unwrap();
    assert_eq!(run(&optimized, 1, 0), Outcome::Returned(Some(Value::int(0))));
    assert_eq!(run(&optimized, 1, 0), run(&original, 1, 0));
}
