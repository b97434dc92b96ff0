//! Loop Trip Count Analysis.
//!
//! A loop is counted when its header ends in an `If` that leaves the loop
//! on one side and compares a basic induction variable against a
//! loop-invariant limit on the other:
//!
//! ```text
//!   Up:    i <  n   i <= n   i <u n   i <=u n   i != n (stride 1)
//!   Down:  i >  n   i >= n   i >u n   i >=u n   i != n (stride -1)
//! ```
//!
//! The trip count is `max(0, ceil((limit - init [+1 if inclusive]) / |stride|))`
//! with the operands swapped for descending loops. In the graph the
//! distance is divided unsigned, so spans wider than the signed range
//! still count correctly. It is exact only when
//! the update cannot wrap while the test still holds; that is either
//! proven from the limit stamp or checked by a loop-limit guard before the
//! loop is entered.

use super::induction::{Direction, InductionVariable};
use crate::ir::cfg::{BlockId, Cfg};
use crate::ir::condition::Condition;
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::{ArithOp, CmpOp, ControlOp, DeoptReason, Operator};
use crate::ir::stamp::{max_value, min_value, width_mask, wrap, IntegerStamp};
use crate::opt::Relation;

// =============================================================================
// Overflow
// =============================================================================

/// Whether the induction variable update can wrap inside the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowCheck {
    /// The limit stamp rules out wrapping.
    Proven,
    /// A loop-limit guard before the loop rules it out.
    Guarded(NodeId),
    /// Neither; the loop is counted only once the check is in place.
    Required(LimitCheck),
}

/// Deoptimize before the loop when `lhs op rhs`, where one side is the
/// limit and the other `bound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitCheck {
    pub op: CmpOp,
    pub bound: i64,
    /// The limit is the left operand.
    pub limit_first: bool,
}

impl LimitCheck {
    /// Operands of the failing condition.
    pub fn operands(&self, limit: NodeId, bound: NodeId) -> [NodeId; 2] {
        if self.limit_first {
            [limit, bound]
        } else {
            [bound, limit]
        }
    }

    /// `cond` is this check on `limit`.
    fn matches(&self, graph: &Graph, cond: NodeId, limit: NodeId) -> bool {
        if *graph.op(cond) != Operator::IntCmp(self.op) {
            return false;
        }
        let inputs = graph.inputs(cond);
        let (l, b) = if self.limit_first { (inputs[0], inputs[1]) } else { (inputs[1], inputs[0]) };
        l == limit && graph[b].as_int() == Some(self.bound)
    }
}

// =============================================================================
// Counted Loop
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountedLoopInfo {
    pub iv: InductionVariable,
    /// Loop-invariant bound of the exit test.
    pub limit: NodeId,
    /// The test that keeps the loop running, as `iv condition limit`.
    pub condition: Condition,
    /// The `If` ending the header block.
    pub exit_if: NodeId,
    /// Projection of `exit_if` that stays in the loop.
    pub body: NodeId,
    /// Projection of `exit_if` that leaves it.
    pub exit: NodeId,
    pub bits: u32,
    pub overflow: OverflowCheck,
}

impl CountedLoopInfo {
    pub fn direction(&self) -> Direction {
        self.iv.direction
    }

    pub fn stride(&self) -> i64 {
        self.iv.stride
    }

    pub fn init(&self) -> NodeId {
        self.iv.init
    }

    pub fn is_unsigned(&self) -> bool {
        self.condition.is_unsigned()
    }

    /// The limit itself is reached by the induction variable.
    pub fn is_inclusive(&self) -> bool {
        matches!(self.condition, Condition::Le | Condition::Ge | Condition::Be | Condition::Ae)
    }

    /// The trip count is exact: wrapping is ruled out.
    pub fn is_overflow_safe(&self) -> bool {
        !matches!(self.overflow, OverflowCheck::Required(_))
    }

    /// Trip count when init and limit are both constants.
    pub fn constant_max_trip_count(&self, graph: &Graph) -> Option<u64> {
        let init = graph[self.iv.init].as_int()?;
        let limit = graph[self.limit].as_int()?;
        let widen = |v: i64| -> i128 {
            if self.is_unsigned() {
                (v as u64 & width_mask(self.bits)) as i128
            } else {
                v as i128
            }
        };
        let (lo, hi) = match self.iv.direction {
            Direction::Up => (widen(init), widen(limit)),
            Direction::Down => (widen(limit), widen(init)),
        };
        let span = hi - lo + i128::from(self.is_inclusive());
        if span <= 0 {
            return Some(0);
        }
        let step = self.iv.step() as i128;
        Some(((span + step - 1) / step) as u64)
    }

    /// Build the trip count expression in `graph`:
    /// `entered ? (hi - lo [-1 unless inclusive]) /u step + 1 : 0`.
    ///
    /// Once the loop is entered the distance is non-negative but may exceed
    /// the signed maximum, so it is divided unsigned.
    pub fn max_trip_count_node(&self, graph: &mut Graph) -> NodeId {
        let bits = self.bits;
        let (lo, hi) = match self.iv.direction {
            Direction::Up => (self.iv.init, self.limit),
            Direction::Down => (self.limit, self.iv.init),
        };
        let step = self.iv.step();

        let mut count = graph.unique_value(Operator::IntOp(ArithOp::Sub), &[hi, lo]);
        if !self.is_inclusive() {
            let minus_one = graph.int_const(bits, -1);
            count = graph.unique_value(Operator::IntOp(ArithOp::Add), &[count, minus_one]);
        }
        if step != 1 {
            let divisor = graph.int_const(bits, wrap(step as i64, bits));
            count = graph.unique_value(Operator::IntOp(ArithOp::UnsignedDiv), &[count, divisor]);
        }
        let one = graph.int_const(bits, 1);
        count = graph.unique_value(Operator::IntOp(ArithOp::Add), &[count, one]);

        let op = if self.is_unsigned() { CmpOp::Below } else { CmpOp::Lt };
        let entered = if self.is_inclusive() {
            let skipped = graph.unique_value(Operator::IntCmp(op), &[hi, lo]);
            graph.unique_value(Operator::LogicNot, &[skipped])
        } else {
            graph.unique_value(Operator::IntCmp(op), &[lo, hi])
        };
        let zero = graph.int_const(bits, 0);
        graph.unique_value(Operator::Conditional, &[entered, count, zero])
    }

    /// Range of the induction variable at the loop header, exit value
    /// included. Within the body the exit test narrows it further.
    pub fn iv_range(&self, graph: &Graph) -> Option<IntegerStamp> {
        if self.is_unsigned() {
            return None;
        }
        let bits = self.bits;
        let init = *graph.stamp(self.iv.init).as_integer()?;
        let limit = *graph.stamp(self.limit).as_integer()?;
        let step = self.iv.step() as i128;
        let guard_bound = match self.overflow {
            OverflowCheck::Required(_) => return None,
            OverflowCheck::Proven => None,
            OverflowCheck::Guarded(_) => self.limit_bound().map(i128::from),
        };
        let (lo, hi) = match self.iv.direction {
            Direction::Up => {
                let top = guard_bound.map_or(limit.upper() as i128, |b| b.min(limit.upper() as i128));
                let last = match self.condition {
                    Condition::Lt => top + step - 1,
                    Condition::Le => top + step,
                    _ => top,
                };
                (init.lower() as i128, last.max(init.upper() as i128))
            }
            Direction::Down => {
                let bottom = guard_bound.map_or(limit.lower() as i128, |b| b.max(limit.lower() as i128));
                let last = match self.condition {
                    Condition::Gt => bottom - step + 1,
                    Condition::Ge => bottom - step,
                    _ => bottom,
                };
                (last.min(init.lower() as i128), init.upper() as i128)
            }
        };
        if lo < min_value(bits) as i128 || hi > max_value(bits) as i128 {
            return None;
        }
        IntegerStamp::range(bits, lo as i64, hi as i64)
    }

    /// The bound the limit must respect for the update not to wrap.
    fn limit_bound(&self) -> Option<i64> {
        limit_check(self.condition, self.iv.step(), self.bits).map(|check| check.bound)
    }
}

/// Check that keeps `iv condition limit` from wrapping the induction
/// variable; `None` when the form cannot wrap at all.
fn limit_check(condition: Condition, step: u64, bits: u32) -> Option<LimitCheck> {
    let s = step as i128;
    let umax = width_mask(bits) as i128;
    let (op, bound, limit_first) = match condition {
        // deopt when bound < limit
        Condition::Lt => (CmpOp::Lt, max_value(bits) as i128 - s + 1, false),
        Condition::Le => (CmpOp::Lt, max_value(bits) as i128 - s, false),
        Condition::Bt => (CmpOp::Below, umax - s + 1, false),
        Condition::Be => (CmpOp::Below, umax - s, false),
        // deopt when limit < bound
        Condition::Gt => (CmpOp::Lt, min_value(bits) as i128 + s - 1, true),
        Condition::Ge => (CmpOp::Lt, min_value(bits) as i128 + s, true),
        Condition::At => (CmpOp::Below, s - 1, true),
        Condition::Ae => (CmpOp::Below, s, true),
        Condition::Eq | Condition::Ne => return None,
    };
    Some(LimitCheck {
        op,
        bound: wrap(bound as i64, bits),
        limit_first,
    })
}

/// The limit stamp alone satisfies `check`.
fn proven_by_stamp(check: &LimitCheck, limit: &IntegerStamp) -> bool {
    let bits = limit.bits();
    match (check.op, check.limit_first) {
        (CmpOp::Lt, false) => limit.upper() <= check.bound,
        (CmpOp::Lt, true) => limit.lower() >= check.bound,
        (CmpOp::Below, false) => limit.unsigned_bounds().1 <= check.bound as u64 & width_mask(bits),
        (CmpOp::Below, true) => limit.unsigned_bounds().0 >= check.bound as u64 & width_mask(bits),
        (CmpOp::Eq, _) => false,
    }
}

// =============================================================================
// Detection
// =============================================================================

/// What detection needs to know about the loop being classified.
pub(super) struct LoopShape<'a> {
    pub header: NodeId,
    /// Control predecessor on the entry edge.
    pub entry: NodeId,
    pub contains_block: &'a dyn Fn(BlockId) -> bool,
    pub is_invariant: &'a dyn Fn(NodeId) -> bool,
}

/// Classify a loop as counted.
pub(super) fn detect(graph: &Graph, cfg: &Cfg, shape: &LoopShape<'_>, ivs: &[InductionVariable]) -> Option<CountedLoopInfo> {
    let header_block = cfg.block_of(shape.header)?;
    let exit_if = cfg.block(header_block).end;
    if !graph.op(exit_if).is_if() {
        return None;
    }
    let t = graph.if_successor(exit_if, true)?;
    let f = graph.if_successor(exit_if, false)?;
    let inside = |n: NodeId| cfg.block_of(n).is_some_and(|b| (shape.contains_block)(b));
    let (body, exit, holds) = match (inside(t), inside(f)) {
        (true, false) => (t, f, true),
        (false, true) => (f, t, false),
        _ => return None,
    };

    let relation = Relation::of(graph, graph.inputs(exit_if)[1], holds)?;
    let (iv, rel) = ivs.iter().find_map(|iv| relation.oriented(iv.phi).map(|r| (iv, r)))?;
    let limit = rel.y;
    if limit == iv.phi || !(shape.is_invariant)(limit) {
        return None;
    }
    let bits = iv.bits(graph)?;
    let limit_stamp = *graph.stamp(limit).as_integer()?;
    if limit_stamp.bits() != bits {
        return None;
    }

    let direction_fits = match (iv.direction, rel.condition) {
        (Direction::Up, Condition::Lt | Condition::Le | Condition::Bt | Condition::Be) => true,
        (Direction::Down, Condition::Gt | Condition::Ge | Condition::At | Condition::Ae) => true,
        (Direction::Up, Condition::Ne) => iv.stride == 1 && starts_at_or_below(graph, iv.init, limit),
        (Direction::Down, Condition::Ne) => iv.stride == -1 && starts_at_or_below(graph, limit, iv.init),
        _ => false,
    };
    if !direction_fits {
        return None;
    }

    let overflow = match limit_check(rel.condition, iv.step(), bits) {
        None => OverflowCheck::Proven,
        Some(check) if proven_by_stamp(&check, &limit_stamp) => OverflowCheck::Proven,
        Some(check) => match existing_guard(graph, shape.entry, &check, limit) {
            Some(guard) => OverflowCheck::Guarded(guard),
            None => OverflowCheck::Required(check),
        },
    };

    tracing::trace!(header = %shape.header, iv = %iv.phi, %limit, condition = ?rel.condition, "counted loop");
    Some(CountedLoopInfo {
        iv: iv.clone(),
        limit,
        condition: rel.condition,
        exit_if,
        body,
        exit,
        bits,
        overflow,
    })
}

/// `a <= b` is proven by the stamps.
fn starts_at_or_below(graph: &Graph, a: NodeId, b: NodeId) -> bool {
    match (graph.stamp(a).as_integer(), graph.stamp(b).as_integer()) {
        (Some(a), Some(b)) => a.upper() <= b.lower(),
        _ => false,
    }
}

/// A loop-limit guard for `check` already on the entry path.
fn existing_guard(graph: &Graph, entry: NodeId, check: &LimitCheck, limit: NodeId) -> Option<NodeId> {
    let mut current = entry;
    loop {
        if let Operator::Control(ControlOp::FixedGuard(info)) = graph.op(current) {
            if info.reason == DeoptReason::LoopLimitCheck
                && info.negated
                && check.matches(graph, graph.inputs(current)[1], limit)
            {
                return Some(current);
            }
        }
        if graph.op(current).is_block_begin() {
            return None;
        }
        current = graph.control_pred(current)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_check_bounds() {
        let lt = limit_check(Condition::Lt, 1, 32).unwrap();
        assert_eq!((lt.op, lt.bound, lt.limit_first), (CmpOp::Lt, i32::MAX as i64, false));
        let le = limit_check(Condition::Le, 2, 32).unwrap();
        assert_eq!(le.bound, i32::MAX as i64 - 2);
        let ge = limit_check(Condition::Ge, 1, 32).unwrap();
        assert_eq!((ge.bound, ge.limit_first), (i32::MIN as i64 + 1, true));
        let bt = limit_check(Condition::Bt, 1, 32).unwrap();
        assert_eq!((bt.op, bt.bound), (CmpOp::Below, -1));
        assert!(limit_check(Condition::Ne, 1, 32).is_none());
    }

    #[test]
    fn test_proven_by_stamp() {
        let check = limit_check(Condition::Le, 1, 32).unwrap();
        let small = IntegerStamp::range(32, 0, 100).unwrap();
        assert!(proven_by_stamp(&check, &small));
        assert!(!proven_by_stamp(&check, &IntegerStamp::unrestricted(32)));

        let below = limit_check(Condition::Be, 1, 32).unwrap();
        assert!(proven_by_stamp(&below, &small));
        assert!(!proven_by_stamp(&below, &IntegerStamp::range(32, -1, -1).unwrap()));
    }
}
