//! Guard builder.
//!
//! A guard deoptimizes unless its condition (or its negation, for negated
//! guards) holds:
//!
//! ```text
//!   FixedGuard   on the control chain, checked where it is placed
//!   Guard        floating, anchored at a fixed node; the scheduler places
//!                it anywhere the anchor dominates
//!   Pi           a value narrowed to the stamp its guard proves
//! ```
//!
//! A speculative guard carries a [`Speculation`] token so a failure can be
//! recorded and the assumption withheld on recompilation.

use super::GraphBuilder;
use crate::ir::node::NodeId;
use crate::ir::operators::{ControlOp, DeoptAction, DeoptInfo, DeoptReason, GuardInfo, Operator};
use crate::ir::stamp::Stamp;
use crate::speculation::Speculation;

/// Builder trait for guards and deoptimization.
pub trait GuardBuilder {
    /// Fixed guard at the current position.
    fn fixed_guard(&mut self, condition: NodeId, info: GuardInfo) -> NodeId;
    /// Floating guard anchored at the current position.
    fn guard(&mut self, condition: NodeId, info: GuardInfo) -> NodeId;
    /// `value` narrowed to `stamp`, valid wherever `guard` holds.
    fn pi(&mut self, value: NodeId, guard: NodeId, stamp: Stamp) -> NodeId;
    /// Null check as a floating guard; returns the non-null pi of `value`.
    fn null_check(&mut self, value: NodeId, speculation: Option<Speculation>) -> NodeId;
    fn deoptimize(&mut self, info: DeoptInfo) -> NodeId;
}

impl GuardBuilder for GraphBuilder {
    fn fixed_guard(&mut self, condition: NodeId, info: GuardInfo) -> NodeId {
        self.append(Operator::Control(ControlOp::FixedGuard(info)), &[condition], Stamp::Void)
    }

    fn guard(&mut self, condition: NodeId, info: GuardInfo) -> NodeId {
        let anchor = self.control();
        self.graph.add(Operator::Guard(info), &[anchor, condition], Stamp::Void)
    }

    fn pi(&mut self, value: NodeId, guard: NodeId, stamp: Stamp) -> NodeId {
        let narrowed = self.graph.stamp(value).meet(&stamp);
        self.graph.unique(Operator::Pi, &[value, guard], narrowed)
    }

    fn null_check(&mut self, value: NodeId, speculation: Option<Speculation>) -> NodeId {
        let is_null = self.graph.unique(Operator::IsNull, &[value], Stamp::Void);
        let info = GuardInfo::new(DeoptReason::NullCheck, DeoptAction::Retry, true).with_speculation(speculation);
        let guard = self.guard(is_null, info);
        self.pi(value, guard, Stamp::object_non_null())
    }

    fn deoptimize(&mut self, info: DeoptInfo) -> NodeId {
        self.append(Operator::Control(ControlOp::Deoptimize(info)), &[], Stamp::Void)
    }
}
