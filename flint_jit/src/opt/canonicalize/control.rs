//! Control-flow, phi, guard and pi rules.

use smallvec::SmallVec;

use super::{Canonical, Tool};
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::{ControlOp, DeoptInfo, GuardInfo, Operator};
use crate::ir::stamp::Stamp;

pub(super) fn canonicalize(tool: &mut Tool<'_>, node: NodeId) -> Canonical {
    match tool.graph.op(node).clone() {
        Operator::Control(ControlOp::If) => if_node(tool, node),
        Operator::Control(ControlOp::Region | ControlOp::Loop) => merge(tool, node),
        Operator::Control(ControlOp::FixedGuard(info)) => fixed_guard(tool, node, info),
        Operator::Guard(info) => guard(tool, node, info),
        Operator::Phi => phi(tool.graph, node),
        Operator::Pi => pi(tool.graph, node),
        _ => Canonical::Keep,
    }
}

// =============================================================================
// Cutting control flow
// =============================================================================

/// Remove all control flow after `anchor` and end the path there with a
/// `Deoptimize`. Guards anchored at `anchor` are dropped. Returns the nodes
/// whose shape changed, or `None` when `anchor` cannot be cut (it splits
/// control or already terminates).
pub(crate) fn terminate_at(graph: &mut Graph, anchor: NodeId, deopt: DeoptInfo) -> Option<Vec<NodeId>> {
    let op = graph.op(anchor);
    if op.is_if() || op.is_terminator() {
        return None;
    }
    let mut touched = cut_after(graph, anchor);
    for user in graph.distinct_usages(anchor) {
        if matches!(graph.op(user), Operator::Guard(_)) && graph.inputs(user)[0] == anchor {
            drop_guard(graph, user, anchor);
        }
    }
    let end = graph.add(Operator::Control(ControlOp::Deoptimize(deopt)), &[anchor], Stamp::Void);
    touched.push(end);
    tracing::trace!(%anchor, reason = deopt.reason.name(), "terminated path");
    Some(touched)
}

/// Detach the control successors of `node`: merges lose the edge, anything
/// else is killed. Returns the merges that lost inputs.
fn cut_after(graph: &mut Graph, node: NodeId) -> Vec<NodeId> {
    let mut touched = Vec::new();
    for succ in graph.control_successors(node) {
        if !graph.is_alive(succ) {
            continue;
        }
        if graph.op(succ).is_merge() {
            while let Some(index) = graph.inputs(succ).iter().position(|&i| i == node) {
                if graph.inputs(succ).len() == 1 || (graph.op(succ).is_loop() && index == 0) {
                    touched.extend(graph.kill_cfg(succ));
                    break;
                }
                graph.remove_merge_input(succ, index);
            }
            if graph.is_alive(succ) {
                touched.push(succ);
            }
        } else {
            touched.extend(graph.kill_cfg(succ));
        }
    }
    touched
}

/// Delete a guard; pis that depended on it fall back to `anchor`.
fn drop_guard(graph: &mut Graph, guard: NodeId, anchor: NodeId) {
    let condition = graph.inputs(guard)[1];
    graph.replace_at_usages(guard, anchor);
    graph.delete(guard);
    graph.kill_unused_floating(condition);
}

fn revisit_merges(tool: &mut Tool<'_>, merges: Vec<NodeId>) {
    for m in merges {
        if tool.graph.is_alive(m) {
            let phis = tool.graph.phis(m);
            tool.revisit(m);
            tool.revisit_all(phis);
        }
    }
}

// =============================================================================
// Branches and merges
// =============================================================================

fn if_node(tool: &mut Tool<'_>, node: NodeId) -> Canonical {
    let graph = &mut *tool.graph;
    let (pred, cond) = (graph.inputs(node)[0], graph.inputs(node)[1]);

    match *graph.op(cond) {
        Operator::LogicConst(taken) => {
            let mut shrunk = Vec::new();
            if let Some(dead) = graph.if_successor(node, !taken) {
                shrunk = graph.kill_cfg(dead);
            }
            if let Some(live) = graph.if_successor(node, taken) {
                graph.replace_at_usages(live, pred);
                graph.delete(live);
            }
            // Guards anchored at the branch itself.
            graph.replace_at_usages_where(node, pred, |g, user, slot| g.is_control_slot(user, slot));
            if graph.is_alive(node) && !graph[node].has_usages() {
                graph.delete(node);
                graph.kill_unused_floating(cond);
            }
            tracing::trace!(%node, taken, "folded branch");
            tool.revisit(pred);
            revisit_merges(tool, shrunk);
            Canonical::Changed
        }
        Operator::LogicNot => {
            let inner = graph.inputs(cond)[0];
            for proj in graph.distinct_usages(node) {
                let flipped = match graph.op(proj) {
                    Operator::Control(ControlOp::IfTrue) => ControlOp::IfFalse,
                    Operator::Control(ControlOp::IfFalse) => ControlOp::IfTrue,
                    _ => continue,
                };
                graph.set_op(proj, Operator::Control(flipped));
            }
            graph.replace_input(node, 1, inner);
            graph.kill_unused_floating(cond);
            Canonical::Changed
        }
        _ => empty_diamond(tool, node),
    }
}

/// `if (c) {} else {}` feeding one region becomes straight-line code with
/// the phis selecting by `c`.
fn empty_diamond(tool: &mut Tool<'_>, node: NodeId) -> Canonical {
    let graph = &mut *tool.graph;
    let (Some(t), Some(f)) = (graph.if_successor(node, true), graph.if_successor(node, false)) else {
        return Canonical::Keep;
    };
    let (ut, uf) = (graph.usages(t), graph.usages(f));
    if graph.usages(node).len() != 2 || ut.len() != 1 || uf.len() != 1 || ut[0] != uf[0] {
        return Canonical::Keep;
    }
    let region = ut[0];
    if *graph.op(region) != Operator::Control(ControlOp::Region) {
        return Canonical::Keep;
    }
    let inputs = graph.inputs(region);
    let (Some(i), Some(j)) = (
        inputs.iter().position(|&n| n == t),
        inputs.iter().position(|&n| n == f),
    ) else {
        return Canonical::Keep;
    };

    let (pred, cond) = (graph.inputs(node)[0], graph.inputs(node)[1]);
    let phis = graph.phis(region);
    for &phi in &phis {
        let (vt, vf) = (graph.inputs(phi)[i + 1], graph.inputs(phi)[j + 1]);
        if vt != vf {
            let select = graph.unique_value(Operator::Conditional, &[cond, vt, vf]);
            graph.replace_input(phi, i + 1, select);
        }
    }
    graph.replace_input(region, i, pred);
    graph.remove_merge_input(region, j);
    graph.delete(t);
    graph.delete(f);
    graph.delete(node);
    graph.kill_unused_floating(cond);
    tracing::trace!(%node, %region, "removed empty diamond");
    tool.revisit(region);
    tool.revisit_all(phis);
    Canonical::Changed
}

/// A merge with a single predecessor is no merge at all.
fn merge(tool: &mut Tool<'_>, node: NodeId) -> Canonical {
    let graph = &mut *tool.graph;
    if graph.inputs(node).len() != 1 {
        return Canonical::Keep;
    }
    let pred = graph.inputs(node)[0];
    for phi in graph.phis(node) {
        let value = graph.inputs(phi)[1];
        graph.replace_at_usages(phi, value);
        graph.kill_unused_floating(phi);
    }
    let successors = graph.control_successors(node);
    graph.replace_at_usages(node, pred);
    if graph.is_alive(node) && !graph[node].has_usages() {
        graph.delete(node);
    }
    tool.revisit(pred);
    tool.revisit_all(successors);
    Canonical::Changed
}

fn phi(graph: &mut Graph, node: NodeId) -> Canonical {
    let mut distinct: SmallVec<[NodeId; 2]> = SmallVec::new();
    for &v in &graph.inputs(node)[1..] {
        if v != node && !distinct.contains(&v) {
            distinct.push(v);
            if distinct.len() > 1 {
                return Canonical::Keep;
            }
        }
    }
    match distinct.first() {
        Some(&v) => Canonical::Replace(v),
        None => Canonical::Keep,
    }
}

// =============================================================================
// Guards
// =============================================================================

fn guard(tool: &mut Tool<'_>, node: NodeId, info: GuardInfo) -> Canonical {
    let graph = &mut *tool.graph;
    let (anchor, cond) = (graph.inputs(node)[0], graph.inputs(node)[1]);
    match *graph.op(cond) {
        Operator::LogicConst(b) if b != info.negated => {
            drop_guard(graph, node, anchor);
            Canonical::Changed
        }
        // Failing speculative guards are reported by conditional elimination.
        Operator::LogicConst(_) if info.is_speculative() => Canonical::Keep,
        Operator::LogicConst(_) => match terminate_at(graph, anchor, info.deopt()) {
            Some(touched) => {
                tool.revisit_all(touched);
                Canonical::Changed
            }
            None => Canonical::Keep,
        },
        Operator::LogicNot => {
            let inner = graph.inputs(cond)[0];
            let flipped = GuardInfo {
                negated: !info.negated,
                ..info
            };
            graph.set_op(node, Operator::Guard(flipped));
            graph.replace_input(node, 1, inner);
            graph.kill_unused_floating(cond);
            Canonical::Changed
        }
        _ => Canonical::Keep,
    }
}

fn fixed_guard(tool: &mut Tool<'_>, node: NodeId, info: GuardInfo) -> Canonical {
    let graph = &mut *tool.graph;
    let (pred, cond) = (graph.inputs(node)[0], graph.inputs(node)[1]);
    match *graph.op(cond) {
        Operator::LogicConst(b) if b != info.negated => {
            graph.remove_fixed(node, None);
            tool.revisit(pred);
            Canonical::Changed
        }
        Operator::LogicConst(_) if info.is_speculative() => Canonical::Keep,
        Operator::LogicConst(_) => {
            let touched = cut_after(graph, node);
            for user in graph.distinct_usages(node) {
                if matches!(graph.op(user), Operator::Guard(_)) {
                    drop_guard(graph, user, node);
                }
            }
            graph.remove_input(node, 1);
            graph.set_op(node, Operator::Control(ControlOp::Deoptimize(info.deopt())));
            graph.kill_unused_floating(cond);
            tool.revisit_all(touched);
            Canonical::Changed
        }
        Operator::LogicNot => {
            let inner = graph.inputs(cond)[0];
            let flipped = GuardInfo {
                negated: !info.negated,
                ..info
            };
            graph.set_op(node, Operator::Control(ControlOp::FixedGuard(flipped)));
            graph.replace_input(node, 1, inner);
            graph.kill_unused_floating(cond);
            Canonical::Changed
        }
        _ => Canonical::Keep,
    }
}

/// A pi adds nothing when its value is already as precise.
fn pi(graph: &mut Graph, node: NodeId) -> Canonical {
    let value = graph.inputs(node)[0];
    let own = graph.stamp(node);
    let theirs = graph.stamp(value);
    if theirs.meet(own) == *theirs {
        Canonical::Replace(value)
    } else {
        Canonical::Keep
    }
}
