//! Memory and call rules.

use smallvec::SmallVec;

use super::{Canonical, Tool};
use crate::ir::node::NodeId;
use crate::ir::operators::{Constant, LocationId, MemoryOp, MethodId, Operator};

pub(super) fn canonicalize(tool: &mut Tool<'_>, node: NodeId) -> Canonical {
    match tool.graph.op(node).clone() {
        Operator::Memory(op, location) if op.is_load() => load(tool, node, op, location),
        Operator::Invoke(method) => invoke(tool, node, method),
        _ => Canonical::Keep,
    }
}

fn load(tool: &mut Tool<'_>, node: NodeId, op: MemoryOp, location: LocationId) -> Canonical {
    let graph = &mut *tool.graph;
    let object = op.has_object().then(|| graph.inputs(node)[1]);

    let unused = graph.distinct_usages(node).into_iter().all(|u| {
        graph
            .inputs(u)
            .iter()
            .enumerate()
            .all(|(slot, &i)| i != node || graph.is_control_slot(u, slot))
    });
    let safe_to_drop = object.is_none_or(|o| graph.stamp(o).as_object().is_some_and(|s| s.is_non_null()));
    if unused && safe_to_drop {
        let pred = graph.inputs(node)[0];
        graph.remove_fixed(node, None);
        tool.revisit(pred);
        return Canonical::Changed;
    }

    if tool.fold_reads {
        if let Some(value) = previous_value(tool, node, op, location, object) {
            let graph = &mut *tool.graph;
            if graph.stamp(value).is_compatible(graph.stamp(node)) {
                tracing::trace!(%node, %value, location = location.0, "read eliminated");
                let pred = graph.inputs(node)[0];
                graph.remove_fixed(node, Some(value));
                tool.revisit(pred);
                tool.revisit(value);
                return Canonical::Changed;
            }
        }
    }

    let graph = &mut *tool.graph;
    if let Some(declared) = tool.providers.location_stamp(location) {
        let current = graph.stamp(node);
        let narrowed = current.meet(&declared);
        if narrowed.is_compatible(current) && narrowed.is_strictly_more_precise(current) {
            graph.set_stamp(node, narrowed);
            return Canonical::Changed;
        }
    }
    Canonical::Keep
}

/// Value already loaded from or stored to the same location earlier in the
/// block, with nothing in between that may overwrite it.
fn previous_value(
    tool: &Tool<'_>,
    node: NodeId,
    op: MemoryOp,
    location: LocationId,
    object: Option<NodeId>,
) -> Option<NodeId> {
    let graph = &*tool.graph;
    let immutable = tool.providers.is_immutable(location);
    let mut current = graph.control_pred(node)?;
    loop {
        match *graph.op(current) {
            Operator::Memory(other, loc) if loc == location && other.has_object() == op.has_object() => {
                let same_object = object.is_none_or(|o| graph.inputs(current)[1] == o);
                match (other.is_load(), same_object) {
                    (true, true) => return Some(current),
                    (false, true) => return graph.inputs(current).last().copied(),
                    (true, false) => {}
                    (false, false) if immutable => {}
                    (false, false) => return None,
                }
            }
            Operator::Invoke(method) if !immutable && !tool.providers.is_side_effect_free(method) => return None,
            _ => {}
        }
        if graph.op(current).is_block_begin() {
            return None;
        }
        current = graph.control_pred(current)?;
    }
}

fn invoke(tool: &mut Tool<'_>, node: NodeId, method: MethodId) -> Canonical {
    let graph = &mut *tool.graph;
    let pred = graph.inputs(node)[0];

    let args: Option<SmallVec<[Constant; 4]>> = graph.inputs(node)[1..].iter().map(|&a| graph[a].as_constant()).collect();
    if let Some(result) = args.and_then(|args| tool.providers.fold_invoke(method, &args)) {
        let value = graph.constant(result);
        if graph.stamp(value).is_compatible(graph.stamp(node)) {
            tracing::trace!(%node, method = method.0, "call folded");
            graph.remove_fixed(node, Some(value));
            tool.revisit(pred);
            return Canonical::Changed;
        }
    }

    if !graph[node].has_usages() && tool.providers.is_side_effect_free(method) {
        graph.remove_fixed(node, None);
        tool.revisit(pred);
        return Canonical::Changed;
    }
    Canonical::Keep
}
