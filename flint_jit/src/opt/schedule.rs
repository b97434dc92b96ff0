//! Scheduling: a block and an order for every live node.
//!
//! Fixed nodes keep the block the CFG gives them. Floating nodes are placed
//! by policy:
//!
//! - [`SchedulePolicy::Earliest`]: the deepest block among the blocks of the
//!   inputs, i.e. as soon as every input is available.
//! - [`SchedulePolicy::Latest`]: the common dominator of all uses, then moved
//!   up the dominator chain toward the earliest block while that lowers the
//!   loop depth.
//! - [`SchedulePolicy::LatestWithGuardOrder`]: `Latest`, and guards sharing
//!   an anchor are ordered so that the checks other guards imply come first.
//!
//! Phis live in the block of their merge and guards in the block of their
//! anchor under every policy. A phi input is used at the end of the
//! corresponding predecessor, not in the phi's own block.
//!
//! Within a block the order is: fixed nodes in chain order, each preceded by
//! the floating nodes it needs. Phis follow the merge that begins the block
//! and guards follow their anchor. Floating nodes only used by later blocks
//! go right before the block end.

use std::cmp::Reverse;

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use super::Relation;
use crate::error::VerificationError;
use crate::ir::arena::{BitSet, SecondaryMap};
use crate::ir::cfg::{BlockId, Cfg, DominatorTree, LoopForest};
use crate::ir::graph::Graph;
use crate::ir::node::{Node, NodeId};
use crate::ir::operators::Operator;

// =============================================================================
// Policy
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SchedulePolicy {
    Earliest,
    Latest,
    #[default]
    LatestWithGuardOrder,
}

impl SchedulePolicy {
    pub const fn is_latest(self) -> bool {
        !matches!(self, SchedulePolicy::Earliest)
    }

    pub const fn orders_guards(self) -> bool {
        matches!(self, SchedulePolicy::LatestWithGuardOrder)
    }
}

// =============================================================================
// Schedule
// =============================================================================

#[derive(Debug, Clone)]
pub struct Schedule {
    policy: SchedulePolicy,
    cfg: Cfg,
    dom: DominatorTree,
    block_of: SecondaryMap<Node, Option<BlockId>>,
    /// Index of each scheduled node within its block.
    position: SecondaryMap<Node, u32>,
    /// Scheduled nodes of each block, indexed by block.
    blocks: Vec<Vec<NodeId>>,
    /// Floating nodes nothing live depends on.
    dead: Vec<NodeId>,
}

impl Schedule {
    /// Schedule `graph` and verify the result.
    pub fn compute(graph: &Graph, policy: SchedulePolicy) -> Result<Schedule, VerificationError> {
        let cfg = Cfg::build(graph);
        let dom = DominatorTree::build(&cfg);
        let forest = LoopForest::compute(&cfg, &dom);

        let mut scheduler = Scheduler::new(graph, &cfg, &dom, &forest);
        scheduler.mark_live();
        scheduler.place_fixed();
        scheduler.place_earliest()?;
        if policy.is_latest() {
            scheduler.place_latest()?;
        }
        let blocks = scheduler.order(policy)?;
        let Scheduler { block_of, live, .. } = scheduler;

        let mut position = SecondaryMap::with_capacity(graph.id_bound());
        for nodes in &blocks {
            for (i, &n) in nodes.iter().enumerate() {
                position.set(n, i as u32);
            }
        }
        let dead = graph
            .iter()
            .filter(|(id, node)| node.op.is_floating() && !live.contains(id.as_usize()))
            .map(|(id, _)| id)
            .collect();

        let schedule = Schedule {
            policy,
            cfg,
            dom,
            block_of,
            position,
            blocks,
            dead,
        };
        schedule.verify(graph)?;
        tracing::debug!(
            ?policy,
            blocks = schedule.cfg.len(),
            nodes = schedule.len(),
            dead = schedule.dead.len(),
            "scheduled"
        );
        Ok(schedule)
    }

    pub fn policy(&self) -> SchedulePolicy {
        self.policy
    }

    pub fn cfg(&self) -> &Cfg {
        &self.cfg
    }

    pub fn dominators(&self) -> &DominatorTree {
        &self.dom
    }

    pub fn block_of(&self, node: NodeId) -> Option<BlockId> {
        *self.block_of.get(node)
    }

    /// Scheduled nodes of `block`, in order.
    pub fn nodes_in(&self, block: BlockId) -> &[NodeId] {
        self.blocks.get(block.as_usize()).map(Vec::as_slice).unwrap_or_default()
    }

    /// Index of `node` within its block.
    pub fn position(&self, node: NodeId) -> Option<u32> {
        self.block_of(node).map(|_| *self.position.get(node))
    }

    /// Blocks with their nodes, in reverse postorder.
    pub fn iter(&self) -> impl Iterator<Item = (BlockId, &[NodeId])> {
        self.cfg.rpo.iter().map(move |&b| (b, self.nodes_in(b)))
    }

    /// Number of scheduled nodes.
    pub fn len(&self) -> usize {
        self.blocks.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(Vec::is_empty)
    }

    /// Floating nodes that were alive in the graph but not scheduled.
    pub fn dead_nodes(&self) -> &[NodeId] {
        &self.dead
    }

    /// Delete the dead floating nodes that only dead nodes use, phi cycles
    /// included. Returns the number of deleted nodes.
    pub fn remove_dead(&self, graph: &mut Graph) -> usize {
        let mut removable: FxHashSet<NodeId> = self.dead.iter().copied().filter(|&n| graph.is_alive(n)).collect();
        loop {
            let pinned: Vec<NodeId> = removable
                .iter()
                .copied()
                .filter(|&n| graph.usages(n).iter().any(|u| !removable.contains(u)))
                .collect();
            if pinned.is_empty() {
                break;
            }
            for n in pinned {
                removable.remove(&n);
            }
        }

        let mut doomed: Vec<NodeId> = removable.into_iter().collect();
        doomed.sort_unstable();
        for &n in &doomed {
            while let Some(last) = graph.inputs(n).len().checked_sub(1) {
                graph.remove_input(n, last);
            }
        }
        for &n in &doomed {
            graph.delete(n);
        }
        if !doomed.is_empty() {
            tracing::trace!(removed = doomed.len(), "dead floating nodes removed");
        }
        doomed.len()
    }

    /// Check that every input of a scheduled node is available where it is used.
    pub fn verify(&self, graph: &Graph) -> Result<(), VerificationError> {
        for nodes in &self.blocks {
            for &user in nodes {
                if graph.op(user).is_merge() {
                    continue;
                }
                for (slot, &input) in graph.inputs(user).iter().enumerate() {
                    self.check_use(graph, input, user, slot)?;
                }
            }
        }
        Ok(())
    }

    fn check_use(&self, graph: &Graph, def: NodeId, user: NodeId, slot: usize) -> Result<(), VerificationError> {
        let Some(use_block) = self.block_of(user) else {
            return Ok(());
        };
        let Some(def_block) = self.block_of(def) else {
            return Err(VerificationError::UnscheduledNode {
                node: def,
                detail: format!("input {slot} of scheduled node {user}"),
            });
        };

        let available = if matches!(graph.op(user), Operator::Phi) && slot > 0 {
            let merge = graph.inputs(user)[0];
            match graph.inputs(merge).get(slot - 1).and_then(|&end| self.cfg.block_of(end)) {
                Some(pred) => self.dom.dominates(def_block, pred),
                None => true,
            }
        } else if def_block == use_block {
            self.position.get(def) < self.position.get(user)
        } else {
            self.dom.dominates(def_block, use_block)
        };

        if available {
            Ok(())
        } else if matches!(graph.op(def), Operator::Guard(_)) {
            Err(VerificationError::GuardDoesNotDominate { guard: def, usage: user })
        } else {
            Err(VerificationError::ScheduleViolation { node: def, usage: user })
        }
    }
}

// =============================================================================
// Placement
// =============================================================================

struct Scheduler<'a> {
    graph: &'a Graph,
    cfg: &'a Cfg,
    dom: &'a DominatorTree,
    forest: &'a LoopForest,
    live: BitSet,
    block_of: SecondaryMap<Node, Option<BlockId>>,
    /// Live floating nodes, inputs before users. Phi and guard inputs do
    /// not count as edges.
    topo: Vec<NodeId>,
}

/// Floating nodes placed by their control input alone.
fn is_pinned(op: &Operator) -> bool {
    matches!(op, Operator::Phi | Operator::Guard(_))
}

impl<'a> Scheduler<'a> {
    fn new(graph: &'a Graph, cfg: &'a Cfg, dom: &'a DominatorTree, forest: &'a LoopForest) -> Self {
        Scheduler {
            graph,
            cfg,
            dom,
            forest,
            live: BitSet::with_capacity(graph.id_bound()),
            block_of: SecondaryMap::with_capacity(graph.id_bound()),
            topo: Vec::new(),
        }
    }

    fn is_live(&self, n: NodeId) -> bool {
        self.live.contains(n.as_usize())
    }

    fn placed(&self, n: NodeId) -> Option<BlockId> {
        *self.block_of.get(n)
    }

    /// Reachable fixed nodes, the guards anchored at them, and every
    /// floating node these depend on.
    fn mark_live(&mut self) {
        let graph = self.graph;
        let mut work = Vec::new();
        for (_, block) in self.cfg.iter() {
            for &f in &block.fixed {
                work.push(f);
                work.extend(
                    graph
                        .distinct_usages(f)
                        .into_iter()
                        .filter(|&u| matches!(graph.op(u), Operator::Guard(_)) && graph.inputs(u)[0] == f),
                );
            }
        }
        while let Some(n) = work.pop() {
            if !self.live.insert(n.as_usize()) {
                continue;
            }
            work.extend(graph.inputs(n).iter().copied().filter(|&i| graph.op(i).is_floating()));
        }
    }

    fn place_fixed(&mut self) {
        for (b, block) in self.cfg.iter() {
            for &f in &block.fixed {
                self.block_of.set(f, Some(b));
            }
        }
    }

    fn place_earliest(&mut self) -> Result<(), VerificationError> {
        const NEW: u8 = 0;
        const ACTIVE: u8 = 1;
        const DONE: u8 = 2;

        let graph = self.graph;
        let mut state: SecondaryMap<Node, u8> = SecondaryMap::with_capacity(graph.id_bound());
        let roots: Vec<NodeId> = graph
            .iter()
            .filter(|(id, node)| node.op.is_floating() && self.is_live(*id))
            .map(|(id, _)| id)
            .collect();

        for root in roots {
            let mut stack = vec![(root, false)];
            while let Some((n, expanded)) = stack.pop() {
                if expanded {
                    let block = self.earliest_block(n)?;
                    self.block_of.set(n, Some(block));
                    state.set(n, DONE);
                    self.topo.push(n);
                    continue;
                }
                match *state.get(n) {
                    DONE => continue,
                    ACTIVE => return Err(VerificationError::IllegalCycle { node: n }),
                    _ => {}
                }
                state.set(n, ACTIVE);
                stack.push((n, true));
                if is_pinned(graph.op(n)) {
                    continue;
                }
                for &i in graph.inputs(n) {
                    if graph.op(i).is_floating() && *state.get(i) == NEW {
                        stack.push((i, false));
                    } else if graph.op(i).is_floating() && *state.get(i) == ACTIVE {
                        return Err(VerificationError::IllegalCycle { node: i });
                    }
                }
            }
        }
        Ok(())
    }

    fn earliest_block(&self, n: NodeId) -> Result<BlockId, VerificationError> {
        let graph = self.graph;
        let inputs = graph.inputs(n);
        if is_pinned(graph.op(n)) {
            return self.placed(inputs[0]).ok_or_else(|| VerificationError::UnscheduledNode {
                node: n,
                detail: format!("control input {} is unreachable", inputs[0]),
            });
        }

        let mut best = self.cfg.entry;
        for &i in inputs {
            let Some(b) = self.placed(i) else {
                return Err(VerificationError::UnscheduledNode {
                    node: n,
                    detail: format!("input {i} is not scheduled"),
                });
            };
            if self.dom.dominates(best, b) {
                best = b;
            } else if !self.dom.dominates(b, best) {
                return Err(VerificationError::UnscheduledNode {
                    node: n,
                    detail: format!("inputs available in unrelated blocks {best} and {b}"),
                });
            }
        }
        Ok(best)
    }

    fn place_latest(&mut self) -> Result<(), VerificationError> {
        let graph = self.graph;
        for idx in (0..self.topo.len()).rev() {
            let n = self.topo[idx];
            if is_pinned(graph.op(n)) {
                continue;
            }
            let Some(early) = self.placed(n) else { continue };

            let mut late: Option<BlockId> = None;
            let mut first_user = None;
            for user in graph.distinct_usages(n) {
                if !self.is_live(user) {
                    continue;
                }
                first_user.get_or_insert(user);
                for b in self.use_blocks(n, user) {
                    late = Some(match late {
                        None => b,
                        Some(l) => self.dom.common_dominator(l, b),
                    });
                }
            }
            let Some(late) = late else { continue };
            if !self.dom.dominates(early, late) {
                return Err(VerificationError::ScheduleViolation {
                    node: n,
                    usage: first_user.unwrap_or(n),
                });
            }

            let block = self.hoist(early, late);
            if block != late {
                tracing::trace!(node = %n, from = %late, to = %block, "hoisted out of loop");
            }
            self.block_of.set(n, Some(block));
        }
        Ok(())
    }

    /// Blocks where `user` needs `def`.
    fn use_blocks(&self, def: NodeId, user: NodeId) -> SmallVec<[BlockId; 2]> {
        let graph = self.graph;
        let mut blocks = SmallVec::new();
        if matches!(graph.op(user), Operator::Phi) {
            let merge_inputs = graph.inputs(graph.inputs(user)[0]);
            for (slot, &i) in graph.inputs(user).iter().enumerate().skip(1) {
                if i != def {
                    continue;
                }
                if let Some(b) = merge_inputs.get(slot - 1).and_then(|&end| self.cfg.block_of(end)) {
                    blocks.push(b);
                }
            }
        } else if let Some(b) = self.placed(user) {
            blocks.push(b);
        }
        blocks
    }

    /// Shallowest loop nest on the dominator path from `late` up to `early`;
    /// the latest such block on ties.
    fn hoist(&self, early: BlockId, late: BlockId) -> BlockId {
        let mut best = late;
        let mut block = late;
        while block != early {
            let Some(up) = self.dom.idom(block) else { break };
            block = up;
            if self.forest.loop_depth(block) < self.forest.loop_depth(best) {
                best = block;
            }
        }
        best
    }

    // =========================================================================
    // Ordering
    // =========================================================================

    fn order(&self, policy: SchedulePolicy) -> Result<Vec<Vec<NodeId>>, VerificationError> {
        let graph = self.graph;
        let mut members: Vec<Vec<NodeId>> = vec![Vec::new(); self.cfg.len()];
        for (id, node) in graph.iter() {
            if node.op.is_floating() && self.is_live(id) {
                if let Some(b) = self.placed(id) {
                    members[b.as_usize()].push(id);
                }
            }
        }

        let mut blocks = vec![Vec::new(); self.cfg.len()];
        let mut emitted = BitSet::with_capacity(graph.id_bound());
        for &b in &self.cfg.rpo {
            let mut order = BlockOrder {
                scheduler: self,
                block: b,
                emitted: &mut emitted,
                nodes: Vec::new(),
            };
            order.run(&members[b.as_usize()], policy)?;
            blocks[b.as_usize()] = order.nodes;
        }
        Ok(blocks)
    }

    /// Guards anchored at `anchor`, in check order.
    fn guards_at(&self, anchor: NodeId, policy: SchedulePolicy) -> Vec<NodeId> {
        let graph = self.graph;
        let mut guards: Vec<NodeId> = graph
            .distinct_usages(anchor)
            .into_iter()
            .filter(|&u| matches!(graph.op(u), Operator::Guard(_)) && graph.inputs(u)[0] == anchor && self.is_live(u))
            .collect();
        if policy.orders_guards() && guards.len() > 1 {
            let mut keys: Vec<(bool, Reverse<usize>, NodeId)> = guards
                .iter()
                .map(|&g| {
                    let speculative = graph.op(g).guard_info().is_some_and(|i| i.speculation.is_some());
                    let implied_by = guards.iter().filter(|&&o| o != g && guard_implies(graph, o, g)).count();
                    (speculative, Reverse(implied_by), g)
                })
                .collect();
            keys.sort_unstable();
            guards = keys.into_iter().map(|(_, _, g)| g).collect();
        }
        guards
    }
}

/// Guard `a` passing means guard `b` passes too.
fn guard_implies(graph: &Graph, a: NodeId, b: NodeId) -> bool {
    let passes = |g: NodeId| {
        let negated = graph.op(g).guard_info().is_some_and(|i| i.negated);
        (graph.inputs(g)[1], !negated)
    };
    let (ca, ha) = passes(a);
    let (cb, hb) = passes(b);
    if ca == cb {
        return ha == hb;
    }
    if let (Some(ra), Some(rb)) = (Relation::of(graph, ca, ha), Relation::of(graph, cb, hb)) {
        return rb
            .oriented(ra.x)
            .is_some_and(|rb| rb.y == ra.y && ra.condition.implies(rb.condition));
    }
    // x instanceof T implies x != null
    matches!((graph.op(ca), graph.op(cb)), (Operator::InstanceOf(_), Operator::IsNull))
        && ha
        && !hb
        && graph.inputs(ca)[0] == graph.inputs(cb)[0]
}

/// Emission order of one block.
struct BlockOrder<'s, 'a> {
    scheduler: &'s Scheduler<'a>,
    block: BlockId,
    emitted: &'s mut BitSet,
    nodes: Vec<NodeId>,
}

impl BlockOrder<'_, '_> {
    fn run(&mut self, members: &[NodeId], policy: SchedulePolicy) -> Result<(), VerificationError> {
        let s = self.scheduler;
        let graph = s.graph;
        let fixed = &s.cfg.block(self.block).fixed;
        let last = fixed.len().saturating_sub(1);

        for (i, &f) in fixed.iter().enumerate() {
            if i == last && i > 0 {
                for &n in members {
                    // Whatever cannot go yet waits for the end.
                    let _ = self.emit(n);
                }
            }
            self.emit(f).map_err(|blocked| blocked_error(graph, blocked, f))?;

            if graph.op(f).is_merge() {
                for phi in graph.phis(f) {
                    if s.is_live(phi) && !self.emitted.contains(phi.as_usize()) {
                        self.push(phi);
                    }
                }
            }
            for guard in s.guards_at(f, policy) {
                self.emit(guard).map_err(|blocked| blocked_error(graph, blocked, guard))?;
            }
        }

        for &n in members {
            self.emit(n).map_err(|blocked| VerificationError::UnscheduledNode {
                node: n,
                detail: format!("{blocked} is not available in its block"),
            })?;
        }
        Ok(())
    }

    fn push(&mut self, n: NodeId) {
        self.emitted.insert(n.as_usize());
        self.nodes.push(n);
    }

    /// Emit `root` after the same-block floating nodes it needs. Fails with
    /// the first dependency that cannot be emitted yet.
    fn emit(&mut self, root: NodeId) -> Result<(), NodeId> {
        let s = self.scheduler;
        let graph = s.graph;
        let mut stack = vec![(root, false)];
        while let Some((n, expanded)) = stack.pop() {
            if self.emitted.contains(n.as_usize()) {
                continue;
            }
            if expanded {
                self.push(n);
                continue;
            }
            stack.push((n, true));
            if matches!(graph.op(n), Operator::Phi) {
                continue;
            }
            for &i in graph.inputs(n) {
                if self.emitted.contains(i.as_usize()) || s.placed(i) != Some(self.block) {
                    continue;
                }
                if graph.op(i).is_fixed() || matches!(graph.op(i), Operator::Phi) {
                    return Err(i);
                }
                stack.push((i, false));
            }
        }
        Ok(())
    }
}

fn blocked_error(graph: &Graph, blocked: NodeId, user: NodeId) -> VerificationError {
    if matches!(graph.op(blocked), Operator::Guard(_)) {
        VerificationError::GuardDoesNotDominate { guard: blocked, usage: user }
    } else {
        VerificationError::ScheduleViolation { node: blocked, usage: user }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::{ArithmeticBuilder, ControlBuilder, GraphBuilder, GuardBuilder, MemoryBuilder};
    use crate::ir::interp::{Heap, Interpreter, Outcome, Value};
    use crate::ir::operators::{DeoptAction, DeoptReason, GuardInfo, LocationId};
    use crate::ir::stamp::{Stamp, TypeRef};
    use crate::providers::DefaultProviders;
    use crate::speculation::{SpeculationLog, SpeculationReason};

    const ALL: [SchedulePolicy; 3] = [
        SchedulePolicy::Earliest,
        SchedulePolicy::Latest,
        SchedulePolicy::LatestWithGuardOrder,
    ];

    fn before(s: &Schedule, a: NodeId, b: NodeId) -> bool {
        match (s.block_of(a), s.block_of(b)) {
            (Some(x), Some(y)) if x == y => s.position(a) < s.position(b),
            (Some(x), Some(y)) => s.dominators().strictly_dominates(x, y),
            _ => false,
        }
    }

    /// `if (a < b) return a * b + 1; return 0;`
    fn diamond() -> (Graph, NodeId, NodeId, NodeId) {
        let mut b = GraphBuilder::with_int_parameters(2);
        let x = b.parameter(0).unwrap();
        let y = b.parameter(1).unwrap();
        let product = b.int_mul(x, y);
        let one = b.const_int(1);
        let sum = b.int_add(product, one);
        let zero = b.const_int(0);
        let test = b.int_lt(x, y);
        let (t, f) = b.branch(test);
        b.return_value(sum);
        b.set_control(f);
        b.return_value(zero);
        (b.finish(), product, sum, t)
    }

    // =========================================================================
    // Placement
    // =========================================================================

    #[test]
    fn test_earliest_places_at_inputs() {
        let (g, product, sum, _) = diamond();
        let s = Schedule::compute(&g, SchedulePolicy::Earliest).unwrap();
        let entry = s.cfg().entry;
        assert_eq!(s.block_of(product), Some(entry));
        assert_eq!(s.block_of(sum), Some(entry));
        assert!(before(&s, product, sum));
    }

    #[test]
    fn test_latest_sinks_to_single_use() {
        let (g, product, sum, t) = diamond();
        let s = Schedule::compute(&g, SchedulePolicy::Latest).unwrap();
        let taken = s.cfg().block_of(t);
        assert_eq!(s.block_of(sum), taken);
        assert_eq!(s.block_of(product), taken);
        assert!(before(&s, product, sum));
    }

    #[test]
    fn test_latest_hoists_invariant_out_of_loop() {
        // for (i = 0; i < n; i++) x.f = a * a;
        let mut b = GraphBuilder::new(&[Stamp::int(32), Stamp::int(32), Stamp::object_non_null()]);
        let n = b.parameter(0).unwrap();
        let a = b.parameter(1).unwrap();
        let x = b.parameter(2).unwrap();
        let zero = b.const_int(0);
        let one = b.const_int(1);
        let header = b.loop_begin();
        let i = b.loop_phi(header, zero);
        let test = b.int_lt(i, n);
        let (_, exit) = b.branch(test);
        let square = b.int_mul(a, a);
        let store = b.store_field(x, LocationId(1), square);
        let next = b.int_add(i, one);
        b.set_loop_phi_back(i, next);
        b.loop_end(header);
        b.set_control(exit);
        b.return_void();
        let g = b.finish();

        for policy in ALL {
            let s = Schedule::compute(&g, policy).unwrap();
            assert_eq!(s.block_of(square), Some(s.cfg().entry), "{policy:?}");
            assert!(before(&s, square, store));
            assert_eq!(s.block_of(test), s.cfg().block_of(header));
            if policy.is_latest() {
                // Sinks to its only use, the back edge.
                assert_ne!(s.block_of(next), s.cfg().block_of(header), "{policy:?}");
            } else {
                assert_eq!(s.block_of(next), s.cfg().block_of(header));
            }
        }
    }

    #[test]
    fn test_phi_input_used_at_predecessor() {
        // r = a < 0 ? a + 1 : 7
        let mut b = GraphBuilder::with_int_parameters(1);
        let a = b.parameter(0).unwrap();
        let zero = b.const_int(0);
        let one = b.const_int(1);
        let seven = b.const_int(7);
        let inc = b.int_add(a, one);
        let test = b.int_lt(a, zero);
        let (t, f) = b.branch(test);
        let t_end = b.control();
        b.set_control(f);
        let merge = b.merge(&[t_end, f]);
        let r = b.phi(merge, &[inc, seven]);
        b.return_value(r);
        let g = b.finish();

        let s = Schedule::compute(&g, SchedulePolicy::Latest).unwrap();
        assert_eq!(s.block_of(inc), s.cfg().block_of(t));
        assert_eq!(s.block_of(r), s.cfg().block_of(merge));
        let merge_nodes = s.nodes_in(s.cfg().block_of(merge).unwrap());
        assert_eq!(&merge_nodes[..2], &[merge, r]);
    }

    #[test]
    fn test_inputs_from_sibling_branches_rejected() {
        let mut b = GraphBuilder::with_int_parameters(1);
        let a = b.parameter(0).unwrap();
        let zero = b.const_int(0);
        let test = b.int_eq(a, zero);
        let (_, f) = b.branch(test);
        let left = b.load_static(LocationId(1), Stamp::int(32));
        b.return_void();
        b.set_control(f);
        let right = b.load_static(LocationId(2), Stamp::int(32));
        let sum = b.int_add(left, right);
        b.return_value(sum);
        let g = b.finish();

        let err = Schedule::compute(&g, SchedulePolicy::Earliest).unwrap_err();
        assert!(matches!(err, VerificationError::UnscheduledNode { node, .. } if node == sum));
    }

    // =========================================================================
    // Order
    // =========================================================================

    #[test]
    fn test_every_policy_verifies() {
        let (g, ..) = diamond();
        for policy in ALL {
            let s = Schedule::compute(&g, policy).unwrap();
            assert_eq!(s.policy(), policy);
            assert!(s.verify(&g).is_ok());
            let entry = s.cfg().entry;
            assert_eq!(s.nodes_in(entry)[0], g.start());
            assert_eq!(s.iter().next().map(|(b, _)| b), Some(entry));
        }
    }

    #[test]
    fn test_load_scheduled_before_its_users() {
        let mut b = GraphBuilder::new(&[Stamp::object_non_null()]);
        let x = b.parameter(0).unwrap();
        let load = b.load_field(x, LocationId(3), Stamp::int(32));
        let one = b.const_int(1);
        let inc = b.int_add(load, one);
        let store = b.store_field(x, LocationId(3), inc);
        b.return_void();
        let g = b.finish();

        for policy in ALL {
            let s = Schedule::compute(&g, policy).unwrap();
            assert!(before(&s, load, inc));
            assert!(before(&s, inc, store));
        }
    }

    #[test]
    fn test_array_length_stays_behind_null_check() {
        // if (x == null) return -1; return x.length;
        let mut b = GraphBuilder::new(&[Stamp::object()]);
        let x = b.parameter(0).unwrap();
        let minus_one = b.const_int(-1);
        let is_null = b.is_null(x);
        let (_, non_null) = b.branch(is_null);
        b.return_value(minus_one);
        b.set_control(non_null);
        let length = b.array_length(x);
        b.return_value(length);
        let g = b.finish();
        assert!(g.verify().is_ok());

        for policy in ALL {
            let s = Schedule::compute(&g, policy).unwrap();
            assert_eq!(s.block_of(length), s.cfg().block_of(non_null), "{policy:?}");
            assert_ne!(s.block_of(length), Some(s.cfg().entry));
        }

        let run = |arg: Value, heap: &mut Heap| Interpreter::new(&g, &DefaultProviders).run(&[arg], heap).unwrap();
        let mut heap = Heap::new();
        let array = heap.new_array(5);
        assert_eq!(run(array, &mut heap), Outcome::Returned(Some(Value::int(5))));
        assert_eq!(run(Value::Null, &mut heap), Outcome::Returned(Some(Value::int(-1))));
    }

    #[test]
    fn test_guards_implied_checks_first() {
        let ty = TypeRef::new(1, "Point", None, true);
        let mut b = GraphBuilder::new(&[Stamp::object()]);
        let x = b.parameter(0).unwrap();
        let is_point = b.instance_of(x, ty);
        let type_guard = b.guard(is_point, GuardInfo::new(DeoptReason::ClassCast, DeoptAction::Retry, false));
        let is_null = b.is_null(x);
        let null_guard = b.guard(is_null, GuardInfo::new(DeoptReason::NullCheck, DeoptAction::Retry, true));
        let narrowed = b.pi(x, type_guard, Stamp::object_non_null());
        let load = b.load_field(narrowed, LocationId(1), Stamp::int(32));
        b.return_value(load);
        let g = b.finish();

        let by_id = Schedule::compute(&g, SchedulePolicy::Latest).unwrap();
        assert!(before(&by_id, type_guard, null_guard));
        let ordered = Schedule::compute(&g, SchedulePolicy::LatestWithGuardOrder).unwrap();
        assert!(before(&ordered, null_guard, type_guard));
        assert!(before(&ordered, type_guard, narrowed));
    }

    #[test]
    fn test_speculative_guards_after_plain_ones() {
        let log = SpeculationLog::new();
        let speculation = log.speculate(SpeculationReason::new("test", 1));
        let mut b = GraphBuilder::with_int_parameters(2);
        let x = b.parameter(0).unwrap();
        let y = b.parameter(1).unwrap();
        let zero = b.const_int(0);
        let positive = b.int_gt(x, zero);
        let guess = b.guard(
            positive,
            GuardInfo::new(DeoptReason::UnreachedCode, DeoptAction::Retry, false).with_speculation(speculation),
        );
        let nonzero = b.int_ne(y, zero);
        let check = b.guard(nonzero, GuardInfo::new(DeoptReason::UnreachedCode, DeoptAction::Retry, false));
        b.return_void();
        let g = b.finish();

        let s = Schedule::compute(&g, SchedulePolicy::LatestWithGuardOrder).unwrap();
        assert!(before(&s, check, guess));
    }

    #[test]
    fn test_guard_implication() {
        let mut b = GraphBuilder::with_int_parameters(1);
        let x = b.parameter(0).unwrap();
        let five = b.const_int(5);
        let zero = b.const_int(0);
        let gt5 = b.int_gt(x, five);
        let gt0 = b.int_gt(zero, x);
        let strong = b.guard(gt5, GuardInfo::new(DeoptReason::UnreachedCode, DeoptAction::Retry, false));
        let ne5 = b.int_eq(x, five);
        let weak = b.guard(ne5, GuardInfo::new(DeoptReason::UnreachedCode, DeoptAction::Retry, true));
        let unrelated = b.guard(gt0, GuardInfo::new(DeoptReason::UnreachedCode, DeoptAction::Retry, false));
        let g = b.finish();

        assert!(guard_implies(&g, strong, weak));
        assert!(!guard_implies(&g, weak, strong));
        assert!(!guard_implies(&g, strong, unrelated));
    }

    // =========================================================================
    // Verification and Dead Nodes
    // =========================================================================

    #[test]
    fn test_verify_rejects_moved_node() {
        let mut b = GraphBuilder::with_int_parameters(1);
        let a = b.parameter(0).unwrap();
        let one = b.const_int(1);
        let inc = b.int_add(a, one);
        let test = b.int_eq(a, one);
        let (t, f) = b.branch(test);
        b.return_value(inc);
        b.set_control(f);
        b.return_value(inc);
        let g = b.finish();

        let mut s = Schedule::compute(&g, SchedulePolicy::Latest).unwrap();
        assert_eq!(s.block_of(inc), Some(s.cfg().entry));
        let taken = s.cfg().block_of(t);
        s.block_of.set(inc, taken);
        let err = s.verify(&g).unwrap_err();
        assert!(matches!(err, VerificationError::ScheduleViolation { node, .. } if node == inc));
    }

    #[test]
    fn test_verify_reports_guard() {
        let mut b = GraphBuilder::new(&[Stamp::object()]);
        let x = b.parameter(0).unwrap();
        let narrowed = b.null_check(x, None);
        let load = b.load_field(narrowed, LocationId(1), Stamp::int(32));
        b.return_value(load);
        let g = b.finish();

        let mut s = Schedule::compute(&g, SchedulePolicy::LatestWithGuardOrder).unwrap();
        let guard = g.inputs(narrowed)[1];
        assert!(before(&s, guard, narrowed));
        let end = s.nodes_in(s.block_of(guard).unwrap()).len() as u32;
        s.position.set(guard, end);
        let err = s.verify(&g).unwrap_err();
        assert_eq!(
            err,
            VerificationError::GuardDoesNotDominate {
                guard,
                usage: narrowed
            }
        );
    }

    #[test]
    fn test_dead_nodes_removed() {
        let mut b = GraphBuilder::with_int_parameters(1);
        let a = b.parameter(0).unwrap();
        let unused = b.int_mul(a, a);
        let header = b.loop_begin();
        let zero = b.const_int(0);
        let cycle = b.loop_phi(header, zero);
        let one = b.const_int(1);
        let next = b.int_add(cycle, one);
        b.set_loop_phi_back(cycle, next);
        let test = b.int_lt(a, one);
        let (_, exit) = b.branch(test);
        b.loop_end(header);
        b.set_control(exit);
        b.return_value(a);
        let mut g = b.finish();

        let s = Schedule::compute(&g, SchedulePolicy::Latest).unwrap();
        for n in [unused, cycle, next] {
            assert!(s.dead_nodes().contains(&n));
            assert_eq!(s.block_of(n), None);
        }
        assert!(s.remove_dead(&mut g) >= 3);
        assert!(!g.is_alive(unused));
        assert!(!g.is_alive(cycle));
        assert!(!g.is_alive(next));
        assert!(g.is_alive(test));
        assert!(g.verify().is_ok());
        assert!(Schedule::compute(&g, SchedulePolicy::Latest).unwrap().dead_nodes().is_empty());
    }
}
