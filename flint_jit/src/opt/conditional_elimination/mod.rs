//! Conditional elimination.
//!
//! Walks the dominator tree depth first, carrying a [`FactMap`] of what the
//! dominating branches, guards and memory operations established:
//!
//! ```text
//!   enter IfTrue/IfFalse   register the branch condition
//!   enter Region           intersect the facts of the predecessors,
//!                          narrow phi stamps
//!   enter Loop             forget memory written in the body, narrow
//!                          induction variables of counted loops
//!   If / guard             decide from facts or register the condition
//!   load / store           forward the last known value of the cell
//! ```
//!
//! Leaving a subtree rolls the facts back to the state it was entered with.
//!
//! During the walk the control skeleton is left alone: decided branches and
//! guards get constant conditions, redundant loads and contradictory paths
//! are queued. The queued edits are applied afterwards and the canonicalizer
//! does the control-flow surgery on everything touched.
//!
//! A speculative guard that is proven to always fail aborts the compilation
//! with a retryable bailout naming its speculation.

mod facts;

use rustc_hash::{FxHashMap, FxHashSet};

use super::canonicalize::{terminate_at, Canonicalizer};
use super::loops::{LoopWrites, LoopsData};
use super::{Phase, PhaseContext};
use crate::error::{Bailout, CompileResult};
use crate::ir::cfg::BlockId;
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::{ControlOp, DeoptInfo, GuardInfo, Operator};
use crate::ir::stamp::Stamp;
use crate::providers::Providers;
use facts::{FactMap, Mark, Snapshot};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionalEliminationStats {
    pub branches_folded: usize,
    pub guards_removed: usize,
    pub guards_failed: usize,
    pub constants_propagated: usize,
    pub loads_eliminated: usize,
    pub phis_improved: usize,
    pub unreachable_paths: usize,
}

/// The conditional elimination phase.
#[derive(Debug, Default)]
pub struct ConditionalElimination {
    stats: ConditionalEliminationStats,
}

impl ConditionalElimination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts of the last run.
    pub fn stats(&self) -> &ConditionalEliminationStats {
        &self.stats
    }
}

impl Phase for ConditionalElimination {
    fn name(&self) -> &'static str {
        "conditional-elimination"
    }

    fn run(&mut self, graph: &mut Graph, ctx: &PhaseContext<'_>) -> CompileResult<bool> {
        let loops = LoopsData::compute(graph);
        let mut walker = Walker::new(graph, &loops, ctx.providers);
        walker.walk()?;
        let Walker {
            mut touched,
            loads,
            unreachable,
            mut stats,
            ..
        } = walker;

        for (load, value) in loads {
            if graph.is_alive(load) && graph.is_alive(value) {
                graph.remove_fixed(load, Some(value));
                touched.push(value);
            }
        }
        for (anchor, deopt) in unreachable {
            if !graph.is_alive(anchor) {
                continue;
            }
            if let Some(cut) = terminate_at(graph, anchor, deopt) {
                stats.unreachable_paths += 1;
                touched.extend(cut);
            }
        }

        let changed = !touched.is_empty();
        if changed {
            touched.sort_unstable();
            touched.dedup();
            Canonicalizer::new().canonicalize_nodes(graph, ctx.providers, &touched);
        }
        tracing::debug!(
            phase = self.name(),
            branches = stats.branches_folded,
            guards = stats.guards_removed,
            failed = stats.guards_failed,
            constants = stats.constants_propagated,
            loads = stats.loads_eliminated,
            phis = stats.phis_improved,
            unreachable = stats.unreachable_paths,
            "conditional elimination"
        );
        self.stats = stats;
        Ok(changed)
    }
}

// =============================================================================
// Walk
// =============================================================================

enum Frame {
    Enter(BlockId),
    Exit(Mark),
}

/// How control leaves a fixed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    /// A decided branch; the successor beginning at the node is dead.
    Fold(Option<NodeId>),
    /// Nothing after this point executes.
    Unreachable,
}

struct Walker<'a> {
    graph: &'a mut Graph,
    loops: &'a LoopsData,
    providers: &'a dyn Providers,
    facts: FactMap,
    dead: FxHashSet<BlockId>,
    /// Facts at the end of each predecessor of a region, by region block.
    snapshots: FxHashMap<BlockId, Vec<(BlockId, Snapshot)>>,
    touched: Vec<NodeId>,
    /// `(load, value)` pairs to replace.
    loads: Vec<(NodeId, NodeId)>,
    /// Anchors after which the path can never execute.
    unreachable: Vec<(NodeId, DeoptInfo)>,
    stats: ConditionalEliminationStats,
}

impl<'a> Walker<'a> {
    fn new(graph: &'a mut Graph, loops: &'a LoopsData, providers: &'a dyn Providers) -> Self {
        Walker {
            graph,
            loops,
            providers,
            facts: FactMap::new(),
            dead: FxHashSet::default(),
            snapshots: FxHashMap::default(),
            touched: Vec::new(),
            loads: Vec::new(),
            unreachable: Vec::new(),
            stats: ConditionalEliminationStats::default(),
        }
    }

    fn walk(&mut self) -> CompileResult<()> {
        let loops = self.loops;
        let cfg = loops.cfg();
        let dom = loops.dominators();
        let mut stack = vec![Frame::Enter(cfg.entry)];

        while let Some(frame) = stack.pop() {
            let block = match frame {
                Frame::Exit(mark) => {
                    self.facts.rollback(mark);
                    continue;
                }
                Frame::Enter(block) => block,
            };
            stack.push(Frame::Exit(self.facts.mark()));
            let flow = self.visit_block(block)?;

            let dead_begin = match flow {
                Flow::Fold(dead) => dead,
                _ => None,
            };
            // Children in reverse so the first in RPO is visited first.
            for &child in dom.children(block).iter().rev() {
                if flow == Flow::Unreachable || Some(cfg.block(child).begin) == dead_begin {
                    self.mark_dead(child);
                } else {
                    stack.push(Frame::Enter(child));
                }
            }
        }
        Ok(())
    }

    fn mark_dead(&mut self, root: BlockId) {
        let loops = self.loops;
        let dom = loops.dominators();
        let mut work = vec![root];
        while let Some(b) = work.pop() {
            if self.dead.insert(b) {
                work.extend_from_slice(dom.children(b));
            }
        }
    }

    fn visit_block(&mut self, block: BlockId) -> CompileResult<Flow> {
        let loops = self.loops;
        let cfg = loops.cfg();
        let bb = cfg.block(block);

        if !self.enter(block, bb.begin) {
            tracing::trace!(begin = %bb.begin, "contradictory facts on entry");
            self.unreachable.push((bb.begin, DeoptInfo::unreachable()));
            return Ok(Flow::Unreachable);
        }

        let mut flow = Flow::Continue;
        for &node in &bb.fixed {
            flow = self.visit_fixed(node)?;
            if flow == Flow::Unreachable {
                return Ok(flow);
            }
        }

        if let [succ] = bb.successors[..] {
            if *self.graph.op(cfg.block(succ).begin) == Operator::Control(ControlOp::Region) {
                let snapshot = self.facts.snapshot();
                self.snapshots.entry(succ).or_default().push((block, snapshot));
            }
        }
        Ok(flow)
    }

    // -------------------------------------------------------------------------
    // Block entry
    // -------------------------------------------------------------------------

    /// Establish the facts that hold on entry. False on contradiction.
    fn enter(&mut self, block: BlockId, begin: NodeId) -> bool {
        let graph = &*self.graph;
        match graph.op(begin) {
            Operator::Control(op @ (ControlOp::IfTrue | ControlOp::IfFalse)) => {
                let branch = graph.inputs(begin)[0];
                let cond = graph.inputs(branch)[1];
                let holds = *op == ControlOp::IfTrue;
                self.facts.register(graph, cond, holds)
            }
            Operator::Control(ControlOp::Region) => self.merge(block, begin),
            Operator::Control(ControlOp::Loop) => {
                self.enter_loop(begin);
                true
            }
            _ => true,
        }
    }

    fn enter_loop(&mut self, header: NodeId) {
        let loops = self.loops;
        let Some(lp) = loops.loop_for(header) else {
            self.facts.kill_memory();
            return;
        };
        match lp.writes() {
            LoopWrites::All => self.facts.kill_memory(),
            LoopWrites::Locations(locations) => {
                for &location in locations {
                    self.facts.kill_location(location);
                }
            }
        }
        if !lp.is_counted() {
            return;
        }
        let Some(counted) = lp.counted() else { return };
        if let Some(range) = counted.iv_range(self.graph) {
            self.facts.improve(self.graph, counted.iv.phi, &Stamp::Integer(range));
        }
    }

    /// Facts every live predecessor agrees on. Phi stamps are narrowed to
    /// the join of their inputs as seen at the end of each predecessor.
    fn merge(&mut self, block: BlockId, region: NodeId) -> bool {
        let loops = self.loops;
        let cfg = loops.cfg();
        let snapshots = self.snapshots.remove(&block).unwrap_or_default();
        let live = cfg
            .block(block)
            .predecessors
            .iter()
            .filter(|p| !self.dead.contains(p))
            .count();
        if snapshots.is_empty() || snapshots.len() != live {
            self.facts.kill_memory();
            return true;
        }

        let ends: Vec<NodeId> = self.graph.inputs(region).to_vec();
        for phi in self.graph.phis(region) {
            let mut joined: Option<Stamp> = None;
            let mut complete = true;
            for (k, &end) in ends.iter().enumerate() {
                let Some(pred) = cfg.block_of(end) else { continue };
                if self.dead.contains(&pred) {
                    continue;
                }
                let Some((_, snapshot)) = snapshots.iter().find(|(b, _)| *b == pred) else {
                    complete = false;
                    break;
                };
                let s = snapshot.stamp_of(self.graph, self.graph.inputs(phi)[k + 1]);
                joined = Some(match joined {
                    Some(j) => j.join(&s),
                    None => s,
                });
            }
            let Some(joined) = joined.filter(|_| complete) else {
                continue;
            };
            let current = self.graph.stamp(phi).clone();
            let improved = current.meet(&joined);
            if !improved.is_empty() && improved.is_strictly_more_precise(&current) {
                tracing::trace!(%phi, ?improved, "narrowed phi");
                self.graph.set_stamp(phi, improved);
                self.touched.push(phi);
                self.stats.phis_improved += 1;
            }
        }

        let preds: Vec<&Snapshot> = snapshots.iter().map(|(_, s)| s).collect();
        self.facts.merge(self.graph, &preds)
    }

    // -------------------------------------------------------------------------
    // Fixed nodes
    // -------------------------------------------------------------------------

    fn visit_fixed(&mut self, node: NodeId) -> CompileResult<Flow> {
        self.propagate_constants(node);

        let op = self.graph.op(node).clone();
        let mut flow = Flow::Continue;
        match op {
            Operator::Control(ControlOp::If) => {
                let cond = self.graph.inputs(node)[1];
                if let Some(taken) = self.facts.evaluate(self.graph, cond) {
                    if !matches!(self.graph.op(cond), Operator::LogicConst(_)) {
                        let c = self.graph.logic_const(taken);
                        self.graph.replace_input(node, 1, c);
                        self.touched.push(node);
                        self.stats.branches_folded += 1;
                        tracing::trace!(%node, taken, "branch decided by dominating facts");
                    }
                    flow = Flow::Fold(self.graph.if_successor(node, !taken));
                }
            }
            Operator::Control(ControlOp::FixedGuard(info)) => {
                flow = self.check_guard(node, &info)?;
            }
            Operator::Memory(mop, location) => {
                let inputs = self.graph.inputs(node);
                let key = (location, mop.has_object().then(|| inputs[1]));
                if mop.is_load() {
                    match self.facts.memory_value(key) {
                        Some(value) if self.graph.stamp(value).is_compatible(self.graph.stamp(node)) => {
                            tracing::trace!(load = %node, %value, "redundant load");
                            self.loads.push((node, value));
                            self.stats.loads_eliminated += 1;
                        }
                        _ => self.facts.set_memory(key, node),
                    }
                } else if let Some(&value) = inputs.last() {
                    self.facts.kill_location(location);
                    self.facts.set_memory(key, value);
                }
            }
            Operator::Invoke(method) if !self.providers.is_side_effect_free(method) => {
                self.facts.kill_memory();
            }
            _ => {}
        }
        if flow == Flow::Unreachable {
            return Ok(flow);
        }

        for guard in self.anchored_guards(node) {
            let Operator::Guard(info) = self.graph.op(guard).clone() else {
                continue;
            };
            if self.check_guard(guard, &info)? == Flow::Unreachable {
                return Ok(Flow::Unreachable);
            }
        }
        Ok(flow)
    }

    /// Floating guards checked right after `anchor`, in id order.
    fn anchored_guards(&self, anchor: NodeId) -> Vec<NodeId> {
        let mut guards: Vec<NodeId> = self
            .graph
            .distinct_usages(anchor)
            .into_iter()
            .filter(|&u| matches!(self.graph.op(u), Operator::Guard(_)) && self.graph.inputs(u)[0] == anchor)
            .collect();
        guards.sort_unstable();
        guards
    }

    /// Value inputs with a constant fact are replaced by the constant.
    fn propagate_constants(&mut self, node: NodeId) {
        for slot in 0..self.graph.inputs(node).len() {
            if self.graph.is_control_slot(node, slot) {
                continue;
            }
            let input = self.graph.inputs(node)[slot];
            if self.graph.op(input).is_constant() {
                continue;
            }
            let Some(constant) = self.facts.refined(input).and_then(Stamp::as_constant) else {
                continue;
            };
            let c = self.graph.constant(constant);
            self.graph.replace_input(node, slot, c);
            self.touched.push(node);
            self.stats.constants_propagated += 1;
        }
    }

    /// Decide or register a guard. `guard` is a `Guard` or a `FixedGuard`;
    /// both have their condition at input 1.
    fn check_guard(&mut self, guard: NodeId, info: &GuardInfo) -> CompileResult<Flow> {
        let cond = self.graph.inputs(guard)[1];
        let passing = !info.negated;
        match self.facts.evaluate(self.graph, cond) {
            Some(value) if value == passing => {
                if !matches!(self.graph.op(cond), Operator::LogicConst(_)) {
                    let c = self.graph.logic_const(value);
                    self.graph.replace_input(guard, 1, c);
                }
                self.touched.push(guard);
                self.stats.guards_removed += 1;
                tracing::trace!(%guard, "guard implied by dominating facts");
                Ok(Flow::Continue)
            }
            Some(_) => self.fail_guard(guard, info),
            None if self.facts.register(self.graph, cond, passing) => Ok(Flow::Continue),
            None => self.fail_guard(guard, info),
        }
    }

    fn fail_guard(&mut self, guard: NodeId, info: &GuardInfo) -> CompileResult<Flow> {
        self.stats.guards_failed += 1;
        if let Some(speculation) = info.speculation {
            tracing::debug!(%guard, reason = info.reason.name(), "speculative guard always fails");
            return Err(Bailout::retryable(
                format!("speculative {} guard {guard} always fails", info.reason.name()),
                Some(speculation),
            )
            .into());
        }
        let cond = self.graph.inputs(guard)[1];
        if *self.graph.op(cond) != Operator::LogicConst(info.negated) {
            let c = self.graph.logic_const(info.negated);
            self.graph.replace_input(guard, 1, c);
        }
        self.touched.push(guard);
        tracing::trace!(%guard, reason = info.reason.name(), "guard always fails");
        Ok(Flow::Unreachable)
    }
}
