//! Loop analysis.
//!
//! [`LoopsData`] is a snapshot of the loops of a graph: natural loops from
//! the CFG, their induction variables and, where the exit test allows it,
//! a [`CountedLoopInfo`]. Like the CFG it is recomputed after the graph
//! changes; nothing here survives a mutation.
//!
//! # Module Structure
//!
//! - [`induction`]: basic induction variables
//! - [`trip_count`]: counted-loop detection, trip counts and limit checks
//!
//! A counted loop whose update could wrap needs a loop-limit check before
//! it is entered. [`LoopsData::guard_overflow`] inserts that check as a
//! speculative `FixedGuard`; if the speculation already failed for this
//! method the loop stays uncounted.

pub mod induction;
pub mod trip_count;

pub use induction::{Direction, InductionDetector, InductionVariable};
pub use trip_count::{CountedLoopInfo, LimitCheck, OverflowCheck};

use rustc_hash::{FxHashMap, FxHashSet};

use super::{Phase, PhaseContext};
use crate::error::CompileResult;
use crate::ir::cfg::{BlockId, Cfg, DominatorTree, LoopForest};
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::{ControlOp, DeoptAction, DeoptReason, GuardInfo, LocationId, Operator};
use crate::ir::stamp::Stamp;
use crate::speculation::{SpeculationLog, SpeculationReason};
use trip_count::LoopShape;

/// Speculation group of loop-limit guards; the key is the loop header.
pub const LOOP_LIMIT_SPECULATION: &str = "counted-loop-overflow";

// =============================================================================
// Loop
// =============================================================================

/// Memory a loop body may write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopWrites {
    /// Contains a call: any location.
    All,
    Locations(FxHashSet<LocationId>),
}

impl LoopWrites {
    pub fn may_write(&self, location: LocationId) -> bool {
        match self {
            LoopWrites::All => true,
            LoopWrites::Locations(set) => set.contains(&location),
        }
    }
}

/// A natural loop of the graph.
#[derive(Debug, Clone)]
pub struct LoopEx {
    header: NodeId,
    header_block: BlockId,
    /// Blocks of the loop, header included, sorted.
    blocks: Vec<BlockId>,
    /// Control predecessor on the entry edge.
    entry: NodeId,
    /// Back-edge ends, in header input order.
    back_edges: Vec<NodeId>,
    /// Begin nodes of the blocks control leaves to.
    exits: Vec<NodeId>,
    depth: u32,
    parent: Option<NodeId>,
    writes: LoopWrites,
    ivs: Vec<InductionVariable>,
    counted: Option<CountedLoopInfo>,
}

impl LoopEx {
    /// The `Loop` node.
    pub fn header(&self) -> NodeId {
        self.header
    }

    pub fn header_block(&self) -> BlockId {
        self.header_block
    }

    pub fn entry(&self) -> NodeId {
        self.entry
    }

    pub fn back_edges(&self) -> &[NodeId] {
        &self.back_edges
    }

    pub fn exits(&self) -> &[NodeId] {
        &self.exits
    }

    /// 1 for outermost loops.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Header of the enclosing loop.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    pub fn contains_block(&self, block: BlockId) -> bool {
        self.blocks.binary_search(&block).is_ok()
    }

    pub fn writes(&self) -> &LoopWrites {
        &self.writes
    }

    pub fn induction_variables(&self) -> &[InductionVariable] {
        &self.ivs
    }

    /// Counted with a trip count that is exact: wrapping is proven
    /// impossible or guarded against.
    pub fn is_counted(&self) -> bool {
        self.counted.as_ref().is_some_and(CountedLoopInfo::is_overflow_safe)
    }

    /// Counted-loop shape, including loops still waiting for their limit check.
    pub fn counted(&self) -> Option<&CountedLoopInfo> {
        self.counted.as_ref()
    }

    /// Trip count expression of a counted loop.
    pub fn max_trip_count_node(&self, graph: &mut Graph) -> Option<NodeId> {
        self.counted
            .as_ref()
            .filter(|c| c.is_overflow_safe())
            .map(|c| c.max_trip_count_node(graph))
    }
}

// =============================================================================
// Loops Data
// =============================================================================

/// Counts for logs and compilation results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopsSummary {
    pub loops: usize,
    pub counted: usize,
    pub max_depth: u32,
    /// `(header, trip count)` of counted loops with constant bounds.
    pub constant_trip_counts: Vec<(NodeId, u64)>,
}

#[derive(Debug, Clone)]
pub struct LoopsData {
    cfg: Cfg,
    dom: DominatorTree,
    /// Outer loops first.
    loops: Vec<LoopEx>,
    by_header: FxHashMap<NodeId, usize>,
}

impl LoopsData {
    pub fn compute(graph: &Graph) -> Self {
        let cfg = Cfg::build(graph);
        let dom = DominatorTree::build(&cfg);
        let forest = LoopForest::compute(&cfg, &dom);

        let mut order: Vec<usize> = (0..forest.loops.len()).collect();
        order.sort_by_key(|&i| (forest.loops[i].depth, cfg.rpo_index(forest.loops[i].header)));

        let detector = InductionDetector::new(graph);
        let mut loops = Vec::with_capacity(order.len());
        for i in order {
            let lp = &forest.loops[i];
            let header = cfg.block(lp.header).begin;
            let Some((&entry, back_edges)) = graph.inputs(header).split_first() else {
                continue;
            };
            let contains = |b: BlockId| lp.contains(b);
            let invariant = |n: NodeId| is_invariant(graph, &cfg, &contains, n);
            let ivs = detector.find_induction_variables(header);
            let shape = LoopShape {
                header,
                entry,
                contains_block: &contains,
                is_invariant: &invariant,
            };
            let counted = trip_count::detect(graph, &cfg, &shape, &ivs);

            loops.push(LoopEx {
                header,
                header_block: lp.header,
                blocks: lp.body.clone(),
                entry,
                back_edges: back_edges.to_vec(),
                exits: lp.exits.iter().map(|&b| cfg.block(b).begin).collect(),
                depth: lp.depth,
                parent: lp.parent.map(|p| cfg.block(forest.loops[p].header).begin),
                writes: writes_of(graph, &cfg, &lp.body),
                ivs,
                counted,
            });
        }
        let by_header = loops.iter().enumerate().map(|(i, l)| (l.header, i)).collect();

        LoopsData {
            cfg,
            dom,
            loops,
            by_header,
        }
    }

    /// All loops, outer loops before the loops they contain.
    pub fn loops(&self) -> impl Iterator<Item = &LoopEx> {
        self.loops.iter()
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    pub fn loop_for(&self, header: NodeId) -> Option<&LoopEx> {
        self.by_header.get(&header).map(|&i| &self.loops[i])
    }

    /// Innermost loop containing the fixed node `node`.
    pub fn innermost_loop_of(&self, node: NodeId) -> Option<&LoopEx> {
        let block = self.cfg.block_of(node)?;
        self.loops.iter().rev().find(|l| l.contains_block(block))
    }

    pub fn counted_loops(&self) -> impl Iterator<Item = (&LoopEx, &CountedLoopInfo)> {
        self.loops
            .iter()
            .filter(|l| l.is_counted())
            .filter_map(|l| l.counted().map(|c| (l, c)))
    }

    pub fn cfg(&self) -> &Cfg {
        &self.cfg
    }

    pub fn dominators(&self) -> &DominatorTree {
        &self.dom
    }

    pub fn summary(&self, graph: &Graph) -> LoopsSummary {
        LoopsSummary {
            loops: self.loops.len(),
            counted: self.counted_loops().count(),
            max_depth: self.loops.iter().map(LoopEx::depth).max().unwrap_or(0),
            constant_trip_counts: self
                .counted_loops()
                .filter_map(|(l, c)| c.constant_max_trip_count(graph).map(|n| (l.header, n)))
                .collect(),
        }
    }

    /// Insert loop-limit guards for counted loops whose update could wrap,
    /// then recompute. Returns the number of guards inserted.
    pub fn guard_overflow(&mut self, graph: &mut Graph, log: &SpeculationLog) -> usize {
        let mut inserted = 0;
        for lp in &self.loops {
            let Some(counted) = &lp.counted else { continue };
            let OverflowCheck::Required(check) = counted.overflow else {
                continue;
            };
            let reason = SpeculationReason::new(LOOP_LIMIT_SPECULATION, lp.header.as_usize() as u64);
            let Some(speculation) = log.speculate(reason) else {
                tracing::debug!(header = %lp.header, "loop-limit speculation failed before; loop not counted");
                continue;
            };
            let bound = graph.int_const(counted.bits, check.bound);
            let cond = graph.unique_value(Operator::IntCmp(check.op), &check.operands(counted.limit, bound));
            let info = GuardInfo::new(DeoptReason::LoopLimitCheck, DeoptAction::Retry, true).with_speculation(Some(speculation));
            let guard = graph.insert_fixed_after(lp.entry, Operator::Control(ControlOp::FixedGuard(info)), &[cond], Stamp::Void);
            tracing::trace!(header = %lp.header, %guard, bound = check.bound, "loop-limit guard");
            inserted += 1;
        }
        if inserted > 0 {
            *self = LoopsData::compute(graph);
        }
        inserted
    }
}

/// Memory written by the fixed nodes of `blocks`.
fn writes_of(graph: &Graph, cfg: &Cfg, blocks: &[BlockId]) -> LoopWrites {
    let mut locations = FxHashSet::default();
    for &b in blocks {
        for &n in &cfg.block(b).fixed {
            match graph.op(n) {
                Operator::Invoke(_) => return LoopWrites::All,
                Operator::Memory(op, location) if !op.is_load() => {
                    locations.insert(*location);
                }
                _ => {}
            }
        }
    }
    LoopWrites::Locations(locations)
}

/// `node` does not depend on anything computed inside the loop.
fn is_invariant(graph: &Graph, cfg: &Cfg, contains: &dyn Fn(BlockId) -> bool, node: NodeId) -> bool {
    let mut seen = FxHashSet::default();
    let mut work = vec![node];
    while let Some(n) = work.pop() {
        if !seen.insert(n) {
            continue;
        }
        let op = graph.op(n);
        if op.is_fixed() {
            match cfg.block_of(n) {
                Some(b) if !contains(b) => continue,
                _ => return false,
            }
        }
        if matches!(op, Operator::Phi) {
            match cfg.block_of(graph.inputs(n)[0]) {
                Some(b) if !contains(b) => {}
                _ => return false,
            }
        }
        work.extend(graph.inputs(n).iter().copied());
    }
    true
}

// =============================================================================
// Phase
// =============================================================================

/// Counted-loop detection and loop-limit guard insertion.
#[derive(Debug, Default)]
pub struct CountedLoops {
    guards_inserted: usize,
}

impl CountedLoops {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guards_inserted(&self) -> usize {
        self.guards_inserted
    }
}

impl Phase for CountedLoops {
    fn name(&self) -> &'static str {
        "counted-loops"
    }

    fn run(&mut self, graph: &mut Graph, ctx: &PhaseContext<'_>) -> CompileResult<bool> {
        let mut data = LoopsData::compute(graph);
        if data.is_empty() {
            return Ok(false);
        }
        let inserted = data.guard_overflow(graph, ctx.speculation_log);
        self.guards_inserted += inserted;
        tracing::debug!(
            phase = self.name(),
            loops = data.len(),
            counted = data.counted_loops().count(),
            inserted,
            "loop analysis"
        );
        Ok(inserted > 0)
    }
}

#[cfg(test)]
mod tests;
