//! Canonicalization.
//!
//! A worklist-driven rewrite engine that applies local rules until nothing
//! changes:
//! - **Constant folding** with exact integer wraparound and raw float bits
//! - **Algebraic identities** and shift/mask reduction (`arith.rs`)
//! - **Logic**: comparisons decided by stamps, negation normalization
//!   (`logic.rs`)
//! - **Control**: constant branches, trivial merges and phis, guards
//!   (`control.rs`)
//! - **Memory**: read elimination and call folding (`memory.rs`)
//!
//! After the rules, every floating node's stamp is narrowed to the meet of
//! its stamp and the stamp inferred from its inputs, and the node is value
//! numbered against the uniquing table.
//!
//! # Fixed Point
//!
//! A pass seeds the worklist with every node. Rewrites enqueue the nodes
//! they touch. Passes repeat until one makes no change, bounded by
//! [`CanonicalizerConfig::max_passes`].

mod arith;
mod control;
mod logic;
mod memory;

use std::collections::VecDeque;

use crate::error::CompileResult;
use crate::ir::arena::BitSet;
use crate::ir::graph::Graph;
use crate::ir::infer::infer_node;
use crate::ir::node::{NodeFlags, NodeId};
use crate::ir::operators::Operator;
use crate::opt::{Phase, PhaseContext};
use crate::providers::{DefaultProviders, Providers};

pub(crate) use control::terminate_at;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct CanonicalizerConfig {
    /// Upper bound on full passes over the graph.
    pub max_passes: usize,
    /// Replace loads by values already read or written in the same block.
    pub fold_reads: bool,
}

impl Default for CanonicalizerConfig {
    fn default() -> Self {
        Self {
            max_passes: 8,
            fold_reads: true,
        }
    }
}

/// Statistics from the last run.
#[derive(Debug, Clone, Default)]
pub struct CanonicalizerStats {
    pub passes: usize,
    pub rewrites: usize,
    pub stamps_improved: usize,
    pub nodes_removed: usize,
    pub reached_fixed_point: bool,
}

// =============================================================================
// Rule Interface
// =============================================================================

/// Outcome of canonicalizing one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Canonical {
    /// Already canonical.
    Keep,
    /// Every usage should use this node instead.
    Replace(NodeId),
    /// The node or its surroundings were rewritten in place.
    Changed,
}

/// What rules see: the graph, the providers, and a list of nodes to revisit.
pub(crate) struct Tool<'a> {
    pub graph: &'a mut Graph,
    pub providers: &'a dyn Providers,
    pub fold_reads: bool,
    revisit: Vec<NodeId>,
}

impl Tool<'_> {
    /// Ask the engine to look at `node` and its usages again.
    pub fn revisit(&mut self, node: NodeId) {
        self.revisit.push(node);
    }

    pub fn revisit_all(&mut self, nodes: impl IntoIterator<Item = NodeId>) {
        self.revisit.extend(nodes);
    }
}

fn apply_rules(tool: &mut Tool<'_>, node: NodeId) -> Canonical {
    match tool.graph.op(node) {
        Operator::IntOp(_) | Operator::FloatOp(_) | Operator::Bitwise(_) | Operator::Reinterpret(_) => {
            arith::canonicalize(tool, node)
        }
        Operator::IntCmp(_)
        | Operator::FloatCmp(_)
        | Operator::IsNull
        | Operator::InstanceOf(_)
        | Operator::LogicNot
        | Operator::Conditional => logic::canonicalize(tool, node),
        Operator::Control(_) | Operator::Phi | Operator::Guard(_) | Operator::Pi => control::canonicalize(tool, node),
        Operator::Memory(..) | Operator::Invoke(_) => memory::canonicalize(tool, node),
        Operator::Const(_) | Operator::LogicConst(_) | Operator::Parameter(_) | Operator::ArrayLength => {
            Canonical::Keep
        }
    }
}

// =============================================================================
// Canonicalizer
// =============================================================================

#[derive(Debug, Default)]
pub struct Canonicalizer {
    config: CanonicalizerConfig,
    stats: CanonicalizerStats,
}

struct Worklist {
    queue: VecDeque<NodeId>,
    queued: BitSet,
}

impl Worklist {
    fn new(capacity: usize) -> Self {
        Worklist {
            queue: VecDeque::with_capacity(capacity),
            queued: BitSet::with_capacity(capacity),
        }
    }

    fn push(&mut self, node: NodeId) {
        if self.queued.insert(node.as_usize()) {
            self.queue.push_back(node);
        }
    }

    fn pop(&mut self) -> Option<NodeId> {
        let node = self.queue.pop_front()?;
        self.queued.remove(node.as_usize());
        Some(node)
    }
}

impl Canonicalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: CanonicalizerConfig) -> Self {
        Self {
            config,
            stats: CanonicalizerStats::default(),
        }
    }

    pub fn stats(&self) -> &CanonicalizerStats {
        &self.stats
    }

    /// Canonicalize the whole graph to a fixed point.
    pub fn canonicalize(&mut self, graph: &mut Graph, providers: &dyn Providers) -> bool {
        self.stats = CanonicalizerStats::default();
        let before = graph.len();
        let mut changed = false;

        for _ in 0..self.config.max_passes.max(1) {
            self.stats.passes += 1;
            let mut worklist = Worklist::new(graph.id_bound());
            for id in graph.ids() {
                worklist.push(id);
            }
            if !self.drain(graph, providers, &mut worklist) {
                self.stats.reached_fixed_point = true;
                break;
            }
            changed = true;
        }

        if !self.stats.reached_fixed_point {
            tracing::warn!(
                passes = self.stats.passes,
                nodes = graph.len(),
                "canonicalizer stopped before reaching a fixed point"
            );
        }
        self.stats.nodes_removed = before.saturating_sub(graph.len());
        tracing::debug!(
            passes = self.stats.passes,
            rewrites = self.stats.rewrites,
            stamps = self.stats.stamps_improved,
            before,
            after = graph.len(),
            "canonicalize"
        );
        changed
    }

    /// Canonicalize `nodes` and whatever their rewrites touch.
    pub fn canonicalize_nodes(&mut self, graph: &mut Graph, providers: &dyn Providers, nodes: &[NodeId]) -> bool {
        self.stats = CanonicalizerStats {
            passes: 1,
            ..CanonicalizerStats::default()
        };
        let mut worklist = Worklist::new(graph.id_bound());
        for &node in nodes {
            if graph.is_alive(node) {
                worklist.push(node);
                for &user in graph.usages(node) {
                    worklist.push(user);
                }
            }
        }
        let changed = self.drain(graph, providers, &mut worklist);
        self.stats.reached_fixed_point = true;
        tracing::debug!(seeds = nodes.len(), rewrites = self.stats.rewrites, "incremental canonicalize");
        changed
    }

    fn drain(&mut self, graph: &mut Graph, providers: &dyn Providers, worklist: &mut Worklist) -> bool {
        let mut changed = false;
        let mut tool = Tool {
            graph,
            providers,
            fold_reads: self.config.fold_reads,
            revisit: Vec::new(),
        };
        while let Some(node) = worklist.pop() {
            if self.process(&mut tool, worklist, node) {
                changed = true;
            }
            for n in std::mem::take(&mut tool.revisit) {
                if tool.graph.is_alive(n) {
                    worklist.push(n);
                    for &user in tool.graph.usages(n) {
                        worklist.push(user);
                    }
                }
            }
        }
        changed
    }

    fn process(&mut self, tool: &mut Tool<'_>, worklist: &mut Worklist, node: NodeId) -> bool {
        let Some(n) = tool.graph.get(node) else {
            return false;
        };

        if !n.is_fixed() && !n.has_usages() && !n.flags.contains(NodeFlags::PINNED) {
            let inputs: Vec<NodeId> = n.inputs().to_vec();
            tool.graph.kill_unused_floating(node);
            for input in inputs {
                if tool.graph.is_alive(input) {
                    worklist.push(input);
                }
            }
            return true;
        }

        let mut changed = match apply_rules(tool, node) {
            Canonical::Keep => false,
            Canonical::Replace(replacement) if replacement == node => false,
            Canonical::Replace(replacement) => {
                tracing::trace!(%node, %replacement, op = ?tool.graph.op(node), "replace");
                self.stats.rewrites += 1;
                for &user in tool.graph.usages(node) {
                    worklist.push(user);
                }
                worklist.push(replacement);
                tool.graph.replace_at_usages(node, replacement);
                let inputs: Vec<NodeId> = tool.graph.inputs(node).to_vec();
                tool.graph.kill_unused_floating(node);
                for input in inputs {
                    if tool.graph.is_alive(input) {
                        worklist.push(input);
                    }
                }
                return true;
            }
            Canonical::Changed => {
                tracing::trace!(%node, "rewrite");
                self.stats.rewrites += 1;
                if tool.graph.is_alive(node) {
                    tool.revisit(node);
                    let inputs: Vec<NodeId> = tool.graph.inputs(node).to_vec();
                    for input in inputs {
                        worklist.push(input);
                    }
                }
                true
            }
        };

        if !tool.graph.is_alive(node) || tool.graph[node].is_fixed() {
            return changed;
        }
        changed |= self.improve_stamp(tool, worklist, node);
        changed |= self.value_number(tool, worklist, node);
        changed
    }

    /// Narrow the stamp to what the inputs prove; fold to a constant when
    /// the stamp pins the value.
    fn improve_stamp(&mut self, tool: &mut Tool<'_>, worklist: &mut Worklist, node: NodeId) -> bool {
        let graph = &mut *tool.graph;
        let Some(inferred) = infer_node(graph, node) else {
            return false;
        };
        let old = graph.stamp(node).clone();
        let improved = old.meet(&inferred);
        if improved == old || !improved.is_compatible(&old) {
            return false;
        }
        tracing::trace!(%node, ?old, ?improved, "stamp");
        self.stats.stamps_improved += 1;
        graph.set_stamp(node, improved.clone());
        for &user in graph.usages(node) {
            worklist.push(user);
        }

        let op = graph.op(node);
        if op.is_constant() || op.is_logic() || matches!(op, Operator::Guard(_)) {
            return true;
        }
        if let Some(constant) = improved.as_constant() {
            let folded = graph.constant(constant);
            if folded != node {
                worklist.push(folded);
                graph.replace_at_usages(node, folded);
                graph.kill_unused_floating(node);
            }
        }
        true
    }

    fn value_number(&mut self, tool: &mut Tool<'_>, worklist: &mut Worklist, node: NodeId) -> bool {
        let graph = &mut *tool.graph;
        let Some(existing) = graph.value_number(node) else {
            return false;
        };
        tracing::trace!(%node, %existing, "value numbered");
        let merged = graph.stamp(existing).meet(graph.stamp(node));
        if merged.is_compatible(graph.stamp(existing)) {
            graph.set_stamp(existing, merged);
        }
        for &user in graph.usages(node) {
            worklist.push(user);
        }
        worklist.push(existing);
        graph.replace_at_usages(node, existing);
        if graph.is_alive(node) && !graph[node].has_usages() {
            let inputs: Vec<NodeId> = graph.inputs(node).to_vec();
            graph.delete(node);
            for input in inputs {
                graph.kill_unused_floating(input);
            }
        }
        self.stats.rewrites += 1;
        true
    }
}

impl Phase for Canonicalizer {
    fn name(&self) -> &'static str {
        "canonicalize"
    }

    fn run(&mut self, graph: &mut Graph, ctx: &PhaseContext<'_>) -> CompileResult<bool> {
        Ok(self.canonicalize(graph, ctx.providers))
    }
}

/// Canonicalize with default configuration and no runtime knowledge.
pub fn canonicalize(graph: &mut Graph) -> bool {
    Canonicalizer::new().canonicalize(graph, &DefaultProviders)
}
