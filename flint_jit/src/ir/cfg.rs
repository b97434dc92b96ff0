//! Control flow graph analysis for the sea-of-nodes IR.
//!
//! The fixed skeleton of a [`Graph`] is cut into basic blocks:
//! - **Blocks** begin at `Start`, `IfTrue`, `IfFalse`, `Region` and `Loop`
//!   and end at an `If`, a terminator, or the last fixed node before a merge
//! - **Dominator tree**: used by scheduling and conditional elimination
//! - **Loop forest**: natural loops, one per `Loop` header
//!
//! The CFG is a snapshot. It is rebuilt after any pass that changes control
//! flow.

use rustc_hash::FxHashMap;

use super::arena::{BitSet, Id, SecondaryMap};
use super::graph::Graph;
use super::node::{Node, NodeId};

// =============================================================================
// Basic Block
// =============================================================================

#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// The node that begins the block.
    pub begin: NodeId,
    /// The last fixed node of the block.
    pub end: NodeId,
    /// Fixed nodes from `begin` to `end` inclusive.
    pub fixed: Vec<NodeId>,
    pub predecessors: Vec<BlockId>,
    /// For a block ending in `If`: true successor first.
    pub successors: Vec<BlockId>,
}

pub type BlockId = Id<BasicBlock>;

// =============================================================================
// CFG
// =============================================================================

#[derive(Debug, Clone)]
pub struct Cfg {
    blocks: Vec<BasicBlock>,
    /// Block of each reachable fixed node.
    block_of: SecondaryMap<Node, Option<BlockId>>,
    pub entry: BlockId,
    /// Reverse postorder; the entry comes first.
    pub rpo: Vec<BlockId>,
    rpo_index: Vec<u32>,
    postorder: Vec<u32>,
}

impl Cfg {
    /// Build the CFG of the control flow reachable from `Start`.
    pub fn build(graph: &Graph) -> Self {
        let mut cfg = Cfg {
            blocks: Vec::new(),
            block_of: SecondaryMap::with_capacity(graph.id_bound()),
            entry: BlockId::new(0),
            rpo: Vec::new(),
            rpo_index: Vec::new(),
            postorder: Vec::new(),
        };

        let mut by_begin: FxHashMap<NodeId, BlockId> = FxHashMap::default();
        let mut pending = vec![graph.start()];
        by_begin.insert(graph.start(), cfg.add_block(graph, graph.start()));

        while let Some(begin) = pending.pop() {
            let block = by_begin[&begin];
            let end = cfg.blocks[block.as_usize()].end;
            for succ in graph.control_successors(end) {
                let next = *by_begin.entry(succ).or_insert_with(|| {
                    pending.push(succ);
                    cfg.add_block(graph, succ)
                });
                cfg.blocks[block.as_usize()].successors.push(next);
            }
        }

        // Merge predecessors follow merge input order.
        for b in 0..cfg.blocks.len() {
            let begin = cfg.blocks[b].begin;
            let preds: Vec<BlockId> = if graph.op(begin).is_merge() {
                graph
                    .inputs(begin)
                    .iter()
                    .filter_map(|&end| *cfg.block_of.get(end))
                    .collect()
            } else {
                graph
                    .control_pred(begin)
                    .and_then(|p| *cfg.block_of.get(p))
                    .into_iter()
                    .collect()
            };
            cfg.blocks[b].predecessors = preds;
        }

        cfg.compute_rpo();
        cfg
    }

    fn add_block(&mut self, graph: &Graph, begin: NodeId) -> BlockId {
        let id = BlockId::new(self.blocks.len() as u32);
        let mut fixed = vec![begin];
        let mut current = begin;
        loop {
            let op = graph.op(current);
            if op.is_if() || op.is_terminator() {
                break;
            }
            match graph.next(current) {
                Some(next) if !graph.op(next).is_block_begin() => {
                    fixed.push(next);
                    current = next;
                }
                _ => break,
            }
        }
        for &n in &fixed {
            self.block_of.set(n, Some(id));
        }
        self.blocks.push(BasicBlock {
            begin,
            end: current,
            fixed,
            predecessors: Vec::new(),
            successors: Vec::new(),
        });
        id
    }

    fn compute_rpo(&mut self) {
        let n = self.blocks.len();
        let mut visited = BitSet::with_capacity(n);
        let mut postorder = Vec::with_capacity(n);
        let mut stack: Vec<(BlockId, usize)> = vec![(self.entry, 0)];
        visited.insert(self.entry.as_usize());
        while let Some(top) = stack.last_mut() {
            let (block, next) = *top;
            let succs = &self.blocks[block.as_usize()].successors;
            if next < succs.len() {
                top.1 += 1;
                let succ = succs[next];
                if visited.insert(succ.as_usize()) {
                    stack.push((succ, 0));
                }
            } else {
                postorder.push(block);
                stack.pop();
            }
        }

        self.postorder = vec![0; n];
        for (i, &b) in postorder.iter().enumerate() {
            self.postorder[b.as_usize()] = i as u32;
        }
        postorder.reverse();
        self.rpo_index = vec![0; n];
        for (i, &b) in postorder.iter().enumerate() {
            self.rpo_index[b.as_usize()] = i as u32;
        }
        self.rpo = postorder;
    }

    #[inline]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.as_usize()]
    }

    /// Block containing a reachable fixed node.
    #[inline]
    pub fn block_of(&self, node: NodeId) -> Option<BlockId> {
        *self.block_of.get(node)
    }

    /// Position in reverse postorder.
    #[inline]
    pub fn rpo_index(&self, id: BlockId) -> u32 {
        self.rpo_index[id.as_usize()]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn iter_rpo(&self) -> impl Iterator<Item = (BlockId, &BasicBlock)> {
        self.rpo.iter().map(move |&id| (id, &self.blocks[id.as_usize()]))
    }

    pub fn iter(&self) -> impl Iterator<Item = (BlockId, &BasicBlock)> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (BlockId::new(i as u32), b))
    }

    /// Whether the block begins at a `Loop` node.
    pub fn is_loop_header(&self, graph: &Graph, id: BlockId) -> bool {
        graph.op(self.block(id).begin).is_loop()
    }
}

// =============================================================================
// Dominator Tree
// =============================================================================

#[derive(Debug, Clone)]
pub struct DominatorTree {
    /// `None` for the entry.
    idom: Vec<Option<BlockId>>,
    /// Children in reverse postorder.
    children: Vec<Vec<BlockId>>,
    depth: Vec<u32>,
}

impl DominatorTree {
    /// Cooper-Harvey-Kennedy iteration over reverse postorder.
    pub fn build(cfg: &Cfg) -> Self {
        let n = cfg.len();
        let mut idom: Vec<Option<BlockId>> = vec![None; n];
        if n == 0 {
            return DominatorTree {
                idom,
                children: Vec::new(),
                depth: Vec::new(),
            };
        }
        idom[cfg.entry.as_usize()] = Some(cfg.entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &block in &cfg.rpo {
                if block == cfg.entry {
                    continue;
                }
                let mut new_idom: Option<BlockId> = None;
                for &pred in &cfg.block(block).predecessors {
                    if idom[pred.as_usize()].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => intersect(&idom, cfg, pred, current),
                    });
                }
                if new_idom.is_some() && idom[block.as_usize()] != new_idom {
                    idom[block.as_usize()] = new_idom;
                    changed = true;
                }
            }
        }
        idom[cfg.entry.as_usize()] = None;

        let mut children: Vec<Vec<BlockId>> = vec![Vec::new(); n];
        for &block in &cfg.rpo {
            if let Some(parent) = idom[block.as_usize()] {
                children[parent.as_usize()].push(block);
            }
        }
        let mut depth = vec![0u32; n];
        for &block in &cfg.rpo {
            if let Some(parent) = idom[block.as_usize()] {
                depth[block.as_usize()] = depth[parent.as_usize()] + 1;
            }
        }

        DominatorTree { idom, children, depth }
    }

    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.idom[block.as_usize()]
    }

    pub fn children(&self, block: BlockId) -> &[BlockId] {
        &self.children[block.as_usize()]
    }

    pub fn depth(&self, block: BlockId) -> u32 {
        self.depth[block.as_usize()]
    }

    pub fn dominates(&self, a: BlockId, mut b: BlockId) -> bool {
        while self.depth(b) > self.depth(a) {
            match self.idom(b) {
                Some(parent) => b = parent,
                None => return false,
            }
        }
        a == b
    }

    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Deepest block dominating both.
    pub fn common_dominator(&self, mut a: BlockId, mut b: BlockId) -> BlockId {
        while a != b {
            if self.depth(a) >= self.depth(b) {
                match self.idom(a) {
                    Some(p) => a = p,
                    None => return a,
                }
            } else {
                match self.idom(b) {
                    Some(p) => b = p,
                    None => return b,
                }
            }
        }
        a
    }
}

fn intersect(idom: &[Option<BlockId>], cfg: &Cfg, mut b1: BlockId, mut b2: BlockId) -> BlockId {
    let po = |b: BlockId| cfg.postorder[b.as_usize()];
    while b1 != b2 {
        while po(b1) < po(b2) {
            match idom[b1.as_usize()] {
                Some(p) => b1 = p,
                None => return b2,
            }
        }
        while po(b2) < po(b1) {
            match idom[b2.as_usize()] {
                Some(p) => b2 = p,
                None => return b1,
            }
        }
    }
    b1
}

// =============================================================================
// Loop Forest
// =============================================================================

/// A natural loop.
#[derive(Debug, Clone)]
pub struct Loop {
    pub header: BlockId,
    /// Blocks ending in a back edge to the header.
    pub back_edges: Vec<BlockId>,
    /// Blocks of the loop, header included, in id order.
    pub body: Vec<BlockId>,
    /// Blocks outside the loop with a predecessor inside.
    pub exits: Vec<BlockId>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// 1 for outermost loops.
    pub depth: u32,
}

impl Loop {
    pub fn contains(&self, block: BlockId) -> bool {
        self.body.binary_search(&block).is_ok()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoopForest {
    pub loops: Vec<Loop>,
    header_to_loop: FxHashMap<BlockId, usize>,
    /// Innermost loop of each block.
    block_to_loop: FxHashMap<BlockId, usize>,
}

impl LoopForest {
    pub fn compute(cfg: &Cfg, dom: &DominatorTree) -> Self {
        let mut forest = LoopForest::default();

        for &block in &cfg.rpo {
            for &succ in &cfg.block(block).successors {
                if dom.dominates(succ, block) {
                    forest.add_back_edge(succ, block, cfg);
                }
            }
        }
        forest.compute_nesting(cfg);
        forest
    }

    fn add_back_edge(&mut self, header: BlockId, source: BlockId, cfg: &Cfg) {
        let index = match self.header_to_loop.get(&header) {
            Some(&index) => index,
            None => {
                self.loops.push(Loop {
                    header,
                    back_edges: Vec::new(),
                    body: vec![header],
                    exits: Vec::new(),
                    parent: None,
                    children: Vec::new(),
                    depth: 1,
                });
                self.header_to_loop.insert(header, self.loops.len() - 1);
                self.loops.len() - 1
            }
        };
        let lp = &mut self.loops[index];
        lp.back_edges.push(source);

        let mut body = BitSet::with_capacity(cfg.len());
        for &b in &lp.body {
            body.insert(b.as_usize());
        }
        let mut work = vec![source];
        while let Some(block) = work.pop() {
            if body.insert(block.as_usize()) {
                work.extend(cfg.block(block).predecessors.iter().copied());
            }
        }
        lp.body = body.iter().map(|b| BlockId::new(b as u32)).collect();
    }

    fn compute_nesting(&mut self, cfg: &Cfg) {
        let n = self.loops.len();
        for i in 0..n {
            let header = self.loops[i].header;
            let parent = (0..n)
                .filter(|&j| j != i && self.loops[j].contains(header))
                .min_by_key(|&j| self.loops[j].body.len());
            if let Some(parent) = parent {
                self.loops[i].parent = Some(parent);
                self.loops[parent].children.push(i);
            }
        }
        for i in 0..n {
            let mut depth = 1;
            let mut current = self.loops[i].parent;
            while let Some(p) = current {
                depth += 1;
                current = self.loops[p].parent;
            }
            self.loops[i].depth = depth;
        }
        for i in 0..n {
            let mut exits = Vec::new();
            for &b in &self.loops[i].body {
                for &succ in &cfg.block(b).successors {
                    if !self.loops[i].contains(succ) && !exits.contains(&succ) {
                        exits.push(succ);
                    }
                }
                let innermost = self.block_to_loop.get(&b).copied();
                let replace = innermost.map_or(true, |cur| self.loops[i].body.len() < self.loops[cur].body.len());
                if replace {
                    self.block_to_loop.insert(b, i);
                }
            }
            self.loops[i].exits = exits;
        }
    }

    pub fn loop_of_header(&self, header: BlockId) -> Option<&Loop> {
        self.header_to_loop.get(&header).map(|&i| &self.loops[i])
    }

    /// Innermost loop containing `block`.
    pub fn loop_for_block(&self, block: BlockId) -> Option<&Loop> {
        self.block_to_loop.get(&block).map(|&i| &self.loops[i])
    }

    pub fn loop_depth(&self, block: BlockId) -> u32 {
        self.loop_for_block(block).map_or(0, |l| l.depth)
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
