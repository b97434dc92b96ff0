//! The mutable IR graph.
//!
//! The graph provides:
//! - **Arena storage**: nodes addressed by stable [`NodeId`]s
//! - **Two-sided edges**: every input edge has a matching usage entry
//! - **Uniquing**: structurally equal floating nodes share one [`NodeId`]
//! - **Dead code cleanup**: removal of unused floating nodes and of
//!   unreachable control flow
//!
//! # Control skeleton
//!
//! Fixed nodes form one chain per block: each fixed node names its control
//! predecessor as input 0. Blocks begin at `Start`, `IfTrue`, `IfFalse`,
//! `Region` and `Loop`, whose inputs are the last fixed nodes of the
//! predecessor blocks. `Loop` input 0 is the entry edge; the others are back
//! edges, the only place where the graph may contain a cycle.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::arena::{Arena, BitSet};
use super::infer::infer_stamp;
use super::node::{EdgeList, Node, NodeFlags, NodeId};
use super::operators::{Constant, ControlOp, Operator};
use super::stamp::Stamp;
use crate::error::VerificationError;

/// Key of the uniquing table.
#[derive(Clone, PartialEq, Eq, Hash)]
struct NodeKey {
    op: Operator,
    inputs: EdgeList,
}

// =============================================================================
// Graph Structure
// =============================================================================

#[derive(Clone)]
pub struct Graph {
    nodes: Arena<Node>,
    start: NodeId,
    /// Value-numbering index over floating nodes, separate from storage.
    uniquing: FxHashMap<NodeKey, NodeId>,
}

impl Graph {
    pub fn new() -> Self {
        let mut nodes = Arena::with_capacity(64);
        let start = nodes.alloc(Node::new(Operator::Control(ControlOp::Start), &[], Stamp::Void));
        Graph {
            nodes,
            start,
            uniquing: FxHashMap::default(),
        }
    }

    #[inline]
    pub fn start(&self) -> NodeId {
        self.start
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    #[inline]
    pub fn is_alive(&self, id: NodeId) -> bool {
        self.nodes.contains(id)
    }

    #[inline]
    pub fn op(&self, id: NodeId) -> &Operator {
        &self.nodes[id].op
    }

    #[inline]
    pub fn stamp(&self, id: NodeId) -> &Stamp {
        &self.nodes[id].stamp
    }

    #[inline]
    pub fn inputs(&self, id: NodeId) -> &[NodeId] {
        self.nodes[id].inputs()
    }

    #[inline]
    pub fn usages(&self, id: NodeId) -> &[NodeId] {
        self.nodes[id].usages()
    }

    /// Number of live nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Upper bound of node indices, for sizing side tables.
    #[inline]
    pub fn id_bound(&self) -> usize {
        self.nodes.id_bound()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter()
    }

    /// Snapshot of live ids, safe to hold across mutation.
    pub fn ids(&self) -> Vec<NodeId> {
        self.nodes.ids().collect()
    }

    /// Distinct usages of `id`.
    pub fn distinct_usages(&self, id: NodeId) -> SmallVec<[NodeId; 4]> {
        let mut users: SmallVec<[NodeId; 4]> = SmallVec::from_slice(self.usages(id));
        users.sort_unstable();
        users.dedup();
        users
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Add a node without consulting the uniquing table.
    pub fn add(&mut self, op: Operator, inputs: &[NodeId], stamp: Stamp) -> NodeId {
        let pinned = matches!(op, Operator::Parameter(_) | Operator::Guard(_));
        let id = self.nodes.alloc(Node::new(op, inputs, stamp));
        for &input in inputs {
            self.nodes[input].usages.push(id);
        }
        if pinned {
            self.nodes[id].flags |= NodeFlags::PINNED;
        }
        id
    }

    /// Add a floating node, or return the existing node it is equal to.
    pub fn unique(&mut self, op: Operator, inputs: &[NodeId], stamp: Stamp) -> NodeId {
        if !op.is_value_numberable() {
            return self.add(op, inputs, stamp);
        }
        let key = NodeKey {
            op,
            inputs: SmallVec::from_slice(inputs),
        };
        if let Some(&existing) = self.uniquing.get(&key) {
            if self.is_alive(existing) {
                return existing;
            }
        }
        let id = self.add(key.op.clone(), inputs, stamp);
        self.uniquing.insert(key, id);
        id
    }

    /// Like [`Graph::unique`], with the stamp inferred from the inputs.
    pub fn unique_value(&mut self, op: Operator, inputs: &[NodeId]) -> NodeId {
        let stamp = infer_stamp(self, &op, inputs).unwrap_or(Stamp::Void);
        self.unique(op, inputs, stamp)
    }

    pub fn constant(&mut self, constant: Constant) -> NodeId {
        self.unique(Operator::Const(constant), &[], Stamp::for_constant(&constant))
    }

    pub fn int_const(&mut self, bits: u32, value: i64) -> NodeId {
        self.constant(Constant::int_of(bits, value))
    }

    pub fn logic_const(&mut self, value: bool) -> NodeId {
        self.unique(Operator::LogicConst(value), &[], Stamp::Void)
    }

    pub fn null_const(&mut self) -> NodeId {
        self.constant(Constant::Null)
    }

    // =========================================================================
    // Value numbering
    // =========================================================================

    fn key_of(&self, id: NodeId) -> NodeKey {
        let node = &self.nodes[id];
        NodeKey {
            op: node.op.clone(),
            inputs: node.inputs.clone(),
        }
    }

    fn invalidate_key(&mut self, id: NodeId) {
        if !self.nodes[id].op.is_value_numberable() {
            return;
        }
        let key = self.key_of(id);
        if self.uniquing.get(&key) == Some(&id) {
            self.uniquing.remove(&key);
        }
        self.nodes[id].flags |= NodeFlags::DIRTY;
    }

    /// Register `id` in the uniquing table, or return the equal node that
    /// is already registered.
    pub fn value_number(&mut self, id: NodeId) -> Option<NodeId> {
        if !self.nodes[id].op.is_value_numberable() {
            return None;
        }
        let key = self.key_of(id);
        match self.uniquing.get(&key) {
            Some(&other) if other != id && self.is_alive(other) => Some(other),
            _ => {
                self.uniquing.insert(key, id);
                self.nodes[id].flags.remove(NodeFlags::DIRTY);
                None
            }
        }
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    pub fn set_stamp(&mut self, id: NodeId, stamp: Stamp) {
        self.nodes[id].stamp = stamp;
    }

    pub fn set_op(&mut self, id: NodeId, op: Operator) {
        self.invalidate_key(id);
        self.nodes[id].op = op;
    }

    fn remove_one_usage(&mut self, of: NodeId, user: NodeId) {
        let usages = &mut self.nodes[of].usages;
        if let Some(pos) = usages.iter().position(|&u| u == user) {
            usages.swap_remove(pos);
        }
    }

    pub fn replace_input(&mut self, node: NodeId, index: usize, new_input: NodeId) {
        let old = self.nodes[node].inputs[index];
        if old == new_input {
            return;
        }
        self.invalidate_key(node);
        self.nodes[node].inputs[index] = new_input;
        self.remove_one_usage(old, node);
        self.nodes[new_input].usages.push(node);
    }

    pub fn add_input(&mut self, node: NodeId, input: NodeId) {
        self.invalidate_key(node);
        self.nodes[node].inputs.push(input);
        self.nodes[input].usages.push(node);
    }

    pub fn remove_input(&mut self, node: NodeId, index: usize) {
        self.invalidate_key(node);
        let old = self.nodes[node].inputs.remove(index);
        self.remove_one_usage(old, node);
    }

    /// Swap two inputs of `node`; usage lists are unaffected.
    pub fn swap_inputs(&mut self, node: NodeId, a: usize, b: usize) {
        self.invalidate_key(node);
        self.nodes[node].inputs.swap(a, b);
    }

    /// Redirect every input edge pointing at `old` to `new`.
    pub fn replace_at_usages(&mut self, old: NodeId, new: NodeId) {
        self.replace_at_usages_where(old, new, |_, _, _| true);
    }

    /// Redirect the input edges `(user, slot)` pointing at `old` for which
    /// `pred(graph, user, slot)` holds.
    pub fn replace_at_usages_where<F>(&mut self, old: NodeId, new: NodeId, pred: F)
    where
        F: Fn(&Graph, NodeId, usize) -> bool,
    {
        if old == new {
            return;
        }
        for user in self.distinct_usages(old) {
            let slots: SmallVec<[usize; 4]> = self.nodes[user]
                .inputs
                .iter()
                .enumerate()
                .filter(|&(_, &i)| i == old)
                .map(|(slot, _)| slot)
                .collect();
            for slot in slots {
                if pred(self, user, slot) {
                    self.replace_input(user, slot, new);
                }
            }
        }
    }

    /// Remove a node that has no usages left.
    pub fn delete(&mut self, id: NodeId) {
        debug_assert!(!self.nodes[id].has_usages(), "deleting {id} which still has usages");
        self.invalidate_key(id);
        if let Some(node) = self.nodes.remove(id) {
            for input in node.inputs {
                if self.is_alive(input) {
                    self.remove_one_usage(input, id);
                }
            }
        }
    }

    /// Delete `id` if it is an unused floating node, then its inputs that
    /// became unused in turn. Returns the number of deleted nodes.
    pub fn kill_unused_floating(&mut self, id: NodeId) -> usize {
        let mut killed = 0;
        let mut work = vec![id];
        while let Some(n) = work.pop() {
            let Some(node) = self.get(n) else { continue };
            if node.is_fixed() || node.has_usages() || node.flags.contains(NodeFlags::PINNED) {
                continue;
            }
            let inputs = node.inputs.clone();
            self.delete(n);
            killed += 1;
            work.extend(inputs.into_iter().filter(|&i| i != n));
        }
        killed
    }

    // =========================================================================
    // Control chain
    // =========================================================================

    /// Input slot `slot` of `user` carries control or anchoring rather than a value.
    pub fn is_control_slot(&self, user: NodeId, slot: usize) -> bool {
        let op = &self.nodes[user].op;
        op.is_merge()
            || (slot == 0 && (op.has_control_input() || matches!(op, Operator::Phi | Operator::Guard(_))))
            || (slot == 1 && matches!(op, Operator::Pi))
    }

    /// Control predecessor of a fixed node; `None` for `Start` and merges.
    pub fn control_pred(&self, id: NodeId) -> Option<NodeId> {
        let node = &self.nodes[id];
        node.op.has_control_input().then(|| node.inputs[0])
    }

    /// Fixed nodes reached directly from `id`. For `If` the true successor
    /// comes first.
    pub fn control_successors(&self, id: NodeId) -> SmallVec<[NodeId; 2]> {
        let mut succs: SmallVec<[NodeId; 2]> = SmallVec::new();
        if !self.nodes[id].is_fixed() {
            return succs;
        }
        for user in self.distinct_usages(id) {
            let op = &self.nodes[user].op;
            let takes_control = op.is_merge() || (op.has_control_input() && self.nodes[user].inputs[0] == id);
            if takes_control {
                succs.push(user);
            }
        }
        if self.nodes[id].op.is_if() {
            succs.sort_by_key(|&s| !matches!(self.nodes[s].op, Operator::Control(ControlOp::IfTrue)));
        }
        succs
    }

    /// The single control successor of a non-splitting fixed node.
    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        self.control_successors(id).first().copied()
    }

    pub fn if_successor(&self, if_node: NodeId, value: bool) -> Option<NodeId> {
        let want = if value { ControlOp::IfTrue } else { ControlOp::IfFalse };
        self.usages(if_node)
            .iter()
            .copied()
            .find(|&u| self.nodes[u].op == Operator::Control(want))
    }

    /// Phis attached to a merge, in id order.
    pub fn phis(&self, merge: NodeId) -> SmallVec<[NodeId; 4]> {
        self.distinct_usages(merge)
            .into_iter()
            .filter(|&u| matches!(self.nodes[u].op, Operator::Phi) && self.nodes[u].inputs[0] == merge)
            .collect()
    }

    /// Insert a new fixed node directly after `pred`, which must not split
    /// control. `inputs` excludes the control input.
    pub fn insert_fixed_after(&mut self, pred: NodeId, op: Operator, inputs: &[NodeId], stamp: Stamp) -> NodeId {
        debug_assert!(!self.nodes[pred].op.is_if() && !self.nodes[pred].op.is_terminator());
        let succs = self.control_successors(pred);
        let mut all: SmallVec<[NodeId; 4]> = SmallVec::new();
        all.push(pred);
        all.extend_from_slice(inputs);
        let node = self.add(op, &all, stamp);
        for succ in succs {
            let slots: SmallVec<[usize; 4]> = self.nodes[succ]
                .inputs
                .iter()
                .enumerate()
                .filter(|&(slot, &i)| i == pred && self.is_control_slot(succ, slot))
                .map(|(slot, _)| slot)
                .collect();
            for slot in slots {
                self.replace_input(succ, slot, node);
            }
        }
        node
    }

    /// Unlink a non-splitting fixed node from its chain and delete it.
    ///
    /// Control and anchor usages move to the control predecessor; value
    /// usages move to `value`, which must be given if the node has any.
    pub fn remove_fixed(&mut self, id: NodeId, value: Option<NodeId>) {
        let Some(pred) = self.control_pred(id) else {
            debug_assert!(false, "remove_fixed on {id} without control predecessor");
            return;
        };
        self.replace_at_usages_where(id, pred, |g, user, slot| g.is_control_slot(user, slot));
        if let Some(value) = value {
            self.replace_at_usages(id, value);
        }
        debug_assert!(!self.nodes[id].has_usages(), "value usages of {id} left behind");
        let inputs = self.nodes[id].inputs.clone();
        self.delete(id);
        for input in inputs {
            self.kill_unused_floating(input);
        }
    }

    /// Remove input `index` of a merge together with the matching phi values.
    pub fn remove_merge_input(&mut self, merge: NodeId, index: usize) {
        for phi in self.phis(merge) {
            self.remove_input(phi, index + 1);
        }
        self.remove_input(merge, index);
    }

    /// Delete the control flow starting at `root` and everything only it
    /// reaches. Merges that keep other live predecessors lose the dead input;
    /// those merges are returned.
    pub fn kill_cfg(&mut self, root: NodeId) -> Vec<NodeId> {
        let mut shrunk: Vec<NodeId> = Vec::new();
        let mut dead = BitSet::with_capacity(self.id_bound());
        let mut order: Vec<NodeId> = Vec::new();
        let mut work = vec![root];
        loop {
            let mut merges: Vec<NodeId> = Vec::new();
            while let Some(n) = work.pop() {
                if !self.is_alive(n) || !dead.insert(n.as_usize()) {
                    continue;
                }
                order.push(n);
                for user in self.distinct_usages(n) {
                    if dead.contains(user.as_usize()) {
                        continue;
                    }
                    let op = &self.nodes[user].op;
                    if op.is_merge() {
                        merges.push(user);
                    } else if matches!(op, Operator::Phi) && self.nodes[user].inputs[0] != n {
                        // Value flowing into a merge along the dead edge.
                    } else {
                        work.push(user);
                    }
                }
            }
            for merge in merges {
                if dead.contains(merge.as_usize()) || !self.is_alive(merge) {
                    continue;
                }
                let is_loop = self.nodes[merge].op.is_loop();
                let entry_dead = dead.contains(self.nodes[merge].inputs[0].as_usize());
                let live_inputs = self.nodes[merge]
                    .inputs
                    .iter()
                    .filter(|i| !dead.contains(i.as_usize()))
                    .count();
                if live_inputs == 0 || (is_loop && entry_dead) {
                    work.push(merge);
                    continue;
                }
                let mut index = self.nodes[merge].inputs.len();
                while index > 0 {
                    index -= 1;
                    if dead.contains(self.nodes[merge].inputs[index].as_usize()) {
                        self.remove_merge_input(merge, index);
                    }
                }
                if !shrunk.contains(&merge) {
                    shrunk.push(merge);
                }
            }
            if work.is_empty() {
                break;
            }
        }

        tracing::trace!(root = %root, nodes = order.len(), "kill cfg");
        let mut survivors: Vec<NodeId> = Vec::new();
        for &n in &order {
            self.invalidate_key(n);
            let inputs = self.nodes[n].inputs.clone();
            for input in inputs {
                if !dead.contains(input.as_usize()) && self.is_alive(input) {
                    self.remove_one_usage(input, n);
                    survivors.push(input);
                }
            }
        }
        for &n in &order {
            self.nodes.remove(n);
        }
        for input in survivors {
            self.kill_unused_floating(input);
        }
        shrunk.retain(|&m| self.is_alive(m));
        shrunk
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Check structural invariants of the whole graph.
    pub fn verify(&self) -> Result<(), VerificationError> {
        for (id, node) in self.iter() {
            let name = node.op.name();
            for (index, &input) in node.inputs.iter().enumerate() {
                if !self.is_alive(input) {
                    return Err(VerificationError::DanglingInput { node: id, input, index });
                }
                let edges = node.inputs.iter().filter(|&&i| i == input).count();
                let back = self.usages(input).iter().filter(|&&u| u == id).count();
                if edges != back {
                    return Err(VerificationError::UsageMismatch { node: input, user: id });
                }
            }
            for &user in node.usages() {
                if !self.is_alive(user) || !self.inputs(user).contains(&id) {
                    return Err(VerificationError::UsageMismatch { node: id, user });
                }
            }
            if !node.op.arity().accepts(node.inputs.len()) {
                return Err(malformed(id, name, format!("{} inputs", node.inputs.len())));
            }
            self.verify_node(id, node)?;
        }
        self.verify_acyclic()
    }

    fn verify_node(&self, id: NodeId, node: &Node) -> Result<(), VerificationError> {
        let name = node.op.name();
        for (slot, &input) in node.inputs.iter().enumerate() {
            if self.is_control_slot(id, slot) && !self.nodes[input].is_fixed() && !matches!(self.nodes[input].op, Operator::Guard(_)) {
                return Err(malformed(id, name, format!("control input {input} is not fixed")));
            }
        }
        match &node.op {
            Operator::Control(ControlOp::IfTrue | ControlOp::IfFalse) if !self.nodes[node.inputs[0]].op.is_if() => {
                return Err(malformed(id, name, "projection of a non-If node".into()));
            }
            Operator::Control(ControlOp::If) => {
                for want in [true, false] {
                    let want_op = Operator::Control(if want { ControlOp::IfTrue } else { ControlOp::IfFalse });
                    if node.usages().iter().filter(|&&u| self.nodes[u].op == want_op).count() > 1 {
                        return Err(malformed(id, name, "duplicate successor".into()));
                    }
                }
            }
            Operator::Phi => {
                let merge = &self.nodes[node.inputs[0]];
                if !merge.op.is_merge() {
                    return Err(malformed(id, name, "first input is not a merge".into()));
                }
                if merge.inputs.len() + 1 != node.inputs.len() {
                    return Err(malformed(id, name, "value count differs from merge inputs".into()));
                }
            }
            _ => {}
        }
        let condition_slot = match node.op {
            Operator::Control(ControlOp::If | ControlOp::FixedGuard(_)) | Operator::Guard(_) => Some(1),
            Operator::Conditional | Operator::LogicNot => Some(0),
            _ => None,
        };
        if let Some(slot) = condition_slot {
            if !self.nodes[node.inputs[slot]].op.is_logic() {
                return Err(malformed(id, name, "condition input is not a logic node".into()));
            }
        }
        if node.is_fixed() && !node.op.is_if() && !node.op.is_terminator() {
            let succs = self.control_successors(id);
            if succs.len() > 1 {
                return Err(VerificationError::BrokenControlChain {
                    node: id,
                    detail: format!("{} control successors", succs.len()),
                });
            }
        }
        if node.op.is_terminator() && !self.control_successors(id).is_empty() {
            return Err(VerificationError::BrokenControlChain {
                node: id,
                detail: "terminator has a successor".into(),
            });
        }
        Ok(())
    }

    /// Edges that may close a cycle: loop back edges and the phi values
    /// flowing along them.
    fn is_back_edge(&self, user: NodeId, slot: usize) -> bool {
        let node = &self.nodes[user];
        match node.op {
            Operator::Control(ControlOp::Loop) => slot >= 1,
            Operator::Phi => slot >= 2 && self.nodes[node.inputs[0]].op.is_loop(),
            _ => false,
        }
    }

    fn verify_acyclic(&self) -> Result<(), VerificationError> {
        // 0 = unvisited, 1 = on stack, 2 = done
        let mut state = vec![0u8; self.id_bound()];
        for (root, _) in self.iter() {
            if state[root.as_usize()] != 0 {
                continue;
            }
            let mut stack: Vec<(NodeId, usize)> = vec![(root, 0)];
            state[root.as_usize()] = 1;
            while let Some(top) = stack.last_mut() {
                let (n, s) = *top;
                let inputs = self.inputs(n);
                if s < inputs.len() {
                    top.1 += 1;
                    if self.is_back_edge(n, s) {
                        continue;
                    }
                    let input = inputs[s];
                    match state[input.as_usize()] {
                        0 => {
                            state[input.as_usize()] = 1;
                            stack.push((input, 0));
                        }
                        1 => return Err(VerificationError::IllegalCycle { node: input }),
                        _ => {}
                    }
                } else {
                    state[n.as_usize()] = 2;
                    stack.pop();
                }
            }
        }
        Ok(())
    }
}

fn malformed(node: NodeId, op: &'static str, detail: String) -> VerificationError {
    VerificationError::MalformedNode { node, op, detail }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Index<NodeId> for Graph {
    type Output = Node;

    #[inline]
    fn index(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Graph ({} nodes):", self.len())?;
        for (id, node) in self.iter() {
            writeln!(f, "  {id:?}: {node:?}")?;
        }
        Ok(())
    }
}
