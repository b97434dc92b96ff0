//! Facts known to hold at a program point.
//!
//! A [`FactMap`] is a stack: every insertion is logged so that leaving a
//! dominator subtree restores the state it was entered with.

use rustc_hash::FxHashMap;

use crate::ir::condition::Condition;
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::{BitwiseOp, LocationId, Operator};
use crate::ir::stamp::{IntegerStamp, ObjectStamp, Stamp};
use crate::opt::Relation;

/// A memory cell: location plus receiver, `None` for statics.
pub(super) type MemoryKey = (LocationId, Option<NodeId>);

#[derive(Debug)]
enum Undo {
    Stamp(NodeId, Option<Stamp>),
    Condition(NodeId, Option<bool>),
    Relation,
    Memory(MemoryKey, Option<NodeId>),
    MemoryCleared(FxHashMap<MemoryKey, NodeId>),
}

/// Position in the undo log.
#[derive(Debug, Clone, Copy)]
pub(super) struct Mark(usize);

/// What is known about conditions and values on the current path.
#[derive(Debug, Default)]
pub(super) struct FactMap {
    stamps: FxHashMap<NodeId, Stamp>,
    conditions: FxHashMap<NodeId, bool>,
    relations: Vec<Relation>,
    memory: FxHashMap<MemoryKey, NodeId>,
    undo: Vec<Undo>,
}

/// Facts at the end of one merge predecessor.
#[derive(Debug, Clone)]
pub(super) struct Snapshot {
    pub conditions: FxHashMap<NodeId, bool>,
    pub stamps: FxHashMap<NodeId, Stamp>,
    pub memory: FxHashMap<MemoryKey, NodeId>,
}

impl Snapshot {
    pub fn stamp_of(&self, graph: &Graph, node: NodeId) -> Stamp {
        self.stamps.get(&node).cloned().unwrap_or_else(|| graph.stamp(node).clone())
    }
}

impl FactMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self) -> Mark {
        Mark(self.undo.len())
    }

    pub fn rollback(&mut self, mark: Mark) {
        while self.undo.len() > mark.0 {
            match self.undo.pop() {
                Some(Undo::Stamp(n, old)) => restore(&mut self.stamps, n, old),
                Some(Undo::Condition(n, old)) => restore(&mut self.conditions, n, old),
                Some(Undo::Relation) => {
                    self.relations.pop();
                }
                Some(Undo::Memory(key, old)) => restore(&mut self.memory, key, old),
                Some(Undo::MemoryCleared(map)) => self.memory = map,
                None => break,
            }
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            conditions: self.conditions.clone(),
            stamps: self.stamps.clone(),
            memory: self.memory.clone(),
        }
    }

    // -------------------------------------------------------------------------
    // Stamps
    // -------------------------------------------------------------------------

    /// Refined stamp, if a fact narrowed it.
    pub fn refined(&self, node: NodeId) -> Option<&Stamp> {
        self.stamps.get(&node)
    }

    pub fn stamp_of(&self, graph: &Graph, node: NodeId) -> Stamp {
        self.stamps.get(&node).cloned().unwrap_or_else(|| graph.stamp(node).clone())
    }

    /// Narrow `node` to `stamp`. Returns false when the result is empty.
    pub fn improve(&mut self, graph: &Graph, node: NodeId, stamp: &Stamp) -> bool {
        let current = self.stamp_of(graph, node);
        let improved = current.meet(stamp);
        if improved.is_empty() {
            return false;
        }
        if improved != current {
            let old = self.stamps.insert(node, improved);
            self.undo.push(Undo::Stamp(node, old));
        }
        true
    }

    // -------------------------------------------------------------------------
    // Conditions
    // -------------------------------------------------------------------------

    pub fn knows_condition(&self, cond: NodeId) -> Option<bool> {
        self.conditions.get(&cond).copied()
    }

    fn set_condition(&mut self, cond: NodeId, value: bool) {
        let old = self.conditions.insert(cond, value);
        if old != Some(value) {
            self.undo.push(Undo::Condition(cond, old));
        }
    }

    /// Value of `cond` on the current path, if the facts decide it.
    pub fn evaluate(&self, graph: &Graph, cond: NodeId) -> Option<bool> {
        if let Some(value) = self.knows_condition(cond) {
            return Some(value);
        }
        let inputs = graph.inputs(cond);
        match graph.op(cond) {
            Operator::LogicConst(b) => Some(*b),
            Operator::LogicNot => self.evaluate(graph, inputs[0]).map(|b| !b),
            Operator::IntCmp(op) => {
                let (x, y) = (inputs[0], inputs[1]);
                let condition = op.condition();
                if x == y {
                    return Some(condition.implies(Condition::Eq));
                }
                let (sx, sy) = (self.stamp_of(graph, x), self.stamp_of(graph, y));
                if let (Some(a), Some(b)) = (sx.as_integer(), sy.as_integer()) {
                    if let Some(result) = condition.fold_stamps(a, b) {
                        return Some(result);
                    }
                }
                self.evaluate_relation(x, y, condition)
            }
            Operator::IsNull => {
                let s = self.stamp_of(graph, inputs[0]);
                let s = s.as_object()?;
                if s.is_always_null() {
                    Some(true)
                } else if s.is_non_null() {
                    Some(false)
                } else {
                    None
                }
            }
            Operator::InstanceOf(ty) => {
                let s = self.stamp_of(graph, inputs[0]);
                let s = s.as_object()?;
                if s.is_always_null() || s.is_disjoint_from(ty) {
                    Some(false)
                } else if s.is_non_null() && s.is_subtype_of(ty) {
                    Some(true)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn evaluate_relation(&self, x: NodeId, y: NodeId, condition: Condition) -> Option<bool> {
        for r in self.relations.iter().rev() {
            let known = if (r.x, r.y) == (x, y) {
                r.condition
            } else if (r.x, r.y) == (y, x) {
                r.condition.mirror()
            } else {
                continue;
            };
            if known.implies(condition) {
                return Some(true);
            }
            if known.implies(condition.negate()) {
                return Some(false);
            }
        }
        None
    }

    /// Record that `cond` evaluates to `holds`. Returns false when that
    /// contradicts what is already known.
    pub fn register(&mut self, graph: &Graph, cond: NodeId, holds: bool) -> bool {
        if let Some(known) = self.evaluate(graph, cond) {
            return known == holds;
        }
        self.set_condition(cond, holds);
        let inputs = graph.inputs(cond);
        match graph.op(cond) {
            Operator::LogicNot => self.register(graph, inputs[0], !holds),
            Operator::IntCmp(_) => {
                let Some(relation) = Relation::of(graph, cond, holds) else {
                    return true;
                };
                self.relations.push(relation);
                self.undo.push(Undo::Relation);
                self.register_relation(graph, relation)
            }
            Operator::IsNull => {
                let stamp = if holds { Stamp::null() } else { Stamp::object_non_null() };
                self.improve(graph, inputs[0], &stamp)
            }
            Operator::InstanceOf(ty) if holds => {
                let stamp = Stamp::Object(ObjectStamp::new(Some(ty.clone()), false, true));
                self.improve(graph, inputs[0], &stamp)
            }
            _ => true,
        }
    }

    fn register_relation(&mut self, graph: &Graph, r: Relation) -> bool {
        let (sx, sy) = (self.stamp_of(graph, r.x), self.stamp_of(graph, r.y));
        let (Some(a), Some(b)) = (sx.as_integer(), sy.as_integer()) else {
            return true;
        };
        let (nx, ny) = (r.condition.refine_x(a, b), r.condition.refine_y(a, b));
        if !self.improve(graph, r.x, &nx) || !self.improve(graph, r.y, &ny) {
            return false;
        }
        if r.condition == Condition::Eq {
            return self.register_mask(graph, r.x, r.y) && self.register_mask(graph, r.y, r.x);
        }
        true
    }

    /// `(v & m) == c` fixes the bits of `v` selected by `m`.
    fn register_mask(&mut self, graph: &Graph, masked: NodeId, value: NodeId) -> bool {
        if *graph.op(masked) != Operator::Bitwise(BitwiseOp::And) {
            return true;
        }
        let (v, m) = (graph.inputs(masked)[0], graph.inputs(masked)[1]);
        let (Some(mask), Some(c)) = (graph[m].as_int(), graph[value].as_int()) else {
            return true;
        };
        let Some(s) = graph.stamp(v).as_integer() else {
            return true;
        };
        let bits = s.bits();
        let mask = mask as u64;
        let c = c as u64;
        if c & !mask != 0 {
            return false;
        }
        let unrestricted = IntegerStamp::unrestricted(bits);
        let known = IntegerStamp::create(
            bits,
            unrestricted.lower(),
            unrestricted.upper(),
            c,
            unrestricted.may_be_set() & !(mask & !c),
        );
        match known {
            Some(known) => self.improve(graph, v, &Stamp::Integer(known)),
            None => false,
        }
    }

    /// Intersection of what every predecessor knew. Memory is replaced by
    /// the cells all predecessors agree on.
    pub fn merge(&mut self, graph: &Graph, preds: &[&Snapshot]) -> bool {
        self.kill_memory();
        let Some((first, rest)) = preds.split_first() else {
            return true;
        };
        for (&key, &value) in &first.memory {
            if rest.iter().all(|s| s.memory.get(&key) == Some(&value)) {
                self.set_memory(key, value);
            }
        }
        for (&cond, &value) in &first.conditions {
            if rest.iter().all(|s| s.conditions.get(&cond) == Some(&value)) && self.knows_condition(cond).is_none() {
                self.set_condition(cond, value);
            }
        }
        for (&node, stamp) in &first.stamps {
            if !graph.is_alive(node) || rest.iter().any(|s| !s.stamps.contains_key(&node)) {
                continue;
            }
            let joined = rest.iter().fold(stamp.clone(), |acc, s| acc.join(&s.stamps[&node]));
            if !self.improve(graph, node, &joined) {
                return false;
            }
        }
        true
    }

    // -------------------------------------------------------------------------
    // Memory
    // -------------------------------------------------------------------------

    pub fn memory_value(&self, key: MemoryKey) -> Option<NodeId> {
        self.memory.get(&key).copied()
    }

    pub fn set_memory(&mut self, key: MemoryKey, value: NodeId) {
        let old = self.memory.insert(key, value);
        self.undo.push(Undo::Memory(key, old));
    }

    /// Forget every cell of `location`.
    pub fn kill_location(&mut self, location: LocationId) {
        let keys: Vec<MemoryKey> = self.memory.keys().filter(|k| k.0 == location).copied().collect();
        for key in keys {
            let old = self.memory.remove(&key);
            self.undo.push(Undo::Memory(key, old));
        }
    }

    pub fn kill_memory(&mut self) {
        if !self.memory.is_empty() {
            let old = std::mem::take(&mut self.memory);
            self.undo.push(Undo::MemoryCleared(old));
        }
    }
}

fn restore<K: std::hash::Hash + Eq, V>(map: &mut FxHashMap<K, V>, key: K, old: Option<V>) {
    match old {
        Some(v) => {
            map.insert(key, v);
        }
        None => {
            map.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::{ArithmeticBuilder, GraphBuilder};

    #[test]
    fn test_register_and_rollback() {
        let mut b = GraphBuilder::with_int_parameters(2);
        let x = b.parameter(0).unwrap();
        let y = b.parameter(1).unwrap();
        let lt = b.int_lt(x, y);
        let ge = b.int_ge(x, y);
        let g = b.finish();

        let mut facts = FactMap::new();
        let mark = facts.mark();
        assert!(facts.register(&g, lt, true));
        assert_eq!(facts.evaluate(&g, lt), Some(true));
        assert_eq!(facts.evaluate(&g, ge), Some(false));
        facts.rollback(mark);
        assert_eq!(facts.evaluate(&g, lt), None);
        assert_eq!(facts.evaluate(&g, ge), None);
    }

    #[test]
    fn test_equality_narrows_stamp() {
        let mut b = GraphBuilder::with_int_parameters(1);
        let x = b.parameter(0).unwrap();
        let zero = b.const_int(0);
        let five = b.const_int(5);
        let eq0 = b.int_eq(x, zero);
        let eq5 = b.int_eq(x, five);
        let g = b.finish();

        let mut facts = FactMap::new();
        assert!(facts.register(&g, eq0, true));
        assert_eq!(facts.refined(x).and_then(Stamp::as_int_constant), Some(0));
        assert_eq!(facts.evaluate(&g, eq5), Some(false));
        assert!(!facts.register(&g, eq5, true));
    }

    #[test]
    fn test_mask_sets_bits() {
        let mut b = GraphBuilder::with_int_parameters(1);
        let x = b.parameter(0).unwrap();
        let four = b.const_int(4);
        let masked = b.and(x, four);
        let eq = b.int_eq(masked, four);
        let zero = b.const_int(0);
        let is_zero = b.int_eq(x, zero);
        let g = b.finish();

        let mut facts = FactMap::new();
        assert!(facts.register(&g, eq, true));
        let s = facts.stamp_of(&g, x);
        assert_eq!(s.as_integer().map(|s| s.must_be_set() & 4), Some(4));
        assert_eq!(facts.evaluate(&g, is_zero), Some(false));
    }

    #[test]
    fn test_memory_kill() {
        let g = GraphBuilder::with_int_parameters(1).finish();
        let p = g.start();
        let mut facts = FactMap::new();
        let mark = facts.mark();
        facts.set_memory((LocationId(1), None), p);
        facts.set_memory((LocationId(2), None), p);
        facts.kill_location(LocationId(1));
        assert_eq!(facts.memory_value((LocationId(1), None)), None);
        assert_eq!(facts.memory_value((LocationId(2), None)), Some(p));
        facts.kill_memory();
        assert_eq!(facts.memory_value((LocationId(2), None)), None);
        facts.rollback(mark);
        assert_eq!(facts.memory_value((LocationId(2), None)), None);
        assert!(facts.memory.is_empty());
    }
}
