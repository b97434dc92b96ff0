//! IR nodes.
//!
//! A node has:
//! - an **operator**: what it computes
//! - ordered **inputs**: the values and control it consumes
//! - **usages**: the nodes that consume it, one entry per input edge
//! - a **stamp**: what values it can produce
//!
//! Inputs and usages are only changed through [`Graph`](super::graph::Graph),
//! which keeps the two sides of every edge consistent.

use smallvec::SmallVec;

use super::arena::Id;
use super::operators::{Constant, Operator};
use super::stamp::Stamp;

pub type NodeId = Id<Node>;

/// Inline capacity covering the arity of nearly every operator.
pub type EdgeList = SmallVec<[NodeId; 4]>;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct NodeFlags: u8 {
        /// Never removed as unused (parameters and guards).
        const PINNED = 0b0000_0001;
        /// Inputs changed since the node was last value-numbered.
        const DIRTY = 0b0000_0010;
    }
}

#[derive(Clone)]
pub struct Node {
    pub op: Operator,
    pub(crate) inputs: EdgeList,
    pub(crate) usages: EdgeList,
    pub stamp: Stamp,
    pub flags: NodeFlags,
}

impl Node {
    pub(crate) fn new(op: Operator, inputs: &[NodeId], stamp: Stamp) -> Self {
        Node {
            op,
            inputs: SmallVec::from_slice(inputs),
            usages: SmallVec::new(),
            stamp,
            flags: NodeFlags::empty(),
        }
    }

    #[inline]
    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    #[inline]
    pub fn input(&self, index: usize) -> NodeId {
        self.inputs[index]
    }

    /// One entry per input edge pointing at this node.
    #[inline]
    pub fn usages(&self) -> &[NodeId] {
        &self.usages
    }

    #[inline]
    pub fn has_usages(&self) -> bool {
        !self.usages.is_empty()
    }

    #[inline]
    pub fn is_fixed(&self) -> bool {
        self.op.is_fixed()
    }

    pub fn as_constant(&self) -> Option<Constant> {
        match self.op {
            Operator::Const(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        self.as_constant().and_then(|c| c.as_int())
    }

    pub fn as_logic_constant(&self) -> Option<bool> {
        match self.op {
            Operator::LogicConst(b) => Some(b),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}{:?} : {:?}", self.op, self.inputs.as_slice(), self.stamp)
    }
}
