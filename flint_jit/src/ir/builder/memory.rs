use super::GraphBuilder;
use crate::ir::node::NodeId;
use crate::ir::operators::{LocationId, MemoryOp, MethodId, Operator};
use crate::ir::stamp::Stamp;

/// Builder trait for memory accesses and calls.
pub trait MemoryBuilder {
    fn load_field(&mut self, object: NodeId, location: LocationId, stamp: Stamp) -> NodeId;
    fn store_field(&mut self, object: NodeId, location: LocationId, value: NodeId) -> NodeId;
    fn load_static(&mut self, location: LocationId, stamp: Stamp) -> NodeId;
    fn store_static(&mut self, location: LocationId, value: NodeId) -> NodeId;
    fn array_length(&mut self, array: NodeId) -> NodeId;
    fn invoke(&mut self, method: MethodId, args: &[NodeId], stamp: Stamp) -> NodeId;
}

impl MemoryBuilder for GraphBuilder {
    fn load_field(&mut self, object: NodeId, location: LocationId, stamp: Stamp) -> NodeId {
        self.append(Operator::Memory(MemoryOp::LoadField, location), &[object], stamp)
    }

    fn store_field(&mut self, object: NodeId, location: LocationId, value: NodeId) -> NodeId {
        self.append(Operator::Memory(MemoryOp::StoreField, location), &[object, value], Stamp::Void)
    }

    fn load_static(&mut self, location: LocationId, stamp: Stamp) -> NodeId {
        self.append(Operator::Memory(MemoryOp::LoadStatic, location), &[], stamp)
    }

    fn store_static(&mut self, location: LocationId, value: NodeId) -> NodeId {
        self.append(Operator::Memory(MemoryOp::StoreStatic, location), &[value], Stamp::Void)
    }

    fn array_length(&mut self, array: NodeId) -> NodeId {
        self.append(Operator::ArrayLength, &[array], Stamp::positive_int())
    }

    fn invoke(&mut self, method: MethodId, args: &[NodeId], stamp: Stamp) -> NodeId {
        self.append(Operator::Invoke(method), args, stamp)
    }
}
