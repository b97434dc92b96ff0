//! Sea-of-nodes intermediate representation.
//!
//! # Core Components
//!
//! - **Stamps** (`stamp/`): the abstract value lattice
//! - **Conditions** (`condition.rs`): comparison relations and their logic
//! - **Operators** (`operators.rs`): operator definitions and input layouts
//! - **Arena** (`arena.rs`): stable ids, side tables and bit sets
//! - **Node** / **Graph**: the mutable graph with uniquing
//! - **CFG** (`cfg.rs`): blocks, dominators and loops of the fixed skeleton
//! - **Builder** (`builder/`): programmatic graph construction
//! - **Interpreter** (`interp.rs`): reference semantics for testing

pub mod arena;
pub mod builder;
pub mod cfg;
pub mod compare;
pub mod condition;
pub mod fold;
pub mod graph;
pub mod infer;
pub mod interp;
pub mod node;
pub mod operators;
pub mod stamp;

pub use arena::{Arena, BitSet, Id, SecondaryMap};
pub use builder::GraphBuilder;
pub use cfg::{BasicBlock, BlockId, Cfg, DominatorTree, Loop, LoopForest};
pub use compare::structurally_equal;
pub use condition::Condition;
pub use graph::Graph;
pub use node::{Node, NodeFlags, NodeId};
pub use operators::{
    ArithOp, BitwiseOp, CmpOp, Constant, ControlOp, DeoptAction, DeoptInfo, DeoptReason, GuardInfo, LocationId,
    MemoryOp, MethodId, Operator,
};
pub use stamp::Stamp;
