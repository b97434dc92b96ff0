//! Optimizing core of the Flint JIT.
//!
//! Sea-of-nodes compiler middle end with:
//! - A graph IR with value numbering and stamp (type and range) inference
//! - Canonicalization to a fixed point
//! - Conditional elimination over the dominator tree
//! - Loop analysis with counted loops and trip counts
//! - Scheduling of floating nodes into blocks
//! - A driver that recompiles after failed speculations
#![deny(unsafe_op_in_unsafe_fn)]
pub mod compiler;
pub mod error;
pub mod ir;
pub mod opt;
pub mod providers;
pub mod speculation;

pub use compiler::{CompilationResult, Compiler, GraphSource};
pub use error::{Bailout, BailoutKind, CompileError, CompileResult, ErrorKind, VerificationError};
pub use ir::{Graph, GraphBuilder, NodeId, Stamp};
pub use opt::{optimize, OptPipeline, PipelineConfig, Schedule, SchedulePolicy};
pub use providers::{DefaultProviders, Providers, TableProviders};
pub use speculation::{Speculation, SpeculationLog, SpeculationReason};
