//! Compilation errors.
//!
//! Three kinds of failure leave a phase:
//! - [`VerificationError`]: a graph or schedule invariant is broken. Always
//!   fatal to the compilation; never patched up.
//! - [`Bailout`] with [`BailoutKind::Retryable`]: recompiling without the
//!   named speculation is expected to succeed.
//! - [`Bailout`] with [`BailoutKind::Permanent`]: this strategy cannot
//!   compile the method; the caller falls back to a simpler tier.

use thiserror::Error;

use crate::ir::node::NodeId;
use crate::speculation::Speculation;

/// Broken IR invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("node {node} has dangling input {input} at index {index}")]
    DanglingInput { node: NodeId, input: NodeId, index: usize },

    #[error("usage list of {node} disagrees with inputs of {user}")]
    UsageMismatch { node: NodeId, user: NodeId },

    #[error("cycle through {node} does not pass a loop header")]
    IllegalCycle { node: NodeId },

    #[error("malformed {op} node {node}: {detail}")]
    MalformedNode { node: NodeId, op: &'static str, detail: String },

    #[error("control chain broken at {node}: {detail}")]
    BrokenControlChain { node: NodeId, detail: String },

    #[error("{node} is scheduled in a block that does not dominate its usage {usage}")]
    ScheduleViolation { node: NodeId, usage: NodeId },

    #[error("guard {guard} does not dominate its usage {usage}")]
    GuardDoesNotDominate { guard: NodeId, usage: NodeId },

    #[error("no legal block for {node}: {detail}")]
    UnscheduledNode { node: NodeId, detail: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BailoutKind {
    Retryable,
    Permanent,
}

/// Compilation abandoned without an invariant violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?} bailout: {reason}")]
pub struct Bailout {
    pub kind: BailoutKind,
    pub reason: String,
    /// Speculation to disable before retrying.
    pub speculation: Option<Speculation>,
}

impl Bailout {
    pub fn retryable(reason: impl Into<String>, speculation: Option<Speculation>) -> Self {
        Bailout {
            kind: BailoutKind::Retryable,
            reason: reason.into(),
            speculation,
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Bailout {
            kind: BailoutKind::Permanent,
            reason: reason.into(),
            speculation: None,
        }
    }
}

/// How the driver reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Fatal,
    Retryable,
    Permanent,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("verification failed: {0}")]
    Verification(#[from] VerificationError),

    #[error(transparent)]
    Bailout(#[from] Bailout),
}

impl CompileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompileError::Verification(_) => ErrorKind::Fatal,
            CompileError::Bailout(b) => match b.kind {
                BailoutKind::Retryable => ErrorKind::Retryable,
                BailoutKind::Permanent => ErrorKind::Permanent,
            },
        }
    }
}

pub type CompileResult<T> = Result<T, CompileError>;
