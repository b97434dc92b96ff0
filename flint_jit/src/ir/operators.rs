//! IR operators.
//!
//! Operators are grouped into families:
//! - **Constants and parameters**
//! - **Arithmetic** ([`ArithOp`]) on integers and floats
//! - **Bitwise** ([`BitwiseOp`]) including shifts
//! - **Comparisons** ([`CmpOp`]) and other logic nodes
//! - **Control** ([`ControlOp`]): the fixed skeleton of the graph
//! - **Memory** ([`MemoryOp`]) and calls
//! - **Guards and pis**: speculative checks and the narrowed values they justify
//!
//! Fixed operators have a position in the control chain; everything else
//! floats and is placed by the scheduler.
//!
//! # Input layouts
//!
//! | Operator | Inputs |
//! |---|---|
//! | binary ops, comparisons | `[x, y]` |
//! | unary ops, `IsNull`, `InstanceOf`, `Reinterpret`, `LogicNot` | `[x]` |
//! | `Conditional` | `[condition, true_value, false_value]` |
//! | `Phi` | `[merge, value per merge input...]` |
//! | `Guard` | `[anchor, condition]` |
//! | `Pi` | `[value, guard or anchor]` |
//! | `If`, `FixedGuard` | `[control, condition]` |
//! | `IfTrue`, `IfFalse` | `[if]` |
//! | `Region` | `[predecessor...]` |
//! | `Loop` | `[entry, back edge...]` |
//! | `Return` | `[control]` or `[control, value]` |
//! | `Deoptimize` | `[control]` |
//! | `LoadField` / `StoreField` | `[control, object]` / `[control, object, value]` |
//! | `LoadStatic` / `StoreStatic` | `[control]` / `[control, value]` |
//! | `ArrayLength` | `[control, array]` |
//! | `Invoke` | `[control, argument...]` |

use std::fmt;

use crate::ir::condition::Condition;
use crate::ir::stamp::{wrap, TypeRef};
use crate::speculation::Speculation;

// =============================================================================
// Constants
// =============================================================================

/// Compile-time constant.
///
/// Floats are kept as raw bits so that folding never normalizes NaN payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constant {
    Int { bits: u32, value: i64 },
    Float { bits: u32, raw: u64 },
    Null,
}

impl Constant {
    pub fn int(value: i32) -> Self {
        Constant::Int {
            bits: 32,
            value: value as i64,
        }
    }

    pub fn long(value: i64) -> Self {
        Constant::Int { bits: 64, value }
    }

    /// Integer constant wrapped to `bits`.
    pub fn int_of(bits: u32, value: i64) -> Self {
        Constant::Int {
            bits,
            value: wrap(value, bits),
        }
    }

    pub fn float(bits: u32, value: f64) -> Self {
        let raw = if bits == 32 {
            (value as f32).to_bits() as u64
        } else {
            value.to_bits()
        };
        Constant::Float { bits, raw }
    }

    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Constant::Int { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn bits(&self) -> u32 {
        match *self {
            Constant::Int { bits, .. } | Constant::Float { bits, .. } => bits,
            Constant::Null => 64,
        }
    }
}

// =============================================================================
// Arithmetic
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    /// Signed truncating division. Integer division is only built with a
    /// non-zero constant divisor.
    Div,
    /// Division of the operands read as unsigned, same restriction as `Div`.
    UnsignedDiv,
    Neg,
}

impl ArithOp {
    pub const fn is_unary(self) -> bool {
        matches!(self, ArithOp::Neg)
    }

    pub const fn name(self) -> &'static str {
        match self {
            ArithOp::Add => "Add",
            ArithOp::Sub => "Sub",
            ArithOp::Mul => "Mul",
            ArithOp::Div => "Div",
            ArithOp::UnsignedDiv => "UnsignedDiv",
            ArithOp::Neg => "Neg",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitwiseOp {
    And,
    Or,
    Xor,
    Not,
    Shl,
    /// Arithmetic right shift.
    Shr,
    /// Logical right shift.
    UShr,
}

impl BitwiseOp {
    pub const fn is_unary(self) -> bool {
        matches!(self, BitwiseOp::Not)
    }

    pub const fn is_shift(self) -> bool {
        matches!(self, BitwiseOp::Shl | BitwiseOp::Shr | BitwiseOp::UShr)
    }

    pub const fn is_commutative(self) -> bool {
        matches!(self, BitwiseOp::And | BitwiseOp::Or | BitwiseOp::Xor)
    }

    pub const fn name(self) -> &'static str {
        match self {
            BitwiseOp::And => "And",
            BitwiseOp::Or => "Or",
            BitwiseOp::Xor => "Xor",
            BitwiseOp::Not => "Not",
            BitwiseOp::Shl => "Shl",
            BitwiseOp::Shr => "Shr",
            BitwiseOp::UShr => "UShr",
        }
    }
}

// =============================================================================
// Comparisons
// =============================================================================

/// Canonical comparison. Other relations are expressed with operand swaps
/// and [`Operator::LogicNot`], see [`Condition::canonical`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Lt,
    /// Unsigned less-than; integers only.
    Below,
}

impl CmpOp {
    pub const fn condition(self) -> Condition {
        match self {
            CmpOp::Eq => Condition::Eq,
            CmpOp::Lt => Condition::Lt,
            CmpOp::Below => Condition::Bt,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            CmpOp::Eq => "Equals",
            CmpOp::Lt => "LessThan",
            CmpOp::Below => "Below",
        }
    }
}

// =============================================================================
// Deoptimization
// =============================================================================

/// Why compiled code gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeoptReason {
    NullCheck,
    ClassCast,
    BoundsCheck,
    ArithmeticException,
    TypeSpeculation,
    LoopLimitCheck,
    UnreachedCode,
    TransferToInterpreter,
}

impl DeoptReason {
    pub const fn name(self) -> &'static str {
        match self {
            DeoptReason::NullCheck => "null_check",
            DeoptReason::ClassCast => "class_cast",
            DeoptReason::BoundsCheck => "bounds_check",
            DeoptReason::ArithmeticException => "arithmetic_exception",
            DeoptReason::TypeSpeculation => "type_speculation",
            DeoptReason::LoopLimitCheck => "loop_limit_check",
            DeoptReason::UnreachedCode => "unreached_code",
            DeoptReason::TransferToInterpreter => "transfer_to_interpreter",
        }
    }
}

/// What the runtime does after deoptimizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeoptAction {
    /// Invalidate and recompile, possibly without the failed speculation.
    Retry,
    /// Keep the code; this path is never expected to run.
    NeverRetry,
}

/// Payload of `Deoptimize` terminators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeoptInfo {
    pub reason: DeoptReason,
    pub action: DeoptAction,
    pub speculation: Option<Speculation>,
}

impl DeoptInfo {
    pub const fn new(reason: DeoptReason, action: DeoptAction) -> Self {
        DeoptInfo {
            reason,
            action,
            speculation: None,
        }
    }

    pub const fn unreachable() -> Self {
        Self::new(DeoptReason::UnreachedCode, DeoptAction::NeverRetry)
    }
}

/// Payload of `Guard` and `FixedGuard`: deoptimize unless
/// `condition != negated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GuardInfo {
    pub reason: DeoptReason,
    pub action: DeoptAction,
    pub negated: bool,
    pub speculation: Option<Speculation>,
}

impl GuardInfo {
    pub const fn new(reason: DeoptReason, action: DeoptAction, negated: bool) -> Self {
        GuardInfo {
            reason,
            action,
            negated,
            speculation: None,
        }
    }

    pub fn with_speculation(mut self, speculation: Option<Speculation>) -> Self {
        self.speculation = speculation;
        self
    }

    pub fn deopt(&self) -> DeoptInfo {
        DeoptInfo {
            reason: self.reason,
            action: self.action,
            speculation: self.speculation,
        }
    }

    pub fn is_speculative(&self) -> bool {
        self.speculation.is_some()
    }
}

// =============================================================================
// Control
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlOp {
    Start,
    If,
    IfTrue,
    IfFalse,
    /// Forward merge.
    Region,
    /// Loop header merge; input 0 enters, the rest are back edges.
    Loop,
    Return,
    Deoptimize(DeoptInfo),
    FixedGuard(GuardInfo),
}

impl ControlOp {
    pub const fn name(self) -> &'static str {
        match self {
            ControlOp::Start => "Start",
            ControlOp::If => "If",
            ControlOp::IfTrue => "IfTrue",
            ControlOp::IfFalse => "IfFalse",
            ControlOp::Region => "Region",
            ControlOp::Loop => "Loop",
            ControlOp::Return => "Return",
            ControlOp::Deoptimize(_) => "Deoptimize",
            ControlOp::FixedGuard(_) => "FixedGuard",
        }
    }
}

// =============================================================================
// Memory
// =============================================================================

/// Abstract memory location, e.g. one field of every object of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocationId(pub u32);

/// Callee identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryOp {
    LoadField,
    StoreField,
    LoadStatic,
    StoreStatic,
}

impl MemoryOp {
    pub const fn is_load(self) -> bool {
        matches!(self, MemoryOp::LoadField | MemoryOp::LoadStatic)
    }

    pub const fn is_store(self) -> bool {
        !self.is_load()
    }

    pub const fn has_object(self) -> bool {
        matches!(self, MemoryOp::LoadField | MemoryOp::StoreField)
    }
}

/// Direction of a raw-bits reinterpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReinterpretKind {
    FloatToInt,
    IntToFloat,
}

// =============================================================================
// Operator
// =============================================================================

#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Operator {
    Const(Constant),
    LogicConst(bool),
    Parameter(u16),
    IntOp(ArithOp),
    FloatOp(ArithOp),
    Bitwise(BitwiseOp),
    IntCmp(CmpOp),
    FloatCmp(CmpOp),
    IsNull,
    /// True for non-null instances of the type.
    InstanceOf(TypeRef),
    LogicNot,
    Conditional,
    Reinterpret(ReinterpretKind),
    /// Fixed: reading the length dereferences the array.
    ArrayLength,
    Pi,
    Phi,
    Guard(GuardInfo),
    Control(ControlOp),
    Memory(MemoryOp, LocationId),
    Invoke(MethodId),
}

/// Expected number of inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Range(usize, usize),
}

impl Arity {
    pub fn accepts(self, n: usize) -> bool {
        match self {
            Arity::Exact(k) => n == k,
            Arity::AtLeast(k) => n >= k,
            Arity::Range(lo, hi) => n >= lo && n <= hi,
        }
    }
}

impl Operator {
    /// Has a position in the control chain.
    pub const fn is_fixed(&self) -> bool {
        matches!(
            self,
            Operator::Control(_) | Operator::Memory(..) | Operator::Invoke(_) | Operator::ArrayLength
        )
    }

    pub const fn is_floating(&self) -> bool {
        !self.is_fixed()
    }

    /// Floating node that may be merged with a structurally equal one.
    pub const fn is_value_numberable(&self) -> bool {
        self.is_floating() && !matches!(self, Operator::Phi)
    }

    pub const fn is_constant(&self) -> bool {
        matches!(self, Operator::Const(_) | Operator::LogicConst(_))
    }

    /// Produces a condition consumed by `If`, guards and `Conditional`.
    pub const fn is_logic(&self) -> bool {
        matches!(
            self,
            Operator::LogicConst(_)
                | Operator::IntCmp(_)
                | Operator::FloatCmp(_)
                | Operator::IsNull
                | Operator::InstanceOf(_)
                | Operator::LogicNot
        )
    }

    pub const fn is_commutative(&self) -> bool {
        match self {
            Operator::IntOp(op) => matches!(op, ArithOp::Add | ArithOp::Mul),
            Operator::Bitwise(op) => op.is_commutative(),
            Operator::IntCmp(CmpOp::Eq) => true,
            _ => false,
        }
    }

    /// Starts a basic block.
    pub const fn is_block_begin(&self) -> bool {
        matches!(
            self,
            Operator::Control(ControlOp::Start | ControlOp::IfTrue | ControlOp::IfFalse | ControlOp::Region | ControlOp::Loop)
        )
    }

    pub const fn is_merge(&self) -> bool {
        matches!(self, Operator::Control(ControlOp::Region | ControlOp::Loop))
    }

    pub const fn is_loop(&self) -> bool {
        matches!(self, Operator::Control(ControlOp::Loop))
    }

    pub const fn is_if(&self) -> bool {
        matches!(self, Operator::Control(ControlOp::If))
    }

    /// Ends a path without a successor.
    pub const fn is_terminator(&self) -> bool {
        matches!(self, Operator::Control(ControlOp::Return | ControlOp::Deoptimize(_)))
    }

    /// Fixed node whose input 0 is its control predecessor.
    pub const fn has_control_input(&self) -> bool {
        self.is_fixed() && !matches!(self, Operator::Control(ControlOp::Start | ControlOp::Region | ControlOp::Loop))
    }

    /// May write memory.
    pub const fn kills_memory(&self) -> bool {
        matches!(self, Operator::Memory(MemoryOp::StoreField | MemoryOp::StoreStatic, _) | Operator::Invoke(_))
    }

    pub fn arity(&self) -> Arity {
        match self {
            Operator::Const(_) | Operator::LogicConst(_) | Operator::Parameter(_) => Arity::Exact(0),
            Operator::IntOp(op) | Operator::FloatOp(op) => Arity::Exact(if op.is_unary() { 1 } else { 2 }),
            Operator::Bitwise(op) => Arity::Exact(if op.is_unary() { 1 } else { 2 }),
            Operator::IntCmp(_) | Operator::FloatCmp(_) => Arity::Exact(2),
            Operator::IsNull | Operator::InstanceOf(_) | Operator::LogicNot | Operator::Reinterpret(_) => {
                Arity::Exact(1)
            }
            Operator::Conditional => Arity::Exact(3),
            Operator::Pi | Operator::Guard(_) | Operator::ArrayLength => Arity::Exact(2),
            Operator::Phi => Arity::AtLeast(2),
            Operator::Control(op) => match op {
                ControlOp::Start => Arity::Exact(0),
                ControlOp::If | ControlOp::FixedGuard(_) => Arity::Exact(2),
                ControlOp::IfTrue | ControlOp::IfFalse | ControlOp::Deoptimize(_) => Arity::Exact(1),
                ControlOp::Region | ControlOp::Loop => Arity::AtLeast(1),
                ControlOp::Return => Arity::Range(1, 2),
            },
            Operator::Memory(op, _) => Arity::Exact(match op {
                MemoryOp::LoadStatic => 1,
                MemoryOp::LoadField | MemoryOp::StoreStatic => 2,
                MemoryOp::StoreField => 3,
            }),
            Operator::Invoke(_) => Arity::AtLeast(1),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operator::Const(_) => "Const",
            Operator::LogicConst(_) => "LogicConst",
            Operator::Parameter(_) => "Parameter",
            Operator::IntOp(op) | Operator::FloatOp(op) => op.name(),
            Operator::Bitwise(op) => op.name(),
            Operator::IntCmp(op) | Operator::FloatCmp(op) => op.name(),
            Operator::IsNull => "IsNull",
            Operator::InstanceOf(_) => "InstanceOf",
            Operator::LogicNot => "LogicNot",
            Operator::Conditional => "Conditional",
            Operator::Reinterpret(_) => "Reinterpret",
            Operator::ArrayLength => "ArrayLength",
            Operator::Pi => "Pi",
            Operator::Phi => "Phi",
            Operator::Guard(_) => "Guard",
            Operator::Control(op) => op.name(),
            Operator::Memory(op, _) => match op {
                MemoryOp::LoadField => "LoadField",
                MemoryOp::StoreField => "StoreField",
                MemoryOp::LoadStatic => "LoadStatic",
                MemoryOp::StoreStatic => "StoreStatic",
            },
            Operator::Invoke(_) => "Invoke",
        }
    }

    pub fn guard_info(&self) -> Option<&GuardInfo> {
        match self {
            Operator::Guard(info) | Operator::Control(ControlOp::FixedGuard(info)) => Some(info),
            _ => None,
        }
    }
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Const(Constant::Int { bits, value }) => write!(f, "Const(i{bits} {value})"),
            Operator::Const(Constant::Float { bits, raw }) => write!(f, "Const(f{bits} {raw:#x})"),
            Operator::Const(Constant::Null) => f.write_str("Const(null)"),
            Operator::LogicConst(b) => write!(f, "LogicConst({b})"),
            Operator::Parameter(i) => write!(f, "Parameter({i})"),
            Operator::IntOp(op) => write!(f, "Int{}", op.name()),
            Operator::FloatOp(op) => write!(f, "Float{}", op.name()),
            Operator::IntCmp(op) => write!(f, "Integer{}", op.name()),
            Operator::FloatCmp(op) => write!(f, "Float{}", op.name()),
            Operator::InstanceOf(t) => write!(f, "InstanceOf({t:?})"),
            Operator::Guard(info) => write!(
                f,
                "Guard({}{}{})",
                if info.negated { "!" } else { "" },
                info.reason.name(),
                if info.is_speculative() { ", speculative" } else { "" }
            ),
            Operator::Memory(_, loc) => write!(f, "{}(@{})", self.name(), loc.0),
            Operator::Invoke(m) => write!(f, "Invoke(m{})", m.0),
            _ => f.write_str(self.name()),
        }
    }
}
