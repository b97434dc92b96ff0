//! Reference interpreter over the graph.
//!
//! Executes the control skeleton from `Start`, evaluating floating nodes on
//! demand. Optimizations are checked against it: a graph and its optimized
//! form must produce the same [`Outcome`] for every input, with floats
//! compared by raw bits.

use rustc_hash::FxHashMap;
use thiserror::Error;

use super::fold;
use super::graph::Graph;
use super::node::NodeId;
use super::operators::{Constant, ControlOp, DeoptInfo, LocationId, MemoryOp, Operator, ReinterpretKind};
use super::stamp::{sign_extend, width_mask, Stamp, TypeRef};
use crate::providers::Providers;

// =============================================================================
// Values and heap
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef(u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int { bits: u32, value: i64 },
    Float { bits: u32, raw: u64 },
    Bool(bool),
    Null,
    Ref(ObjectRef),
}

impl Value {
    pub fn int(value: i32) -> Self {
        Value::Int {
            bits: 32,
            value: value as i64,
        }
    }

    pub fn long(value: i64) -> Self {
        Value::Int { bits: 64, value }
    }

    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Value::Int { value, .. } => Some(value),
            _ => None,
        }
    }

    fn from_constant(c: Constant) -> Self {
        match c {
            Constant::Int { bits, value } => Value::Int { bits, value },
            Constant::Float { bits, raw } => Value::Float { bits, raw },
            Constant::Null => Value::Null,
        }
    }

    fn to_constant(&self) -> Option<Constant> {
        match *self {
            Value::Int { bits, value } => Some(Constant::Int { bits, value }),
            Value::Float { bits, raw } => Some(Constant::Float { bits, raw }),
            Value::Null => Some(Constant::Null),
            _ => None,
        }
    }

    /// Zero value of a stamp's kind, read from unwritten memory.
    fn default_for(stamp: &Stamp) -> Self {
        match stamp {
            Stamp::Integer(s) => Value::Int { bits: s.bits(), value: 0 },
            Stamp::Float(s) => Value::Float { bits: s.bits(), raw: 0 },
            _ => Value::Null,
        }
    }
}

#[derive(Debug, Clone)]
struct Object {
    class: Option<TypeRef>,
    fields: FxHashMap<LocationId, Value>,
    length: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct Heap {
    objects: Vec<Object>,
    statics: FxHashMap<LocationId, Value>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_object(&mut self, class: Option<TypeRef>) -> Value {
        self.alloc(class, None)
    }

    pub fn new_array(&mut self, length: i64) -> Value {
        self.alloc(None, Some(length))
    }

    fn alloc(&mut self, class: Option<TypeRef>, length: Option<i64>) -> Value {
        self.objects.push(Object {
            class,
            fields: FxHashMap::default(),
            length,
        });
        Value::Ref(ObjectRef(self.objects.len() as u32 - 1))
    }

    fn object(&self, object: ObjectRef) -> Option<&Object> {
        self.objects.get(object.0 as usize)
    }

    pub fn field(&self, object: ObjectRef, location: LocationId) -> Option<&Value> {
        self.object(object)?.fields.get(&location)
    }

    pub fn set_field(&mut self, object: ObjectRef, location: LocationId, value: Value) {
        if let Some(obj) = self.objects.get_mut(object.0 as usize) {
            obj.fields.insert(location, value);
        }
    }

    pub fn static_value(&self, location: LocationId) -> Option<&Value> {
        self.statics.get(&location)
    }

    pub fn set_static(&mut self, location: LocationId, value: Value) {
        self.statics.insert(location, value);
    }
}

// =============================================================================
// Interpreter
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Returned(Option<Value>),
    Deoptimized(DeoptInfo),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterpError {
    #[error("step limit of {0} exceeded")]
    StepLimit(usize),
    #[error("value of {0} is not available")]
    MissingValue(NodeId),
    #[error("missing argument {0}")]
    MissingArgument(u16),
    #[error("null dereference at {0}")]
    NullDereference(NodeId),
    #[error("division by zero at {0}")]
    DivisionByZero(NodeId),
    #[error("operand kinds do not fit {0}")]
    TypeMismatch(NodeId),
    #[error("no known semantics for call {0}")]
    UnsupportedInvoke(NodeId),
    #[error("control flow ends without terminator at {0}")]
    BrokenControl(NodeId),
}

#[derive(Debug, Clone, Copy)]
pub struct InterpreterConfig {
    pub max_steps: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        InterpreterConfig { max_steps: 1_000_000 }
    }
}

pub struct Interpreter<'a> {
    graph: &'a Graph,
    providers: &'a dyn Providers,
    config: InterpreterConfig,
}

struct Frame<'v> {
    args: &'v [Value],
    heap: &'v mut Heap,
    /// Results of fixed nodes and current phi values.
    env: FxHashMap<NodeId, Value>,
}

type EvalResult<T> = Result<T, InterpError>;

impl<'a> Interpreter<'a> {
    pub fn new(graph: &'a Graph, providers: &'a dyn Providers) -> Self {
        Interpreter {
            graph,
            providers,
            config: InterpreterConfig::default(),
        }
    }

    pub fn with_config(mut self, config: InterpreterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn run(&self, args: &[Value], heap: &mut Heap) -> EvalResult<Outcome> {
        let g = self.graph;
        let mut frame = Frame {
            args,
            heap,
            env: FxHashMap::default(),
        };
        let mut current = g.start();
        let mut steps = 0usize;

        loop {
            steps += 1;
            if steps > self.config.max_steps {
                return Err(InterpError::StepLimit(self.config.max_steps));
            }

            let mut next = None;
            match g.op(current) {
                Operator::Control(ControlOp::If) => {
                    let cond = self.eval_logic(&frame, g.inputs(current)[1])?;
                    next = g.if_successor(current, cond);
                    if next.is_none() {
                        return Err(InterpError::BrokenControl(current));
                    }
                }
                Operator::Control(ControlOp::Return) => {
                    let value = match g.inputs(current).get(1) {
                        Some(&v) => Some(self.eval(&frame, v)?),
                        None => None,
                    };
                    return Ok(Outcome::Returned(value));
                }
                Operator::Control(ControlOp::Deoptimize(info)) => return Ok(Outcome::Deoptimized(*info)),
                Operator::Control(ControlOp::FixedGuard(info)) => {
                    if self.eval_logic(&frame, g.inputs(current)[1])? == info.negated {
                        return Ok(Outcome::Deoptimized(info.deopt()));
                    }
                }
                Operator::Memory(op, location) => self.memory(&mut frame, current, *op, *location)?,
                Operator::ArrayLength => {
                    let length = match self.eval(&frame, g.inputs(current)[1])? {
                        Value::Ref(r) => frame.heap.object(r).and_then(|o| o.length),
                        Value::Null => return Err(InterpError::NullDereference(current)),
                        _ => None,
                    };
                    let length = length.ok_or(InterpError::TypeMismatch(current))?;
                    frame.env.insert(current, Value::int(length as i32));
                }
                Operator::Invoke(method) => {
                    let mut args = Vec::with_capacity(g.inputs(current).len());
                    for &arg in &g.inputs(current)[1..] {
                        let value = self.eval(&frame, arg)?;
                        args.push(value.to_constant().ok_or(InterpError::UnsupportedInvoke(current))?);
                    }
                    let result = self
                        .providers
                        .fold_invoke(*method, &args)
                        .ok_or(InterpError::UnsupportedInvoke(current))?;
                    frame.env.insert(current, Value::from_constant(result));
                }
                _ => {}
            }

            // Floating guards are checked at their anchor.
            for &user in g.usages(current) {
                if let Operator::Guard(info) = g.op(user) {
                    if g.inputs(user)[0] == current && self.eval_logic(&frame, g.inputs(user)[1])? == info.negated {
                        return Ok(Outcome::Deoptimized(info.deopt()));
                    }
                }
            }

            let next = match next.or_else(|| g.next(current)) {
                Some(n) => n,
                None => return Err(InterpError::BrokenControl(current)),
            };
            if g.op(next).is_merge() {
                self.enter_merge(&mut frame, current, next)?;
            }
            current = next;
        }
    }

    fn enter_merge(&self, frame: &mut Frame<'_>, from: NodeId, merge: NodeId) -> EvalResult<()> {
        let g = self.graph;
        let Some(index) = g.inputs(merge).iter().position(|&i| i == from) else {
            return Err(InterpError::BrokenControl(from));
        };
        let phis = g.phis(merge);
        let mut values = Vec::with_capacity(phis.len());
        for &phi in &phis {
            values.push(self.eval(frame, g.inputs(phi)[index + 1])?);
        }
        for (phi, value) in phis.into_iter().zip(values) {
            frame.env.insert(phi, value);
        }
        Ok(())
    }

    fn memory(
        &self,
        frame: &mut Frame<'_>,
        node: NodeId,
        op: MemoryOp,
        location: LocationId,
    ) -> EvalResult<()> {
        let g = self.graph;
        let inputs = g.inputs(node);
        let object = if op.has_object() {
            match self.eval(frame, inputs[1])? {
                Value::Ref(r) => Some(r),
                Value::Null => return Err(InterpError::NullDereference(node)),
                _ => return Err(InterpError::TypeMismatch(node)),
            }
        } else {
            None
        };
        match op {
            MemoryOp::LoadField | MemoryOp::LoadStatic => {
                let stored = match object {
                    Some(r) => frame.heap.field(r, location),
                    None => frame.heap.static_value(location),
                };
                let value = stored.cloned().unwrap_or_else(|| Value::default_for(g.stamp(node)));
                frame.env.insert(node, value);
            }
            MemoryOp::StoreField => {
                let value = self.eval(frame, inputs[2])?;
                if let Some(r) = object {
                    frame.heap.set_field(r, location, value);
                }
            }
            MemoryOp::StoreStatic => {
                let value = self.eval(frame, inputs[1])?;
                frame.heap.set_static(location, value);
            }
        }
        Ok(())
    }

    fn eval_logic(&self, frame: &Frame<'_>, node: NodeId) -> EvalResult<bool> {
        match self.eval(frame, node)? {
            Value::Bool(b) => Ok(b),
            _ => Err(InterpError::TypeMismatch(node)),
        }
    }

    fn eval_int(&self, frame: &Frame<'_>, node: NodeId) -> EvalResult<(u32, i64)> {
        match self.eval(frame, node)? {
            Value::Int { bits, value } => Ok((bits, value)),
            _ => Err(InterpError::TypeMismatch(node)),
        }
    }

    fn eval_float(&self, frame: &Frame<'_>, node: NodeId) -> EvalResult<(u32, u64)> {
        match self.eval(frame, node)? {
            Value::Float { bits, raw } => Ok((bits, raw)),
            _ => Err(InterpError::TypeMismatch(node)),
        }
    }

    fn eval(&self, frame: &Frame<'_>, node: NodeId) -> EvalResult<Value> {
        let g = self.graph;
        let inputs = g.inputs(node);
        let value = match g.op(node) {
            Operator::Const(c) => Value::from_constant(*c),
            Operator::LogicConst(b) => Value::Bool(*b),
            Operator::Parameter(i) => frame
                .args
                .get(*i as usize)
                .cloned()
                .ok_or(InterpError::MissingArgument(*i))?,
            Operator::IntOp(op) => {
                let (bits, x) = self.eval_int(frame, inputs[0])?;
                let y = if op.is_unary() { 0 } else { self.eval_int(frame, inputs[1])?.1 };
                let value = fold::int_arith(*op, bits, x, y).ok_or(InterpError::DivisionByZero(node))?;
                Value::Int { bits, value }
            }
            Operator::Bitwise(op) => {
                let (bits, x) = self.eval_int(frame, inputs[0])?;
                let y = if op.is_unary() { 0 } else { self.eval_int(frame, inputs[1])?.1 };
                Value::Int {
                    bits,
                    value: fold::bitwise(*op, bits, x, y),
                }
            }
            Operator::FloatOp(op) => {
                let (bits, x) = self.eval_float(frame, inputs[0])?;
                let y = if op.is_unary() { 0 } else { self.eval_float(frame, inputs[1])?.1 };
                Value::Float {
                    bits,
                    raw: fold::float_arith(*op, bits, x, y),
                }
            }
            Operator::IntCmp(op) => {
                let (bits, x) = self.eval_int(frame, inputs[0])?;
                let (_, y) = self.eval_int(frame, inputs[1])?;
                Value::Bool(fold::int_compare(*op, bits, x, y))
            }
            Operator::FloatCmp(op) => {
                let (bits, x) = self.eval_float(frame, inputs[0])?;
                let (_, y) = self.eval_float(frame, inputs[1])?;
                Value::Bool(fold::float_compare(*op, bits, x, y))
            }
            Operator::IsNull => Value::Bool(self.eval(frame, inputs[0])? == Value::Null),
            Operator::InstanceOf(ty) => Value::Bool(match self.eval(frame, inputs[0])? {
                Value::Ref(r) => frame.heap.object(r).and_then(|o| o.class.as_ref()).is_some_and(|c| c.is_subtype_of(ty)),
                _ => false,
            }),
            Operator::LogicNot => Value::Bool(!self.eval_logic(frame, inputs[0])?),
            Operator::Conditional => {
                let pick = if self.eval_logic(frame, inputs[0])? { inputs[1] } else { inputs[2] };
                self.eval(frame, pick)?
            }
            Operator::Reinterpret(ReinterpretKind::FloatToInt) => {
                let (bits, raw) = self.eval_float(frame, inputs[0])?;
                Value::Int {
                    bits,
                    value: sign_extend(raw, bits),
                }
            }
            Operator::Reinterpret(ReinterpretKind::IntToFloat) => {
                let (bits, value) = self.eval_int(frame, inputs[0])?;
                Value::Float {
                    bits,
                    raw: (value as u64) & width_mask(bits),
                }
            }
            Operator::Pi => self.eval(frame, inputs[0])?,
            _ => frame.env.get(&node).cloned().ok_or(InterpError::MissingValue(node))?,
        };
        Ok(value)
    }
}
