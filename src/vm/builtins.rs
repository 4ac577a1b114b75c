//! Built-in classes: native operator and method tables for primitive and
//! composite values.
//!
//! One `Builtins` context is constructed per VM and handed to whoever needs
//! to resolve a built-in class, instead of reaching for global singletons.

use std::collections::HashMap;

use super::error::VmError;
use super::heap::Heap;
use super::ops::Operator;
use super::stack::ExecutionStack;
use super::value::{Value, ValueKind};

/// Native operator: `(operator, left, right) -> result`.
pub type NativeOperation = fn(Operator, &Value, &Value, &mut Heap) -> Result<Value, VmError>;

/// Native method: reads its arguments off the stack and pushes its result.
pub type NativeMethod = fn(&Value, &mut ExecutionStack, usize, &Heap) -> Result<(), VmError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinClassId {
    Boolean,
    Integer,
    Float,
    Array,
    String,
    Hash,
}

impl BuiltinClassId {
    pub const ALL: [BuiltinClassId; 6] = [
        BuiltinClassId::Boolean,
        BuiltinClassId::Integer,
        BuiltinClassId::Float,
        BuiltinClassId::Array,
        BuiltinClassId::String,
        BuiltinClassId::Hash,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BuiltinClassId::Boolean => "Boolean",
            BuiltinClassId::Integer => "Integer",
            BuiltinClassId::Float => "Float",
            BuiltinClassId::Array => "Array",
            BuiltinClassId::String => "String",
            BuiltinClassId::Hash => "Hash",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Descriptor for one built-in class.
pub struct BuiltinClass {
    pub id: BuiltinClassId,
    operations: HashMap<Operator, NativeOperation>,
    methods: HashMap<&'static str, NativeMethod>,
}

impl BuiltinClass {
    fn new(id: BuiltinClassId) -> Self {
        Self {
            id,
            operations: HashMap::new(),
            methods: HashMap::new(),
        }
    }

    fn with_operations(mut self, operators: &[Operator], op: NativeOperation) -> Self {
        for operator in operators {
            self.operations.insert(*operator, op);
        }
        self
    }

    fn with_method(mut self, name: &'static str, method: NativeMethod) -> Self {
        self.methods.insert(name, method);
        self
    }

    pub fn operation(&self, operator: Operator) -> Option<NativeOperation> {
        self.operations.get(&operator).copied()
    }

    /// Look up a method by its `name:arity` key.
    pub fn method(&self, name: &str) -> Option<NativeMethod> {
        self.methods.get(name).copied()
    }
}

/// All built-in class descriptors.
pub struct Builtins {
    classes: Vec<BuiltinClass>,
}

impl Default for Builtins {
    fn default() -> Self {
        Self::new()
    }
}

const ARITHMETIC: [Operator; 4] = [Operator::Add, Operator::Sub, Operator::Mul, Operator::Div];

const COMPARISON: [Operator; 6] = [
    Operator::Eql,
    Operator::Neql,
    Operator::Les,
    Operator::Gtr,
    Operator::LesEql,
    Operator::GtrEql,
];

impl Builtins {
    pub fn new() -> Self {
        let classes = BuiltinClassId::ALL
            .iter()
            .map(|id| match id {
                BuiltinClassId::Boolean => BuiltinClass::new(*id)
                    .with_operations(&[Operator::Eql, Operator::Neql], boolean_op),
                BuiltinClassId::Integer => BuiltinClass::new(*id)
                    .with_operations(&ARITHMETIC, integer_op)
                    .with_operations(&[Operator::Mod], integer_op)
                    .with_operations(&COMPARISON, integer_op)
                    .with_method("abs:0", integer_abs),
                BuiltinClassId::Float => BuiltinClass::new(*id)
                    .with_operations(&ARITHMETIC, float_op)
                    .with_operations(&COMPARISON, float_op)
                    .with_method("toInteger:0", float_to_integer),
                BuiltinClassId::Array => BuiltinClass::new(*id).with_method("size:0", array_size),
                BuiltinClassId::String => BuiltinClass::new(*id)
                    .with_operations(&[Operator::Add], string_op)
                    .with_method("size:0", string_size),
                BuiltinClassId::Hash => BuiltinClass::new(*id).with_method("size:0", hash_size),
            })
            .collect();
        Self { classes }
    }

    pub fn class(&self, id: BuiltinClassId) -> &BuiltinClass {
        &self.classes[id.index()]
    }

    /// Resolve a built-in class by its source-level name.
    pub fn lookup(&self, name: &str) -> Option<BuiltinClassId> {
        BuiltinClassId::ALL.into_iter().find(|id| id.name() == name)
    }
}

// =============================================================================
// Operators
// =============================================================================

fn mismatch(operator: Operator, left: &Value, right: &Value) -> VmError {
    VmError::OperandMismatch {
        left: left.type_name(),
        operator,
        right: right.type_name(),
    }
}

fn compare<T: PartialOrd>(operator: Operator, l: T, r: T) -> Option<bool> {
    match operator {
        Operator::Eql => Some(l == r),
        Operator::Neql => Some(l != r),
        Operator::Les => Some(l < r),
        Operator::Gtr => Some(l > r),
        Operator::LesEql => Some(l <= r),
        Operator::GtrEql => Some(l >= r),
        _ => None,
    }
}

fn float_arith(operator: Operator, l: f64, r: f64) -> Option<Value> {
    match operator {
        Operator::Add => Some(Value::float(l + r)),
        Operator::Sub => Some(Value::float(l - r)),
        Operator::Mul => Some(Value::float(l * r)),
        Operator::Div => Some(Value::float(l / r)),
        _ => compare(operator, l, r).map(Value::bool),
    }
}

fn boolean_op(operator: Operator, left: &Value, right: &Value, _: &mut Heap) -> Result<Value, VmError> {
    let l = left.as_bool().ok_or_else(|| mismatch(operator, left, right))?;
    let r = match right.kind {
        ValueKind::Bool(b) => b,
        ValueKind::Int(n) => n != 0,
        _ => return Err(mismatch(operator, left, right)),
    };
    compare(operator, l, r)
        .map(Value::bool)
        .ok_or_else(|| mismatch(operator, left, right))
}

fn integer_op(operator: Operator, left: &Value, right: &Value, _: &mut Heap) -> Result<Value, VmError> {
    let l = left.as_int().ok_or_else(|| mismatch(operator, left, right))?;
    match right.kind {
        ValueKind::Int(r) => match operator {
            Operator::Add => Ok(Value::int(l.wrapping_add(r))),
            Operator::Sub => Ok(Value::int(l.wrapping_sub(r))),
            Operator::Mul => Ok(Value::int(l.wrapping_mul(r))),
            Operator::Div if r == 0 => Err(VmError::DivisionByZero),
            Operator::Div => Ok(Value::int(l.wrapping_div(r))),
            Operator::Mod if r == 0 => Err(VmError::DivisionByZero),
            Operator::Mod => Ok(Value::int(l.wrapping_rem(r))),
            _ => compare(operator, l, r)
                .map(Value::bool)
                .ok_or_else(|| mismatch(operator, left, right)),
        },
        ValueKind::Float(r) => {
            float_arith(operator, l as f64, r).ok_or_else(|| mismatch(operator, left, right))
        }
        _ => Err(mismatch(operator, left, right)),
    }
}

fn float_op(operator: Operator, left: &Value, right: &Value, _: &mut Heap) -> Result<Value, VmError> {
    let l = match left.kind {
        ValueKind::Float(f) => f,
        _ => return Err(mismatch(operator, left, right)),
    };
    let r = match right.kind {
        ValueKind::Float(f) => f,
        ValueKind::Int(n) => n as f64,
        _ => return Err(mismatch(operator, left, right)),
    };
    float_arith(operator, l, r).ok_or_else(|| mismatch(operator, left, right))
}

/// Appends to the left string's buffer in place; every value sharing the
/// handle observes the change.
fn string_op(operator: Operator, left: &Value, right: &Value, heap: &mut Heap) -> Result<Value, VmError> {
    let ValueKind::Str(target) = left.kind else {
        return Err(mismatch(operator, left, right));
    };
    let suffix = match right.kind {
        ValueKind::Int(n) => n.to_string(),
        ValueKind::Float(f) => format!("{:.6}", f),
        ValueKind::Str(r) => heap.string(r)?.to_string(),
        _ => return Err(mismatch(operator, left, right)),
    };
    heap.string_mut(target)?.push_str(&suffix);
    Ok(left.clone())
}

// =============================================================================
// Methods
// =============================================================================

fn integer_abs(receiver: &Value, stack: &mut ExecutionStack, _: usize, _: &Heap) -> Result<(), VmError> {
    let n = receiver.as_int().ok_or(VmError::TypeMismatch {
        expected: "integer",
        found: receiver.type_name(),
    })?;
    stack.push(Value::int(n.wrapping_abs()))
}

fn float_to_integer(receiver: &Value, stack: &mut ExecutionStack, _: usize, _: &Heap) -> Result<(), VmError> {
    match receiver.kind {
        ValueKind::Float(f) => stack.push(Value::int(f as i64)),
        _ => Err(VmError::TypeMismatch {
            expected: "float",
            found: receiver.type_name(),
        }),
    }
}

fn array_size(receiver: &Value, stack: &mut ExecutionStack, _: usize, heap: &Heap) -> Result<(), VmError> {
    match receiver.kind {
        ValueKind::Array(r) => {
            let len = heap.array(r)?.elements.len();
            stack.push(Value::int(len as i64))
        }
        _ => Err(VmError::TypeMismatch {
            expected: "array",
            found: receiver.type_name(),
        }),
    }
}

fn string_size(receiver: &Value, stack: &mut ExecutionStack, _: usize, heap: &Heap) -> Result<(), VmError> {
    match receiver.kind {
        ValueKind::Str(r) => {
            let len = heap.string(r)?.chars().count();
            stack.push(Value::int(len as i64))
        }
        _ => Err(VmError::TypeMismatch {
            expected: "string",
            found: receiver.type_name(),
        }),
    }
}

fn hash_size(receiver: &Value, stack: &mut ExecutionStack, _: usize, heap: &Heap) -> Result<(), VmError> {
    match receiver.kind {
        ValueKind::Hash(r) => {
            let len = heap.hash(r)?.len();
            stack.push(Value::int(len as i64))
        }
        _ => Err(VmError::TypeMismatch {
            expected: "hash",
            found: receiver.type_name(),
        }),
    }
}
