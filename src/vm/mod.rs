mod builtins;
mod error;
mod frame;
mod heap;
mod ops;
mod stack;
mod value;
mod vm;

use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use serde::Serialize;

pub use builtins::{BuiltinClass, BuiltinClassId, Builtins, NativeMethod, NativeOperation};
pub use error::VmError;
pub use frame::{Frame, Roots};
pub use heap::{ArrayObject, GcRef, GcStats, Heap, HeapObject, Instance};
pub use ops::{JumpKind, Op, Operator, VarScope};
pub use stack::{CALL_STACK_SIZE, CallStack, EXECUTION_STACK_SIZE, ExecutionStack};
pub use value::{ClassRef, Value, ValueKind, format_float};
pub use vm::{CapturedOutput, VM};

/// Name of the function holding top-level statements.
pub const GLOBAL_FUNCTION_NAME: &str = "#GLOBAL#";

/// Whether a function's return statements carry a value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ReturnKind {
    /// No return statement seen yet.
    #[default]
    Unset,
    NoValue,
    Value,
}

/// A compiled function or method.
#[derive(Debug, Clone, Serialize)]
pub struct Function {
    /// Empty for operator overloads.
    pub name: String,
    pub operator: Option<Operator>,
    pub param_count: usize,
    /// Declared locals, excluding the receiver slot.
    pub local_count: usize,
    pub code: Vec<Op>,
    /// Label id -> position of its `LBL` instruction.
    pub jump_table: HashMap<i64, usize>,
    /// Basic block entry points.
    pub leaders: BTreeSet<usize>,
    pub returns: ReturnKind,
}

impl Function {
    pub fn new(name: impl Into<String>, param_count: usize, local_count: usize) -> Self {
        Self {
            name: name.into(),
            operator: None,
            param_count,
            local_count,
            code: Vec::new(),
            jump_table: HashMap::new(),
            leaders: BTreeSet::new(),
            returns: ReturnKind::Unset,
        }
    }

    /// Build a function from code, resolving labels and leaders from it.
    pub fn with_code(
        name: impl Into<String>,
        param_count: usize,
        local_count: usize,
        code: Vec<Op>,
    ) -> Self {
        let mut function = Self::new(name, param_count, local_count);
        function.code = code;
        function.resolve_labels();
        function
    }

    pub fn returning_value(mut self) -> Self {
        self.returns = ReturnKind::Value;
        self
    }

    pub fn returns_value(&self) -> bool {
        self.returns == ReturnKind::Value
    }

    /// Key used in function and method tables: `name:arity`.
    pub fn qualified_name(&self) -> String {
        qualified_name(&self.name, self.param_count)
    }

    /// Number of local slots a frame for this function needs, counting the
    /// receiver in slot 0.
    pub fn frame_size(&self) -> usize {
        self.local_count + 1
    }

    pub fn label_position(&self, label: i64) -> Option<usize> {
        self.jump_table.get(&label).copied()
    }

    /// Rebuild the jump table and leader set from the code.
    ///
    /// Leaders are position 0, every label, and the instruction after every
    /// jump.
    pub fn resolve_labels(&mut self) {
        self.jump_table.clear();
        self.leaders.clear();
        self.leaders.insert(0);
        for (pos, op) in self.code.iter().enumerate() {
            match op {
                Op::Lbl { id, .. } => {
                    self.jump_table.insert(*id, pos);
                    self.leaders.insert(pos);
                }
                Op::Jmp { .. } => {
                    self.leaders.insert(pos + 1);
                }
                _ => {}
            }
        }
    }
}

pub fn qualified_name(name: &str, arity: usize) -> String {
    format!("{}:{}", name, arity)
}

/// A user-defined class.
#[derive(Debug, Clone, Serialize)]
pub struct Class {
    pub name: String,
    pub instance_count: usize,
    /// `name:arity` -> method.
    pub methods: HashMap<String, Rc<Function>>,
    pub operators: HashMap<Operator, Rc<Function>>,
}

impl Class {
    pub fn new(name: impl Into<String>, instance_count: usize) -> Self {
        Self {
            name: name.into(),
            instance_count,
            methods: HashMap::new(),
            operators: HashMap::new(),
        }
    }

    /// Register a method, or an operator overload if the function carries
    /// an operator.
    pub fn add_function(&mut self, function: Function) {
        let function = Rc::new(function);
        match function.operator {
            Some(operator) => {
                self.operators.insert(operator, function);
            }
            None => {
                self.methods.insert(function.qualified_name(), function);
            }
        }
    }

    pub fn method(&self, qualified_name: &str) -> Option<&Rc<Function>> {
        self.methods.get(qualified_name)
    }

    pub fn operation(&self, operator: Operator) -> Option<&Rc<Function>> {
        self.operators.get(&operator)
    }
}

/// A compiled program.
#[derive(Debug, Clone, Serialize)]
pub struct Program {
    pub global: Rc<Function>,
    /// `name:arity` -> free function.
    pub functions: HashMap<String, Rc<Function>>,
    pub classes: HashMap<String, Rc<Class>>,
}

impl Program {
    pub fn new(global: Function) -> Self {
        Self {
            global: Rc::new(global),
            functions: HashMap::new(),
            classes: HashMap::new(),
        }
    }

    pub fn add_function(&mut self, function: Function) {
        self.functions
            .insert(function.qualified_name(), Rc::new(function));
    }

    pub fn add_class(&mut self, class: Class) {
        self.classes.insert(class.name.clone(), Rc::new(class));
    }

    pub fn function(&self, qualified_name: &str) -> Option<&Rc<Function>> {
        self.functions.get(qualified_name)
    }

    pub fn class(&self, name: &str) -> Option<&Rc<Class>> {
        self.classes.get(name)
    }
}
