use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use tracing::{debug, info, trace, warn};

use super::builtins::Builtins;
use super::error::VmError;
use super::frame::{Frame, Roots};
use super::heap::{GcStats, Heap};
use super::ops::{JumpKind, Op, Operator, VarScope};
use super::stack::{CallStack, ExecutionStack};
use super::value::{ClassRef, Value, ValueKind, format_float};
use super::{Function, GLOBAL_FUNCTION_NAME, Program};
use crate::config::RuntimeConfig;

/// Result of executing a single instruction.
enum ControlFlow {
    Continue,
    Halt,
}

/// The virtual machine.
///
/// Executes one function at a time: `ip` indexes into the active function's
/// code and `locals` holds its slots. Calls save the caller in a `Frame` on
/// the call stack; a return with an empty call stack halts the program.
pub struct VM {
    builtins: Builtins,
    heap: Heap,
    stack: ExecutionStack,
    call_stack: CallStack,
    function: Rc<Function>,
    locals: Vec<Value>,
    ip: usize,
    gc_stats: bool,
    output: Box<dyn Write>,
}

impl VM {
    pub fn new() -> Self {
        Self::new_with_config(&RuntimeConfig::default(), Box::new(io::stdout()))
    }

    /// Create a VM with a custom output stream.
    pub fn with_output(output: Box<dyn Write>) -> Self {
        Self::new_with_config(&RuntimeConfig::default(), output)
    }

    /// Create a new VM with full configuration.
    ///
    /// # Arguments
    /// * `config` - Stack capacities and statistics reporting
    /// * `output` - Output stream for show statements
    pub fn new_with_config(config: &RuntimeConfig, output: Box<dyn Write>) -> Self {
        Self {
            builtins: Builtins::new(),
            heap: Heap::new(),
            stack: ExecutionStack::new(config.execution_stack_size),
            call_stack: CallStack::new(config.call_stack_size),
            function: Rc::new(Function::new(GLOBAL_FUNCTION_NAME, 0, 0)),
            locals: Vec::new(),
            ip: 0,
            gc_stats: config.gc_stats,
            output,
        }
    }

    pub fn builtins(&self) -> &Builtins {
        &self.builtins
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn gc_stats(&self) -> GcStats {
        self.heap.stats()
    }

    /// Current operand stack depth.
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    pub fn peek(&self) -> Option<&Value> {
        self.stack.peek()
    }

    /// Locals of the active function; after a run these are the global
    /// function's.
    pub fn locals(&self) -> &[Value] {
        &self.locals
    }

    /// Run a program to completion.
    pub fn run(&mut self, program: &Program) -> Result<(), VmError> {
        self.stack.clear();
        self.call_stack.clear();
        self.function = Rc::clone(&program.global);
        self.locals = vec![Value::uninit(); self.function.frame_size()];
        self.ip = 0;

        loop {
            let function = Rc::clone(&self.function);
            let flow = match function.code.get(self.ip) {
                Some(op) => {
                    trace!(function = %function.name, ip = self.ip, op = %op, "dispatch");
                    self.ip += 1;
                    self.execute_op(op, &function, program)?
                }
                // Fell off the end of the code; behave like RTRN.
                None => self.return_from_call()?,
            };
            if let ControlFlow::Halt = flow {
                break;
            }
        }

        if self.gc_stats {
            let stats = self.heap.stats();
            info!(
                cycles = stats.cycles,
                objects_freed = stats.objects_freed,
                live = self.heap.object_count(),
                "gc stats"
            );
        }
        Ok(())
    }

    fn execute_op(
        &mut self,
        op: &Op,
        function: &Rc<Function>,
        program: &Program,
    ) -> Result<ControlFlow, VmError> {
        match op {
            Op::LoadTrueLit => self.stack.push(Value::bool(true))?,
            Op::LoadFalseLit => self.stack.push(Value::bool(false))?,
            Op::LoadIntLit(n) => self.stack.push(Value::int(*n))?,
            Op::LoadFloatLit(f) => self.stack.push(Value::float(*f))?,

            // Class-scope accesses have no storage: they consume their
            // operands and loads yield an uninitialized value.
            Op::LoadVar { scope, slot } => match self.load_var(*scope, *slot)? {
                Some(value) if value.class.is_none() => {
                    return Err(VmError::UninitializedVariable);
                }
                Some(value) => self.stack.push(value)?,
                None => self.stack.push(Value::uninit())?,
            },
            Op::StorVar { scope, slot } => {
                let value = self.stack.pop()?;
                self.store_var(*scope, *slot, value)?;
            }
            Op::LoadAryVar { scope, slot, dims } => {
                let Some(array) = self.load_var(*scope, *slot)? else {
                    self.discard_operands(*dims)?;
                    self.stack.push(Value::uninit())?;
                    return Ok(ControlFlow::Continue);
                };
                let (r, offset) = self.array_index(&array, *dims)?;
                let value = self.heap.array(r)?.elements[offset].clone();
                self.stack.push(value)?;
            }
            Op::StorAryVar { scope, slot, dims } => {
                let Some(array) = self.load_var(*scope, *slot)? else {
                    self.discard_operands(*dims + 1)?;
                    return Ok(ControlFlow::Continue);
                };
                let (r, offset) = self.array_index(&array, *dims)?;
                let value = self.stack.pop()?;
                self.heap.array_mut(r)?.elements[offset] = value;
            }

            Op::Eql
            | Op::Neql
            | Op::Gtr
            | Op::Les
            | Op::GtrEql
            | Op::LesEql
            | Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::Mod => {
                if let Some(operator) = op.operator() {
                    self.calc(operator)?;
                }
            }

            Op::Jmp { label, kind } => {
                let taken = match kind {
                    JumpKind::Always => true,
                    JumpKind::IfTrue => self.pop_bool()?,
                    JumpKind::IfFalse => !self.pop_bool()?,
                };
                if taken {
                    self.jump(function, *label)?;
                }
            }
            Op::Lbl { .. } => {}

            Op::NewArray { dims } => {
                let mut extents = Vec::with_capacity(*dims);
                for _ in 0..*dims {
                    let extent = self.pop_index()?;
                    if extent < 0 {
                        return Err(VmError::InvalidDimension { extent });
                    }
                    extents.push(extent as usize);
                }
                let roots = Roots::new(&self.locals, self.call_stack.frames());
                let r = self.heap.alloc_array(extents, &roots)?;
                self.stack.push(Value::array(r))?;
            }
            Op::NewString => {
                let r = self.heap.alloc_string(String::new());
                self.stack.push(Value::string(r))?;
            }
            Op::NewHash => {
                let r = self.heap.alloc_hash();
                self.stack.push(Value::hash(r))?;
            }
            Op::NewObj { class } => {
                let class = program
                    .class(class)
                    .cloned()
                    .ok_or_else(|| VmError::UnknownClass {
                        name: class.clone(),
                    })?;
                let r = self.heap.alloc_instance(Rc::clone(&class));
                self.stack.push(Value::object(r, class))?;
            }

            Op::CallFunc {
                argc,
                wants_result,
                name,
            } => self.call_func(program, name, *argc, *wants_result)?,
            Op::Rtrn => return self.return_from_call(),

            Op::ShowType => {
                let value = self.stack.pop()?;
                self.show(&value)?;
            }
        }
        Ok(ControlFlow::Continue)
    }

    // =========================================================================
    // Variables
    // =========================================================================

    /// Read a variable. Class-scope slots yield `None`.
    fn load_var(&self, scope: VarScope, slot: usize) -> Result<Option<Value>, VmError> {
        match scope {
            VarScope::Local => self
                .locals
                .get(slot)
                .cloned()
                .map(Some)
                .ok_or(VmError::InvalidSlot { slot }),
            VarScope::Instance => {
                let r = self.receiver_ref()?;
                self.heap
                    .instance(r)?
                    .slots
                    .get(slot)
                    .cloned()
                    .map(Some)
                    .ok_or(VmError::InvalidSlot { slot })
            }
            VarScope::Class => {
                // TODO: class-scope slots need a per-class value table on `Class`.
                warn!(slot, "class-scope variable access is not supported");
                Ok(None)
            }
        }
    }

    fn store_var(&mut self, scope: VarScope, slot: usize, value: Value) -> Result<(), VmError> {
        let target = match scope {
            VarScope::Local => self.locals.get_mut(slot),
            VarScope::Instance => {
                let r = self.receiver_ref()?;
                self.heap.instance_mut(r)?.slots.get_mut(slot)
            }
            VarScope::Class => {
                warn!(slot, "class-scope variable access is not supported");
                return Ok(());
            }
        };
        *target.ok_or(VmError::InvalidSlot { slot })? = value;
        Ok(())
    }

    fn receiver_ref(&self) -> Result<super::GcRef, VmError> {
        match self.locals.first().map(|v| v.kind) {
            Some(ValueKind::Object(r)) => Ok(r),
            _ => Err(VmError::MissingReceiver),
        }
    }

    /// Pop `dims` indices, most significant first, and resolve them to an
    /// element offset in `array`.
    fn array_index(&mut self, array: &Value, dims: usize) -> Result<(super::GcRef, usize), VmError> {
        let ValueKind::Array(r) = array.kind else {
            return Err(VmError::TypeMismatch {
                expected: "array",
                found: array.type_name(),
            });
        };
        let mut indices = Vec::with_capacity(dims);
        for _ in 0..dims {
            indices.push(self.pop_index()?);
        }
        let offset = self.heap.array(r)?.offset(&indices)?;
        Ok((r, offset))
    }

    fn pop_index(&mut self) -> Result<i64, VmError> {
        let value = self.stack.pop()?;
        match value.kind {
            ValueKind::Int(n) => Ok(n),
            ValueKind::Float(f) => Ok(f as i64),
            _ => Err(VmError::TypeMismatch {
                expected: "integer",
                found: value.type_name(),
            }),
        }
    }

    fn discard_operands(&mut self, count: usize) -> Result<(), VmError> {
        for _ in 0..count {
            self.stack.pop()?;
        }
        Ok(())
    }

    fn pop_bool(&mut self) -> Result<bool, VmError> {
        self.stack.pop()?.as_bool().ok_or(VmError::ExpectedBoolean)
    }

    // =========================================================================
    // Control flow
    // =========================================================================

    fn jump(&mut self, function: &Function, label: i64) -> Result<(), VmError> {
        let target = function
            .label_position(label)
            .ok_or(VmError::InvalidLabel { label })?;
        if target < self.ip - 1 {
            if let Some(Op::Lbl { hits, .. }) = function.code.get(target) {
                hits.set(hits.get() + 1);
            }
        }
        self.ip = target;
        Ok(())
    }

    /// Dispatch a binary operator on the left operand's class.
    fn calc(&mut self, operator: Operator) -> Result<(), VmError> {
        let left = self.stack.pop()?;
        match &left.class {
            Some(ClassRef::Builtin(id)) => {
                let right = self.stack.pop()?;
                let class = self.builtins.class(*id);
                let op = class
                    .operation(operator)
                    .ok_or_else(|| VmError::InvalidOperation {
                        class: id.name().to_string(),
                        operator,
                    })?;
                let result = op(operator, &left, &right, &mut self.heap)?;
                self.stack.push(result)
            }
            Some(ClassRef::User(class)) => {
                let callee = class.operation(operator).cloned().ok_or_else(|| {
                    VmError::UnknownFunction {
                        name: format!("{}::operator{}", class.name, operator.symbol()),
                    }
                })?;
                self.call(callee, left, 1, true)
            }
            None => Err(VmError::InvalidOperation {
                class: left.type_name().to_string(),
                operator,
            }),
        }
    }

    /// Resolve and invoke the callee of a `CALL_FUNC`.
    ///
    /// Receivers of a user class dispatch through the class's method table.
    /// Anything else tries a free function first and then the receiver's
    /// built-in class.
    fn call_func(
        &mut self,
        program: &Program,
        name: &str,
        argc: usize,
        wants_result: bool,
    ) -> Result<(), VmError> {
        let receiver = self.stack.pop()?;
        if let Some(class) = receiver.user_class() {
            let callee = class
                .method(name)
                .cloned()
                .ok_or_else(|| VmError::UnknownFunction {
                    name: format!("{}.{}", class.name, name),
                })?;
            return self.call(callee, receiver, argc, wants_result);
        }

        if let Some(callee) = program.function(name) {
            return self.call(Rc::clone(callee), receiver, argc, wants_result);
        }

        let Some(id) = receiver.builtin_class() else {
            return Err(VmError::UninitializedReceiver {
                name: name.to_string(),
            });
        };
        let method = self
            .builtins
            .class(id)
            .method(name)
            .ok_or_else(|| VmError::UnknownFunction {
                name: format!("{}.{}", id.name(), name),
            })?;
        let depth = self.stack.len();
        method(&receiver, &mut self.stack, argc, &self.heap)?;
        if !wants_result && self.stack.len() > depth {
            self.stack.pop()?;
        }
        Ok(())
    }

    /// Push a frame for the caller and enter `callee` with `receiver` in
    /// slot 0.
    fn call(
        &mut self,
        callee: Rc<Function>,
        receiver: Value,
        argc: usize,
        wants_result: bool,
    ) -> Result<(), VmError> {
        if callee.param_count != argc {
            return Err(VmError::ArityMismatch {
                name: callee.qualified_name(),
                expected: callee.param_count,
                got: argc,
            });
        }
        debug!(
            callee = %callee.qualified_name(),
            depth = self.call_stack.len() + 1,
            "call"
        );

        let mut locals = vec![Value::uninit(); callee.frame_size()];
        locals[0] = receiver;
        let orphan_return = callee.returns_value() && !wants_result;

        let caller_locals = std::mem::replace(&mut self.locals, locals);
        let caller = std::mem::replace(&mut self.function, callee);
        self.call_stack
            .push(Frame::new(caller, self.ip, caller_locals, orphan_return))?;
        self.ip = 0;
        Ok(())
    }

    fn return_from_call(&mut self) -> Result<ControlFlow, VmError> {
        let Some(frame) = self.call_stack.pop() else {
            return Ok(ControlFlow::Halt);
        };
        debug!(
            callee = %self.function.qualified_name(),
            caller = %frame.function.name,
            orphan = frame.orphan_return,
            "return"
        );
        self.function = frame.function;
        self.locals = frame.locals;
        self.ip = frame.ip;
        if frame.orphan_return {
            self.stack.pop()?;
        }
        Ok(ControlFlow::Continue)
    }

    // =========================================================================
    // Output
    // =========================================================================

    fn show(&mut self, value: &Value) -> Result<(), VmError> {
        let rendered = match value.kind {
            ValueKind::Uninit
            | ValueKind::Bool(_)
            | ValueKind::Int(_)
            | ValueKind::Char(_)
            | ValueKind::Byte(_) => value.to_string(),
            ValueKind::Float(f) => format_float(f),
            ValueKind::Str(r) => self.heap.string(r)?.to_string(),
            ValueKind::Array(_) | ValueKind::Hash(_) | ValueKind::Object(_) => {
                return Err(VmError::InvalidDumpValue {
                    type_name: value.type_name(),
                });
            }
        };
        writeln!(self.output, "type={}, value={}", value.type_name(), rendered)
            .map_err(|e| VmError::Output(e.to_string()))
    }
}

impl Default for VM {
    fn default() -> Self {
        Self::new()
    }
}

/// An in-memory output sink whose contents stay readable after the VM that
/// writes to it has taken ownership of a clone.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    buffer: Rc<RefCell<Vec<u8>>>,
}

impl CapturedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.borrow()).into_owned()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::vm::Class;

    fn global(local_count: usize, code: Vec<Op>) -> Program {
        Program::new(Function::with_code(GLOBAL_FUNCTION_NAME, 0, local_count, code))
    }

    fn run_program(program: &Program) -> (VM, Result<(), VmError>, CapturedOutput) {
        let output = CapturedOutput::new();
        let mut vm = VM::with_output(Box::new(output.clone()));
        let result = vm.run(program);
        (vm, result, output)
    }

    fn local(slot: usize) -> (VarScope, usize) {
        (VarScope::Local, slot)
    }

    fn load(slot: usize) -> Op {
        let (scope, slot) = local(slot);
        Op::LoadVar { scope, slot }
    }

    fn store(slot: usize) -> Op {
        let (scope, slot) = local(slot);
        Op::StorVar { scope, slot }
    }

    #[test]
    fn test_show_primitives() {
        let program = global(
            0,
            vec![
                Op::LoadIntLit(5),
                Op::ShowType,
                Op::LoadTrueLit,
                Op::ShowType,
                Op::LoadFloatLit(2.5),
                Op::ShowType,
                Op::Rtrn,
            ],
        );
        let (vm, result, output) = run_program(&program);
        result.unwrap();
        assert_eq!(
            output.contents(),
            "type=integer, value=5\ntype=boolean, value=true\ntype=float, value=2.5\n"
        );
        assert_eq!(vm.stack_depth(), 0);
    }

    #[test]
    fn test_operands_pop_left_first() {
        // 10 - 4: right pushed first, left on top.
        let program = global(
            0,
            vec![Op::LoadIntLit(4), Op::LoadIntLit(10), Op::Sub, Op::Rtrn],
        );
        let (vm, result, _) = run_program(&program);
        result.unwrap();
        assert_eq!(vm.peek(), Some(&Value::int(6)));
    }

    #[test]
    fn test_locals_sized_with_receiver_slot() {
        let program = global(3, vec![Op::Rtrn]);
        let (vm, result, _) = run_program(&program);
        result.unwrap();
        assert_eq!(vm.locals().len(), 4);
    }

    #[test]
    fn test_load_uninitialized_variable_is_fatal() {
        let program = global(1, vec![load(1), Op::Rtrn]);
        let (_, result, _) = run_program(&program);
        assert_eq!(result, Err(VmError::UninitializedVariable));
    }

    fn matrix_program(tail: Vec<Op>) -> Program {
        // a = Array.new[3, 4]; extents are pushed least significant first.
        let mut code = vec![
            Op::LoadIntLit(4),
            Op::LoadIntLit(3),
            Op::NewArray { dims: 2 },
            store(1),
        ];
        code.extend(tail);
        code.push(Op::Rtrn);
        global(1, code)
    }

    #[test]
    fn test_array_store_is_row_major() {
        // a[1, 2] = 7
        let program = matrix_program(vec![
            Op::LoadIntLit(7),
            Op::LoadIntLit(2),
            Op::LoadIntLit(1),
            Op::StorAryVar {
                scope: VarScope::Local,
                slot: 1,
                dims: 2,
            },
        ]);
        let (vm, result, _) = run_program(&program);
        result.unwrap();

        let ValueKind::Array(r) = vm.locals()[1].kind else {
            panic!("expected array");
        };
        let array = vm.heap().array(r).unwrap();
        assert_eq!(array.dimensions, vec![3, 4]);
        assert_eq!(array.elements.len(), 12);
        assert_eq!(array.elements[6], Value::int(7));
    }

    #[test]
    fn test_array_index_out_of_bounds() {
        let program = matrix_program(vec![
            Op::LoadIntLit(0),
            Op::LoadIntLit(3),
            Op::LoadAryVar {
                scope: VarScope::Local,
                slot: 1,
                dims: 2,
            },
        ]);
        let (_, result, _) = run_program(&program);
        assert_eq!(
            result,
            Err(VmError::IndexOutOfBounds { index: 12, size: 12 })
        );
    }

    #[test]
    fn test_array_dimension_mismatch() {
        let program = matrix_program(vec![
            Op::LoadIntLit(0),
            Op::LoadAryVar {
                scope: VarScope::Local,
                slot: 1,
                dims: 1,
            },
        ]);
        let (_, result, _) = run_program(&program);
        assert_eq!(
            result,
            Err(VmError::DimensionMismatch {
                expected: 2,
                got: 1
            })
        );
    }

    #[test]
    fn test_backward_jump_counts_hits() {
        // i = 0; while i < 3 { i = i + 1 }
        let program = global(
            1,
            vec![
                Op::LoadIntLit(0),
                store(1),
                Op::label(0),
                Op::LoadIntLit(3),
                load(1),
                Op::Les,
                Op::Jmp {
                    label: i64::MIN,
                    kind: JumpKind::IfFalse,
                },
                Op::LoadIntLit(1),
                load(1),
                Op::Add,
                store(1),
                Op::Jmp {
                    label: 0,
                    kind: JumpKind::Always,
                },
                Op::label(i64::MIN),
                Op::Rtrn,
            ],
        );
        let (vm, result, _) = run_program(&program);
        result.unwrap();
        assert_eq!(vm.locals()[1], Value::int(3));

        let Op::Lbl { hits, .. } = &program.global.code[2] else {
            panic!("expected label");
        };
        assert_eq!(hits.get(), 3);
        let Op::Lbl { hits, .. } = &program.global.code[12] else {
            panic!("expected label");
        };
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn test_unknown_label_is_fatal() {
        let program = global(
            0,
            vec![
                Op::Jmp {
                    label: 42,
                    kind: JumpKind::Always,
                },
                Op::Rtrn,
            ],
        );
        let (_, result, _) = run_program(&program);
        assert_eq!(result, Err(VmError::InvalidLabel { label: 42 }));
    }

    #[test]
    fn test_conditional_jump_requires_boolean() {
        let program = global(
            0,
            vec![
                Op::LoadIntLit(1),
                Op::Jmp {
                    label: 0,
                    kind: JumpKind::IfTrue,
                },
                Op::label(0),
                Op::Rtrn,
            ],
        );
        let (_, result, _) = run_program(&program);
        assert_eq!(result, Err(VmError::ExpectedBoolean));
    }

    fn seven_program(wants_result: bool) -> Program {
        let mut program = global(
            0,
            vec![
                Op::LoadIntLit(0),
                Op::CallFunc {
                    argc: 0,
                    wants_result,
                    name: "seven:0".to_string(),
                },
                Op::Rtrn,
            ],
        );
        program.add_function(
            Function::with_code("seven", 0, 0, vec![Op::LoadIntLit(7), Op::Rtrn]).returning_value(),
        );
        program
    }

    #[test]
    fn test_orphan_return_is_discarded() {
        let (vm, result, _) = run_program(&seven_program(false));
        result.unwrap();
        assert_eq!(vm.stack_depth(), 0);
    }

    #[test]
    fn test_requested_return_is_kept() {
        let (vm, result, _) = run_program(&seven_program(true));
        result.unwrap();
        assert_eq!(vm.peek(), Some(&Value::int(7)));
    }

    #[test]
    fn test_arity_mismatch_is_fatal() {
        let mut program = seven_program(true);
        program.global = Rc::new(Function::with_code(
            GLOBAL_FUNCTION_NAME,
            0,
            0,
            vec![
                Op::LoadIntLit(1),
                Op::LoadIntLit(0),
                Op::CallFunc {
                    argc: 1,
                    wants_result: true,
                    name: "seven:0".to_string(),
                },
                Op::Rtrn,
            ],
        ));
        let (_, result, _) = run_program(&program);
        assert!(matches!(result, Err(VmError::ArityMismatch { .. })));
    }

    #[test]
    fn test_unknown_function_is_fatal() {
        let program = global(
            0,
            vec![
                Op::LoadIntLit(0),
                Op::CallFunc {
                    argc: 0,
                    wants_result: false,
                    name: "missing:0".to_string(),
                },
                Op::Rtrn,
            ],
        );
        let (_, result, _) = run_program(&program);
        assert!(matches!(result, Err(VmError::UnknownFunction { .. })));
    }

    #[test]
    fn test_builtin_method_call() {
        let program = global(
            0,
            vec![
                Op::LoadIntLit(-4),
                Op::CallFunc {
                    argc: 0,
                    wants_result: true,
                    name: "abs:0".to_string(),
                },
                Op::ShowType,
                Op::LoadIntLit(-4),
                Op::CallFunc {
                    argc: 0,
                    wants_result: false,
                    name: "abs:0".to_string(),
                },
                Op::Rtrn,
            ],
        );
        let (vm, result, output) = run_program(&program);
        result.unwrap();
        assert_eq!(output.contents(), "type=integer, value=4\n");
        assert_eq!(vm.stack_depth(), 0);
    }

    #[test]
    fn test_stack_overflow_is_fatal() {
        let config = RuntimeConfig {
            execution_stack_size: 2,
            ..RuntimeConfig::default()
        };
        let mut vm = VM::new_with_config(&config, Box::new(io::sink()));
        let program = global(
            0,
            vec![
                Op::LoadIntLit(1),
                Op::LoadIntLit(2),
                Op::LoadIntLit(3),
                Op::Rtrn,
            ],
        );
        assert_eq!(vm.run(&program), Err(VmError::StackOverflow));
    }

    #[test]
    fn test_call_stack_overflow_is_fatal() {
        let config = RuntimeConfig {
            call_stack_size: 4,
            ..RuntimeConfig::default()
        };
        let call_self = Op::CallFunc {
            argc: 0,
            wants_result: false,
            name: "forever:0".to_string(),
        };
        let mut program = global(0, vec![Op::LoadIntLit(0), call_self.clone(), Op::Rtrn]);
        program.add_function(Function::with_code(
            "forever",
            0,
            0,
            vec![Op::LoadIntLit(0), call_self, Op::Rtrn],
        ));
        let mut vm = VM::new_with_config(&config, Box::new(io::sink()));
        assert_eq!(vm.run(&program), Err(VmError::CallStackOverflow));
    }

    #[test]
    fn test_user_operator_dispatch() {
        let mut class = Class::new("Money", 0);
        let mut plus = Function::with_code(
            "",
            1,
            1,
            vec![store(1), Op::LoadIntLit(42), Op::Rtrn],
        )
        .returning_value();
        plus.operator = Some(Operator::Add);
        class.add_function(plus);

        let mut program = global(
            0,
            vec![
                Op::LoadIntLit(1),
                Op::NewObj {
                    class: "Money".to_string(),
                },
                Op::Add,
                Op::ShowType,
                Op::Rtrn,
            ],
        );
        program.add_class(class);

        let (vm, result, output) = run_program(&program);
        result.unwrap();
        assert_eq!(output.contents(), "type=integer, value=42\n");
        assert_eq!(vm.stack_depth(), 0);
    }

    #[test]
    fn test_instance_variables_through_receiver() {
        let mut class = Class::new("Cell", 1);
        class.add_function(Function::with_code(
            "set",
            1,
            1,
            vec![
                store(1),
                load(1),
                Op::StorVar {
                    scope: VarScope::Instance,
                    slot: 0,
                },
                Op::Rtrn,
            ],
        ));
        class.add_function(
            Function::with_code(
                "get",
                0,
                0,
                vec![
                    Op::LoadVar {
                        scope: VarScope::Instance,
                        slot: 0,
                    },
                    Op::Rtrn,
                ],
            )
            .returning_value(),
        );

        let mut program = global(
            1,
            vec![
                Op::NewObj {
                    class: "Cell".to_string(),
                },
                store(1),
                Op::LoadIntLit(9),
                load(1),
                Op::CallFunc {
                    argc: 1,
                    wants_result: false,
                    name: "set:1".to_string(),
                },
                load(1),
                Op::CallFunc {
                    argc: 0,
                    wants_result: true,
                    name: "get:0".to_string(),
                },
                Op::ShowType,
                Op::Rtrn,
            ],
        );
        program.add_class(class);

        let (_, result, output) = run_program(&program);
        result.unwrap();
        assert_eq!(output.contents(), "type=integer, value=9\n");
    }

    #[test]
    fn test_unknown_class_is_fatal() {
        let program = global(
            0,
            vec![
                Op::NewObj {
                    class: "Ghost".to_string(),
                },
                Op::Rtrn,
            ],
        );
        let (_, result, _) = run_program(&program);
        assert_eq!(
            result,
            Err(VmError::UnknownClass {
                name: "Ghost".to_string()
            })
        );
    }

    #[test]
    fn test_show_string_and_array() {
        let program = global(
            0,
            vec![
                Op::LoadIntLit(12),
                Op::NewString,
                Op::Add,
                Op::ShowType,
                Op::LoadIntLit(1),
                Op::NewArray { dims: 1 },
                Op::ShowType,
                Op::Rtrn,
            ],
        );
        let (_, result, output) = run_program(&program);
        assert_eq!(output.contents(), "type=string, value=12\n");
        assert_eq!(
            result,
            Err(VmError::InvalidDumpValue { type_name: "array" })
        );
    }

    #[test]
    fn test_oversized_array_is_fatal() {
        let program = global(
            0,
            vec![
                Op::LoadIntLit(1 << 33),
                Op::LoadIntLit(1 << 33),
                Op::NewArray { dims: 2 },
                Op::Rtrn,
            ],
        );
        let (vm, result, _) = run_program(&program);
        assert_eq!(
            result,
            Err(VmError::ArrayTooLarge {
                dimensions: vec![1 << 33, 1 << 33]
            })
        );
        assert_eq!(vm.heap().object_count(), 0);
    }

    #[test]
    fn test_array_without_dimensions_is_fatal() {
        let program = global(
            1,
            vec![
                Op::NewArray { dims: 0 },
                store(1),
                Op::LoadAryVar {
                    scope: VarScope::Local,
                    slot: 1,
                    dims: 0,
                },
                Op::Rtrn,
            ],
        );
        let (_, result, _) = run_program(&program);
        assert_eq!(result, Err(VmError::MissingDimensions));
    }

    #[test]
    fn test_negative_extent_is_fatal() {
        let program = global(0, vec![Op::LoadIntLit(-1), Op::NewArray { dims: 1 }, Op::Rtrn]);
        let (_, result, _) = run_program(&program);
        assert_eq!(result, Err(VmError::InvalidDimension { extent: -1 }));
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_class_scope_access_is_stack_neutral() {
        let class = VarScope::Class;
        let program = global(
            0,
            vec![
                Op::LoadIntLit(7),
                Op::StorVar { scope: class, slot: 0 },
                Op::LoadVar { scope: class, slot: 0 },
                Op::LoadIntLit(1),
                Op::LoadIntLit(0),
                Op::LoadAryVar {
                    scope: class,
                    slot: 0,
                    dims: 2,
                },
                Op::LoadIntLit(9),
                Op::LoadIntLit(0),
                Op::StorAryVar {
                    scope: class,
                    slot: 0,
                    dims: 1,
                },
                Op::Rtrn,
            ],
        );

        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        let (vm, result, _) =
            tracing::subscriber::with_default(subscriber, || run_program(&program));
        result.unwrap();

        // One placeholder each from LOAD_VAR and LOAD_ARY_VAR.
        assert_eq!(vm.stack_depth(), 2);
        assert_eq!(vm.peek(), Some(&Value::uninit()));

        let logged = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert_eq!(
            logged
                .matches("class-scope variable access is not supported")
                .count(),
            4
        );
    }
}
