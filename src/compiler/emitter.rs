use tracing::debug;

use crate::compiler::ast::{
    AssignOp, BinaryOp, Call, CallTarget, ElseIf, Expr, ExprKind, ParsedClass, ParsedFunction,
    ParsedProgram, Span, Stmt, StmtKind, Target, VarRef,
};
use crate::compiler::error::{EmitError, EmitErrors};
use crate::vm::{
    BuiltinClassId, Builtins, Class, Function, GLOBAL_FUNCTION_NAME, JumpKind, Op, Operator,
    Program, ReturnKind, VarScope, qualified_name,
};

/// Translates a resolved syntax tree into a `Program`.
///
/// Structured control flow becomes jumps to synthesized labels. Labels come
/// from two id spaces that never meet: one counts up from 0, the other up
/// from `i64::MIN`. Errors are collected rather than returned on the first
/// one, and no program is produced if any were recorded.
pub struct Emitter<'a> {
    builtins: &'a Builtins,
    errors: Vec<EmitError>,
    start_label_id: i64,
    end_label_id: i64,
    last_label_id: i64,
    returns: ReturnKind,
}

impl<'a> Emitter<'a> {
    pub fn new(builtins: &'a Builtins) -> Self {
        Self {
            builtins,
            errors: Vec::new(),
            start_label_id: 0,
            end_label_id: i64::MIN,
            last_label_id: 0,
            returns: ReturnKind::Unset,
        }
    }

    /// The most recent label id issued from the ascending space, or 0.
    pub fn last_label_id(&self) -> i64 {
        self.last_label_id
    }

    pub fn emit(&mut self, program: &ParsedProgram) -> Result<Program, EmitErrors> {
        self.errors.clear();

        let mut compiled = Program::new(self.emit_global(program));
        for function in &program.functions {
            let function = self.emit_function(function);
            compiled.add_function(function);
        }
        for class in &program.classes {
            compiled.add_class(self.emit_class(class));
        }

        if !self.errors.is_empty() {
            return Err(EmitErrors::new(
                &program.file,
                std::mem::take(&mut self.errors),
            ));
        }
        debug!(
            file = %program.file,
            functions = compiled.functions.len(),
            classes = compiled.classes.len(),
            "emitted program"
        );
        Ok(compiled)
    }

    fn error(&mut self, span: Span, message: impl Into<String>) {
        self.errors.push(EmitError {
            line: span.line,
            message: message.into(),
        });
    }

    fn next_start_id(&mut self) -> i64 {
        let id = self.start_label_id;
        self.start_label_id += 1;
        self.last_label_id = id;
        id
    }

    fn next_end_id(&mut self) -> i64 {
        let id = self.end_label_id;
        self.end_label_id += 1;
        id
    }

    // =========================================================================
    // Functions and classes
    // =========================================================================

    fn emit_global(&mut self, program: &ParsedProgram) -> Function {
        self.returns = ReturnKind::Unset;
        let mut code = Vec::new();
        self.emit_block(&program.global, &mut code);
        code.push(Op::Rtrn);

        let mut function =
            Function::with_code(GLOBAL_FUNCTION_NAME, 0, program.local_count, code);
        function.returns = ReturnKind::NoValue;
        function
    }

    fn emit_class(&mut self, class: &ParsedClass) -> Class {
        let mut compiled = Class::new(class.name.clone(), class.instance_count);
        for method in &class.methods {
            compiled.add_function(self.emit_function(method));
        }
        compiled
    }

    fn emit_function(&mut self, function: &ParsedFunction) -> Function {
        self.returns = ReturnKind::Unset;
        let mut code = Vec::new();

        // Arguments arrive with the first parameter on top.
        for param in &function.params {
            code.push(Op::StorVar {
                scope: param.kind.scope(),
                slot: param.slot,
            });
        }
        self.emit_block(&function.body, &mut code);

        if function.is_constructor {
            code.push(Op::LoadVar {
                scope: VarScope::Local,
                slot: 0,
            });
        }
        if !matches!(code.last(), Some(Op::Rtrn)) {
            code.push(Op::Rtrn);
            if self.returns == ReturnKind::Value {
                let span = function.body.last().map_or(function.span, |s| s.span);
                self.error(span, "Last statement must return a value");
            }
        }

        let operator = match function.operator {
            Some(op) => {
                let operator = to_operator(op);
                if operator.is_none() {
                    self.error(function.span, format!("Operator {:?} cannot be overloaded", op));
                }
                operator
            }
            None => None,
        };

        let mut compiled = Function::with_code(
            function.name.clone(),
            function.params.len(),
            function.local_count,
            code,
        );
        compiled.operator = operator;
        compiled.returns = if function.is_constructor {
            ReturnKind::Value
        } else {
            self.returns
        };
        compiled
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn emit_block(&mut self, block: &[Stmt], code: &mut Vec<Op>) {
        for stmt in block {
            self.emit_statement(stmt, code);
        }
    }

    fn emit_statement(&mut self, stmt: &Stmt, code: &mut Vec<Op>) {
        match &stmt.kind {
            StmtKind::Assign { target, op, value } => {
                self.emit_assignment(target, *op, value, stmt.span, code)
            }
            StmtKind::Declaration(_) => {}
            StmtKind::Return(value) => {
                let kind = match value {
                    Some(expr) => {
                        self.emit_expr(expr, code);
                        ReturnKind::Value
                    }
                    None => ReturnKind::NoValue,
                };
                match self.returns {
                    ReturnKind::Unset => self.returns = kind,
                    seen if seen != kind => {
                        self.error(stmt.span, "Not all statements return a value")
                    }
                    _ => {}
                }
                code.push(Op::Rtrn);
            }
            StmtKind::Call(call) => self.emit_call(call, call.returns_value, code),
            StmtKind::If {
                cond,
                then_block,
                else_ifs,
                else_block,
            } => self.emit_if(cond, then_block, else_ifs, else_block.as_deref(), code),
            StmtKind::While { cond, body } => {
                let top = self.next_start_id();
                let end = self.next_end_id();
                code.push(Op::label(top));
                self.emit_expr(cond, code);
                code.push(jump(end, JumpKind::IfFalse));
                self.emit_block(body, code);
                code.push(jump(top, JumpKind::Always));
                code.push(Op::label(end));
            }
            StmtKind::DoWhile { body, cond } => {
                let top = self.next_start_id();
                code.push(Op::label(top));
                self.emit_block(body, code);
                self.emit_expr(cond, code);
                code.push(jump(top, JumpKind::IfTrue));
            }
            StmtKind::Show(expr) => {
                // Calls in expression position always leave their result.
                self.emit_expr(expr, code);
                code.push(Op::ShowType);
            }
        }
    }

    fn emit_if(
        &mut self,
        cond: &Expr,
        then_block: &[Stmt],
        else_ifs: &[ElseIf],
        else_block: Option<&[Stmt]>,
        code: &mut Vec<Op>,
    ) {
        // Every `if` takes a start id; only else branches use it.
        let end = self.next_end_id();
        let mut next = self.next_start_id();
        self.emit_expr(cond, code);

        if else_ifs.is_empty() && else_block.is_none() {
            code.push(jump(end, JumpKind::IfFalse));
            self.emit_block(then_block, code);
        } else {
            code.push(jump(next, JumpKind::IfFalse));
            self.emit_block(then_block, code);
            code.push(jump(end, JumpKind::Always));

            for else_if in else_ifs {
                code.push(Op::label(next));
                self.emit_expr(&else_if.cond, code);
                next = self.next_start_id();
                code.push(jump(next, JumpKind::IfFalse));
                self.emit_block(&else_if.block, code);
                code.push(jump(end, JumpKind::Always));
            }

            code.push(Op::label(next));
            if let Some(block) = else_block {
                self.emit_block(block, code);
            }
        }
        code.push(Op::label(end));
    }

    fn emit_assignment(
        &mut self,
        target: &Target,
        op: AssignOp,
        value: &Expr,
        span: Span,
        code: &mut Vec<Op>,
    ) {
        if let ExprKind::List(items) = &value.kind {
            if op == AssignOp::Assign && target.indices.is_empty() {
                self.emit_list_assignment(&target.var, items, span, code);
                return;
            }
        }

        self.emit_expr(value, code);
        let operator = match op {
            AssignOp::Assign => None,
            AssignOp::Add => Some(Op::Add),
            AssignOp::Sub => Some(Op::Sub),
            AssignOp::Mul => Some(Op::Mul),
            AssignOp::Div => Some(Op::Div),
        };
        if let Some(operator) = operator {
            // The current value becomes the left operand.
            self.emit_variable(&target.var, &target.indices, code);
            code.push(operator);
        }

        let scope = target.var.kind.scope();
        let slot = target.var.slot;
        if target.indices.is_empty() {
            code.push(Op::StorVar { scope, slot });
        } else {
            self.emit_indices(&target.indices, code);
            code.push(Op::StorAryVar {
                scope,
                slot,
                dims: target.indices.len(),
            });
        }
    }

    /// `a = [x, y, z]`: allocate a one-dimensional array, bind it, then
    /// store each element.
    fn emit_list_assignment(&mut self, var: &VarRef, items: &[Expr], span: Span, code: &mut Vec<Op>) {
        if items.is_empty() {
            self.error(span, "List literal must contain at least one element");
            return;
        }
        let scope = var.kind.scope();
        code.push(Op::LoadIntLit(items.len() as i64));
        code.push(Op::NewArray { dims: 1 });
        code.push(Op::StorVar {
            scope,
            slot: var.slot,
        });
        for (i, item) in items.iter().enumerate() {
            self.emit_expr(item, code);
            code.push(Op::LoadIntLit(i as i64));
            code.push(Op::StorAryVar {
                scope,
                slot: var.slot,
                dims: 1,
            });
        }
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn emit_expr(&mut self, expr: &Expr, code: &mut Vec<Op>) {
        match &expr.kind {
            ExprKind::Bool(true) => code.push(Op::LoadTrueLit),
            ExprKind::Bool(false) => code.push(Op::LoadFalseLit),
            ExprKind::Int(n) => code.push(Op::LoadIntLit(*n)),
            ExprKind::Float(f) => code.push(Op::LoadFloatLit(*f)),
            ExprKind::Var(var) => self.emit_variable(var, &[], code),
            ExprKind::SelfRef => code.push(Op::LoadVar {
                scope: VarScope::Local,
                slot: 0,
            }),
            ExprKind::Index { var, indices } => self.emit_variable(var, indices, code),
            ExprKind::NewArray { dimensions } => {
                if dimensions.is_empty() {
                    self.error(expr.span, "Array size not specified");
                    return;
                }
                self.emit_indices(dimensions, code);
                code.push(Op::NewArray {
                    dims: dimensions.len(),
                });
            }
            ExprKind::Binary { op, left, right } => self.emit_binary(*op, left, right, code),
            ExprKind::Call(call) => self.emit_call(call, true, code),
            ExprKind::List(_) => {
                self.error(expr.span, "List literal must be assigned to a variable");
            }
            ExprKind::Map(entries) => {
                if entries.is_empty() {
                    code.push(Op::NewHash);
                } else {
                    self.error(expr.span, "Hash literal entries are not supported");
                }
            }
        }
    }

    fn emit_variable(&mut self, var: &VarRef, indices: &[Expr], code: &mut Vec<Op>) {
        let scope = var.kind.scope();
        if indices.is_empty() {
            code.push(Op::LoadVar {
                scope,
                slot: var.slot,
            });
        } else {
            self.emit_indices(indices, code);
            code.push(Op::LoadAryVar {
                scope,
                slot: var.slot,
                dims: indices.len(),
            });
        }
    }

    /// Push indices or extents so the most significant one ends up on top.
    fn emit_indices(&mut self, indices: &[Expr], code: &mut Vec<Op>) {
        for index in indices.iter().rev() {
            self.emit_expr(index, code);
        }
    }

    /// Right operand first, then left, so the left operand is on top.
    ///
    /// `&&` and `||` always evaluate the right operand; only the left one is
    /// skipped when the right operand decides the result. A true right
    /// operand makes `||` yield `true`, not `false`.
    fn emit_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr, code: &mut Vec<Op>) {
        match op {
            BinaryOp::And | BinaryOp::Or => {
                let next = self.next_end_id();
                let end = self.next_end_id();
                let (kind, decided) = if op == BinaryOp::And {
                    (JumpKind::IfTrue, Op::LoadFalseLit)
                } else {
                    (JumpKind::IfFalse, Op::LoadTrueLit)
                };
                self.emit_expr(right, code);
                code.push(jump(next, kind));
                code.push(decided);
                code.push(jump(end, JumpKind::Always));
                code.push(Op::label(next));
                self.emit_expr(left, code);
                code.push(Op::label(end));
            }
            _ => {
                self.emit_expr(right, code);
                self.emit_expr(left, code);
                if let Some(operator) = to_operator(op) {
                    code.push(operator.op());
                }
            }
        }
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Emit a call and any chained calls on its result.
    ///
    /// Argument lists are pushed from the last link back to the first so
    /// each link finds its arguments directly beneath the previous result.
    fn emit_call(&mut self, call: &Call, wants_result: bool, code: &mut Vec<Op>) {
        for link in call.chain.iter().rev() {
            self.emit_args(&link.args, code);
        }
        let first_wants = wants_result || !call.chain.is_empty();

        match &call.target {
            CallTarget::Function { name, args } => {
                self.emit_args(args, code);
                code.push(Op::LoadIntLit(0));
                code.push(call_func(name, args.len(), first_wants));
            }
            CallTarget::Method {
                receiver,
                name,
                args,
            } => {
                self.emit_args(args, code);
                self.emit_expr(receiver, code);
                code.push(call_func(name, args.len(), first_wants));
            }
            CallTarget::New { class, args } => match self.builtins.lookup(class) {
                Some(id @ (BuiltinClassId::String | BuiltinClassId::Hash)) => {
                    if !args.is_empty() {
                        self.error(
                            args[0].span,
                            format!("{}.new takes no arguments", id.name()),
                        );
                    }
                    code.push(if id == BuiltinClassId::String {
                        Op::NewString
                    } else {
                        Op::NewHash
                    });
                }
                Some(id) => {
                    let span = args.first().map_or(Span::default(), |a| a.span);
                    self.error(span, format!("Cannot instantiate built-in class {}", id.name()));
                }
                None => {
                    self.emit_args(args, code);
                    code.push(Op::NewObj {
                        class: class.clone(),
                    });
                    code.push(call_func("new", args.len(), first_wants));
                }
            },
        }

        let last = call.chain.len().saturating_sub(1);
        for (i, link) in call.chain.iter().enumerate() {
            let wants = if i == last { wants_result } else { true };
            code.push(call_func(&link.name, link.args.len(), wants));
        }
    }

    fn emit_args(&mut self, args: &[Expr], code: &mut Vec<Op>) {
        for arg in args.iter().rev() {
            self.emit_expr(arg, code);
        }
    }
}

fn jump(label: i64, kind: JumpKind) -> Op {
    Op::Jmp { label, kind }
}

fn call_func(name: &str, argc: usize, wants_result: bool) -> Op {
    Op::CallFunc {
        argc,
        wants_result,
        name: qualified_name(name, argc),
    }
}

fn to_operator(op: BinaryOp) -> Option<Operator> {
    match op {
        BinaryOp::Add => Some(Operator::Add),
        BinaryOp::Sub => Some(Operator::Sub),
        BinaryOp::Mul => Some(Operator::Mul),
        BinaryOp::Div => Some(Operator::Div),
        BinaryOp::Mod => Some(Operator::Mod),
        BinaryOp::Eql => Some(Operator::Eql),
        BinaryOp::Neql => Some(Operator::Neql),
        BinaryOp::Les => Some(Operator::Les),
        BinaryOp::Gtr => Some(Operator::Gtr),
        BinaryOp::LesEql => Some(Operator::LesEql),
        BinaryOp::GtrEql => Some(Operator::GtrEql),
        BinaryOp::And | BinaryOp::Or => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emit(program: &ParsedProgram) -> Result<Program, EmitErrors> {
        let builtins = Builtins::new();
        Emitter::new(&builtins).emit(program)
    }

    fn emit_global(stmts: Vec<Stmt>, local_count: usize) -> Vec<Op> {
        let mut program = ParsedProgram::new("test.kes");
        program.global = stmts;
        program.local_count = local_count;
        emit(&program).unwrap().global.code.clone()
    }

    fn x() -> VarRef {
        VarRef::local("x", 1)
    }

    fn call(name: &str, argc: usize, wants_result: bool) -> Op {
        call_func(name, argc, wants_result)
    }

    #[test]
    fn test_empty_global_ends_in_return() {
        assert_eq!(emit_global(vec![], 0), vec![Op::Rtrn]);
    }

    #[test]
    fn test_binary_emits_right_then_left() {
        let code = emit_global(
            vec![Stmt::show(Expr::binary(BinaryOp::Add, Expr::int(2), Expr::int(3)))],
            0,
        );
        assert_eq!(
            code,
            vec![
                Op::LoadIntLit(3),
                Op::LoadIntLit(2),
                Op::Add,
                Op::ShowType,
                Op::Rtrn
            ]
        );
    }

    #[test]
    fn test_compound_assignment_loads_current_value_as_left() {
        let code = emit_global(
            vec![Stmt::compound(x(), AssignOp::Sub, Expr::int(1))],
            1,
        );
        assert_eq!(
            code,
            vec![
                Op::LoadIntLit(1),
                Op::LoadVar {
                    scope: VarScope::Local,
                    slot: 1
                },
                Op::Sub,
                Op::StorVar {
                    scope: VarScope::Local,
                    slot: 1
                },
                Op::Rtrn,
            ]
        );
    }

    #[test]
    fn test_while_uses_both_label_spaces() {
        let code = emit_global(
            vec![Stmt::while_loop(
                Expr::bool(false),
                vec![Stmt::assign(x(), Expr::int(1))],
            )],
            1,
        );
        assert_eq!(
            code,
            vec![
                Op::label(0),
                Op::LoadFalseLit,
                jump(i64::MIN, JumpKind::IfFalse),
                Op::LoadIntLit(1),
                Op::StorVar {
                    scope: VarScope::Local,
                    slot: 1
                },
                jump(0, JumpKind::Always),
                Op::label(i64::MIN),
                Op::Rtrn,
            ]
        );
    }

    #[test]
    fn test_do_while_jumps_back_on_true() {
        let code = emit_global(
            vec![Stmt::do_while(
                vec![Stmt::show(Expr::int(1))],
                Expr::bool(false),
            )],
            0,
        );
        assert_eq!(
            code,
            vec![
                Op::label(0),
                Op::LoadIntLit(1),
                Op::ShowType,
                Op::LoadFalseLit,
                jump(0, JumpKind::IfTrue),
                Op::Rtrn,
            ]
        );
    }

    #[test]
    fn test_if_else_if_else_layout() {
        let stmt = Stmt::new(
            StmtKind::If {
                cond: Expr::bool(true),
                then_block: vec![Stmt::show(Expr::int(1))],
                else_ifs: vec![ElseIf {
                    cond: Expr::bool(false),
                    block: vec![Stmt::show(Expr::int(2))],
                }],
                else_block: Some(vec![Stmt::show(Expr::int(3))]),
            },
            1,
        );
        let end = i64::MIN;
        assert_eq!(
            emit_global(vec![stmt], 0),
            vec![
                Op::LoadTrueLit,
                jump(0, JumpKind::IfFalse),
                Op::LoadIntLit(1),
                Op::ShowType,
                jump(end, JumpKind::Always),
                Op::label(0),
                Op::LoadFalseLit,
                jump(1, JumpKind::IfFalse),
                Op::LoadIntLit(2),
                Op::ShowType,
                jump(end, JumpKind::Always),
                Op::label(1),
                Op::LoadIntLit(3),
                Op::ShowType,
                Op::label(end),
                Op::Rtrn,
            ]
        );
    }

    #[test]
    fn test_nested_if_inside_else_if_keeps_labels_distinct() {
        let inner = Stmt::if_else(Expr::bool(true), vec![], Some(vec![]));
        let stmt = Stmt::new(
            StmtKind::If {
                cond: Expr::bool(true),
                then_block: vec![],
                else_ifs: vec![ElseIf {
                    cond: Expr::bool(true),
                    block: vec![inner],
                }],
                else_block: None,
            },
            1,
        );
        let mut program = ParsedProgram::new("test.kes");
        program.global = vec![stmt];
        let compiled = emit(&program).unwrap();

        let mut labels: Vec<i64> = compiled
            .global
            .code
            .iter()
            .filter_map(|op| match op {
                Op::Lbl { id, .. } => Some(*id),
                _ => None,
            })
            .collect();
        let count = labels.len();
        labels.sort();
        labels.dedup();
        assert_eq!(labels.len(), count);
        for op in &compiled.global.code {
            if let Op::Jmp { label, .. } = op {
                assert!(compiled.global.label_position(*label).is_some());
            }
        }
    }

    #[test]
    fn test_and_evaluates_right_first() {
        let code = emit_global(
            vec![Stmt::show(Expr::binary(
                BinaryOp::And,
                Expr::var(x()),
                Expr::bool(true),
            ))],
            1,
        );
        let next = i64::MIN;
        let end = i64::MIN + 1;
        assert_eq!(
            code,
            vec![
                Op::LoadTrueLit,
                jump(next, JumpKind::IfTrue),
                Op::LoadFalseLit,
                jump(end, JumpKind::Always),
                Op::label(next),
                Op::LoadVar {
                    scope: VarScope::Local,
                    slot: 1
                },
                Op::label(end),
                Op::ShowType,
                Op::Rtrn,
            ]
        );
    }

    #[test]
    fn test_or_short_circuits_to_true() {
        let code = emit_global(
            vec![Stmt::show(Expr::binary(
                BinaryOp::Or,
                Expr::var(x()),
                Expr::bool(true),
            ))],
            1,
        );
        assert_eq!(code[1], jump(i64::MIN, JumpKind::IfFalse));
        assert_eq!(code[2], Op::LoadTrueLit);
    }

    #[test]
    fn test_free_function_call_pushes_args_reversed() {
        let code = emit_global(
            vec![Stmt::call(Call::function(
                "pair",
                vec![Expr::int(1), Expr::int(2)],
            ))],
            0,
        );
        assert_eq!(
            code,
            vec![
                Op::LoadIntLit(2),
                Op::LoadIntLit(1),
                Op::LoadIntLit(0),
                call("pair", 2, false),
                Op::Rtrn,
            ]
        );
    }

    #[test]
    fn test_chained_call_requests_intermediate_results() {
        let chained = Call::method(Expr::var(x()), "first", vec![Expr::int(1)])
            .then("second", vec![Expr::int(2)]);
        let code = emit_global(vec![Stmt::call(chained)], 1);
        assert_eq!(
            code,
            vec![
                Op::LoadIntLit(2),
                Op::LoadIntLit(1),
                Op::LoadVar {
                    scope: VarScope::Local,
                    slot: 1
                },
                call("first", 1, true),
                call("second", 1, false),
                Op::Rtrn,
            ]
        );
    }

    #[test]
    fn test_builtin_constructors_allocate() {
        let code = emit_global(
            vec![
                Stmt::assign(x(), Expr::call(Call::new_object("String", vec![]))),
                Stmt::show(Expr::call(Call::new_object("Hash", vec![]).then("size", vec![]))),
            ],
            1,
        );
        assert_eq!(code[0], Op::NewString);
        assert_eq!(code[2], Op::NewHash);
        assert_eq!(code[3], call("size", 0, true));
    }

    #[test]
    fn test_user_constructor_call() {
        let code = emit_global(
            vec![Stmt::assign(
                x(),
                Expr::call(Call::new_object("Point", vec![Expr::int(1), Expr::int(2)])),
            )],
            1,
        );
        assert_eq!(
            &code[..4],
            &[
                Op::LoadIntLit(2),
                Op::LoadIntLit(1),
                Op::NewObj {
                    class: "Point".to_string()
                },
                call("new", 2, true),
            ]
        );
    }

    #[test]
    fn test_array_extents_and_indices_most_significant_on_top() {
        let code = emit_global(
            vec![
                Stmt::assign(x(), Expr::new_array(vec![Expr::int(3), Expr::int(4)])),
                Stmt::assign_index(x(), vec![Expr::int(1), Expr::int(2)], Expr::int(9)),
            ],
            1,
        );
        assert_eq!(
            code,
            vec![
                Op::LoadIntLit(4),
                Op::LoadIntLit(3),
                Op::NewArray { dims: 2 },
                Op::StorVar {
                    scope: VarScope::Local,
                    slot: 1
                },
                Op::LoadIntLit(9),
                Op::LoadIntLit(2),
                Op::LoadIntLit(1),
                Op::StorAryVar {
                    scope: VarScope::Local,
                    slot: 1,
                    dims: 2
                },
                Op::Rtrn,
            ]
        );
    }

    #[test]
    fn test_list_literal_assignment() {
        let list = Expr::new(ExprKind::List(vec![Expr::int(5), Expr::int(6)]), 1);
        let code = emit_global(vec![Stmt::assign(x(), list)], 1);
        assert_eq!(code[0], Op::LoadIntLit(2));
        assert_eq!(code[1], Op::NewArray { dims: 1 });
        assert_eq!(code.len(), 3 + 2 * 3 + 1);
    }

    #[test]
    fn test_function_binds_params_and_appends_return() {
        let mut program = ParsedProgram::new("test.kes");
        program.functions.push(ParsedFunction::new(
            "pair",
            vec![VarRef::local("a", 1), VarRef::local("b", 2)],
            2,
            vec![Stmt::show(Expr::var(VarRef::local("a", 1)))],
        ));
        let compiled = emit(&program).unwrap();
        let pair = compiled.function("pair:2").unwrap();
        assert_eq!(
            pair.code,
            vec![
                Op::StorVar {
                    scope: VarScope::Local,
                    slot: 1
                },
                Op::StorVar {
                    scope: VarScope::Local,
                    slot: 2
                },
                Op::LoadVar {
                    scope: VarScope::Local,
                    slot: 1
                },
                Op::ShowType,
                Op::Rtrn,
            ]
        );
        assert_eq!(pair.returns, ReturnKind::Unset);
        assert!(!pair.returns_value());
    }

    #[test]
    fn test_constructor_returns_receiver() {
        let mut program = ParsedProgram::new("test.kes");
        program.classes.push(ParsedClass {
            name: "Point".to_string(),
            instance_count: 1,
            methods: vec![ParsedFunction::constructor(
                vec![VarRef::local("v", 1)],
                1,
                vec![Stmt::assign(
                    VarRef::instance("v", 0),
                    Expr::var(VarRef::local("v", 1)),
                )],
            )],
            span: Span::new(1),
        });
        let compiled = emit(&program).unwrap();
        let ctor = compiled.class("Point").unwrap().method("new:1").unwrap();
        let tail = &ctor.code[ctor.code.len() - 2..];
        assert_eq!(
            tail,
            &[
                Op::LoadVar {
                    scope: VarScope::Local,
                    slot: 0
                },
                Op::Rtrn
            ]
        );
        assert!(ctor.returns_value());
    }

    #[test]
    fn test_operator_overload_registered_by_operator() {
        let mut program = ParsedProgram::new("test.kes");
        program.classes.push(ParsedClass {
            name: "Money".to_string(),
            instance_count: 0,
            methods: vec![ParsedFunction::overload(
                BinaryOp::Add,
                VarRef::local("other", 1),
                1,
                vec![Stmt::ret(Some(Expr::int(0)))],
            )],
            span: Span::new(1),
        });
        let compiled = emit(&program).unwrap();
        let class = compiled.class("Money").unwrap();
        assert!(class.operation(Operator::Add).is_some());
        assert!(class.methods.is_empty());
    }

    #[test]
    fn test_mixed_returns_are_reported() {
        let mut program = ParsedProgram::new("test.kes");
        program.functions.push(ParsedFunction::new(
            "mixed",
            vec![],
            0,
            vec![
                Stmt::ret(Some(Expr::int(1))).at(2),
                Stmt::ret(None).at(3),
            ],
        ));
        let errors = emit(&program).unwrap_err();
        assert_eq!(errors.to_string(), "test.kes:3: Not all statements return a value");
    }

    #[test]
    fn test_value_function_must_end_in_return() {
        let mut program = ParsedProgram::new("test.kes");
        program.functions.push(ParsedFunction::new(
            "early",
            vec![],
            0,
            vec![
                Stmt::ret(Some(Expr::int(1))).at(2),
                Stmt::show(Expr::int(2)).at(3),
            ],
        ));
        let errors = emit(&program).unwrap_err();
        assert_eq!(
            errors.messages().collect::<Vec<_>>(),
            vec!["Last statement must return a value"]
        );
        assert_eq!(errors.errors[0].line, 3);
    }

    #[test]
    fn test_errors_accumulate() {
        let mut program = ParsedProgram::new("test.kes");
        program.global = vec![
            Stmt::assign(x(), Expr::new_array(vec![]).at(4)).at(4),
            Stmt::show(Expr::new(ExprKind::List(vec![]), 7)).at(7),
            Stmt::show(Expr::new(ExprKind::Map(vec![(Expr::int(1), Expr::int(2))]), 9)).at(9),
        ];
        program.local_count = 1;
        let errors = emit(&program).unwrap_err();
        assert_eq!(
            errors.messages().collect::<Vec<_>>(),
            vec![
                "Array size not specified",
                "List literal must be assigned to a variable",
                "Hash literal entries are not supported",
            ]
        );
    }

    #[test]
    fn test_plain_if_consumes_a_start_label() {
        let builtins = Builtins::new();
        let mut emitter = Emitter::new(&builtins);
        let mut program = ParsedProgram::new("test.kes");
        program.global = vec![
            Stmt::if_else(Expr::bool(true), vec![], None),
            Stmt::if_else(Expr::bool(true), vec![], None),
            Stmt::while_loop(Expr::bool(false), vec![]),
        ];
        let compiled = emitter.emit(&program).unwrap();

        // The two ifs take start ids 0 and 1, so the loop header is 2.
        assert_eq!(emitter.last_label_id(), 2);
        assert_eq!(compiled.global.code[6], Op::label(2));
        assert_eq!(
            &compiled.global.code[..3],
            &[
                Op::LoadTrueLit,
                jump(i64::MIN, JumpKind::IfFalse),
                Op::label(i64::MIN)
            ]
        );
    }

    #[test]
    fn test_leaders_and_last_label_id() {
        let builtins = Builtins::new();
        let mut emitter = Emitter::new(&builtins);
        let mut program = ParsedProgram::new("test.kes");
        program.global = vec![
            Stmt::while_loop(Expr::bool(false), vec![]),
            Stmt::while_loop(Expr::bool(false), vec![]),
        ];
        let compiled = emitter.emit(&program).unwrap();
        assert_eq!(emitter.last_label_id(), 1);

        // [LBL 0, FALSE, JMP, JMP, LBL, LBL 1, FALSE, JMP, JMP, LBL, RTRN]
        assert_eq!(
            compiled.global.leaders.iter().copied().collect::<Vec<_>>(),
            vec![0, 3, 4, 5, 8, 9]
        );
    }
}
