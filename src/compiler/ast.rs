//! Scope-resolved syntax tree handed to the emitter by the front end.
//!
//! Every variable reference already carries its declaration kind and slot,
//! and every function knows how many locals it declares. The emitter does
//! no scope analysis of its own.

use crate::vm::VarScope;

/// Source position of a statement or expression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Span {
    pub line: usize,
}

impl Span {
    pub fn new(line: usize) -> Self {
        Self { line }
    }
}

/// Where a variable was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Local,
    Instance,
    Class,
}

impl DeclKind {
    pub fn scope(self) -> VarScope {
        match self {
            DeclKind::Local => VarScope::Local,
            DeclKind::Instance => VarScope::Instance,
            DeclKind::Class => VarScope::Class,
        }
    }
}

/// A resolved variable reference.
///
/// Local slots start at 1; slot 0 of every frame holds the receiver.
/// Instance slots index the receiver's fields from 0.
#[derive(Debug, Clone, PartialEq)]
pub struct VarRef {
    pub name: String,
    pub kind: DeclKind,
    pub slot: usize,
}

impl VarRef {
    pub fn local(name: &str, slot: usize) -> Self {
        Self {
            name: name.to_string(),
            kind: DeclKind::Local,
            slot,
        }
    }

    pub fn instance(name: &str, slot: usize) -> Self {
        Self {
            name: name.to_string(),
            kind: DeclKind::Instance,
            slot,
        }
    }
}

/// A whole program.
#[derive(Debug, Clone)]
pub struct ParsedProgram {
    pub file: String,
    /// Top-level statements.
    pub global: Vec<Stmt>,
    /// Locals declared at the top level.
    pub local_count: usize,
    pub functions: Vec<ParsedFunction>,
    pub classes: Vec<ParsedClass>,
}

impl ParsedProgram {
    pub fn new(file: &str) -> Self {
        Self {
            file: file.to_string(),
            global: Vec::new(),
            local_count: 0,
            functions: Vec::new(),
            classes: Vec::new(),
        }
    }
}

/// A user class definition.
#[derive(Debug, Clone)]
pub struct ParsedClass {
    pub name: String,
    /// Number of instance variables.
    pub instance_count: usize,
    pub methods: Vec<ParsedFunction>,
    pub span: Span,
}

/// A function, method, constructor or operator overload.
#[derive(Debug, Clone)]
pub struct ParsedFunction {
    /// Empty for operator overloads.
    pub name: String,
    pub operator: Option<BinaryOp>,
    pub params: Vec<VarRef>,
    /// Locals declared in the body, parameters included.
    pub local_count: usize,
    pub body: Vec<Stmt>,
    /// Constructors implicitly return their receiver.
    pub is_constructor: bool,
    pub span: Span,
}

impl ParsedFunction {
    pub fn new(name: &str, params: Vec<VarRef>, local_count: usize, body: Vec<Stmt>) -> Self {
        Self {
            name: name.to_string(),
            operator: None,
            params,
            local_count,
            body,
            is_constructor: false,
            span: Span::default(),
        }
    }

    pub fn constructor(params: Vec<VarRef>, local_count: usize, body: Vec<Stmt>) -> Self {
        Self {
            is_constructor: true,
            ..Self::new("new", params, local_count, body)
        }
    }

    pub fn overload(operator: BinaryOp, param: VarRef, local_count: usize, body: Vec<Stmt>) -> Self {
        Self {
            operator: Some(operator),
            ..Self::new("", vec![param], local_count, body)
        }
    }
}

/// A statement.
#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
}

/// Left-hand side of an assignment.
#[derive(Debug, Clone)]
pub struct Target {
    pub var: VarRef,
    /// Element indices for `a[i, j] = ...`.
    pub indices: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub struct ElseIf {
    pub cond: Expr,
    pub block: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Assign {
        target: Target,
        op: AssignOp,
        value: Expr,
    },
    /// A declaration without an initializer; emits nothing.
    Declaration(VarRef),
    Return(Option<Expr>),
    Call(Call),
    If {
        cond: Expr,
        then_block: Vec<Stmt>,
        else_ifs: Vec<ElseIf>,
        else_block: Option<Vec<Stmt>>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    DoWhile {
        body: Vec<Stmt>,
        cond: Expr,
    },
    Show(Expr),
}

impl Stmt {
    pub fn new(kind: StmtKind, line: usize) -> Self {
        Self {
            kind,
            span: Span::new(line),
        }
    }

    pub fn assign(var: VarRef, value: Expr) -> Self {
        Self::compound(var, AssignOp::Assign, value)
    }

    pub fn compound(var: VarRef, op: AssignOp, value: Expr) -> Self {
        Self::new(
            StmtKind::Assign {
                target: Target {
                    var,
                    indices: Vec::new(),
                },
                op,
                value,
            },
            0,
        )
    }

    pub fn assign_index(var: VarRef, indices: Vec<Expr>, value: Expr) -> Self {
        Self::new(
            StmtKind::Assign {
                target: Target { var, indices },
                op: AssignOp::Assign,
                value,
            },
            0,
        )
    }

    pub fn ret(value: Option<Expr>) -> Self {
        Self::new(StmtKind::Return(value), 0)
    }

    pub fn call(call: Call) -> Self {
        Self::new(StmtKind::Call(call), 0)
    }

    pub fn show(expr: Expr) -> Self {
        Self::new(StmtKind::Show(expr), 0)
    }

    pub fn if_else(cond: Expr, then_block: Vec<Stmt>, else_block: Option<Vec<Stmt>>) -> Self {
        Self::new(
            StmtKind::If {
                cond,
                then_block,
                else_ifs: Vec::new(),
                else_block,
            },
            0,
        )
    }

    pub fn while_loop(cond: Expr, body: Vec<Stmt>) -> Self {
        Self::new(StmtKind::While { cond, body }, 0)
    }

    pub fn do_while(body: Vec<Stmt>, cond: Expr) -> Self {
        Self::new(StmtKind::DoWhile { body, cond }, 0)
    }

    pub fn at(mut self, line: usize) -> Self {
        self.span = Span::new(line);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eql,
    Neql,
    Les,
    Gtr,
    LesEql,
    GtrEql,
    And,
    Or,
}

/// An expression.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Bool(bool),
    Int(i64),
    Float(f64),
    Var(VarRef),
    /// The receiver (`self`).
    SelfRef,
    /// `a[i, j]`
    Index {
        var: VarRef,
        indices: Vec<Expr>,
    },
    /// `Array.new[d1, d2, ...]`
    NewArray {
        dimensions: Vec<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call(Call),
    /// `[a, b, c]`
    List(Vec<Expr>),
    /// `{k => v, ...}`
    Map(Vec<(Expr, Expr)>),
}

impl Expr {
    pub fn new(kind: ExprKind, line: usize) -> Self {
        Self {
            kind,
            span: Span::new(line),
        }
    }

    fn bare(kind: ExprKind) -> Self {
        Self::new(kind, 0)
    }

    pub fn bool(b: bool) -> Self {
        Self::bare(ExprKind::Bool(b))
    }

    pub fn int(n: i64) -> Self {
        Self::bare(ExprKind::Int(n))
    }

    pub fn float(f: f64) -> Self {
        Self::bare(ExprKind::Float(f))
    }

    pub fn var(var: VarRef) -> Self {
        Self::bare(ExprKind::Var(var))
    }

    pub fn index(var: VarRef, indices: Vec<Expr>) -> Self {
        Self::bare(ExprKind::Index { var, indices })
    }

    pub fn new_array(dimensions: Vec<Expr>) -> Self {
        Self::bare(ExprKind::NewArray { dimensions })
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Self::bare(ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn call(call: Call) -> Self {
        Self::bare(ExprKind::Call(call))
    }

    pub fn at(mut self, line: usize) -> Self {
        self.span = Span::new(line);
        self
    }
}

/// What the first link of a call names.
#[derive(Debug, Clone)]
pub enum CallTarget {
    /// `name(args)`
    Function { name: String, args: Vec<Expr> },
    /// `receiver.name(args)`
    Method {
        receiver: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    /// `Class.new(args)`
    New { class: String, args: Vec<Expr> },
}

/// A further `.name(args)` applied to the previous link's result.
#[derive(Debug, Clone)]
pub struct ChainedCall {
    pub name: String,
    pub args: Vec<Expr>,
}

/// A call expression or statement.
#[derive(Debug, Clone)]
pub struct Call {
    pub target: CallTarget,
    pub chain: Vec<ChainedCall>,
    /// Set by the front end when the call site consumes the result.
    pub returns_value: bool,
}

impl Call {
    fn new(target: CallTarget) -> Self {
        Self {
            target,
            chain: Vec::new(),
            returns_value: false,
        }
    }

    pub fn function(name: &str, args: Vec<Expr>) -> Self {
        Self::new(CallTarget::Function {
            name: name.to_string(),
            args,
        })
    }

    pub fn method(receiver: Expr, name: &str, args: Vec<Expr>) -> Self {
        Self::new(CallTarget::Method {
            receiver: Box::new(receiver),
            name: name.to_string(),
            args,
        })
    }

    pub fn new_object(class: &str, args: Vec<Expr>) -> Self {
        Self::new(CallTarget::New {
            class: class.to_string(),
            args,
        })
    }

    pub fn then(mut self, name: &str, args: Vec<Expr>) -> Self {
        self.chain.push(ChainedCall {
            name: name.to_string(),
            args,
        });
        self
    }
}
