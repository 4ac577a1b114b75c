use std::cell::Cell;
use std::fmt;

use serde::Serialize;

/// Which storage a variable slot lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VarScope {
    /// Slot in the active frame's locals (slot 0 is the receiver).
    Local,
    /// Slot in the instance referenced by the receiver.
    Instance,
    /// Slot shared by every instance of a class.
    Class,
}

impl VarScope {
    pub fn name(&self) -> &'static str {
        match self {
            VarScope::Local => "LOCL",
            VarScope::Instance => "INST",
            VarScope::Class => "CLS",
        }
    }
}

/// Condition attached to a jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JumpKind {
    Always,
    IfTrue,
    IfFalse,
}

impl JumpKind {
    pub fn name(&self) -> &'static str {
        match self {
            JumpKind::Always => "UNCND",
            JumpKind::IfTrue => "TRUE",
            JumpKind::IfFalse => "FALSE",
        }
    }
}

/// Binary operators that dispatch through a class's operator table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Operator {
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
}

impl Operator {
    /// The instruction that performs this operator.
    pub fn op(self) -> Op {
        match self {
            Operator::Add => Op::Add,
            Operator::Sub => Op::Sub,
            Operator::Mul => Op::Mul,
            Operator::Div => Op::Div,
            Operator::Mod => Op::Mod,
            Operator::Eql => Op::Eql,
            Operator::Neql => Op::Neql,
            Operator::Les => Op::Les,
            Operator::Gtr => Op::Gtr,
            Operator::LesEql => Op::LesEql,
            Operator::GtrEql => Op::GtrEql,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::Mod => "%",
            Operator::Eql => "==",
            Operator::Neql => "!=",
            Operator::Les => "<",
            Operator::Gtr => ">",
            Operator::LesEql => "<=",
            Operator::GtrEql => ">=",
        }
    }
}

/// Bytecode instructions for the kestrel VM.
///
/// Binary operators expect the left operand on top of the stack and the
/// right operand directly beneath it. Label pseudo-instructions carry a
/// hit counter that is bumped whenever control jumps backward onto them;
/// nothing in the interpreter reads it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Op {
    // ========================================
    // Literals
    // ========================================
    LoadTrueLit,
    LoadFalseLit,
    LoadIntLit(i64),
    LoadFloatLit(f64),

    // ========================================
    // Variables
    // ========================================
    LoadVar { scope: VarScope, slot: usize },
    StorVar { scope: VarScope, slot: usize },
    /// [idx...] -> [value]
    LoadAryVar { scope: VarScope, slot: usize, dims: usize },
    /// [value, idx...] -> []
    StorAryVar { scope: VarScope, slot: usize, dims: usize },

    // ========================================
    // Operators: [right, left] -> [result]
    // ========================================
    Eql,
    Neql,
    Gtr,
    Les,
    GtrEql,
    LesEql,
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    // ========================================
    // Control Flow
    // ========================================
    Jmp { label: i64, kind: JumpKind },
    Lbl { id: i64, hits: Cell<u64> },

    // ========================================
    // Allocation
    // ========================================
    /// [dim...] -> [array]
    NewArray { dims: usize },
    NewString,
    NewHash,
    NewObj { class: String },

    // ========================================
    // Calls
    // ========================================
    /// [args..., receiver] -> [result?]
    CallFunc { argc: usize, wants_result: bool, name: String },
    Rtrn,

    // ========================================
    // Misc
    // ========================================
    ShowType,
}

impl Op {
    /// Create a label pseudo-instruction with a zeroed hit counter.
    pub fn label(id: i64) -> Self {
        Op::Lbl {
            id,
            hits: Cell::new(0),
        }
    }

    /// The operator table key for arithmetic and comparison instructions.
    pub fn operator(&self) -> Option<Operator> {
        match self {
            Op::Add => Some(Operator::Add),
            Op::Sub => Some(Operator::Sub),
            Op::Mul => Some(Operator::Mul),
            Op::Div => Some(Operator::Div),
            Op::Mod => Some(Operator::Mod),
            Op::Eql => Some(Operator::Eql),
            Op::Neql => Some(Operator::Neql),
            Op::Les => Some(Operator::Les),
            Op::Gtr => Some(Operator::Gtr),
            Op::LesEql => Some(Operator::LesEql),
            Op::GtrEql => Some(Operator::GtrEql),
            _ => None,
        }
    }

    pub fn is_jump(&self) -> bool {
        matches!(self, Op::Jmp { .. })
    }

    pub fn is_label(&self) -> bool {
        matches!(self, Op::Lbl { .. })
    }

    /// Opcode mnemonic used in listings.
    pub fn name(&self) -> &'static str {
        match self {
            Op::LoadTrueLit => "LOAD_TRUE_LIT",
            Op::LoadFalseLit => "LOAD_FALSE_LIT",
            Op::LoadIntLit(_) => "LOAD_INT_LIT",
            Op::LoadFloatLit(_) => "LOAD_FLOAT_LIT",
            Op::LoadVar { .. } => "LOAD_VAR",
            Op::StorVar { .. } => "STOR_VAR",
            Op::LoadAryVar { .. } => "LOAD_ARY_VAR",
            Op::StorAryVar { .. } => "STOR_ARY_VAR",
            Op::Eql => "EQL",
            Op::Neql => "NEQL",
            Op::Gtr => "GTR",
            Op::Les => "LES",
            Op::GtrEql => "GTR_EQL",
            Op::LesEql => "LES_EQL",
            Op::Add => "ADD",
            Op::Sub => "SUB",
            Op::Mul => "MUL",
            Op::Div => "DIV",
            Op::Mod => "MOD",
            Op::Jmp { .. } => "JMP",
            Op::Lbl { .. } => "LBL",
            Op::NewArray { .. } => "NEW_ARRAY",
            Op::NewString => "NEW_STRING",
            Op::NewHash => "NEW_HASH",
            Op::NewObj { .. } => "NEW_OBJ",
            Op::CallFunc { .. } => "CALL_FUNC",
            Op::Rtrn => "RTRN",
            Op::ShowType => "SHOW_TYPE",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())?;
        match self {
            Op::LoadIntLit(n) => write!(f, " {}", n),
            Op::LoadFloatLit(x) => write!(f, " {}", x),
            Op::LoadVar { scope, slot } | Op::StorVar { scope, slot } => {
                write!(f, " {} {}", scope.name(), slot)
            }
            Op::LoadAryVar { scope, slot, dims } | Op::StorAryVar { scope, slot, dims } => {
                write!(f, " {} {} dims={}", scope.name(), slot, dims)
            }
            Op::Jmp { label, kind } => write!(f, " {} {}", kind.name(), label),
            Op::Lbl { id, hits } => write!(f, " {} hits={}", id, hits.get()),
            Op::NewArray { dims } => write!(f, " dims={}", dims),
            Op::NewObj { class } => write!(f, " {}", class),
            Op::CallFunc {
                argc,
                wants_result,
                name,
            } => write!(f, " {} argc={} result={}", name, argc, wants_result),
            _ => Ok(()),
        }
    }
}
