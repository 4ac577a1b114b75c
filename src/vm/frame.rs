use std::rc::Rc;

use super::Function;
use super::value::Value;

/// A saved caller context, pushed on call and popped on return.
#[derive(Debug, Clone)]
pub struct Frame {
    pub function: Rc<Function>,
    /// Instruction to resume at in the caller.
    pub ip: usize,
    pub locals: Vec<Value>,
    /// The callee produces a value the call site never asked for; it is
    /// dropped from the operand stack on return.
    pub orphan_return: bool,
}

impl Frame {
    pub fn new(function: Rc<Function>, ip: usize, locals: Vec<Value>, orphan_return: bool) -> Self {
        Self {
            function,
            ip,
            locals,
            orphan_return,
        }
    }
}

/// Everything the collector treats as a root: the active locals plus the
/// locals saved in every frame.
pub struct Roots<'a> {
    pub locals: &'a [Value],
    pub frames: &'a [Frame],
}

impl<'a> Roots<'a> {
    pub fn new(locals: &'a [Value], frames: &'a [Frame]) -> Self {
        Self { locals, frames }
    }

    /// Root values, starting with the active locals and then walking the
    /// call stack from the most recent frame down to the base.
    pub fn values(&self) -> impl Iterator<Item = &'a Value> {
        let (locals, frames) = (self.locals, self.frames);
        locals
            .iter()
            .chain(frames.iter().rev().flat_map(|frame| frame.locals.iter()))
    }
}
