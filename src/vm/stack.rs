//! Fixed-capacity operand and call stacks.

use super::error::VmError;
use super::frame::Frame;
use super::value::Value;

/// Default operand stack capacity.
pub const EXECUTION_STACK_SIZE: usize = 128;
/// Default call stack capacity.
pub const CALL_STACK_SIZE: usize = 64;

/// The operand stack. Never grows past its capacity.
#[derive(Debug)]
pub struct ExecutionStack {
    values: Vec<Value>,
    capacity: usize,
}

impl ExecutionStack {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: Value) -> Result<(), VmError> {
        if self.values.len() >= self.capacity {
            return Err(VmError::StackOverflow);
        }
        self.values.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Value, VmError> {
        self.values.pop().ok_or(VmError::StackUnderflow)
    }

    pub fn peek(&self) -> Option<&Value> {
        self.values.last()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// The call stack of saved frames.
#[derive(Debug)]
pub struct CallStack {
    frames: Vec<Frame>,
    capacity: usize,
}

impl CallStack {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, frame: Frame) -> Result<(), VmError> {
        if self.frames.len() >= self.capacity {
            return Err(VmError::CallStackOverflow);
        }
        self.frames.push(frame);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames from the base of the stack to the most recent call.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
