use super::ops::Operator;

/// A fatal runtime fault. Execution stops at the first one; nothing inside
/// the VM recovers from it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmError {
    #[error("stack bounds exceeded")]
    StackOverflow,

    #[error("stack bounds exceeded")]
    StackUnderflow,

    #[error("call stack bounds exceeded")]
    CallStackOverflow,

    #[error("Unknown function: {name}")]
    UnknownFunction { name: String },

    #[error("Undefined class: {name}")]
    UnknownClass { name: String },

    #[error("Incorrect number of calling parameters for '{name}': expected {expected}, got {got}")]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("Mismatch array dimensions: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Array index out-of-bounds: {index} (size {size})")]
    IndexOutOfBounds { index: i64, size: usize },

    #[error("Invalid array dimension: {extent}")]
    InvalidDimension { extent: i64 },

    #[error("Array size not specified")]
    MissingDimensions,

    #[error("Array too large: {dimensions:?}")]
    ArrayTooLarge { dimensions: Vec<usize> },

    #[error("Invalid label identifier: {label}")]
    InvalidLabel { label: i64 },

    #[error("Expected a boolean value")]
    ExpectedBoolean,

    #[error("Invalid operation: {class} {}", .operator.symbol())]
    InvalidOperation { class: String, operator: Operator },

    #[error("Invalid mathematical operation: {left} {} {right}", .operator.symbol())]
    OperandMismatch {
        left: &'static str,
        operator: Operator,
        right: &'static str,
    },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Uninitialized function reference: {name}")]
    UninitializedReceiver { name: String },

    #[error("Invalid variable slot: {slot}")]
    InvalidSlot { slot: usize },

    #[error("Unknown variable type")]
    UninitializedVariable,

    #[error("Expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Instance variable access without a receiver")]
    MissingReceiver,

    #[error("Invalid dump value: {type_name}")]
    InvalidDumpValue { type_name: &'static str },

    #[error("Dangling heap reference")]
    DanglingReference,

    #[error("output error: {0}")]
    Output(String),
}
