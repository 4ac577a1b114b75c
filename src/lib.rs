//! Kestrel - bytecode back end for a small dynamically-typed scripting language
//!
//! This library provides the emitter that lowers a scope-resolved syntax
//! tree to bytecode, and the stack VM with its mark-and-sweep heap that
//! runs it.

pub mod compiler;
pub mod config;
pub mod vm;

// Re-export commonly used types
pub use compiler::{Emitter, Error, fatal_diagnostic, run, run_capturing_output};
pub use config::{ConfigError, RuntimeConfig};
pub use vm::{Program, VM, Value, VmError};
