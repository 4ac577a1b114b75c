pub mod ast;
pub mod dump;
mod emitter;
mod error;

pub use emitter::Emitter;
pub use error::{EmitError, EmitErrors};

use std::io::{self, Write};

use crate::RuntimeConfig;
use crate::compiler::ast::ParsedProgram;
use crate::vm::{Builtins, CapturedOutput, Program, VM, VmError};

/// Failure of a compile-and-run pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// One or more emission errors; nothing was run.
    #[error("{0}")]
    Emit(#[from] EmitErrors),

    /// A fatal runtime fault; execution stopped at the faulting instruction.
    #[error("{}", fatal_diagnostic(.0))]
    Runtime(#[from] VmError),
}

/// The diagnostic line printed for a fatal runtime fault.
pub fn fatal_diagnostic(err: &VmError) -> String {
    format!(">>> {} <<<", err)
}

/// Emit a program against the given built-in classes.
pub fn compile(program: &ParsedProgram, builtins: &Builtins) -> Result<Program, EmitErrors> {
    Emitter::new(builtins).emit(program)
}

/// Emit and run a program, writing `show` output to stdout.
pub fn run(program: &ParsedProgram, config: &RuntimeConfig) -> Result<(), Error> {
    run_with_output(program, config, Box::new(io::stdout()))
}

/// Emit and run a program, returning everything it showed.
pub fn run_capturing_output(program: &ParsedProgram, config: &RuntimeConfig) -> Result<String, Error> {
    let output = CapturedOutput::new();
    run_with_output(program, config, Box::new(output.clone()))?;
    Ok(output.contents())
}

fn run_with_output(
    program: &ParsedProgram,
    config: &RuntimeConfig,
    output: Box<dyn Write>,
) -> Result<(), Error> {
    let mut vm = VM::new_with_config(config, output);
    let compiled = compile(program, vm.builtins())?;
    vm.run(&compiled)?;
    Ok(())
}
