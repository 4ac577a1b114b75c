//! Human- and machine-readable listings of emitted programs.

use std::rc::Rc;

use crate::vm::{Class, Function, Op, Program};

// ============================================================================
// Bytecode Disassembler
// ============================================================================

/// Disassembler for emitted programs.
///
/// Functions and classes are listed in name order. Leader positions are
/// flagged with `>`.
pub struct Disassembler<'a> {
    program: &'a Program,
    output: String,
}

impl<'a> Disassembler<'a> {
    pub fn new(program: &'a Program) -> Self {
        Self {
            program,
            output: String::new(),
        }
    }

    pub fn disassemble(&mut self) -> &str {
        let mut functions: Vec<&Rc<Function>> = self.program.functions.values().collect();
        functions.sort_by(|a, b| a.qualified_name().cmp(&b.qualified_name()));
        for func in functions {
            self.disassemble_function(func, "Function");
            self.output.push('\n');
        }

        let mut classes: Vec<&Rc<Class>> = self.program.classes.values().collect();
        classes.sort_by(|a, b| a.name.cmp(&b.name));
        for class in classes {
            self.disassemble_class(class);
        }

        self.output.push_str("== Main ==\n");
        self.disassemble_code(&self.program.global);

        &self.output
    }

    fn disassemble_class(&mut self, class: &Class) {
        self.output.push_str(&format!(
            "== Class: {} (instance: {}) ==\n",
            class.name, class.instance_count
        ));
        let mut methods: Vec<&Rc<Function>> = class
            .methods
            .values()
            .chain(class.operators.values())
            .collect();
        methods.sort_by_key(|m| function_label(m));
        for method in methods {
            self.disassemble_function(method, "Method");
            self.output.push('\n');
        }
    }

    fn disassemble_function(&mut self, func: &Function, kind: &str) {
        self.output.push_str(&format!(
            "== {}: {} (params: {}, locals: {}, returns: {:?}) ==\n",
            kind,
            function_label(func),
            func.param_count,
            func.local_count,
            func.returns
        ));
        self.disassemble_code(func);
    }

    fn disassemble_code(&mut self, func: &Function) {
        for (pc, op) in func.code.iter().enumerate() {
            let leader = if func.leaders.contains(&pc) { '>' } else { ' ' };
            self.output.push_str(&format!("{}{:04}: ", leader, pc));
            self.disassemble_op(func, op);
            self.output.push('\n');
        }
    }

    fn disassemble_op(&mut self, func: &Function, op: &Op) {
        self.output.push_str(&op.to_string());
        if let Op::Jmp { label, .. } = op {
            match func.label_position(*label) {
                Some(target) => self.output.push_str(&format!(" -> {:04}", target)),
                None => self.output.push_str(" -> ????"),
            }
        }
    }
}

fn function_label(func: &Function) -> String {
    match func.operator {
        Some(operator) => format!("operator{}", operator.symbol()),
        None => func.qualified_name(),
    }
}

/// Format an emitted program as a text listing.
pub fn format_bytecode(program: &Program) -> String {
    let mut disassembler = Disassembler::new(program);
    disassembler.disassemble().to_string()
}

/// Serialize an emitted program to pretty-printed JSON.
pub fn format_json(program: &Program) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(program)
}
