#![allow(dead_code)]

use std::io::Cursor;

use pyvm::bytecode::compile::Compiler;
use pyvm::bytecode::program::Program;
use pyvm::frontend::lexer::Lexer;
use pyvm::frontend::parser::Parser;
use pyvm::runtime::runtime_error::RuntimeError;
use pyvm::runtime::vm::{Vm, VmConfig};

/// Compile source text straight through the frontend and generator.
pub fn compile(source: &str) -> Program {
    let tokens = Lexer::new(source).tokenize().expect("lexes");
    let ast = Parser::new(tokens).parse().expect("parses");
    Compiler::new().compile_program(&ast).expect("compiles")
}

/// Run a program with the given stdin text, capturing stdout.
pub fn run_capture(program: &Program, input: &str) -> Result<String, RuntimeError> {
    let mut vm = Vm::with_io(
        VmConfig::default(),
        Cursor::new(input.to_string()),
        Vec::new(),
    );
    vm.run(program)?;
    Ok(String::from_utf8(vm.output().clone()).expect("utf-8 output"))
}

/// Run a program and also report the final operand-stack depth.
pub fn run_with_depth(program: &Program, input: &str) -> Result<(String, usize), RuntimeError> {
    let mut vm = Vm::with_io(
        VmConfig::default(),
        Cursor::new(input.to_string()),
        Vec::new(),
    );
    vm.run(program)?;
    let depth = vm.stack_depth();
    Ok((
        String::from_utf8(vm.output().clone()).expect("utf-8 output"),
        depth,
    ))
}
