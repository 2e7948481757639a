//! PyVM: a compiler and stack virtual machine for a small Python subset.
//!
//! The pipeline: source text is lexed and parsed into an AST
//! ([`frontend`]), compiled to bytecode with a constant pool and symbol
//! table ([`bytecode::compile`]), optionally serialized into the `.pvm`
//! binary container ([`bytecode::file`]), and executed on a stack machine
//! ([`runtime::vm`]). The compiled artifact is a stable little-endian
//! format usable across the compile/execute boundary.

pub mod bytecode;
pub mod frontend;
pub mod lang;
pub mod runtime;
