use std::collections::HashMap;

use crate::bytecode::code::{CodeBuffer, Label};
use crate::bytecode::compile_error::CompileError;
use crate::bytecode::op::Op;
use crate::bytecode::program::{
    Constant, DebugEntry, Program, Symbol, SymbolKind, BUILTIN_INPUT, BUILTIN_PRINT, FLAG_DEBUG,
    FORMAT_VERSION,
};
use crate::frontend::lexer::Span;
use crate::lang::ast::{self, BinaryOp, Expr, Stmt, UnaryOp};
use crate::lang::value::Value;

/// Bytecode generator.
///
/// Walks the AST in program order, appending to the constant pool, the
/// symbol table and the code buffer. Expressions compile to code with a net
/// stack effect of +1; statements compile to code with a net effect of 0.
/// The generator tracks the symbolic operand-stack depth while emitting and
/// treats any mismatch as an internal error.
pub struct Compiler {
    code: CodeBuffer,
    constants: Vec<Constant>,
    symbols: Vec<Symbol>,

    /// Variable name -> slot in the VM variable store.
    var_slots: HashMap<String, u32>,

    /// Symbol name -> index into the symbol table.
    symbol_indices: HashMap<String, u16>,

    /// Symbolic operand-stack depth at the current emit position.
    depth: i32,

    /// Line table under construction, when debug info was requested.
    debug: Option<Vec<DebugEntry>>,
}

impl Compiler {
    pub fn new() -> Self {
        Compiler {
            code: CodeBuffer::new(),
            constants: Vec::new(),
            symbols: Vec::new(),
            var_slots: HashMap::new(),
            symbol_indices: HashMap::new(),
            depth: 0,
            debug: None,
        }
    }

    /// Record a line table while compiling (the `--debug` path).
    pub fn with_debug_info(mut self) -> Self {
        self.debug = Some(Vec::new());
        self
    }

    pub fn compile_program(mut self, program: &ast::Program) -> Result<Program, CompileError> {
        for stmt in &program.statements {
            self.compile_statement(stmt)?;
        }
        self.code.emit(Op::Halt);

        if self.depth != 0 {
            return Err(CompileError::internal(format!(
                "program ends with symbolic stack depth {}",
                self.depth
            )));
        }

        let code = std::mem::take(&mut self.code)
            .finalize()
            .map_err(|label| CompileError::UnresolvedLabel { label })?;

        let flags = if self.debug.is_some() { FLAG_DEBUG } else { 0 };
        Ok(Program {
            version: FORMAT_VERSION,
            flags,
            constants: self.constants,
            symbols: self.symbols,
            code,
            debug: self.debug,
        })
    }

    // ─────────────────────────────── Statements ──────────────────────────────

    fn compile_statement(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        if self.depth != 0 {
            return Err(CompileError::internal(format!(
                "statement begins with symbolic stack depth {}",
                self.depth
            )));
        }
        self.record_line(stmt.span());

        match stmt {
            Stmt::Assign { name, value, span } => {
                self.compile_expression(value)?;
                let slot = self.var_slot(name, span)?;
                self.emit_store_var(slot);
            }

            Stmt::Expr(expr) => self.compile_expression_statement(expr)?,

            Stmt::If {
                cond,
                then_body,
                else_body,
                ..
            } => self.compile_if(cond, then_body, else_body)?,

            Stmt::While { cond, body, .. } => self.compile_while(cond, body)?,

            Stmt::FuncDef { name, span, .. } => {
                return Err(CompileError::unsupported(
                    format!("user-defined function '{}' is not supported", name),
                    span,
                    "only the built-in functions print and input can be called",
                ));
            }

            Stmt::Return { span, .. } => {
                return Err(CompileError::unsupported(
                    "'return' outside a function",
                    span,
                    "user-defined functions are not supported",
                ));
            }

            Stmt::Pass { .. } => {}
        }

        if self.depth != 0 {
            return Err(CompileError::internal(format!(
                "statement ends with symbolic stack depth {}",
                self.depth
            )));
        }
        Ok(())
    }

    /// An expression evaluated for effect. Single-argument `print` calls
    /// get the dedicated `PRINT` opcode; every other expression leaves one
    /// value that must be popped.
    fn compile_expression_statement(&mut self, expr: &Expr) -> Result<(), CompileError> {
        if let Expr::Call { name, args, .. } = expr {
            if name == "print" && args.len() == 1 {
                // Canonical encoding: argument, then PRINT. The builtin's
                // name still lands in the constant pool so tooling can
                // recover it from the compiled artifact.
                self.add_constant(Constant::String(name.clone()))?;
                self.compile_expression(&args[0])?;
                self.code.emit(Op::Print);
                self.adjust(-1)?;
                return Ok(());
            }
            if name == "input" && args.is_empty() {
                self.code.emit(Op::Input);
                self.adjust(1)?;
                self.code.emit(Op::Pop);
                self.adjust(-1)?;
                return Ok(());
            }
        }

        self.compile_expression(expr)?;
        self.code.emit(Op::Pop);
        self.adjust(-1)?;
        Ok(())
    }

    fn compile_if(
        &mut self,
        cond: &Expr,
        then_body: &[Stmt],
        else_body: &[Stmt],
    ) -> Result<(), CompileError> {
        self.compile_expression(cond)?;

        let else_label = self.code.new_label();
        self.emit_jump(Op::JumpIfFalse, else_label)?;

        let depth_at_branch = self.depth;
        for stmt in then_body {
            self.compile_statement(stmt)?;
        }
        let depth_after_then = self.depth;

        if else_body.is_empty() {
            self.code.bind_label(else_label);
        } else {
            let end_label = self.code.new_label();
            self.emit_jump(Op::Jump, end_label)?;
            self.code.bind_label(else_label);

            self.depth = depth_at_branch;
            for stmt in else_body {
                self.compile_statement(stmt)?;
            }
            if self.depth != depth_after_then {
                return Err(CompileError::internal(format!(
                    "branch depths diverge at if/else merge: {} vs {}",
                    depth_after_then, self.depth
                )));
            }
            self.code.bind_label(end_label);
        }

        Ok(())
    }

    fn compile_while(&mut self, cond: &Expr, body: &[Stmt]) -> Result<(), CompileError> {
        let loop_top = self.code.new_label();
        self.code.bind_label(loop_top);
        let depth_at_top = self.depth;

        self.compile_expression(cond)?;
        let loop_end = self.code.new_label();
        self.emit_jump(Op::JumpIfFalse, loop_end)?;

        for stmt in body {
            self.compile_statement(stmt)?;
        }
        if self.depth != depth_at_top {
            return Err(CompileError::internal(format!(
                "loop body changes stack depth: {} vs {}",
                depth_at_top, self.depth
            )));
        }

        self.emit_jump(Op::Jump, loop_top)?;
        self.code.bind_label(loop_end);
        Ok(())
    }

    // ────────────────────────────── Expressions ──────────────────────────────

    fn compile_expression(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Literal { value, .. } => {
                let constant = match value {
                    Value::Integer(n) => Constant::Integer(*n),
                    Value::Float(x) => Constant::Float(*x),
                    Value::String(s) => Constant::String(s.clone()),
                    Value::Bool(b) => Constant::Bool(*b),
                    Value::Null => {
                        return Err(CompileError::internal("null literal in source"));
                    }
                };
                let index = self.add_constant(constant)?;
                self.emit_load_const(index);
            }

            Expr::Name { name, span } => {
                let slot = match self.var_slots.get(name) {
                    Some(slot) => *slot,
                    None => return Err(CompileError::undefined_name(name, span)),
                };
                self.emit_load_var(slot);
            }

            Expr::Unary { op, operand, .. } => {
                self.compile_expression(operand)?;
                match op {
                    UnaryOp::Neg => self.code.emit(Op::Neg),
                    UnaryOp::Not => self.code.emit(Op::Not),
                }
            }

            Expr::Binary {
                op,
                left,
                right,
                span,
            } => {
                self.check_literal_operands(*op, left, right, span)?;
                self.compile_expression(left)?;
                self.compile_expression(right)?;
                self.code.emit(Self::binary_opcode(*op));
                self.adjust(-1)?;
            }

            Expr::Call { name, args, span } => match name.as_str() {
                "print" => self.compile_builtin_call("print", args, span)?,
                "input" => {
                    match args.len() {
                        0 => {
                            self.code.emit(Op::Input);
                            self.adjust(1)?;
                        }
                        1 => self.compile_builtin_call("input", args, span)?,
                        n => {
                            return Err(CompileError::unsupported(
                                format!("input takes at most one argument, got {}", n),
                                span,
                                "pass a single prompt string or nothing",
                            ));
                        }
                    }
                }
                _ => return Err(CompileError::undefined_name(name, span)),
            },
        }

        Ok(())
    }

    /// Emit a builtin invocation through the generic `CALL` path: arguments
    /// left-to-right, then `CALL symbol, argc`. The builtin pushes its
    /// result (`Null` for print), so the net effect is +1 - argc.
    fn compile_builtin_call(
        &mut self,
        name: &str,
        args: &[Expr],
        span: &Span,
    ) -> Result<(), CompileError> {
        if args.len() > u8::MAX as usize {
            return Err(CompileError::unsupported(
                format!("{} arguments in one call", args.len()),
                span,
                "a call supports at most 255 arguments",
            ));
        }

        self.add_constant(Constant::String(name.to_string()))?;
        let symbol = self.func_symbol(name)?;

        for arg in args {
            self.compile_expression(arg)?;
        }
        self.code.emit_call(symbol, args.len() as u8);
        self.adjust(1 - args.len() as i32)?;
        Ok(())
    }

    fn binary_opcode(op: BinaryOp) -> Op {
        match op {
            BinaryOp::Add => Op::Add,
            BinaryOp::Sub => Op::Sub,
            BinaryOp::Mul => Op::Mul,
            BinaryOp::Div => Op::Div,
            BinaryOp::Mod => Op::Mod,
            BinaryOp::Eq => Op::CmpEq,
            BinaryOp::Ne => Op::CmpNe,
            BinaryOp::Lt => Op::CmpLt,
            BinaryOp::Le => Op::CmpLe,
            BinaryOp::Gt => Op::CmpGt,
            BinaryOp::Ge => Op::CmpGe,
            BinaryOp::And => Op::And,
            BinaryOp::Or => Op::Or,
        }
    }

    /// When both operands are literals the operator can be type-checked
    /// now; a clash that would fail at runtime is reported at compile time
    /// instead. Values are never folded; `1 / 0` stays a runtime error.
    fn check_literal_operands(
        &self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        span: &Span,
    ) -> Result<(), CompileError> {
        let (lhs, rhs) = match (left, right) {
            (Expr::Literal { value: l, .. }, Expr::Literal { value: r, .. }) => (l, r),
            _ => return Ok(()),
        };

        let numeric = |v: &Value| matches!(v, Value::Integer(_) | Value::Float(_));
        let ok = match op {
            BinaryOp::Add => {
                (numeric(lhs) && numeric(rhs))
                    || matches!((lhs, rhs), (Value::String(_), Value::String(_)))
            }
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                numeric(lhs) && numeric(rhs)
            }
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                (numeric(lhs) && numeric(rhs))
                    || matches!((lhs, rhs), (Value::String(_), Value::String(_)))
            }
            BinaryOp::Eq | BinaryOp::Ne => {
                (numeric(lhs) && numeric(rhs))
                    || std::mem::discriminant(lhs) == std::mem::discriminant(rhs)
            }
            // Logical operators accept every value through truthiness.
            BinaryOp::And | BinaryOp::Or => true,
        };

        if ok {
            Ok(())
        } else {
            Err(CompileError::type_clash(
                format!(
                    "unsupported operand types for {}: {} and {}",
                    op.symbol(),
                    lhs.type_name(),
                    rhs.type_name()
                ),
                span,
            ))
        }
    }

    // ─────────────────────────── Tables and emission ──────────────────────────

    /// Intern a constant by structural equality: the same literal always
    /// maps to the same pool index.
    fn add_constant(&mut self, constant: Constant) -> Result<u32, CompileError> {
        if let Some(index) = self.constants.iter().position(|c| *c == constant) {
            return Ok(index as u32);
        }
        if self.constants.len() > u16::MAX as usize {
            return Err(CompileError::internal("constant pool overflow"));
        }
        self.constants.push(constant);
        Ok((self.constants.len() - 1) as u32)
    }

    /// Slot for a variable, allocating symbol and slot on first assignment.
    fn var_slot(&mut self, name: &str, span: &Span) -> Result<u32, CompileError> {
        if let Some(slot) = self.var_slots.get(name) {
            return Ok(*slot);
        }
        if name == "print" || name == "input" {
            return Err(CompileError::unsupported(
                format!("cannot assign to built-in function '{}'", name),
                span,
                "pick a different variable name",
            ));
        }

        let slot = self.var_slots.len() as u32;
        if self.symbols.len() > u16::MAX as usize {
            return Err(CompileError::internal("symbol table overflow"));
        }
        self.symbols.push(Symbol {
            kind: SymbolKind::Var,
            name: name.to_string(),
            value: slot,
        });
        self.symbol_indices
            .insert(name.to_string(), (self.symbols.len() - 1) as u16);
        self.var_slots.insert(name.to_string(), slot);
        Ok(slot)
    }

    /// Symbol table index for a builtin function, interning on first use.
    fn func_symbol(&mut self, name: &str) -> Result<u16, CompileError> {
        if let Some(index) = self.symbol_indices.get(name) {
            return Ok(*index);
        }

        let tag = match name {
            "print" => BUILTIN_PRINT,
            "input" => BUILTIN_INPUT,
            _ => return Err(CompileError::internal(format!("unknown builtin '{}'", name))),
        };
        if self.symbols.len() > u16::MAX as usize {
            return Err(CompileError::internal("symbol table overflow"));
        }
        self.symbols.push(Symbol {
            kind: SymbolKind::Func,
            name: name.to_string(),
            value: tag,
        });
        let index = (self.symbols.len() - 1) as u16;
        self.symbol_indices.insert(name.to_string(), index);
        Ok(index)
    }

    fn emit_load_const(&mut self, index: u32) {
        if index <= u8::MAX as u32 {
            self.code.emit_u8(Op::LoadConst, index as u8);
        } else {
            self.code.emit_u16(Op::LoadConstW, index as u16);
        }
        self.depth += 1;
    }

    fn emit_load_var(&mut self, slot: u32) {
        if slot <= u8::MAX as u32 {
            self.code.emit_u8(Op::LoadVar, slot as u8);
        } else {
            self.code.emit_u16(Op::LoadVarW, slot as u16);
        }
        self.depth += 1;
    }

    fn emit_store_var(&mut self, slot: u32) {
        if slot <= u8::MAX as u32 {
            self.code.emit_u8(Op::StoreVar, slot as u8);
        } else {
            self.code.emit_u16(Op::StoreVarW, slot as u16);
        }
        self.depth -= 1;
    }

    fn emit_jump(&mut self, op: Op, label: Label) -> Result<(), CompileError> {
        self.code.emit_jump(op, label);
        if matches!(op, Op::JumpIfFalse | Op::JumpIfTrue) {
            self.adjust(-1)?;
        }
        Ok(())
    }

    fn adjust(&mut self, delta: i32) -> Result<(), CompileError> {
        self.depth += delta;
        if self.depth < 0 {
            return Err(CompileError::internal(
                "symbolic stack depth went negative",
            ));
        }
        Ok(())
    }

    fn record_line(&mut self, span: &Span) {
        let pc = self.code.offset();
        if let Some(table) = self.debug.as_mut() {
            if table.last().map_or(true, |e| e.pc != pc) {
                table.push(DebugEntry {
                    pc,
                    line: span.line as u32,
                    column: span.col as u16,
                });
            }
        }
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::Lexer;
    use crate::frontend::parser::Parser;

    fn compile(source: &str) -> Program {
        try_compile(source).unwrap()
    }

    fn try_compile(source: &str) -> Result<Program, CompileError> {
        let tokens = Lexer::new(source).tokenize().unwrap();
        let ast = Parser::new(tokens).parse().unwrap();
        Compiler::new().compile_program(&ast)
    }

    #[test]
    fn test_add_program_emits_expected_code_bytes() {
        let program = compile("x = 10\ny = 20\nprint(x + y)\n");

        assert_eq!(
            program.code,
            vec![
                0x01, 0x00, // LOAD_CONST 0
                0x03, 0x00, // STORE_VAR 0
                0x01, 0x01, // LOAD_CONST 1
                0x03, 0x01, // STORE_VAR 1
                0x02, 0x00, // LOAD_VAR 0
                0x02, 0x01, // LOAD_VAR 1
                0x10, // ADD
                0x40, // PRINT
                0xFF, // HALT
            ]
        );
    }

    #[test]
    fn test_add_program_tables() {
        let program = compile("x = 10\ny = 20\nprint(x + y)\n");

        assert_eq!(
            program.constants,
            vec![
                Constant::Integer(10),
                Constant::Integer(20),
                Constant::String("print".to_string()),
            ]
        );
        assert_eq!(program.symbols.len(), 2);
        assert_eq!(program.symbols[0].name, "x");
        assert_eq!(program.symbols[0].kind, SymbolKind::Var);
        assert_eq!(program.symbols[0].value, 0);
        assert_eq!(program.symbols[1].name, "y");
        assert_eq!(program.symbols[1].value, 1);
    }

    #[test]
    fn test_constants_are_interned() {
        let program = compile("x = 7\ny = 7\nz = 7\n");

        let sevens = program
            .constants
            .iter()
            .filter(|c| **c == Constant::Integer(7))
            .count();
        assert_eq!(sevens, 1);
    }

    #[test]
    fn test_interning_is_type_aware() {
        let program = compile("x = 1\ny = 1.0\nz = True\n");

        assert!(program.constants.contains(&Constant::Integer(1)));
        assert!(program.constants.contains(&Constant::Float(1.0)));
        assert!(program.constants.contains(&Constant::Bool(true)));
        assert_eq!(program.constants.len(), 3);
    }

    #[test]
    fn test_reassignment_reuses_slot() {
        let program = compile("x = 1\nx = 2\n");

        assert_eq!(program.var_count(), 1);
        assert_eq!(program.symbols.len(), 1);
    }

    #[test]
    fn test_undefined_name_is_name_error() {
        let err = try_compile("print(a)\n").unwrap_err();
        assert!(err.is_name_error());
    }

    #[test]
    fn test_unknown_function_is_name_error() {
        let err = try_compile("foo(1)\n").unwrap_err();
        assert!(err.is_name_error());
    }

    #[test]
    fn test_literal_type_clash_is_compile_error() {
        let err = try_compile("print(\"a\" + 1)\n").unwrap_err();
        assert!(err.is_type_error());
    }

    #[test]
    fn test_literal_division_by_zero_not_checked_statically() {
        // Stays a runtime error; the generator must accept it.
        assert!(try_compile("print(1 / 0)\n").is_ok());
    }

    #[test]
    fn test_while_emits_one_backward_jump_and_one_conditional() {
        let program = compile("i = 0\nwhile i < 3:\n    print(i)\n    i = i + 1\n");

        let mut pc = 0usize;
        let mut backward_jumps = 0;
        let mut conditional_jumps = 0;
        while pc < program.code.len() {
            let op = Op::from_u8(program.code[pc]).unwrap();
            if op == Op::Jump {
                let target = i32::from_le_bytes(
                    program.code[pc + 1..pc + 5].try_into().unwrap(),
                );
                if (target as usize) < pc {
                    backward_jumps += 1;
                }
            }
            if op == Op::JumpIfFalse {
                conditional_jumps += 1;
            }
            pc += 1 + op.operand_width();
        }

        assert_eq!(backward_jumps, 1);
        assert_eq!(conditional_jumps, 1);
    }

    #[test]
    fn test_if_else_keeps_branch_constants_distinct() {
        let program =
            compile("x = 5\nif x > 0:\n    print(\"pos\")\nelse:\n    print(\"neg\")\n");

        assert!(program
            .constants
            .contains(&Constant::String("pos".to_string())));
        assert!(program
            .constants
            .contains(&Constant::String("neg".to_string())));
    }

    #[test]
    fn test_if_without_else_has_no_unconditional_jump() {
        let program = compile("x = 1\nif x > 0:\n    print(x)\n");

        let mut pc = 0usize;
        while pc < program.code.len() {
            let op = Op::from_u8(program.code[pc]).unwrap();
            assert_ne!(op, Op::Jump);
            pc += 1 + op.operand_width();
        }
    }

    #[test]
    fn test_jump_targets_land_on_instruction_boundaries() {
        let program = compile(
            "i = 0\nwhile i < 3:\n    if i % 2 == 0:\n        print(i)\n    i = i + 1\n",
        );

        let mut boundaries = Vec::new();
        let mut targets = Vec::new();
        let mut pc = 0usize;
        while pc < program.code.len() {
            boundaries.push(pc);
            let op = Op::from_u8(program.code[pc]).unwrap();
            if op.is_jump() {
                let target = i32::from_le_bytes(
                    program.code[pc + 1..pc + 5].try_into().unwrap(),
                );
                targets.push(target as usize);
            }
            pc += 1 + op.operand_width();
        }

        for target in targets {
            assert!(boundaries.contains(&target), "jump into mid-instruction");
        }
    }

    #[test]
    fn test_program_ends_with_halt() {
        let program = compile("x = 1\n");
        assert_eq!(*program.code.last().unwrap(), Op::Halt as u8);
    }

    #[test]
    fn test_multi_argument_print_uses_call() {
        let program = compile("print(1, 2)\n");

        assert!(program.code.contains(&(Op::Call as u8)));
        let sym = program
            .symbols
            .iter()
            .find(|s| s.name == "print")
            .expect("print symbol interned");
        assert_eq!(sym.kind, SymbolKind::Func);
        assert_eq!(sym.value, BUILTIN_PRINT);
    }

    #[test]
    fn test_input_statement_pops_result() {
        let program = compile("input()\n");
        assert_eq!(
            program.code,
            vec![Op::Input as u8, Op::Pop as u8, Op::Halt as u8]
        );
    }

    #[test]
    fn test_input_with_prompt_uses_call() {
        let program = compile("name = input(\"? \")\n");
        assert!(program.code.contains(&(Op::Call as u8)));
        let sym = program.symbols.iter().find(|s| s.name == "input").unwrap();
        assert_eq!(sym.value, BUILTIN_INPUT);
    }

    #[test]
    fn test_def_is_rejected() {
        let err = try_compile("def f():\n    pass\n").unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn test_return_outside_function_is_rejected() {
        let err = try_compile("return 1\n").unwrap_err();
        assert!(err.to_string().contains("return"));
    }

    #[test]
    fn test_assign_to_builtin_is_rejected() {
        let err = try_compile("print = 5\n").unwrap_err();
        assert!(err.to_string().contains("built-in"));
    }

    #[test]
    fn test_logical_operators_emit_dedicated_opcodes() {
        let program = compile("x = True and False\ny = x or True\nz = not x\n");

        assert!(program.code.contains(&(Op::And as u8)));
        assert!(program.code.contains(&(Op::Or as u8)));
        assert!(program.code.contains(&(Op::Not as u8)));
    }

    #[test]
    fn test_debug_info_records_statement_lines() {
        let tokens = Lexer::new("x = 1\ny = 2\n").tokenize().unwrap();
        let ast = Parser::new(tokens).parse().unwrap();
        let program = Compiler::new()
            .with_debug_info()
            .compile_program(&ast)
            .unwrap();

        let table = program.debug.as_ref().unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table[0].line, 1);
        assert_eq!(table[1].line, 2);
        assert!(table.windows(2).all(|w| w[0].pc < w[1].pc));
        assert_eq!(program.flags & FLAG_DEBUG, FLAG_DEBUG);
    }

    #[test]
    fn test_no_debug_info_by_default() {
        let program = compile("x = 1\n");
        assert!(program.debug.is_none());
        assert_eq!(program.flags, 0);
    }
}
