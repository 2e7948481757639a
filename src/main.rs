use std::path::Path;
use std::{env, fs, process};

use pyvm::bytecode::compile::Compiler;
use pyvm::bytecode::program::Program;
use pyvm::bytecode::{disasm, file};
use pyvm::frontend::lexer::Lexer;
use pyvm::frontend::parser::Parser;
use pyvm::runtime::vm::{Vm, VmConfig};

const EXIT_COMPILE_ERROR: i32 = 1;
const EXIT_LOAD_ERROR: i32 = 2;
const EXIT_RUNTIME_ERROR: i32 = 3;
const EXIT_USAGE_ERROR: i32 = 4;

const KNOWN_FLAGS: &[&str] = &[
    "--compile",
    "--debug",
    "--show-bytecode",
    "--info",
    "--performance",
    "--help",
    "-h",
];

struct Options {
    compile: bool,
    debug: bool,
    show_bytecode: bool,
    info: bool,
    performance: bool,
}

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return;
    }

    for arg in args.iter().skip(1) {
        if arg.starts_with('-') && !KNOWN_FLAGS.contains(&arg.as_str()) {
            eprintln!("unknown option '{}'", arg);
            print_usage();
            process::exit(EXIT_USAGE_ERROR);
        }
    }

    let options = Options {
        compile: args.iter().any(|a| a == "--compile"),
        debug: args.iter().any(|a| a == "--debug"),
        show_bytecode: args.iter().any(|a| a == "--show-bytecode"),
        info: args.iter().any(|a| a == "--info"),
        performance: args.iter().any(|a| a == "--performance"),
    };

    // First non-flag argument is the input path.
    let path = match args.iter().skip(1).find(|a| !a.starts_with('-')) {
        Some(path) => path.clone(),
        None => {
            eprintln!("error: expected a source (.py) or bytecode (.pvm) file");
            print_usage();
            process::exit(EXIT_USAGE_ERROR);
        }
    };
    let path = Path::new(&path);

    let is_bytecode = path.extension().and_then(|e| e.to_str()) == Some("pvm");
    if is_bytecode {
        bytecode_main(path, &options);
    } else {
        source_main(path, &options);
    }
}

fn print_usage() {
    println!("pyvm - compiler and stack VM for a small Python subset");
    println!();
    println!("Usage:");
    println!("  pyvm <file.py>                  Compile and run a source file");
    println!("  pyvm <file.py> --compile        Compile to <file>.pvm");
    println!("  pyvm <file.pvm>                 Run a compiled bytecode file");
    println!("  pyvm <file> --show-bytecode     Show tables and disassembly");
    println!("  pyvm <file.pvm> --info          Show container header and tables");
    println!("  pyvm <file> --debug             Embed debug info / trace execution");
    println!("  pyvm <file> --performance       Print execution statistics after the run");
    println!("  pyvm --help                     Show this help");
}

// ─────────────────────────────── Source path ────────────────────────────────

fn source_main(path: &Path, options: &Options) {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", path.display(), e);
            process::exit(EXIT_USAGE_ERROR);
        }
    };

    let program = compile_source(&source, options.debug);

    if options.compile {
        let out_path = path.with_extension("pvm");
        if let Err(e) = fs::write(&out_path, file::serialize(&program)) {
            eprintln!("error: cannot write '{}': {}", out_path.display(), e);
            process::exit(EXIT_USAGE_ERROR);
        }
        println!("compiled: {} -> {}", path.display(), out_path.display());
        return;
    }

    if options.show_bytecode {
        print!("{}", disasm::dump(&program));
        return;
    }

    if options.info {
        let bytes = file::serialize(&program);
        print_info(path, bytes.len(), &program);
        return;
    }

    run_program(&program, options);
}

fn compile_source(source: &str, debug: bool) -> Program {
    let tokens = match Lexer::new(source).tokenize() {
        Ok(tokens) => tokens,
        Err(e) => {
            eprintln!("lex error: {}", e);
            process::exit(EXIT_COMPILE_ERROR);
        }
    };
    if debug {
        eprintln!("lexed {} tokens", tokens.len());
    }

    let ast = match Parser::new(tokens).parse() {
        Ok(ast) => ast,
        Err(e) => {
            eprintln!("parse error: {}", e);
            process::exit(EXIT_COMPILE_ERROR);
        }
    };
    if debug {
        eprintln!("parsed {} top-level statements", ast.statements.len());
    }

    let compiler = if debug {
        Compiler::new().with_debug_info()
    } else {
        Compiler::new()
    };
    match compiler.compile_program(&ast) {
        Ok(program) => {
            if debug {
                eprintln!(
                    "generated {} bytes of code, {} constants, {} symbols",
                    program.code.len(),
                    program.constants.len(),
                    program.symbols.len()
                );
            }
            program
        }
        Err(e) => {
            eprintln!("{}", e);
            process::exit(EXIT_COMPILE_ERROR);
        }
    }
}

// ─────────────────────────────── Bytecode path ──────────────────────────────

fn bytecode_main(path: &Path, options: &Options) {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", path.display(), e);
            process::exit(EXIT_USAGE_ERROR);
        }
    };

    let program = match file::load(&bytes) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(EXIT_LOAD_ERROR);
        }
    };
    if options.debug {
        eprintln!(
            "loaded {}: {} constants, {} symbols, {} code bytes",
            path.display(),
            program.constants.len(),
            program.symbols.len(),
            program.code.len()
        );
    }

    if options.info {
        print_info(path, bytes.len(), &program);
        return;
    }

    if options.show_bytecode {
        print!("{}", disasm::dump(&program));
        return;
    }

    run_program(&program, options);
}

// ───────────────────────────────── Execution ────────────────────────────────

fn run_program(program: &Program, options: &Options) {
    let config = VmConfig {
        trace: options.debug,
        ..VmConfig::default()
    };
    let mut vm = Vm::with_config(config);

    if let Err(e) = vm.run(program) {
        eprintln!("{}", e);
        if let Some(pc) = e.pc {
            if let Some(loc) = program.source_location(pc) {
                eprintln!("  source line {}, column {}", loc.line, loc.column);
            }
        }
        process::exit(EXIT_RUNTIME_ERROR);
    }

    if options.performance {
        println!();
        println!(
            "{}",
            vm.stats()
                .report(program.constants.len(), program.var_count(), vm.stack_depth())
        );
    }
}

fn print_info(path: &Path, file_size: usize, program: &Program) {
    println!("=== bytecode file info ===");
    println!("file: {}", path.display());
    println!("file size: {} bytes", file_size);
    println!("version: 0x{:04X}", program.version);
    println!("flags: 0x{:04X}", program.flags);
    println!("constants: {}", program.constants.len());
    println!("symbols: {}", program.symbols.len());
    println!("code size: {} bytes", program.code.len());
    println!("header size: {} bytes", file::HEADER_SIZE);

    let header_percent = (file::HEADER_SIZE as f64 / file_size as f64) * 100.0;
    let code_percent = (program.code.len() as f64 / file_size as f64) * 100.0;
    println!();
    println!("size distribution:");
    println!("  header: {:.1}%", header_percent);
    println!("  code:   {:.1}%", code_percent);
    println!("  tables: {:.1}%", 100.0 - header_percent - code_percent);

    println!();
    print!("{}", disasm::tables(program));
}
