//! Oli Compiler
//!
//! A compiler front-end for Oli, a small imperative language of 32-bit
//! integers, functions, conditionals and loops. It turns source text into
//! textual LLVM IR that `clang` or `llc` compile to a native executable.
//!
//! # Architecture
//!
//! ```text
//! Source Code (.oli)
//!       │
//!       ▼
//! ┌─────────────┐
//! │    Lexer    │  → Tokens (every lexical error collected)
//! └─────────────┘
//!       │
//!       ▼
//! ┌─────────────┐
//! │   Parser    │  → AST (stops at the first error)
//! └─────────────┘
//!       │
//!       ▼
//! ┌─────────────┐
//! │  IR Lowering│  → Oli IR (stops at the first error)
//! └─────────────┘
//!       │
//!       ▼
//! ┌─────────────┐
//! │  Code Gen   │  → LLVM IR text
//! └─────────────┘
//! ```
//!
//! No stage terminates the process; every failure is returned as a value.

pub mod lexer;
pub mod token;
pub mod span;
pub mod ast;
pub mod parser;
pub mod ir;
pub mod error;

use std::fs;
use std::path::{Path, PathBuf};

// Re-exports for convenience
pub use ast::Program;
pub use error::CompileError;
pub use ir::GeneratorError;
pub use lexer::{Lexer, LexicalError};
pub use parser::ParseError;
pub use span::Span;
pub use token::{Token, TokenKind};

/// Compiler version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// File extension for Oli source files
pub const FILE_EXTENSION: &str = "oli";

/// File extension of the generated LLVM IR
pub const OUTPUT_EXTENSION: &str = "ll";

/// Scan source text into tokens plus every lexical error found
pub fn scan(source: &str) -> (Vec<Token>, Vec<LexicalError>) {
    lexer::lex(source)
}

/// Parse a token stream, stopping at the first error
pub fn parse(tokens: Vec<Token>) -> Result<Program, ParseError> {
    parser::parse(tokens)
}

/// Lower a program and render it as LLVM IR text
pub fn generate(program: &Program) -> Result<String, GeneratorError> {
    let module = ir::lower_program(program)?;
    Ok(ir::emit_llvm(&module))
}

/// Every artifact of one successful compilation
#[derive(Debug, Clone)]
pub struct Compilation {
    pub program: Program,
    pub module: ir::Module,
    pub llvm_ir: String,
}

/// Run all three stages over a source text
pub fn compile_source(source: &str) -> Result<Compilation, CompileError> {
    let (tokens, errors) = scan(source);
    if !errors.is_empty() {
        return Err(CompileError::Lexical { errors });
    }

    let program = parse(tokens)?;
    let module = ir::lower_program(&program)?;
    let llvm_ir = ir::emit_llvm(&module);

    Ok(Compilation {
        program,
        module,
        llvm_ir,
    })
}

/// Compile a source text to LLVM IR text
pub fn compile(source: &str) -> Result<String, CompileError> {
    compile_source(source).map(|compilation| compilation.llvm_ir)
}

/// How much the driver reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Suppress progress and success messages
    pub quiet: bool,
    /// Suppress everything, including error reports
    pub silent: bool,
}

impl CompileOptions {
    pub fn reports_progress(&self) -> bool {
        !self.quiet && !self.silent
    }

    pub fn reports_errors(&self) -> bool {
        !self.silent
    }
}

/// Whether a path names an Oli source file
pub fn has_source_extension(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == FILE_EXTENSION)
}

/// `<out_dir>/<stem>.ll`, with `out_dir` defaulting to the input's directory
pub fn output_path(input: &Path, out_dir: Option<&Path>) -> PathBuf {
    let stem = input.file_stem().unwrap_or(input.as_os_str());
    let dir = out_dir
        .map(Path::to_path_buf)
        .or_else(|| input.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    let mut file = stem.to_os_string();
    file.push(".");
    file.push(OUTPUT_EXTENSION);
    dir.join(file)
}

pub fn read_source(path: &Path) -> Result<String, CompileError> {
    fs::read_to_string(path).map_err(|source| CompileError::Io {
        action: "read",
        path: path.to_path_buf(),
        source,
    })
}

/// Write LLVM IR text, creating the output directory if needed
pub fn write_output(path: &Path, llvm_ir: &str) -> Result<(), CompileError> {
    let io_error = |source| CompileError::Io {
        action: "write",
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(io_error)?;
    }
    fs::write(path, llvm_ir).map_err(io_error)
}

/// Compile a source file to `<out_dir>/<stem>.ll` and return the output path
pub fn compile_file(input: &Path, out_dir: Option<&Path>) -> Result<PathBuf, CompileError> {
    let source = read_source(input)?;
    let llvm_ir = compile(&source)?;
    let output = output_path(input, out_dir);
    write_output(&output, &llvm_ir)?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::interp::{run_module, Execution, RuntimeError};
    use crate::lexer::LexicalErrorKind;

    fn run(source: &str) -> Execution {
        let compilation = match compile_source(source) {
            Ok(compilation) => compilation,
            Err(e) => panic!("Compile error: {e}"),
        };
        match run_module(&compilation.module) {
            Ok(execution) => execution,
            Err(e) => panic!("Runtime error: {e}"),
        }
    }

    fn exit_code(source: &str) -> i32 {
        run(source).exit_code
    }

    #[test]
    fn test_precedence_end_to_end() {
        assert_eq!(exit_code("fn main() { return 2 + 3 * 4; }"), 14);
        assert_eq!(exit_code("fn main() { return (2 + 3) * 4; }"), 20);
        assert_eq!(exit_code("fn main() { return 20 - 6 - 4; }"), 10);
    }

    #[test]
    fn test_assignment_scenario() {
        assert_eq!(exit_code("fn main() { let a = 2; a = a + 3; return a; }"), 5);
    }

    #[test]
    fn test_for_loop_scenario() {
        assert_eq!(
            exit_code("fn main() { for (let i = 0; i < 3; i = i + 1) { } return i; }"),
            3
        );
    }

    #[test]
    fn test_print_scenario() {
        let execution = run("fn main() { print(42); return 0; }");
        assert_eq!(execution.stdout, "42\n");
        assert_eq!(execution.exit_code, 0);
    }

    #[test]
    fn test_nested_while_scenario() {
        let source = "
            fn main() {
                let count = 0;
                let i = 0;
                while (i < 3) {
                    let j = 0;
                    while (j < 3) {
                        count = count + 1;
                        j++;
                    }
                    i++;
                }
                return count;
            }";
        assert_eq!(exit_code(source), 9);
    }

    #[test]
    fn test_redeclaration_in_function_is_generator_error() {
        let err = compile("fn main() { let a = 1; if a { let a = 2; } return a; }").unwrap_err();
        assert!(matches!(
            err,
            CompileError::Generate(GeneratorError::AlreadyDeclared { .. })
        ));
    }

    #[test]
    fn test_leading_zero_is_lexical_error() {
        let err = compile("fn main() { return 012; }").unwrap_err();
        let CompileError::Lexical { errors } = err else {
            panic!("expected lexical errors, got {err:?}");
        };
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, LexicalErrorKind::LeadingZero('1'));
    }

    #[test]
    fn test_all_lexical_errors_reported_together() {
        let err = compile("fn main() { let a = 01; @ return 0; }").unwrap_err();
        assert!(matches!(err, CompileError::Lexical { ref errors } if errors.len() == 2));
    }

    #[test]
    fn test_undeclared_function_is_generator_error() {
        let err = compile("fn main() { return missing(); }").unwrap_err();
        assert!(matches!(
            err,
            CompileError::Generate(GeneratorError::UndefinedFunction { .. })
        ));
    }

    #[test]
    fn test_break_outside_loop_is_parse_error() {
        let err = compile("fn main() { break; }").unwrap_err();
        assert!(matches!(err, CompileError::Parse(ParseError::OutsideLoop { .. })));
    }

    #[test]
    fn test_shadowing_leaves_global_untouched() {
        let source = "
            let x = 10;
            fn read() { return x; }
            fn main() {
                let x = 1;
                x = x + 5;
                return read() * 100 + x;
            }";
        assert_eq!(exit_code(source), 1006);
    }

    #[test]
    fn test_global_initialiser_order() {
        // `b` is still zero when `a` is initialised
        let source = "let a = b + 1; let b = 5; fn main() { return a * 10 + b; }";
        assert_eq!(exit_code(source), 15);
    }

    #[test]
    fn test_globals_are_shared_between_functions() {
        let source = "
            let counter = 0;
            fn bump(by) { counter = counter + by; return counter; }
            fn main() { bump(2); bump(3); return counter; }";
        assert_eq!(exit_code(source), 5);
    }

    #[test]
    fn test_break_and_continue_semantics() {
        let source = "
            fn main() {
                let sum = 0;
                for (let i = 0; i < 10; i++) {
                    if i == 2 { continue; }
                    if i == 5 { break; }
                    sum = sum + i;
                }
                let n = 0;
                while (1) {
                    n++;
                    if n < 4 { continue; } else { break; }
                }
                return sum * 100 + n;
            }";
        // 0 + 1 + 3 + 4
        assert_eq!(exit_code(source), 804);
    }

    #[test]
    fn test_else_if_chain() {
        let source = "
            fn classify(n) {
                if n < 0 { return 0 - 1; } else if n == 0 { return 0; } else { return 1; }
            }
            fn main() {
                print(classify(0 - 5));
                print(classify(0));
                print(classify(7));
                return 0;
            }";
        assert_eq!(run(source).stdout, "-1\n0\n1\n");
    }

    #[test]
    fn test_comparison_results_are_integers() {
        assert_eq!(exit_code("fn main() { return (3 > 2) + (2 > 3) + (1 == 1); }"), 2);
        assert_eq!(exit_code("fn main() { let t = 5 >= 5; if t { return 7; } return 0; }"), 7);
    }

    #[test]
    fn test_functions_may_call_later_functions_and_recurse() {
        let source = "
            fn main() { return fib(10); }
            fn fib(n) { if n < 2 { return n; } return fib(n - 1) + fib(n - 2); }";
        assert_eq!(exit_code(source), 55);
    }

    #[test]
    fn test_division_by_zero_is_reported_at_runtime() {
        let compilation = compile_source("fn main() { return 1 / 0; }").unwrap();
        assert!(matches!(
            run_module(&compilation.module),
            Err(RuntimeError::DivisionByZero { .. })
        ));
    }

    #[test]
    fn test_compile_is_idempotent() {
        let source = "let g = 4; fn f(a) { while (a > 0) { a--; g++; } return g; } fn main() { print(f(3)); }";
        assert_eq!(compile(source).unwrap(), compile(source).unwrap());
        let program = compile_source(source).unwrap().program;
        assert_eq!(generate(&program).unwrap(), generate(&program).unwrap());
    }

    #[test]
    fn test_stage_entry_points() {
        let (tokens, errors) = scan("fn main() { return 1; }");
        assert!(errors.is_empty());
        let program = parse(tokens).unwrap();
        let ir = generate(&program).unwrap();
        assert!(ir.contains("define i32 @main()"));
    }

    #[test]
    fn test_output_path() {
        assert_eq!(
            output_path(Path::new("src/prog.oli"), None),
            PathBuf::from("src/prog.ll")
        );
        assert_eq!(
            output_path(Path::new("src/prog.oli"), Some(Path::new("build"))),
            PathBuf::from("build/prog.ll")
        );
        assert_eq!(output_path(Path::new("prog.oli"), None), PathBuf::from("prog.ll"));
        assert_eq!(output_path(Path::new("prog.v2.oli"), None), PathBuf::from("prog.v2.ll"));
    }

    #[test]
    fn test_source_extension() {
        assert!(has_source_extension(Path::new("a/b.oli")));
        assert!(!has_source_extension(Path::new("a/b.ts")));
        assert!(!has_source_extension(Path::new("oli")));
    }

    #[test]
    fn test_compile_file_writes_ll() {
        let dir = std::env::temp_dir().join(format!("oli-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let input = dir.join("answer.oli");
        fs::write(&input, "fn main() { return 42; }").unwrap();

        let output = compile_file(&input, Some(&dir.join("out"))).unwrap();
        assert_eq!(output, dir.join("out").join("answer.ll"));
        let text = fs::read_to_string(&output).unwrap();
        assert!(text.contains("ret i32 42"));

        let missing = compile_file(&dir.join("missing.oli"), None).unwrap_err();
        assert!(matches!(missing, CompileError::Io { action: "read", .. }));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_compile_options() {
        let quiet = CompileOptions { quiet: true, silent: false };
        assert!(!quiet.reports_progress());
        assert!(quiet.reports_errors());
        let silent = CompileOptions { quiet: false, silent: true };
        assert!(!silent.reports_progress());
        assert!(!silent.reports_errors());
        assert!(CompileOptions::default().reports_progress());
    }
}
