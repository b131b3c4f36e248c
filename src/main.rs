//! Oli Compiler CLI
//!
//! The `olc` command is the main entry point for the Oli compiler.

use clap::{Parser, Subcommand};
use miette::{NamedSource, Report};
use oli::ir::{self, interp};
use oli::{CompileError, CompileOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "olc")]
#[command(version = oli::VERSION)]
#[command(about = "The Oli Compiler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile an Oli source file to LLVM IR
    Build {
        /// Input file to compile
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Directory for the generated .ll file (defaults to the input's directory)
        #[arg(short = 'o', long, value_name = "DIR")]
        out_dir: Option<PathBuf>,

        /// Emit tokens (for debugging)
        #[arg(long)]
        emit_tokens: bool,

        /// Emit AST (for debugging)
        #[arg(long)]
        emit_ast: bool,

        /// Emit Oli IR (for debugging)
        #[arg(long)]
        emit_ir: bool,

        /// Only report errors
        #[arg(short, long)]
        quiet: bool,

        /// Report nothing; failure is signalled by the exit status only
        #[arg(short, long)]
        silent: bool,
    },

    /// Check a file for errors without writing output
    Check {
        /// Input file to check
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },

    /// Tokenize a file and print tokens
    Tokenize {
        /// Input file to tokenize
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },

    /// Parse a file and print AST
    Parse {
        /// Input file to parse
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },

    /// Compile a file and execute it with the IR interpreter
    Run {
        /// Input file to run
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },
}

/// Check the extension and read the file
fn load(input: &Path) -> Result<String, CompileError> {
    if !oli::has_source_extension(input) {
        return Err(CompileError::InvalidExtension {
            path: input.to_path_buf(),
        });
    }
    oli::read_source(input)
}

/// Attach the source text so labels render against it
fn report(err: CompileError, input: &Path, source: &str) -> Report {
    Report::new(err).with_source_code(NamedSource::new(input.display().to_string(), source.to_string()))
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            input,
            out_dir,
            emit_tokens,
            emit_ast,
            emit_ir,
            quiet,
            silent,
        } => {
            let options = CompileOptions { quiet, silent };
            let started = Instant::now();

            let source = match load(&input) {
                Ok(source) => source,
                Err(_) if !options.reports_errors() => process::exit(1),
                Err(err) => return Err(err.into()),
            };

            if options.reports_progress() {
                println!("Compiling {}...", input.display());
            }

            if emit_tokens {
                println!("\n=== Tokens ===");
                let (tokens, _) = oli::scan(&source);
                for token in &tokens {
                    println!("{:?} @ {} = {:?}", token.kind, token.position, token.text());
                }
            }

            let compilation = match oli::compile_source(&source) {
                Ok(compilation) => compilation,
                Err(_) if !options.reports_errors() => process::exit(1),
                Err(err) => return Err(report(err, &input, &source)),
            };

            if emit_ast {
                println!("\n=== AST ===");
                println!("{:#?}", compilation.program);
            }

            if emit_ir {
                println!("\n=== Oli IR ===");
                println!("{}", ir::print_module(&compilation.module));
            }

            let output = oli::output_path(&input, out_dir.as_deref());
            match oli::write_output(&output, &compilation.llvm_ir) {
                Ok(()) => {}
                Err(_) if !options.reports_errors() => process::exit(1),
                Err(err) => return Err(err.into()),
            }

            if options.reports_progress() {
                println!("Wrote {}", output.display());
                println!(
                    "Successfully compiled in {:.3} seconds",
                    started.elapsed().as_secs_f64()
                );
            }
            Ok(())
        }

        Commands::Check { input } => {
            let source = load(&input)?;

            println!("Checking {}...", input.display());

            match oli::compile_source(&source) {
                Ok(compilation) => {
                    println!(
                        "No errors found! ({} function(s), {} global(s))",
                        compilation.program.functions.len() + 1,
                        compilation.program.globals.len()
                    );
                    Ok(())
                }
                Err(err) => Err(report(err, &input, &source)),
            }
        }

        Commands::Tokenize { input } => {
            let source = load(&input)?;

            let (tokens, errors) = oli::scan(&source);

            for token in &tokens {
                println!(
                    "{:>4}:{:<4} {:20} {:?}",
                    token.position.line,
                    token.position.column,
                    format!("{:?}", token.kind),
                    token.text()
                );
            }

            if !errors.is_empty() {
                return Err(report(CompileError::Lexical { errors }, &input, &source));
            }

            Ok(())
        }

        Commands::Parse { input } => {
            let source = load(&input)?;

            let (tokens, errors) = oli::scan(&source);
            if !errors.is_empty() {
                return Err(report(CompileError::Lexical { errors }, &input, &source));
            }

            match oli::parse(tokens) {
                Ok(program) => {
                    println!("{:#?}", program);
                    Ok(())
                }
                Err(err) => Err(report(err.into(), &input, &source)),
            }
        }

        Commands::Run { input } => {
            let source = load(&input)?;

            let compilation = oli::compile_source(&source).map_err(|err| report(err, &input, &source))?;
            let execution = interp::run_module(&compilation.module)?;

            // exit skips the buffered writer's drop, so flush first
            execution
                .write_stdout(&mut io::stdout())
                .map_err(|e| miette::miette!("Failed to write program output: {}", e))?;
            process::exit(execution.exit_code);
        }
    }
}
