//! Pipeline errors
//!
//! Each stage has its own error type; [`CompileError`] is what the
//! whole-pipeline entry points return.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::ir::GeneratorError;
use crate::lexer::LexicalError;
use crate::parser::ParseError;

#[derive(Error, Diagnostic, Debug)]
pub enum CompileError {
    /// Every lexical error in the file; the parser never ran
    #[error("{} lexical error(s) found", .errors.len())]
    #[diagnostic(code(oli::lex))]
    Lexical {
        #[related]
        errors: Vec<LexicalError>,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Generate(#[from] GeneratorError),

    #[error("expected a .{} source file, got {}", crate::FILE_EXTENSION, .path.display())]
    #[diagnostic(code(oli::extension))]
    InvalidExtension { path: PathBuf },

    #[error("failed to {action} {}", .path.display())]
    #[diagnostic(code(oli::io))]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CompileError {
    /// Name of the stage that failed
    pub fn stage(&self) -> &'static str {
        match self {
            CompileError::Lexical { .. } => "lexer",
            CompileError::Parse(_) => "parser",
            CompileError::Generate(_) => "generator",
            CompileError::InvalidExtension { .. } | CompileError::Io { .. } => "driver",
        }
    }
}
