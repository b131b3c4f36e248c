//! Lexer for Oli
//!
//! The lexer converts source code into a stream of tokens.
//! It uses the `logos` crate for efficient lexing and layers the language's
//! own rules on top: leading-zero literals, block comment termination,
//! unknown characters, and the rewrite of `x++`/`x--` into `x = x + 1`.
//!
//! Lexing never stops early. Every problem in the file is collected so they
//! can all be reported together.

use crate::span::{LineIndex, Position, Span};
use crate::token::{Token, TokenKind};
use logos::Logos;
use miette::Diagnostic;
use thiserror::Error;

/// What went wrong at a lexical error site
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LexicalErrorKind {
    #[error("unknown character '{0}'")]
    UnknownCharacter(char),

    #[error("unexpected '{0}' after leading zero in integer literal")]
    LeadingZero(char),

    #[error("integer literal {0} does not fit in a 32-bit signed integer")]
    IntegerOutOfRange(String),

    #[error("expected end of multiline comment \"*/\" but found end of file")]
    UnterminatedBlockComment,

    #[error("'{0}' must directly follow a variable name")]
    DanglingIncrement(TokenKind),
}

/// A lexical error with its location
#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
#[error("{kind} (line {}, column {})", .position.line, .position.column)]
#[diagnostic(code(oli::lex))]
pub struct LexicalError {
    pub kind: LexicalErrorKind,
    pub position: Position,
    #[label("here")]
    pub span: Span,
}

impl LexicalError {
    pub fn new(kind: LexicalErrorKind, position: Position, span: Span) -> Self {
        Self {
            kind,
            position,
            span,
        }
    }

    pub fn line(&self) -> u32 {
        self.position.line
    }

    pub fn column(&self) -> u32 {
        self.position.column
    }
}

/// The lexer for Oli
pub struct Lexer<'src> {
    source: &'src str,
    inner: logos::Lexer<'src, TokenKind>,
    lines: LineIndex<'src>,
    tokens: Vec<Token>,
    errors: Vec<LexicalError>,
}

impl<'src> Lexer<'src> {
    /// Create a new lexer for the given source code
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            inner: TokenKind::lexer(source),
            lines: LineIndex::new(source),
            tokens: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn error(&mut self, kind: LexicalErrorKind, span: Span) {
        let position = self.lines.position(span.start);
        self.errors.push(LexicalError::new(kind, position, span));
    }

    /// Collect all tokens into a vector, terminated by an `Eof` token
    pub fn tokenize(mut self) -> (Vec<Token>, Vec<LexicalError>) {
        while let Some(result) = self.inner.next() {
            let range = self.inner.span();
            let span = Span::new(range.start, range.end);
            let slice = self.inner.slice();

            match result {
                Ok(TokenKind::BlockComment) => {
                    let terminated = slice.len() >= 4 && slice.ends_with("*/");
                    if !terminated {
                        self.error(
                            LexicalErrorKind::UnterminatedBlockComment,
                            Span::point(self.source.len()),
                        );
                    }
                }
                Ok(TokenKind::IntLiteral) => {
                    self.check_integer(slice, span);
                    self.push(TokenKind::IntLiteral, Some(slice.to_string()), span);
                }
                Ok(TokenKind::Ident) => {
                    self.push(TokenKind::Ident, Some(slice.to_string()), span);
                }
                Ok(kind @ (TokenKind::PlusPlus | TokenKind::MinusMinus)) => {
                    self.desugar_step(kind, span);
                }
                Ok(kind) => self.push(kind, None, span),
                Err(()) => {
                    for (offset, c) in slice.char_indices() {
                        let start = span.start + offset;
                        let char_span = Span::new(start, start + c.len_utf8());
                        self.error(LexicalErrorKind::UnknownCharacter(c), char_span);
                        self.push(TokenKind::Unknown, None, char_span);
                    }
                }
            }
        }

        let end = Span::point(self.source.len());
        self.push(TokenKind::Eof, None, end);

        (self.tokens, self.errors)
    }

    fn push(&mut self, kind: TokenKind, value: Option<String>, span: Span) {
        let position = self.lines.position(span.start);
        self.tokens.push(Token::new(kind, value, position, span));
    }

    /// Leading zeros are rejected, but the literal is still emitted so the
    /// rest of the file keeps lexing normally.
    fn check_integer(&mut self, text: &str, span: Span) {
        let mut chars = text.chars();
        if let (Some('0'), Some(second)) = (chars.next(), chars.next()) {
            let digit_span = Span::new(span.start + 1, span.start + 2);
            self.error(LexicalErrorKind::LeadingZero(second), digit_span);
            return;
        }
        if text.parse::<i32>().is_err() {
            self.error(LexicalErrorKind::IntegerOutOfRange(text.to_string()), span);
        }
    }

    /// Rewrite `x++` / `x--` in place as `x = x + 1` / `x = x - 1`, reusing
    /// the identifier token that was just emitted.
    fn desugar_step(&mut self, kind: TokenKind, span: Span) {
        let target = match self.tokens.last() {
            Some(token) if token.kind == TokenKind::Ident => token.clone(),
            _ => {
                self.error(LexicalErrorKind::DanglingIncrement(kind), span);
                return;
            }
        };

        let op = if kind == TokenKind::PlusPlus {
            TokenKind::Plus
        } else {
            TokenKind::Minus
        };

        self.push(TokenKind::Eq, None, span);
        self.push(TokenKind::Ident, target.value, span);
        self.push(op, None, span);
        self.push(TokenKind::IntLiteral, Some("1".to_string()), span);
    }
}

/// Scan source code into tokens plus every lexical error found
pub fn lex(source: &str) -> (Vec<Token>, Vec<LexicalError>) {
    Lexer::new(source).tokenize()
}
