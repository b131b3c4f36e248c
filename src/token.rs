//! Token definitions for Oli
//!
//! This module defines all the tokens that the lexer can produce.

use crate::span::{Position, Span};
use logos::Logos;
use std::fmt;

/// A token produced by the lexer
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Text of identifiers and integer literals, `None` for everything else
    pub value: Option<String>,
    pub position: Position,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, value: Option<String>, position: Position, span: Span) -> Self {
        Self {
            kind,
            value,
            position,
            span,
        }
    }

    pub fn line(&self) -> u32 {
        self.position.line
    }

    /// The token's value, or an empty string for valueless tokens
    pub fn text(&self) -> &str {
        self.value.as_deref().unwrap_or("")
    }
}

/// All possible token types in Oli
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[logos(skip r"[ \t\r\n\f]+")] // Skip whitespace
#[logos(skip r"//[^\n]*")] // Skip line comments
pub enum TokenKind {
    // ============ Literals ============

    /// Integer literal: 0, 42
    #[regex(r"[0-9]+")]
    IntLiteral,

    // ============ Keywords ============

    #[token("fn")]
    Fn,
    #[token("let")]
    Let,
    #[token("return")]
    Return,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("for")]
    For,
    #[token("while")]
    While,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,

    // ============ Operators ============

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,

    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("<=")]
    LtEq,
    #[token(">=")]
    GtEq,

    #[token("=")]
    Eq,

    /// `++`, rewritten by the lexer into `x = x + 1`
    #[token("++")]
    PlusPlus,
    /// `--`, rewritten by the lexer into `x = x - 1`
    #[token("--")]
    MinusMinus,

    // ============ Delimiters ============

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,

    // ============ Punctuation ============

    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,

    // ============ Identifiers ============

    /// Identifier: foo, _bar, count2
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,

    // ============ Special ============

    /// Block comment, consumed up to the closing `*/` (or end of input)
    #[token("/*", block_comment)]
    BlockComment,

    /// A character no rule matched; always paired with a lexical error
    Unknown,

    /// End of file
    Eof,
}

/// Consume a block comment body. Always succeeds so the lexer can report an
/// unterminated comment with a proper position instead of a bare logos error.
fn block_comment(lex: &mut logos::Lexer<TokenKind>) -> bool {
    match lex.remainder().find("*/") {
        Some(end) => lex.bump(end + 2),
        None => lex.bump(lex.remainder().len()),
    }
    true
}

/// Words that can never name a variable, parameter or function
pub const RESERVED_NAMES: &[&str] = &[
    "fn", "let", "return", "if", "else", "for", "while", "break", "continue",
];

/// Check whether a name is reserved
pub fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}

impl TokenKind {
    /// Check if this token is a keyword
    pub fn is_keyword(&self) -> bool {
        matches!(
            self,
            TokenKind::Fn
                | TokenKind::Let
                | TokenKind::Return
                | TokenKind::If
                | TokenKind::Else
                | TokenKind::For
                | TokenKind::While
                | TokenKind::Break
                | TokenKind::Continue
        )
    }

    /// Check if this token is a binary operator
    pub fn is_operator(&self) -> bool {
        matches!(
            self,
            TokenKind::Plus
                | TokenKind::Minus
                | TokenKind::Star
                | TokenKind::Slash
                | TokenKind::EqEq
                | TokenKind::NotEq
                | TokenKind::Lt
                | TokenKind::Gt
                | TokenKind::LtEq
                | TokenKind::GtEq
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenKind::IntLiteral => "integer",
            TokenKind::Fn => "fn",
            TokenKind::Let => "let",
            TokenKind::Return => "return",
            TokenKind::If => "if",
            TokenKind::Else => "else",
            TokenKind::For => "for",
            TokenKind::While => "while",
            TokenKind::Break => "break",
            TokenKind::Continue => "continue",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::EqEq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::LtEq => "<=",
            TokenKind::GtEq => ">=",
            TokenKind::Eq => "=",
            TokenKind::PlusPlus => "++",
            TokenKind::MinusMinus => "--",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::Comma => ",",
            TokenKind::Semicolon => ";",
            TokenKind::Ident => "identifier",
            TokenKind::BlockComment => "comment",
            TokenKind::Unknown => "unknown character",
            TokenKind::Eof => "end of file",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_are_reserved() {
        for name in RESERVED_NAMES {
            assert!(is_reserved(name));
            let mut lexer = TokenKind::lexer(name);
            let kind = lexer.next().unwrap().unwrap();
            assert!(kind.is_keyword(), "{name} should lex as a keyword");
        }
    }

    #[test]
    fn test_print_is_not_reserved() {
        assert!(!is_reserved("print"));
        assert!(!is_reserved("main"));
    }

    #[test]
    fn test_keyword_prefix_is_identifier() {
        let mut lexer = TokenKind::lexer("iffy letter");
        assert_eq!(lexer.next(), Some(Ok(TokenKind::Ident)));
        assert_eq!(lexer.next(), Some(Ok(TokenKind::Ident)));
        assert_eq!(lexer.next(), None);
    }

    #[test]
    fn test_block_comment_spans_to_terminator() {
        let mut lexer = TokenKind::lexer("/* a * b */ x");
        assert_eq!(lexer.next(), Some(Ok(TokenKind::BlockComment)));
        assert_eq!(lexer.slice(), "/* a * b */");
        assert_eq!(lexer.next(), Some(Ok(TokenKind::Ident)));
    }
}
