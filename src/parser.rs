//! Parser for Oli
//!
//! This is a recursive descent parser that converts tokens into an AST.
//! Binary expressions use precedence climbing over [`OPERATORS`].
//!
//! Parsing fails fast: the first malformed construct is returned as a
//! [`ParseError`] and nothing after it is looked at.

use crate::ast::*;
use crate::span::{Position, Span};
use crate::token::{Token, TokenKind};
use miette::Diagnostic;
use thiserror::Error;

/// Parser errors
#[derive(Error, Diagnostic, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("expected {expected}, but got {found} (line {line})")]
    #[diagnostic(code(oli::parse::unexpected_token))]
    UnexpectedToken {
        expected: String,
        found: TokenKind,
        line: u32,
        #[label("unexpected {found}")]
        span: Span,
    },

    #[error("expected {expected}, but got end of file (line {line})")]
    #[diagnostic(code(oli::parse::unexpected_eof))]
    UnexpectedEof {
        expected: String,
        line: u32,
        #[label("file ends here")]
        span: Span,
    },

    #[error("'{name}' is a reserved name and cannot be used as a {context} (line {line})")]
    #[diagnostic(code(oli::parse::reserved_name))]
    ReservedName {
        name: String,
        context: &'static str,
        line: u32,
        #[label("reserved")]
        span: Span,
    },

    #[error("\"{keyword}\" statements can only be used inside a loop (line {line})")]
    #[diagnostic(code(oli::parse::outside_loop))]
    OutsideLoop {
        keyword: TokenKind,
        line: u32,
        #[label("not inside a loop")]
        span: Span,
    },

    #[error("unexpected {found} at program level (line {line})")]
    #[diagnostic(
        code(oli::parse::top_level),
        help("only `fn` definitions and `let` declarations may appear at the top level")
    )]
    UnexpectedTopLevel {
        found: TokenKind,
        line: u32,
        #[label("expected `fn` or `let`")]
        span: Span,
    },

    #[error("the entry function 'main' is defined more than once (line {line})")]
    #[diagnostic(code(oli::parse::duplicate_main))]
    DuplicateMain {
        line: u32,
        #[label("second definition")]
        span: Span,
    },

    #[error("the entry function 'main' cannot take parameters (line {line})")]
    #[diagnostic(code(oli::parse::main_params))]
    MainWithParams {
        line: u32,
        #[label("parameters declared here")]
        span: Span,
    },

    #[error("invalid integer literal '{text}' (line {line})")]
    #[diagnostic(code(oli::parse::invalid_integer))]
    InvalidInteger {
        text: String,
        line: u32,
        #[label("not a 32-bit integer")]
        span: Span,
    },
}

impl ParseError {
    /// Line of the offending token
    pub fn line(&self) -> u32 {
        match self {
            ParseError::UnexpectedToken { line, .. }
            | ParseError::UnexpectedEof { line, .. }
            | ParseError::ReservedName { line, .. }
            | ParseError::OutsideLoop { line, .. }
            | ParseError::UnexpectedTopLevel { line, .. }
            | ParseError::DuplicateMain { line, .. }
            | ParseError::MainWithParams { line, .. }
            | ParseError::InvalidInteger { line, .. } => *line,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            ParseError::UnexpectedToken { span, .. }
            | ParseError::UnexpectedEof { span, .. }
            | ParseError::ReservedName { span, .. }
            | ParseError::OutsideLoop { span, .. }
            | ParseError::UnexpectedTopLevel { span, .. }
            | ParseError::DuplicateMain { span, .. }
            | ParseError::MainWithParams { span, .. }
            | ParseError::InvalidInteger { span, .. } => *span,
        }
    }
}

/// Parse result
pub type ParseResult<T> = Result<T, ParseError>;

// ============ Operator table ============

/// How operators of equal precedence group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Associativity {
    Left,
    /// Supported by the climbing loop; no operator uses it yet
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorInfo {
    pub op: BinaryOp,
    pub precedence: u8,
    pub associativity: Associativity,
}

const fn left(op: BinaryOp, precedence: u8) -> OperatorInfo {
    OperatorInfo {
        op,
        precedence,
        associativity: Associativity::Left,
    }
}

/// Binary operators, loosest first
pub const OPERATORS: &[(TokenKind, OperatorInfo)] = &[
    (TokenKind::EqEq, left(BinaryOp::Eq, 0)),
    (TokenKind::NotEq, left(BinaryOp::Ne, 0)),
    (TokenKind::Lt, left(BinaryOp::Lt, 0)),
    (TokenKind::Gt, left(BinaryOp::Gt, 0)),
    (TokenKind::LtEq, left(BinaryOp::Le, 0)),
    (TokenKind::GtEq, left(BinaryOp::Ge, 0)),
    (TokenKind::Plus, left(BinaryOp::Add, 1)),
    (TokenKind::Minus, left(BinaryOp::Sub, 1)),
    (TokenKind::Star, left(BinaryOp::Mul, 2)),
    (TokenKind::Slash, left(BinaryOp::Div, 2)),
];

/// Look up a token in the operator table
pub fn binary_operator(kind: TokenKind) -> Option<OperatorInfo> {
    if !kind.is_operator() {
        return None;
    }
    OPERATORS
        .iter()
        .find(|(token, _)| *token == kind)
        .map(|(_, info)| *info)
}

/// The parser for Oli
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    /// Create a new parser. A trailing `Eof` token is added if missing.
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if tokens.last().map(|t| t.kind) != Some(TokenKind::Eof) {
            let (position, end) = tokens
                .last()
                .map(|t| (t.position, t.span.end))
                .unwrap_or((Position::new(1, 1), 0));
            tokens.push(Token::new(TokenKind::Eof, None, position, Span::point(end)));
        }
        Self { tokens, pos: 0 }
    }

    fn current(&self) -> &Token {
        self.peek_nth(0)
    }

    /// Peek at the nth token ahead (0 = current, 1 = next, etc.)
    fn peek_nth(&self, n: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + n).min(last)]
    }

    /// Advance to next token, returning the consumed one
    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    /// Check if current token matches
    fn check(&self, kind: TokenKind) -> bool {
        self.current().kind == kind
    }

    /// Check if at end of file
    fn is_at_end(&self) -> bool {
        self.check(TokenKind::Eof)
    }

    /// Consume token if it matches, otherwise error
    fn expect(&mut self, kind: TokenKind) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(format!("'{}'", kind)))
        }
    }

    /// Consume token if it matches
    fn consume(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: impl Into<String>) -> ParseError {
        let token = self.current();
        if token.kind == TokenKind::Eof {
            ParseError::UnexpectedEof {
                expected: expected.into(),
                line: token.line(),
                span: token.span,
            }
        } else {
            ParseError::UnexpectedToken {
                expected: expected.into(),
                found: token.kind,
                line: token.line(),
                span: token.span,
            }
        }
    }

    // ============ Top-level parsing ============

    /// Parse a complete program
    pub fn parse_program(&mut self) -> ParseResult<Program> {
        let mut program = Program {
            functions: Vec::new(),
            globals: Vec::new(),
            main: None,
        };

        while !self.is_at_end() {
            match self.current().kind {
                TokenKind::Fn => {
                    let function = self.parse_fn()?;
                    if function.name.name != "main" {
                        program.functions.push(function);
                        continue;
                    }
                    let line = self.line_of(function.name.span);
                    if program.main.is_some() {
                        return Err(ParseError::DuplicateMain {
                            line,
                            span: function.name.span,
                        });
                    }
                    if let (Some(first), Some(last)) = (function.params.first(), function.params.last()) {
                        return Err(ParseError::MainWithParams {
                            line,
                            span: first.span.merge(last.span),
                        });
                    }
                    program.main = Some(function);
                }
                TokenKind::Let => {
                    let decl = self.parse_let()?;
                    program.globals.push(decl);
                }
                found => {
                    let token = self.current();
                    return Err(ParseError::UnexpectedTopLevel {
                        found,
                        line: token.line(),
                        span: token.span,
                    });
                }
            }
        }

        Ok(program)
    }

    /// Line of the token starting at a span
    fn line_of(&self, span: Span) -> u32 {
        self.tokens
            .iter()
            .find(|t| t.span.start == span.start)
            .map(|t| t.line())
            .unwrap_or_else(|| self.current().line())
    }

    /// A name being declared: identifiers only, keywords are reported as
    /// reserved rather than as a generic unexpected token
    fn parse_decl_name(&mut self, context: &'static str) -> ParseResult<Ident> {
        let token = self.current();
        if token.kind.is_keyword() {
            return Err(ParseError::ReservedName {
                name: token.kind.to_string(),
                context,
                line: token.line(),
                span: token.span,
            });
        }
        self.parse_ident()
    }

    fn parse_ident(&mut self) -> ParseResult<Ident> {
        if self.check(TokenKind::Ident) {
            let token = self.advance();
            Ok(Ident::new(token.text(), token.span))
        } else {
            Err(self.unexpected("identifier"))
        }
    }

    fn parse_fn(&mut self) -> ParseResult<Function> {
        let start = self.expect(TokenKind::Fn)?.span;
        let name = self.parse_decl_name("function name")?;

        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        while !self.check(TokenKind::RParen) {
            params.push(self.parse_decl_name("function parameter name")?);
            if !self.consume(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;

        let (body, end) = self.parse_block(false)?;

        Ok(Function {
            name,
            params,
            body,
            span: start.merge(end),
        })
    }

    /// Parse `{ stmt* }`, returning the statements and the closing brace span
    fn parse_block(&mut self, in_loop: bool) -> ParseResult<(Vec<Stmt>, Span)> {
        self.expect(TokenKind::LBrace)?;

        let mut stmts = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_at_end() {
            stmts.push(self.parse_stmt(in_loop)?);
        }

        let close = self.expect(TokenKind::RBrace)?;
        Ok((stmts, close.span))
    }

    fn parse_body(&mut self, in_loop: bool) -> ParseResult<Vec<Stmt>> {
        self.parse_block(in_loop).map(|(stmts, _)| stmts)
    }

    // ============ Statements ============

    fn parse_stmt(&mut self, in_loop: bool) -> ParseResult<Stmt> {
        match self.current().kind {
            TokenKind::If => Ok(Stmt::If(self.parse_if(in_loop)?)),
            TokenKind::Return => {
                self.advance();
                let value = self.parse_expr()?;
                self.expect(TokenKind::Semicolon)?;
                Ok(Stmt::Return(value))
            }
            TokenKind::Let => Ok(Stmt::Let(self.parse_let()?)),
            TokenKind::For => Ok(Stmt::For(self.parse_for()?)),
            TokenKind::While => Ok(Stmt::While(self.parse_while()?)),
            keyword @ (TokenKind::Break | TokenKind::Continue) => {
                let token = self.advance();
                if !in_loop {
                    return Err(ParseError::OutsideLoop {
                        keyword,
                        line: token.line(),
                        span: token.span,
                    });
                }
                self.expect(TokenKind::Semicolon)?;
                if keyword == TokenKind::Break {
                    Ok(Stmt::Break(token.span))
                } else {
                    Ok(Stmt::Continue(token.span))
                }
            }
            TokenKind::Ident if self.peek_nth(1).kind == TokenKind::Eq => {
                let assignment = self.parse_assignment()?;
                self.expect(TokenKind::Semicolon)?;
                Ok(Stmt::Assign(assignment))
            }
            _ => {
                let expr = self.parse_expr()?;
                self.expect(TokenKind::Semicolon)?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    /// `let name = value;`
    fn parse_let(&mut self) -> ParseResult<VarDecl> {
        self.expect(TokenKind::Let)?;
        let decl = self.parse_var_decl()?;
        self.expect(TokenKind::Semicolon)?;
        Ok(decl)
    }

    /// `name = value`, declaring `name`
    fn parse_var_decl(&mut self) -> ParseResult<VarDecl> {
        let name = self.parse_decl_name("variable name")?;
        self.expect(TokenKind::Eq)?;
        let value = self.parse_expr()?;
        Ok(VarDecl { name, value })
    }

    /// `name = value`, assigning an existing `name`
    fn parse_assignment(&mut self) -> ParseResult<Assignment> {
        let target = self.parse_ident()?;
        self.expect(TokenKind::Eq)?;
        let value = self.parse_expr()?;
        Ok(Assignment { target, value })
    }

    fn parse_if(&mut self, in_loop: bool) -> ParseResult<IfStmt> {
        self.expect(TokenKind::If)?;

        let condition = self.parse_expr()?;
        let then_body = self.parse_body(in_loop)?;

        let else_branch = if self.consume(TokenKind::Else) {
            if self.check(TokenKind::If) {
                Some(ElseBranch::ElseIf(Box::new(self.parse_if(in_loop)?)))
            } else {
                Some(ElseBranch::Else(self.parse_body(in_loop)?))
            }
        } else {
            None
        };

        Ok(IfStmt {
            condition,
            then_body,
            else_branch,
        })
    }

    /// `for (let i = 0; cond; i = i + 1) { ... }`; the `let` is optional
    fn parse_for(&mut self) -> ParseResult<ForLoop> {
        self.expect(TokenKind::For)?;
        self.expect(TokenKind::LParen)?;

        self.consume(TokenKind::Let);
        let init = self.parse_var_decl()?;
        self.expect(TokenKind::Semicolon)?;

        let condition = self.parse_expr()?;
        self.expect(TokenKind::Semicolon)?;

        let iterator = self.parse_assignment()?;
        self.expect(TokenKind::RParen)?;

        let body = self.parse_body(true)?;

        Ok(ForLoop {
            init,
            condition,
            iterator,
            body,
        })
    }

    fn parse_while(&mut self) -> ParseResult<WhileLoop> {
        self.expect(TokenKind::While)?;
        self.expect(TokenKind::LParen)?;
        let condition = self.parse_expr()?;
        self.expect(TokenKind::RParen)?;

        let body = self.parse_body(true)?;

        Ok(WhileLoop { condition, body })
    }

    // ============ Expressions ============

    pub fn parse_expr(&mut self) -> ParseResult<Expr> {
        self.parse_binary(0)
    }

    /// Precedence climbing: fold operators binding at least `min_precedence`
    fn parse_binary(&mut self, min_precedence: u8) -> ParseResult<Expr> {
        let mut left = self.parse_atom()?;

        while let Some(info) = binary_operator(self.current().kind) {
            if info.precedence < min_precedence {
                break;
            }
            let next_min = match info.associativity {
                Associativity::Left => info.precedence + 1,
                Associativity::Right => info.precedence,
            };
            self.advance();
            let right = self.parse_binary(next_min)?;
            left = Expr::Binary {
                op: info.op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_atom(&mut self) -> ParseResult<Expr> {
        match self.current().kind {
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::IntLiteral => {
                let token = self.advance();
                let text = token.text();
                let value = text.parse::<i32>().map_err(|_| ParseError::InvalidInteger {
                    text: text.to_string(),
                    line: token.line(),
                    span: token.span,
                })?;
                Ok(Expr::Int {
                    value,
                    span: token.span,
                })
            }
            TokenKind::Ident if self.peek_nth(1).kind == TokenKind::LParen => {
                Ok(Expr::Call(self.parse_call()?))
            }
            TokenKind::Ident => Ok(Expr::Ident(self.parse_ident()?)),
            _ => Err(self.unexpected("expression")),
        }
    }

    fn parse_call(&mut self) -> ParseResult<Call> {
        let callee = self.parse_ident()?;
        self.expect(TokenKind::LParen)?;

        let mut args = Vec::new();
        while !self.check(TokenKind::RParen) {
            args.push(self.parse_expr()?);
            if self.consume(TokenKind::Comma) {
                continue;
            }
            if !self.check(TokenKind::RParen) {
                return Err(self.unexpected("',' or ')'"));
            }
        }
        let close = self.expect(TokenKind::RParen)?;

        Ok(Call {
            span: callee.span.merge(close.span),
            callee,
            args,
        })
    }
}

/// Parse a token stream into a program
pub fn parse(tokens: Vec<Token>) -> ParseResult<Program> {
    Parser::new(tokens).parse_program()
}
