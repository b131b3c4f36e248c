//! Abstract Syntax Tree for Oli
//!
//! The AST is built once by the parser and only read afterwards.
//! Every value in the language is an implicit 32-bit signed integer, so the
//! tree carries no type annotations.

use crate::span::Span;
use std::fmt;

/// A complete program
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    /// Every function except the entry function, in declaration order
    pub functions: Vec<Function>,
    /// Global `let` declarations, in declaration order
    pub globals: Vec<VarDecl>,
    /// The function named `main`
    pub main: Option<Function>,
}

/// An identifier with its location
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

impl Ident {
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            span,
        }
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Function definition: `fn name(a, b) { ... }`
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: Ident,
    pub params: Vec<Ident>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

impl Function {
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

// ============ Statements ============

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `let name = value;`
    Let(VarDecl),
    /// `return value;`
    Return(Expr),
    /// `expr;`
    Expr(Expr),
    If(IfStmt),
    For(ForLoop),
    While(WhileLoop),
    /// `name = value;`
    Assign(Assignment),
    /// `break;`
    Break(Span),
    /// `continue;`
    Continue(Span),
}

/// Variable declaration (global or local)
#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: Ident,
    pub value: Expr,
}

/// Assignment to an existing variable
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub target: Ident,
    pub value: Expr,
}

/// `if cond { ... } else if ... else { ... }`
#[derive(Debug, Clone, PartialEq)]
pub struct IfStmt {
    pub condition: Expr,
    pub then_body: Vec<Stmt>,
    pub else_branch: Option<ElseBranch>,
}

/// The tail of an `if`: either another `if` in the chain or a final block
#[derive(Debug, Clone, PartialEq)]
pub enum ElseBranch {
    ElseIf(Box<IfStmt>),
    Else(Vec<Stmt>),
}

/// `for (init; condition; iterator) { ... }`
#[derive(Debug, Clone, PartialEq)]
pub struct ForLoop {
    pub init: VarDecl,
    pub condition: Expr,
    pub iterator: Assignment,
    pub body: Vec<Stmt>,
}

/// `while (condition) { ... }`
#[derive(Debug, Clone, PartialEq)]
pub struct WhileLoop {
    pub condition: Expr,
    pub body: Vec<Stmt>,
}

// ============ Expressions ============

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Integer literal
    Int { value: i32, span: Span },
    /// Variable read
    Ident(Ident),
    /// Function call (including the `print` builtin)
    Call(Call),
    /// Binary operation
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Int { span, .. } => *span,
            Expr::Ident(ident) => ident.span,
            Expr::Call(call) => call.span,
            Expr::Binary { left, right, .. } => left.span().merge(right.span()),
        }
    }
}

/// `callee(arg, ...)`
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub callee: Ident,
    pub args: Vec<Expr>,
    pub span: Span,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    // Comparison
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl BinaryOp {
    /// Comparisons produce a 1-bit result; everything else an integer
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge
        )
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
        };
        write!(f, "{}", s)
    }
}
