//! AST to IR Lowering
//!
//! Converts the parsed AST into Oli IR.
//!
//! Lowering is a single depth-first walk. Statement lowering receives the
//! block it starts in and returns a [`Flow`] saying whether control falls out
//! of it (and from which block), so control-flow joins are explicit.
//! The innermost enclosing loop is passed down as an optional [`LoopContext`].

use std::collections::HashMap;

use miette::Diagnostic;
use thiserror::Error;

use super::builder::IrBuilder;
use super::instr::{CmpOp, Value};
use super::types::{BlockId, Constant, IrType, Module, VReg};
use crate::ast::{self, Assignment, BinaryOp, Call, ElseBranch, Expr, ForLoop, IfStmt, Program, Stmt, VarDecl, WhileLoop};
use crate::span::Span;
use crate::token::is_reserved;

/// Name of the entry function in the output module
pub const ENTRY_FUNCTION: &str = "main";
/// Built-in call printing one integer and a newline
pub const PRINT_BUILTIN: &str = "print";
/// External formatted-output primitive behind `print`
pub const PRINTF: &str = "printf";
/// Format template passed to [`PRINTF`]
pub const PRINT_FORMAT: &str = "%d\n";
/// Global holding [`PRINT_FORMAT`]
pub const FORMAT_GLOBAL: &str = ".fmt";

/// Errors raised while lowering a program
#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum GeneratorError {
    #[error("undefined variable: {name}")]
    #[diagnostic(code(oli::generate::undefined_variable))]
    UndefinedVariable {
        name: String,
        #[label("not declared in this scope")]
        span: Span,
    },

    #[error("undefined function: {name}")]
    #[diagnostic(code(oli::generate::undefined_function))]
    UndefinedFunction {
        name: String,
        #[label("no function with this name")]
        span: Span,
    },

    #[error("function {name} expects {expected} argument(s), but {found} were given")]
    #[diagnostic(code(oli::generate::arity))]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
        #[label("called here")]
        span: Span,
    },

    #[error("variable {name} already defined")]
    #[diagnostic(code(oli::generate::already_declared))]
    AlreadyDeclared {
        name: String,
        #[label("redeclared here")]
        span: Span,
    },

    #[error("'{name}' is a reserved name")]
    #[diagnostic(code(oli::generate::reserved_name))]
    ReservedName {
        name: String,
        #[label("reserved")]
        span: Span,
    },

    #[error("main function not found")]
    #[diagnostic(
        code(oli::generate::missing_main),
        help("every program needs an entry point: `fn main() {{ ... }}`")
    )]
    MissingMain,

    #[error("function {name} already defined")]
    #[diagnostic(code(oli::generate::duplicate_function))]
    DuplicateFunction {
        name: String,
        #[label("redefined here")]
        span: Span,
    },

    #[error("\"{keyword}\" used outside of a loop")]
    #[diagnostic(code(oli::generate::outside_loop))]
    LoopControlOutsideLoop {
        keyword: &'static str,
        #[label("no enclosing loop")]
        span: Span,
    },

    #[error("'{name}' clashes with another symbol in the output module")]
    #[diagnostic(
        code(oli::generate::symbol_clash),
        help("`main`, `printf`, functions and globals share one namespace")
    )]
    SymbolClash {
        name: String,
        #[label("already used")]
        span: Span,
    },

    #[error("internal error: block {block} of function {function} has no terminator")]
    #[diagnostic(code(oli::generate::unterminated_block))]
    UnterminatedBlock { function: String, block: String },
}

impl GeneratorError {
    pub fn span(&self) -> Option<Span> {
        match self {
            GeneratorError::UndefinedVariable { span, .. }
            | GeneratorError::UndefinedFunction { span, .. }
            | GeneratorError::ArityMismatch { span, .. }
            | GeneratorError::AlreadyDeclared { span, .. }
            | GeneratorError::ReservedName { span, .. }
            | GeneratorError::DuplicateFunction { span, .. }
            | GeneratorError::LoopControlOutsideLoop { span, .. }
            | GeneratorError::SymbolClash { span, .. } => Some(*span),
            GeneratorError::MissingMain | GeneratorError::UnterminatedBlock { .. } => None,
        }
    }
}

pub type GenResult<T> = Result<T, GeneratorError>;

// ============ Storage and scopes ============

/// Where a variable lives
#[derive(Debug, Clone, PartialEq, Eq)]
enum Storage {
    /// Module-level `i32`
    Global(String),
    /// Stack slot from an entry-block alloca
    Local(VReg),
}

impl Storage {
    fn address(&self) -> Value {
        match self {
            Storage::Global(name) => Value::Global(name.clone()),
            Storage::Local(reg) => Value::Reg(*reg),
        }
    }
}

/// Index of a declared variable in [`Slots`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SlotId(u32);

/// Every variable declared in the program, in declaration order
#[derive(Debug, Default)]
struct Slots {
    storage: Vec<Storage>,
}

impl Slots {
    fn alloc(&mut self, storage: Storage) -> SlotId {
        let id = SlotId(self.storage.len() as u32);
        self.storage.push(storage);
        id
    }

    fn get(&self, id: SlotId) -> &Storage {
        &self.storage[id.0 as usize]
    }
}

/// Names declared in one scope
#[derive(Debug, Default)]
struct Scope {
    names: HashMap<String, SlotId>,
}

impl Scope {
    fn get(&self, name: &str) -> Option<SlotId> {
        self.names.get(name).copied()
    }

    fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    fn insert(&mut self, name: &str, slot: SlotId) {
        self.names.insert(name.to_string(), slot);
    }
}

/// Scopes visible to the code being lowered: the function's locals, then
/// the globals. Global initialisers get an empty local scope.
struct Scopes<'g> {
    globals: &'g Scope,
    locals: Scope,
}

impl<'g> Scopes<'g> {
    fn new(globals: &'g Scope) -> Self {
        Self {
            globals,
            locals: Scope::default(),
        }
    }

    fn resolve(&self, name: &str) -> Option<SlotId> {
        self.locals.get(name).or_else(|| self.globals.get(name))
    }
}

/// Branch targets of the innermost enclosing loop
#[derive(Debug, Clone, Copy)]
struct LoopContext {
    /// Block to jump to on `break`
    exit_block: BlockId,
    /// Block to jump to on `continue` (condition check or iterator)
    continue_block: BlockId,
}

/// Where control goes after a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// Falls through; later code continues in this block
    Open(BlockId),
    /// Left via `return`, `break` or `continue`
    Closed,
}

/// A lowered expression, tagged with its width
#[derive(Debug, Clone, PartialEq)]
enum Operand {
    I32(Value),
    /// Result of a comparison
    I1(Value),
}

/// Lowers a [`Program`] into a [`Module`]
pub struct Generator {
    builder: IrBuilder,
    slots: Slots,
    /// Arity of every user function
    functions: HashMap<String, usize>,
}

impl Generator {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            builder: IrBuilder::new(module_name),
            slots: Slots::default(),
            functions: HashMap::new(),
        }
    }

    /// Lower a whole program. The entry function runs every global
    /// initialiser, in declaration order, before the body of `main`.
    pub fn generate(mut self, program: &Program) -> GenResult<Module> {
        let main = program.main.as_ref().ok_or(GeneratorError::MissingMain)?;

        self.builder
            .declare_external_vararg(PRINTF, vec![IrType::Ptr], IrType::I32);
        self.builder.add_string_constant(FORMAT_GLOBAL, PRINT_FORMAT);

        self.register_functions(&program.functions)?;
        let globals = self.declare_globals(&program.globals)?;

        let (_, entry) = self.builder.start_function(ENTRY_FUNCTION, 0);
        let initialisers = Scopes::new(&globals);
        for decl in &program.globals {
            let value = self.lower_value(&decl.value, &initialisers, entry)?;
            let address = self.resolve(&initialisers, &decl.name)?;
            self.builder.store(entry, address, value);
        }

        let mut scopes = Scopes::new(&globals);
        let flow = self.lower_block(&main.body, &mut scopes, None, entry)?;
        self.finish_function(ENTRY_FUNCTION, flow)?;

        for function in &program.functions {
            self.lower_function(function, &globals)?;
        }

        Ok(self.builder.finish())
    }

    /// Record every signature up front so calls may refer to any function
    fn register_functions(&mut self, functions: &[ast::Function]) -> GenResult<()> {
        for function in functions {
            let name = &function.name;
            if is_reserved(&name.name) {
                return Err(GeneratorError::ReservedName {
                    name: name.name.clone(),
                    span: name.span,
                });
            }
            if is_runtime_symbol(&name.name) {
                return Err(GeneratorError::SymbolClash {
                    name: name.name.clone(),
                    span: name.span,
                });
            }
            if self.functions.insert(name.name.clone(), function.arity()).is_some() {
                return Err(GeneratorError::DuplicateFunction {
                    name: name.name.clone(),
                    span: name.span,
                });
            }
        }
        Ok(())
    }

    /// Give every global zero-initialised storage before any initialiser runs
    fn declare_globals(&mut self, globals: &[VarDecl]) -> GenResult<Scope> {
        let mut scope = Scope::default();
        for decl in globals {
            let name = &decl.name;
            if is_reserved(&name.name) {
                return Err(GeneratorError::ReservedName {
                    name: name.name.clone(),
                    span: name.span,
                });
            }
            if is_runtime_symbol(&name.name) || self.functions.contains_key(&name.name) {
                return Err(GeneratorError::SymbolClash {
                    name: name.name.clone(),
                    span: name.span,
                });
            }
            if scope.contains(&name.name) {
                return Err(GeneratorError::AlreadyDeclared {
                    name: name.name.clone(),
                    span: name.span,
                });
            }

            self.builder
                .add_global(name.name.clone(), IrType::I32, Constant::Int(0), false);
            let slot = self.slots.alloc(Storage::Global(name.name.clone()));
            scope.insert(&name.name, slot);
        }
        Ok(scope)
    }

    fn lower_function(&mut self, function: &ast::Function, globals: &Scope) -> GenResult<()> {
        let (params, entry) = self
            .builder
            .start_function(function.name.name.clone(), function.arity());

        // Parameters are copied into stack slots so they can be reassigned
        let mut scopes = Scopes::new(globals);
        for (param, reg) in function.params.iter().zip(params) {
            let address = self.declare_local(&mut scopes, param)?;
            self.builder.store(entry, address, Value::Reg(reg));
        }

        let flow = self.lower_block(&function.body, &mut scopes, None, entry)?;
        self.finish_function(&function.name.name, flow)
    }

    /// Close the current function. Falling off the end returns 0.
    fn finish_function(&mut self, name: &str, flow: Flow) -> GenResult<()> {
        if let Flow::Open(block) = flow {
            self.builder.ret(block, Value::Int(0));
        }
        if let Some(block) = self.builder.unterminated_block() {
            return Err(GeneratorError::UnterminatedBlock {
                function: name.to_string(),
                block: block.to_string(),
            });
        }
        self.builder.finish_function();
        Ok(())
    }

    fn declare_local(&mut self, scopes: &mut Scopes<'_>, name: &ast::Ident) -> GenResult<Value> {
        if is_reserved(&name.name) {
            return Err(GeneratorError::ReservedName {
                name: name.name.clone(),
                span: name.span,
            });
        }
        if scopes.locals.contains(&name.name) {
            return Err(GeneratorError::AlreadyDeclared {
                name: name.name.clone(),
                span: name.span,
            });
        }

        let reg = self.builder.alloca(IrType::I32);
        let slot = self.slots.alloc(Storage::Local(reg));
        scopes.locals.insert(&name.name, slot);
        Ok(Value::Reg(reg))
    }

    fn resolve(&self, scopes: &Scopes<'_>, name: &ast::Ident) -> GenResult<Value> {
        let slot = scopes
            .resolve(&name.name)
            .ok_or_else(|| GeneratorError::UndefinedVariable {
                name: name.name.clone(),
                span: name.span,
            })?;
        Ok(self.slots.get(slot).address())
    }

    // ============ Statements ============

    fn lower_block(
        &mut self,
        stmts: &[Stmt],
        scopes: &mut Scopes<'_>,
        loops: Option<&LoopContext>,
        at: BlockId,
    ) -> GenResult<Flow> {
        let mut flow = Flow::Open(at);
        for stmt in stmts {
            let cursor = match flow {
                Flow::Open(block) => block,
                Flow::Closed => {
                    // Code after a jump still gets checked; its block has no predecessors
                    let dead = self.builder.create_block("dead");
                    self.builder.start_block(dead);
                    dead
                }
            };
            flow = self.lower_stmt(stmt, scopes, loops, cursor)?;
        }
        Ok(flow)
    }

    fn lower_stmt(
        &mut self,
        stmt: &Stmt,
        scopes: &mut Scopes<'_>,
        loops: Option<&LoopContext>,
        at: BlockId,
    ) -> GenResult<Flow> {
        match stmt {
            Stmt::Let(decl) => {
                self.lower_let(decl, scopes, at)?;
                Ok(Flow::Open(at))
            }
            Stmt::Assign(assignment) => {
                self.lower_assign(assignment, scopes, at)?;
                Ok(Flow::Open(at))
            }
            Stmt::Return(expr) => {
                let value = self.lower_value(expr, scopes, at)?;
                self.builder.ret(at, value);
                Ok(Flow::Closed)
            }
            Stmt::Expr(expr) => {
                self.lower_expr(expr, scopes, at)?;
                Ok(Flow::Open(at))
            }
            Stmt::If(if_stmt) => self.lower_if(if_stmt, scopes, loops, at),
            Stmt::While(while_loop) => self.lower_while(while_loop, scopes, at),
            Stmt::For(for_loop) => self.lower_for(for_loop, scopes, at),
            Stmt::Break(span) => {
                let context = loops.ok_or(GeneratorError::LoopControlOutsideLoop {
                    keyword: "break",
                    span: *span,
                })?;
                self.builder.br(at, context.exit_block);
                Ok(Flow::Closed)
            }
            Stmt::Continue(span) => {
                let context = loops.ok_or(GeneratorError::LoopControlOutsideLoop {
                    keyword: "continue",
                    span: *span,
                })?;
                self.builder.br(at, context.continue_block);
                Ok(Flow::Closed)
            }
        }
    }

    /// The initialiser is evaluated before the name is bound, so
    /// `let x = x + 1;` reads an outer `x`
    fn lower_let(&mut self, decl: &VarDecl, scopes: &mut Scopes<'_>, at: BlockId) -> GenResult<()> {
        let value = self.lower_value(&decl.value, scopes, at)?;
        let address = self.declare_local(scopes, &decl.name)?;
        self.builder.store(at, address, value);
        Ok(())
    }

    fn lower_assign(&mut self, assignment: &Assignment, scopes: &Scopes<'_>, at: BlockId) -> GenResult<()> {
        let address = self.resolve(scopes, &assignment.target)?;
        let value = self.lower_value(&assignment.value, scopes, at)?;
        self.builder.store(at, address, value);
        Ok(())
    }

    /// Branch to `target` if control is still open; reports whether it was
    fn branch_to(&mut self, flow: Flow, target: BlockId) -> bool {
        match flow {
            Flow::Open(block) => {
                self.builder.br(block, target);
                true
            }
            Flow::Closed => false,
        }
    }

    fn lower_if(
        &mut self,
        if_stmt: &IfStmt,
        scopes: &mut Scopes<'_>,
        loops: Option<&LoopContext>,
        at: BlockId,
    ) -> GenResult<Flow> {
        let merge = self.builder.create_block("if.end");
        let reached = self.lower_if_chain(if_stmt, scopes, loops, at, merge)?;

        self.builder.start_block(merge);
        if reached {
            Ok(Flow::Open(merge))
        } else {
            self.builder.unreachable(merge);
            Ok(Flow::Closed)
        }
    }

    /// Lower one link of an if/else-if chain. Every link branches to the same
    /// `merge`; returns whether any arm did.
    fn lower_if_chain(
        &mut self,
        if_stmt: &IfStmt,
        scopes: &mut Scopes<'_>,
        loops: Option<&LoopContext>,
        at: BlockId,
        merge: BlockId,
    ) -> GenResult<bool> {
        let condition = self.lower_condition(&if_stmt.condition, scopes, at)?;
        let then_block = self.builder.create_block("if.then");
        let else_block = self.builder.create_block("if.else");
        self.builder.cond_br(at, condition, then_block, else_block);

        self.builder.start_block(then_block);
        let then_flow = self.lower_block(&if_stmt.then_body, scopes, loops, then_block)?;
        let mut reached = self.branch_to(then_flow, merge);

        self.builder.start_block(else_block);
        reached |= match &if_stmt.else_branch {
            Some(ElseBranch::ElseIf(next)) => {
                self.lower_if_chain(next, scopes, loops, else_block, merge)?
            }
            Some(ElseBranch::Else(body)) => {
                let else_flow = self.lower_block(body, scopes, loops, else_block)?;
                self.branch_to(else_flow, merge)
            }
            None => {
                self.builder.br(else_block, merge);
                true
            }
        };

        Ok(reached)
    }

    fn lower_while(&mut self, while_loop: &WhileLoop, scopes: &mut Scopes<'_>, at: BlockId) -> GenResult<Flow> {
        let cond_block = self.builder.create_block("while.cond");
        let body_block = self.builder.create_block("while.body");
        let exit_block = self.builder.create_block("while.end");

        self.builder.br(at, cond_block);
        self.builder.start_block(cond_block);
        let condition = self.lower_condition(&while_loop.condition, scopes, cond_block)?;
        self.builder.cond_br(cond_block, condition, body_block, exit_block);

        self.builder.start_block(body_block);
        let context = LoopContext {
            exit_block,
            continue_block: cond_block,
        };
        let flow = self.lower_block(&while_loop.body, scopes, Some(&context), body_block)?;
        self.branch_to(flow, cond_block);

        self.builder.start_block(exit_block);
        Ok(Flow::Open(exit_block))
    }

    /// The init variable is declared in the enclosing scope
    fn lower_for(&mut self, for_loop: &ForLoop, scopes: &mut Scopes<'_>, at: BlockId) -> GenResult<Flow> {
        self.lower_let(&for_loop.init, scopes, at)?;

        let cond_block = self.builder.create_block("for.cond");
        let body_block = self.builder.create_block("for.body");
        let iter_block = self.builder.create_block("for.iter");
        let exit_block = self.builder.create_block("for.end");

        self.builder.br(at, cond_block);
        self.builder.start_block(cond_block);
        let condition = self.lower_condition(&for_loop.condition, scopes, cond_block)?;
        self.builder.cond_br(cond_block, condition, body_block, exit_block);

        self.builder.start_block(body_block);
        let context = LoopContext {
            exit_block,
            continue_block: iter_block,
        };
        let flow = self.lower_block(&for_loop.body, scopes, Some(&context), body_block)?;
        self.branch_to(flow, iter_block);

        self.builder.start_block(iter_block);
        self.lower_assign(&for_loop.iterator, scopes, iter_block)?;
        self.builder.br(iter_block, cond_block);

        self.builder.start_block(exit_block);
        Ok(Flow::Open(exit_block))
    }

    // ============ Expressions ============

    /// Lower an expression where an `i32` is required
    fn lower_value(&mut self, expr: &Expr, scopes: &Scopes<'_>, at: BlockId) -> GenResult<Value> {
        Ok(match self.lower_expr(expr, scopes, at)? {
            Operand::I32(value) => value,
            Operand::I1(value) => Value::Reg(self.builder.zext(at, value, IrType::I32)),
        })
    }

    /// Lower an expression where an `i1` is required; integers are true
    /// when non-zero
    fn lower_condition(&mut self, expr: &Expr, scopes: &Scopes<'_>, at: BlockId) -> GenResult<Value> {
        Ok(match self.lower_expr(expr, scopes, at)? {
            Operand::I1(value) => value,
            Operand::I32(value) => Value::Reg(self.builder.icmp(at, CmpOp::Ne, value, Value::Int(0))),
        })
    }

    fn lower_expr(&mut self, expr: &Expr, scopes: &Scopes<'_>, at: BlockId) -> GenResult<Operand> {
        match expr {
            Expr::Int { value, .. } => Ok(Operand::I32(Value::Int(*value))),
            Expr::Ident(name) => {
                let address = self.resolve(scopes, name)?;
                Ok(Operand::I32(Value::Reg(self.builder.load(at, address))))
            }
            Expr::Call(call) => self.lower_call(call, scopes, at),
            Expr::Binary { op, left, right } => {
                let lhs = self.lower_value(left, scopes, at)?;
                let rhs = self.lower_value(right, scopes, at)?;
                let b = &mut self.builder;
                let result = Value::Reg(match op {
                    BinaryOp::Add => b.add(at, lhs, rhs),
                    BinaryOp::Sub => b.sub(at, lhs, rhs),
                    BinaryOp::Mul => b.mul(at, lhs, rhs),
                    BinaryOp::Div => b.sdiv(at, lhs, rhs),
                    BinaryOp::Eq => b.icmp(at, CmpOp::Eq, lhs, rhs),
                    BinaryOp::Ne => b.icmp(at, CmpOp::Ne, lhs, rhs),
                    BinaryOp::Lt => b.icmp(at, CmpOp::Slt, lhs, rhs),
                    BinaryOp::Gt => b.icmp(at, CmpOp::Sgt, lhs, rhs),
                    BinaryOp::Le => b.icmp(at, CmpOp::Sle, lhs, rhs),
                    BinaryOp::Ge => b.icmp(at, CmpOp::Sge, lhs, rhs),
                });
                Ok(if op.is_comparison() {
                    Operand::I1(result)
                } else {
                    Operand::I32(result)
                })
            }
        }
    }

    fn lower_call(&mut self, call: &Call, scopes: &Scopes<'_>, at: BlockId) -> GenResult<Operand> {
        let name = &call.callee.name;

        if name == PRINT_BUILTIN {
            check_arity(call, 1)?;
            let value = self.lower_value(&call.args[0], scopes, at)?;
            let format = Value::Global(FORMAT_GLOBAL.to_string());
            let result = self.builder.call(at, PRINTF, vec![format, value]);
            return Ok(Operand::I32(Value::Reg(result)));
        }

        let arity = *self
            .functions
            .get(name)
            .ok_or_else(|| GeneratorError::UndefinedFunction {
                name: name.clone(),
                span: call.callee.span,
            })?;
        check_arity(call, arity)?;

        let mut args = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            args.push(self.lower_value(arg, scopes, at)?);
        }
        let result = self.builder.call(at, name.clone(), args);
        Ok(Operand::I32(Value::Reg(result)))
    }
}

fn check_arity(call: &Call, expected: usize) -> GenResult<()> {
    if call.args.len() == expected {
        Ok(())
    } else {
        Err(GeneratorError::ArityMismatch {
            name: call.callee.name.clone(),
            expected,
            found: call.args.len(),
            span: call.span,
        })
    }
}

/// Symbols the output module defines besides user functions and globals
fn is_runtime_symbol(name: &str) -> bool {
    name == ENTRY_FUNCTION || name == PRINTF
}

/// Lower a program into an IR module
pub fn lower_program(program: &Program) -> GenResult<Module> {
    Generator::new(ENTRY_FUNCTION).generate(program)
}

/// Print module in a readable format
pub fn print_module(module: &Module) -> String {
    let mut output = String::new();
    output.push_str(&format!("module {}\n\n", module.name));

    for global in &module.globals {
        let kind = if global.is_const { "const" } else { "global" };
        output.push_str(&format!("{} @{}: {} = {}\n", kind, global.name, global.ty, global.init));
    }
    if !module.globals.is_empty() {
        output.push('\n');
    }

    for func in &module.functions {
        if func.is_external {
            output.push_str(&format!("declare {} ", func.name));
        } else {
            output.push_str(&format!("define {} ", func.name));
        }

        output.push('(');
        for (i, (vreg, ty)) in func.params.iter().enumerate() {
            if i > 0 {
                output.push_str(", ");
            }
            if func.is_external {
                output.push_str(&ty.to_string());
            } else {
                output.push_str(&format!("{} {}", ty, vreg));
            }
        }
        if func.is_vararg {
            output.push_str(", ...");
        }
        output.push_str(&format!(") -> {} ", func.ret_type));

        if func.is_external {
            output.push('\n');
            continue;
        }

        output.push_str("{\n");
        for block in &func.blocks {
            output.push_str(&format!("  {}:", block.id));
            if let Some(ref label) = block.label {
                output.push_str(&format!(" ; {}", label));
            }
            output.push('\n');
            for instr in &block.instructions {
                output.push_str(&format!("    {}\n", instr));
            }
            if let Some(ref term) = block.terminator {
                output.push_str(&format!("    {}\n", term));
            }
        }
        output.push_str("}\n\n");
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{InstrKind, Terminator};
    use crate::lexer::lex;
    use crate::parser::parse;

    fn lower_source(source: &str) -> GenResult<Module> {
        let (tokens, errors) = lex(source);
        assert!(errors.is_empty(), "Lex errors: {:?}", errors);
        let program = parse(tokens).expect("parse");
        lower_program(&program)
    }

    fn lower_ok(source: &str) -> Module {
        match lower_source(source) {
            Ok(module) => module,
            Err(e) => panic!("Generator error: {e}"),
        }
    }

    fn lower_err(source: &str) -> GeneratorError {
        match lower_source(source) {
            Ok(module) => panic!("expected an error, got:\n{}", print_module(&module)),
            Err(e) => e,
        }
    }

    /// Terminator of the block whose label starts with `label`
    fn terminator_of<'m>(module: &'m Module, function: &str, label: &str) -> &'m Terminator {
        let func = module.function(function).expect("function");
        let block = func
            .blocks
            .iter()
            .find(|b| b.label.as_deref() == Some(label))
            .unwrap_or_else(|| panic!("no {label} block"));
        block.terminator.as_ref().expect("terminator")
    }

    fn label_of(module: &Module, function: &str, id: BlockId) -> String {
        let func = module.function(function).expect("function");
        func.block(id).and_then(|b| b.label.clone()).expect("label")
    }

    #[test]
    fn test_missing_main() {
        assert_eq!(lower_err("fn f() { return 1; }"), GeneratorError::MissingMain);
    }

    #[test]
    fn test_undefined_function() {
        let err = lower_err("fn main() { return nope(1); }");
        assert!(matches!(err, GeneratorError::UndefinedFunction { ref name, .. } if name == "nope"));
    }

    #[test]
    fn test_undefined_variable() {
        let err = lower_err("fn main() { x = 1; return 0; }");
        assert!(matches!(err, GeneratorError::UndefinedVariable { ref name, .. } if name == "x"));

        // Locals of main are not visible to other functions
        let err = lower_err("fn f() { return y; } fn main() { let y = 1; return f(); }");
        assert!(matches!(err, GeneratorError::UndefinedVariable { .. }));
    }

    #[test]
    fn test_arity_mismatch() {
        let err = lower_err("fn f(a, b) { return a; } fn main() { return f(1); }");
        assert!(matches!(
            err,
            GeneratorError::ArityMismatch {
                expected: 2,
                found: 1,
                ..
            }
        ));

        let err = lower_err("fn main() { print(1, 2); return 0; }");
        assert!(matches!(err, GeneratorError::ArityMismatch { expected: 1, .. }));
    }

    #[test]
    fn test_redeclaration() {
        let err = lower_err("fn main() { let a = 1; if a { let a = 2; } return a; }");
        assert!(matches!(err, GeneratorError::AlreadyDeclared { ref name, .. } if name == "a"));

        let err = lower_err("fn f(a, a) { return a; } fn main() { return 0; }");
        assert!(matches!(err, GeneratorError::AlreadyDeclared { .. }));

        let err = lower_err("let g = 1; let g = 2; fn main() { return g; }");
        assert!(matches!(err, GeneratorError::AlreadyDeclared { .. }));
    }

    #[test]
    fn test_local_may_shadow_global_and_parameter_names_elsewhere() {
        lower_ok("let a = 1; fn f(a) { return a; } fn main() { let a = 2; return f(a); }");
    }

    #[test]
    fn test_duplicate_function() {
        let err = lower_err("fn f() { return 1; } fn f() { return 2; } fn main() { return 0; }");
        assert!(matches!(err, GeneratorError::DuplicateFunction { .. }));
    }

    #[test]
    fn test_symbol_clashes() {
        let err = lower_err("let printf = 1; fn main() { return 0; }");
        assert!(matches!(err, GeneratorError::SymbolClash { .. }));

        let err = lower_err("let main = 1; fn main() { return 0; }");
        assert!(matches!(err, GeneratorError::SymbolClash { .. }));

        let err = lower_err("let f = 1; fn f() { return 0; } fn main() { return 0; }");
        assert!(matches!(err, GeneratorError::SymbolClash { .. }));
    }

    #[test]
    fn test_loop_control_outside_loop_is_rejected() {
        let span = Span::new(0, 5);
        let program = Program {
            functions: vec![],
            globals: vec![],
            main: Some(ast::Function {
                name: ast::Ident::new("main", span),
                params: vec![],
                body: vec![Stmt::Break(span)],
                span,
            }),
        };
        assert_eq!(
            lower_program(&program),
            Err(GeneratorError::LoopControlOutsideLoop {
                keyword: "break",
                span
            })
        );
    }

    #[test]
    fn test_every_block_has_one_terminator() {
        let module = lower_ok(
            "let g = 3;
             fn f(n) {
                 let acc = 0;
                 for (let i = 0; i < n; i++) {
                     if i == 2 { continue; } else if i == 5 { break; }
                     acc = acc + i;
                 }
                 while (acc > 100) { acc = acc - 1; if acc { return acc; } }
                 return acc;
                 acc = 1;
             }
             fn main() { if g { return f(g); } else { print(g); } }",
        );
        for func in module.functions.iter().filter(|f| !f.is_external) {
            assert!(!func.blocks.is_empty());
            for block in &func.blocks {
                let term = block.terminator.as_ref();
                assert!(term.is_some(), "{}::{} open", func.name, block.name());
                for target in term.into_iter().flat_map(Terminator::successors) {
                    assert!(func.block(target).is_some(), "{} branches to missing {target}", block.name());
                }
            }
        }
    }

    #[test]
    fn test_merge_is_unreachable_when_both_arms_return() {
        let module = lower_ok("fn main() { if 1 { return 1; } else { return 2; } }");
        assert_eq!(terminator_of(&module, "main", "if.end"), &Terminator::Unreachable);
    }

    #[test]
    fn test_else_if_chain_shares_one_merge_block() {
        let module = lower_ok(
            "fn main() { let a = 1; if a == 1 { a = 2; } else if a == 2 { a = 3; } else { a = 4; } return a; }",
        );
        let main = module.function("main").unwrap();
        let merges = main
            .blocks
            .iter()
            .filter(|b| b.label.as_deref() == Some("if.end"))
            .count();
        assert_eq!(merges, 1);
        assert!(matches!(terminator_of(&module, "main", "if.end"), Terminator::Ret(_)));
    }

    #[test]
    fn test_if_without_else_branches_straight_to_merge() {
        let module = lower_ok("fn main() { if 1 { return 1; } return 0; }");
        let Terminator::Br(target) = terminator_of(&module, "main", "if.else") else {
            panic!("expected branch");
        };
        assert_eq!(label_of(&module, "main", *target), "if.end");
    }

    #[test]
    fn test_while_break_and_continue_targets() {
        let module = lower_ok(
            "fn main() { while (1) { if 1 { break; } else { continue; } } return 0; }",
        );
        let Terminator::Br(target) = terminator_of(&module, "main", "if.then") else {
            panic!("expected branch");
        };
        assert_eq!(label_of(&module, "main", *target), "while.end");
        let Terminator::Br(target) = terminator_of(&module, "main", "if.else") else {
            panic!("expected branch");
        };
        assert_eq!(label_of(&module, "main", *target), "while.cond");
    }

    #[test]
    fn test_for_continue_goes_to_iterator() {
        let module = lower_ok("fn main() { for (let i = 0; i < 3; i++) { continue; } return i; }");
        let Terminator::Br(target) = terminator_of(&module, "main", "for.body") else {
            panic!("expected branch");
        };
        assert_eq!(label_of(&module, "main", *target), "for.iter");
    }

    #[test]
    fn test_integer_conditions_compare_against_zero() {
        let module = lower_ok("fn main() { let x = 2; while (x) { x = x - 1; } return x; }");
        let main = module.function("main").unwrap();
        let cond = main
            .blocks
            .iter()
            .find(|b| b.label.as_deref() == Some("while.cond"))
            .unwrap();
        assert!(matches!(
            cond.instructions.last().map(|i| &i.kind),
            Some(InstrKind::ICmp(CmpOp::Ne, _, Value::Int(0)))
        ));
    }

    #[test]
    fn test_comparison_values_are_widened() {
        let module = lower_ok("fn main() { let b = 1 < 2; return b; }");
        let entry = module.function("main").unwrap().entry_block().unwrap();
        assert!(entry
            .instructions
            .iter()
            .any(|i| matches!(i.kind, InstrKind::ZExt(_, IrType::I32))));

        let module = lower_ok("fn main() { return 1 + 2 * 3; }");
        let entry = module.function("main").unwrap().entry_block().unwrap();
        assert!(!entry.instructions.iter().any(|i| matches!(i.kind, InstrKind::ZExt(..))));
    }

    #[test]
    fn test_globals_are_zeroed_then_initialised_in_entry() {
        let module = lower_ok("let a = b + 1; let b = 5; fn main() { return a; }");
        let names: Vec<_> = module.globals.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec![FORMAT_GLOBAL, "a", "b"]);
        assert!(module.globals[1..]
            .iter()
            .all(|g| g.init == Constant::Int(0) && !g.is_const));

        let entry = module.function("main").unwrap().entry_block().unwrap();
        let stores: Vec<_> = entry
            .instructions
            .iter()
            .filter_map(|i| match &i.kind {
                InstrKind::Store(Value::Global(name), _) => Some(name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(stores, vec!["a", "b"]);
    }

    #[test]
    fn test_allocas_only_in_entry_blocks() {
        let module = lower_ok(
            "fn f(p) { while (p) { let x = p; p = p - x; } return p; } fn main() { return f(2); }",
        );
        for func in module.functions.iter().filter(|f| !f.is_external) {
            for block in func.blocks.iter().skip(1) {
                assert!(!block
                    .instructions
                    .iter()
                    .any(|i| matches!(i.kind, InstrKind::Alloca(_))));
            }
        }
    }

    #[test]
    fn test_falling_off_the_end_returns_zero() {
        let module = lower_ok("fn f() { } fn main() { f(); }");
        for name in ["main", "f"] {
            let entry = module.function(name).unwrap().entry_block().unwrap();
            assert_eq!(entry.terminator, Some(Terminator::Ret(Value::Int(0))));
        }
    }

    #[test]
    fn test_print_calls_printf_with_format() {
        let module = lower_ok("fn main() { print(42); return 0; }");
        let entry = module.function("main").unwrap().entry_block().unwrap();
        let call = entry.instructions.iter().find_map(|i| match &i.kind {
            InstrKind::Call { func, args } => Some((func.clone(), args.clone())),
            _ => None,
        });
        assert_eq!(
            call,
            Some((
                PRINTF.to_string(),
                vec![Value::Global(FORMAT_GLOBAL.to_string()), Value::Int(42)]
            ))
        );
    }

    #[test]
    fn test_lowering_is_deterministic() {
        let source = "let g = 1; fn f(a) { if a { return g; } return a; } fn main() { return f(g); }";
        assert_eq!(lower_ok(source), lower_ok(source));
        assert_eq!(print_module(&lower_ok(source)), print_module(&lower_ok(source)));
    }

    #[test]
    fn test_print_module_shape() {
        let text = print_module(&lower_ok("fn main() { return 2 + 3; }"));
        assert!(text.starts_with("module main\n"));
        assert!(text.contains("declare printf (ptr, ...) -> i32"));
        assert!(text.contains("define main () -> i32 {"));
        assert!(text.contains("%t0 = add 2, 3"));
        assert!(text.contains("ret %t0"));
    }
}
