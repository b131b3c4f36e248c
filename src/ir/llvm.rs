//! LLVM Backend for Oli IR
//!
//! Renders an IR module as textual LLVM IR (opaque-pointer syntax), which
//! `clang` or `llc` turn into a native executable.

use std::collections::HashMap;
use std::fmt;

use super::{BasicBlock, BlockId, Constant, Function, Global, InstrKind, Instruction, IrType, Module, Terminator, Value};

/// Render a module as LLVM IR text
pub fn emit_llvm(module: &Module) -> String {
    LlvmModule(module).to_string()
}

/// Display adapter writing a module as LLVM IR
pub struct LlvmModule<'m>(pub &'m Module);

impl fmt::Display for LlvmModule<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let module = self.0;
        writeln!(f, "; ModuleID = '{}'", module.name)?;
        writeln!(f, "source_filename = \"{}\"", module.name)?;

        if !module.globals.is_empty() {
            writeln!(f)?;
            for global in &module.globals {
                write_global(f, global)?;
            }
        }

        let externals: Vec<_> = module.functions.iter().filter(|func| func.is_external).collect();
        if !externals.is_empty() {
            writeln!(f)?;
            for func in externals {
                writeln!(f, "declare {} @{}({})", func.ret_type, func.name, param_types(func))?;
            }
        }

        let signatures: HashMap<&str, &Function> =
            module.functions.iter().map(|func| (func.name.as_str(), func)).collect();

        for func in module.functions.iter().filter(|func| !func.is_external) {
            writeln!(f)?;
            FunctionWriter::new(func, &signatures).write(f)?;
        }

        Ok(())
    }
}

fn write_global(f: &mut fmt::Formatter<'_>, global: &Global) -> fmt::Result {
    match &global.init {
        Constant::String(text) => writeln!(
            f,
            "@{} = private unnamed_addr constant {} c\"{}\\00\"",
            global.name,
            global.ty,
            escape_bytes(text)
        ),
        init => {
            let kind = if global.is_const { "constant" } else { "global" };
            writeln!(f, "@{} = internal {} {} {}", global.name, kind, global.ty, init)
        }
    }
}

/// Escape a string for an LLVM `c"..."` literal
fn escape_bytes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for byte in text.bytes() {
        if (byte.is_ascii_graphic() && byte != b'"' && byte != b'\\') || byte == b' ' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("\\{:02X}", byte));
        }
    }
    out
}

/// `ptr, ...` style parameter type list of a declaration
fn param_types(func: &Function) -> String {
    let mut types: Vec<String> = func.params.iter().map(|(_, ty)| ty.to_string()).collect();
    if func.is_vararg {
        types.push("...".to_string());
    }
    types.join(", ")
}

struct FunctionWriter<'m> {
    func: &'m Function,
    signatures: &'m HashMap<&'m str, &'m Function>,
    labels: HashMap<BlockId, String>,
}

impl<'m> FunctionWriter<'m> {
    fn new(func: &'m Function, signatures: &'m HashMap<&'m str, &'m Function>) -> Self {
        let labels = func.blocks.iter().map(|block| (block.id, block.name())).collect();
        Self {
            func,
            signatures,
            labels,
        }
    }

    fn label(&self, id: BlockId) -> String {
        self.labels.get(&id).cloned().unwrap_or_else(|| id.to_string())
    }

    fn write(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self
            .func
            .params
            .iter()
            .map(|(reg, ty)| format!("{} {}", ty, reg))
            .collect();
        writeln!(
            f,
            "define {} @{}({}) {{",
            self.func.ret_type,
            self.func.name,
            params.join(", ")
        )?;

        for (i, block) in self.func.blocks.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            self.write_block(f, block)?;
        }

        writeln!(f, "}}")
    }

    fn write_block(&self, f: &mut fmt::Formatter<'_>, block: &BasicBlock) -> fmt::Result {
        writeln!(f, "{}:", block.name())?;
        for instr in &block.instructions {
            write!(f, "  ")?;
            self.write_instruction(f, instr)?;
            writeln!(f)?;
        }
        if let Some(ref term) = block.terminator {
            write!(f, "  ")?;
            self.write_terminator(f, term)?;
            writeln!(f)?;
        }
        Ok(())
    }

    fn write_instruction(&self, f: &mut fmt::Formatter<'_>, instr: &Instruction) -> fmt::Result {
        if let Some(result) = instr.result {
            write!(f, "{} = ", result)?;
        }
        match &instr.kind {
            InstrKind::Add(a, b) => write!(f, "add i32 {}, {}", a, b),
            InstrKind::Sub(a, b) => write!(f, "sub i32 {}, {}", a, b),
            InstrKind::Mul(a, b) => write!(f, "mul i32 {}, {}", a, b),
            InstrKind::SDiv(a, b) => write!(f, "sdiv i32 {}, {}", a, b),
            InstrKind::ICmp(op, a, b) => write!(f, "icmp {} i32 {}, {}", op, a, b),
            InstrKind::ZExt(v, ty) => write!(f, "zext i1 {} to {}", v, ty),
            InstrKind::Alloca(ty) => write!(f, "alloca {}", ty),
            InstrKind::Load(ptr) => write!(f, "load i32, ptr {}", ptr),
            InstrKind::Store(ptr, val) => write!(f, "store i32 {}, ptr {}", val, ptr),
            InstrKind::Call { func, args } => self.write_call(f, func, args),
        }
    }

    fn write_call(&self, f: &mut fmt::Formatter<'_>, callee: &str, args: &[Value]) -> fmt::Result {
        let signature = self.signatures.get(callee).copied();
        let ret_type = signature.map_or(IrType::I32, |s| s.ret_type.clone());

        write!(f, "call {} ", ret_type)?;
        if let Some(sig) = signature.filter(|s| s.is_vararg) {
            write!(f, "({}) ", param_types(sig))?;
        }
        write!(f, "@{}(", callee)?;

        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            let ty = signature
                .and_then(|s| s.params.get(i))
                .map_or(IrType::I32, |(_, ty)| ty.clone());
            write!(f, "{} {}", ty, arg)?;
        }
        write!(f, ")")
    }

    fn write_terminator(&self, f: &mut fmt::Formatter<'_>, term: &Terminator) -> fmt::Result {
        match term {
            Terminator::Ret(value) => write!(f, "ret {} {}", self.func.ret_type, value),
            Terminator::Br(target) => write!(f, "br label %{}", self.label(*target)),
            Terminator::CondBr {
                cond,
                then_block,
                else_block,
            } => write!(
                f,
                "br i1 {}, label %{}, label %{}",
                cond,
                self.label(*then_block),
                self.label(*else_block)
            ),
            Terminator::Unreachable => write!(f, "unreachable"),
        }
    }
}
