//! Reference interpreter for Oli IR
//!
//! Executes a lowered [`Module`] directly, with the semantics the emitted
//! LLVM IR has once compiled: wrapping 32-bit arithmetic, signed division,
//! and `printf` writing to a captured buffer.

use std::collections::HashMap;
use std::io::{self, Write};

use miette::Diagnostic;
use thiserror::Error;

use super::lower::{ENTRY_FUNCTION, PRINTF};
use super::{BasicBlock, Constant, Function, InstrKind, Instruction, Module, Terminator, VReg, Value};

/// Default bound on executed instructions
pub const DEFAULT_STEP_LIMIT: u64 = 10_000_000;
/// Default bound on nested calls
pub const DEFAULT_MAX_DEPTH: usize = 1_000;

/// Errors raised while executing a module
#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("division by zero in function {function}")]
    #[diagnostic(code(oli::run::division_by_zero))]
    DivisionByZero { function: String },

    #[error("signed division overflow in function {function}")]
    #[diagnostic(code(oli::run::division_overflow))]
    DivisionOverflow { function: String },

    #[error("call to undefined function {name}")]
    #[diagnostic(code(oli::run::unknown_function))]
    UnknownFunction { name: String },

    #[error("unsupported printf format {format:?}")]
    #[diagnostic(code(oli::run::format))]
    UnsupportedFormat { format: String },

    #[error("reached unreachable code in function {function}")]
    #[diagnostic(code(oli::run::unreachable))]
    Unreachable { function: String },

    #[error("program did not finish within {limit} steps")]
    #[diagnostic(code(oli::run::step_limit))]
    StepLimitExceeded { limit: u64 },

    #[error("call depth exceeded {limit}")]
    #[diagnostic(code(oli::run::stack_overflow))]
    StackOverflow { limit: usize },

    #[error("malformed IR in function {function}: {message}")]
    #[diagnostic(code(oli::run::malformed))]
    Malformed { function: String, message: String },
}

pub type RunResult<T> = Result<T, RuntimeError>;

/// Outcome of running a program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    /// Value returned by the entry function
    pub exit_code: i32,
    /// Everything written through `printf`
    pub stdout: String,
}

impl Execution {
    /// Forward the captured output, flushing so nothing is left buffered
    pub fn write_stdout(&self, out: &mut impl Write) -> io::Result<()> {
        out.write_all(self.stdout.as_bytes())?;
        out.flush()
    }
}

/// Storage a pointer can refer to
#[derive(Debug, Clone, PartialEq, Eq)]
enum Address {
    Global(String),
    Stack(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RtValue {
    Int(i32),
    Bool(bool),
    Ptr(Address),
}

/// Registers of one call frame
type Registers = HashMap<VReg, RtValue>;

pub struct Interpreter<'m> {
    module: &'m Module,
    /// Current value of every `i32` global
    globals: HashMap<String, i32>,
    /// Stack slots of all live frames
    memory: Vec<i32>,
    stdout: String,
    steps: u64,
    step_limit: u64,
    max_depth: usize,
}

impl<'m> Interpreter<'m> {
    pub fn new(module: &'m Module) -> Self {
        let globals = module
            .globals
            .iter()
            .filter_map(|global| match global.init {
                Constant::Int(v) => Some((global.name.clone(), v)),
                Constant::String(_) => None,
            })
            .collect();

        Self {
            module,
            globals,
            memory: Vec::new(),
            stdout: String::new(),
            steps: 0,
            step_limit: DEFAULT_STEP_LIMIT,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Run the entry function to completion
    pub fn run(mut self) -> RunResult<Execution> {
        let exit_code = match self.call(ENTRY_FUNCTION, Vec::new(), 0)? {
            RtValue::Int(v) => v,
            other => {
                return Err(RuntimeError::Malformed {
                    function: ENTRY_FUNCTION.to_string(),
                    message: format!("returned {other:?}"),
                })
            }
        };
        Ok(Execution {
            exit_code,
            stdout: self.stdout,
        })
    }

    fn tick(&mut self) -> RunResult<()> {
        self.steps += 1;
        if self.steps > self.step_limit {
            return Err(RuntimeError::StepLimitExceeded {
                limit: self.step_limit,
            });
        }
        Ok(())
    }

    fn call(&mut self, name: &str, args: Vec<RtValue>, depth: usize) -> RunResult<RtValue> {
        let module = self.module;
        let func = module
            .function(name)
            .ok_or_else(|| RuntimeError::UnknownFunction { name: name.to_string() })?;

        if func.is_external {
            return if name == PRINTF {
                self.printf(&args).map(RtValue::Int)
            } else {
                Err(RuntimeError::UnknownFunction { name: name.to_string() })
            };
        }
        if depth >= self.max_depth {
            return Err(RuntimeError::StackOverflow { limit: self.max_depth });
        }
        if args.len() != func.params.len() {
            return Err(malformed(
                func,
                format!("expected {} arguments, got {}", func.params.len(), args.len()),
            ));
        }

        let mut regs: Registers = func.params.iter().map(|(reg, _)| *reg).zip(args).collect();
        let base = self.memory.len();
        let result = self.execute(func, &mut regs, depth);
        self.memory.truncate(base);
        result
    }

    fn execute(&mut self, func: &'m Function, regs: &mut Registers, depth: usize) -> RunResult<RtValue> {
        let mut block: &BasicBlock = func
            .entry_block()
            .ok_or_else(|| malformed(func, "no entry block".to_string()))?;

        loop {
            for instr in &block.instructions {
                self.tick()?;
                if let Some(value) = self.instruction(func, regs, instr, depth)? {
                    if let Some(result) = instr.result {
                        regs.insert(result, value);
                    }
                }
            }

            self.tick()?;
            let terminator = block
                .terminator
                .as_ref()
                .ok_or_else(|| malformed(func, format!("{} has no terminator", block.id)))?;
            let next = match terminator {
                Terminator::Ret(value) => return operand(func, regs, value),
                Terminator::Br(target) => *target,
                Terminator::CondBr {
                    cond,
                    then_block,
                    else_block,
                } => {
                    if as_bool(func, operand(func, regs, cond)?)? {
                        *then_block
                    } else {
                        *else_block
                    }
                }
                Terminator::Unreachable => {
                    return Err(RuntimeError::Unreachable {
                        function: func.name.clone(),
                    })
                }
            };
            block = func
                .block(next)
                .ok_or_else(|| malformed(func, format!("branch to missing {next}")))?;
        }
    }

    fn instruction(
        &mut self,
        func: &Function,
        regs: &Registers,
        instr: &Instruction,
        depth: usize,
    ) -> RunResult<Option<RtValue>> {
        let int = |v: &Value| operand(func, regs, v).and_then(|v| as_int(func, v));

        let value = match &instr.kind {
            InstrKind::Add(a, b) => RtValue::Int(int(a)?.wrapping_add(int(b)?)),
            InstrKind::Sub(a, b) => RtValue::Int(int(a)?.wrapping_sub(int(b)?)),
            InstrKind::Mul(a, b) => RtValue::Int(int(a)?.wrapping_mul(int(b)?)),
            InstrKind::SDiv(a, b) => {
                let (a, b) = (int(a)?, int(b)?);
                if b == 0 {
                    return Err(RuntimeError::DivisionByZero {
                        function: func.name.clone(),
                    });
                }
                let quotient = a.checked_div(b).ok_or_else(|| RuntimeError::DivisionOverflow {
                    function: func.name.clone(),
                })?;
                RtValue::Int(quotient)
            }
            InstrKind::ICmp(op, a, b) => RtValue::Bool(op.holds(int(a)?, int(b)?)),
            InstrKind::ZExt(v, _) => RtValue::Int(as_bool(func, operand(func, regs, v)?)? as i32),
            InstrKind::Alloca(_) => {
                self.memory.push(0);
                RtValue::Ptr(Address::Stack(self.memory.len() - 1))
            }
            InstrKind::Load(ptr) => {
                let address = as_ptr(func, operand(func, regs, ptr)?)?;
                RtValue::Int(self.load(func, &address)?)
            }
            InstrKind::Store(ptr, value) => {
                let address = as_ptr(func, operand(func, regs, ptr)?)?;
                let value = int(value)?;
                self.store(func, &address, value)?;
                return Ok(None);
            }
            InstrKind::Call { func: callee, args } => {
                let args = args
                    .iter()
                    .map(|arg| operand(func, regs, arg))
                    .collect::<RunResult<Vec<_>>>()?;
                self.call(callee, args, depth + 1)?
            }
        };
        Ok(Some(value))
    }

    fn load(&self, func: &Function, address: &Address) -> RunResult<i32> {
        let slot = match address {
            Address::Global(name) => self.globals.get(name),
            Address::Stack(index) => self.memory.get(*index),
        };
        slot.copied()
            .ok_or_else(|| malformed(func, format!("load from invalid address {address:?}")))
    }

    fn store(&mut self, func: &Function, address: &Address, value: i32) -> RunResult<()> {
        let slot = match address {
            Address::Global(name) => self.globals.get_mut(name),
            Address::Stack(index) => self.memory.get_mut(*index),
        };
        match slot {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(malformed(func, format!("store to invalid address {address:?}"))),
        }
    }

    /// `printf` supporting `%d` and `%%`; returns the number of bytes written
    fn printf(&mut self, args: &[RtValue]) -> RunResult<i32> {
        let format = match args.first() {
            Some(RtValue::Ptr(Address::Global(name))) => match self.module.global(name) {
                Some(global) => match &global.init {
                    Constant::String(s) => s.clone(),
                    other => other.to_string(),
                },
                None => name.clone(),
            },
            other => format!("{other:?}"),
        };
        let unsupported = || RuntimeError::UnsupportedFormat {
            format: format.clone(),
        };

        let mut out = String::new();
        let mut values = args.iter().skip(1);
        let mut chars = format.chars();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('%') => out.push('%'),
                Some('d') => match values.next() {
                    Some(RtValue::Int(v)) => out.push_str(&v.to_string()),
                    _ => return Err(unsupported()),
                },
                _ => return Err(unsupported()),
            }
        }

        self.stdout.push_str(&out);
        Ok(out.len() as i32)
    }
}

fn malformed(func: &Function, message: String) -> RuntimeError {
    RuntimeError::Malformed {
        function: func.name.clone(),
        message,
    }
}

fn operand(func: &Function, regs: &Registers, value: &Value) -> RunResult<RtValue> {
    match value {
        Value::Reg(reg) => regs
            .get(reg)
            .cloned()
            .ok_or_else(|| malformed(func, format!("{reg} used before definition"))),
        Value::Int(v) => Ok(RtValue::Int(*v)),
        Value::Global(name) => Ok(RtValue::Ptr(Address::Global(name.clone()))),
    }
}

fn as_int(func: &Function, value: RtValue) -> RunResult<i32> {
    match value {
        RtValue::Int(v) => Ok(v),
        other => Err(malformed(func, format!("expected i32, got {other:?}"))),
    }
}

fn as_bool(func: &Function, value: RtValue) -> RunResult<bool> {
    match value {
        RtValue::Bool(b) => Ok(b),
        other => Err(malformed(func, format!("expected i1, got {other:?}"))),
    }
}

fn as_ptr(func: &Function, value: RtValue) -> RunResult<Address> {
    match value {
        RtValue::Ptr(address) => Ok(address),
        other => Err(malformed(func, format!("expected ptr, got {other:?}"))),
    }
}

/// Run a module's entry function with the default limits
pub fn run_module(module: &Module) -> RunResult<Execution> {
    Interpreter::new(module).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::lower_program;
    use crate::lexer::lex;
    use crate::parser::parse;

    fn module_for(source: &str) -> Module {
        let (tokens, errors) = lex(source);
        assert!(errors.is_empty(), "Lex errors: {:?}", errors);
        let program = parse(tokens).expect("parse");
        lower_program(&program).expect("generate")
    }

    fn run_source(source: &str) -> RunResult<Execution> {
        run_module(&module_for(source))
    }

    fn exit_code(source: &str) -> i32 {
        match run_source(source) {
            Ok(execution) => execution.exit_code,
            Err(e) => panic!("Runtime error: {e}"),
        }
    }

    #[test]
    fn test_arithmetic_wraps() {
        assert_eq!(exit_code("fn main() { return 2147483647 + 1; }"), i32::MIN);
        assert_eq!(exit_code("fn main() { return 0 - 7 / 2; }"), -3);
    }

    #[test]
    fn test_division_by_zero() {
        let err = run_source("fn main() { let z = 0; return 1 / z; }").unwrap_err();
        assert_eq!(
            err,
            RuntimeError::DivisionByZero {
                function: "main".to_string()
            }
        );
    }

    #[test]
    fn test_division_overflow() {
        let err = run_source("fn main() { let m = 0 - 2147483647 - 1; return m / (0 - 1); }").unwrap_err();
        assert!(matches!(err, RuntimeError::DivisionOverflow { .. }));
    }

    #[test]
    fn test_recursion_and_parameter_reassignment() {
        let source = "
            fn fact(n) { if n <= 1 { return 1; } return n * fact(n - 1); }
            fn countdown(n) { while (n > 0) { n = n - 1; } return n; }
            fn main() { return fact(5) + countdown(3); }";
        assert_eq!(exit_code(source), 120);
    }

    #[test]
    fn test_stack_slots_are_per_frame() {
        let source = "
            fn f(n) { let local = n; if n > 0 { f(n - 1); } return local; }
            fn main() { return f(4); }";
        assert_eq!(exit_code(source), 4);
    }

    #[test]
    fn test_step_limit() {
        let module = module_for("fn main() { while (1) { } return 0; }");
        let err = Interpreter::new(&module).with_step_limit(1_000).run().unwrap_err();
        assert_eq!(err, RuntimeError::StepLimitExceeded { limit: 1_000 });
    }

    #[test]
    fn test_call_depth_limit() {
        let module = module_for("fn f() { return f(); } fn main() { return f(); }");
        let err = Interpreter::new(&module).with_max_depth(50).run().unwrap_err();
        assert_eq!(err, RuntimeError::StackOverflow { limit: 50 });
    }

    #[test]
    fn test_printf_output_and_result() {
        let execution = run_source("fn main() { let n = print(0 - 12); print(n); return 0; }").unwrap();
        assert_eq!(execution.stdout, "-12\n4\n");
    }

    #[test]
    fn test_unreachable_is_a_runtime_error() {
        let mut module = module_for("fn main() { return 0; }");
        let entry = &mut module.functions[1].blocks[0];
        entry.terminator = Some(Terminator::Unreachable);
        assert!(matches!(
            run_module(&module),
            Err(RuntimeError::Unreachable { .. })
        ));
    }

    /// Accepts a fixed number of bytes, then fails
    struct FullPipe {
        room: usize,
        written: Vec<u8>,
    }

    impl Write for FullPipe {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.room == 0 {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
            }
            let n = buf.len().min(self.room);
            self.room -= n;
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_stdout_forwards_and_reports_failures() {
        let execution = run_source("fn main() { print(7); print(8); return 3; }").unwrap();

        let mut out = Vec::new();
        execution.write_stdout(&mut out).unwrap();
        assert_eq!(out, b"7\n8\n");

        let mut pipe = FullPipe {
            room: 2,
            written: Vec::new(),
        };
        let err = execution.write_stdout(&mut pipe).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(pipe.written, b"7\n");
    }
}
