//! IR Instructions
//!
//! Instruction definitions for the Oli IR.

use super::types::{BlockId, IrType, VReg};
use std::fmt;

/// An instruction operand
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    /// Result of an earlier instruction, or a parameter
    Reg(VReg),
    /// 32-bit integer constant
    Int(i32),
    /// Address of a module-level symbol
    Global(String),
}

impl From<VReg> for Value {
    fn from(reg: VReg) -> Self {
        Value::Reg(reg)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Reg(reg) => write!(f, "{}", reg),
            Value::Int(v) => write!(f, "{}", v),
            Value::Global(name) => write!(f, "@{}", name),
        }
    }
}

/// An instruction in the IR
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Result register (None for void instructions)
    pub result: Option<VReg>,
    /// The instruction kind
    pub kind: InstrKind,
}

impl Instruction {
    pub fn new(result: Option<VReg>, kind: InstrKind) -> Self {
        Self { result, kind }
    }
}

/// Kinds of instructions
#[derive(Debug, Clone, PartialEq)]
pub enum InstrKind {
    // ============ Arithmetic ============
    /// Integer addition
    Add(Value, Value),
    /// Integer subtraction
    Sub(Value, Value),
    /// Integer multiplication
    Mul(Value, Value),
    /// Signed integer division
    SDiv(Value, Value),

    // ============ Comparison ============
    /// Integer comparison, producing an `i1`
    ICmp(CmpOp, Value, Value),

    // ============ Conversions ============
    /// Zero extend an `i1` to the given type
    ZExt(Value, IrType),

    // ============ Memory ============
    /// Allocate stack space
    Alloca(IrType),
    /// Load an `i32` from memory
    Load(Value),
    /// Store an `i32` to memory (ptr, value)
    Store(Value, Value),

    // ============ Function Calls ============
    /// Call a function
    Call { func: String, args: Vec<Value> },
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// Equal
    Eq,
    /// Not equal
    Ne,
    /// Signed less than
    Slt,
    /// Signed less than or equal
    Sle,
    /// Signed greater than
    Sgt,
    /// Signed greater than or equal
    Sge,
}

impl CmpOp {
    pub fn holds(self, a: i32, b: i32) -> bool {
        match self {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Slt => a < b,
            CmpOp::Sle => a <= b,
            CmpOp::Sgt => a > b,
            CmpOp::Sge => a >= b,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CmpOp::Eq => write!(f, "eq"),
            CmpOp::Ne => write!(f, "ne"),
            CmpOp::Slt => write!(f, "slt"),
            CmpOp::Sle => write!(f, "sle"),
            CmpOp::Sgt => write!(f, "sgt"),
            CmpOp::Sge => write!(f, "sge"),
        }
    }
}

/// Block terminators
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    /// Return an `i32` from the function
    Ret(Value),
    /// Unconditional branch
    Br(BlockId),
    /// Conditional branch on an `i1`
    CondBr {
        cond: Value,
        then_block: BlockId,
        else_block: BlockId,
    },
    /// Marks a block control never reaches
    Unreachable,
}

impl Terminator {
    /// Blocks this terminator can transfer control to
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Ret(_) | Terminator::Unreachable => Vec::new(),
            Terminator::Br(target) => vec![*target],
            Terminator::CondBr {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(result) = self.result {
            write!(f, "{} = ", result)?;
        }
        match &self.kind {
            InstrKind::Add(a, b) => write!(f, "add {}, {}", a, b),
            InstrKind::Sub(a, b) => write!(f, "sub {}, {}", a, b),
            InstrKind::Mul(a, b) => write!(f, "mul {}, {}", a, b),
            InstrKind::SDiv(a, b) => write!(f, "sdiv {}, {}", a, b),
            InstrKind::ICmp(op, a, b) => write!(f, "icmp {} {}, {}", op, a, b),
            InstrKind::ZExt(v, ty) => write!(f, "zext {} to {}", v, ty),
            InstrKind::Alloca(ty) => write!(f, "alloca {}", ty),
            InstrKind::Load(ptr) => write!(f, "load {}", ptr),
            InstrKind::Store(ptr, val) => write!(f, "store {}, {}", ptr, val),
            InstrKind::Call { func, args } => {
                write!(f, "call {}(", func)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Ret(v) => write!(f, "ret {}", v),
            Terminator::Br(block) => write!(f, "br {}", block),
            Terminator::CondBr {
                cond,
                then_block,
                else_block,
            } => {
                write!(f, "br {}, {}, {}", cond, then_block, else_block)
            }
            Terminator::Unreachable => write!(f, "unreachable"),
        }
    }
}
