//! IR Types
//!
//! Type representations and containers for the Oli IR.

use std::fmt;

/// A virtual register (SSA value)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VReg(pub u32);

impl fmt::Display for VReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%t{}", self.0)
    }
}

/// A basic block label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// IR types. Every language value is an `I32`; the rest exist for
/// storage addresses and the `printf` format string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrType {
    /// 8-bit integer (string bytes)
    I8,
    /// 32-bit signed integer
    I32,
    /// Opaque pointer
    Ptr,
    /// Array of elements
    Array(Box<IrType>, usize),
}

impl IrType {
    pub fn array(element: IrType, size: usize) -> Self {
        IrType::Array(Box::new(element), size)
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrType::I8 => write!(f, "i8"),
            IrType::I32 => write!(f, "i32"),
            IrType::Ptr => write!(f, "ptr"),
            IrType::Array(elem, size) => write!(f, "[{} x {}]", size, elem),
        }
    }
}

/// A module contains functions and global definitions
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub name: String,
    pub functions: Vec<Function>,
    pub globals: Vec<Global>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
            globals: Vec::new(),
        }
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn global(&self, name: &str) -> Option<&Global> {
        self.globals.iter().find(|g| g.name == name)
    }
}

/// A function in the IR
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<(VReg, IrType)>,
    pub ret_type: IrType,
    pub blocks: Vec<BasicBlock>,
    pub is_external: bool,
    pub is_vararg: bool,
}

impl Function {
    pub fn new(name: impl Into<String>, params: Vec<(VReg, IrType)>, ret_type: IrType) -> Self {
        Self {
            name: name.into(),
            params,
            ret_type,
            blocks: Vec::new(),
            is_external: false,
            is_vararg: false,
        }
    }

    pub fn entry_block(&self) -> Option<&BasicBlock> {
        self.blocks.first()
    }

    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }
}

/// A basic block contains a sequence of instructions
#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    pub id: BlockId,
    /// Name hint, combined with the id to form the emitted label
    pub label: Option<String>,
    pub instructions: Vec<super::Instruction>,
    pub terminator: Option<super::Terminator>,
}

impl BasicBlock {
    pub fn new(id: BlockId) -> Self {
        Self {
            id,
            label: None,
            instructions: Vec::new(),
            terminator: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Label as written in LLVM text: `while.cond3`, or `bb3` without a hint
    pub fn name(&self) -> String {
        match &self.label {
            Some(label) => format!("{}{}", label, self.id.0),
            None => self.id.to_string(),
        }
    }
}

/// A global variable or constant
#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub name: String,
    pub ty: IrType,
    pub init: Constant,
    pub is_const: bool,
}

/// A constant value
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i32),
    /// NUL-terminated byte string
    String(String),
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int(v) => write!(f, "{}", v),
            Constant::String(s) => write!(f, "{:?}", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_display() {
        assert_eq!(IrType::I32.to_string(), "i32");
        assert_eq!(IrType::Ptr.to_string(), "ptr");
        assert_eq!(IrType::array(IrType::I8, 4).to_string(), "[4 x i8]");
    }

    #[test]
    fn test_block_names() {
        assert_eq!(BasicBlock::new(BlockId(3)).name(), "bb3");
        assert_eq!(
            BasicBlock::new(BlockId(3)).with_label("while.cond").name(),
            "while.cond3"
        );
    }
}
