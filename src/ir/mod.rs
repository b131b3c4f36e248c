//! Oli Intermediate Representation
//!
//! A small SSA-form IR between the AST and LLVM text. This IR is designed to be:
//! - Easy to generate from the AST, one basic block per control-flow region
//! - Easy to print as LLVM IR
//! - Executable directly by the reference interpreter

mod instr;
mod types;
mod builder;
mod lower;
mod llvm;
pub mod interp;

// Re-export in logical order
pub use instr::*;
pub use types::*;
pub use builder::*;
pub use lower::*;
pub use llvm::*;
