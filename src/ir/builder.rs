//! IR Builder
//!
//! Helper for constructing IR instructions and basic blocks.
//!
//! The builder has no implicit insertion point: every emitting method takes
//! the block to append to, and the caller tracks where control currently is.

use std::collections::HashMap;

use super::instr::{CmpOp, InstrKind, Instruction, Terminator, Value};
use super::types::{BasicBlock, BlockId, Constant, Function, Global, IrType, Module, VReg};

/// Builder for constructing IR
pub struct IrBuilder {
    /// Next virtual register ID
    next_vreg: u32,
    /// Next block ID
    next_block: u32,
    /// Current module being built
    module: Module,
    /// Current function being built
    current_fn: Option<Function>,
    /// Position in `current_fn.blocks` of every started block
    block_index: HashMap<BlockId, usize>,
    /// Blocks created but not yet started, with their label hint
    pending: HashMap<BlockId, String>,
    /// Number of allocas at the front of the entry block
    allocas: usize,
}

impl IrBuilder {
    /// Create a new IR builder
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            next_vreg: 0,
            next_block: 0,
            module: Module::new(module_name),
            current_fn: None,
            block_index: HashMap::new(),
            pending: HashMap::new(),
            allocas: 0,
        }
    }

    /// Finish building and return the module
    pub fn finish(mut self) -> Module {
        self.finish_function();
        self.module
    }

    /// Create a fresh virtual register
    pub fn fresh_vreg(&mut self) -> VReg {
        let vreg = VReg(self.next_vreg);
        self.next_vreg += 1;
        vreg
    }

    /// Create a fresh block ID
    pub fn fresh_block(&mut self) -> BlockId {
        let id = BlockId(self.next_block);
        self.next_block += 1;
        id
    }

    // ============ Function Building ============

    /// Start building a new `i32` function taking `param_count` `i32`s.
    /// Returns the parameter registers and the started entry block.
    pub fn start_function(&mut self, name: impl Into<String>, param_count: usize) -> (Vec<VReg>, BlockId) {
        self.finish_function();
        self.next_vreg = 0;
        self.next_block = 0;
        self.allocas = 0;

        let params: Vec<(VReg, IrType)> = (0..param_count)
            .map(|_| (self.fresh_vreg(), IrType::I32))
            .collect();
        let vregs = params.iter().map(|(v, _)| *v).collect();

        self.current_fn = Some(Function::new(name, params, IrType::I32));

        let entry = self.create_block("entry");
        self.start_block(entry);

        (vregs, entry)
    }

    /// Finish the current function
    pub fn finish_function(&mut self) {
        if let Some(func) = self.current_fn.take() {
            self.module.functions.push(func);
        }
        self.block_index.clear();
        self.pending.clear();
    }

    /// The first block of the current function left without a terminator,
    /// including blocks that were created but never started
    pub fn unterminated_block(&self) -> Option<BlockId> {
        let open = self
            .current_fn
            .iter()
            .flat_map(|func| func.blocks.iter())
            .filter(|block| block.terminator.is_none())
            .map(|block| block.id);
        open.chain(self.pending.keys().copied()).min()
    }

    /// Declare an external variadic function
    pub fn declare_external_vararg(&mut self, name: impl Into<String>, params: Vec<IrType>, ret_type: IrType) {
        let mut func = Function::new(name, vec![], ret_type);
        func.is_external = true;
        func.is_vararg = true;
        // Store param types without vregs for external functions
        func.params = params.into_iter().map(|ty| (VReg(0), ty)).collect();
        self.module.functions.push(func);
    }

    /// Add a global variable to the module
    pub fn add_global(&mut self, name: impl Into<String>, ty: IrType, init: Constant, is_const: bool) {
        self.module.globals.push(Global {
            name: name.into(),
            ty,
            init,
            is_const,
        });
    }

    /// Add a NUL-terminated string constant and return its address
    pub fn add_string_constant(&mut self, name: impl Into<String>, value: &str) -> Value {
        let name = name.into();
        self.add_global(
            name.clone(),
            IrType::array(IrType::I8, value.len() + 1),
            Constant::String(value.to_string()),
            true,
        );
        Value::Global(name)
    }

    // ============ Block Building ============

    /// Create a new block and return its ID. It is placed in the function
    /// when started.
    pub fn create_block(&mut self, label: impl Into<String>) -> BlockId {
        let id = self.fresh_block();
        self.pending.insert(id, label.into());
        id
    }

    /// Append a created block to the current function
    pub fn start_block(&mut self, id: BlockId) {
        let Some(label) = self.pending.remove(&id) else {
            return;
        };
        if let Some(ref mut func) = self.current_fn {
            self.block_index.insert(id, func.blocks.len());
            func.blocks.push(BasicBlock::new(id).with_label(label));
        }
    }

    fn block_mut(&mut self, id: BlockId) -> Option<&mut BasicBlock> {
        let index = *self.block_index.get(&id)?;
        self.current_fn.as_mut()?.blocks.get_mut(index)
    }

    // ============ Instruction Emission ============

    fn emit(&mut self, block: BlockId, result: Option<VReg>, kind: InstrKind) -> Option<VReg> {
        if let Some(block) = self.block_mut(block) {
            debug_assert!(block.terminator.is_none(), "emitting into terminated {}", block.id);
            block.instructions.push(Instruction::new(result, kind));
        }
        result
    }

    fn emit_with_result(&mut self, block: BlockId, kind: InstrKind) -> VReg {
        let result = self.fresh_vreg();
        self.emit(block, Some(result), kind);
        result
    }

    // ============ Arithmetic ============

    pub fn add(&mut self, block: BlockId, a: Value, b: Value) -> VReg {
        self.emit_with_result(block, InstrKind::Add(a, b))
    }

    pub fn sub(&mut self, block: BlockId, a: Value, b: Value) -> VReg {
        self.emit_with_result(block, InstrKind::Sub(a, b))
    }

    pub fn mul(&mut self, block: BlockId, a: Value, b: Value) -> VReg {
        self.emit_with_result(block, InstrKind::Mul(a, b))
    }

    pub fn sdiv(&mut self, block: BlockId, a: Value, b: Value) -> VReg {
        self.emit_with_result(block, InstrKind::SDiv(a, b))
    }

    // ============ Comparison ============

    pub fn icmp(&mut self, block: BlockId, op: CmpOp, a: Value, b: Value) -> VReg {
        self.emit_with_result(block, InstrKind::ICmp(op, a, b))
    }

    // ============ Conversions ============

    pub fn zext(&mut self, block: BlockId, v: Value, ty: IrType) -> VReg {
        self.emit_with_result(block, InstrKind::ZExt(v, ty))
    }

    // ============ Memory ============

    /// Allocate stack space. Allocas always go to the front of the entry
    /// block, whichever block is currently being filled.
    pub fn alloca(&mut self, ty: IrType) -> VReg {
        let result = self.fresh_vreg();
        let at = self.allocas;
        if let Some(entry) = self.current_fn.as_mut().and_then(|func| func.blocks.first_mut()) {
            entry
                .instructions
                .insert(at, Instruction::new(Some(result), InstrKind::Alloca(ty)));
            self.allocas += 1;
        }
        result
    }

    pub fn load(&mut self, block: BlockId, ptr: Value) -> VReg {
        self.emit_with_result(block, InstrKind::Load(ptr))
    }

    pub fn store(&mut self, block: BlockId, ptr: Value, value: Value) {
        self.emit(block, None, InstrKind::Store(ptr, value));
    }

    // ============ Calls ============

    pub fn call(&mut self, block: BlockId, func: impl Into<String>, args: Vec<Value>) -> VReg {
        self.emit_with_result(
            block,
            InstrKind::Call {
                func: func.into(),
                args,
            },
        )
    }

    // ============ Terminators ============

    fn terminate(&mut self, block: BlockId, terminator: Terminator) {
        if let Some(block) = self.block_mut(block) {
            debug_assert!(block.terminator.is_none(), "{} terminated twice", block.id);
            if block.terminator.is_none() {
                block.terminator = Some(terminator);
            }
        }
    }

    pub fn ret(&mut self, block: BlockId, value: Value) {
        self.terminate(block, Terminator::Ret(value));
    }

    pub fn br(&mut self, block: BlockId, target: BlockId) {
        self.terminate(block, Terminator::Br(target));
    }

    pub fn cond_br(&mut self, block: BlockId, cond: Value, then_block: BlockId, else_block: BlockId) {
        self.terminate(
            block,
            Terminator::CondBr {
                cond,
                then_block,
                else_block,
            },
        );
    }

    pub fn unreachable(&mut self, block: BlockId) {
        self.terminate(block, Terminator::Unreachable);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocas_are_hoisted_to_entry() {
        let mut b = IrBuilder::new("test");
        let (_, entry) = b.start_function("f", 0);
        let body = b.create_block("body");
        b.br(entry, body);
        b.start_block(body);
        let slot = b.alloca(IrType::I32);
        b.store(body, Value::Reg(slot), Value::Int(1));
        b.ret(body, Value::Int(0));

        let module = b.finish();
        let func = &module.functions[0];
        let entry = func.entry_block().unwrap();
        assert_eq!(entry.instructions.len(), 1);
        assert!(matches!(entry.instructions[0].kind, InstrKind::Alloca(IrType::I32)));
        assert_eq!(func.blocks[1].instructions.len(), 1);
    }

    #[test]
    fn test_blocks_are_placed_in_start_order() {
        let mut b = IrBuilder::new("test");
        let (_, entry) = b.start_function("f", 0);
        let late = b.create_block("late");
        let early = b.create_block("early");
        b.br(entry, early);
        b.start_block(early);
        b.br(early, late);
        b.start_block(late);
        b.ret(late, Value::Int(0));

        let module = b.finish();
        let names: Vec<_> = module.functions[0].blocks.iter().map(|b| b.name()).collect();
        assert_eq!(names, vec!["entry0", "early2", "late1"]);
    }

    #[test]
    fn test_unterminated_block_detection() {
        let mut b = IrBuilder::new("test");
        let (_, entry) = b.start_function("f", 0);
        assert_eq!(b.unterminated_block(), Some(entry));
        let never_started = b.create_block("orphan");
        b.ret(entry, Value::Int(0));
        assert_eq!(b.unterminated_block(), Some(never_started));
    }

    #[test]
    fn test_registers_restart_per_function() {
        let mut b = IrBuilder::new("test");
        let (params, entry) = b.start_function("f", 2);
        assert_eq!(params, vec![VReg(0), VReg(1)]);
        b.ret(entry, Value::Reg(params[0]));
        let (params, _) = b.start_function("g", 1);
        assert_eq!(params, vec![VReg(0)]);
    }
}
