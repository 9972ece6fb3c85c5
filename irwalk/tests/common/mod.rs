//! Common test utilities: a small builder for assembling modules by hand.

use irwalk::ir::{
    Block, BlockId, Callee, Constant, Function, Global, GlobalId, FuncId, InstKind, Instruction,
    Module, Operand, Param, Terminator, ValueId,
};
use irwalk::ty::Type;
use std::sync::Once;

static INIT: Once = Once::new();

/// Installs a tracing subscriber honoring `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

/// Builds one function, assigning value ids and block ids in order.
pub struct FuncBuilder {
    name: String,
    params: Vec<Param>,
    ret_ty: Type,
    is_vararg: bool,
    blocks: Vec<(Vec<Instruction>, Option<Terminator>)>,
    next_value: u32,
    cur: usize,
}

impl FuncBuilder {
    pub fn new(name: &str, param_tys: &[Type], ret_ty: Type) -> Self {
        let params = param_tys
            .iter()
            .enumerate()
            .map(|(i, ty)| Param {
                id: ValueId(i as u32),
                ty: ty.clone(),
            })
            .collect::<Vec<_>>();
        let next_value = params.len() as u32;
        Self {
            name: name.to_string(),
            params,
            ret_ty,
            is_vararg: false,
            blocks: vec![(Vec::new(), None)],
            next_value,
            cur: 0,
        }
    }

    pub fn vararg(mut self) -> Self {
        self.is_vararg = true;
        self
    }

    /// Operand referring to parameter `index`.
    pub fn param(&self, index: usize) -> Operand {
        assert!(index < self.params.len());
        Operand::Value(ValueId(index as u32))
    }

    /// Appends an empty block and returns its id without switching to it.
    pub fn new_block(&mut self) -> BlockId {
        self.blocks.push((Vec::new(), None));
        BlockId((self.blocks.len() - 1) as u32)
    }

    /// Makes `block` the insertion point.
    pub fn switch_to(&mut self, block: BlockId) {
        self.cur = block.0 as usize;
    }

    /// Operand for the instruction created `ahead` insertions from now.
    /// Lets a phi node reference a value defined later in its block.
    pub fn pending(&self, ahead: u32) -> Operand {
        Operand::Value(ValueId(self.next_value + ahead))
    }

    /// Appends an instruction and returns an operand for its result.
    pub fn inst(&mut self, ty: Type, kind: InstKind) -> Operand {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        self.blocks[self.cur].0.push(Instruction { id, ty, kind });
        Operand::Value(id)
    }

    pub fn term(&mut self, term: Terminator) {
        let slot = &mut self.blocks[self.cur].1;
        assert!(slot.is_none(), "block already terminated");
        *slot = Some(term);
    }

    pub fn ret(&mut self, operand: Option<Operand>) {
        self.term(Terminator::Ret(operand));
    }

    pub fn br(&mut self, dest: BlockId) {
        self.term(Terminator::Br(dest));
    }

    pub fn cond_br(&mut self, cond: Operand, then_dest: BlockId, else_dest: BlockId) {
        self.term(Terminator::CondBr {
            cond,
            then_dest,
            else_dest,
        });
    }

    pub fn call(&mut self, func: FuncId, args: Vec<Operand>, ret_ty: Type) -> Operand {
        self.inst(
            ret_ty,
            InstKind::Call {
                callee: Callee::Direct(func),
                args,
            },
        )
    }

    pub fn build(self) -> Function {
        let blocks = self
            .blocks
            .into_iter()
            .map(|(insts, term)| Block {
                insts,
                term: term.expect("unterminated block"),
            })
            .collect();
        Function {
            name: self.name,
            params: self.params,
            ret_ty: self.ret_ty,
            is_vararg: self.is_vararg,
            blocks,
            value_count: self.next_value as usize,
        }
    }
}

/// Accumulates globals and functions into a module.
#[derive(Default)]
pub struct ModuleBuilder {
    globals: Vec<Global>,
    funcs: Vec<Function>,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_global(&mut self, name: &str, ty: Type, init: Option<Constant>) -> GlobalId {
        self.globals.push(Global {
            name: name.to_string(),
            ty,
            init,
        });
        GlobalId((self.globals.len() - 1) as u32)
    }

    pub fn add_func(&mut self, func: Function) -> FuncId {
        self.funcs.push(func);
        FuncId((self.funcs.len() - 1) as u32)
    }

    /// Adds a declaration-only function: known signature, native body.
    pub fn declare_func(
        &mut self,
        name: &str,
        param_tys: &[Type],
        ret_ty: Type,
        is_vararg: bool,
    ) -> FuncId {
        self.funcs.push(Function {
            name: name.to_string(),
            params: param_tys
                .iter()
                .enumerate()
                .map(|(i, ty)| Param {
                    id: ValueId(i as u32),
                    ty: ty.clone(),
                })
                .collect(),
            ret_ty,
            is_vararg,
            blocks: Vec::new(),
            value_count: param_tys.len(),
        });
        FuncId((self.funcs.len() - 1) as u32)
    }

    pub fn build(self) -> Module {
        Module {
            globals: self.globals,
            funcs: self.funcs,
        }
    }
}
