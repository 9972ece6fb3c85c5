//! The control-flow state machine.
//!
//! One [`Interpreter`] owns all mutable interpretation state: the two
//! memory regions, the global environment, the call stack, and the native
//! symbol registry. Calls to functions with bodies recurse on the host
//! call stack, one block-walk activation per interpreted frame, so
//! interpreted and host nesting correspond exactly.
//!
//! Errors are fatal: interpretation either completes and returns a value
//! or fails as a whole. There is no mid-interpretation recovery, only an
//! error bubbled to the caller of the public entry points.

use crate::dispatch::{self, NativeRegistry, NativeValue};
use crate::ir::{
    BlockId, Constant, FuncId, GlobalId, InstKind, Module, Operand, Terminator, ValueId,
};
use crate::memory::Memory;
use crate::stack::{CallStack, StackFrame};
use crate::ty::{PTR_SIZE, Type};
use crate::value::Value;
use anyhow::{Result, anyhow, bail};
use std::collections::HashMap;
use tracing::{debug, info, trace};

/// Engine limits supplied by the driver.
#[derive(Debug, Clone)]
pub struct Config {
    /// Interpreted call-depth limit. Interpreted calls recurse on the host
    /// stack, so this bound turns runaway recursion into a reported error
    /// instead of a host stack overflow.
    pub max_call_depth: usize,
    /// Capacity of the stack region in bytes.
    pub stack_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_call_depth: 256,
            stack_bytes: 1 << 20,
        }
    }
}

/// Fixed mapping from global and function identity to allocated addresses,
/// built once at module load and read-only afterwards.
#[derive(Debug, Default)]
pub struct GlobalEnv {
    global_addrs: Vec<u64>,
    func_addrs: Vec<u64>,
    /// Reverse map enabling calls through function pointers.
    funcs_by_addr: HashMap<u64, FuncId>,
}

impl GlobalEnv {
    pub fn global_addr(&self, id: GlobalId) -> Result<u64> {
        self.global_addrs
            .get(id.0 as usize)
            .copied()
            .ok_or_else(|| anyhow!("global id {} has no allocated address", id.0))
    }

    pub fn func_addr(&self, id: FuncId) -> Result<u64> {
        self.func_addrs
            .get(id.0 as usize)
            .copied()
            .ok_or_else(|| anyhow!("function id {} has no allocated address", id.0))
    }

    pub fn func_by_addr(&self, addr: u64) -> Option<FuncId> {
        self.funcs_by_addr.get(&addr).copied()
    }
}

/// The execution engine for one loaded module.
pub struct Interpreter<'m> {
    pub(crate) module: &'m Module,
    pub(crate) config: Config,
    pub(crate) memory: Memory,
    pub(crate) env: GlobalEnv,
    pub(crate) frames: CallStack,
    pub(crate) natives: NativeRegistry,
}

impl<'m> Interpreter<'m> {
    /// Loads a module: allocates and initializes global storage and assigns
    /// every function its synthetic address.
    pub fn load(module: &'m Module, config: Config) -> Result<Self> {
        let memory = Memory::new(config.stack_bytes);
        let mut interp = Self {
            module,
            config,
            memory,
            env: GlobalEnv::default(),
            frames: CallStack::default(),
            natives: NativeRegistry::default(),
        };
        interp.init_globals()?;
        Ok(interp)
    }

    /// (Re)runs module initialization: clears global memory, allocates
    /// storage for every global, writes initializers, then gives each
    /// function a synthetic address registered in both directions.
    ///
    /// Allocation happens in a first pass and initializer writes in a
    /// second, so an initializer may reference another global's address
    /// regardless of declaration order.
    pub fn init_globals(&mut self) -> Result<()> {
        self.memory.clear_globals();
        self.env = GlobalEnv::default();

        for global in &self.module.globals {
            if matches!(global.ty, Type::Vector { .. }) {
                bail!(
                    "unsupported global '{}': vector-typed globals cannot be allocated",
                    global.name
                );
            }
            let addr = self.memory.alloc_global(global.ty.size()?)?;
            self.env.global_addrs.push(addr);
        }

        for (i, global) in self.module.globals.iter().enumerate() {
            if let Some(init) = &global.init {
                let value = self.eval_constant(init)?;
                let addr = self.env.global_addrs[i];
                self.memory.write_value(addr, &value, &global.ty)?;
            }
        }

        for (i, func) in self.module.funcs.iter().enumerate() {
            let addr = self.memory.alloc_global(PTR_SIZE)?;
            self.env.func_addrs.push(addr);
            self.env.funcs_by_addr.insert(addr, FuncId(i as u32));
            trace!(function = %func.name, addr, "assigned function address");
        }

        info!(
            globals = self.module.globals.len(),
            functions = self.module.funcs.len(),
            "module initialized"
        );
        Ok(())
    }

    /// Binds a native handler to a declared function name.
    pub fn register_native<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: for<'a> Fn(&mut Interpreter<'a>, &[NativeValue]) -> Result<NativeValue> + 'static,
    {
        self.natives.register(name, handler);
    }

    /// Invokes a function with an ordered argument list and returns its
    /// result value. Declaration-only targets route to the native
    /// dispatcher; everything else pushes a frame and walks the body.
    pub fn call(&mut self, func: FuncId, args: Vec<Value>) -> Result<Value> {
        let f = self.module.func(func);

        if !(args.len() == f.params.len() || (args.len() > f.params.len() && f.is_vararg)) {
            bail!(
                "call to '{}' passes {} arguments, expected {}{}",
                f.name,
                args.len(),
                f.params.len(),
                if f.is_vararg { " or more" } else { "" }
            );
        }
        if self.frames.depth() >= self.config.max_call_depth {
            bail!(
                "call depth limit of {} exceeded calling '{}'",
                self.config.max_call_depth,
                f.name
            );
        }

        if f.is_declaration() {
            return self.call_external(func, &args);
        }

        debug!(function = %f.name, args = args.len(), "entering function");
        let mut frame = StackFrame::new(func, f.value_count);
        let mut args = args.into_iter();
        for (param, value) in f.params.iter().zip(args.by_ref()) {
            frame.bind(param.id, value)?;
        }
        for surplus in args {
            frame.push_vararg(surplus);
        }
        self.frames.push(frame);

        self.run_frame(func)
    }

    /// Pops the current frame and reclaims exactly the stack bytes it
    /// allocated.
    fn pop_frame(&mut self) -> Result<()> {
        let frame = self.frames.pop()?;
        self.memory.free_stack(frame.alloc_bytes())
    }

    /// Walks the blocks of the current frame's function until a return.
    fn run_frame(&mut self, func: FuncId) -> Result<Value> {
        let f = self.module.func(func);
        let mut cur = BlockId(0);
        let mut prev: Option<BlockId> = None;

        loop {
            let block = f.block(cur);
            trace!(function = %f.name, block = cur.0, "executing block");

            // PHI nodes update simultaneously: read every incoming value
            // against the predecessor's bindings first, commit after.
            let mut next_inst = 0;
            if let Some(prev_id) = prev {
                let mut staged: Vec<(ValueId, Value)> = Vec::new();
                while let Some(inst) = block.insts.get(next_inst) {
                    let InstKind::Phi { incoming } = &inst.kind else {
                        break;
                    };
                    let (_, operand) = incoming
                        .iter()
                        .find(|(pred, _)| *pred == prev_id)
                        .ok_or_else(|| {
                            anyhow!(
                                "phi node in block {} of '{}' has no entry for predecessor {}",
                                cur.0,
                                f.name,
                                prev_id.0
                            )
                        })?;
                    staged.push((inst.id, self.eval_operand(operand)?));
                    next_inst += 1;
                }
                let frame = self.frames.current_mut()?;
                for (id, value) in staged {
                    frame.bind(id, value)?;
                }
            } else if let Some(inst) = block.insts.first() {
                if matches!(inst.kind, InstKind::Phi { .. }) {
                    bail!("phi node in the entry block of '{}'", f.name);
                }
            }

            for inst in &block.insts[next_inst..] {
                if matches!(inst.kind, InstKind::Phi { .. }) {
                    bail!(
                        "phi node after non-phi instruction in block {} of '{}'",
                        cur.0,
                        f.name
                    );
                }
                let value = self.eval_instruction(inst)?;
                if !inst.ty.is_void() {
                    self.frames.current_mut()?.bind(inst.id, value)?;
                }
            }

            match &block.term {
                Terminator::Br(dest) => {
                    prev = Some(cur);
                    cur = *dest;
                }
                Terminator::CondBr {
                    cond,
                    then_dest,
                    else_dest,
                } => {
                    let dest = if self.eval_operand(cond)?.is_truthy()? {
                        *then_dest
                    } else {
                        *else_dest
                    };
                    prev = Some(cur);
                    cur = dest;
                }
                Terminator::Switch {
                    scrut,
                    cases,
                    default,
                } => {
                    let value = self.eval_operand(scrut)?;
                    let (width, bits) = value.as_int()?;
                    // First declared case wins on equal constants.
                    let dest = cases
                        .iter()
                        .find(|(case, _)| Value::from_i128(width, *case) == value)
                        .map_or(*default, |(_, dest)| *dest);
                    trace!(scrut = bits, dest = dest.0, "switch");
                    prev = Some(cur);
                    cur = dest;
                }
                Terminator::Ret(operand) => {
                    let ret = match operand {
                        Some(operand) => self.eval_operand(operand)?,
                        None => Value::Undef,
                    };
                    self.pop_frame()?;
                    debug!(function = %f.name, "returning");
                    return Ok(ret);
                }
                Terminator::Unreachable => {
                    bail!(
                        "unsupported: reached an unreachable terminator in block {} of '{}'",
                        cur.0,
                        f.name
                    );
                }
            }
        }
    }

    /// Resolves one operand reference to a value.
    pub(crate) fn eval_operand(&self, operand: &Operand) -> Result<Value> {
        match operand {
            Operand::Value(id) => Ok(self.frames.current()?.get(*id)?.clone()),
            Operand::Const(constant) => self.eval_constant(constant),
            Operand::Global(id) => Ok(Value::Addr(self.env.global_addr(*id)?)),
            Operand::Func(id) => Ok(Value::Addr(self.env.func_addr(*id)?)),
        }
    }

    /// Structurally evaluates a constant expression.
    pub(crate) fn eval_constant(&self, constant: &Constant) -> Result<Value> {
        Ok(match constant {
            Constant::Int { width, value } => Value::from_i128(*width, *value),
            Constant::Float { width, bits } => Value::Float {
                width: *width,
                bits: *bits,
            },
            Constant::Null => Value::Addr(0),
            Constant::Undef => Value::Undef,
            Constant::Zero(ty) => Value::zero(ty)?,
            Constant::Global(id) => Value::Addr(self.env.global_addr(*id)?),
            Constant::Func(id) => Value::Addr(self.env.func_addr(*id)?),
            Constant::Array(elems) | Constant::Struct(elems) => Value::Aggregate(
                elems
                    .iter()
                    .map(|elem| self.eval_constant(elem))
                    .collect::<Result<_>>()?,
            ),
        })
    }

    /// Dispatches a declaration-only function to its native handler.
    fn call_external(&mut self, func: FuncId, args: &[Value]) -> Result<Value> {
        let f = self.module.func(func);
        let handler = self
            .natives
            .resolve(&f.name)
            .ok_or_else(|| anyhow!("unresolved external symbol '{}'", f.name))?;

        let mut native_args = Vec::with_capacity(args.len());
        for (i, value) in args.iter().enumerate() {
            let native = match f.params.get(i) {
                Some(param) => dispatch::marshal_arg(&self.memory, value, &param.ty)?,
                None => dispatch::marshal_vararg(&self.memory, value)?,
            };
            native_args.push(native);
        }

        debug!(function = %f.name, args = native_args.len(), "dispatching native call");
        let ret = handler(self, &native_args)?;
        dispatch::unmarshal_ret(&self.memory, ret, &f.ret_ty)
    }

    /// Interprets the designated entry function with a process argument
    /// list and maps its result to a process exit status.
    ///
    /// An undefined result maps to 0; an integer result is truncated to its
    /// low 8 bits (so a 32-bit -1 exits with status 255). Anything else is
    /// an error.
    pub fn run_entry(&mut self, entry: FuncId, args: &[String]) -> Result<i32> {
        let argv = self.build_entry_args(entry, args)?;
        let ret = self.call(entry, argv)?;
        match ret {
            Value::Undef => Ok(0),
            Value::Int { bits, .. } => Ok((bits & 0xff) as i32),
            other => bail!("entry function returned a non-integer value: {other:?}"),
        }
    }

    /// Builds the entry function's argument vector. A niladic entry gets
    /// no arguments; a two-parameter entry gets C-style `(argc, argv)`,
    /// with NUL-terminated argument copies and the pointer array written
    /// into the global region (argv[argc] is null).
    fn build_entry_args(&mut self, entry: FuncId, args: &[String]) -> Result<Vec<Value>> {
        let f = self.module.func(entry);
        match f.params.len() {
            0 => Ok(Vec::new()),
            2 => {
                let mut ptrs = Vec::with_capacity(args.len());
                for arg in args {
                    let addr = self.memory.alloc_global(arg.len() + 1)?;
                    self.memory.write(addr, arg.as_bytes())?;
                    self.memory.write(addr + arg.len() as u64, &[0])?;
                    ptrs.push(addr);
                }
                let argv = self.memory.alloc_global((args.len() + 1) * PTR_SIZE)?;
                for (i, ptr) in ptrs.iter().enumerate() {
                    self.memory.write_ptr(argv + (i * PTR_SIZE) as u64, *ptr)?;
                }
                self.memory
                    .write_ptr(argv + (args.len() * PTR_SIZE) as u64, 0)?;
                Ok(vec![
                    Value::int(32, args.len() as u128),
                    Value::Addr(argv),
                ])
            }
            n => bail!(
                "entry function '{}' takes {n} parameters; expected none or (argc, argv)",
                f.name
            ),
        }
    }

    /// Bytes currently allocated from the stack region. Zero whenever no
    /// interpreted call is active.
    pub fn stack_used(&self) -> usize {
        self.memory.stack_used()
    }

    /// The fixed global/function address environment.
    pub fn env(&self) -> &GlobalEnv {
        &self.env
    }

    /// Interpreted memory, for drivers and native handlers that want to
    /// inspect region contents through virtual addresses.
    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }
}
