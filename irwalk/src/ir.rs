//! The program representation the engine consumes.
//!
//! A [`Module`] is an ordered collection of global data and functions; a
//! [`Function`] is an ordered list of basic blocks; a [`Block`] is a
//! straight-line instruction sequence ending in exactly one [`Terminator`].
//! Front ends (parsers, loaders) build this representation and hand it to
//! the engine; the engine treats it as immutable and assumes it is
//! well-formed. Instruction results are in SSA form: every parameter and
//! instruction result is identified by a [`ValueId`] unique within its
//! function.

use crate::ty::Type;

/// Index of a global variable within its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalId(pub u32);

/// Index of a function within its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(pub u32);

/// Index of a basic block within its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

/// Identity of a parameter or instruction result within its function.
///
/// Parameters occupy ids `0..params.len()`; instruction results follow.
/// Frame slots are indexed directly by this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(pub u32);

/// Top-level container of global data and functions.
#[derive(Debug, Default)]
pub struct Module {
    /// Ordered global variables.
    pub globals: Vec<Global>,
    /// Ordered functions, definitions and declarations alike.
    pub funcs: Vec<Function>,
}

impl Module {
    pub fn global(&self, id: GlobalId) -> &Global {
        &self.globals[id.0 as usize]
    }

    pub fn func(&self, id: FuncId) -> &Function {
        &self.funcs[id.0 as usize]
    }

    /// Looks a function up by name.
    pub fn func_by_name(&self, name: &str) -> Option<FuncId> {
        self.funcs
            .iter()
            .position(|f| f.name == name)
            .map(|i| FuncId(i as u32))
    }
}

/// A module-level variable backed by global memory.
#[derive(Debug)]
pub struct Global {
    pub name: String,
    pub ty: Type,
    /// Initial contents; `None` leaves the storage zeroed.
    pub init: Option<Constant>,
}

/// A callable. An empty block list marks a declaration: a function with a
/// known signature whose body lives in native code.
#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub ret_ty: Type,
    /// Accepts surplus arguments past the declared parameters.
    pub is_vararg: bool,
    /// Basic blocks in source order; block 0 is the entry block.
    pub blocks: Vec<Block>,
    /// Total number of `ValueId`s in this function (parameters plus
    /// instruction results). Sizes the frame's slot table.
    pub value_count: usize,
}

impl Function {
    /// True when the function has no instruction body.
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }
}

/// A formal parameter.
#[derive(Debug)]
pub struct Param {
    pub id: ValueId,
    pub ty: Type,
}

/// Straight-line instruction sequence plus its control transfer.
///
/// PHI instructions, when present, must be the leading instructions of the
/// block.
#[derive(Debug)]
pub struct Block {
    pub insts: Vec<Instruction>,
    pub term: Terminator,
}

/// One non-terminator instruction and the id its result binds to.
#[derive(Debug)]
pub struct Instruction {
    pub id: ValueId,
    /// Declared result type; `Void` for instructions that produce nothing.
    pub ty: Type,
    pub kind: InstKind,
}

/// The closed set of non-terminator opcodes the engine executes.
#[derive(Debug)]
pub enum InstKind {
    /// Two-operand arithmetic, bitwise, or shift operation.
    Binary {
        op: BinOp,
        lhs: Operand,
        rhs: Operand,
    },
    /// Integer comparison producing an `i1`.
    ICmp {
        pred: IntPredicate,
        lhs: Operand,
        rhs: Operand,
    },
    /// Float comparison producing an `i1`.
    FCmp {
        pred: FloatPredicate,
        lhs: Operand,
        rhs: Operand,
    },
    /// Conversion of `src` to the instruction's result type.
    Cast { op: CastOp, src: Operand },
    /// Reserves `alloc_ty.size()` bytes of stack memory for the current
    /// frame and yields their address.
    Alloca { alloc_ty: Type },
    /// Reads a value of the instruction's result type from memory.
    Load { ptr: Operand },
    /// Writes `value` (of type `ty`) through `ptr`. Produces nothing.
    Store {
        value: Operand,
        ptr: Operand,
        ty: Type,
    },
    /// Address computation: scales the first index by the size of
    /// `pointee`, then steps through struct fields / array elements.
    Gep {
        pointee: Type,
        base: Operand,
        indices: Vec<Operand>,
    },
    /// Reads the aggregate element at `path`.
    ExtractValue { agg: Operand, path: Vec<usize> },
    /// Returns a copy of `agg` with the element at `path` replaced.
    InsertValue {
        agg: Operand,
        elem: Operand,
        path: Vec<usize>,
    },
    /// Function call, direct or through a function address.
    Call { callee: Callee, args: Vec<Operand> },
    /// Fetches the frame's next surplus variadic argument, in call order.
    VaArg,
    /// Block-head pseudo-instruction selecting a value by the predecessor
    /// block control arrived from. Only valid at the head of a block.
    Phi { incoming: Vec<(BlockId, Operand)> },
}

/// Call target.
#[derive(Debug)]
pub enum Callee {
    /// Statically known function.
    Direct(FuncId),
    /// A pointer operand resolved through the function address map.
    Indirect(Operand),
}

/// Block-ending control transfer. This is the full set the engine supports;
/// indirect branches and exception-handling transfers have no representation
/// here, so they are rejected at construction time rather than at run time.
#[derive(Debug)]
pub enum Terminator {
    /// Unconditional branch.
    Br(BlockId),
    /// Two-way branch on an integer condition (non-zero is true).
    CondBr {
        cond: Operand,
        then_dest: BlockId,
        else_dest: BlockId,
    },
    /// Multi-way branch. Cases are scanned in declaration order; the first
    /// case whose constant equals the scrutinee wins, otherwise `default`.
    Switch {
        scrut: Operand,
        cases: Vec<(i128, BlockId)>,
        default: BlockId,
    },
    /// Return from the current function. `None` yields an undefined value.
    Ret(Option<Operand>),
    /// Declared-unreachable point. Executing it aborts interpretation.
    Unreachable,
}

/// Reference to an instruction input.
#[derive(Debug, Clone)]
pub enum Operand {
    /// A parameter or prior instruction result in the current frame.
    Value(ValueId),
    /// A literal, evaluated structurally on use.
    Const(Constant),
    /// The address of a global variable.
    Global(GlobalId),
    /// The synthetic address of a function.
    Func(FuncId),
}

/// Recursively structured literal.
#[derive(Debug, Clone)]
pub enum Constant {
    Int { width: u32, value: i128 },
    Float { width: u32, bits: u64 },
    /// The null pointer.
    Null,
    Undef,
    /// All-zero value of the given type.
    Zero(Type),
    /// Address of a global variable.
    Global(GlobalId),
    /// Address of a function.
    Func(FuncId),
    Array(Vec<Constant>),
    Struct(Vec<Constant>),
}

impl Constant {
    pub fn bool(value: bool) -> Self {
        Constant::Int {
            width: 1,
            value: value as i128,
        }
    }

    pub fn i8(value: i8) -> Self {
        Constant::Int {
            width: 8,
            value: value as i128,
        }
    }

    pub fn i32(value: i32) -> Self {
        Constant::Int {
            width: 32,
            value: value as i128,
        }
    }

    pub fn i64(value: i64) -> Self {
        Constant::Int {
            width: 64,
            value: value as i128,
        }
    }

    pub fn f32(value: f32) -> Self {
        Constant::Float {
            width: 32,
            bits: value.to_bits() as u64,
        }
    }

    pub fn f64(value: f64) -> Self {
        Constant::Float {
            width: 64,
            bits: value.to_bits(),
        }
    }
}

/// Binary opcodes. The `F`-prefixed variants operate on floats, the rest on
/// integers with two's-complement wraparound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
}

/// Integer comparison predicates; `S`/`U` select signed or unsigned order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntPredicate {
    Eq,
    Ne,
    Ugt,
    Uge,
    Ult,
    Ule,
    Sgt,
    Sge,
    Slt,
    Sle,
}

/// Float comparison predicates. `O`-prefixed forms are false when either
/// operand is NaN; `U`-prefixed forms are true.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatPredicate {
    Oeq,
    Ogt,
    Oge,
    Olt,
    Ole,
    One,
    Ord,
    Ueq,
    Ugt,
    Uge,
    Ult,
    Ule,
    Une,
    Uno,
}

/// Conversion opcodes. The destination type is the instruction result type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    FpTrunc,
    FpExt,
    FpToUi,
    FpToSi,
    UiToFp,
    SiToFp,
    PtrToInt,
    IntToPtr,
    /// Bit-pattern reinterpretation between same-sized types.
    Bitcast,
}
