//! Irwalk is a tree-walking interpreter for a typed SSA intermediate
//! representation.
//!
//! A program arrives as a [`Module`](ir::Module): ordered global data and
//! functions, each function an ordered list of basic blocks, each block a
//! run of instructions ending in one control transfer. The engine executes
//! this representation directly, with no code generation, while supporting
//! calls into precompiled native functions for declarations without
//! instruction bodies.
//!
//! Parsing or loading the representation, textual diagnostics, and the
//! command-line driver are deliberately external: front ends build the
//! [`ir`] data model and hand it to an [`Interpreter`].
//!
//! ```
//! use irwalk::ir::{Block, Constant, Function, Module, Operand, Terminator};
//! use irwalk::ty::Type;
//! use irwalk::Config;
//!
//! let module = Module {
//!     globals: vec![],
//!     funcs: vec![Function {
//!         name: "main".into(),
//!         params: vec![],
//!         ret_ty: Type::Int(32),
//!         is_vararg: false,
//!         blocks: vec![Block {
//!             insts: vec![],
//!             term: Terminator::Ret(Some(Operand::Const(Constant::i32(7)))),
//!         }],
//!         value_count: 0,
//!     }],
//! };
//!
//! let exit = irwalk::run_entry(&module, "main", &[], Config::default()).unwrap();
//! assert_eq!(exit, 7);
//! ```

pub mod dispatch;
pub mod ir;
mod interpreter;
pub mod memory;
pub mod stack;
pub mod ty;
pub mod value;

pub use crate::dispatch::{NativeRegistry, NativeValue};
pub use crate::interpreter::engine::{Config, GlobalEnv, Interpreter};
pub use crate::value::Value;

use anyhow::Result;
use tracing::info;

/// Loads `module`, interprets the entry function named `entry_name` with
/// the given process arguments, and returns the process exit status.
///
/// Convenience wrapper over [`Interpreter::load`] and
/// [`Interpreter::run_entry`] for drivers that need no native handlers.
pub fn run_entry(
    module: &ir::Module,
    entry_name: &str,
    args: &[String],
    config: Config,
) -> Result<i32> {
    let entry = module
        .func_by_name(entry_name)
        .ok_or_else(|| anyhow::anyhow!("entry function '{entry_name}' not found"))?;
    info!(entry = entry_name, "starting interpretation");

    let mut interp = Interpreter::load(module, config)?;
    let status = interp.run_entry(entry, args)?;

    info!(status, "interpretation completed");
    Ok(status)
}
