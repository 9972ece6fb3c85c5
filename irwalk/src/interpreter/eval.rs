//! Per-instruction semantics.
//!
//! Maps one non-terminator instruction plus its resolved operand values to
//! a result value. Nothing here alters control flow; calls recurse through
//! the engine's call protocol and return like any other producer.

use crate::ir::{Callee, InstKind, Instruction, Operand};
use crate::ty::Type;
use crate::value::{self, Value};
use anyhow::{Result, anyhow, bail};
use tracing::trace;

impl<'m> super::engine::Interpreter<'m> {
    /// Evaluates one non-terminator instruction and returns its result
    /// value (`Undef` for instructions of void type).
    pub(super) fn eval_instruction(&mut self, inst: &Instruction) -> Result<Value> {
        trace!(id = inst.id.0, "evaluating instruction");
        match &inst.kind {
            InstKind::Binary { op, lhs, rhs } => {
                let lhs = self.eval_operand(lhs)?;
                let rhs = self.eval_operand(rhs)?;
                value::binary(*op, &lhs, &rhs)
            }
            InstKind::ICmp { pred, lhs, rhs } => {
                let lhs = self.eval_operand(lhs)?;
                let rhs = self.eval_operand(rhs)?;
                value::icmp(*pred, &lhs, &rhs)
            }
            InstKind::FCmp { pred, lhs, rhs } => {
                let lhs = self.eval_operand(lhs)?;
                let rhs = self.eval_operand(rhs)?;
                value::fcmp(*pred, &lhs, &rhs)
            }
            InstKind::Cast { op, src } => {
                let src = self.eval_operand(src)?;
                value::cast(*op, &src, &inst.ty)
            }
            InstKind::Alloca { alloc_ty } => {
                let size = alloc_ty.size()?;
                let addr = self.memory.alloc_stack(size)?;
                self.frames.current_mut()?.add_alloc(size);
                Ok(Value::Addr(addr))
            }
            InstKind::Load { ptr } => {
                let addr = self.eval_operand(ptr)?.as_addr()?;
                self.memory.read_value(addr, &inst.ty)
            }
            InstKind::Store { value, ptr, ty } => {
                let value = self.eval_operand(value)?;
                let addr = self.eval_operand(ptr)?.as_addr()?;
                self.memory.write_value(addr, &value, ty)?;
                Ok(Value::Undef)
            }
            InstKind::Gep {
                pointee,
                base,
                indices,
            } => self.eval_gep(pointee, base, indices),
            InstKind::ExtractValue { agg, path } => {
                let agg = self.eval_operand(agg)?;
                value::extract(&agg, path)
            }
            InstKind::InsertValue { agg, elem, path } => {
                let agg = self.eval_operand(agg)?;
                let elem = self.eval_operand(elem)?;
                value::insert(agg, path, elem)
            }
            InstKind::Call { callee, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval_operand(arg)?);
                }
                let func = match callee {
                    Callee::Direct(id) => *id,
                    Callee::Indirect(operand) => {
                        let addr = self.eval_operand(operand)?.as_addr()?;
                        self.env.func_by_addr(addr).ok_or_else(|| {
                            anyhow!("indirect call through 0x{addr:x}, which is not a function address")
                        })?
                    }
                };
                self.call(func, values)
            }
            InstKind::VaArg => self.frames.current_mut()?.next_vararg(),
            InstKind::Phi { .. } => {
                bail!("phi node evaluated outside a block-entry transition")
            }
        }
    }

    /// Address computation. The first index scales by the whole pointee
    /// size; each further index steps into a struct field or array element.
    fn eval_gep(&mut self, pointee: &Type, base: &Operand, indices: &[Operand]) -> Result<Value> {
        let base_addr = self.eval_operand(base)?.as_addr()?;
        let mut indices = indices.iter();

        let mut offset: i128 = match indices.next() {
            Some(operand) => {
                let index = self.eval_operand(operand)?.as_signed()?;
                index * pointee.size()? as i128
            }
            None => 0,
        };

        let mut cur = pointee.clone();
        for operand in indices {
            let index = self.eval_operand(operand)?.as_signed()?;
            match &cur {
                Type::Struct(_) => {
                    let index = usize::try_from(index)
                        .map_err(|_| anyhow!("negative struct field index {index}"))?;
                    offset += cur.field_offset(index)? as i128;
                    cur = cur.field_type(index)?.clone();
                }
                Type::Array { elem, .. } => {
                    offset += index * elem.size()? as i128;
                    cur = (**elem).clone();
                }
                other => bail!("address computation steps into non-aggregate {other:?}"),
            }
        }

        Ok(Value::Addr(base_addr.wrapping_add(offset as u64)))
    }
}
