//! Per-call stack frames and the call stack.
//!
//! A frame binds instruction results to values for one function
//! invocation. Slots are indexed directly by [`ValueId`], so the table is
//! sized once from the function's value count. The frame also accounts for
//! every byte its `alloca`s took from the stack region, so the engine can
//! retract the region cursor by exactly that amount on return, and holds
//! the overflow list for surplus variadic arguments.

use crate::ir::{FuncId, ValueId};
use crate::value::Value;
use anyhow::{Result, anyhow, bail};

/// Bindings and allocation accounting for one function invocation.
#[derive(Debug)]
pub struct StackFrame {
    func: FuncId,
    slots: Vec<Option<Value>>,
    alloc_bytes: usize,
    varargs: Vec<Value>,
    va_next: usize,
}

impl StackFrame {
    pub fn new(func: FuncId, value_count: usize) -> Self {
        Self {
            func,
            slots: vec![None; value_count],
            alloc_bytes: 0,
            varargs: Vec::new(),
            va_next: 0,
        }
    }

    pub fn func(&self) -> FuncId {
        self.func
    }

    /// Binds a parameter or instruction result. Rebinding is allowed; PHI
    /// nodes rebind on every block entry.
    pub fn bind(&mut self, id: ValueId, value: Value) -> Result<()> {
        let slot = self
            .slots
            .get_mut(id.0 as usize)
            .ok_or_else(|| anyhow!("value id {} out of bounds", id.0))?;
        *slot = Some(value);
        Ok(())
    }

    /// Looks up a bound value. An unbound slot means the representation
    /// referenced an instruction that never executed.
    pub fn get(&self, id: ValueId) -> Result<&Value> {
        self.slots
            .get(id.0 as usize)
            .ok_or_else(|| anyhow!("value id {} out of bounds", id.0))?
            .as_ref()
            .ok_or_else(|| anyhow!("operand references unbound value id {}", id.0))
    }

    /// Records stack bytes taken by an `alloca` in this frame.
    pub fn add_alloc(&mut self, size: usize) {
        self.alloc_bytes += size;
    }

    /// Total stack bytes this frame allocated.
    pub fn alloc_bytes(&self) -> usize {
        self.alloc_bytes
    }

    /// Appends a surplus variadic argument, preserving call order.
    pub fn push_vararg(&mut self, value: Value) {
        self.varargs.push(value);
    }

    /// Fetches the next surplus variadic argument.
    pub fn next_vararg(&mut self) -> Result<Value> {
        let value = self
            .varargs
            .get(self.va_next)
            .cloned()
            .ok_or_else(|| anyhow!("variadic argument list exhausted"))?;
        self.va_next += 1;
        Ok(value)
    }
}

/// LIFO collection of frames; the most recent frame is current.
#[derive(Debug, Default)]
pub struct CallStack {
    frames: Vec<StackFrame>,
}

impl CallStack {
    pub fn push(&mut self, frame: StackFrame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Result<StackFrame> {
        self.frames
            .pop()
            .ok_or_else(|| anyhow!("pop from an empty call stack"))
    }

    pub fn current(&self) -> Result<&StackFrame> {
        self.frames
            .last()
            .ok_or_else(|| anyhow!("no active stack frame"))
    }

    pub fn current_mut(&mut self) -> Result<&mut StackFrame> {
        self.frames
            .last_mut()
            .ok_or_else(|| anyhow!("no active stack frame"))
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Fails unless every frame has been popped.
    pub fn expect_empty(&self) -> Result<()> {
        if !self.frames.is_empty() {
            bail!("{} stack frames were never popped", self.frames.len());
        }
        Ok(())
    }
}
