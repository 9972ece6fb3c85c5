//! Bump-allocated memory regions.
//!
//! The engine owns two regions: one for stack allocations and one for
//! global storage. Each region is a flat byte buffer with a monotonically
//! advancing cursor; allocation bumps the cursor and deallocation (stack
//! only) retracts it by exactly the byte total the popping frame allocated.
//! There is no per-object free.
//!
//! Addresses handed to the interpreted program are virtual: each region
//! covers a disjoint range, so a bare `u64` routes to its region and the
//! null address 0 belongs to neither. The stack buffer is sized up front
//! and never reallocates, which keeps host pointers into it stable across
//! native calls; the global buffer only grows during module initialization.

use crate::ty::Type;
use crate::value::{self, Value};
use anyhow::{Result, anyhow, bail};
use smallvec::SmallVec;
use zerocopy::{FromBytes, IntoBytes};

/// First virtual address of the stack region.
pub const STACK_BASE: u64 = 0x0000_1000_0000_0000;
/// First virtual address of the global region.
pub const GLOBAL_BASE: u64 = 0x0000_2000_0000_0000;
/// Width of each region's address range.
const REGION_SPAN: u64 = 0x0000_1000_0000_0000;

/// A contiguous byte store with a bump cursor.
#[derive(Debug)]
struct Region {
    base: u64,
    buf: Vec<u8>,
    cursor: usize,
    /// Fixed-capacity regions fail allocation instead of growing.
    fixed: bool,
}

impl Region {
    fn fixed(base: u64, capacity: usize) -> Self {
        Self {
            base,
            buf: vec![0; capacity],
            cursor: 0,
            fixed: true,
        }
    }

    fn growable(base: u64) -> Self {
        Self {
            base,
            buf: Vec::new(),
            cursor: 0,
            fixed: false,
        }
    }

    fn allocate(&mut self, size: usize) -> Result<u64> {
        let addr = self.base + self.cursor as u64;
        let end = self.cursor + size;
        if end > self.buf.len() {
            if self.fixed {
                bail!(
                    "stack region exhausted: {} bytes requested, {} free",
                    size,
                    self.buf.len() - self.cursor
                );
            }
            self.buf.resize(end, 0);
        }
        self.cursor = end;
        Ok(addr)
    }

    fn deallocate(&mut self, size: usize) -> Result<()> {
        if size > self.cursor {
            bail!(
                "deallocation of {size} bytes exceeds the {} bytes in use",
                self.cursor
            );
        }
        self.cursor -= size;
        Ok(())
    }

    fn clear(&mut self) {
        self.cursor = 0;
        self.buf.clear();
    }

    /// Checks that `offset..offset + size` lies within allocated bytes.
    fn check(&self, offset: usize, size: usize) -> Result<()> {
        if offset + size > self.cursor {
            bail!(
                "out-of-bounds access at 0x{:x} ({} bytes)",
                self.base + offset as u64,
                size
            );
        }
        Ok(())
    }
}

/// The two memory regions of one interpretation context.
#[derive(Debug)]
pub struct Memory {
    stack: Region,
    globals: Region,
}

impl Memory {
    /// Creates both regions; the stack holds at most `stack_bytes`.
    pub fn new(stack_bytes: usize) -> Self {
        Self {
            stack: Region::fixed(STACK_BASE, stack_bytes),
            globals: Region::growable(GLOBAL_BASE),
        }
    }

    /// Bump-allocates from the stack region.
    pub fn alloc_stack(&mut self, size: usize) -> Result<u64> {
        self.stack.allocate(size)
    }

    /// Retracts the stack cursor; `size` must equal the byte total the
    /// popping frame allocated.
    pub fn free_stack(&mut self, size: usize) -> Result<()> {
        self.stack.deallocate(size)
    }

    /// Bump-allocates from the global region.
    pub fn alloc_global(&mut self, size: usize) -> Result<u64> {
        self.globals.allocate(size)
    }

    /// Drops all global storage, for module re-initialization.
    pub fn clear_globals(&mut self) {
        self.globals.clear();
    }

    /// Bytes currently allocated from the stack region.
    pub fn stack_used(&self) -> usize {
        self.stack.cursor
    }

    fn region(&self, addr: u64) -> Result<(&Region, usize)> {
        if (STACK_BASE..STACK_BASE + REGION_SPAN).contains(&addr) {
            Ok((&self.stack, (addr - STACK_BASE) as usize))
        } else if (GLOBAL_BASE..GLOBAL_BASE + REGION_SPAN).contains(&addr) {
            Ok((&self.globals, (addr - GLOBAL_BASE) as usize))
        } else {
            bail!("address 0x{addr:x} is outside interpreted memory")
        }
    }

    fn region_mut(&mut self, addr: u64) -> Result<(&mut Region, usize)> {
        if (STACK_BASE..STACK_BASE + REGION_SPAN).contains(&addr) {
            Ok((&mut self.stack, (addr - STACK_BASE) as usize))
        } else if (GLOBAL_BASE..GLOBAL_BASE + REGION_SPAN).contains(&addr) {
            Ok((&mut self.globals, (addr - GLOBAL_BASE) as usize))
        } else {
            bail!("address 0x{addr:x} is outside interpreted memory")
        }
    }

    /// Borrows `size` bytes at a virtual address.
    pub fn read(&self, addr: u64, size: usize) -> Result<&[u8]> {
        let (region, offset) = self.region(addr)?;
        region.check(offset, size)?;
        Ok(&region.buf[offset..offset + size])
    }

    /// Copies bytes to a virtual address.
    pub fn write(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        let (region, offset) = self.region_mut(addr)?;
        region.check(offset, data.len())?;
        region.buf[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Reads a pointer-sized word as a virtual address.
    pub fn read_ptr(&self, addr: u64) -> Result<u64> {
        u64::read_from_bytes(self.read(addr, size_of::<u64>())?)
            .map_err(|_| anyhow!("short pointer read at 0x{addr:x}"))
    }

    /// Writes a virtual address as a pointer-sized word.
    pub fn write_ptr(&mut self, addr: u64, ptr: u64) -> Result<()> {
        self.write(addr, ptr.as_bytes())
    }

    /// Resolves a virtual address to the concrete host address backing it.
    /// Used when marshaling pointers across the native boundary.
    pub fn host_addr(&self, addr: u64) -> Result<usize> {
        let (region, offset) = self.region(addr)?;
        region.check(offset, 0)?;
        Ok(region.buf.as_ptr() as usize + offset)
    }

    /// Maps a concrete host address back into a virtual address, if it
    /// points into one of the regions.
    pub fn virt_addr(&self, host: usize) -> Option<u64> {
        for region in [&self.stack, &self.globals] {
            let start = region.buf.as_ptr() as usize;
            if (start..start + region.cursor).contains(&host) {
                return Some(region.base + (host - start) as u64);
            }
        }
        None
    }

    /// Reads a value of the given type from memory, decoding scalars
    /// little-endian and aggregates field by field.
    pub fn read_value(&self, addr: u64, ty: &Type) -> Result<Value> {
        match ty {
            Type::Int(width) => {
                let size = ty.size()?;
                let bytes = self.read(addr, size)?;
                let mut buf = [0u8; 16];
                buf[..size].copy_from_slice(bytes);
                Ok(Value::int(*width, u128::from_le_bytes(buf)))
            }
            Type::Float(width) => {
                let size = ty.size()?;
                let bytes = self.read(addr, size)?;
                let mut buf = [0u8; 8];
                buf[..size].copy_from_slice(bytes);
                Ok(Value::Float {
                    width: *width,
                    bits: u64::from_le_bytes(buf),
                })
            }
            Type::Ptr => Ok(Value::Addr(self.read_ptr(addr)?)),
            Type::Array { .. } | Type::Struct(_) => {
                let len = match ty {
                    Type::Array { len, .. } => *len,
                    Type::Struct(fields) => fields.len(),
                    _ => unreachable!(),
                };
                let mut elems = Vec::with_capacity(len);
                for i in 0..len {
                    let field_ty = ty.field_type(i)?;
                    let offset = ty.field_offset(i)? as u64;
                    elems.push(self.read_value(addr + offset, field_ty)?);
                }
                Ok(Value::Aggregate(elems))
            }
            Type::Vector { .. } => bail!("unsupported load of vector type"),
            Type::Void => bail!("load of void type"),
        }
    }

    /// Writes a value of the given type to memory. Undefined values write
    /// zeroed storage of the type's size.
    pub fn write_value(&mut self, addr: u64, value: &Value, ty: &Type) -> Result<()> {
        match (value, ty) {
            (Value::Undef, _) => {
                let size = ty.size()?;
                let zeros: SmallVec<[u8; 16]> = SmallVec::from_elem(0, size);
                self.write(addr, &zeros)
            }
            (Value::Aggregate(elems), Type::Array { .. } | Type::Struct(_)) => {
                for (i, elem) in elems.iter().enumerate() {
                    let field_ty = ty.field_type(i)?.clone();
                    let offset = ty.field_offset(i)? as u64;
                    self.write_value(addr + offset, elem, &field_ty)?;
                }
                Ok(())
            }
            _ => {
                let bytes = encode_scalar(value, ty)?;
                self.write(addr, &bytes)
            }
        }
    }
}

/// Little-endian encoding of a scalar value, sized by its type.
fn encode_scalar(value: &Value, ty: &Type) -> Result<SmallVec<[u8; 16]>> {
    match (value, ty) {
        (Value::Int { width, bits }, Type::Int(w)) if width == w => {
            let size = ty.size()?;
            Ok(SmallVec::from_slice(&bits.to_le_bytes()[..size]))
        }
        (Value::Float { width, bits }, Type::Float(w)) if width == w => {
            let size = ty.size()?;
            Ok(SmallVec::from_slice(&bits.to_le_bytes()[..size]))
        }
        (Value::Addr(addr), Type::Ptr) => Ok(SmallVec::from_slice(&addr.to_le_bytes())),
        _ => bail!("value {value:?} does not match storage type {ty:?}"),
    }
}
