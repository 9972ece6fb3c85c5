//! Marshaling across the interpreted/native boundary.
//!
//! Declaration-only functions are implemented by precompiled native code.
//! The driver registers a handler per symbol name; the engine marshals each
//! argument into its native representation, invokes the handler, and
//! marshals the return back into a runtime value of the declared type.
//! Handlers receive the interpreter itself so native code can call back
//! into interpreted functions; such re-entrant calls nest on the host
//! stack like any other.
//!
//! Marshaling is strict: a parameter or return type with no native ABI
//! mapping (an aggregate by value, an integer wider than 64 bits) fails
//! the interpretation, since no sound fallback value exists.

use crate::interpreter::engine::Interpreter;
use crate::memory::Memory;
use crate::ty::Type;
use crate::value::Value;
use anyhow::{Result, bail};
use std::collections::HashMap;
use std::rc::Rc;

/// A value in native calling-convention form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NativeValue {
    /// Integer register contents; `width` is at most 64 and `bits` is the
    /// two's-complement pattern masked to it.
    Int { width: u32, bits: u64 },
    F32(f32),
    F64(f64),
    /// Concrete process address, or 0 for null. Addresses backed by
    /// interpreted memory point directly at the region bytes.
    Ptr(usize),
}

impl NativeValue {
    pub fn i32(value: i32) -> Self {
        NativeValue::Int {
            width: 32,
            bits: value as u32 as u64,
        }
    }

    pub fn i64(value: i64) -> Self {
        NativeValue::Int {
            width: 64,
            bits: value as u64,
        }
    }

    /// Sign-extended reading of an integer argument.
    pub fn as_i64(&self) -> Result<i64> {
        match self {
            NativeValue::Int { width, bits } => {
                let shift = 64 - width;
                Ok(((bits << shift) as i64) >> shift)
            }
            other => bail!("expected an integer argument, found {other:?}"),
        }
    }

    pub fn as_i32(&self) -> Result<i32> {
        Ok(self.as_i64()? as i32)
    }

    pub fn as_u64(&self) -> Result<u64> {
        match self {
            NativeValue::Int { bits, .. } => Ok(*bits),
            other => bail!("expected an integer argument, found {other:?}"),
        }
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self {
            NativeValue::F64(value) => Ok(*value),
            other => bail!("expected a 64-bit float argument, found {other:?}"),
        }
    }

    pub fn as_ptr(&self) -> Result<usize> {
        match self {
            NativeValue::Ptr(addr) => Ok(*addr),
            other => bail!("expected a pointer argument, found {other:?}"),
        }
    }
}

/// A registered native entry point. The `&mut Interpreter` parameter lets
/// the handler re-enter the engine.
pub type NativeHandler =
    dyn for<'m> Fn(&mut Interpreter<'m>, &[NativeValue]) -> Result<NativeValue>;

/// Symbol table mapping declared function names to native handlers.
#[derive(Default)]
pub struct NativeRegistry {
    handlers: HashMap<String, Rc<NativeHandler>>,
}

impl NativeRegistry {
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: for<'m> Fn(&mut Interpreter<'m>, &[NativeValue]) -> Result<NativeValue> + 'static,
    {
        self.handlers.insert(name.into(), Rc::new(handler));
    }

    pub fn resolve(&self, name: &str) -> Option<Rc<NativeHandler>> {
        self.handlers.get(name).cloned()
    }
}

/// Marshals one argument per its declared parameter type.
pub fn marshal_arg(memory: &Memory, value: &Value, ty: &Type) -> Result<NativeValue> {
    match (value, ty) {
        (Value::Int { width, bits }, Type::Int(w)) if width == w && *w <= 64 => {
            Ok(NativeValue::Int {
                width: *w,
                bits: *bits as u64,
            })
        }
        (Value::Float { width: 32, bits }, Type::Float(32)) => {
            Ok(NativeValue::F32(f32::from_bits(*bits as u32)))
        }
        (Value::Float { width: 64, bits }, Type::Float(64)) => {
            Ok(NativeValue::F64(f64::from_bits(*bits)))
        }
        (Value::Addr(addr), Type::Ptr) => marshal_addr(memory, *addr),
        (_, Type::Int(w)) if *w > 64 => {
            bail!("unsupported native argument type: integers wider than 64 bits")
        }
        (_, Type::Struct(_) | Type::Array { .. } | Type::Vector { .. }) => {
            bail!("unsupported native argument type: {ty:?} has no by-value ABI mapping")
        }
        (Value::Undef, _) => bail!("undefined value passed to a native function"),
        _ => bail!("argument {value:?} does not match declared type {ty:?}"),
    }
}

/// Marshals a surplus variadic argument by its runtime kind.
pub fn marshal_vararg(memory: &Memory, value: &Value) -> Result<NativeValue> {
    match value {
        Value::Int { width, bits } if *width <= 64 => Ok(NativeValue::Int {
            width: *width,
            bits: *bits as u64,
        }),
        Value::Float { width: 32, bits } => Ok(NativeValue::F32(f32::from_bits(*bits as u32))),
        Value::Float { width: 64, bits } => Ok(NativeValue::F64(f64::from_bits(*bits))),
        Value::Addr(addr) => marshal_addr(memory, *addr),
        other => bail!("unsupported native variadic argument: {other:?}"),
    }
}

fn marshal_addr(memory: &Memory, addr: u64) -> Result<NativeValue> {
    if addr == 0 {
        Ok(NativeValue::Ptr(0))
    } else {
        Ok(NativeValue::Ptr(memory.host_addr(addr)?))
    }
}

/// Marshals the native return into a value of the declared return type.
pub fn unmarshal_ret(memory: &Memory, ret: NativeValue, ty: &Type) -> Result<Value> {
    match (ret, ty) {
        (_, Type::Void) => Ok(Value::Undef),
        (NativeValue::Int { bits, .. }, Type::Int(w)) if *w <= 64 => {
            Ok(Value::int(*w, bits as u128))
        }
        (NativeValue::F32(value), Type::Float(32)) => Ok(Value::f32(value)),
        (NativeValue::F64(value), Type::Float(64)) => Ok(Value::f64(value)),
        (NativeValue::Ptr(0), Type::Ptr) => Ok(Value::Addr(0)),
        (NativeValue::Ptr(host), Type::Ptr) => memory
            .virt_addr(host)
            .map(Value::Addr)
            .ok_or_else(|| {
                anyhow::anyhow!("native return pointer 0x{host:x} is outside interpreted memory")
            }),
        (_, Type::Int(w)) if *w > 64 => {
            bail!("unsupported native return type: integers wider than 64 bits")
        }
        (_, Type::Struct(_) | Type::Array { .. } | Type::Vector { .. }) => {
            bail!("unsupported native return type: {ty:?} has no by-value ABI mapping")
        }
        (ret, ty) => bail!("native return {ret:?} does not match declared type {ty:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Memory;

    #[test]
    fn test_int_marshal_round_trip() {
        let memory = Memory::new(16);
        let native = marshal_arg(&memory, &Value::from_i128(32, -5), &Type::Int(32)).unwrap();
        assert_eq!(native.as_i32().unwrap(), -5);
        let back = unmarshal_ret(&memory, native, &Type::Int(32)).unwrap();
        assert_eq!(back, Value::from_i128(32, -5));
    }

    #[test]
    fn test_pointer_marshal_resolves_to_host_memory() {
        let mut memory = Memory::new(64);
        let addr = memory.alloc_stack(8).unwrap();
        memory.write(addr, &[0xab; 8]).unwrap();

        let native = marshal_arg(&memory, &Value::Addr(addr), &Type::Ptr).unwrap();
        let host = native.as_ptr().unwrap();
        assert_eq!(host, memory.host_addr(addr).unwrap());

        // And back again.
        let back = unmarshal_ret(&memory, NativeValue::Ptr(host), &Type::Ptr).unwrap();
        assert_eq!(back, Value::Addr(addr));
    }

    #[test]
    fn test_null_pointer_marshals_to_zero() {
        let memory = Memory::new(16);
        let native = marshal_arg(&memory, &Value::Addr(0), &Type::Ptr).unwrap();
        assert_eq!(native, NativeValue::Ptr(0));
    }

    #[test]
    fn test_unrepresentable_types_are_fatal() {
        let memory = Memory::new(16);
        let agg = Value::Aggregate(vec![Value::int(32, 1)]);
        let ty = Type::Struct(vec![Type::Int(32)]);
        assert!(marshal_arg(&memory, &agg, &ty).is_err());

        let wide = Value::int(128, 1);
        assert!(marshal_arg(&memory, &wide, &Type::Int(128)).is_err());
        assert!(
            unmarshal_ret(&memory, NativeValue::i64(0), &Type::Int(128)).is_err()
        );
    }

    #[test]
    fn test_void_return_is_undefined() {
        let memory = Memory::new(16);
        let back = unmarshal_ret(&memory, NativeValue::i32(7), &Type::Void).unwrap();
        assert_eq!(back, Value::Undef);
    }
}
