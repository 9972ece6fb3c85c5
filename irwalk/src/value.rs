//! Tagged runtime values and the operations the evaluator applies to them.
//!
//! Integers carry an explicit bit width and store their two's-complement
//! bit pattern in a `u128`, always masked to the width; arithmetic therefore
//! wraps modulo 2^width exactly, for any width up to 128 bits. Floats store
//! their IEEE-754 bit pattern so NaN payloads survive copies. Addresses are
//! virtual: the memory module assigns each region a disjoint address range.
//!
//! Operand kinds and widths are guaranteed by the front end, so a mismatch
//! inside an operation is an invariant violation and fails the whole
//! interpretation.

use crate::ir::{BinOp, CastOp, FloatPredicate, IntPredicate};
use crate::ty::Type;
use anyhow::{Result, bail};
use num_traits::Float;

/// A runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Undefined contents; reading through it yields unspecified bits.
    Undef,
    /// Integer bit pattern masked to `width` (1..=128).
    Int { width: u32, bits: u128 },
    /// IEEE-754 bit pattern at `width` 32 or 64.
    Float { width: u32, bits: u64 },
    /// Virtual address into one of the memory regions; 0 is null.
    Addr(u64),
    /// Ordered element sequence mirroring a struct or array type.
    Aggregate(Vec<Value>),
}

/// All-ones mask covering the low `width` bits.
pub fn mask(width: u32) -> u128 {
    debug_assert!((1..=128).contains(&width));
    if width >= 128 { u128::MAX } else { (1u128 << width) - 1 }
}

/// Sign-extends a masked bit pattern of the given width to an `i128`.
pub fn sign_extend(bits: u128, width: u32) -> i128 {
    if width >= 128 {
        return bits as i128;
    }
    let sign = 1u128 << (width - 1);
    if bits & sign != 0 {
        (bits | !mask(width)) as i128
    } else {
        bits as i128
    }
}

impl Value {
    /// An integer from a raw bit pattern; masks to the width.
    pub fn int(width: u32, bits: u128) -> Self {
        Value::Int {
            width,
            bits: bits & mask(width),
        }
    }

    /// An integer from a signed quantity; wraps into the width.
    pub fn from_i128(width: u32, value: i128) -> Self {
        Value::int(width, value as u128)
    }

    /// The `i1` encoding of a boolean.
    pub fn bool(value: bool) -> Self {
        Value::int(1, value as u128)
    }

    pub fn f32(value: f32) -> Self {
        Value::Float {
            width: 32,
            bits: value.to_bits() as u64,
        }
    }

    pub fn f64(value: f64) -> Self {
        Value::Float {
            width: 64,
            bits: value.to_bits(),
        }
    }

    /// Width and bit pattern of an integer value.
    pub fn as_int(&self) -> Result<(u32, u128)> {
        match self {
            Value::Int { width, bits } => Ok((*width, *bits)),
            other => bail!("expected an integer value, found {other:?}"),
        }
    }

    /// Sign-extended reading of an integer value.
    pub fn as_signed(&self) -> Result<i128> {
        let (width, bits) = self.as_int()?;
        Ok(sign_extend(bits, width))
    }

    pub fn as_addr(&self) -> Result<u64> {
        match self {
            Value::Addr(addr) => Ok(*addr),
            other => bail!("expected an address value, found {other:?}"),
        }
    }

    /// Branch-condition reading: any non-zero integer is true.
    pub fn is_truthy(&self) -> Result<bool> {
        let (_, bits) = self.as_int()?;
        Ok(bits != 0)
    }

    fn as_f32(&self) -> Result<f32> {
        match self {
            Value::Float { width: 32, bits } => Ok(f32::from_bits(*bits as u32)),
            other => bail!("expected a 32-bit float value, found {other:?}"),
        }
    }

    fn as_f64(&self) -> Result<f64> {
        match self {
            Value::Float { width: 64, bits } => Ok(f64::from_bits(*bits)),
            other => bail!("expected a 64-bit float value, found {other:?}"),
        }
    }

    /// The all-zero value of a type, used for zero initializers.
    pub fn zero(ty: &Type) -> Result<Self> {
        Ok(match ty {
            Type::Int(width) => Value::int(*width, 0),
            Type::Float(32) => Value::f32(0.0),
            Type::Float(64) => Value::f64(0.0),
            Type::Ptr => Value::Addr(0),
            Type::Array { elem, len } => {
                Value::Aggregate(vec![Value::zero(elem)?; *len])
            }
            Type::Struct(fields) => Value::Aggregate(
                fields.iter().map(Value::zero).collect::<Result<_>>()?,
            ),
            Type::Void | Type::Float(_) | Type::Vector { .. } => {
                bail!("no zero value for {ty:?}")
            }
        })
    }
}

/// Applies a binary opcode to two well-typed operands.
pub fn binary(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    use BinOp::*;
    match op {
        FAdd | FSub | FMul | FDiv | FRem => float_binary(op, lhs, rhs),
        _ => int_binary(op, lhs, rhs),
    }
}

fn int_binary(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    use BinOp::*;
    let (lw, l) = lhs.as_int()?;
    let (rw, r) = rhs.as_int()?;
    if lw != rw {
        bail!("width mismatch in {op:?}: {lw} vs {rw}");
    }
    let width = lw;
    let m = mask(width);
    let bits = match op {
        Add => l.wrapping_add(r) & m,
        Sub => l.wrapping_sub(r) & m,
        Mul => l.wrapping_mul(r) & m,
        UDiv => {
            if r == 0 {
                bail!("division by zero");
            }
            l / r
        }
        URem => {
            if r == 0 {
                bail!("remainder by zero");
            }
            l % r
        }
        SDiv => {
            if r == 0 {
                bail!("division by zero");
            }
            let (ls, rs) = (sign_extend(l, width), sign_extend(r, width));
            (ls.wrapping_div(rs) as u128) & m
        }
        SRem => {
            if r == 0 {
                bail!("remainder by zero");
            }
            let (ls, rs) = (sign_extend(l, width), sign_extend(r, width));
            (ls.wrapping_rem(rs) as u128) & m
        }
        Shl | LShr | AShr => {
            if r >= width as u128 {
                bail!("shift amount {r} exceeds bit width {width}");
            }
            let amt = r as u32;
            match op {
                Shl => (l << amt) & m,
                LShr => l >> amt,
                AShr => (sign_extend(l, width) >> amt) as u128 & m,
                _ => unreachable!(),
            }
        }
        And => l & r,
        Or => l | r,
        Xor => l ^ r,
        FAdd | FSub | FMul | FDiv | FRem => {
            bail!("float opcode {op:?} applied to integer operands")
        }
    };
    Ok(Value::int(width, bits))
}

fn float_binary(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    match (lhs, rhs) {
        (Value::Float { width: 32, .. }, Value::Float { width: 32, .. }) => {
            Ok(Value::f32(float_op(op, lhs.as_f32()?, rhs.as_f32()?)?))
        }
        (Value::Float { width: 64, .. }, Value::Float { width: 64, .. }) => {
            Ok(Value::f64(float_op(op, lhs.as_f64()?, rhs.as_f64()?)?))
        }
        _ => bail!("kind mismatch in {op:?}: {lhs:?} vs {rhs:?}"),
    }
}

/// IEEE-754 arithmetic at the operand width.
fn float_op<T: Float>(op: BinOp, lhs: T, rhs: T) -> Result<T> {
    Ok(match op {
        BinOp::FAdd => lhs + rhs,
        BinOp::FSub => lhs - rhs,
        BinOp::FMul => lhs * rhs,
        BinOp::FDiv => lhs / rhs,
        BinOp::FRem => lhs % rhs,
        other => bail!("integer opcode {other:?} applied to float operands"),
    })
}

/// Integer comparison; yields an `i1`.
pub fn icmp(pred: IntPredicate, lhs: &Value, rhs: &Value) -> Result<Value> {
    use IntPredicate::*;
    let (lw, l) = lhs.as_int()?;
    let (rw, r) = rhs.as_int()?;
    if lw != rw {
        bail!("width mismatch in icmp {pred:?}: {lw} vs {rw}");
    }
    let (ls, rs) = (sign_extend(l, lw), sign_extend(r, rw));
    let result = match pred {
        Eq => l == r,
        Ne => l != r,
        Ugt => l > r,
        Uge => l >= r,
        Ult => l < r,
        Ule => l <= r,
        Sgt => ls > rs,
        Sge => ls >= rs,
        Slt => ls < rs,
        Sle => ls <= rs,
    };
    Ok(Value::bool(result))
}

/// Float comparison; yields an `i1`.
pub fn fcmp(pred: FloatPredicate, lhs: &Value, rhs: &Value) -> Result<Value> {
    let result = match (lhs, rhs) {
        (Value::Float { width: 32, .. }, Value::Float { width: 32, .. }) => {
            float_cmp(pred, lhs.as_f32()?, rhs.as_f32()?)
        }
        (Value::Float { width: 64, .. }, Value::Float { width: 64, .. }) => {
            float_cmp(pred, lhs.as_f64()?, rhs.as_f64()?)
        }
        _ => bail!("kind mismatch in fcmp {pred:?}: {lhs:?} vs {rhs:?}"),
    };
    Ok(Value::bool(result))
}

fn float_cmp<T: Float>(pred: FloatPredicate, lhs: T, rhs: T) -> bool {
    use FloatPredicate::*;
    let unordered = lhs.is_nan() || rhs.is_nan();
    match pred {
        Oeq => !unordered && lhs == rhs,
        Ogt => !unordered && lhs > rhs,
        Oge => !unordered && lhs >= rhs,
        Olt => !unordered && lhs < rhs,
        Ole => !unordered && lhs <= rhs,
        One => !unordered && lhs != rhs,
        Ord => !unordered,
        Ueq => unordered || lhs == rhs,
        Ugt => unordered || lhs > rhs,
        Uge => unordered || lhs >= rhs,
        Ult => unordered || lhs < rhs,
        Ule => unordered || lhs <= rhs,
        Une => unordered || lhs != rhs,
        Uno => unordered,
    }
}

/// Converts `src` to `dst_ty` per the cast opcode.
pub fn cast(op: CastOp, src: &Value, dst_ty: &Type) -> Result<Value> {
    use CastOp::*;
    match op {
        Trunc | ZExt => {
            let (_, bits) = src.as_int()?;
            let Type::Int(dst) = dst_ty else {
                bail!("{op:?} to non-integer type {dst_ty:?}");
            };
            Ok(Value::int(*dst, bits))
        }
        SExt => {
            let Type::Int(dst) = dst_ty else {
                bail!("sext to non-integer type {dst_ty:?}");
            };
            Ok(Value::from_i128(*dst, src.as_signed()?))
        }
        FpTrunc => Ok(Value::f32(src.as_f64()? as f32)),
        FpExt => Ok(Value::f64(src.as_f32()? as f64)),
        FpToUi | FpToSi => {
            let Type::Int(dst) = dst_ty else {
                bail!("{op:?} to non-integer type {dst_ty:?}");
            };
            let f = match src {
                Value::Float { width: 32, .. } => src.as_f32()? as f64,
                _ => src.as_f64()?,
            };
            if op == FpToSi {
                Ok(Value::from_i128(*dst, f as i128))
            } else {
                Ok(Value::int(*dst, f as u128))
            }
        }
        UiToFp | SiToFp => {
            let (width, bits) = src.as_int()?;
            let f = if op == SiToFp {
                sign_extend(bits, width) as f64
            } else {
                bits as f64
            };
            match dst_ty {
                Type::Float(32) => Ok(Value::f32(f as f32)),
                Type::Float(64) => Ok(Value::f64(f)),
                other => bail!("{op:?} to non-float type {other:?}"),
            }
        }
        PtrToInt => {
            let addr = src.as_addr()?;
            let Type::Int(dst) = dst_ty else {
                bail!("ptrtoint to non-integer type {dst_ty:?}");
            };
            Ok(Value::int(*dst, addr as u128))
        }
        IntToPtr => {
            let (_, bits) = src.as_int()?;
            Ok(Value::Addr(bits as u64))
        }
        Bitcast => bitcast(src, dst_ty),
    }
}

fn bitcast(src: &Value, dst_ty: &Type) -> Result<Value> {
    match (src, dst_ty) {
        (Value::Int { width: 32, bits }, Type::Float(32)) => Ok(Value::Float {
            width: 32,
            bits: *bits as u64,
        }),
        (Value::Int { width: 64, bits }, Type::Float(64)) => Ok(Value::Float {
            width: 64,
            bits: *bits as u64,
        }),
        (Value::Float { width: 32, bits }, Type::Int(32)) => Ok(Value::int(32, *bits as u128)),
        (Value::Float { width: 64, bits }, Type::Int(64)) => Ok(Value::int(64, *bits as u128)),
        (Value::Int { width, bits }, Type::Int(dst)) if width == dst => {
            Ok(Value::int(*dst, *bits))
        }
        (Value::Addr(addr), Type::Ptr) => Ok(Value::Addr(*addr)),
        _ => bail!("unsupported bitcast: {src:?} to {dst_ty:?}"),
    }
}

/// Reads the aggregate element at `path`, one index per nesting level.
pub fn extract(agg: &Value, path: &[usize]) -> Result<Value> {
    let mut cur = agg;
    for &index in path {
        let Value::Aggregate(elems) = cur else {
            bail!("extractvalue into non-aggregate {cur:?}");
        };
        cur = elems
            .get(index)
            .ok_or_else(|| anyhow::anyhow!("aggregate index {index} out of bounds"))?;
    }
    Ok(cur.clone())
}

/// Returns `agg` with the element at `path` replaced by `elem`.
pub fn insert(agg: Value, path: &[usize], elem: Value) -> Result<Value> {
    let Some((&index, rest)) = path.split_first() else {
        return Ok(elem);
    };
    let Value::Aggregate(mut elems) = agg else {
        bail!("insertvalue into non-aggregate {agg:?}");
    };
    let slot = elems
        .get_mut(index)
        .ok_or_else(|| anyhow::anyhow!("aggregate index {index} out of bounds"))?;
    let old = std::mem::replace(slot, Value::Undef);
    *slot = insert(old, rest, elem)?;
    Ok(Value::Aggregate(elems))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wraparound_matches_width() {
        // 8-bit 200 + 100 wraps to 44.
        let result = binary(
            BinOp::Add,
            &Value::int(8, 200),
            &Value::int(8, 100),
        )
        .unwrap();
        assert_eq!(result, Value::int(8, 44));

        // Subtraction below zero wraps from the top.
        let result = binary(BinOp::Sub, &Value::int(8, 3), &Value::int(8, 5)).unwrap();
        assert_eq!(result, Value::int(8, 254));
    }

    #[test]
    fn test_odd_width_arithmetic() {
        // 3-bit arithmetic wraps modulo 8.
        let result = binary(BinOp::Add, &Value::int(3, 6), &Value::int(3, 7)).unwrap();
        assert_eq!(result, Value::int(3, 5));
    }

    #[test]
    fn test_signed_division() {
        let lhs = Value::from_i128(32, -7);
        let rhs = Value::from_i128(32, 2);
        let result = binary(BinOp::SDiv, &lhs, &rhs).unwrap();
        assert_eq!(result.as_signed().unwrap(), -3);
        let result = binary(BinOp::SRem, &lhs, &rhs).unwrap();
        assert_eq!(result.as_signed().unwrap(), -1);
    }

    #[test]
    fn test_division_by_zero_is_fatal() {
        assert!(binary(BinOp::UDiv, &Value::int(32, 1), &Value::int(32, 0)).is_err());
        assert!(binary(BinOp::SRem, &Value::int(32, 1), &Value::int(32, 0)).is_err());
    }

    #[test]
    fn test_width_mismatch_is_fatal() {
        assert!(binary(BinOp::Add, &Value::int(8, 1), &Value::int(16, 1)).is_err());
        assert!(icmp(IntPredicate::Eq, &Value::int(8, 1), &Value::int(16, 1)).is_err());
    }

    #[test]
    fn test_arithmetic_shift_keeps_sign() {
        let lhs = Value::from_i128(8, -8);
        let result = binary(BinOp::AShr, &lhs, &Value::int(8, 2)).unwrap();
        assert_eq!(result.as_signed().unwrap(), -2);
        let result = binary(BinOp::LShr, &lhs, &Value::int(8, 2)).unwrap();
        assert_eq!(result, Value::int(8, 0b0011_1110));
    }

    #[test]
    fn test_signed_vs_unsigned_compare() {
        let minus_one = Value::from_i128(32, -1);
        let one = Value::int(32, 1);
        assert_eq!(
            icmp(IntPredicate::Slt, &minus_one, &one).unwrap(),
            Value::bool(true)
        );
        // As an unsigned pattern, -1 is the maximum value.
        assert_eq!(
            icmp(IntPredicate::Ult, &minus_one, &one).unwrap(),
            Value::bool(false)
        );
    }

    #[test]
    fn test_float_nan_ordering() {
        let nan = Value::f64(f64::NAN);
        let one = Value::f64(1.0);
        assert_eq!(
            fcmp(FloatPredicate::Oeq, &nan, &one).unwrap(),
            Value::bool(false)
        );
        assert_eq!(
            fcmp(FloatPredicate::Ueq, &nan, &one).unwrap(),
            Value::bool(true)
        );
        assert_eq!(
            fcmp(FloatPredicate::Uno, &nan, &nan).unwrap(),
            Value::bool(true)
        );
        assert_eq!(
            fcmp(FloatPredicate::Ord, &one, &one).unwrap(),
            Value::bool(true)
        );
    }

    #[test]
    fn test_float_arithmetic_at_width() {
        let result = binary(BinOp::FAdd, &Value::f32(1.5), &Value::f32(2.25)).unwrap();
        assert_eq!(result, Value::f32(3.75));
        let result = binary(BinOp::FRem, &Value::f64(7.0), &Value::f64(2.0)).unwrap();
        assert_eq!(result, Value::f64(1.0));
    }

    #[test]
    fn test_trunc_and_extend() {
        let wide = Value::int(32, 0x1_23);
        assert_eq!(cast(CastOp::Trunc, &wide, &Type::Int(8)).unwrap(), Value::int(8, 0x23));

        let narrow = Value::from_i128(8, -1);
        assert_eq!(
            cast(CastOp::SExt, &narrow, &Type::Int(32)).unwrap().as_signed().unwrap(),
            -1
        );
        assert_eq!(
            cast(CastOp::ZExt, &narrow, &Type::Int(32)).unwrap(),
            Value::int(32, 0xff)
        );
    }

    #[test]
    fn test_bitcast_round_trip() {
        let f = Value::f32(1.25);
        let i = cast(CastOp::Bitcast, &f, &Type::Int(32)).unwrap();
        assert_eq!(cast(CastOp::Bitcast, &i, &Type::Float(32)).unwrap(), f);
    }

    #[test]
    fn test_int_float_conversions() {
        let v = cast(CastOp::SiToFp, &Value::from_i128(32, -3), &Type::Float(64)).unwrap();
        assert_eq!(v, Value::f64(-3.0));
        let v = cast(CastOp::FpToSi, &Value::f64(-3.9), &Type::Int(32)).unwrap();
        assert_eq!(v.as_signed().unwrap(), -3);
        let v = cast(CastOp::UiToFp, &Value::int(8, 255), &Type::Float(32)).unwrap();
        assert_eq!(v, Value::f32(255.0));
    }

    #[test]
    fn test_aggregate_get_set() {
        let agg = Value::Aggregate(vec![
            Value::int(32, 1),
            Value::Aggregate(vec![Value::int(8, 2), Value::int(8, 3)]),
        ]);
        assert_eq!(extract(&agg, &[1, 0]).unwrap(), Value::int(8, 2));

        let updated = insert(agg, &[1, 1], Value::int(8, 9)).unwrap();
        assert_eq!(extract(&updated, &[1, 1]).unwrap(), Value::int(8, 9));
        assert_eq!(extract(&updated, &[0]).unwrap(), Value::int(32, 1));
    }

    #[test]
    fn test_zero_value() {
        let ty = Type::Struct(vec![Type::Int(16), Type::Ptr]);
        assert_eq!(
            Value::zero(&ty).unwrap(),
            Value::Aggregate(vec![Value::int(16, 0), Value::Addr(0)])
        );
    }
}
