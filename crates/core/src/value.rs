use crate::{Reference, ValType};
use core::fmt::{self, Debug};

/// The untyped 128-bit carrier used on the operand stack and in locals.
///
/// Mirrors the bit pattern of whichever typed value was written into it; the
/// surrounding validated code (locals/stack types known from validation) is
/// what says how to interpret it. Reading a [`RawValue`] as the wrong type is
/// safe but produces nonsense, the same way transmuting a raw register would.
///
/// The unused high bits of a narrower value (e.g. `i32` only fills `lo64`'s
/// low 32 bits) are left unspecified by arithmetic ops but MUST be zeroed
/// before the value crosses a host/validated boundary; [`RawValue::from_typed`]
/// and [`Value`]'s constructors uphold that.
#[derive(Clone, Copy)]
pub struct RawValue {
    lo64: u64,
    hi64: u64,
}

impl RawValue {
    pub const fn zero() -> Self {
        Self { lo64: 0, hi64: 0 }
    }

    pub const fn from_bits64(bits: u64) -> Self {
        Self { lo64: bits, hi64: 0 }
    }

    pub const fn to_bits64(self) -> u64 {
        self.lo64
    }

    pub const fn from_bits128(bits: u128) -> Self {
        Self { lo64: bits as u64, hi64: (bits >> 64) as u64 }
    }

    pub const fn to_bits128(self) -> u128 {
        (self.lo64 as u128) | ((self.hi64 as u128) << 64)
    }

    /// Reduces a typed [`Value`] to its raw bit pattern, zeroing unused bits.
    pub fn from_typed(value: Value) -> Self {
        match value {
            Value::I32(v) => Self::from_bits64(v as u32 as u64),
            Value::I64(v) => Self::from_bits64(v as u64),
            Value::F32(v) => Self::from_bits64(v.to_bits() as u64),
            Value::F64(v) => Self::from_bits64(v.to_bits()),
            Value::V128(v) => Self::from_bits128(v),
            Value::Ref(r) => Self { lo64: r.raw(), hi64: encode_ref_tag(r) },
        }
    }

    /// Interprets the raw bits as `ty`, reconstructing a [`Reference`] tag for
    /// reference types from the side channel [`RawValue::from_typed`] wrote.
    pub fn into_typed(self, ty: ValType) -> Value {
        match ty {
            ValType::I32 => Value::I32(self.lo64 as u32 as i32),
            ValType::I64 => Value::I64(self.lo64 as i64),
            ValType::F32 => Value::F32(f32::from_bits(self.lo64 as u32)),
            ValType::F64 => Value::F64(f64::from_bits(self.lo64)),
            ValType::V128 => Value::V128(self.to_bits128()),
            ValType::Ref { heap, .. } => Value::Ref(decode_ref_tag(heap, self.lo64, self.hi64)),
        }
    }
}

impl Debug for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawValue({:#x}_{:016x})", self.hi64, self.lo64)
    }
}

/// `hi64 == 1` marks an externalized reference; `hi64 == 0` an internal one.
/// `ValType::Ref`'s `heap`/`nullable` fields are static and recovered from the
/// surrounding type, not stored here.
fn encode_ref_tag(r: Reference) -> u64 {
    r.is_externalized() as u64
}

fn decode_ref_tag(heap: crate::HeapType, raw: u64, tag: u64) -> Reference {
    let r = Reference::new(heap, raw);
    if tag != 0 {
        r.externalize()
    } else {
        r
    }
}

/// A tagged Wasm value: one of `i32`, `i64`, `f32`, `f64`, `v128`, or a
/// reference. This is the shape host functions and `invoke` callers see;
/// internally the stack machine works in terms of [`RawValue`] plus the
/// statically known [`ValType`] for speed.
#[derive(Debug, Clone, Copy)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    V128(u128),
    Ref(Reference),
}

impl Value {
    pub fn ty(&self, heap_of_ref: impl FnOnce(&Reference) -> ValType) -> ValType {
        match self {
            Self::I32(_) => ValType::I32,
            Self::I64(_) => ValType::I64,
            Self::F32(_) => ValType::F32,
            Self::F64(_) => ValType::F64,
            Self::V128(_) => ValType::V128,
            Self::Ref(r) => heap_of_ref(r),
        }
    }

    pub const fn i32(self) -> Option<i32> {
        match self {
            Self::I32(v) => Some(v),
            _ => None,
        }
    }

    pub const fn i64(self) -> Option<i64> {
        match self {
            Self::I64(v) => Some(v),
            _ => None,
        }
    }

    pub const fn f32(self) -> Option<f32> {
        match self {
            Self::F32(v) => Some(v),
            _ => None,
        }
    }

    pub const fn f64(self) -> Option<f64> {
        match self {
            Self::F64(v) => Some(v),
            _ => None,
        }
    }

    pub const fn v128(self) -> Option<u128> {
        match self {
            Self::V128(v) => Some(v),
            _ => None,
        }
    }

    pub fn reference(self) -> Option<Reference> {
        match self {
            Self::Ref(r) => Some(r),
            _ => None,
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::I64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::F32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}

impl From<Reference> for Value {
    fn from(r: Reference) -> Self {
        Self::Ref(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AbsHeapType, HeapType};

    #[test]
    fn i32_round_trips_with_high_bits_zeroed() {
        let raw = RawValue::from_typed(Value::I32(-1));
        assert_eq!(raw.to_bits64(), 0xFFFF_FFFF);
        match raw.into_typed(ValType::I32) {
            Value::I32(v) => assert_eq!(v, -1),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn v128_round_trips() {
        let bits: u128 = 0x1122_3344_5566_7788_99AA_BBCC_DDEE_FF00;
        let raw = RawValue::from_typed(Value::V128(bits));
        match raw.into_typed(ValType::V128) {
            Value::V128(v) => assert_eq!(v, bits),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn externalized_reference_round_trips() {
        let r = Reference::new(HeapType::Abs(AbsHeapType::Func), 7).externalize();
        let raw = RawValue::from_typed(Value::Ref(r));
        let ty = ValType::Ref { nullable: true, heap: HeapType::Abs(AbsHeapType::Func) };
        match raw.into_typed(ty) {
            Value::Ref(out) => {
                assert!(out.is_externalized());
                assert_eq!(out.raw(), 7);
            }
            _ => panic!("wrong variant"),
        }
    }
}
