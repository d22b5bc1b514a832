use core::fmt::{self, Display};

/// Index of a declared composite type (function, struct or array) inside a
/// module's type section. Concrete [`HeapType::Concrete`] references carry one
/// of these; resolving it to a [`crate::SubType`] is the type list's job.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeIdx(pub u32);

impl From<u32> for TypeIdx {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl Display for TypeIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The abstract heap types of the reference-types/GC proposals.
///
/// Forms two independent hierarchies rooted at `Func`/`Extern` respectively,
/// plus the `any` hierarchy used by the GC proposal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AbsHeapType {
    Func,
    NoFunc,
    Extern,
    NoExtern,
    Any,
    Eq,
    I31,
    Struct,
    Array,
    None,
    Exn,
    NoExn,
}

impl AbsHeapType {
    /// `true` if `self` is the bottom of its hierarchy (`none`, `nofunc`, `noextern`, `noexn`).
    pub const fn is_bottom(self) -> bool {
        matches!(self, Self::None | Self::NoFunc | Self::NoExtern | Self::NoExn)
    }

    /// The top of the hierarchy `self` belongs to.
    pub const fn top(self) -> Self {
        match self {
            Self::Func | Self::NoFunc => Self::Func,
            Self::Extern | Self::NoExtern => Self::Extern,
            Self::Exn | Self::NoExn => Self::Exn,
            Self::Any | Self::Eq | Self::I31 | Self::Struct | Self::Array | Self::None => Self::Any,
        }
    }

    /// `true` if `sup` widens `self` within their shared hierarchy, ignoring
    /// concrete types entirely. Used both directly and as the fallback once
    /// a concrete type has been lowered to its top abstract type.
    pub const fn widens_to(self, sup: Self) -> bool {
        if self.top() as u8 != sup.top() as u8 {
            // crude but sound: different hierarchies never relate, except via `top()`
            return false;
        }
        match (self, sup) {
            (a, b) if a as u8 == b as u8 => true,
            (Self::NoFunc, Self::Func) => true,
            (Self::NoExtern, Self::Extern) => true,
            (Self::NoExn, Self::Exn) => true,
            (Self::None, Self::Any)
            | (Self::None, Self::Eq)
            | (Self::None, Self::I31)
            | (Self::None, Self::Struct)
            | (Self::None, Self::Array) => true,
            (Self::I31, Self::Eq) | (Self::Struct, Self::Eq) | (Self::Array, Self::Eq) => true,
            (Self::I31, Self::Any) | (Self::Struct, Self::Any) | (Self::Array, Self::Any) => true,
            (Self::Eq, Self::Any) => true,
            _ => false,
        }
    }
}

/// A reference's heap type: either one of the closed abstract heap types or a
/// concrete, module-defined composite type.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum HeapType {
    Abs(AbsHeapType),
    Concrete(TypeIdx),
}

impl HeapType {
    /// Lowers `self` to the top abstract heap type reachable by widening,
    /// consulting `top_of` to resolve a concrete type's hierarchy for
    /// concrete heap types.
    pub fn top(self, top_of: impl FnOnce(TypeIdx) -> AbsHeapType) -> AbsHeapType {
        match self {
            Self::Abs(a) => a.top(),
            Self::Concrete(idx) => top_of(idx).top(),
        }
    }
}

impl Display for HeapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abs(a) => write!(f, "{a:?}"),
            Self::Concrete(idx) => write!(f, "(type {idx})"),
        }
    }
}

/// A Wasm value type: the four numeric types, `v128`, or a (possibly
/// nullable) reference type.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ValType {
    I32,
    I64,
    F32,
    F64,
    V128,
    Ref { nullable: bool, heap: HeapType },
}

impl ValType {
    pub const FUNCREF: Self = Self::Ref { nullable: true, heap: HeapType::Abs(AbsHeapType::Func) };
    pub const EXTERNREF: Self = Self::Ref { nullable: true, heap: HeapType::Abs(AbsHeapType::Extern) };
    pub const EXNREF: Self = Self::Ref { nullable: true, heap: HeapType::Abs(AbsHeapType::Exn) };

    pub const fn is_num(self) -> bool {
        matches!(self, Self::I32 | Self::I64 | Self::F32 | Self::F64 | Self::V128)
    }

    pub const fn is_ref(self) -> bool {
        matches!(self, Self::Ref { .. })
    }

    /// A reference type is defaultable (to `null`) iff it is nullable; every
    /// numeric type defaults to zero.
    pub const fn is_defaultable(self) -> bool {
        match self {
            Self::Ref { nullable, .. } => nullable,
            _ => true,
        }
    }

    pub const fn as_non_null(self) -> Self {
        match self {
            Self::Ref { heap, .. } => Self::Ref { nullable: false, heap },
            other => other,
        }
    }
}

impl Display for ValType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I32 => write!(f, "i32"),
            Self::I64 => write!(f, "i64"),
            Self::F32 => write!(f, "f32"),
            Self::F64 => write!(f, "f64"),
            Self::V128 => write!(f, "v128"),
            Self::Ref { nullable: true, heap } => write!(f, "(ref null {heap})"),
            Self::Ref { nullable: false, heap } => write!(f, "(ref {heap})"),
        }
    }
}

/// The storage type of a struct/array field, which may additionally be a
/// packed 8- or 16-bit integer that widens to `i32` on load.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StorageType {
    Val(ValType),
    I8,
    I16,
}

impl StorageType {
    /// The type a value has once unpacked onto the operand stack.
    pub const fn unpacked(self) -> ValType {
        match self {
            Self::Val(v) => v,
            Self::I8 | Self::I16 => ValType::I32,
        }
    }

    /// Packs an `i32` into the field's narrow storage width, discarding the
    /// high bits the way a struct/array `set` does.
    pub fn pack(self, value: i32) -> i32 {
        match self {
            Self::Val(_) => value,
            Self::I8 => value & 0xFF,
            Self::I16 => value & 0xFFFF,
        }
    }

    /// Unpacks a narrow field back to `i32`, sign- or zero-extending per `signed`.
    pub fn unpack(self, raw: i32, signed: bool) -> i32 {
        match (self, signed) {
            (Self::Val(_), _) => raw,
            (Self::I8, true) => raw as i8 as i32,
            (Self::I8, false) => (raw as u8) as i32,
            (Self::I16, true) => raw as i16 as i32,
            (Self::I16, false) => (raw as u16) as i32,
        }
    }
}
