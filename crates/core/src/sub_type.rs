use crate::{func_type::FuncType, limits::MAX_SUBTYPE_DEPTH, val_type::StorageType, AbsHeapType, HeapType, TypeIdx};
use alloc::sync::Arc;
use core::fmt::{self, Display};

/// A struct or array field: its storage type and declared mutability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldType {
    pub storage: StorageType,
    pub mutable: bool,
}

/// The composite shape a [`SubType`] declares: function, struct, or array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositeType {
    Func(FuncType),
    Struct(Arc<[FieldType]>),
    Array(FieldType),
}

impl CompositeType {
    /// The top abstract heap type this composite shape inhabits.
    pub const fn top(&self) -> AbsHeapType {
        match self {
            Self::Func(_) => AbsHeapType::Func,
            Self::Struct(_) | Self::Array(_) => AbsHeapType::Any,
        }
    }
}

/// A single declared type: a composite shape, optional declared super-types,
/// and a `final` flag that forbids further sub-typing.
///
/// Invariant (enforced by the validator, not by this type): the overall
/// subtype graph of a module is a *forest* — every [`SubType`] lists at most
/// one immediate super, chain depth never exceeds [`MAX_SUBTYPE_DEPTH`], and a
/// `final` type has no declared subtypes anywhere in the module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubType {
    pub composite: CompositeType,
    pub supertype: Option<TypeIdx>,
    pub is_final: bool,
}

impl SubType {
    pub const fn new(composite: CompositeType) -> Self {
        Self { composite, supertype: None, is_final: true }
    }

    pub const fn with_supertype(mut self, supertype: TypeIdx, is_final: bool) -> Self {
        self.supertype = Some(supertype);
        self.is_final = is_final;
        self
    }
}

/// Errors raised while validating a declared sub-type chain.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SubTypeError {
    /// The declared super-type index is out of range.
    InvalidSuperTypeIdx,
    /// The declared super-type is marked `final` and cannot be extended.
    SuperTypeIsFinal,
    /// The composite shape does not match the super-type's shape (func vs. struct vs. array).
    ShapeMismatch,
    /// The chain from this type to its ultimate ancestor exceeds [`MAX_SUBTYPE_DEPTH`].
    ChainTooDeep,
}

impl Display for SubTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::InvalidSuperTypeIdx => "declared super-type index is out of range",
            Self::SuperTypeIsFinal => "cannot extend a final super-type",
            Self::ShapeMismatch => "sub-type's composite shape does not match its super-type",
            Self::ChainTooDeep => "sub-type chain exceeds the maximum allowed depth",
        };
        write!(f, "{msg}")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SubTypeError {}

/// Read-only access to a module's declared type section, used by the
/// subtype-chain walk. Kept abstract so this crate does not depend on any
/// particular arena implementation.
pub trait TypeList {
    fn sub_type(&self, idx: TypeIdx) -> Option<&SubType>;
}

/// Validates that appending `candidate` (declaring `supertype` in `list`,
/// `list` already containing every type up to but not including `candidate`'s
/// own index) keeps the subtype forest invariant.
///
/// Returns the resulting chain depth of `candidate` (0 if it has no super).
pub fn check_chain_depth(list: &impl TypeList, sub: &SubType) -> Result<usize, SubTypeError> {
    let Some(mut cursor) = sub.supertype else {
        return Ok(0);
    };
    let mut depth = 1;
    let mut child_top = sub.composite.top();
    loop {
        let Some(super_ty) = list.sub_type(cursor) else {
            return Err(SubTypeError::InvalidSuperTypeIdx);
        };
        if super_ty.is_final {
            return Err(SubTypeError::SuperTypeIsFinal);
        }
        if child_top != super_ty.composite.top() {
            return Err(SubTypeError::ShapeMismatch);
        }
        match super_ty.supertype {
            Some(next) => {
                cursor = next;
                depth += 1;
                if depth > MAX_SUBTYPE_DEPTH {
                    return Err(SubTypeError::ChainTooDeep);
                }
                child_top = super_ty.composite.top();
            }
            None => return Ok(depth),
        }
    }
}

/// `matchType(T, U)`: does `sub` (looked up in `sub_list`) subtype `sup`
/// (looked up in `sup_list`)?
///
/// Holds iff `sup` is an abstract heap type covering `sub`'s top type, or
/// `sub`'s defined type transitively lists `sup`'s index (in `sup_list`) as a
/// declared super. `sub_list`/`sup_list` may be the same module's type list
/// (the common case) or two different modules' (cross-module `call_indirect`).
pub fn heap_type_matches(
    sub_list: &impl TypeList,
    sub: HeapType,
    sup_list: &impl TypeList,
    sup: HeapType,
) -> bool {
    match (sub, sup) {
        (HeapType::Abs(a), HeapType::Abs(b)) => a.widens_to(b),
        (HeapType::Concrete(idx), HeapType::Abs(b)) => {
            let Some(ty) = sub_list.sub_type(idx) else { return false };
            ty.composite.top().widens_to(b)
        }
        (HeapType::Abs(_), HeapType::Concrete(_)) => false,
        (HeapType::Concrete(mut cursor), HeapType::Concrete(target)) => {
            let mut depth = 0;
            loop {
                if cursor == target && same_definition(sub_list, cursor, sup_list, target) {
                    return true;
                }
                let Some(ty) = sub_list.sub_type(cursor) else { return false };
                match ty.supertype {
                    Some(next) => {
                        cursor = next;
                        depth += 1;
                        if depth > MAX_SUBTYPE_DEPTH {
                            return false;
                        }
                    }
                    None => return false,
                }
            }
        }
    }
}

/// Structural equality fallback for the case where two type lists assign the
/// same index to semantically different declarations (independent modules).
fn same_definition(
    sub_list: &impl TypeList,
    sub_idx: TypeIdx,
    sup_list: &impl TypeList,
    sup_idx: TypeIdx,
) -> bool {
    match (sub_list.sub_type(sub_idx), sup_list.sub_type(sup_idx)) {
        (Some(a), Some(b)) => a.composite == b.composite,
        _ => false,
    }
}

/// `matches` a reference value's heap type against a declared heap type when
/// both are resolved against the *same* type list (the common, single-module
/// case used throughout the validator).
pub fn matches_in(list: &impl TypeList, sub: HeapType, sup: HeapType) -> bool {
    heap_type_matches(list, sub, list, sup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func_type::FuncType;
    use alloc::{vec, vec::Vec};

    struct Linear(Vec<SubType>);
    impl TypeList for Linear {
        fn sub_type(&self, idx: TypeIdx) -> Option<&SubType> {
            self.0.get(idx.0 as usize)
        }
    }

    fn leaf() -> SubType {
        SubType::new(CompositeType::Func(FuncType::new([], [])))
    }

    #[test]
    fn chain_of_64_is_allowed() {
        let mut types = Vec::new();
        types.push(leaf());
        for i in 1..64u32 {
            types.push(leaf().with_supertype(TypeIdx(i - 1), false));
        }
        let list = Linear(types);
        assert_eq!(check_chain_depth(&list, &list.0[63]), Ok(63));
    }

    #[test]
    fn chain_of_65_is_rejected() {
        let mut types = Vec::new();
        types.push(leaf());
        for i in 1..65u32 {
            types.push(leaf().with_supertype(TypeIdx(i - 1), false));
        }
        let list = Linear(types);
        let candidate = leaf().with_supertype(TypeIdx(64), false);
        assert_eq!(check_chain_depth(&list, &candidate), Err(SubTypeError::ChainTooDeep));
    }

    #[test]
    fn abstract_any_covers_struct() {
        assert!(AbsHeapType::Struct.widens_to(AbsHeapType::Any));
        assert!(!AbsHeapType::Struct.widens_to(AbsHeapType::Func));
    }

    #[test]
    fn concrete_matches_declared_super() {
        let base = leaf();
        let derived = leaf().with_supertype(TypeIdx(0), false);
        let list = Linear(vec![base, derived]);
        assert!(matches_in(&list, HeapType::Concrete(TypeIdx(1)), HeapType::Concrete(TypeIdx(0))));
        assert!(!matches_in(&list, HeapType::Concrete(TypeIdx(0)), HeapType::Concrete(TypeIdx(1))));
    }
}
