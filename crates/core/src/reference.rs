use crate::{AbsHeapType, HeapType};
use core::fmt::{self, Debug};

/// A Wasm reference value: either `null` or an opaque handle into the store,
/// tagged with the heap type it was created with so the dynamic typing rules
/// (`null` subtypes everything in its hierarchy) can be checked without
/// dereferencing the pointee.
///
/// The payload is a raw `u64`: for `funcref`/GC types it is an arena index
/// owned by the module instance; for `externref` it is whatever the host
/// embedder chose to store. This crate never dereferences it.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    heap: HeapType,
    externalized: bool,
    raw: u64,
}

impl Reference {
    pub const NULL_SENTINEL: u64 = u64::MAX;

    pub const fn null(heap: HeapType) -> Self {
        Self { heap, externalized: false, raw: Self::NULL_SENTINEL }
    }

    pub const fn new(heap: HeapType, raw: u64) -> Self {
        Self { heap, externalized: false, raw }
    }

    pub const fn is_null(&self) -> bool {
        self.raw == Self::NULL_SENTINEL
    }

    pub const fn raw(&self) -> u64 {
        self.raw
    }

    pub const fn is_externalized(&self) -> bool {
        self.externalized
    }

    /// Wraps a host object reference as `externref`. Cast/test operations
    /// unwrap this transparently by consulting [`Reference::dynamic_heap_type`]
    /// rather than `heap`.
    pub const fn externalize(self) -> Self {
        Self { externalized: true, ..self }
    }

    pub const fn internalize(self) -> Self {
        Self { externalized: false, ..self }
    }

    /// The heap type used for dynamic type checks (`ref.test`, `ref.cast`,
    /// indirect-call matching): `externref` if externalized, else the
    /// reference's own declared heap type.
    pub const fn dynamic_heap_type(&self) -> HeapType {
        if self.externalized {
            HeapType::Abs(AbsHeapType::Extern)
        } else {
            self.heap
        }
    }

    /// The reference's statically declared heap type, ignoring externalization.
    pub const fn declared_heap_type(&self) -> HeapType {
        self.heap
    }
}

impl Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "null({:?})", self.heap)
        } else {
            write!(f, "ref({:?}, {:#x}{})", self.heap, self.raw, if self.externalized { ", ext" } else { "" })
        }
    }
}
