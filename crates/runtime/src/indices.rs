//! Index newtypes for every per-instance entity table, each usable directly
//! as a [`wyrmcore_collections::Arena`] key.
use wyrmcore_collections::ArenaIndex;

macro_rules! define_index {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u32);

        impl ArenaIndex for $name {
            #[inline]
            fn into_usize(self) -> usize {
                self.0 as usize
            }

            #[inline]
            fn from_usize(value: usize) -> Self {
                Self(value as u32)
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }
    };
}

define_index!(
    /// Index into a module's function table (imports followed by definitions).
    FuncIdx
);
define_index!(
    /// Index into a module's table table.
    TableIdx
);
define_index!(
    /// Index into a module's memory table.
    MemIdx
);
define_index!(
    /// Index into a module's global table.
    GlobalIdx
);
define_index!(
    /// Index into a module's element-segment table.
    ElemIdx
);
define_index!(
    /// Index into a module's data-segment table.
    DataIdx
);
define_index!(
    /// Index of a local variable (parameters followed by declared locals) within a function.
    LocalIdx
);
define_index!(
    /// Relative branch depth as written in the instruction stream (0 = innermost).
    LabelIdx
);
define_index!(
    /// Index into the GC object heap ([`wyrmcore_collections::Arena`] of struct/array instances).
    ObjectIdx
);
